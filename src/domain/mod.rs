//! Domain layer: identifiers, lots, transactions, chest types, and the
//! pure allocation/split algorithms.
//!
//! Everything here is side-effect free. Services lock rows through the
//! persistence layer, run these algorithms over the locked snapshot, and
//! persist the results in the same atomic unit.

pub mod allocation;
pub mod chest;
pub mod ids;
pub mod lot;
pub mod split;
pub mod transaction;

pub use allocation::{Direction, LotDraw, ValueDraw};
pub use chest::{ChestOpening, ChestParticipant, ChestPayout, OpeningStatus, PayoutPiece};
pub use ids::{ChestLotId, LotId, OpeningId, StreamerId, TxId, UserId};
pub use lot::{Account, ChestLot, Lot, NewChestLot, NewLot};
pub use split::SupportSplit;
pub use transaction::{EntryEntity, LedgerEntry, LedgerTransaction, TxKind, TxLotUsage, TxStatus};
