//! Persistence layer: the atomic-unit store abstraction.
//!
//! [`LedgerStore`] opens [`LedgerTx`] transactions; every ledger operation
//! runs entirely inside one transaction and commits or rolls back as a
//! unit. The locking discipline is fixed: lock the owner's account row
//! first, then the owner's lot rows in ascending id order, and only then
//! mutate. Two backends exist: [`postgres::PostgresStore`] (sqlx row
//! locks) and [`memory::MemoryStore`] (serialized, staged commits) for
//! tests.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{
    ChestLot, ChestLotId, ChestOpening, ChestParticipant, ChestPayout, LedgerEntry,
    LedgerTransaction, Lot, LotId, NewChestLot, NewLot, OpeningId, StreamerId, TxLotUsage, UserId,
};
use crate::error::LedgerError;

/// Factory for atomic ledger transactions plus non-transactional reads.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Transaction type carrying one atomic unit.
    type Tx: LedgerTx;

    /// Begins a new atomic unit. Dropping the returned transaction
    /// without committing rolls back every effect.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] when a transaction cannot be opened.
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    /// Creates an account with a zero balance. Idempotent.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn create_account(&self, user: UserId) -> Result<(), LedgerError>;

    /// Reads the cached balance without locking.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UserNotFound`] when no account exists.
    async fn balance(&self, user: UserId) -> Result<i64, LedgerError>;

    /// Reads a user's lots (including exhausted ones) without locking.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn lots_of(&self, user: UserId) -> Result<Vec<Lot>, LedgerError>;
}

/// One atomic unit of ledger mutation.
///
/// Methods mirror the row operations of the schema; they perform no
/// business logic. All `lock_*` methods take exclusive row locks that are
/// held until commit or rollback.
#[async_trait]
pub trait LedgerTx: Send {
    /// Locks the account row exclusively and returns the cached balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UserNotFound`] when no account exists.
    async fn lock_account(&mut self, user: UserId) -> Result<i64, LedgerError>;

    /// Applies a signed delta to an account balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UserNotFound`] when no account exists;
    /// [`LedgerError::Persistence`] when the balance would go negative.
    async fn adjust_balance(&mut self, user: UserId, delta: i64) -> Result<(), LedgerError>;

    /// Locks the owner's non-exhausted lots in ascending id order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn lock_lots(&mut self, owner: UserId) -> Result<Vec<Lot>, LedgerError>;

    /// Inserts a new lot; total and remaining start at `lot.amount`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_lot(&mut self, lot: NewLot) -> Result<LotId, LedgerError>;

    /// Sets a lot's remaining amount. Zero-remainder user lots persist as
    /// history.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn set_lot_remaining(&mut self, lot: LotId, remaining: i64) -> Result<(), LedgerError>;

    /// Inserts the write-once transaction record.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<(), LedgerError>;

    /// Inserts the per-consumed-lot audit rows.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_tx_lots(&mut self, rows: &[TxLotUsage]) -> Result<(), LedgerError>;

    /// Inserts the double-entry rows.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_entries(&mut self, rows: &[LedgerEntry]) -> Result<(), LedgerError>;

    /// Locks the streamer's chest lots in ascending id order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn lock_chest_lots(&mut self, streamer: StreamerId) -> Result<Vec<ChestLot>, LedgerError>;

    /// Inserts a new chest lot. The caller has already capped the weight.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_chest_lot(&mut self, lot: NewChestLot) -> Result<ChestLotId, LedgerError>;

    /// Sets a chest lot's remaining amount, deleting the row when it
    /// reaches zero.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn consume_chest_lot(
        &mut self,
        lot: ChestLotId,
        remaining: i64,
    ) -> Result<(), LedgerError>;

    /// Locks and returns the streamer's open opening, if any.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn lock_open_opening(
        &mut self,
        streamer: StreamerId,
    ) -> Result<Option<ChestOpening>, LedgerError>;

    /// Locks and returns an opening by id, whatever its status.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn lock_opening(
        &mut self,
        opening: OpeningId,
    ) -> Result<Option<ChestOpening>, LedgerError>;

    /// Inserts a new opening.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure (including the
    /// one-open-per-streamer unique index).
    async fn insert_opening(&mut self, opening: &ChestOpening) -> Result<(), LedgerError>;

    /// Transitions an opening to `closed`. Terminal.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn close_opening(&mut self, opening: OpeningId) -> Result<(), LedgerError>;

    /// Inserts a participant row. Returns `false` when the (opening,
    /// user) row already existed.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_participant(&mut self, row: &ChestParticipant) -> Result<bool, LedgerError>;

    /// Lists an opening's participants in join order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn participants(
        &mut self,
        opening: OpeningId,
    ) -> Result<Vec<ChestParticipant>, LedgerError>;

    /// Inserts a payout row; the (opening, user) key makes the insert
    /// idempotent under concurrent double-close.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn insert_payout(&mut self, payout: &ChestPayout) -> Result<(), LedgerError>;

    /// Lists an opening's persisted payouts.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] on backend failure.
    async fn payouts(&mut self, opening: OpeningId) -> Result<Vec<ChestPayout>, LedgerError>;

    /// Commits the atomic unit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Persistence`] when the commit fails; no effect
    /// persists in that case.
    async fn commit(self) -> Result<(), LedgerError>;
}
