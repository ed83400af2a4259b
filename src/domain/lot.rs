//! Accounts and weighted currency lots.
//!
//! A lot is a provenance-tagged unit of currency: `weight_bp` records what
//! fraction of real monetary value backs each unit (10000 bp = 100%). The
//! weight is stamped once at creation and never recomputed. User-owned
//! lots persist at zero remainder as history; chest-owned lots are deleted
//! once exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChestLotId, LotId, StreamerId, UserId};

/// Cached aggregate balance of one user.
///
/// Invariant: always equals the sum of the user's lot remainders. The
/// balance may only be mutated in the same atomic unit as the lots it
/// summarizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Account {
    /// Owning user.
    pub user_id: UserId,
    /// Cached rubis balance, never negative.
    pub rubis: i64,
}

/// A user-owned currency lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    /// Row identifier; also the stable lock order.
    pub id: LotId,
    /// Owning user.
    pub owner: UserId,
    /// Provenance tag (e.g. `"purchase"`, `"watch"`, `"support"`).
    pub origin: String,
    /// Real-value backing in basis points, fixed at creation.
    pub weight_bp: i32,
    /// Units the lot was created with.
    pub amount_total: i64,
    /// Units not yet consumed; `<= amount_total`.
    pub amount_remaining: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata recorded at creation.
    pub meta: serde_json::Value,
}

/// Data for a lot about to be inserted.
#[derive(Debug, Clone)]
pub struct NewLot {
    /// Owning user.
    pub owner: UserId,
    /// Provenance tag.
    pub origin: String,
    /// Real-value backing in basis points.
    pub weight_bp: i32,
    /// Initial units; total and remaining start equal.
    pub amount: i64,
    /// Free-form metadata.
    pub meta: serde_json::Value,
}

/// A lot owned by a streamer's chest.
///
/// Same shape as [`Lot`] but owned by a streamer id and capped at the
/// chest's maximum out-weight at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestLot {
    /// Row identifier; also the stable lock order.
    pub id: ChestLotId,
    /// Streamer whose chest holds the lot.
    pub streamer_id: StreamerId,
    /// Provenance tag of the deposited source lot.
    pub origin: String,
    /// Capped real-value backing in basis points.
    pub weight_bp: i32,
    /// Units the lot was created with.
    pub amount_total: i64,
    /// Units not yet paid out.
    pub amount_remaining: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata recorded at deposit.
    pub meta: serde_json::Value,
}

/// Data for a chest lot about to be inserted.
#[derive(Debug, Clone)]
pub struct NewChestLot {
    /// Streamer whose chest receives the lot.
    pub streamer_id: StreamerId,
    /// Provenance tag of the deposited source lot.
    pub origin: String,
    /// Already-capped weight in basis points.
    pub weight_bp: i32,
    /// Initial units.
    pub amount: i64,
    /// Free-form metadata.
    pub meta: serde_json::Value,
}
