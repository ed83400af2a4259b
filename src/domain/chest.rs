//! Chest openings, participants, and payout records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OpeningId, StreamerId, TxId, UserId};

/// Lifecycle of a chest opening. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningStatus {
    /// Join window is active.
    Open,
    /// Payout ran (or the window closed empty); immutable thereafter.
    Closed,
}

impl OpeningStatus {
    /// Stable string form used in the `chest_openings.status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A timed join window for one streamer's chest.
///
/// At most one `Open` opening exists per streamer at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestOpening {
    /// Opening identifier.
    pub id: OpeningId,
    /// Streamer whose chest is being opened.
    pub streamer_id: StreamerId,
    /// User who triggered the opening.
    pub created_by: UserId,
    /// Current lifecycle state.
    pub status: OpeningStatus,
    /// Window start.
    pub opens_at: DateTime<Utc>,
    /// Window end; joins after this instant are rejected.
    pub closes_at: DateTime<Utc>,
    /// Cumulative watched minutes required to join.
    pub min_watch_minutes: u32,
    /// Free-form metadata.
    pub meta: serde_json::Value,
}

/// A viewer registered in an opening. Unique per (opening, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestParticipant {
    /// Opening joined.
    pub opening_id: OpeningId,
    /// Joining viewer.
    pub user_id: UserId,
    /// Join timestamp.
    pub joined_at: DateTime<Utc>,
}

/// One slice of a payout carved from a single chest lot.
///
/// The receiving lot inherits `weight_bp` from the chest lot it was
/// carved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPiece {
    /// Inherited (already capped) weight.
    pub weight_bp: i32,
    /// Units carved at this weight.
    pub amount: i64,
}

/// Persisted result of a closed opening for one participant.
/// Unique per (opening, user); inserts are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestPayout {
    /// Opening the payout belongs to.
    pub opening_id: OpeningId,
    /// Receiving viewer.
    pub user_id: UserId,
    /// Total units received.
    pub amount: i64,
    /// Per-weight breakdown of the received lots.
    pub breakdown: Vec<PayoutPiece>,
    /// Transaction that credited the viewer.
    pub tx_id: TxId,
}
