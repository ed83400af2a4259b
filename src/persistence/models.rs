//! Database row types for the PostgreSQL backend.
//!
//! Thin `FromRow` structs that convert into the domain types. Kept
//! separate so the domain layer never depends on sqlx.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    ChestLot, ChestLotId, ChestOpening, ChestParticipant, Lot, LotId, OpeningId, OpeningStatus,
    StreamerId, UserId,
};

/// A row from the `lots` table.
#[derive(Debug, Clone, FromRow)]
pub struct LotRow {
    /// Row id.
    pub id: i64,
    /// Owning user.
    pub owner: Uuid,
    /// Provenance tag.
    pub origin: String,
    /// Weight in basis points.
    pub weight_bp: i32,
    /// Created units.
    pub amount_total: i64,
    /// Unconsumed units.
    pub amount_remaining: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// JSONB metadata.
    pub meta: serde_json::Value,
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Self {
            id: LotId(row.id),
            owner: UserId::from_uuid(row.owner),
            origin: row.origin,
            weight_bp: row.weight_bp,
            amount_total: row.amount_total,
            amount_remaining: row.amount_remaining,
            created_at: row.created_at,
            meta: row.meta,
        }
    }
}

/// A row from the `chest_lots` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChestLotRow {
    /// Row id.
    pub id: i64,
    /// Streamer whose chest holds the lot.
    pub streamer_id: Uuid,
    /// Provenance tag.
    pub origin: String,
    /// Capped weight in basis points.
    pub weight_bp: i32,
    /// Created units.
    pub amount_total: i64,
    /// Unconsumed units.
    pub amount_remaining: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// JSONB metadata.
    pub meta: serde_json::Value,
}

impl From<ChestLotRow> for ChestLot {
    fn from(row: ChestLotRow) -> Self {
        Self {
            id: ChestLotId(row.id),
            streamer_id: StreamerId::from_uuid(row.streamer_id),
            origin: row.origin,
            weight_bp: row.weight_bp,
            amount_total: row.amount_total,
            amount_remaining: row.amount_remaining,
            created_at: row.created_at,
            meta: row.meta,
        }
    }
}

/// A row from the `chest_openings` table.
#[derive(Debug, Clone, FromRow)]
pub struct OpeningRow {
    /// Opening id.
    pub id: Uuid,
    /// Streamer whose chest is opened.
    pub streamer_id: Uuid,
    /// User who triggered the opening.
    pub created_by: Uuid,
    /// `"open"` or `"closed"`.
    pub status: String,
    /// Window start.
    pub opens_at: DateTime<Utc>,
    /// Window end.
    pub closes_at: DateTime<Utc>,
    /// Required watched minutes.
    pub min_watch_minutes: i32,
    /// JSONB metadata.
    pub meta: serde_json::Value,
}

impl From<OpeningRow> for ChestOpening {
    fn from(row: OpeningRow) -> Self {
        let status = if row.status == "open" {
            OpeningStatus::Open
        } else {
            OpeningStatus::Closed
        };
        Self {
            id: OpeningId::from_uuid(row.id),
            streamer_id: StreamerId::from_uuid(row.streamer_id),
            created_by: UserId::from_uuid(row.created_by),
            status,
            opens_at: row.opens_at,
            closes_at: row.closes_at,
            min_watch_minutes: u32::try_from(row.min_watch_minutes).unwrap_or(0),
            meta: row.meta,
        }
    }
}

/// A row from the `chest_participants` table.
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    /// Opening joined.
    pub opening_id: Uuid,
    /// Joining viewer.
    pub user_id: Uuid,
    /// Join timestamp.
    pub joined_at: DateTime<Utc>,
}

impl From<ParticipantRow> for ChestParticipant {
    fn from(row: ParticipantRow) -> Self {
        Self {
            opening_id: OpeningId::from_uuid(row.opening_id),
            user_id: UserId::from_uuid(row.user_id),
            joined_at: row.joined_at,
        }
    }
}

/// A row from the `chest_payouts` table.
#[derive(Debug, Clone, FromRow)]
pub struct PayoutRow {
    /// Opening the payout belongs to.
    pub opening_id: Uuid,
    /// Receiving viewer.
    pub user_id: Uuid,
    /// Total units received.
    pub amount: i64,
    /// JSONB per-weight breakdown.
    pub breakdown: serde_json::Value,
    /// Crediting transaction.
    pub tx_id: Uuid,
}
