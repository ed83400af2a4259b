//! Write-once transaction records and double-entry audit rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{LotId, TxId, UserId};

/// The five ledger operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Currency creation (the sole injection point).
    Mint,
    /// Permanent destruction with no payout.
    Sink,
    /// Viewer → streamer/moderators/platform value conversion.
    Support,
    /// Streamer currency → pending real-value payout request.
    Cashout,
    /// Movement between sub-ledgers (chest deposit, chest payout).
    Transfer,
}

impl TxKind {
    /// Stable string form used in the `transactions.kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Sink => "sink",
            Self::Support => "support",
            Self::Cashout => "cashout",
            Self::Transfer => "transfer",
        }
    }
}

/// Transaction settlement status.
///
/// Everything commits as `Committed` except cashout, which stays
/// `Pending` until external settlement flips it out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Fully settled inside the ledger.
    Committed,
    /// Awaiting external settlement.
    Pending,
}

impl TxStatus {
    /// Stable string form used in the `transactions.status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Pending => "pending",
        }
    }
}

/// One ledger operation, immutable once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction identifier.
    pub id: TxId,
    /// Operation kind.
    pub kind: TxKind,
    /// Caller-supplied purpose tag (e.g. `"shop"`, `"chest_payout"`).
    pub purpose: String,
    /// Settlement status.
    pub status: TxStatus,
    /// Debited user, when any.
    pub from_user: Option<UserId>,
    /// Primary credited user, when any.
    pub to_user: Option<UserId>,
    /// Rubis moved by the operation.
    pub amount: i64,
    /// Computed real-value figure (support value or cashout target).
    pub support_value: i64,
    /// Rubis credited to the streamer owner.
    pub streamer_amount: i64,
    /// Rubis credited to the platform fee account.
    pub platform_amount: i64,
    /// Rubis destroyed by the operation.
    pub burn_amount: i64,
    /// Free-form metadata.
    pub meta: serde_json::Value,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

/// Audit link from a transaction to one consumed lot.
///
/// Per transaction, the `amount_used` values sum to at most the
/// transaction amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLotUsage {
    /// Transaction that consumed the lot.
    pub tx_id: TxId,
    /// Consumed lot.
    pub lot_id: LotId,
    /// Origin of the consumed lot, denormalized for audit queries.
    pub origin: String,
    /// Weight of the consumed lot at consumption time.
    pub weight_bp: i32,
    /// Units taken from the lot.
    pub amount_used: i64,
}

/// Double-entry accounting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryEntity {
    /// A user account (carries a `user_id`).
    User,
    /// The platform fee aggregate.
    PlatformFee,
    /// The burn aggregate (value removed from circulation).
    PlatformBurn,
    /// A streamer's chest pool.
    Chest,
}

impl EntryEntity {
    /// Stable string form used in the `ledger_entries.entity` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::PlatformFee => "platform_fee",
            Self::PlatformBurn => "platform_burn",
            Self::Chest => "chest",
        }
    }
}

/// One double-entry row. For every value-moving transaction the deltas
/// sum to exactly zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Transaction the entry belongs to.
    pub tx_id: TxId,
    /// Accounting side.
    pub entity: EntryEntity,
    /// User the entry applies to, when `entity` is [`EntryEntity::User`].
    pub user_id: Option<UserId>,
    /// Signed rubis delta.
    pub delta: i64,
}

impl LedgerEntry {
    /// Entry against a user account.
    #[must_use]
    pub fn user(tx_id: TxId, user_id: UserId, delta: i64) -> Self {
        Self {
            tx_id,
            entity: EntryEntity::User,
            user_id: Some(user_id),
            delta,
        }
    }

    /// Entry against a non-user aggregate.
    #[must_use]
    pub fn aggregate(tx_id: TxId, entity: EntryEntity, delta: i64) -> Self {
        Self {
            tx_id,
            entity,
            user_id: None,
            delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_schema() {
        assert_eq!(TxKind::Mint.as_str(), "mint");
        assert_eq!(TxKind::Cashout.as_str(), "cashout");
        assert_eq!(TxKind::Transfer.as_str(), "transfer");
    }

    #[test]
    fn entity_strings_match_schema() {
        assert_eq!(EntryEntity::PlatformBurn.as_str(), "platform_burn");
        assert_eq!(EntryEntity::Chest.as_str(), "chest");
    }

    #[test]
    fn entry_constructors_set_sides() {
        let tx = TxId::new();
        let user = UserId::new();
        let e = LedgerEntry::user(tx, user, -5);
        assert_eq!(e.entity, EntryEntity::User);
        assert_eq!(e.user_id, Some(user));
        let a = LedgerEntry::aggregate(tx, EntryEntity::PlatformFee, 5);
        assert_eq!(a.user_id, None);
    }
}
