//! Ledger error types with numeric code mapping.
//!
//! [`LedgerError`] is the central error type for the crate. Every operation
//! aborts its entire atomic unit on error; nothing partially persists. Each
//! variant carries a numeric code so the calling layer can map errors to
//! wire responses without string matching.

/// Central error enum for all ledger and chest operations.
///
/// # Error Code Ranges
///
/// | Range     | Category                         |
/// |-----------|----------------------------------|
/// | 1000–1999 | Validation                       |
/// | 2000–2999 | State / not found / eligibility  |
/// | 3000–3999 | Server / persistence / invariant |
/// | 4000–4999 | Economic (funds, value, drift)   |
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Requested amount was zero or negative.
    #[error("bad amount: {0}")]
    BadAmount(i64),

    /// No account row exists for the given user.
    #[error("user not found: {0}")]
    UserNotFound(uuid::Uuid),

    /// Cached balance is below the requested amount.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Cached balance at the time of the request.
        have: i64,
        /// Amount the operation required.
        need: i64,
    },

    /// Lot pool could not cover the amount even though the cached balance
    /// suggested it could. Signals balance/lot drift.
    #[error("insufficient lots: pool covers {covered} of {requested}")]
    InsufficientLots {
        /// Units the pool could actually supply.
        covered: i64,
        /// Units the operation requested.
        requested: i64,
    },

    /// Cashout target value exceeds the owner's total weighted value.
    #[error("insufficient value: covered {covered_cents} of {target_cents} cents")]
    InsufficientValue {
        /// Value the lot pool could cover, in cents.
        covered_cents: i64,
        /// Requested payout target, in cents.
        target_cents: i64,
    },

    /// An open chest opening already exists for the streamer.
    #[error("chest opening already open for streamer {0}")]
    AlreadyOpen(uuid::Uuid),

    /// No matching chest opening exists (by streamer or by opening id).
    #[error("no chest opening found for {0}")]
    NoOpening(uuid::Uuid),

    /// The opening's join window is over or the opening is closed.
    #[error("chest opening {0} is closed")]
    OpeningClosed(uuid::Uuid),

    /// Viewer has no fresh heartbeat for the streamer's live session.
    #[error("viewer {0} is not watching")]
    NotWatching(uuid::Uuid),

    /// Viewer has not watched long enough in the current live session.
    #[error("viewer has {have} watched minutes, opening requires {need}")]
    NeedWatchtime {
        /// Minutes the viewer has watched in the current session.
        have: u32,
        /// Minutes required by the opening.
        need: u32,
    },

    /// The streamer owner or opening creator tried to join their own opening.
    #[error("owner may not join their own chest opening")]
    OwnerForbidden,

    /// The streamer has no active live session.
    #[error("streamer {0} is not live")]
    StreamOffline(uuid::Uuid),

    /// The chest lot pool ran out mid-payout despite a prior sum check.
    /// Impossible under correct locking; treated as an invariant violation.
    #[error("chest pool exhausted mid-payout: short {short} units")]
    ChestEmptyRace {
        /// Units that could not be carved from the pool.
        short: i64,
    },

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal invariant failure outside the chest payout path.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::BadAmount(_) => 1001,
            Self::UserNotFound(_) => 2001,
            Self::AlreadyOpen(_) => 2101,
            Self::NoOpening(_) => 2102,
            Self::OpeningClosed(_) => 2103,
            Self::NotWatching(_) => 2201,
            Self::NeedWatchtime { .. } => 2202,
            Self::OwnerForbidden => 2203,
            Self::StreamOffline(_) => 2204,
            Self::InsufficientBalance { .. } => 4001,
            Self::InsufficientLots { .. } => 4002,
            Self::InsufficientValue { .. } => 4003,
            Self::ChestEmptyRace { .. } => 3002,
            Self::Persistence(_) => 3001,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns `true` for variants that signal a violated storage
    /// invariant rather than a rejectable request.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InsufficientLots { .. } | Self::ChestEmptyRace { .. }
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
