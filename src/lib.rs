//! # rubis-ledger
//!
//! Value-weighted virtual-currency ledger for a live-streaming platform.
//!
//! Rubis balances are backed by lots: immutable parcels of units stamped
//! with a real-value weight (basis points) at creation. Spends consume
//! lots weight-ascending, payout-bearing operations consume them
//! weight-descending, and the chest subsystem redistributes a streamer's
//! deposited (weight-capped) rubis to eligible live viewers through a
//! timed lottery.
//!
//! ## Architecture
//!
//! ```text
//! Callers (platform backend)
//!     │
//!     ├── LedgerService — mint / sink / support / cashout (service/)
//!     ├── ChestService  — deposit / open / join / close   (service/)
//!     │
//!     ├── Allocation engine and split math (domain/)
//!     ├── LiveDirectory / ModerationDirectory (live)
//!     │
//!     ├── LedgerStore / LedgerTx traits (persistence/)
//!     ├── PostgresStore — row-locked transactions
//!     └── MemoryStore   — staged in-memory transactions for tests
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod live;
pub mod persistence;
pub mod service;
