//! Business-logic services built on the persistence traits.
//!
//! [`ledger_service::LedgerService`] owns the four value operations
//! (mint, sink, support, cashout); [`chest_service::ChestService`] owns
//! the chest lifecycle (deposit, open, join, close). Both are generic
//! over the store so tests run against the in-memory backend.

pub mod chest_service;
pub mod ledger_service;

pub use chest_service::{ChestService, CloseOutcome, DepositOutcome, DepositedLot};
pub use ledger_service::{
    CashoutOutcome, LedgerService, MintOutcome, ModPayout, SinkOutcome, SupportOutcome,
    SupportRequest,
};
