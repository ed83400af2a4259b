//! In-memory store for tests and embedded harnesses.
//!
//! A single `tokio::sync::Mutex` serializes transactions; each
//! transaction stages its mutations on a clone of the state and writes
//! the clone back on commit. Dropping a transaction without committing
//! discards the clone, so tests observe the same all-or-nothing
//! semantics as the PostgreSQL backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx};
use crate::domain::{
    ChestLot, ChestLotId, ChestOpening, ChestParticipant, ChestPayout, LedgerEntry,
    LedgerTransaction, Lot, LotId, NewChestLot, NewLot, OpeningId, OpeningStatus, StreamerId,
    TxId, TxLotUsage, UserId,
};
use crate::error::LedgerError;

#[derive(Debug, Clone, Default)]
struct MemState {
    accounts: BTreeMap<UserId, i64>,
    lots: BTreeMap<i64, Lot>,
    chest_lots: BTreeMap<i64, ChestLot>,
    transactions: Vec<LedgerTransaction>,
    tx_lots: Vec<TxLotUsage>,
    entries: Vec<LedgerEntry>,
    openings: BTreeMap<OpeningId, ChestOpening>,
    participants: Vec<ChestParticipant>,
    payouts: Vec<ChestPayout>,
    next_lot_id: i64,
    next_chest_lot_id: i64,
}

/// In-memory [`LedgerStore`] with serialized, staged transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every committed transaction, in commit order.
    pub async fn transactions(&self) -> Vec<LedgerTransaction> {
        self.state.lock().await.transactions.clone()
    }

    /// Returns the double-entry rows of one transaction.
    pub async fn entries_for(&self, tx: TxId) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.tx_id == tx)
            .cloned()
            .collect()
    }

    /// Returns the consumed-lot audit rows of one transaction.
    pub async fn tx_lots_for(&self, tx: TxId) -> Vec<TxLotUsage> {
        self.state
            .lock()
            .await
            .tx_lots
            .iter()
            .filter(|u| u.tx_id == tx)
            .cloned()
            .collect()
    }

    /// Returns a streamer's chest lots (exhausted lots are deleted).
    pub async fn chest_lots_of(&self, streamer: StreamerId) -> Vec<ChestLot> {
        self.state
            .lock()
            .await
            .chest_lots
            .values()
            .filter(|l| l.streamer_id == streamer)
            .cloned()
            .collect()
    }

    /// Total number of persisted payout rows, across all openings.
    pub async fn payout_row_count(&self) -> usize {
        self.state.lock().await.payouts.len()
    }
}

/// One staged atomic unit over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn create_account(&self, user: UserId) -> Result<(), LedgerError> {
        self.state.lock().await.accounts.entry(user).or_insert(0);
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<i64, LedgerError> {
        self.state
            .lock()
            .await
            .accounts
            .get(&user)
            .copied()
            .ok_or(LedgerError::UserNotFound(user.as_uuid()))
    }

    async fn lots_of(&self, user: UserId) -> Result<Vec<Lot>, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .lots
            .values()
            .filter(|l| l.owner == user)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(&mut self, user: UserId) -> Result<i64, LedgerError> {
        self.staged
            .accounts
            .get(&user)
            .copied()
            .ok_or(LedgerError::UserNotFound(user.as_uuid()))
    }

    async fn adjust_balance(&mut self, user: UserId, delta: i64) -> Result<(), LedgerError> {
        let balance = self
            .staged
            .accounts
            .get_mut(&user)
            .ok_or(LedgerError::UserNotFound(user.as_uuid()))?;
        let next = *balance + delta;
        if next < 0 {
            return Err(LedgerError::Persistence(format!(
                "balance of {user} would become negative"
            )));
        }
        *balance = next;
        Ok(())
    }

    async fn lock_lots(&mut self, owner: UserId) -> Result<Vec<Lot>, LedgerError> {
        Ok(self
            .staged
            .lots
            .values()
            .filter(|l| l.owner == owner && l.amount_remaining > 0)
            .cloned()
            .collect())
    }

    async fn insert_lot(&mut self, lot: NewLot) -> Result<LotId, LedgerError> {
        self.staged.next_lot_id += 1;
        let id = LotId(self.staged.next_lot_id);
        self.staged.lots.insert(id.0, Lot {
            id,
            owner: lot.owner,
            origin: lot.origin,
            weight_bp: lot.weight_bp,
            amount_total: lot.amount,
            amount_remaining: lot.amount,
            created_at: Utc::now(),
            meta: lot.meta,
        });
        Ok(id)
    }

    async fn set_lot_remaining(&mut self, lot: LotId, remaining: i64) -> Result<(), LedgerError> {
        let row = self
            .staged
            .lots
            .get_mut(&lot.0)
            .ok_or_else(|| LedgerError::Persistence(format!("lot {lot} not found")))?;
        row.amount_remaining = remaining;
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<(), LedgerError> {
        self.staged.transactions.push(tx.clone());
        Ok(())
    }

    async fn insert_tx_lots(&mut self, rows: &[TxLotUsage]) -> Result<(), LedgerError> {
        self.staged.tx_lots.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_entries(&mut self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        self.staged.entries.extend_from_slice(rows);
        Ok(())
    }

    async fn lock_chest_lots(
        &mut self,
        streamer: StreamerId,
    ) -> Result<Vec<ChestLot>, LedgerError> {
        Ok(self
            .staged
            .chest_lots
            .values()
            .filter(|l| l.streamer_id == streamer && l.amount_remaining > 0)
            .cloned()
            .collect())
    }

    async fn insert_chest_lot(&mut self, lot: NewChestLot) -> Result<ChestLotId, LedgerError> {
        self.staged.next_chest_lot_id += 1;
        let id = ChestLotId(self.staged.next_chest_lot_id);
        self.staged.chest_lots.insert(id.0, ChestLot {
            id,
            streamer_id: lot.streamer_id,
            origin: lot.origin,
            weight_bp: lot.weight_bp,
            amount_total: lot.amount,
            amount_remaining: lot.amount,
            created_at: Utc::now(),
            meta: lot.meta,
        });
        Ok(id)
    }

    async fn consume_chest_lot(
        &mut self,
        lot: ChestLotId,
        remaining: i64,
    ) -> Result<(), LedgerError> {
        if remaining == 0 {
            self.staged.chest_lots.remove(&lot.0);
            return Ok(());
        }
        let row = self
            .staged
            .chest_lots
            .get_mut(&lot.0)
            .ok_or_else(|| LedgerError::Persistence(format!("chest lot {lot} not found")))?;
        row.amount_remaining = remaining;
        Ok(())
    }

    async fn lock_open_opening(
        &mut self,
        streamer: StreamerId,
    ) -> Result<Option<ChestOpening>, LedgerError> {
        Ok(self
            .staged
            .openings
            .values()
            .find(|o| o.streamer_id == streamer && o.status == OpeningStatus::Open)
            .cloned())
    }

    async fn lock_opening(
        &mut self,
        opening: OpeningId,
    ) -> Result<Option<ChestOpening>, LedgerError> {
        Ok(self.staged.openings.get(&opening).cloned())
    }

    async fn insert_opening(&mut self, opening: &ChestOpening) -> Result<(), LedgerError> {
        let duplicate_open = opening.status == OpeningStatus::Open
            && self
                .staged
                .openings
                .values()
                .any(|o| o.streamer_id == opening.streamer_id && o.status == OpeningStatus::Open);
        if duplicate_open {
            return Err(LedgerError::Persistence(
                "one open opening per streamer".to_string(),
            ));
        }
        self.staged.openings.insert(opening.id, opening.clone());
        Ok(())
    }

    async fn close_opening(&mut self, opening: OpeningId) -> Result<(), LedgerError> {
        let row = self
            .staged
            .openings
            .get_mut(&opening)
            .ok_or_else(|| LedgerError::Persistence(format!("opening {opening} not found")))?;
        row.status = OpeningStatus::Closed;
        Ok(())
    }

    async fn insert_participant(&mut self, row: &ChestParticipant) -> Result<bool, LedgerError> {
        let exists = self
            .staged
            .participants
            .iter()
            .any(|p| p.opening_id == row.opening_id && p.user_id == row.user_id);
        if exists {
            return Ok(false);
        }
        self.staged.participants.push(row.clone());
        Ok(true)
    }

    async fn participants(
        &mut self,
        opening: OpeningId,
    ) -> Result<Vec<ChestParticipant>, LedgerError> {
        let mut rows: Vec<ChestParticipant> = self
            .staged
            .participants
            .iter()
            .filter(|p| p.opening_id == opening)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.joined_at, p.user_id));
        Ok(rows)
    }

    async fn insert_payout(&mut self, payout: &ChestPayout) -> Result<(), LedgerError> {
        let exists = self
            .staged
            .payouts
            .iter()
            .any(|p| p.opening_id == payout.opening_id && p.user_id == payout.user_id);
        if !exists {
            self.staged.payouts.push(payout.clone());
        }
        Ok(())
    }

    async fn payouts(&mut self, opening: OpeningId) -> Result<Vec<ChestPayout>, LedgerError> {
        let mut rows: Vec<ChestPayout> = self
            .staged
            .payouts
            .iter()
            .filter(|p| p.opening_id == opening)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.user_id);
        Ok(rows)
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        *self.guard = self.staged;
        Ok(())
    }
}
