//! Chest subsystem: Deposit, Open, Join, Close/Payout.
//!
//! The chest is a per-streamer, capped-weight sub-ledger. Deposits are a
//! sink-style spend of the owner's personal lots; the pool is
//! redistributed to eligible live viewers when a timed opening closes.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::config::EconomyConfig;
use crate::domain::allocation::{self, Direction, Segment};
use crate::domain::{
    ChestOpening, ChestParticipant, ChestPayout, EntryEntity, LedgerEntry, LedgerTransaction,
    LotId, NewChestLot, NewLot, OpeningId, OpeningStatus, PayoutPiece, StreamerId, TxId, TxKind,
    TxLotUsage, TxStatus, UserId,
};
use crate::error::LedgerError;
use crate::live::LiveDirectory;
use crate::persistence::{LedgerStore, LedgerTx};

/// One chest lot created by a deposit.
#[derive(Debug, Clone, Serialize)]
pub struct DepositedLot {
    /// Weight after the cap was applied.
    pub weight_bp: i32,
    /// Units deposited at this weight.
    pub amount: i64,
}

/// Result of a chest deposit.
#[derive(Debug, Clone, Serialize)]
pub struct DepositOutcome {
    /// Recorded transaction.
    pub tx_id: TxId,
    /// Units moved into the chest.
    pub amount: i64,
    /// Chest lots created, one per consumed personal lot.
    pub deposited: Vec<DepositedLot>,
    /// Per-lot consumption detail of the personal spend.
    pub consumed: Vec<TxLotUsage>,
}

/// Result of closing an opening.
#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    /// The closed opening.
    pub opening_id: OpeningId,
    /// `true` when the opening was already closed and the persisted
    /// payouts were returned unchanged.
    pub already_closed: bool,
    /// Units distributed (the pool total at close time).
    pub distributed: i64,
    /// Per-participant payout records.
    pub payouts: Vec<ChestPayout>,
}

/// Orchestration layer for the chest subsystem.
///
/// Owns the store, the economy configuration, the live/session
/// read-interface, and the lottery randomness source. The RNG is a
/// ChaCha-based CSPRNG seeded from OS entropy; tests inject a fixed seed
/// for deterministic fairness assertions.
pub struct ChestService<S> {
    store: Arc<S>,
    economy: EconomyConfig,
    live: Arc<dyn LiveDirectory>,
    rng: Mutex<StdRng>,
}

impl<S> fmt::Debug for ChestService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChestService")
            .field("economy", &self.economy)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> ChestService<S> {
    /// Creates a new service with an OS-entropy-seeded lottery RNG.
    #[must_use]
    pub fn new(store: Arc<S>, economy: EconomyConfig, live: Arc<dyn LiveDirectory>) -> Self {
        Self {
            store,
            economy,
            live,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a service with a fixed RNG seed for deterministic tests.
    #[must_use]
    pub fn with_rng_seed(
        store: Arc<S>,
        economy: EconomyConfig,
        live: Arc<dyn LiveDirectory>,
        seed: u64,
    ) -> Self {
        Self {
            store,
            economy,
            live,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Returns the store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Moves `amount` of the owner's personal rubis into the streamer's
    /// chest pool.
    ///
    /// Personal lots are consumed ascending-weight; each consumed lot
    /// yields one chest lot whose weight is capped at the chest's
    /// maximum out-weight. The downgrade is one-way: value cannot be
    /// laundered back to full strength through the chest.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadAmount`], [`LedgerError::UserNotFound`],
    /// [`LedgerError::InsufficientBalance`], or
    /// [`LedgerError::InsufficientLots`].
    pub async fn deposit(
        &self,
        streamer: StreamerId,
        owner: UserId,
        amount: i64,
        meta: serde_json::Value,
    ) -> Result<DepositOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::BadAmount(amount));
        }

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_account(owner).await?;
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                have: balance,
                need: amount,
            });
        }
        let lots = tx.lock_lots(owner).await?;
        let draws = allocation::allocate(&lots, amount, Direction::AscendingWeight)?;

        for d in &draws {
            tx.set_lot_remaining(LotId(d.lot_key), d.remaining_after)
                .await?;
        }
        tx.adjust_balance(owner, -amount).await?;

        let tx_id = TxId::new();
        let mut deposited = Vec::with_capacity(draws.len());
        for d in &draws {
            let capped = d.weight_bp.min(self.economy.max_out_weight_bp);
            tx.insert_chest_lot(NewChestLot {
                streamer_id: streamer,
                origin: d.origin.clone(),
                weight_bp: capped,
                amount: d.amount_used,
                meta: serde_json::json!({ "deposit_tx": tx_id }),
            })
            .await?;
            deposited.push(DepositedLot {
                weight_bp: capped,
                amount: d.amount_used,
            });
        }

        tx.insert_transaction(&LedgerTransaction {
            id: tx_id,
            kind: TxKind::Transfer,
            purpose: "chest_deposit".to_string(),
            status: TxStatus::Committed,
            from_user: Some(owner),
            to_user: None,
            amount,
            support_value: 0,
            streamer_amount: 0,
            platform_amount: 0,
            burn_amount: 0,
            meta: serde_json::json!({
                "streamer_id": streamer,
                "caller": meta,
            }),
            created_at: Utc::now(),
        })
        .await?;
        let consumed: Vec<TxLotUsage> = draws
            .iter()
            .map(|d| TxLotUsage {
                tx_id,
                lot_id: LotId(d.lot_key),
                origin: d.origin.clone(),
                weight_bp: d.weight_bp,
                amount_used: d.amount_used,
            })
            .collect();
        tx.insert_tx_lots(&consumed).await?;
        tx.insert_entries(&[
            LedgerEntry::user(tx_id, owner, -amount),
            LedgerEntry::aggregate(tx_id, EntryEntity::Chest, amount),
        ])
        .await?;
        tx.commit().await?;

        tracing::info!(%tx_id, %streamer, %owner, amount, "chest deposit");
        Ok(DepositOutcome {
            tx_id,
            amount,
            deposited,
            consumed,
        })
    }

    /// Opens a join window for the streamer's chest.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyOpen`] when an open opening already exists.
    pub async fn open(
        &self,
        streamer: StreamerId,
        created_by: UserId,
        min_watch_minutes: u32,
        meta: serde_json::Value,
    ) -> Result<ChestOpening, LedgerError> {
        let mut tx = self.store.begin().await?;
        if tx.lock_open_opening(streamer).await?.is_some() {
            return Err(LedgerError::AlreadyOpen(streamer.as_uuid()));
        }

        let now = Utc::now();
        let opening = ChestOpening {
            id: OpeningId::new(),
            streamer_id: streamer,
            created_by,
            status: OpeningStatus::Open,
            opens_at: now,
            closes_at: now + Duration::seconds(self.economy.join_window_secs),
            min_watch_minutes,
            meta,
        };
        tx.insert_opening(&opening).await?;
        tx.commit().await?;

        tracing::info!(
            opening = %opening.id,
            %streamer,
            min_watch_minutes,
            "chest opening created"
        );
        Ok(opening)
    }

    /// Registers a viewer in the streamer's open opening.
    ///
    /// Eligibility: the opening is inside its join window; the caller is
    /// neither the channel owner nor the opening creator; the streamer is
    /// live; the viewer heartbeated within the configured freshness
    /// window; and the viewer's watched minutes in the current session
    /// reach the opening's minimum. Joining twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NoOpening`], [`LedgerError::OpeningClosed`],
    /// [`LedgerError::OwnerForbidden`], [`LedgerError::StreamOffline`],
    /// [`LedgerError::NotWatching`], or [`LedgerError::NeedWatchtime`].
    pub async fn join(
        &self,
        streamer: StreamerId,
        streamer_owner: UserId,
        viewer: UserId,
    ) -> Result<ChestParticipant, LedgerError> {
        let mut tx = self.store.begin().await?;
        let opening = tx
            .lock_open_opening(streamer)
            .await?
            .ok_or(LedgerError::NoOpening(streamer.as_uuid()))?;

        let now = Utc::now();
        if now > opening.closes_at {
            return Err(LedgerError::OpeningClosed(opening.id.as_uuid()));
        }
        if viewer == streamer_owner || viewer == opening.created_by {
            return Err(LedgerError::OwnerForbidden);
        }
        if !self.live.is_live(streamer) {
            return Err(LedgerError::StreamOffline(streamer.as_uuid()));
        }
        let presence = self
            .live
            .viewer_presence(streamer, viewer)
            .ok_or(LedgerError::NotWatching(viewer.as_uuid()))?;
        let fresh = presence.last_heartbeat.is_some_and(|hb| {
            now.signed_duration_since(hb)
                <= Duration::seconds(self.economy.heartbeat_max_age_secs)
        });
        if !fresh {
            return Err(LedgerError::NotWatching(viewer.as_uuid()));
        }
        if presence.watched_minutes < opening.min_watch_minutes {
            return Err(LedgerError::NeedWatchtime {
                have: presence.watched_minutes,
                need: opening.min_watch_minutes,
            });
        }

        let participant = ChestParticipant {
            opening_id: opening.id,
            user_id: viewer,
            joined_at: now,
        };
        let inserted = tx.insert_participant(&participant).await?;
        tx.commit().await?;

        if inserted {
            tracing::info!(opening = %opening.id, %viewer, "chest join");
        }
        Ok(participant)
    }

    /// Closes an opening and distributes the pool to its participants.
    ///
    /// Idempotent: an already-closed opening returns its persisted
    /// payouts unchanged. Both the explicit owner/admin close and the
    /// scheduled auto-close route through this path.
    ///
    /// With pool total `T` and `N` participants, every participant gets
    /// `floor(T/N)` and a uniformly random subset of size `T mod N`
    /// (chosen by an unbiased CSPRNG shuffle) gets one extra unit, so the
    /// whole pool is distributed with no residue. Payout lots are carved
    /// from the descending-weight chest-lot list and inherit the carved
    /// lots' capped weights.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NoOpening`] for an unknown id, or
    /// [`LedgerError::ChestEmptyRace`] if the locked pool runs out
    /// mid-carve (an invariant violation under correct locking).
    pub async fn close(&self, opening_id: OpeningId) -> Result<CloseOutcome, LedgerError> {
        let mut tx = self.store.begin().await?;
        let opening = tx
            .lock_opening(opening_id)
            .await?
            .ok_or(LedgerError::NoOpening(opening_id.as_uuid()))?;

        if opening.status != OpeningStatus::Open {
            let payouts = tx.payouts(opening_id).await?;
            tx.commit().await?;
            let distributed = payouts.iter().map(|p| p.amount).sum();
            return Ok(CloseOutcome {
                opening_id,
                already_closed: true,
                distributed,
                payouts,
            });
        }

        let chest_lots = tx.lock_chest_lots(opening.streamer_id).await?;
        let participants = tx.participants(opening_id).await?;
        let pool_total: i64 = chest_lots.iter().map(|l| l.amount_remaining).sum();
        let count = i64::try_from(participants.len()).unwrap_or(0);

        if count == 0 || pool_total == 0 {
            tx.close_opening(opening_id).await?;
            tx.commit().await?;
            tracing::info!(opening = %opening_id, pool_total, "chest closed without payout");
            return Ok(CloseOutcome {
                opening_id,
                already_closed: false,
                distributed: 0,
                payouts: Vec::new(),
            });
        }

        let base = pool_total / count;
        let remainder = pool_total - base * count;
        let needs = self.lottery_needs(participants.len(), base, remainder)?;

        // Carve descending-weight so high-backing chest value goes first.
        let mut ordered = chest_lots.clone();
        ordered.sort_by_key(|l| (std::cmp::Reverse(l.weight_bp), l.id));
        let segments: Vec<Segment> = ordered
            .iter()
            .map(|l| Segment {
                lot_key: l.id.0,
                weight_bp: l.weight_bp,
                amount: l.amount_remaining,
            })
            .collect();
        let carved = allocation::carve(&segments, &needs)?;

        // Persist per-chest-lot consumption; exhausted chest lots are
        // deleted rather than kept as history.
        let mut consumed_per_lot: std::collections::BTreeMap<i64, i64> =
            std::collections::BTreeMap::new();
        for piece in carved.iter().flatten() {
            *consumed_per_lot.entry(piece.lot_key).or_insert(0) += piece.amount;
        }
        for lot in &ordered {
            if let Some(used) = consumed_per_lot.get(&lot.id.0) {
                tx.consume_chest_lot(lot.id, lot.amount_remaining - used)
                    .await?;
            }
        }

        let mut payouts = Vec::new();
        for (participant, (need, pieces)) in participants
            .iter()
            .zip(needs.iter().copied().zip(carved.into_iter()))
        {
            if need == 0 {
                continue;
            }
            let tx_id = TxId::new();
            let mut breakdown = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                tx.insert_lot(NewLot {
                    owner: participant.user_id,
                    origin: "chest".to_string(),
                    weight_bp: piece.weight_bp,
                    amount: piece.amount,
                    meta: serde_json::json!({ "opening_id": opening_id }),
                })
                .await?;
                breakdown.push(PayoutPiece {
                    weight_bp: piece.weight_bp,
                    amount: piece.amount,
                });
            }
            tx.adjust_balance(participant.user_id, need).await?;
            tx.insert_transaction(&LedgerTransaction {
                id: tx_id,
                kind: TxKind::Transfer,
                purpose: "chest_payout".to_string(),
                status: TxStatus::Committed,
                from_user: None,
                to_user: Some(participant.user_id),
                amount: need,
                support_value: 0,
                streamer_amount: 0,
                platform_amount: 0,
                burn_amount: 0,
                meta: serde_json::json!({
                    "opening_id": opening_id,
                    "streamer_id": opening.streamer_id,
                }),
                created_at: Utc::now(),
            })
            .await?;
            tx.insert_entries(&[
                LedgerEntry::aggregate(tx_id, EntryEntity::Chest, -need),
                LedgerEntry::user(tx_id, participant.user_id, need),
            ])
            .await?;

            let payout = ChestPayout {
                opening_id,
                user_id: participant.user_id,
                amount: need,
                breakdown,
                tx_id,
            };
            tx.insert_payout(&payout).await?;
            payouts.push(payout);
        }

        tx.close_opening(opening_id).await?;
        tx.commit().await?;

        // Same order as the persisted rows, so a replayed close returns
        // an identical sequence.
        payouts.sort_by_key(|p| p.user_id);

        tracing::info!(
            opening = %opening_id,
            streamer = %opening.streamer_id,
            pool_total,
            participants = participants.len(),
            "chest closed and paid out"
        );
        Ok(CloseOutcome {
            opening_id,
            already_closed: false,
            distributed: pool_total,
            payouts,
        })
    }

    /// Per-participant payout amounts: `base` each, plus one extra unit
    /// for a uniformly random subset of size `remainder`.
    fn lottery_needs(
        &self,
        participants: usize,
        base: i64,
        remainder: i64,
    ) -> Result<Vec<i64>, LedgerError> {
        let mut indices: Vec<usize> = (0..participants).collect();
        {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| LedgerError::Internal("lottery rng poisoned".to_string()))?;
            indices.shuffle(&mut *rng);
        }
        let bonus: std::collections::BTreeSet<usize> = indices
            .into_iter()
            .take(usize::try_from(remainder).unwrap_or(0))
            .collect();
        Ok((0..participants)
            .map(|i| if bonus.contains(&i) { base + 1 } else { base })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::WeightTable;
    use crate::live::{LiveDirectory, ViewerPresence};
    use crate::persistence::memory::MemoryStore;

    #[derive(Debug)]
    struct StubLive {
        live: bool,
        heartbeat_age_secs: i64,
        watched_minutes: u32,
    }

    impl Default for StubLive {
        fn default() -> Self {
            Self {
                live: true,
                heartbeat_age_secs: 5,
                watched_minutes: 60,
            }
        }
    }

    impl LiveDirectory for StubLive {
        fn is_live(&self, _streamer: StreamerId) -> bool {
            self.live
        }

        fn viewer_presence(
            &self,
            _streamer: StreamerId,
            _viewer: UserId,
        ) -> Option<ViewerPresence> {
            Some(ViewerPresence {
                session_id: uuid::Uuid::new_v4(),
                last_heartbeat: Some(Utc::now() - Duration::seconds(self.heartbeat_age_secs)),
                watched_minutes: self.watched_minutes,
            })
        }
    }

    fn economy() -> EconomyConfig {
        EconomyConfig {
            weights: WeightTable::new(0)
                .with("purchase", 10_000)
                .with("promo", 1_500)
                .with("watch", 0),
            ..EconomyConfig::default()
        }
    }

    fn service_with(live: StubLive, seed: u64) -> ChestService<MemoryStore> {
        ChestService::with_rng_seed(
            Arc::new(MemoryStore::new()),
            economy(),
            Arc::new(live),
            seed,
        )
    }

    async fn account(svc: &ChestService<MemoryStore>) -> UserId {
        let user = UserId::new();
        let Ok(()) = svc.store().create_account(user).await else {
            panic!("create_account failed");
        };
        user
    }

    /// Mints through a raw store transaction so these tests do not depend
    /// on the ledger service.
    async fn mint_raw(svc: &ChestService<MemoryStore>, user: UserId, weight_bp: i32, amount: i64) {
        let Ok(mut tx) = svc.store().begin().await else {
            panic!("begin failed");
        };
        let Ok(_) = tx
            .insert_lot(NewLot {
                owner: user,
                origin: "purchase".to_string(),
                weight_bp,
                amount,
                meta: serde_json::json!({}),
            })
            .await
        else {
            panic!("insert_lot failed");
        };
        let Ok(()) = tx.adjust_balance(user, amount).await else {
            panic!("adjust failed");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };
    }

    #[tokio::test]
    async fn deposit_caps_weight_at_chest_maximum() {
        let svc = service_with(StubLive::default(), 1);
        let owner = account(&svc).await;
        let streamer = StreamerId::new();
        mint_raw(&svc, owner, 10_000, 500).await;

        let Ok(outcome) = svc
            .deposit(streamer, owner, 500, serde_json::json!({}))
            .await
        else {
            panic!("deposit failed");
        };

        assert_eq!(outcome.deposited.len(), 1);
        assert_eq!(outcome.deposited[0].weight_bp, 2_000);
        let chest = svc.store().chest_lots_of(streamer).await;
        assert_eq!(chest.len(), 1);
        assert_eq!(chest[0].weight_bp, 2_000);
        assert_eq!(chest[0].amount_remaining, 500);
        assert_eq!(svc.store().balance(owner).await.ok(), Some(0));

        let entries = svc.store().entries_for(outcome.tx_id).await;
        let sum: i64 = entries.iter().map(|e| e.delta).sum();
        assert_eq!(sum, 0);
    }

    #[tokio::test]
    async fn deposit_consumes_ascending_and_keeps_low_weights() {
        let svc = service_with(StubLive::default(), 1);
        let owner = account(&svc).await;
        let streamer = StreamerId::new();
        mint_raw(&svc, owner, 0, 100).await;
        mint_raw(&svc, owner, 1_500, 100).await;

        let Ok(outcome) = svc
            .deposit(streamer, owner, 120, serde_json::json!({}))
            .await
        else {
            panic!("deposit failed");
        };

        // All 100 zero-weight units go first, then 20 promo units.
        assert_eq!(outcome.deposited[0].weight_bp, 0);
        assert_eq!(outcome.deposited[0].amount, 100);
        assert_eq!(outcome.deposited[1].weight_bp, 1_500);
        assert_eq!(outcome.deposited[1].amount, 20);
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let svc = service_with(StubLive::default(), 1);
        let streamer = StreamerId::new();
        let creator = UserId::new();
        let Ok(_) = svc.open(streamer, creator, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        assert!(matches!(
            svc.open(streamer, creator, 0, serde_json::json!({})).await,
            Err(LedgerError::AlreadyOpen(_))
        ));
    }

    #[tokio::test]
    async fn join_requires_live_stream() {
        let svc = service_with(
            StubLive {
                live: false,
                ..StubLive::default()
            },
            1,
        );
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let Ok(_) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        assert!(matches!(
            svc.join(streamer, owner, UserId::new()).await,
            Err(LedgerError::StreamOffline(_))
        ));
    }

    #[tokio::test]
    async fn join_requires_fresh_heartbeat() {
        let svc = service_with(
            StubLive {
                heartbeat_age_secs: 90,
                ..StubLive::default()
            },
            1,
        );
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let Ok(_) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        assert!(matches!(
            svc.join(streamer, owner, UserId::new()).await,
            Err(LedgerError::NotWatching(_))
        ));
    }

    #[tokio::test]
    async fn join_requires_watchtime() {
        let svc = service_with(
            StubLive {
                watched_minutes: 3,
                ..StubLive::default()
            },
            1,
        );
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let Ok(_) = svc.open(streamer, owner, 10, serde_json::json!({})).await else {
            panic!("open failed");
        };
        assert!(matches!(
            svc.join(streamer, owner, UserId::new()).await,
            Err(LedgerError::NeedWatchtime { have: 3, need: 10 })
        ));
    }

    #[tokio::test]
    async fn owner_and_creator_may_not_join() {
        let svc = service_with(StubLive::default(), 1);
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let creator = UserId::new();
        let Ok(_) = svc.open(streamer, creator, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        assert!(matches!(
            svc.join(streamer, owner, owner).await,
            Err(LedgerError::OwnerForbidden)
        ));
        assert!(matches!(
            svc.join(streamer, owner, creator).await,
            Err(LedgerError::OwnerForbidden)
        ));
    }

    #[tokio::test]
    async fn duplicate_join_is_idempotent() {
        let svc = service_with(StubLive::default(), 1);
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let viewer = UserId::new();
        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        let Ok(_) = svc.join(streamer, owner, viewer).await else {
            panic!("join failed");
        };
        let Ok(_) = svc.join(streamer, owner, viewer).await else {
            panic!("second join failed");
        };

        let Ok(mut tx) = svc.store().begin().await else {
            panic!("begin failed");
        };
        let Ok(rows) = tx.participants(opening.id).await else {
            panic!("participants failed");
        };
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn close_distributes_base_plus_lottery_remainder() {
        let svc = service_with(StubLive::default(), 42);
        let streamer = StreamerId::new();
        let owner = account(&svc).await;
        mint_raw(&svc, owner, 0, 10).await;
        let Ok(_) = svc.deposit(streamer, owner, 10, serde_json::json!({})).await else {
            panic!("deposit failed");
        };

        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        let viewers = [account(&svc).await, account(&svc).await, account(&svc).await];
        for v in viewers {
            let Ok(_) = svc.join(streamer, owner, v).await else {
                panic!("join failed");
            };
        }

        let Ok(outcome) = svc.close(opening.id).await else {
            panic!("close failed");
        };
        assert!(!outcome.already_closed);
        assert_eq!(outcome.distributed, 10);
        let mut amounts: Vec<i64> = outcome.payouts.iter().map(|p| p.amount).collect();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![3, 3, 4]);

        // Whole pool distributed; chest lots deleted on exhaustion.
        assert!(svc.store().chest_lots_of(streamer).await.is_empty());
        for payout in &outcome.payouts {
            assert_eq!(
                svc.store().balance(payout.user_id).await.ok(),
                Some(payout.amount)
            );
            let entries = svc.store().entries_for(payout.tx_id).await;
            let sum: i64 = entries.iter().map(|e| e.delta).sum();
            assert_eq!(sum, 0);
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let svc = service_with(StubLive::default(), 7);
        let streamer = StreamerId::new();
        let owner = account(&svc).await;
        mint_raw(&svc, owner, 0, 10).await;
        let Ok(_) = svc.deposit(streamer, owner, 10, serde_json::json!({})).await else {
            panic!("deposit failed");
        };
        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        for _ in 0..3 {
            let viewer = account(&svc).await;
            let Ok(_) = svc.join(streamer, owner, viewer).await else {
                panic!("join failed");
            };
        }

        let Ok(first) = svc.close(opening.id).await else {
            panic!("close failed");
        };
        let rows_after_first = svc.store().payout_row_count().await;
        let Ok(second) = svc.close(opening.id).await else {
            panic!("second close failed");
        };

        assert!(second.already_closed);
        assert_eq!(svc.store().payout_row_count().await, rows_after_first);
        // The replayed close returns the identical payout sequence, not
        // just the same set.
        let first_seq: Vec<(UserId, i64, TxId)> = first
            .payouts
            .iter()
            .map(|p| (p.user_id, p.amount, p.tx_id))
            .collect();
        let second_seq: Vec<(UserId, i64, TxId)> = second
            .payouts
            .iter()
            .map(|p| (p.user_id, p.amount, p.tx_id))
            .collect();
        assert_eq!(first_seq, second_seq);
        assert_eq!(first_seq.len(), 3);
        // No double credit.
        for payout in &second.payouts {
            assert_eq!(
                svc.store().balance(payout.user_id).await.ok(),
                Some(payout.amount)
            );
        }
    }

    #[tokio::test]
    async fn close_with_no_participants_pays_nothing() {
        let svc = service_with(StubLive::default(), 1);
        let streamer = StreamerId::new();
        let owner = account(&svc).await;
        mint_raw(&svc, owner, 0, 5).await;
        let Ok(_) = svc.deposit(streamer, owner, 5, serde_json::json!({})).await else {
            panic!("deposit failed");
        };
        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };

        let Ok(outcome) = svc.close(opening.id).await else {
            panic!("close failed");
        };
        assert!(outcome.payouts.is_empty());
        assert_eq!(outcome.distributed, 0);
        // Pool stays in the chest for the next opening.
        assert_eq!(svc.store().chest_lots_of(streamer).await.len(), 1);
        // Terminal state: a new opening can be created afterwards.
        let Ok(_) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("reopen failed");
        };
    }

    #[tokio::test]
    async fn close_with_empty_pool_closes_cleanly() {
        let svc = service_with(StubLive::default(), 1);
        let streamer = StreamerId::new();
        let owner = UserId::new();
        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        let viewer = account(&svc).await;
        let Ok(_) = svc.join(streamer, owner, viewer).await else {
            panic!("join failed");
        };

        let Ok(outcome) = svc.close(opening.id).await else {
            panic!("close failed");
        };
        assert!(outcome.payouts.is_empty());
        assert_eq!(svc.store().balance(viewer).await.ok(), Some(0));
    }

    #[tokio::test]
    async fn payout_lots_inherit_capped_chest_weights() {
        let svc = service_with(StubLive::default(), 3);
        let streamer = StreamerId::new();
        let owner = account(&svc).await;
        mint_raw(&svc, owner, 10_000, 40).await;
        let Ok(_) = svc.deposit(streamer, owner, 40, serde_json::json!({})).await else {
            panic!("deposit failed");
        };
        let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
            panic!("open failed");
        };
        let viewer = account(&svc).await;
        let Ok(_) = svc.join(streamer, owner, viewer).await else {
            panic!("join failed");
        };

        let Ok(outcome) = svc.close(opening.id).await else {
            panic!("close failed");
        };
        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.payouts[0].amount, 40);
        assert_eq!(outcome.payouts[0].breakdown, vec![PayoutPiece {
            weight_bp: 2_000,
            amount: 40
        }]);

        let Ok(lots) = svc.store().lots_of(viewer).await else {
            panic!("lots_of failed");
        };
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].weight_bp, 2_000);
        assert_eq!(lots[0].origin, "chest");
    }

    #[tokio::test]
    async fn fairness_holds_for_any_seed() {
        // T=17, N=5: base 3 with remainder 2, so exactly two
        // participants get 4, whatever the shuffle produced.
        for seed in 0..8 {
            let svc = service_with(StubLive::default(), seed);
            let streamer = StreamerId::new();
            let owner = account(&svc).await;
            mint_raw(&svc, owner, 0, 17).await;
            let Ok(_) = svc.deposit(streamer, owner, 17, serde_json::json!({})).await else {
                panic!("deposit failed");
            };
            let Ok(opening) = svc.open(streamer, owner, 0, serde_json::json!({})).await else {
                panic!("open failed");
            };
            for _ in 0..5 {
                let viewer = account(&svc).await;
                let Ok(_) = svc.join(streamer, owner, viewer).await else {
                    panic!("join failed");
                };
            }

            let Ok(outcome) = svc.close(opening.id).await else {
                panic!("close failed");
            };
            let mut amounts: Vec<i64> = outcome.payouts.iter().map(|p| p.amount).collect();
            amounts.sort_unstable();
            assert_eq!(amounts, vec![3, 3, 3, 4, 4], "seed {seed}");
            let total: i64 = amounts.iter().sum();
            assert_eq!(total, 17);
        }
    }
}
