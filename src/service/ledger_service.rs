//! Transaction operations: Mint, Sink, Support, Cashout.
//!
//! Every operation runs in one [`LedgerTx`]: lock the account row, lock
//! the lot rows, run the pure allocation over the locked snapshot, apply
//! the mutations, write the audit trail, commit. Any error discards the
//! whole unit.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::EconomyConfig;
use crate::domain::allocation::{self, Direction, LotDraw, Segment};
use crate::domain::{
    EntryEntity, LedgerEntry, LedgerTransaction, LotId, NewLot, StreamerId, SupportSplit, TxId,
    TxKind, TxLotUsage, TxStatus, UserId,
};
use crate::error::LedgerError;
use crate::live::ModerationDirectory;
use crate::persistence::{LedgerStore, LedgerTx};

/// Result of a mint.
#[derive(Debug, Clone, Serialize)]
pub struct MintOutcome {
    /// Recorded transaction.
    pub tx_id: TxId,
    /// The lot that was created.
    pub lot_id: LotId,
    /// Weight stamped on the new lot.
    pub weight_bp: i32,
    /// Minted units.
    pub amount: i64,
}

/// Result of a sink.
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    /// Recorded transaction.
    pub tx_id: TxId,
    /// Destroyed units (equals the requested amount).
    pub burn_amount: i64,
    /// Per-lot consumption detail.
    pub consumed: Vec<TxLotUsage>,
}

/// One moderator credit inside a support.
#[derive(Debug, Clone, Serialize)]
pub struct ModPayout {
    /// Credited moderator.
    pub user_id: UserId,
    /// Credited rubis.
    pub amount: i64,
}

/// Parameters of a support operation.
#[derive(Debug, Clone)]
pub struct SupportRequest {
    /// Spending viewer.
    pub viewer: UserId,
    /// Supported streamer channel.
    pub streamer: StreamerId,
    /// User account that owns the channel and receives the streamer share.
    pub streamer_owner: UserId,
    /// Rubis to spend.
    pub amount: i64,
    /// Caller-supplied purpose tag.
    pub purpose: String,
    /// Free-form metadata recorded on the transaction.
    pub meta: serde_json::Value,
}

/// Result of a support.
#[derive(Debug, Clone, Serialize)]
pub struct SupportOutcome {
    /// Recorded transaction.
    pub tx_id: TxId,
    /// Rubis debited from the viewer.
    pub amount: i64,
    /// Real-value-backed fraction of the spent rubis.
    pub support_value: i64,
    /// Platform fee.
    pub platform_amount: i64,
    /// Streamer owner credit.
    pub streamer_amount: i64,
    /// Total moderator credit.
    pub mods_total: i64,
    /// Per-moderator credits (zero shares omitted).
    pub mod_payouts: Vec<ModPayout>,
    /// Rubis destroyed because their backing fell short of face value.
    pub burn_amount: i64,
    /// Per-lot consumption detail.
    pub consumed: Vec<TxLotUsage>,
}

/// Result of a cashout.
#[derive(Debug, Clone, Serialize)]
pub struct CashoutOutcome {
    /// Recorded transaction, left in `pending` for external settlement.
    pub tx_id: TxId,
    /// Requested payout value in cents.
    pub target_value_cents: i64,
    /// Rubis debited — the minimum needed to cover the target.
    pub rubis_debited: i64,
    /// Per-lot consumption detail.
    pub consumed: Vec<TxLotUsage>,
}

/// Orchestration layer for the four user-facing ledger mutations.
///
/// Stateless coordinator: owns the store, the economy configuration, and
/// the moderation read-interface. Every method follows the pattern:
/// begin → lock → allocate → mutate → audit → commit → return outcome.
pub struct LedgerService<S> {
    store: Arc<S>,
    economy: EconomyConfig,
    moderation: Arc<dyn ModerationDirectory>,
}

impl<S> fmt::Debug for LedgerService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerService")
            .field("economy", &self.economy)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> LedgerService<S> {
    /// Creates a new service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        economy: EconomyConfig,
        moderation: Arc<dyn ModerationDirectory>,
    ) -> Self {
        Self {
            store,
            economy,
            moderation,
        }
    }

    /// Returns the store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Credits `amount` new rubis to `user` as one lot whose weight is
    /// looked up from the origin→weight table at this moment and fixed
    /// forever after.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadAmount`], [`LedgerError::UserNotFound`], or a
    /// persistence failure.
    pub async fn mint(
        &self,
        user: UserId,
        amount: i64,
        origin: &str,
        meta: serde_json::Value,
    ) -> Result<MintOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::BadAmount(amount));
        }
        let weight_bp = self.economy.weights.weight_for(origin);

        let mut tx = self.store.begin().await?;
        tx.lock_account(user).await?;
        tx.adjust_balance(user, amount).await?;
        let lot_id = tx
            .insert_lot(NewLot {
                owner: user,
                origin: origin.to_string(),
                weight_bp,
                amount,
                meta: meta.clone(),
            })
            .await?;

        let tx_id = TxId::new();
        tx.insert_transaction(&LedgerTransaction {
            id: tx_id,
            kind: TxKind::Mint,
            purpose: origin.to_string(),
            status: TxStatus::Committed,
            from_user: None,
            to_user: Some(user),
            amount,
            support_value: 0,
            streamer_amount: 0,
            platform_amount: 0,
            burn_amount: 0,
            meta,
            created_at: Utc::now(),
        })
        .await?;
        // Mint is the sole injection point: a single +amount entry.
        tx.insert_entries(&[LedgerEntry::user(tx_id, user, amount)])
            .await?;
        tx.commit().await?;

        tracing::info!(%tx_id, %user, amount, origin, weight_bp, "minted rubis");
        Ok(MintOutcome {
            tx_id,
            lot_id,
            weight_bp,
            amount,
        })
    }

    /// Destroys `amount` rubis from `user`, consuming the lowest-weight
    /// lots first so the least real value is burned.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadAmount`], [`LedgerError::UserNotFound`],
    /// [`LedgerError::InsufficientBalance`], or
    /// [`LedgerError::InsufficientLots`] on balance/lot drift.
    pub async fn sink(
        &self,
        user: UserId,
        amount: i64,
        purpose: &str,
        meta: serde_json::Value,
    ) -> Result<SinkOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::BadAmount(amount));
        }

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_account(user).await?;
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                have: balance,
                need: amount,
            });
        }
        let lots = tx.lock_lots(user).await?;
        let draws = allocation::allocate(&lots, amount, Direction::AscendingWeight)?;

        apply_draws(&mut tx, &draws).await?;
        tx.adjust_balance(user, -amount).await?;

        let tx_id = TxId::new();
        tx.insert_transaction(&LedgerTransaction {
            id: tx_id,
            kind: TxKind::Sink,
            purpose: purpose.to_string(),
            status: TxStatus::Committed,
            from_user: Some(user),
            to_user: None,
            amount,
            support_value: 0,
            streamer_amount: 0,
            platform_amount: 0,
            burn_amount: amount,
            meta,
            created_at: Utc::now(),
        })
        .await?;
        let consumed = usage_rows(tx_id, &draws);
        tx.insert_tx_lots(&consumed).await?;
        tx.insert_entries(&[
            LedgerEntry::user(tx_id, user, -amount),
            LedgerEntry::aggregate(tx_id, EntryEntity::PlatformBurn, amount),
        ])
        .await?;
        tx.commit().await?;

        tracing::info!(%tx_id, %user, amount, purpose, "sank rubis");
        Ok(SinkOutcome {
            tx_id,
            burn_amount: amount,
            consumed,
        })
    }

    /// Converts viewer rubis into value for the streamer, their active
    /// moderators, and the platform.
    ///
    /// The viewer is debited descending-weight so the most real value is
    /// extracted per rubis. Only the backed fraction of the spent rubis
    /// (`Σ floor(used × weight / 10000)` per consumed lot) is paid out;
    /// the unbacked remainder is burned. Every credited lot inherits the
    /// weight of the lot that funded it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadAmount`], [`LedgerError::UserNotFound`],
    /// [`LedgerError::InsufficientBalance`], or
    /// [`LedgerError::InsufficientLots`].
    pub async fn support(&self, req: SupportRequest) -> Result<SupportOutcome, LedgerError> {
        if req.amount <= 0 {
            return Err(LedgerError::BadAmount(req.amount));
        }

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_account(req.viewer).await?;
        if balance < req.amount {
            return Err(LedgerError::InsufficientBalance {
                have: balance,
                need: req.amount,
            });
        }
        let lots = tx.lock_lots(req.viewer).await?;
        let draws = allocation::allocate(&lots, req.amount, Direction::DescendingWeight)?;

        // Per-lot flooring: the backed value of each draw, summed.
        let values: Vec<i64> = draws
            .iter()
            .map(|d| allocation::lot_value(d.amount_used, d.weight_bp))
            .collect();
        let support_value: i64 = values.iter().sum();

        let mods = self.moderation.active_moderators(req.streamer);
        let split = SupportSplit::compute(
            support_value,
            self.economy.platform_fee_bp,
            self.economy.mods_percent_bp,
            mods.len(),
        );
        let burn_amount = req.amount - split.paid_out();

        apply_draws(&mut tx, &draws).await?;
        tx.adjust_balance(req.viewer, -req.amount).await?;

        // Carve credited lots out of the backed-value segments, in
        // consumption order, so weights propagate from the funding lots.
        let segments: Vec<Segment> = draws
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| **v > 0)
            .map(|(d, v)| Segment {
                lot_key: d.lot_key,
                weight_bp: d.weight_bp,
                amount: *v,
            })
            .collect();
        let mut needs = Vec::with_capacity(1 + split.mod_shares.len());
        needs.push(split.streamer_amount);
        needs.extend_from_slice(&split.mod_shares);
        let carved = allocation::carve(&segments, &needs).map_err(|e| {
            LedgerError::Internal(format!("support credit exceeded backed value: {e}"))
        })?;

        let mut pieces_iter = carved.into_iter();
        let streamer_pieces = pieces_iter.next().unwrap_or_default();
        let mut credits: Vec<(UserId, i64, Vec<allocation::CarvedPiece>)> = Vec::new();
        if split.streamer_amount > 0 {
            credits.push((req.streamer_owner, split.streamer_amount, streamer_pieces));
        }
        let mut mod_payouts = Vec::new();
        for (user, (share, pieces)) in mods
            .iter()
            .zip(split.mod_shares.iter().copied().zip(pieces_iter))
        {
            if share > 0 {
                mod_payouts.push(ModPayout {
                    user_id: *user,
                    amount: share,
                });
                credits.push((*user, share, pieces));
            }
        }
        // Credited accounts are updated in ascending user-id order. The
        // viewer's row is already held, so two concurrent supports in
        // opposite directions (A→B while B→A) can still acquire account
        // rows in conflicting order; Postgres deadlock detection aborts
        // one and its whole unit rolls back for the caller to retry.
        credits.sort_by_key(|(user, _, _)| *user);

        let tx_id = TxId::new();
        let credit_meta = serde_json::json!({
            "support_tx": tx_id,
            "streamer_id": req.streamer,
        });
        for (user, _, pieces) in &credits {
            for piece in pieces {
                tx.insert_lot(NewLot {
                    owner: *user,
                    origin: "support".to_string(),
                    weight_bp: piece.weight_bp,
                    amount: piece.amount,
                    meta: credit_meta.clone(),
                })
                .await?;
            }
        }
        for (user, total, _) in &credits {
            tx.adjust_balance(*user, *total).await?;
        }

        tx.insert_transaction(&LedgerTransaction {
            id: tx_id,
            kind: TxKind::Support,
            purpose: req.purpose.clone(),
            status: TxStatus::Committed,
            from_user: Some(req.viewer),
            to_user: Some(req.streamer_owner),
            amount: req.amount,
            support_value,
            streamer_amount: split.streamer_amount,
            platform_amount: split.platform_amount,
            burn_amount,
            meta: serde_json::json!({
                "streamer_id": req.streamer,
                "caller": req.meta,
            }),
            created_at: Utc::now(),
        })
        .await?;
        let consumed = usage_rows(tx_id, &draws);
        tx.insert_tx_lots(&consumed).await?;

        let mut entries = vec![LedgerEntry::user(tx_id, req.viewer, -req.amount)];
        if split.platform_amount > 0 {
            entries.push(LedgerEntry::aggregate(
                tx_id,
                EntryEntity::PlatformFee,
                split.platform_amount,
            ));
        }
        if burn_amount > 0 {
            entries.push(LedgerEntry::aggregate(
                tx_id,
                EntryEntity::PlatformBurn,
                burn_amount,
            ));
        }
        for (user, total, _) in &credits {
            entries.push(LedgerEntry::user(tx_id, *user, *total));
        }
        tx.insert_entries(&entries).await?;
        tx.commit().await?;

        tracing::info!(
            %tx_id,
            viewer = %req.viewer,
            streamer = %req.streamer,
            amount = req.amount,
            support_value,
            burn_amount,
            "support committed"
        );
        Ok(SupportOutcome {
            tx_id,
            amount: req.amount,
            support_value,
            platform_amount: split.platform_amount,
            streamer_amount: split.streamer_amount,
            mods_total: split.mods_total,
            mod_payouts,
            burn_amount,
            consumed,
        })
    }

    /// Converts a streamer owner's rubis into a pending real-value payout
    /// request, debiting the minimum rubis needed to cover the target.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BadAmount`], [`LedgerError::UserNotFound`], or
    /// [`LedgerError::InsufficientValue`] when the owner's total weighted
    /// value cannot reach the target.
    pub async fn cashout(
        &self,
        streamer_owner: UserId,
        streamer: StreamerId,
        target_value_cents: i64,
        meta: serde_json::Value,
    ) -> Result<CashoutOutcome, LedgerError> {
        if target_value_cents <= 0 {
            return Err(LedgerError::BadAmount(target_value_cents));
        }

        let mut tx = self.store.begin().await?;
        tx.lock_account(streamer_owner).await?;
        let lots = tx.lock_lots(streamer_owner).await?;
        let draws = allocation::allocate_for_value(&lots, target_value_cents)?;
        let rubis_debited: i64 = draws.iter().map(|d| d.amount_used).sum();

        for d in &draws {
            tx.set_lot_remaining(LotId(d.lot_key), d.remaining_after)
                .await?;
        }
        tx.adjust_balance(streamer_owner, -rubis_debited).await?;

        let tx_id = TxId::new();
        tx.insert_transaction(&LedgerTransaction {
            id: tx_id,
            kind: TxKind::Cashout,
            purpose: "cashout".to_string(),
            status: TxStatus::Pending,
            from_user: Some(streamer_owner),
            to_user: None,
            amount: rubis_debited,
            support_value: target_value_cents,
            streamer_amount: 0,
            platform_amount: 0,
            burn_amount: rubis_debited,
            meta: serde_json::json!({
                "streamer_id": streamer,
                "target_value_cents": target_value_cents,
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
            LedgerEntry::user(tx_id, streamer_owner, -rubis_debited),
            LedgerEntry::aggregate(tx_id, EntryEntity::PlatformBurn, rubis_debited),
        ])
        .await?;
        tx.commit().await?;

        tracing::info!(
            %tx_id,
            owner = %streamer_owner,
            target_value_cents,
            rubis_debited,
            "cashout requested"
        );
        Ok(CashoutOutcome {
            tx_id,
            target_value_cents,
            rubis_debited,
            consumed,
        })
    }
}

/// Persists the remaining-amount updates of an allocation.
async fn apply_draws<T: LedgerTx>(tx: &mut T, draws: &[LotDraw]) -> Result<(), LedgerError> {
    for d in draws {
        tx.set_lot_remaining(LotId(d.lot_key), d.remaining_after)
            .await?;
    }
    Ok(())
}

/// Builds the per-consumed-lot audit rows for a transaction.
fn usage_rows(tx_id: TxId, draws: &[LotDraw]) -> Vec<TxLotUsage> {
    draws
        .iter()
        .map(|d| TxLotUsage {
            tx_id,
            lot_id: LotId(d.lot_key),
            origin: d.origin.clone(),
            weight_bp: d.weight_bp,
            amount_used: d.amount_used,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::WeightTable;
    use crate::persistence::memory::MemoryStore;

    #[derive(Debug, Default)]
    struct StaticMods(Vec<UserId>);

    impl ModerationDirectory for StaticMods {
        fn active_moderators(&self, _streamer: StreamerId) -> Vec<UserId> {
            self.0.clone()
        }
    }

    fn economy() -> EconomyConfig {
        EconomyConfig {
            weights: WeightTable::new(0)
                .with("purchase", 10_000)
                .with("half", 5_000)
                .with("promo", 2_000)
                .with("watch", 0),
            ..EconomyConfig::default()
        }
    }

    fn service(economy: EconomyConfig, mods: Vec<UserId>) -> LedgerService<MemoryStore> {
        LedgerService::new(
            Arc::new(MemoryStore::new()),
            economy,
            Arc::new(StaticMods(mods)),
        )
    }

    async fn user_with_account(service: &LedgerService<MemoryStore>) -> UserId {
        let user = UserId::new();
        let Ok(()) = service.store().create_account(user).await else {
            panic!("create_account failed");
        };
        user
    }

    async fn assert_conserved(store: &MemoryStore, tx_id: TxId) {
        let entries = store.entries_for(tx_id).await;
        let sum: i64 = entries.iter().map(|e| e.delta).sum();
        assert_eq!(sum, 0, "entry deltas of {tx_id} must sum to zero");
    }

    async fn assert_lot_balance_consistent(store: &MemoryStore, user: UserId) {
        let Ok(lots) = store.lots_of(user).await else {
            panic!("lots_of failed");
        };
        let lot_sum: i64 = lots.iter().map(|l| l.amount_remaining).sum();
        assert_eq!(store.balance(user).await.ok(), Some(lot_sum));
    }

    #[tokio::test]
    async fn mint_rejects_non_positive_amounts() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        assert!(matches!(
            svc.mint(user, 0, "purchase", serde_json::json!({})).await,
            Err(LedgerError::BadAmount(0))
        ));
        assert!(matches!(
            svc.mint(user, -5, "purchase", serde_json::json!({})).await,
            Err(LedgerError::BadAmount(-5))
        ));
    }

    #[tokio::test]
    async fn mint_requires_existing_account() {
        let svc = service(economy(), vec![]);
        let ghost = UserId::new();
        assert!(matches!(
            svc.mint(ghost, 10, "purchase", serde_json::json!({})).await,
            Err(LedgerError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn mint_stamps_weight_from_table() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        let Ok(outcome) = svc.mint(user, 100, "half", serde_json::json!({})).await else {
            panic!("mint failed");
        };
        assert_eq!(outcome.weight_bp, 5_000);
        let Ok(lots) = svc.store().lots_of(user).await else {
            panic!("lots_of failed");
        };
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].weight_bp, 5_000);
        assert_eq!(lots[0].amount_remaining, 100);
        assert_lot_balance_consistent(svc.store(), user).await;
    }

    #[tokio::test]
    async fn sink_consumes_lowest_weight_lot_only() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        let Ok(_) = svc.mint(user, 10, "watch", serde_json::json!({})).await else {
            panic!("mint failed");
        };
        let Ok(_) = svc.mint(user, 10, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc.sink(user, 5, "shop", serde_json::json!({})).await else {
            panic!("sink failed");
        };
        assert_eq!(outcome.consumed.len(), 1);
        assert_eq!(outcome.consumed[0].weight_bp, 0);
        assert_eq!(outcome.consumed[0].amount_used, 5);

        let Ok(lots) = svc.store().lots_of(user).await else {
            panic!("lots_of failed");
        };
        let zero_weight: Vec<_> = lots.iter().filter(|l| l.weight_bp == 0).collect();
        assert_eq!(zero_weight[0].amount_remaining, 5);
        assert_conserved(svc.store(), outcome.tx_id).await;
        assert_lot_balance_consistent(svc.store(), user).await;
    }

    #[tokio::test]
    async fn sink_rejects_insufficient_balance() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        let Ok(_) = svc.mint(user, 10, "watch", serde_json::json!({})).await else {
            panic!("mint failed");
        };
        assert!(matches!(
            svc.sink(user, 11, "shop", serde_json::json!({})).await,
            Err(LedgerError::InsufficientBalance { have: 10, need: 11 })
        ));
    }

    #[tokio::test]
    async fn sink_detects_balance_lot_drift() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        // Corrupt the cached balance without touching lots.
        {
            let Ok(mut tx) = svc.store().begin().await else {
                panic!("begin failed");
            };
            let Ok(()) = tx.adjust_balance(user, 50).await else {
                panic!("adjust failed");
            };
            let Ok(()) = tx.commit().await else {
                panic!("commit failed");
            };
        }
        let result = svc.sink(user, 50, "shop", serde_json::json!({})).await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientLots {
                covered: 0,
                requested: 50
            })
        ));
        // The failed operation must not have touched the balance.
        assert_eq!(svc.store().balance(user).await.ok(), Some(50));
    }

    #[tokio::test]
    async fn sink_end_to_end_scenario() {
        let svc = service(economy(), vec![]);
        let user = user_with_account(&svc).await;
        let Ok(_) = svc.mint(user, 300, "promo", serde_json::json!({})).await else {
            panic!("mint failed");
        };
        let Ok(_) = svc.mint(user, 200, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc.sink(user, 250, "shop", serde_json::json!({})).await else {
            panic!("sink failed");
        };

        let Ok(lots) = svc.store().lots_of(user).await else {
            panic!("lots_of failed");
        };
        let promo = lots.iter().find(|l| l.weight_bp == 2_000);
        let paid = lots.iter().find(|l| l.weight_bp == 10_000);
        assert_eq!(promo.map(|l| l.amount_remaining), Some(50));
        assert_eq!(paid.map(|l| l.amount_remaining), Some(200));
        assert_eq!(svc.store().balance(user).await.ok(), Some(250));

        let entries = svc.store().entries_for(outcome.tx_id).await;
        let burn: Vec<_> = entries
            .iter()
            .filter(|e| e.entity == EntryEntity::PlatformBurn)
            .collect();
        assert_eq!(burn.len(), 1);
        assert_eq!(burn[0].delta, 250);
    }

    #[tokio::test]
    async fn support_fully_backed_splits_ninety_ten() {
        let svc = service(economy(), vec![]);
        let viewer = user_with_account(&svc).await;
        let owner = user_with_account(&svc).await;
        let Ok(_) = svc.mint(viewer, 1_000, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc
            .support(SupportRequest {
                viewer,
                streamer: StreamerId::new(),
                streamer_owner: owner,
                amount: 1_000,
                purpose: "support".to_string(),
                meta: serde_json::json!({}),
            })
            .await
        else {
            panic!("support failed");
        };

        assert_eq!(outcome.support_value, 1_000);
        assert_eq!(outcome.platform_amount, 100);
        assert_eq!(outcome.streamer_amount, 900);
        assert_eq!(outcome.burn_amount, 0);
        assert_eq!(svc.store().balance(owner).await.ok(), Some(900));
        assert_eq!(svc.store().balance(viewer).await.ok(), Some(0));
        assert_conserved(svc.store(), outcome.tx_id).await;
        assert_lot_balance_consistent(svc.store(), viewer).await;
        assert_lot_balance_consistent(svc.store(), owner).await;
    }

    #[tokio::test]
    async fn support_partially_backed_burns_unbacked_half() {
        let svc = service(economy(), vec![]);
        let viewer = user_with_account(&svc).await;
        let owner = user_with_account(&svc).await;
        let Ok(_) = svc.mint(viewer, 1_000, "half", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc
            .support(SupportRequest {
                viewer,
                streamer: StreamerId::new(),
                streamer_owner: owner,
                amount: 1_000,
                purpose: "support".to_string(),
                meta: serde_json::json!({}),
            })
            .await
        else {
            panic!("support failed");
        };

        assert_eq!(outcome.support_value, 500);
        assert_eq!(outcome.platform_amount, 50);
        assert_eq!(outcome.streamer_amount, 450);
        assert_eq!(outcome.burn_amount, 500);
        assert_conserved(svc.store(), outcome.tx_id).await;
    }

    #[tokio::test]
    async fn support_mod_shares_remainder_to_last() {
        let mods = vec![UserId::new(), UserId::new(), UserId::new()];
        let mut eco = economy();
        eco.platform_fee_bp = 0;
        eco.mods_percent_bp = 10_000;
        let svc = service(eco, mods.clone());
        let viewer = user_with_account(&svc).await;
        let owner = user_with_account(&svc).await;
        for m in &mods {
            let Ok(()) = svc.store().create_account(*m).await else {
                panic!("create_account failed");
            };
        }
        let Ok(_) = svc.mint(viewer, 100, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc
            .support(SupportRequest {
                viewer,
                streamer: StreamerId::new(),
                streamer_owner: owner,
                amount: 100,
                purpose: "support".to_string(),
                meta: serde_json::json!({}),
            })
            .await
        else {
            panic!("support failed");
        };

        assert_eq!(outcome.mods_total, 100);
        assert_eq!(outcome.streamer_amount, 0);
        let shares: Vec<i64> = outcome.mod_payouts.iter().map(|p| p.amount).collect();
        assert_eq!(shares, vec![33, 33, 34]);
        assert_eq!(svc.store().balance(mods[2]).await.ok(), Some(34));
        assert_conserved(svc.store(), outcome.tx_id).await;
    }

    #[tokio::test]
    async fn support_credits_inherit_funding_weights() {
        let svc = service(economy(), vec![]);
        let viewer = user_with_account(&svc).await;
        let owner = user_with_account(&svc).await;
        // 100 fully-backed and 100 half-backed units; descending order
        // consumes the purchase lot first.
        let Ok(_) = svc.mint(viewer, 100, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };
        let Ok(_) = svc.mint(viewer, 100, "half", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc
            .support(SupportRequest {
                viewer,
                streamer: StreamerId::new(),
                streamer_owner: owner,
                amount: 200,
                purpose: "support".to_string(),
                meta: serde_json::json!({}),
            })
            .await
        else {
            panic!("support failed");
        };

        // support_value = 100 + 50 = 150, platform 15, streamer 135.
        assert_eq!(outcome.support_value, 150);
        assert_eq!(outcome.streamer_amount, 135);
        let Ok(owner_lots) = svc.store().lots_of(owner).await else {
            panic!("lots_of failed");
        };
        // Carved from the 100-value purchase segment then the half one.
        let weights: Vec<i32> = owner_lots.iter().map(|l| l.weight_bp).collect();
        assert_eq!(weights, vec![10_000, 5_000]);
        let amounts: Vec<i64> = owner_lots.iter().map(|l| l.amount_remaining).collect();
        assert_eq!(amounts, vec![100, 35]);
    }

    #[tokio::test]
    async fn cashout_debits_minimal_units_and_stays_pending() {
        let svc = service(economy(), vec![]);
        let owner = user_with_account(&svc).await;
        let Ok(_) = svc.mint(owner, 1_000, "purchase", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let Ok(outcome) = svc
            .cashout(owner, StreamerId::new(), 250, serde_json::json!({}))
            .await
        else {
            panic!("cashout failed");
        };

        assert_eq!(outcome.rubis_debited, 250);
        assert_eq!(svc.store().balance(owner).await.ok(), Some(750));
        let txs = svc.store().transactions().await;
        let cashout_tx = txs.iter().find(|t| t.id == outcome.tx_id);
        assert_eq!(cashout_tx.map(|t| t.status), Some(TxStatus::Pending));
        assert_conserved(svc.store(), outcome.tx_id).await;
        assert_lot_balance_consistent(svc.store(), owner).await;
    }

    #[tokio::test]
    async fn cashout_shortfall_rolls_back() {
        let svc = service(economy(), vec![]);
        let owner = user_with_account(&svc).await;
        let Ok(_) = svc.mint(owner, 100, "half", serde_json::json!({})).await else {
            panic!("mint failed");
        };

        let result = svc
            .cashout(owner, StreamerId::new(), 100, serde_json::json!({}))
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientValue {
                covered_cents: 50,
                target_cents: 100
            })
        ));
        // Nothing persisted.
        assert_eq!(svc.store().balance(owner).await.ok(), Some(100));
        assert_lot_balance_consistent(svc.store(), owner).await;
    }
}
