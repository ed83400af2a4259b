//! PostgreSQL implementation of the persistence layer.
//!
//! Atomicity comes from `sqlx::Transaction`; exclusivity comes from
//! `SELECT ... FOR UPDATE`. Locks are always taken account-row first,
//! then lot rows in ascending id order, so concurrent operations on the
//! same owner serialize without lock-order inversion.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::models::{ChestLotRow, LotRow, OpeningRow, ParticipantRow, PayoutRow};
use super::{LedgerStore, LedgerTx};
use crate::config::LedgerConfig;
use crate::domain::{
    ChestLot, ChestLotId, ChestOpening, ChestParticipant, ChestPayout, LedgerEntry,
    LedgerTransaction, Lot, LotId, NewChestLot, NewLot, OpeningId, OpeningStatus, StreamerId,
    TxLotUsage, UserId,
};
use crate::error::LedgerError;

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool from the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::Persistence`] when the pool cannot be
    /// established.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::Persistence`] when a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }

    async fn create_account(&self, user: UserId) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO accounts (user_id, rubis) VALUES ($1, 0) ON CONFLICT DO NOTHING")
            .bind(user.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<i64, LedgerError> {
        sqlx::query_scalar::<_, i64>("SELECT rubis FROM accounts WHERE user_id = $1")
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::UserNotFound(user.as_uuid()))
    }

    async fn lots_of(&self, user: UserId) -> Result<Vec<Lot>, LedgerError> {
        let rows = sqlx::query_as::<_, LotRow>(
            "SELECT id, owner, origin, weight_bp, amount_total, amount_remaining, created_at, meta \
             FROM lots WHERE owner = $1 ORDER BY id",
        )
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Lot::from).collect())
    }
}

/// One atomic unit over a PostgreSQL transaction. Dropping without
/// committing rolls back.
#[derive(Debug)]
pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, user: UserId) -> Result<i64, LedgerError> {
        sqlx::query_scalar::<_, i64>("SELECT rubis FROM accounts WHERE user_id = $1 FOR UPDATE")
            .bind(user.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(LedgerError::UserNotFound(user.as_uuid()))
    }

    async fn adjust_balance(&mut self, user: UserId, delta: i64) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE accounts SET rubis = rubis + $2 WHERE user_id = $1")
            .bind(user.as_uuid())
            .bind(delta)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound(user.as_uuid()));
        }
        Ok(())
    }

    async fn lock_lots(&mut self, owner: UserId) -> Result<Vec<Lot>, LedgerError> {
        let rows = sqlx::query_as::<_, LotRow>(
            "SELECT id, owner, origin, weight_bp, amount_total, amount_remaining, created_at, meta \
             FROM lots WHERE owner = $1 AND amount_remaining > 0 ORDER BY id FOR UPDATE",
        )
        .bind(owner.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Lot::from).collect())
    }

    async fn insert_lot(&mut self, lot: NewLot) -> Result<LotId, LedgerError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO lots (owner, origin, weight_bp, amount_total, amount_remaining, meta) \
             VALUES ($1, $2, $3, $4, $4, $5) RETURNING id",
        )
        .bind(lot.owner.as_uuid())
        .bind(&lot.origin)
        .bind(lot.weight_bp)
        .bind(lot.amount)
        .bind(&lot.meta)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(LotId(id))
    }

    async fn set_lot_remaining(&mut self, lot: LotId, remaining: i64) -> Result<(), LedgerError> {
        sqlx::query("UPDATE lots SET amount_remaining = $2 WHERE id = $1")
            .bind(lot.0)
            .bind(remaining)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO transactions \
             (id, kind, purpose, status, from_user, to_user, amount, support_value, \
              streamer_amount, platform_amount, burn_amount, meta, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(tx.id.as_uuid())
        .bind(tx.kind.as_str())
        .bind(&tx.purpose)
        .bind(tx.status.as_str())
        .bind(tx.from_user.map(UserId::as_uuid))
        .bind(tx.to_user.map(UserId::as_uuid))
        .bind(tx.amount)
        .bind(tx.support_value)
        .bind(tx.streamer_amount)
        .bind(tx.platform_amount)
        .bind(tx.burn_amount)
        .bind(&tx.meta)
        .bind(tx.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_tx_lots(&mut self, rows: &[TxLotUsage]) -> Result<(), LedgerError> {
        for row in rows {
            sqlx::query(
                "INSERT INTO transaction_lots (tx_id, lot_id, origin, weight_bp, amount_used) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.tx_id.as_uuid())
            .bind(row.lot_id.0)
            .bind(&row.origin)
            .bind(row.weight_bp)
            .bind(row.amount_used)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_entries(&mut self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        for row in rows {
            sqlx::query(
                "INSERT INTO ledger_entries (tx_id, entity, user_id, delta) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.tx_id.as_uuid())
            .bind(row.entity.as_str())
            .bind(row.user_id.map(UserId::as_uuid))
            .bind(row.delta)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn lock_chest_lots(
        &mut self,
        streamer: StreamerId,
    ) -> Result<Vec<ChestLot>, LedgerError> {
        let rows = sqlx::query_as::<_, ChestLotRow>(
            "SELECT id, streamer_id, origin, weight_bp, amount_total, amount_remaining, \
             created_at, meta \
             FROM chest_lots WHERE streamer_id = $1 AND amount_remaining > 0 \
             ORDER BY id FOR UPDATE",
        )
        .bind(streamer.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ChestLot::from).collect())
    }

    async fn insert_chest_lot(&mut self, lot: NewChestLot) -> Result<ChestLotId, LedgerError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO chest_lots (streamer_id, origin, weight_bp, amount_total, \
             amount_remaining, meta) \
             VALUES ($1, $2, $3, $4, $4, $5) RETURNING id",
        )
        .bind(lot.streamer_id.as_uuid())
        .bind(&lot.origin)
        .bind(lot.weight_bp)
        .bind(lot.amount)
        .bind(&lot.meta)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(ChestLotId(id))
    }

    async fn consume_chest_lot(
        &mut self,
        lot: ChestLotId,
        remaining: i64,
    ) -> Result<(), LedgerError> {
        if remaining == 0 {
            sqlx::query("DELETE FROM chest_lots WHERE id = $1")
                .bind(lot.0)
                .execute(&mut *self.tx)
                .await?;
        } else {
            sqlx::query("UPDATE chest_lots SET amount_remaining = $2 WHERE id = $1")
                .bind(lot.0)
                .bind(remaining)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn lock_open_opening(
        &mut self,
        streamer: StreamerId,
    ) -> Result<Option<ChestOpening>, LedgerError> {
        let row = sqlx::query_as::<_, OpeningRow>(
            "SELECT id, streamer_id, created_by, status, opens_at, closes_at, \
             min_watch_minutes, meta \
             FROM chest_openings WHERE streamer_id = $1 AND status = 'open' FOR UPDATE",
        )
        .bind(streamer.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(ChestOpening::from))
    }

    async fn lock_opening(
        &mut self,
        opening: OpeningId,
    ) -> Result<Option<ChestOpening>, LedgerError> {
        let row = sqlx::query_as::<_, OpeningRow>(
            "SELECT id, streamer_id, created_by, status, opens_at, closes_at, \
             min_watch_minutes, meta \
             FROM chest_openings WHERE id = $1 FOR UPDATE",
        )
        .bind(opening.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(ChestOpening::from))
    }

    async fn insert_opening(&mut self, opening: &ChestOpening) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO chest_openings \
             (id, streamer_id, created_by, status, opens_at, closes_at, min_watch_minutes, meta) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(opening.id.as_uuid())
        .bind(opening.streamer_id.as_uuid())
        .bind(opening.created_by.as_uuid())
        .bind(opening.status.as_str())
        .bind(opening.opens_at)
        .bind(opening.closes_at)
        .bind(i32::try_from(opening.min_watch_minutes).unwrap_or(i32::MAX))
        .bind(&opening.meta)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn close_opening(&mut self, opening: OpeningId) -> Result<(), LedgerError> {
        sqlx::query("UPDATE chest_openings SET status = $2 WHERE id = $1")
            .bind(opening.as_uuid())
            .bind(OpeningStatus::Closed.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_participant(&mut self, row: &ChestParticipant) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT INTO chest_participants (opening_id, user_id, joined_at) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(row.opening_id.as_uuid())
        .bind(row.user_id.as_uuid())
        .bind(row.joined_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn participants(
        &mut self,
        opening: OpeningId,
    ) -> Result<Vec<ChestParticipant>, LedgerError> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT opening_id, user_id, joined_at FROM chest_participants \
             WHERE opening_id = $1 ORDER BY joined_at, user_id",
        )
        .bind(opening.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ChestParticipant::from).collect())
    }

    async fn insert_payout(&mut self, payout: &ChestPayout) -> Result<(), LedgerError> {
        let breakdown = serde_json::to_value(&payout.breakdown)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        sqlx::query(
            "INSERT INTO chest_payouts (opening_id, user_id, amount, breakdown, tx_id) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(payout.opening_id.as_uuid())
        .bind(payout.user_id.as_uuid())
        .bind(payout.amount)
        .bind(breakdown)
        .bind(payout.tx_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn payouts(&mut self, opening: OpeningId) -> Result<Vec<ChestPayout>, LedgerError> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            "SELECT opening_id, user_id, amount, breakdown, tx_id FROM chest_payouts \
             WHERE opening_id = $1 ORDER BY user_id",
        )
        .bind(opening.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|row| {
                let breakdown = serde_json::from_value(row.breakdown)
                    .map_err(|e| LedgerError::Persistence(e.to_string()))?;
                Ok(ChestPayout {
                    opening_id: OpeningId::from_uuid(row.opening_id),
                    user_id: UserId::from_uuid(row.user_id),
                    amount: row.amount,
                    breakdown,
                    tx_id: crate::domain::TxId::from_uuid(row.tx_id),
                })
            })
            .collect()
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }
}
