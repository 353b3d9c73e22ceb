use alloy_primitives::{Address, B256};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::db::{
    DbError, DbResult, LogFilter, NeonBlockRecord, NeonDb, NeonLogRecord, NeonTxRecord,
};
use crate::types::StuckSnapshot;

/// Postgres-backed [`NeonDb`].
///
/// Rows are keyed by slot; the tx and log payloads ride along as JSON so the
/// schema stays at three tables plus the stuck snapshot and reindex ledger.
/// Read paths that JSON cannot index (sig, sender+nonce) get their own
/// columns.
pub struct PgNeonDb {
    pool: PgPool,
}

impl PgNeonDb {
    pub async fn connect(dsn: &str) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(dsn)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        let ddl = [
            "CREATE TABLE IF NOT EXISTS neon_blocks (
                block_slot BIGINT PRIMARY KEY,
                block_hash TEXT NOT NULL,
                parent_block_hash TEXT NOT NULL,
                parent_block_slot BIGINT NOT NULL,
                block_time BIGINT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_finalized BOOLEAN NOT NULL,
                payload JSONB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS neon_txs (
                neon_tx_sig TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                nonce BIGINT NOT NULL,
                block_slot BIGINT NOT NULL,
                tx_idx INT NOT NULL,
                payload JSONB NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS neon_txs_sender_nonce
                ON neon_txs (sender, nonce)",
            "CREATE INDEX IF NOT EXISTS neon_txs_slot_idx
                ON neon_txs (block_slot, tx_idx)",
            "CREATE TABLE IF NOT EXISTS neon_logs (
                block_slot BIGINT NOT NULL,
                tx_idx INT NOT NULL,
                log_idx INT NOT NULL,
                address TEXT NOT NULL,
                payload JSONB NOT NULL,
                PRIMARY KEY (block_slot, tx_idx, log_idx)
            )",
            "CREATE TABLE IF NOT EXISTS stuck_snapshots (
                block_slot BIGINT PRIMARY KEY,
                payload JSONB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS reindex_ranges (
                reindex_ident TEXT PRIMARY KEY,
                start_slot BIGINT NOT NULL,
                stop_slot BIGINT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS gateway_cursor (
                id INT PRIMARY KEY,
                finalized_cursor BIGINT NOT NULL
            )",
        ];
        for statement in ddl {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn tx_from_row(row: &sqlx::postgres::PgRow) -> DbResult<NeonTxRecord> {
        let payload: serde_json::Value = row.try_get("payload")?;
        serde_json::from_value(payload).map_err(|e| DbError::Query(e.to_string()))
    }
}

#[async_trait::async_trait]
impl NeonDb for PgNeonDb {
    async fn append_block_batch(
        &self,
        block_list: &[NeonBlockRecord],
        finalized_cursor: u64,
    ) -> DbResult<()> {
        let mut db_tx = self.pool.begin().await?;
        for block in block_list {
            let payload =
                serde_json::to_value(block).map_err(|e| DbError::Query(e.to_string()))?;
            sqlx::query(
                "INSERT INTO neon_blocks
                    (block_slot, block_hash, parent_block_hash, parent_block_slot,
                     block_time, is_active, is_finalized, payload)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (block_slot) DO UPDATE
                    SET is_finalized = EXCLUDED.is_finalized,
                        payload = EXCLUDED.payload",
            )
            .bind(block.block_slot as i64)
            .bind(&block.block_hash)
            .bind(&block.parent_block_hash)
            .bind(block.parent_block_slot as i64)
            .bind(block.block_time)
            .bind(block.is_finalized)
            .bind(block.is_finalized)
            .bind(payload)
            .execute(&mut *db_tx)
            .await?;

            for tx in &block.tx_list {
                let payload =
                    serde_json::to_value(tx).map_err(|e| DbError::Query(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO neon_txs
                        (neon_tx_sig, sender, nonce, block_slot, tx_idx, payload)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (neon_tx_sig) DO UPDATE SET payload = EXCLUDED.payload",
                )
                .bind(format!("{:#x}", tx.neon_tx_sig))
                .bind(format!("{:#x}", tx.sender))
                .bind(tx.nonce as i64)
                .bind(tx.block_slot as i64)
                .bind(tx.tx_idx as i32)
                .bind(payload)
                .execute(&mut *db_tx)
                .await?;

                for log in &tx.log_list {
                    let payload =
                        serde_json::to_value(log).map_err(|e| DbError::Query(e.to_string()))?;
                    sqlx::query(
                        "INSERT INTO neon_logs
                            (block_slot, tx_idx, log_idx, address, payload)
                         VALUES ($1, $2, $3, $4, $5)
                         ON CONFLICT (block_slot, tx_idx, log_idx) DO NOTHING",
                    )
                    .bind(log.block_slot as i64)
                    .bind(log.tx_idx as i32)
                    .bind(log.log_idx as i32)
                    .bind(format!("{:#x}", log.address))
                    .bind(payload)
                    .execute(&mut *db_tx)
                    .await?;
                }
            }
        }
        sqlx::query(
            "INSERT INTO gateway_cursor (id, finalized_cursor) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE
                SET finalized_cursor = GREATEST(gateway_cursor.finalized_cursor, $1)",
        )
        .bind(finalized_cursor as i64)
        .execute(&mut *db_tx)
        .await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn activate_block_list(&self, _finalized_cursor: u64, slot_list: &[u64]) -> DbResult<()> {
        let slot_list: Vec<i64> = slot_list.iter().map(|slot| *slot as i64).collect();
        sqlx::query("UPDATE neon_blocks SET is_active = TRUE WHERE block_slot = ANY($1)")
            .bind(&slot_list)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize_block_list(
        &self,
        from_slot: u64,
        to_slot: u64,
        slot_list: &[u64],
    ) -> DbResult<()> {
        let mut db_tx = self.pool.begin().await?;
        let slot_list: Vec<i64> = slot_list.iter().map(|slot| *slot as i64).collect();
        // confirmed-only blocks inside the finalized range lost the race
        sqlx::query(
            "DELETE FROM neon_blocks
             WHERE block_slot BETWEEN $1 AND $2
               AND NOT (block_slot = ANY($3))
               AND NOT is_finalized",
        )
        .bind(from_slot as i64)
        .bind(to_slot as i64)
        .bind(&slot_list)
        .execute(&mut *db_tx)
        .await?;
        sqlx::query(
            "UPDATE neon_blocks SET is_finalized = TRUE, is_active = TRUE
             WHERE block_slot = ANY($1)",
        )
        .bind(&slot_list)
        .execute(&mut *db_tx)
        .await?;
        sqlx::query(
            "INSERT INTO gateway_cursor (id, finalized_cursor) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE
                SET finalized_cursor = GREATEST(gateway_cursor.finalized_cursor, $1)",
        )
        .bind(to_slot as i64)
        .execute(&mut *db_tx)
        .await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn drop_not_finalized_history(&self) -> DbResult<()> {
        sqlx::query("DELETE FROM neon_blocks WHERE NOT is_finalized")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_finalized_cursor(&self) -> DbResult<Option<u64>> {
        let row = sqlx::query("SELECT finalized_cursor FROM gateway_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("finalized_cursor") as u64))
    }

    async fn get_tx_by_sig(&self, neon_tx_sig: &B256) -> DbResult<Option<NeonTxRecord>> {
        let row = sqlx::query("SELECT payload FROM neon_txs WHERE neon_tx_sig = $1")
            .bind(format!("{neon_tx_sig:#x}"))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::tx_from_row(&row)).transpose()
    }

    async fn get_tx_by_sender_nonce(
        &self,
        sender: &Address,
        nonce: u64,
    ) -> DbResult<Option<NeonTxRecord>> {
        let row = sqlx::query("SELECT payload FROM neon_txs WHERE sender = $1 AND nonce = $2")
            .bind(format!("{sender:#x}"))
            .bind(nonce as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::tx_from_row(&row)).transpose()
    }

    async fn get_tx_by_slot_idx(
        &self,
        block_slot: u64,
        tx_idx: u32,
    ) -> DbResult<Option<NeonTxRecord>> {
        let row = sqlx::query("SELECT payload FROM neon_txs WHERE block_slot = $1 AND tx_idx = $2")
            .bind(block_slot as i64)
            .bind(tx_idx as i32)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::tx_from_row(&row)).transpose()
    }

    async fn get_block_by_slot(&self, block_slot: u64) -> DbResult<Option<NeonBlockRecord>> {
        let row = sqlx::query("SELECT payload FROM neon_blocks WHERE block_slot = $1")
            .bind(block_slot as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let payload: serde_json::Value = row.try_get("payload")?;
            serde_json::from_value(payload).map_err(|e| DbError::Query(e.to_string()))
        })
        .transpose()
    }

    async fn get_log_list(&self, filter: &LogFilter) -> DbResult<Vec<NeonLogRecord>> {
        let row_list = sqlx::query(
            "SELECT payload FROM neon_logs
             WHERE block_slot BETWEEN $1 AND $2
             ORDER BY block_slot, tx_idx, log_idx",
        )
        .bind(filter.from_slot as i64)
        .bind(filter.to_slot as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut log_list = Vec::new();
        for row in row_list {
            let payload: serde_json::Value = row.try_get("payload")?;
            let log: NeonLogRecord =
                serde_json::from_value(payload).map_err(|e| DbError::Query(e.to_string()))?;
            // address and topic narrowing happens here; slot narrowing in SQL
            if filter.matches(&log) {
                log_list.push(log);
            }
        }
        Ok(log_list)
    }

    async fn put_stuck(&self, snapshot: &StuckSnapshot) -> DbResult<()> {
        let payload = serde_json::to_value(snapshot).map_err(|e| DbError::Query(e.to_string()))?;
        sqlx::query(
            "INSERT INTO stuck_snapshots (block_slot, payload) VALUES ($1, $2)
             ON CONFLICT (block_slot) DO UPDATE SET payload = EXCLUDED.payload",
        )
        .bind(snapshot.block_slot as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stuck_at(&self, block_slot: u64) -> DbResult<Option<StuckSnapshot>> {
        let row = sqlx::query("SELECT payload FROM stuck_snapshots WHERE block_slot = $1")
            .bind(block_slot as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let payload: serde_json::Value = row.try_get("payload")?;
            serde_json::from_value(payload).map_err(|e| DbError::Query(e.to_string()))
        })
        .transpose()
    }

    async fn get_latest_stuck(&self) -> DbResult<Option<StuckSnapshot>> {
        let row = sqlx::query(
            "SELECT payload FROM stuck_snapshots ORDER BY block_slot DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let payload: serde_json::Value = row.try_get("payload")?;
            serde_json::from_value(payload).map_err(|e| DbError::Query(e.to_string()))
        })
        .transpose()
    }

    async fn get_reindex_range_list(&self) -> DbResult<Vec<(u64, u64, String)>> {
        let row_list = sqlx::query(
            "SELECT start_slot, stop_slot, reindex_ident FROM reindex_ranges
             ORDER BY start_slot",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(row_list
            .into_iter()
            .map(|row| {
                (
                    row.get::<i64, _>("start_slot") as u64,
                    row.get::<i64, _>("stop_slot") as u64,
                    row.get::<String, _>("reindex_ident"),
                )
            })
            .collect())
    }

    async fn put_reindex_range(
        &self,
        start_slot: u64,
        stop_slot: u64,
        reindex_ident: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO reindex_ranges (reindex_ident, start_slot, stop_slot)
             VALUES ($1, $2, $3)
             ON CONFLICT (reindex_ident) DO UPDATE
                SET start_slot = EXCLUDED.start_slot, stop_slot = EXCLUDED.stop_slot",
        )
        .bind(reindex_ident)
        .bind(start_slot as i64)
        .bind(stop_slot as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drop_reindex_range(&self, reindex_ident: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM reindex_ranges WHERE reindex_ident = $1")
            .bind(reindex_ident)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
