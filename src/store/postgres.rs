//! PostgreSQL transfer store

use super::{TransferFilter, TransferStore};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::transfer::{MessageId, Transfer, TransferStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const TRANSFER_COLUMNS: &str = "message_id, sender, recipient, amount, source_chain_id, \
     destination_chain_id, origin_block, status, relay_tx_hash, last_error, detected_at, updated_at";

/// Durable store for PostgreSQL persistence
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the configured database
    pub async fn connect(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_checkpoints (
                chain_id BIGINT PRIMARY KEY,
                block_number BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_transfers (
                message_id BYTEA PRIMARY KEY,
                sender BYTEA NOT NULL,
                recipient BYTEA NOT NULL,
                amount TEXT NOT NULL,
                source_chain_id BIGINT NOT NULL,
                destination_chain_id BIGINT NOT NULL,
                origin_block BIGINT NOT NULL,
                status VARCHAR(32) NOT NULL,
                relay_tx_hash BYTEA,
                last_error TEXT,
                detected_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfers_status_source
            ON bridge_transfers (status, source_chain_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

fn to_i64(value: u64, field: &str) -> RelayerResult<i64> {
    i64::try_from(value)
        .map_err(|_| RelayerError::Internal(format!("{} {} exceeds BIGINT range", field, value)))
}

fn to_u64(value: i64, field: &str) -> RelayerResult<u64> {
    u64::try_from(value)
        .map_err(|_| RelayerError::Internal(format!("{} {} is negative", field, value)))
}

fn h256_from_bytes(bytes: &[u8], field: &str) -> RelayerResult<H256> {
    if bytes.len() != 32 {
        return Err(RelayerError::Internal(format!(
            "{} has {} bytes, expected 32",
            field,
            bytes.len()
        )));
    }
    Ok(H256::from_slice(bytes))
}

fn address_from_bytes(bytes: &[u8], field: &str) -> RelayerResult<Address> {
    if bytes.len() != 20 {
        return Err(RelayerError::Internal(format!(
            "{} has {} bytes, expected 20",
            field,
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

fn transfer_from_row(row: &PgRow) -> RelayerResult<Transfer> {
    let message_id: Vec<u8> = row.try_get("message_id")?;
    let sender: Vec<u8> = row.try_get("sender")?;
    let recipient: Vec<u8> = row.try_get("recipient")?;
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let relay_tx_hash: Option<Vec<u8>> = row.try_get("relay_tx_hash")?;

    Ok(Transfer {
        message_id: h256_from_bytes(&message_id, "message_id")?,
        sender: address_from_bytes(&sender, "sender")?,
        recipient: address_from_bytes(&recipient, "recipient")?,
        amount: U256::from_dec_str(&amount)
            .map_err(|e| RelayerError::Internal(format!("Invalid stored amount {}: {}", amount, e)))?,
        source_chain_id: to_u64(row.try_get("source_chain_id")?, "source_chain_id")?,
        destination_chain_id: to_u64(row.try_get("destination_chain_id")?, "destination_chain_id")?,
        origin_block: to_u64(row.try_get("origin_block")?, "origin_block")?,
        status: status.parse()?,
        relay_tx_hash: relay_tx_hash
            .map(|h| h256_from_bytes(&h, "relay_tx_hash"))
            .transpose()?,
        last_error: row.try_get("last_error")?,
        detected_at: row.try_get::<DateTime<Utc>, _>("detected_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl TransferStore for PostgresStore {
    async fn insert_if_absent(&self, transfer: &Transfer) -> RelayerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bridge_transfers
                (message_id, sender, recipient, amount, source_chain_id, destination_chain_id,
                 origin_block, status, relay_tx_hash, last_error, detected_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(transfer.message_id.as_bytes())
        .bind(transfer.sender.as_bytes())
        .bind(transfer.recipient.as_bytes())
        .bind(transfer.amount.to_string())
        .bind(to_i64(transfer.source_chain_id, "source_chain_id")?)
        .bind(to_i64(transfer.destination_chain_id, "destination_chain_id")?)
        .bind(to_i64(transfer.origin_block, "origin_block")?)
        .bind(transfer.status.as_str())
        .bind(transfer.relay_tx_hash.map(|h| h.as_bytes().to_vec()))
        .bind(&transfer.last_error)
        .bind(transfer.detected_at)
        .bind(transfer.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, message_id: &MessageId) -> RelayerResult<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bridge_transfers WHERE message_id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(message_id.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn compare_and_set(
        &self,
        next: &Transfer,
        expected: TransferStatus,
    ) -> RelayerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bridge_transfers
            SET status = $2, relay_tx_hash = $3, last_error = $4, updated_at = $5
            WHERE message_id = $1 AND status = $6
            "#,
        )
        .bind(next.message_id.as_bytes())
        .bind(next.status.as_str())
        .bind(next.relay_tx_hash.map(|h| h.as_bytes().to_vec()))
        .bind(&next.last_error)
        .bind(next.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: TransferFilter) -> RelayerResult<Vec<Transfer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM bridge_transfers
            WHERE ($1::VARCHAR IS NULL OR status = $1)
              AND ($2::BIGINT IS NULL OR source_chain_id = $2)
            ORDER BY detected_at
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(
            filter
                .source_chain_id
                .map(|c| to_i64(c, "source_chain_id"))
                .transpose()?,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn get_checkpoint(&self, chain_id: u64) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT block_number FROM chain_checkpoints WHERE chain_id = $1")
            .bind(to_i64(chain_id, "chain_id")?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| to_u64(r.try_get("block_number")?, "block_number"))
            .transpose()
    }

    async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_checkpoints (chain_id, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET block_number = $2, updated_at = NOW()
            "#,
        )
        .bind(to_i64(chain_id, "chain_id")?)
        .bind(to_i64(block_number, "block_number")?)
        .execute(&self.pool)
        .await?;

        debug!("Saved checkpoint for chain {}: block {}", chain_id, block_number);
        Ok(())
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
