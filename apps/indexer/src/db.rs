//! Database (§6 consumed interface) and Checkpoint Store (§4.1) backing.
//!
//! `Database` is the black-box contract the core depends on; `PgDatabase`
//! is its one concrete implementation, following the teacher's sqlx idiom
//! (parameterized queries, `on conflict` upserts, `anyhow::Context` on every
//! call).

use crate::chain::EventFamily;
use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{ConnectOptions, PgPool, Postgres, postgres::PgConnectOptions, postgres::PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Created,
    Fulfilled,
    Settled,
    Failed,
}

impl IntentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Fulfilled => "fulfilled",
            IntentStatus::Settled => "settled",
            IntentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentRecord {
    pub id: B256,
    pub chain_id: u64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct IntentRow {
    pub id: B256,
    pub chain_id: u64,
    pub creator: Address,
    pub token: Address,
    pub amount: U256,
    pub destination_token: Address,
    pub min_amount_out: U256,
    pub receiver: Address,
    pub deadline: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u32,
}

#[derive(Debug, Clone)]
pub struct FulfillmentRow {
    pub intent_id: B256,
    pub chain_id: u64,
    pub solver: Address,
    pub destination_token: Address,
    pub amount_out: U256,
    pub receiver: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u32,
}

#[derive(Debug, Clone)]
pub struct SettlementRow {
    pub intent_id: B256,
    pub chain_id: u64,
    pub solver: Address,
    pub settled_amount: U256,
    pub failed: bool,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u32,
}

/// §7: a uniqueness violation is translated into `Duplicate`, never an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn get_checkpoint(&self, chain_id: u64, family: EventFamily) -> Result<u64>;
    async fn set_checkpoint(&self, chain_id: u64, family: EventFamily, block: u64) -> Result<()>;

    async fn get_intent(&self, id: B256) -> Result<Option<IntentRecord>>;
    async fn create_intent(&self, row: IntentRow) -> Result<WriteOutcome>;
    async fn create_fulfillment(&self, row: FulfillmentRow) -> Result<WriteOutcome>;
    async fn create_settlement(&self, row: SettlementRow) -> Result<WriteOutcome>;
    async fn update_intent_status(&self, id: B256, status: IntentStatus) -> Result<()>;
}

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let opts = PgConnectOptions::from_str(database_url)
            .context("parse DATABASE_URL")?
            .log_statements(tracing::log::LevelFilter::Trace)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_millis(200));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .context("connect to database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

#[async_trait]
impl Database for PgDatabase {
    async fn get_checkpoint(&self, chain_id: u64, family: EventFamily) -> Result<u64> {
        let chain_id_db = i64::try_from(chain_id).context("chain_id out of range")?;
        let row: Option<i64> = sqlx::query_scalar::<Postgres, i64>(
            "select block_number from indexer.checkpoint where chain_id = $1 and family = $2",
        )
        .bind(chain_id_db)
        .bind(family.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("read indexer.checkpoint")?;

        Ok(row.map(|b| u64::try_from(b).unwrap_or(0)).unwrap_or(0))
    }

    async fn set_checkpoint(&self, chain_id: u64, family: EventFamily, block: u64) -> Result<()> {
        let chain_id_db = i64::try_from(chain_id).context("chain_id out of range")?;
        let block_db = i64::try_from(block).context("block out of range")?;
        sqlx::query(
            "insert into indexer.checkpoint (chain_id, family, block_number, updated_at) \
             values ($1, $2, $3, now()) \
             on conflict (chain_id, family) do update set \
               block_number = greatest(indexer.checkpoint.block_number, excluded.block_number), \
               updated_at = now()",
        )
        .bind(chain_id_db)
        .bind(family.as_str())
        .bind(block_db)
        .execute(&self.pool)
        .await
        .context("upsert indexer.checkpoint")?;
        Ok(())
    }

    async fn get_intent(&self, id: B256) -> Result<Option<IntentRecord>> {
        let row = sqlx::query_as::<Postgres, (Vec<u8>, i64, String)>(
            "select id, chain_id, status from indexer.intent where id = $1",
        )
        .bind(id.as_slice())
        .fetch_optional(&self.pool)
        .await
        .context("select indexer.intent")?;

        row.map(|(id_bytes, chain_id, status)| {
            Ok(IntentRecord {
                id: B256::from_slice(&id_bytes),
                chain_id: u64::try_from(chain_id).context("db chain_id out of range")?,
                status,
            })
        })
        .transpose()
    }

    async fn create_intent(&self, row: IntentRow) -> Result<WriteOutcome> {
        let chain_id_db = i64::try_from(row.chain_id).context("chain_id out of range")?;
        let block_number_db = i64::try_from(row.block_number).context("block_number out of range")?;
        let deadline_db = i64::try_from(row.deadline).context("deadline out of range")?;
        let log_index_db = i32::try_from(row.log_index).context("log_index out of range")?;

        let res = sqlx::query(
            "insert into indexer.intent \
             (id, chain_id, creator, token, amount, destination_token, min_amount_out, receiver, \
              deadline, status, block_number, tx_hash, log_index) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'created', $10, $11, $12)",
        )
        .bind(row.id.as_slice())
        .bind(chain_id_db)
        .bind(row.creator.as_slice())
        .bind(row.token.as_slice())
        .bind(row.amount.to_string())
        .bind(row.destination_token.as_slice())
        .bind(row.min_amount_out.to_string())
        .bind(row.receiver.as_slice())
        .bind(deadline_db)
        .bind(block_number_db)
        .bind(row.tx_hash.as_slice())
        .bind(log_index_db)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(anyhow::Error::new(e).context("insert indexer.intent")),
        }
    }

    async fn create_fulfillment(&self, row: FulfillmentRow) -> Result<WriteOutcome> {
        let chain_id_db = i64::try_from(row.chain_id).context("chain_id out of range")?;
        let block_number_db = i64::try_from(row.block_number).context("block_number out of range")?;
        let log_index_db = i32::try_from(row.log_index).context("log_index out of range")?;

        let res = sqlx::query(
            "insert into indexer.fulfillment \
             (intent_id, chain_id, solver, destination_token, amount_out, receiver, \
              block_number, tx_hash, log_index) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(row.intent_id.as_slice())
        .bind(chain_id_db)
        .bind(row.solver.as_slice())
        .bind(row.destination_token.as_slice())
        .bind(row.amount_out.to_string())
        .bind(row.receiver.as_slice())
        .bind(block_number_db)
        .bind(row.tx_hash.as_slice())
        .bind(log_index_db)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(anyhow::Error::new(e).context("insert indexer.fulfillment")),
        }
    }

    async fn create_settlement(&self, row: SettlementRow) -> Result<WriteOutcome> {
        let chain_id_db = i64::try_from(row.chain_id).context("chain_id out of range")?;
        let block_number_db = i64::try_from(row.block_number).context("block_number out of range")?;
        let log_index_db = i32::try_from(row.log_index).context("log_index out of range")?;

        let res = sqlx::query(
            "insert into indexer.settlement \
             (intent_id, chain_id, solver, settled_amount, failed, block_number, tx_hash, log_index) \
             values ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.intent_id.as_slice())
        .bind(chain_id_db)
        .bind(row.solver.as_slice())
        .bind(row.settled_amount.to_string())
        .bind(row.failed)
        .bind(block_number_db)
        .bind(row.tx_hash.as_slice())
        .bind(log_index_db)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(anyhow::Error::new(e).context("insert indexer.settlement")),
        }
    }

    async fn update_intent_status(&self, id: B256, status: IntentStatus) -> Result<()> {
        sqlx::query("update indexer.intent set status = $1 where id = $2")
            .bind(status.as_str())
            .bind(id.as_slice())
            .execute(&self.pool)
            .await
            .context("update indexer.intent status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_status_strings_are_stable() {
        assert_eq!(IntentStatus::Created.as_str(), "created");
        assert_eq!(IntentStatus::Fulfilled.as_str(), "fulfilled");
        assert_eq!(IntentStatus::Settled.as_str(), "settled");
        assert_eq!(IntentStatus::Failed.as_str(), "failed");
    }
}
