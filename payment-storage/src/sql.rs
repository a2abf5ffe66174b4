// payment-storage: repository traits and storage backends for payment-kit.

//! Postgres backend via `sqlx`. `Amount` is stored as `NUMERIC(78,0)` through
//! `bigdecimal::BigDecimal` (wide enough for a 256-bit unsigned integer),
//! grounded on the retrieval pack's TAP receipt-aggregate storage code,
//! which stores RAV amounts the same way.

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use subrav_codec::{Amount, ChannelId, SignedSubRav, SubRav, CURRENT_VERSION};

use crate::error::Error;
use crate::models::*;
use crate::traits::{ChannelRepository, PendingSubRavRepository, RavRepository};

fn amount_to_decimal(amount: &Amount) -> BigDecimal {
    BigDecimal::from_str(&amount.to_string()).expect("Amount::to_string is always a valid decimal integer")
}

fn decimal_to_amount(decimal: &BigDecimal) -> Result<Amount, Error> {
    decimal
        .to_string()
        .parse()
        .map_err(|e: String| Error::backend(format!("corrupt amount column: {e}")))
}

fn channel_id_to_bytes(id: &ChannelId) -> &[u8] {
    id.as_bytes()
}

fn bytes_to_channel_id(bytes: &[u8]) -> Result<ChannelId, Error> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::backend("channel_id column is not 32 bytes"))?;
    Ok(ChannelId::from_bytes(array))
}

/// The append-only `ravs` table and a `claim_cursors` table tracking the
/// highest claimed nonce per `(channel_id, vm_id_fragment)`, as spec §6
/// mandates for the relational backend.
pub struct SqlRavRepository {
    pool: PgPool,
}

impl SqlRavRepository {
    pub fn new(pool: PgPool) -> Self {
        SqlRavRepository { pool }
    }

    /// Creates the tables this repository needs if they don't already
    /// exist. Intended for local development and tests; production
    /// deployments are expected to manage schema via migrations.
    pub async fn run_migrations(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ravs (
                channel_id BYTEA NOT NULL,
                vm_id_fragment TEXT NOT NULL,
                nonce BIGINT NOT NULL,
                chain_id BIGINT NOT NULL,
                channel_epoch BIGINT NOT NULL,
                accumulated_amount NUMERIC(78, 0) NOT NULL,
                signature BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (channel_id, vm_id_fragment, nonce)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS claim_cursors (
                channel_id BYTEA NOT NULL,
                vm_id_fragment TEXT NOT NULL,
                claimed_nonce BIGINT NOT NULL,
                tx_hash TEXT,
                PRIMARY KEY (channel_id, vm_id_fragment)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RavRepository for SqlRavRepository {
    async fn save(&self, rav: SignedSubRav) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO ravs (channel_id, vm_id_fragment, nonce, chain_id, channel_epoch, accumulated_amount, signature)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (channel_id, vm_id_fragment, nonce) DO NOTHING
            "#,
        )
        .bind(channel_id_to_bytes(&rav.sub_rav.channel_id))
        .bind(&rav.sub_rav.vm_id_fragment)
        .bind(rav.sub_rav.nonce as i64)
        .bind(rav.sub_rav.chain_id as i64)
        .bind(rav.sub_rav.channel_epoch as i64)
        .bind(amount_to_decimal(&rav.sub_rav.accumulated_amount))
        .bind(&rav.signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<Option<SignedSubRav>, Error> {
        let row = sqlx::query_as::<_, RavRow>(
            r#"
            SELECT channel_id, vm_id_fragment, nonce, chain_id, channel_epoch, accumulated_amount, signature
            FROM ravs
            WHERE channel_id = $1 AND vm_id_fragment = $2
            ORDER BY nonce DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<SignedSubRav>, Error> {
        let rows = sqlx::query_as::<_, RavRow>(
            r#"
            SELECT channel_id, vm_id_fragment, nonce, chain_id, channel_epoch, accumulated_amount, signature
            FROM ravs
            WHERE channel_id = $1
            ORDER BY vm_id_fragment, nonce
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_unclaimed_ravs(&self, channel_id: &ChannelId) -> Result<Vec<(String, SignedSubRav)>, Error> {
        let rows = sqlx::query_as::<_, RavRow>(
            r#"
            SELECT r.channel_id, r.vm_id_fragment, r.nonce, r.chain_id, r.channel_epoch, r.accumulated_amount, r.signature
            FROM ravs r
            LEFT JOIN claim_cursors c
              ON c.channel_id = r.channel_id AND c.vm_id_fragment = r.vm_id_fragment
            WHERE r.channel_id = $1
              AND r.nonce > COALESCE(c.claimed_nonce, 0)
              AND r.nonce = (
                  SELECT MAX(r2.nonce) FROM ravs r2
                  WHERE r2.channel_id = r.channel_id AND r2.vm_id_fragment = r.vm_id_fragment
              )
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let fragment = row.vm_id_fragment.clone();
                row.try_into().map(|rav| (fragment, rav))
            })
            .collect()
    }

    async fn mark_as_claimed(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
        tx_hash: Option<String>,
    ) -> Result<(), Error> {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT claimed_nonce FROM claim_cursors WHERE channel_id = $1 AND vm_id_fragment = $2",
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(current) = current {
            if (nonce as i64) < current {
                return Err(Error::NonMonotonicClaim { current: current as u64, attempted: nonce });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO claim_cursors (channel_id, vm_id_fragment, claimed_nonce, tx_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel_id, vm_id_fragment)
            DO UPDATE SET claimed_nonce = EXCLUDED.claimed_nonce, tx_hash = EXCLUDED.tx_hash
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .bind(nonce as i64)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cleanup(&self, policy: RavCleanupPolicy) -> Result<u64, Error> {
        let keep_latest_clause = if policy.keep_latest_per_sub_channel {
            r#"
            AND r.nonce != (
                SELECT MAX(r2.nonce) FROM ravs r2
                WHERE r2.channel_id = r.channel_id AND r2.vm_id_fragment = r.vm_id_fragment
            )
            "#
        } else {
            ""
        };
        let query = format!(
            r#"
            DELETE FROM ravs r
            WHERE r.created_at < now() - ($1 || ' days')::interval
              AND r.nonce <= COALESCE(
                  (SELECT claimed_nonce FROM claim_cursors c
                   WHERE c.channel_id = r.channel_id AND c.vm_id_fragment = r.vm_id_fragment),
                  0
              )
              {keep_latest_clause}
            "#
        );
        let result = sqlx::query(&query)
            .bind(policy.retention_days.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct RavRow {
    channel_id: Vec<u8>,
    vm_id_fragment: String,
    nonce: i64,
    chain_id: i64,
    channel_epoch: i64,
    accumulated_amount: BigDecimal,
    signature: Vec<u8>,
}

impl TryFrom<RavRow> for SignedSubRav {
    type Error = Error;

    fn try_from(row: RavRow) -> Result<Self, Error> {
        Ok(SignedSubRav {
            sub_rav: SubRav {
                version: CURRENT_VERSION,
                chain_id: row.chain_id as u64,
                channel_id: bytes_to_channel_id(&row.channel_id)?,
                channel_epoch: row.channel_epoch as u64,
                vm_id_fragment: row.vm_id_fragment,
                accumulated_amount: decimal_to_amount(&row.accumulated_amount)?,
                nonce: row.nonce as u64,
            },
            signature: row.signature,
        })
    }
}

fn status_str(status: ChannelStatus) -> &'static str {
    match status {
        ChannelStatus::Active => "active",
        ChannelStatus::Closing => "closing",
        ChannelStatus::Closed => "closed",
    }
}

fn status_from_str(s: &str) -> ChannelStatus {
    match s {
        "closing" => ChannelStatus::Closing,
        "closed" => ChannelStatus::Closed,
        _ => ChannelStatus::Active,
    }
}

/// Relational `channels` and `sub_channel_cursors` tables, as spec §6
/// requires for the relational backend.
pub struct SqlChannelRepository {
    pool: PgPool,
}

impl SqlChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        SqlChannelRepository { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                channel_id BYTEA PRIMARY KEY,
                payer_did TEXT NOT NULL,
                payee_did TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                chain_id BIGINT NOT NULL,
                epoch BIGINT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sub_channel_cursors (
                channel_id BYTEA NOT NULL,
                vm_id_fragment TEXT NOT NULL,
                epoch BIGINT NOT NULL,
                last_claimed_amount NUMERIC(78, 0) NOT NULL,
                last_confirmed_nonce BIGINT NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (channel_id, vm_id_fragment)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    channel_id: Vec<u8>,
    payer_did: String,
    payee_did: String,
    asset_id: String,
    chain_id: i64,
    epoch: i64,
    status: String,
}

impl TryFrom<ChannelRow> for ChannelInfo {
    type Error = Error;
    fn try_from(row: ChannelRow) -> Result<Self, Error> {
        Ok(ChannelInfo {
            channel_id: bytes_to_channel_id(&row.channel_id)?,
            payer_did: row.payer_did,
            payee_did: row.payee_did,
            asset_id: row.asset_id,
            chain_id: row.chain_id as u64,
            epoch: row.epoch as u64,
            status: status_from_str(&row.status),
        })
    }
}

#[async_trait]
impl ChannelRepository for SqlChannelRepository {
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelInfo>, Error> {
        let row = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE channel_id = $1")
            .bind(channel_id_to_bytes(channel_id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn set_channel(&self, info: ChannelInfo) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO channels (channel_id, payer_did, payee_did, asset_id, chain_id, epoch, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (channel_id)
            DO UPDATE SET payer_did = EXCLUDED.payer_did, payee_did = EXCLUDED.payee_did,
                          asset_id = EXCLUDED.asset_id, chain_id = EXCLUDED.chain_id,
                          epoch = EXCLUDED.epoch, status = EXCLUDED.status
            "#,
        )
        .bind(channel_id_to_bytes(&info.channel_id))
        .bind(&info.payer_did)
        .bind(&info.payee_did)
        .bind(&info.asset_id)
        .bind(info.chain_id as i64)
        .bind(info.epoch as i64)
        .bind(status_str(info.status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_channel(&self, channel_id: &ChannelId) -> Result<(), Error> {
        sqlx::query("DELETE FROM channels WHERE channel_id = $1")
            .bind(channel_id_to_bytes(channel_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_channels(&self, filter: &ChannelFilter, page: Pagination) -> Result<Vec<ChannelInfo>, Error> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT * FROM channels
            WHERE ($1::text IS NULL OR payer_did = $1)
              AND ($2::text IS NULL OR payee_did = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR asset_id = $4)
            ORDER BY channel_id
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(&filter.payer_did)
        .bind(&filter.payee_did)
        .bind(filter.status.map(status_str))
        .bind(&filter.asset_id)
        .bind(page.offset as i64)
        .bind(page.limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<SubChannelInfo>, Error> {
        let row = sqlx::query_as::<_, SubChannelRow>(
            "SELECT * FROM sub_channel_cursors WHERE channel_id = $1 AND vm_id_fragment = $2",
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        update: SubChannelCursorUpdate,
    ) -> Result<SubChannelInfo, Error> {
        let mut current = self
            .get_sub_channel(channel_id, vm_id_fragment)
            .await?
            .unwrap_or(SubChannelInfo {
                channel_id: *channel_id,
                epoch: 0,
                vm_id_fragment: vm_id_fragment.to_string(),
                last_claimed_amount: Amount::ZERO,
                last_confirmed_nonce: 0,
                last_updated: chrono::Utc::now(),
            });
        if let Some(epoch) = update.epoch {
            current.epoch = epoch;
        }
        if let Some(amount) = update.last_claimed_amount {
            current.last_claimed_amount = amount;
        }
        if let Some(nonce) = update.last_confirmed_nonce {
            current.last_confirmed_nonce = nonce;
        }
        current.last_updated = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sub_channel_cursors
                (channel_id, vm_id_fragment, epoch, last_claimed_amount, last_confirmed_nonce, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (channel_id, vm_id_fragment)
            DO UPDATE SET epoch = EXCLUDED.epoch, last_claimed_amount = EXCLUDED.last_claimed_amount,
                          last_confirmed_nonce = EXCLUDED.last_confirmed_nonce, last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .bind(current.epoch as i64)
        .bind(amount_to_decimal(&current.last_claimed_amount))
        .bind(current.last_confirmed_nonce as i64)
        .bind(current.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(current)
    }

    async fn remove_sub_channel(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM sub_channel_cursors WHERE channel_id = $1 AND vm_id_fragment = $2")
            .bind(channel_id_to_bytes(channel_id))
            .bind(vm_id_fragment)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sub_channels(&self, channel_id: &ChannelId) -> Result<Vec<SubChannelInfo>, Error> {
        let rows = sqlx::query_as::<_, SubChannelRow>("SELECT * FROM sub_channel_cursors WHERE channel_id = $1")
            .bind(channel_id_to_bytes(channel_id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn stats(&self) -> Result<ChannelRepositoryStats, Error> {
        let channel_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels").fetch_one(&self.pool).await?;
        let sub_channel_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sub_channel_cursors").fetch_one(&self.pool).await?;
        Ok(ChannelRepositoryStats {
            channel_count: channel_count as u64,
            sub_channel_count: sub_channel_count as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubChannelRow {
    channel_id: Vec<u8>,
    vm_id_fragment: String,
    epoch: i64,
    last_claimed_amount: BigDecimal,
    last_confirmed_nonce: i64,
    last_updated: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<SubChannelRow> for SubChannelInfo {
    type Error = Error;
    fn try_from(row: SubChannelRow) -> Result<Self, Error> {
        Ok(SubChannelInfo {
            channel_id: bytes_to_channel_id(&row.channel_id)?,
            epoch: row.epoch as u64,
            vm_id_fragment: row.vm_id_fragment,
            last_claimed_amount: decimal_to_amount(&row.last_claimed_amount)?,
            last_confirmed_nonce: row.last_confirmed_nonce as u64,
            last_updated: row.last_updated,
        })
    }
}

/// Relational `pending_sub_ravs` table, TTL-cleaned via `created_at`.
pub struct SqlPendingSubRavRepository {
    pool: PgPool,
}

impl SqlPendingSubRavRepository {
    pub fn new(pool: PgPool) -> Self {
        SqlPendingSubRavRepository { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_sub_ravs (
                channel_id BYTEA NOT NULL,
                vm_id_fragment TEXT NOT NULL,
                nonce BIGINT NOT NULL,
                chain_id BIGINT NOT NULL,
                channel_epoch BIGINT NOT NULL,
                accumulated_amount NUMERIC(78, 0) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (channel_id, vm_id_fragment, nonce)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    channel_id: Vec<u8>,
    vm_id_fragment: String,
    nonce: i64,
    chain_id: i64,
    channel_epoch: i64,
    accumulated_amount: BigDecimal,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PendingRow> for PendingSubRav {
    type Error = Error;
    fn try_from(row: PendingRow) -> Result<Self, Error> {
        let channel_id = bytes_to_channel_id(&row.channel_id)?;
        Ok(PendingSubRav {
            channel_id,
            vm_id_fragment: row.vm_id_fragment.clone(),
            nonce: row.nonce as u64,
            sub_rav: SubRav {
                version: CURRENT_VERSION,
                chain_id: row.chain_id as u64,
                channel_id,
                channel_epoch: row.channel_epoch as u64,
                vm_id_fragment: row.vm_id_fragment,
                accumulated_amount: decimal_to_amount(&row.accumulated_amount)?,
                nonce: row.nonce as u64,
            },
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl PendingSubRavRepository for SqlPendingSubRavRepository {
    async fn save(&self, pending: PendingSubRav) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO pending_sub_ravs
                (channel_id, vm_id_fragment, nonce, chain_id, channel_epoch, accumulated_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (channel_id, vm_id_fragment, nonce) DO NOTHING
            "#,
        )
        .bind(channel_id_to_bytes(&pending.channel_id))
        .bind(&pending.vm_id_fragment)
        .bind(pending.nonce as i64)
        .bind(pending.sub_rav.chain_id as i64)
        .bind(pending.sub_rav.channel_epoch as i64)
        .bind(amount_to_decimal(&pending.sub_rav.accumulated_amount))
        .bind(pending.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
    ) -> Result<Option<PendingSubRav>, Error> {
        let row = sqlx::query_as::<_, PendingRow>(
            "SELECT * FROM pending_sub_ravs WHERE channel_id = $1 AND vm_id_fragment = $2 AND nonce = $3",
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .bind(nonce as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_latest_by_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<PendingSubRav>, Error> {
        let row = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT * FROM pending_sub_ravs WHERE channel_id = $1 AND vm_id_fragment = $2
            ORDER BY nonce DESC LIMIT 1
            "#,
        )
        .bind(channel_id_to_bytes(channel_id))
        .bind(vm_id_fragment)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn remove(&self, channel_id: &ChannelId, vm_id_fragment: &str, nonce: u64) -> Result<(), Error> {
        sqlx::query("DELETE FROM pending_sub_ravs WHERE channel_id = $1 AND vm_id_fragment = $2 AND nonce = $3")
            .bind(channel_id_to_bytes(channel_id))
            .bind(vm_id_fragment)
            .bind(nonce as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup(&self, max_age_ms: u64) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM pending_sub_ravs WHERE created_at < now() - ($1 || ' milliseconds')::interval")
            .bind(max_age_ms.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<PendingSubRavStats, Error> {
        let pending_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_sub_ravs").fetch_one(&self.pool).await?;
        Ok(PendingSubRavStats { pending_count: pending_count as u64 })
    }
}
