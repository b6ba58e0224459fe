//! A Postgres-backed [`Store`] (design §4.1, §9 "a real deployment needs
//! a durable backend"). Pooled via `deadpool-postgres`, schema applied on
//! construction. Embedding similarity is computed in Rust over a
//! time-bounded candidate set (see [`crate::InMemoryStore`]'s identical
//! approach) rather than a vector extension, since the design doesn't
//! call for one.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use digest_core::error::{Error, Result};
use digest_core::math::{cosine_similarity, stable_lock_key};
use digest_core::model::{
    Channel, ChannelId, Cluster, ClusterId, DigestId, DigestStatus, Filter, FilterType, Item,
    ItemId, ItemStatus, RawMessage, RawMessageId,
};
use serde_json::Value;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::traits::{DigestWrite, ItemWithEmbedding, Store};
use crate::types::{ChannelStats, DecayedRatings, NewRawMessage, ScoreStats, ScoredItem};

const MAX_RETRY_COUNT: i32 = 5;

const SCHEMA: &str = include_str!("schema.sql");

fn pg_err(err: &tokio_postgres::Error) -> Error {
    Error::Transient(format!("postgres: {err}"))
}

fn pool_err(err: &deadpool_postgres::PoolError) -> Error {
    Error::Transient(format!("postgres pool: {err}"))
}

/// A Postgres-backed [`Store`]. Connects lazily through a pool; the
/// schema is applied once at construction.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connects to `database_url` and applies the schema.
    ///
    /// # Errors
    /// Returns [`Error::Fatal`] if the pool cannot be built or the schema
    /// fails to apply.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Fatal(format!("building postgres pool: {e}")))?;

        let client = pool.get().await.map_err(|e| Error::Fatal(format!("connecting: {e}")))?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| Error::Fatal(format!("applying schema: {e}")))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| pool_err(&e))
    }

    fn row_to_channel(row: &tokio_postgres::Row) -> Channel {
        Channel {
            id: ChannelId(row.get("id")),
            display_name: row.get("display_name"),
            is_active: row.get("is_active"),
            relevance_threshold: row.get("relevance_threshold"),
            importance_threshold: row.get("importance_threshold"),
            importance_weight: row.get("importance_weight"),
            auto_weight_enabled: row.get("auto_weight_enabled"),
            weight_override: row.get("weight_override"),
            auto_relevance_enabled: row.get("auto_relevance_enabled"),
            relevance_threshold_delta: row.get("relevance_threshold_delta"),
            context: row.get("context"),
            description: row.get("description"),
            category: row.get("category"),
            tone: row.get("tone"),
            update_freq: row.get("update_freq"),
            last_seen_message_id: row.get("last_seen_message_id"),
        }
    }

    fn row_to_raw_message(row: &tokio_postgres::Row) -> RawMessage {
        RawMessage {
            id: RawMessageId(row.get("id")),
            channel_id: ChannelId(row.get("channel_id")),
            source_msg_id: row.get("source_msg_id"),
            timestamp: row.get("timestamp"),
            text: row.get("text"),
            media: row.get("media"),
            canonical_hash: row.get("canonical_hash"),
            is_forward: row.get("is_forward"),
            processed_at: row.get("processed_at"),
            discoveries_extracted: row.get("discoveries_extracted"),
        }
    }

    fn row_to_item(row: &tokio_postgres::Row) -> Item {
        let status: String = row.get("status");
        Item {
            id: ItemId(row.get("id")),
            raw_message_id: RawMessageId(row.get("raw_message_id")),
            channel_id: ChannelId(row.get("channel_id")),
            relevance_score: row.get("relevance_score"),
            importance_score: row.get("importance_score"),
            topic: row.get("topic"),
            summary: row.get("summary"),
            language: row.get("language"),
            status: parse_item_status(&status),
            retry_count: row.get::<_, i32>("retry_count").max(0) as u32,
            next_retry_at: row.get("next_retry_at"),
            digested_at: row.get("digested_at"),
            error_blob: row.get("error_blob"),
            created_at: row.get("created_at"),
        }
    }
}

fn parse_item_status(s: &str) -> ItemStatus {
    match s {
        "rejected" => ItemStatus::Rejected,
        "error" => ItemStatus::Error,
        "retry" => ItemStatus::Retry,
        _ => ItemStatus::Ready,
    }
}

fn item_status_str(s: ItemStatus) -> &'static str {
    match s {
        ItemStatus::Ready => "ready",
        ItemStatus::Rejected => "rejected",
        ItemStatus::Error => "error",
        ItemStatus::Retry => "retry",
    }
}

fn embedding_to_json(embedding: &[f32]) -> Value {
    serde_json::json!(embedding)
}

fn embedding_from_json(value: Option<Value>) -> Vec<f32> {
    value
        .and_then(|v| serde_json::from_value::<Vec<f32>>(v).ok())
        .unwrap_or_default()
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_raw_message(&self, msg: NewRawMessage) -> Result<RawMessageId> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO raw_messages
                    (id, channel_id, source_msg_id, timestamp, text, media, canonical_hash, is_forward)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (channel_id, source_msg_id) DO UPDATE SET text = EXCLUDED.text
                 RETURNING id",
                &[
                    &Uuid::new_v4(),
                    &msg.channel_id.0,
                    &msg.source_msg_id,
                    &msg.timestamp,
                    &msg.text,
                    &msg.media,
                    &msg.canonical_hash,
                    &msg.is_forward,
                ],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(RawMessageId(row.get("id")))
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<(RawMessage, Channel)>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT rm.*, c.* FROM raw_messages rm
                 JOIN channels c ON c.id = rm.channel_id
                 WHERE rm.processed_at IS NULL
                 ORDER BY rm.timestamp ASC
                 LIMIT $1",
                &[&(limit as i64)],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(rows
            .iter()
            .map(|row| (Self::row_to_raw_message(row), Self::row_to_channel(row)))
            .collect())
    }

    async fn get_raw_messages(&self, ids: &[RawMessageId]) -> Result<Vec<RawMessage>> {
        let client = self.client().await?;
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows = client
            .query("SELECT * FROM raw_messages WHERE id = ANY($1)", &[&uuids])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(rows.iter().map(Self::row_to_raw_message).collect())
    }

    async fn get_active_channels(&self) -> Result<Vec<Channel>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT * FROM channels WHERE is_active", &[])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(rows.iter().map(Self::row_to_channel).collect())
    }

    async fn list_filters(&self) -> Result<Vec<Filter>> {
        let client = self.client().await?;
        let rows = client.query("SELECT * FROM filters", &[]).await.map_err(|e| pg_err(&e))?;
        Ok(rows
            .iter()
            .map(|row| {
                let filter_type: String = row.get("filter_type");
                Filter {
                    id: row.get("id"),
                    filter_type: if filter_type == "allow" {
                        FilterType::Allow
                    } else {
                        FilterType::Deny
                    },
                    pattern: row.get("pattern"),
                    active: row.get("active"),
                }
            })
            .collect())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM channels WHERE id = $1", &[&id.0])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(row.as_ref().map(Self::row_to_channel))
    }

    async fn update_channel_weight(&self, channel_id: ChannelId, weight: f64) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE channels SET importance_weight = $2 WHERE id = $1",
                &[&channel_id.0, &weight],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn update_channel_relevance_delta(&self, channel_id: ChannelId, delta: f64) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE channels SET relevance_threshold_delta = $2 WHERE id = $1",
                &[&channel_id.0, &delta],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn mark_processed(&self, id: RawMessageId) -> Result<()> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE raw_messages SET processed_at = now() WHERE id = $1",
                &[&id.0],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("raw message {id}")));
        }
        Ok(())
    }

    async fn has_strict_duplicate(
        &self,
        channel_id: ChannelId,
        canonical_hash: &str,
        exclude: RawMessageId,
    ) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM raw_messages rm
                    JOIN items i ON i.raw_message_id = rm.id
                    WHERE rm.channel_id = $1 AND rm.canonical_hash = $2
                      AND rm.id != $3 AND i.status != 'error'
                 )",
                &[&channel_id.0, &canonical_hash, &exclude.0],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(row.get(0))
    }

    async fn find_similar_item(
        &self,
        embedding: &[f32],
        threshold: f64,
        since: DateTime<Utc>,
    ) -> Result<Option<ItemId>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT item_id, vector FROM embeddings e
                 JOIN items i ON i.id = e.item_id
                 WHERE i.created_at >= $1",
                &[&since],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        let mut best: Option<(ItemId, f64)> = None;
        for row in &rows {
            let item_id = ItemId(row.get("item_id"));
            let vector = embedding_from_json(row.get("vector"));
            let similarity = cosine_similarity(embedding, &vector);
            if similarity >= threshold && best.as_ref().is_none_or(|(_, s)| similarity > *s) {
                best = Some((item_id, similarity));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    async fn save_item(&self, result: ScoredItem) -> Result<ItemId> {
        let mut client = self.client().await?;
        let txn = client.transaction().await.map_err(|e| pg_err(&e))?;

        let status = item_status_str(result.status);
        let row = txn
            .query_one(
                "INSERT INTO items
                    (id, raw_message_id, channel_id, relevance_score, importance_score, topic,
                     summary, language, status, retry_count, next_retry_at, digested_at, error_blob)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, NULL, NULL, NULL)
                 ON CONFLICT (raw_message_id) DO UPDATE SET
                    relevance_score = EXCLUDED.relevance_score,
                    importance_score = EXCLUDED.importance_score,
                    topic = EXCLUDED.topic,
                    summary = EXCLUDED.summary,
                    language = EXCLUDED.language,
                    status = EXCLUDED.status,
                    retry_count = 0,
                    next_retry_at = NULL,
                    error_blob = NULL
                 RETURNING id",
                &[
                    &Uuid::new_v4(),
                    &result.raw_message_id.0,
                    &result.channel_id.0,
                    &result.relevance_score,
                    &result.importance_score,
                    &result.topic,
                    &result.summary,
                    &result.language,
                    &status,
                ],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        let item_id: Uuid = row.get("id");

        if let Some(embedding) = &result.embedding {
            txn.execute(
                "INSERT INTO embeddings (item_id, vector, created_at) VALUES ($1, $2, now())
                 ON CONFLICT (item_id) DO UPDATE SET vector = EXCLUDED.vector",
                &[&item_id, &embedding_to_json(embedding)],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        }

        txn.commit().await.map_err(|e| pg_err(&e))?;
        Ok(ItemId(item_id))
    }

    async fn save_item_error(&self, raw_message_id: RawMessageId, error_blob: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO items
                    (id, raw_message_id, channel_id, relevance_score, importance_score, topic,
                     summary, language, status, retry_count, next_retry_at, error_blob)
                 SELECT $1, rm.id, rm.channel_id, 0, 0, '', '', '', 'error', 1,
                        now() + (power(2, 1) || ' minutes')::interval, $2
                 FROM raw_messages rm WHERE rm.id = $3
                 ON CONFLICT (raw_message_id) DO UPDATE SET
                    status = 'error',
                    error_blob = EXCLUDED.error_blob,
                    retry_count = LEAST(items.retry_count + 1, $4),
                    next_retry_at = now() + (power(2, LEAST(items.retry_count + 1, $4)) || ' minutes')::interval",
                &[&Uuid::new_v4(), &error_blob, &raw_message_id.0, &MAX_RETRY_COUNT],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn mark_items_digested(&self, ids: &[ItemId]) -> Result<()> {
        let client = self.client().await?;
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        client
            .execute(
                "UPDATE items SET digested_at = now() WHERE id = ANY($1)",
                &[&uuids],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn get_items_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        importance_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ItemWithEmbedding>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT i.*, e.vector FROM items i
                 LEFT JOIN embeddings e ON e.item_id = i.id
                 LEFT JOIN channels c ON c.id = i.channel_id
                 WHERE i.status = 'ready' AND i.digested_at IS NULL
                   AND i.created_at >= $1 AND i.created_at < $2
                   AND i.importance_score >= COALESCE(c.importance_threshold, $3)
                 ORDER BY i.importance_score DESC, i.relevance_score DESC
                 LIMIT $4",
                &[&start, &end, &importance_threshold, &(limit as i64)],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(rows
            .iter()
            .map(|row| ItemWithEmbedding {
                item: Self::row_to_item(row),
                embedding: embedding_from_json(row.get("vector")),
            })
            .collect())
    }

    async fn count_items_in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM items
                 WHERE status = 'ready' AND digested_at IS NULL
                   AND created_at >= $1 AND created_at < $2",
                &[&start, &end],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn count_backlog(&self) -> Result<u64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM raw_messages WHERE processed_at IS NULL",
                &[],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn create_cluster(&self, cluster: Cluster) -> Result<ClusterId> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO clusters (id, topic, window_start, window_end)
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[&cluster.id.0, &cluster.topic, &cluster.window_start, &cluster.window_end],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(ClusterId(row.get("id")))
    }

    async fn add_to_cluster(&self, cluster_id: ClusterId, item_id: ItemId) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO cluster_items (cluster_id, item_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
                &[&cluster_id.0, &item_id.0],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn delete_clusters_for_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM clusters WHERE window_start = $1 AND window_end = $2",
                &[&start, &end],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn digest_exists(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let client = self.client().await?;
        let posted: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM digests WHERE window_start = $1 AND window_end = $2)",
                &[&start, &end],
            )
            .await
            .map_err(|e| pg_err(&e))?
            .get(0);
        if posted {
            return Ok(true);
        }
        let recent_error: bool = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM digest_errors
                    WHERE window_start = $1 AND window_end = $2 AND occurred_at >= now() - interval '1 hour'
                 )",
                &[&start, &end],
            )
            .await
            .map_err(|e| pg_err(&e))?
            .get(0);
        Ok(recent_error)
    }

    async fn save_digest(&self, write: DigestWrite) -> Result<DigestId> {
        let mut client = self.client().await?;
        let txn = client.transaction().await.map_err(|e| pg_err(&e))?;

        let status = match write.digest.status {
            DigestStatus::Posted => "posted",
            DigestStatus::Error => "error",
        };
        txn.execute(
            "INSERT INTO digests (id, window_start, window_end, status, posted_at, chat_id, message_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &write.digest.id.0,
                &write.digest.window_start,
                &write.digest.window_end,
                &status,
                &write.digest.posted_at,
                &write.digest.chat_id,
                &write.digest.message_id,
            ],
        )
        .await
        .map_err(|e| pg_err(&e))?;

        for entry in &write.entries {
            let sources: Vec<(Uuid, i64)> = entry.sources.iter().map(|(c, m)| (c.0, *m)).collect();
            txn.execute(
                "INSERT INTO digest_entries (digest_id, title, body, sources)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &entry.digest_id.0,
                    &entry.title,
                    &entry.body,
                    &serde_json::json!(sources),
                ],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        }

        let ids: Vec<Uuid> = write.item_ids.iter().map(|id| id.0).collect();
        txn.execute(
            "UPDATE items SET digested_at = now() WHERE id = ANY($1)",
            &[&ids],
        )
        .await
        .map_err(|e| pg_err(&e))?;

        txn.commit().await.map_err(|e| pg_err(&e))?;
        Ok(write.digest.id)
    }

    async fn save_digest_error(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO digest_errors (window_start, window_end, occurred_at)
                 VALUES ($1, $2, now())",
                &[&start, &end],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn try_acquire_advisory_lock(&self, lease_name: &str) -> Result<bool> {
        let client = self.client().await?;
        let key = stable_lock_key(lease_name);
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(row.get(0))
    }

    async fn release_advisory_lock(&self, lease_name: &str) -> Result<()> {
        let client = self.client().await?;
        let key = stable_lock_key(lease_name);
        client
            .query_one("SELECT pg_advisory_unlock($1)", &[&key])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put_setting(&self, key: &str, value: Value) -> Result<()> {
        let client = self.client().await?;
        let before = client
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .await
            .ok()
            .flatten()
            .map(|r| r.get::<_, Value>("value"));

        client
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now())
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
                &[&key, &value],
            )
            .await
            .map_err(|e| pg_err(&e))?;

        // Best-effort history: never abort the primary write.
        let _ = client
            .execute(
                "INSERT INTO setting_history (key, before_value, after_value, changed_at)
                 VALUES ($1, $2, $3, now())",
                &[&key, &before, &value],
            )
            .await;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM settings WHERE key = $1", &[&key])
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(())
    }

    async fn channel_stats(&self, channel_id: ChannelId, days: u32) -> Result<ChannelStats> {
        let client = self.client().await?;
        let since = Utc::now() - ChronoDuration::days(i64::from(days));
        let row = client
            .query_one(
                "SELECT
                    (SELECT count(*) FROM raw_messages WHERE channel_id = $1 AND timestamp >= $2) AS messages,
                    (SELECT count(*) FROM items WHERE channel_id = $1 AND created_at >= $2) AS items_created,
                    (SELECT count(*) FROM items WHERE channel_id = $1 AND created_at >= $2 AND digested_at IS NOT NULL) AS items_digested,
                    (SELECT COALESCE(avg(importance_score), 0) FROM items WHERE channel_id = $1 AND created_at >= $2) AS avg_importance",
                &[&channel_id.0, &since],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        let messages: i64 = row.get("messages");
        let items_created: i64 = row.get("items_created");
        let items_digested: i64 = row.get("items_digested");
        Ok(ChannelStats {
            messages: messages.max(0) as u64,
            items_created: items_created.max(0) as u64,
            items_digested: items_digested.max(0) as u64,
            avg_importance: row.get("avg_importance"),
        })
    }

    async fn channel_score_stats(&self, channel_id: ChannelId, days: u32) -> Result<ScoreStats> {
        let client = self.client().await?;
        let since = Utc::now() - ChronoDuration::days(i64::from(days));
        let row = client
            .query_one(
                "SELECT
                    COALESCE(avg(relevance_score), 0) AS relevance_mean,
                    COALESCE(stddev_pop(relevance_score), 0) AS relevance_stddev,
                    COALESCE(avg(importance_score), 0) AS importance_mean,
                    COALESCE(stddev_pop(importance_score), 0) AS importance_stddev
                 FROM items
                 WHERE channel_id = $1 AND created_at >= $2 AND status = 'ready'",
                &[&channel_id.0, &since],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(ScoreStats {
            relevance_mean: row.get("relevance_mean"),
            relevance_stddev: row.get("relevance_stddev"),
            importance_mean: row.get("importance_mean"),
            importance_stddev: row.get("importance_stddev"),
        })
    }

    async fn recent_channel_texts(
        &self,
        channel_id: ChannelId,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT text FROM raw_messages
                 WHERE channel_id = $1 AND timestamp < $2
                 ORDER BY timestamp DESC LIMIT $3",
                &[&channel_id.0, &before, &(limit as i64)],
            )
            .await
            .map_err(|e| pg_err(&e))?;
        Ok(rows.iter().map(|r| r.get("text")).collect())
    }

    async fn decayed_item_ratings(
        &self,
        channel_id: Option<ChannelId>,
        days: u32,
        half_life_days: f64,
    ) -> Result<DecayedRatings> {
        let client = self.client().await?;
        let since = Utc::now() - ChronoDuration::days(i64::from(days));
        let rows = if let Some(cid) = channel_id {
            client
                .query(
                    "SELECT r.value, r.timestamp FROM item_ratings r
                     JOIN items i ON i.id = r.item_id
                     WHERE r.timestamp >= $1 AND i.channel_id = $2",
                    &[&since, &cid.0],
                )
                .await
                .map_err(|e| pg_err(&e))?
        } else {
            client
                .query(
                    "SELECT value, timestamp FROM item_ratings WHERE timestamp >= $1",
                    &[&since],
                )
                .await
                .map_err(|e| pg_err(&e))?
        };

        let now = Utc::now();
        let mut out = DecayedRatings::default();
        for row in &rows {
            let value: String = row.get("value");
            let timestamp: DateTime<Utc> = row.get("timestamp");
            let age_days = (now - timestamp).num_milliseconds() as f64 / 86_400_000.0;
            let weight = (-age_days * std::f64::consts::LN_2 / half_life_days).exp();
            out.weighted_total += weight;
            match value.as_str() {
                "good" => out.weighted_good += weight,
                "bad" => out.weighted_bad += weight,
                _ => out.weighted_irrelevant += weight,
            }
        }
        Ok(out)
    }
}
