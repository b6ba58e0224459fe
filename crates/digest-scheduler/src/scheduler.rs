//! The digest scheduler run loop, catch-up windowing, and `BuildDigest`
//! orchestration (design §4.5).

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use digest_core::model::{Cluster, ClusterId, Digest, DigestEntry, DigestId, DigestStatus, ItemId};
use digest_core::{Clock, Config};
use digest_llm::LlmGateway;
use digest_store::traits::{DigestWrite, ItemWithEmbedding};
use digest_store::Store;
use digest_tuners::TunerRunner;
use tracing::{info, warn};

const WEEKLY_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);
const WEEKLY_LAST_RUN_SETTING: &str = "scheduler:last_weekly_tune_run";

use crate::clustering::{build_clusters, ClusterBuild, ClusteringConfig};
use crate::poster::{AnomalyNotifier, Poster};
use crate::renderer::{render_body, split_body, RenderItem};
use crate::selection::{build_pool, detect_anomaly, semantic_dedup, smart_select, topic_balance, Anomaly};

const RUNE_LIMIT: usize = 4096;

/// The outcome of [`DigestScheduler::build_digest`].
pub struct BuiltDigest {
    pub body: String,
    pub selected: Vec<ItemWithEmbedding>,
    pub clusters: Vec<ClusterBuild>,
    pub anomaly: Option<Anomaly>,
}

pub struct DigestScheduler {
    store: Arc<dyn Store>,
    gateway: Arc<LlmGateway>,
    poster: Arc<dyn Poster>,
    notifier: Arc<dyn AnomalyNotifier>,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl DigestScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<LlmGateway>,
        poster: Arc<dyn Poster>,
        notifier: Arc<dyn AnomalyNotifier>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            poster,
            notifier,
            config,
            clock,
        }
    }

    /// One immediate pass, then a ticker at `scheduler_tick_interval`,
    /// alongside an hourly `autoweek_ticker` that drives the weekly
    /// adaptive-tuning jobs (design §4.5).
    pub async fn run(&self) {
        self.run_once().await;
        let mut ticker = tokio::time::interval(self.config.scheduler_tick_interval);
        let mut weekly_ticker = tokio::time::interval(WEEKLY_TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                _ = weekly_ticker.tick() => self.run_weekly_tuning_if_due().await,
            }
        }
    }

    /// The `autoweek_ticker` check: fires the weekly tuners when
    /// [`should_run_weekly`] holds, reading/persisting the last-run
    /// timestamp as a store setting so it survives restarts.
    async fn run_weekly_tuning_if_due(&self) {
        let last_run = match self.store.get_setting(WEEKLY_LAST_RUN_SETTING).await {
            Ok(value) => value.and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))),
            Err(err) => {
                warn!(error = %err, "failed to read weekly tuning last-run setting");
                return;
            }
        };
        let now = self.clock.now();
        if !should_run_weekly(now, last_run) {
            return;
        }

        info!("running weekly adaptive tuning jobs");
        let runner = TunerRunner::new(self.store.clone(), self.config.clone());
        runner.run_all().await;

        if let Err(err) = self
            .store
            .put_setting(WEEKLY_LAST_RUN_SETTING, serde_json::Value::String(now.to_rfc3339()))
            .await
        {
            warn!(error = %err, "failed to persist weekly tuning last-run setting");
        }
    }

    /// A single scheduling pass: acquire the leader lock (if enabled),
    /// iterate catch-up windows, and process each one.
    pub async fn run_once(&self) {
        if self.config.leader_election_enabled {
            let lease = &self.config.leader_election_lease_name;
            let acquired = match self.store.try_acquire_advisory_lock(lease).await {
                Ok(acquired) => acquired,
                Err(err) => {
                    warn!(error = %err, "advisory lock attempt failed");
                    return;
                }
            };
            if !acquired {
                return;
            }
            self.run_catchup_windows().await;
            if let Err(err) = self.store.release_advisory_lock(lease).await {
                warn!(error = %err, "failed to release advisory lock");
            }
        } else {
            self.run_catchup_windows().await;
        }
    }

    async fn run_catchup_windows(&self) {
        let now = self.clock.now();
        let window = self.config.digest_window;
        let catchup = self.config.scheduler_catchup_window;

        let mut anomalies = Vec::new();
        for (start, end) in catchup_windows(now, window, catchup) {
            if let Some(anomaly) = self.process_window(start, end).await {
                anomalies.push(anomaly);
            }
        }
        if !anomalies.is_empty() {
            self.notifier.notify(&anomalies).await;
        }
    }

    /// `processWindow` (design §4.5): short-circuits on an already-handled
    /// window, otherwise builds, posts, and persists the digest.
    async fn process_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Anomaly> {
        match self.store.digest_exists(start, end).await {
            Ok(true) => return None,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "digest_exists check failed");
                return None;
            }
        }

        let threshold = self.config.importance_threshold;
        let built = match self.build_digest(start, end, threshold).await {
            Ok(built) => built,
            Err(err) => {
                warn!(error = %err, "build_digest failed");
                return None;
            }
        };

        if built.body.trim().is_empty() {
            return built.anomaly;
        }

        let digest_id = DigestId::new();
        let send_result = self
            .poster
            .send_digest(&self.config.digest_chat_id, &built.body, &digest_id.to_string())
            .await;

        let Some(message_id) = send_result else {
            if let Err(err) = self.store.save_digest_error(start, end).await {
                warn!(error = %err, "failed to record digest posting error");
            }
            return built.anomaly;
        };

        let item_ids: Vec<ItemId> = built.selected.iter().map(|e| e.item.id).collect();
        let digest = Digest {
            id: digest_id,
            window_start: start,
            window_end: end,
            status: DigestStatus::Posted,
            posted_at: Some(self.clock.now()),
            chat_id: Some(self.config.digest_chat_id.clone()),
            message_id: Some(message_id),
        };
        let entries = self.build_entries(digest_id, &built.selected, &built.clusters).await;

        if let Err(err) = self
            .store
            .save_digest(DigestWrite {
                digest,
                entries,
                item_ids,
            })
            .await
        {
            warn!(error = %err, "failed to persist digest");
        }

        built.anomaly
    }

    async fn build_entries(
        &self,
        digest_id: DigestId,
        selected: &[ItemWithEmbedding],
        clusters: &[ClusterBuild],
    ) -> Vec<DigestEntry> {
        let raw_ids: Vec<_> = selected.iter().map(|e| e.item.raw_message_id).collect();
        let raw_messages = self.store.get_raw_messages(&raw_ids).await.unwrap_or_default();
        let source_for = |item_id: ItemId| -> Option<(digest_core::model::ChannelId, i64)> {
            let entry = selected.iter().find(|e| e.item.id == item_id)?;
            raw_messages
                .iter()
                .find(|m| m.id == entry.item.raw_message_id)
                .map(|m| (m.channel_id, m.source_msg_id))
        };

        let clustered: std::collections::HashSet<_> =
            clusters.iter().flat_map(|c| c.member_item_ids.iter().copied()).collect();

        let mut entries = Vec::new();
        for cluster in clusters {
            let Some(representative) = selected.iter().find(|e| e.item.id == cluster.representative) else {
                continue;
            };
            let sources = cluster
                .member_item_ids
                .iter()
                .filter_map(|&id| source_for(id))
                .collect();
            entries.push(DigestEntry {
                digest_id,
                title: cluster.topic.clone(),
                body: representative.item.summary.clone(),
                sources,
            });
        }
        for entry in selected {
            if clustered.contains(&entry.item.id) {
                continue;
            }
            let sources = source_for(entry.item.id).into_iter().collect();
            entries.push(DigestEntry {
                digest_id,
                title: entry.item.topic.clone(),
                body: entry.item.summary.clone(),
                sources,
            });
        }
        entries
    }

    /// `BuildDigest` (design §4.5 steps 1–8).
    pub async fn build_digest(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        importance_threshold: f64,
    ) -> digest_core::Result<BuiltDigest> {
        let top_n = self.config.digest_top_n;
        let pool_limit = top_n * self.config.pool_multiplier.max(1);

        let raw_pool = self
            .store
            .get_items_for_window(start, end, importance_threshold, pool_limit)
            .await?;
        let total_in_window = self.store.count_items_in_window(start, end).await?;
        let backlog = self.store.count_backlog().await?;

        if let Some(anomaly) = detect_anomaly(
            total_in_window,
            raw_pool.is_empty(),
            backlog,
            self.config.backlog_anomaly_threshold,
        ) {
            return Ok(BuiltDigest {
                body: String::new(),
                selected: Vec::new(),
                clusters: Vec::new(),
                anomaly: Some(anomaly),
            });
        }

        let pool = build_pool(raw_pool, top_n, self.config.pool_multiplier);
        let pool = smart_select(
            pool,
            self.clock.now(),
            self.config.freshness_decay_hours,
            self.config.freshness_floor,
        );
        let pool = semantic_dedup(pool, self.config.similarity_threshold);
        let balance = topic_balance(
            pool,
            top_n,
            self.config.topic_diversity_cap,
            self.config.min_topic_count,
        );
        if balance.relaxed {
            info!(window_start = %start, "topic balance relaxed to fill top_n");
        }
        let selected = balance.selected;

        self.store.delete_clusters_for_window(start, end).await?;
        let clustering_config = ClusteringConfig {
            similarity_threshold: self.config.cluster_similarity_threshold,
            cross_topic_enabled: self.config.cross_topic_clustering_enabled,
            cross_topic_similarity_threshold: self.config.cross_topic_similarity_threshold,
            time_window_hours: Some(self.config.cluster_time_window_hours),
            coherence_threshold: self.config.cluster_coherence_threshold,
        };
        let mut clusters = build_clusters(&selected, &clustering_config);
        self.persist_clusters(start, end, &mut clusters).await?;

        let render_items = self.render_items(&selected).await?;
        let overview = if self.config.editor_overview_enabled {
            self.generate_overview(&render_items).await
        } else {
            None
        };
        let body = render_body(start, end, &render_items, &clusters, overview.as_deref());

        Ok(BuiltDigest {
            body,
            selected,
            clusters,
            anomaly: None,
        })
    }

    async fn persist_clusters(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clusters: &mut [ClusterBuild],
    ) -> digest_core::Result<()> {
        for cluster in clusters.iter_mut() {
            let cluster_id = self
                .store
                .create_cluster(Cluster {
                    id: ClusterId::new(),
                    topic: cluster.topic.clone(),
                    window_start: start,
                    window_end: end,
                })
                .await?;
            for &item_id in &cluster.member_item_ids {
                self.store.add_to_cluster(cluster_id, item_id).await?;
            }
            if let Ok(label) = self
                .gateway
                .generate_cluster_topic(&format!("Summarize the topic: {}", cluster.topic))
                .await
            {
                if !label.trim().is_empty() {
                    cluster.topic = label;
                }
            }
        }
        Ok(())
    }

    async fn render_items(&self, selected: &[ItemWithEmbedding]) -> digest_core::Result<Vec<RenderItem>> {
        let mut out = Vec::with_capacity(selected.len());
        for entry in selected {
            let Some(channel) = self.store.get_channel(entry.item.channel_id).await? else {
                continue;
            };
            out.push(RenderItem {
                item: entry.item.clone(),
                channel,
            });
        }
        Ok(out)
    }

    async fn generate_overview(&self, items: &[RenderItem]) -> Option<String> {
        let summaries: Vec<String> = items.iter().map(|r| r.item.summary.clone()).collect();
        self.gateway
            .generate_narrative(&format!("Write a short overview of: {}", summaries.join("; ")))
            .await
            .ok()
    }

    /// Splits a built digest body along the renderer's preferred
    /// boundaries, for posters with a message-length limit.
    #[must_use]
    pub fn split_for_posting(body: &str) -> Vec<String> {
        split_body(body, RUNE_LIMIT)
    }
}

/// Iterates windows `[start, start+window)` aligned to multiples of
/// `window`, from `now - catchup` up to `now - window`, oldest first
/// (design §4.5 "Catch-up").
fn catchup_windows(now: DateTime<Utc>, window: std::time::Duration, catchup: std::time::Duration) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let window = Duration::from_std(window).unwrap_or(Duration::hours(1));
    let catchup = Duration::from_std(catchup).unwrap_or(Duration::hours(24));
    if window <= Duration::zero() {
        return Vec::new();
    }

    let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is representable");
    let window_secs = window.num_seconds().max(1);
    let aligned_now = epoch + Duration::seconds(((now - epoch).num_seconds() / window_secs) * window_secs);

    let earliest = aligned_now - catchup;
    let mut windows = Vec::new();
    let mut cursor = earliest;
    while cursor + window <= aligned_now {
        windows.push((cursor, cursor + window));
        cursor += window;
    }
    windows
}

/// Whether the weekly adaptive-tuning jobs should fire this hour: Sunday
/// at hour 0, and not already run within the prior 6 days (design §4.5
/// `autoweek_ticker`).
#[must_use]
pub fn should_run_weekly(now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
    if now.weekday() != Weekday::Sun || now.hour() != 0 {
        return false;
    }
    last_run.is_none_or(|last| now - last >= Duration::days(6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catchup_windows_are_aligned_and_oldest_first() {
        let now = DateTime::parse_from_rfc3339("2026-07-31T10:37:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let windows = catchup_windows(now, std::time::Duration::from_secs(3600), std::time::Duration::from_secs(3 * 3600));
        assert!(windows.len() >= 2);
        for w in windows.windows(2) {
            assert!(w[0].0 < w[1].0);
        }
        for (start, end) in &windows {
            assert_eq!((*end - *start).num_seconds(), 3600);
            assert_eq!(start.minute(), 0);
        }
    }

    #[test]
    fn weekly_trigger_fires_sunday_midnight_if_not_run_recently() {
        let sunday_midnight = DateTime::parse_from_rfc3339("2026-08-02T00:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(should_run_weekly(sunday_midnight, None));
        assert!(!should_run_weekly(
            sunday_midnight,
            Some(sunday_midnight - Duration::days(2))
        ));
        assert!(should_run_weekly(
            sunday_midnight,
            Some(sunday_midnight - Duration::days(7))
        ));
    }

    #[tokio::test]
    async fn weekly_tuning_runs_once_sunday_midnight_and_persists_last_run() {
        use digest_core::clock::FixedClock;
        use digest_llm::mock::MockProvider;
        use digest_store::memory::InMemoryStore;

        let sunday_midnight = DateTime::parse_from_rfc3339("2026-08-02T00:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(FixedClock::new(sunday_midnight));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let gateway = Arc::new(LlmGateway::new(Box::new(MockProvider::new()), 1000.0));
        let scheduler = DigestScheduler::new(
            store.clone(),
            gateway,
            Arc::new(crate::poster::NoopPoster),
            Arc::new(crate::poster::NoopPoster),
            Config::default(),
            clock.clone(),
        );

        assert!(store.get_setting(WEEKLY_LAST_RUN_SETTING).await.unwrap().is_none());
        scheduler.run_weekly_tuning_if_due().await;
        let persisted = store.get_setting(WEEKLY_LAST_RUN_SETTING).await.unwrap();
        assert!(persisted.is_some(), "last-run timestamp should be persisted after a weekly run");

        // A second call the same hour is a no-op: should_run_weekly sees a
        // fresh last-run timestamp and declines.
        let before = persisted.clone();
        scheduler.run_weekly_tuning_if_due().await;
        assert_eq!(store.get_setting(WEEKLY_LAST_RUN_SETTING).await.unwrap(), before);
    }
}
