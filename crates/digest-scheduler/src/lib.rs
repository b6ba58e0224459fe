//! Windowed digest scheduling: catch-up windows, selection, clustering,
//! and rendering (design §4.5–§4.7).

pub mod clustering;
pub mod poster;
pub mod renderer;
pub mod scheduler;
pub mod selection;

pub use clustering::{build_clusters, ClusterBuild, ClusteringConfig};
pub use poster::{AnomalyNotifier, NoopPoster, Poster};
pub use renderer::{render_body, split_body, RenderItem};
pub use scheduler::{should_run_weekly, BuiltDigest, DigestScheduler};
pub use selection::{build_pool, detect_anomaly, semantic_dedup, smart_select, topic_balance, Anomaly};
