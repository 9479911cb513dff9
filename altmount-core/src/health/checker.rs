use std::cmp::min;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{SeedableRng, seq::index};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use altmount_config::ConfigGetter;
use altmount_model::HealthEvent;

use crate::error::{HealthError, Result};
use crate::metadata::MetadataStore;
use crate::nntp::{NntpClient, NntpPool};

/// Per-check overrides; unset fields fall back to the current config
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub verify_data: Option<bool>,
    pub all_segments: Option<bool>,
    pub sample_percentage: Option<u8>,
    pub max_connections: Option<usize>,
}

/// Seam for the worker: a checker is anything that can turn a virtual path
/// into a [`HealthEvent`].
#[async_trait]
pub trait FileChecker: Send + Sync {
    async fn check(
        &self,
        path: &str,
        options: CheckOptions,
        cancel: &CancellationToken,
    ) -> Result<HealthEvent>;
}

/// Stateless decision function over a single file: load its metadata,
/// validate the segment structure, and prove a sample of segments is still
/// reachable through the NNTP pool.
pub struct HealthChecker {
    metadata: Arc<MetadataStore>,
    pool: Arc<dyn NntpPool>,
    config: ConfigGetter,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("metadata_root", &self.metadata.root())
            .finish()
    }
}

enum ProbeOutcome {
    Found,
    Missing(String),
    Transient(String),
}

impl HealthChecker {
    pub fn new(
        metadata: Arc<MetadataStore>,
        pool: Arc<dyn NntpPool>,
        config: ConfigGetter,
    ) -> Self {
        Self {
            metadata,
            pool,
            config,
        }
    }
}

#[async_trait]
impl FileChecker for HealthChecker {
    async fn check(
        &self,
        path: &str,
        options: CheckOptions,
        cancel: &CancellationToken,
    ) -> Result<HealthEvent> {
        // 1. Load metadata. A vanished record makes the row a zombie.
        let metadata = match self.metadata.read(path) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(HealthEvent::removed()),
            Err(err) => {
                return Ok(HealthEvent::check_failed(format!(
                    "failed to read metadata: {err}"
                )));
            }
        };

        // 2. Structural integrity of the segment list.
        if let Err(violation) = metadata.validate_segments() {
            return Ok(HealthEvent::corrupted(
                "metadata failed structural validation",
                Some(violation.to_string()),
            ));
        }
        if metadata.segments.is_empty() {
            // Zero-length file; nothing to probe.
            return Ok(HealthEvent::healthy());
        }

        let config = (self.config)();
        let verify_data = options
            .verify_data
            .unwrap_or(config.health.verify_data);
        let all_segments = options
            .all_segments
            .unwrap_or(config.health.check_all_segments);
        let sample_percentage = options
            .sample_percentage
            .unwrap_or(config.health.segment_sample_percentage);
        let max_connections = options
            .max_connections
            .unwrap_or(config.health.max_connections_for_health_checks);

        // 3. + 4. Sample and probe.
        let client = match self.pool.get_pool().await {
            Ok(client) => client,
            Err(err) => {
                return Ok(HealthEvent::check_failed(format!(
                    "provider pool unavailable: {err}"
                )));
            }
        };

        let sample = sample_indices(
            metadata.segments.len(),
            sample_percentage,
            all_segments,
            sampling_seed(path, Utc::now()),
        );
        debug!(
            "checking {path}: probing {}/{} segments",
            sample.len(),
            metadata.segments.len()
        );

        let concurrency = min(max_connections.max(1), sample.len());
        let probes = stream::iter(sample.into_iter().map(|idx| {
            let client = Arc::clone(&client);
            let article_id = metadata.segments[idx].article_id.clone();
            async move { probe_segment(client.as_ref(), &article_id, verify_data).await }
        }))
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>();

        let outcomes = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HealthError::Cancelled(path.to_string()));
            }
            outcomes = probes => outcomes,
        };

        // 5. Aggregate. A definitive miss condemns the file; a transient
        // failure condemns the environment.
        let mut missing = Vec::new();
        let mut transient = None;
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Found => {}
                ProbeOutcome::Missing(article_id) => missing.push(article_id),
                ProbeOutcome::Transient(error) => {
                    transient.get_or_insert(error);
                }
            }
        }

        if !missing.is_empty() {
            missing.sort();
            return Ok(HealthEvent::corrupted(
                "articles missing from providers",
                Some(format!("articles not found: {}", missing.join(", "))),
            ));
        }
        if let Some(error) = transient {
            return Ok(HealthEvent::check_failed(error));
        }
        Ok(HealthEvent::healthy())
    }
}

async fn probe_segment(
    client: &dyn NntpClient,
    article_id: &str,
    verify_data: bool,
) -> ProbeOutcome {
    if let Err(err) = client.stat(article_id).await {
        return classify(article_id, err);
    }
    if verify_data && let Err(err) = client.body_first_byte(article_id).await {
        return classify(article_id, err);
    }
    ProbeOutcome::Found
}

fn classify(article_id: &str, err: crate::nntp::NntpError) -> ProbeOutcome {
    if err.is_definitive_miss() {
        ProbeOutcome::Missing(article_id.to_string())
    } else {
        ProbeOutcome::Transient(err.to_string())
    }
}

/// Picks the segment indices to probe: everything when `all_segments`,
/// otherwise `max(1, ceil(n * pct / 100))` indices without replacement.
/// The first and last segments are always included; they bound the byte
/// range and tend to break first.
fn sample_indices(n: usize, sample_percentage: u8, all_segments: bool, seed: u64) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    if all_segments || n <= 2 {
        return (0..n).collect();
    }

    let pct = sample_percentage.clamp(1, 100) as usize;
    let wanted = (n * pct).div_ceil(100).max(1);

    let mut selected = vec![0, n - 1];
    if wanted > 2 {
        let middle = n - 2;
        let amount = min(wanted - 2, middle);
        let mut rng = StdRng::seed_from_u64(seed);
        selected.extend(
            index::sample(&mut rng, middle, amount)
                .into_iter()
                .map(|idx| idx + 1),
        );
    }

    selected.sort_unstable();
    selected.dedup();
    selected
}

/// Seeded from (path, UTC day) so repeated checks on the same day cover
/// the same segments while coverage still rotates day to day. Not a
/// contract.
fn sampling_seed(path: &str, now: DateTime<Utc>) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    now.timestamp().div_euclid(86_400).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nntp::NntpError;
    use altmount_config::{Config, static_config};
    use altmount_model::{FileMetadata, HealthEventType, Segment};
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn sample_always_includes_endpoints() {
        let sample = sample_indices(100, 5, false, 42);
        assert!(sample.contains(&0));
        assert!(sample.contains(&99));
        assert_eq!(sample.len(), 5);

        let unique: HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), sample.len());
    }

    #[test]
    fn sample_is_deterministic_per_seed() {
        assert_eq!(sample_indices(500, 10, false, 7), sample_indices(500, 10, false, 7));
        assert_ne!(sample_indices(500, 10, false, 7), sample_indices(500, 10, false, 8));
    }

    #[test]
    fn tiny_files_are_sampled_entirely() {
        assert_eq!(sample_indices(1, 5, false, 0), vec![0]);
        assert_eq!(sample_indices(2, 5, false, 0), vec![0, 1]);
        assert!(sample_indices(0, 5, false, 0).is_empty());
    }

    #[test]
    fn all_segments_overrides_sampling() {
        assert_eq!(sample_indices(10, 1, true, 0), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn sample_size_follows_the_ceiling_formula() {
        // ceil(30 * 10 / 100) = 3
        assert_eq!(sample_indices(30, 10, false, 1).len(), 3);
        // ceil(7 * 50 / 100) = 4
        assert_eq!(sample_indices(7, 50, false, 1).len(), 4);
        // Floor of 2 from the forced endpoints.
        assert_eq!(sample_indices(50, 1, false, 1).len(), 2);
    }

    struct ScriptedClient {
        missing: Vec<String>,
        transient: Vec<String>,
    }

    #[async_trait]
    impl NntpClient for ScriptedClient {
        async fn stat(&self, article_id: &str) -> std::result::Result<(), NntpError> {
            if self.missing.iter().any(|id| id == article_id) {
                return Err(NntpError::ArticleNotFound(article_id.to_string()));
            }
            if self.transient.iter().any(|id| id == article_id) {
                return Err(NntpError::Timeout(format!("stat {article_id} timed out")));
            }
            Ok(())
        }

        async fn body_first_byte(
            &self,
            _article_id: &str,
        ) -> std::result::Result<(), NntpError> {
            Ok(())
        }
    }

    struct ScriptedPool {
        client: Arc<ScriptedClient>,
    }

    #[async_trait]
    impl NntpPool for ScriptedPool {
        async fn get_pool(
            &self,
        ) -> std::result::Result<Arc<dyn NntpClient>, NntpError> {
            Ok(Arc::clone(&self.client) as Arc<dyn NntpClient>)
        }
    }

    fn checker_with(
        dir: &TempDir,
        missing: Vec<String>,
        transient: Vec<String>,
    ) -> (HealthChecker, Arc<MetadataStore>) {
        let store = Arc::new(MetadataStore::new(dir.path().join("metadata")).unwrap());
        let pool = Arc::new(ScriptedPool {
            client: Arc::new(ScriptedClient { missing, transient }),
        });
        let checker = HealthChecker::new(
            Arc::clone(&store),
            pool,
            static_config(Config::default()),
        );
        (checker, store)
    }

    fn three_segment_metadata() -> FileMetadata {
        let segments = (0..3)
            .map(|i| Segment {
                article_id: format!("seg{i}@news"),
                segment_size: 100,
                start_offset: i * 100,
                end_offset: i * 100 + 99,
            })
            .collect();
        FileMetadata::new(300, segments)
    }

    #[tokio::test]
    async fn missing_article_yields_corrupted_with_details() {
        let dir = TempDir::new().unwrap();
        let (checker, store) =
            checker_with(&dir, vec!["seg2@news".to_string()], vec![]);
        store.write("a.mkv", &three_segment_metadata()).unwrap();

        let options = CheckOptions {
            all_segments: Some(true),
            ..Default::default()
        };
        let event = checker
            .check("a.mkv", options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(event.event_type, HealthEventType::FileCorrupted);
        assert!(event.details.unwrap().contains("seg2@news"));
    }

    #[tokio::test]
    async fn transient_failure_yields_check_failed() {
        let dir = TempDir::new().unwrap();
        let (checker, store) =
            checker_with(&dir, vec![], vec!["seg1@news".to_string()]);
        store.write("a.mkv", &three_segment_metadata()).unwrap();

        let options = CheckOptions {
            all_segments: Some(true),
            ..Default::default()
        };
        let event = checker
            .check("a.mkv", options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(event.event_type, HealthEventType::CheckFailed);
    }

    #[tokio::test]
    async fn structural_violation_yields_corrupted_without_probing() {
        let dir = TempDir::new().unwrap();
        let (checker, store) = checker_with(&dir, vec![], vec![]);

        let mut broken = three_segment_metadata();
        broken.segments[1].start_offset = 150; // overlap
        store.write("a.mkv", &broken).unwrap();

        let event = checker
            .check("a.mkv", CheckOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(event.event_type, HealthEventType::FileCorrupted);
    }

    #[tokio::test]
    async fn missing_metadata_yields_removed() {
        let dir = TempDir::new().unwrap();
        let (checker, _store) = checker_with(&dir, vec![], vec![]);

        let event = checker
            .check("ghost.mkv", CheckOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(event.event_type, HealthEventType::FileRemoved);
    }
}
