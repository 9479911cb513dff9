use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Source that produced the configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level settings. One immutable snapshot of this struct is what the
/// rest of the system sees through the `ConfigGetter`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Where the virtual filesystem is mounted. Used as the fallback base
    /// when resolving the path an ARR instance knows a file by.
    pub mount_path: PathBuf,
    pub health: HealthConfig,
    pub metadata: MetadataConfig,
    pub import: ImportConfig,
    pub sabnzbd: SabnzbdConfig,
    pub arrs: ArrsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/mnt/altmount"),
            health: HealthConfig::default(),
            metadata: MetadataConfig::default(),
            import: ImportConfig::default(),
            sabnzbd: SabnzbdConfig::default(),
            arrs: ArrsConfig::default(),
        }
    }
}

/// Tuning for the health worker and checker. Raise `max_concurrent_jobs`
/// to check more files per cycle; raise the sample percentage (or flip
/// `check_all_segments`) for stronger guarantees at more NNTP traffic.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Master switch. When false the worker starts as a no-op.
    pub enabled: bool,
    /// Seconds between scheduler ticks.
    pub check_interval_seconds: u64,
    /// Per-cycle cap on files dispatched in parallel.
    pub max_concurrent_jobs: usize,
    /// Per-file cap on parallel segment probes.
    pub max_connections_for_health_checks: usize,
    /// Percentage of a file's segments sampled per check. The first and
    /// last segments are always included.
    pub segment_sample_percentage: u8,
    /// Also fetch one body byte per sampled article, defending against
    /// indexes that advertise articles which cannot be retrieved.
    pub verify_data: bool,
    /// Probe every segment instead of sampling.
    pub check_all_segments: bool,
    /// Detection-phase retries before a file escalates to repair.
    pub max_retries: i64,
    /// Repair notifications before a file is declared permanently
    /// corrupted.
    pub max_repair_retries: i64,
    /// Minutes until the first repeated ARR notification after a repair
    /// is triggered; later notifications double from this base.
    pub repair_retrigger_delay_minutes: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 300,
            max_concurrent_jobs: 5,
            max_connections_for_health_checks: 5,
            segment_sample_percentage: 5,
            verify_data: false,
            check_all_segments: false,
            max_retries: 3,
            max_repair_retries: 3,
            repair_retrigger_delay_minutes: 30,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(1))
    }

    pub fn repair_retrigger_delay(&self) -> Duration {
        Duration::from_secs(self.repair_retrigger_delay_minutes.max(1) * 60)
    }
}

/// Location of the on-disk metadata tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Root of the tree holding one serialized record per virtual path.
    /// The quarantine tree lives beside it.
    pub root_path: PathBuf,
    /// When a tracked file leaves the library, also remove the NZB the
    /// record was imported from.
    pub delete_source_nzb_on_removal: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/altmount/metadata"),
            delete_source_nzb_on_removal: false,
        }
    }
}

/// Import pipeline settings consumed by the repair path resolution.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ImportConfig {
    /// Directory imported files are linked under; preferred over
    /// `mount_path` when resolving the ARR-visible path.
    pub import_dir: Option<PathBuf>,
}

/// SABnzbd emulation settings. Only the category directories matter to the
/// core: they are protected from empty-directory cleanup.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SabnzbdConfig {
    pub complete_dir: Option<PathBuf>,
    pub categories: Vec<SabnzbdCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SabnzbdCategory {
    pub name: String,
    pub dir: Option<String>,
}

/// The media managers that own content policy for parts of the library.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ArrsConfig {
    pub instances: Vec<ArrInstanceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrKind {
    #[default]
    Radarr,
    Sonarr,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArrInstanceConfig {
    pub name: String,
    pub kind: ArrKind,
    /// Base URL of the instance, e.g. `http://radarr:7878`.
    pub url: String,
    pub api_key: String,
    /// Library roots this instance manages. A rescan request is routed to
    /// the instance with the longest matching root prefix.
    pub root_folders: Vec<PathBuf>,
}

impl Default for ArrInstanceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: ArrKind::Radarr,
            url: String::new(),
            api_key: String::new(),
            root_folders: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$ALTMOUNT_CONFIG_PATH` (TOML file),
    /// 2) `altmount.toml` in the working directory,
    /// 3) defaults if neither is present.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("ALTMOUNT_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        let default_path = PathBuf::from("altmount.toml");
        if default_path.is_file() {
            let config = Self::load_from_file(&default_path)?;
            return Ok((config, ConfigSource::File(default_path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse_toml(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).map_err(|e| anyhow!(e))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.health.segment_sample_percentage == 0
            || self.health.segment_sample_percentage > 100
        {
            return Err(anyhow!(
                "health.segment_sample_percentage must be within 1..=100, got {}",
                self.health.segment_sample_percentage
            ));
        }
        if self.health.max_retries < 1 {
            return Err(anyhow!("health.max_retries must be at least 1"));
        }
        if self.health.max_repair_retries < 1 {
            return Err(anyhow!("health.max_repair_retries must be at least 1"));
        }
        for instance in &self.arrs.instances {
            url::Url::parse(&instance.url).with_context(|| {
                format!("invalid url for ARR instance {:?}", instance.name)
            })?;
        }
        Ok(())
    }

    /// Directory basenames the empty-directory cleanup must never remove:
    /// the SABnzbd completion dir plus every category dir.
    pub fn protected_directory_names(&self) -> Vec<String> {
        let mut protected = Vec::new();
        if let Some(complete) = &self.sabnzbd.complete_dir
            && let Some(name) = complete.file_name()
        {
            protected.push(name.to_string_lossy().into_owned());
        }
        for category in &self.sabnzbd.categories {
            match &category.dir {
                Some(dir) if !dir.is_empty() => protected.push(dir.clone()),
                _ if !category.name.is_empty() => {
                    protected.push(category.name.clone())
                }
                _ => {}
            }
        }
        protected.sort();
        protected.dedup();
        protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.health.enabled);
        assert_eq!(config.health.check_interval(), Duration::from_secs(300));
        assert_eq!(config.health.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::parse_toml(
            r#"
            mount_path = "/srv/media"

            [health]
            check_interval_seconds = 60
            verify_data = true

            [[sabnzbd.categories]]
            name = "movies"

            [[sabnzbd.categories]]
            name = "tv"
            dir = "series"
            "#,
        )
        .unwrap();

        assert_eq!(config.mount_path, PathBuf::from("/srv/media"));
        assert_eq!(config.health.check_interval_seconds, 60);
        assert!(config.health.verify_data);
        // Untouched sections keep their defaults.
        assert_eq!(config.health.max_concurrent_jobs, 5);
        assert_eq!(
            config.protected_directory_names(),
            vec!["movies".to_string(), "series".to_string()]
        );
    }

    #[test]
    fn loads_from_file_with_context_on_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("altmount.toml");
        fs::write(&path, "mount_path = \"/srv/media\"\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.mount_path, PathBuf::from("/srv/media"));

        let missing = dir.path().join("nope.toml");
        let err = Config::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn invalid_sample_percentage_is_rejected() {
        let config = Config::parse_toml(
            r#"
            [health]
            segment_sample_percentage = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_arr_url_is_rejected() {
        let config = Config::parse_toml(
            r#"
            [[arrs.instances]]
            name = "radarr"
            url = "not a url"
            api_key = "key"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
