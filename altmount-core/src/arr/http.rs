use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use altmount_config::{ArrInstanceConfig, ArrKind, ConfigGetter};

use super::{ArrError, ArrService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-backed [`ArrService`] speaking the Radarr/Sonarr command API.
/// A rescan request is routed to the configured instance with the longest
/// root-folder prefix match on the rescan path.
#[derive(Clone)]
pub struct HttpArrService {
    client: reqwest::Client,
    config: ConfigGetter,
}

impl std::fmt::Debug for HttpArrService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances = (self.config)().arrs.instances.len();
        f.debug_struct("HttpArrService")
            .field("instances", &instances)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RescanCommand<'a> {
    name: &'a str,
    path: &'a str,
}

impl HttpArrService {
    pub fn new(config: ConfigGetter) -> Result<Self, ArrError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Longest root-folder prefix wins; ties are impossible because roots
    /// are distinct paths.
    fn route<'a>(
        instances: &'a [ArrInstanceConfig],
        rescan_path: &Path,
    ) -> Option<&'a ArrInstanceConfig> {
        instances
            .iter()
            .filter_map(|instance| {
                instance
                    .root_folders
                    .iter()
                    .filter(|root| rescan_path.starts_with(root))
                    .map(|root| root.as_os_str().len())
                    .max()
                    .map(|depth| (depth, instance))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, instance)| instance)
    }

    fn rescan_command_name(kind: ArrKind) -> &'static str {
        match kind {
            ArrKind::Radarr => "RescanMovie",
            ArrKind::Sonarr => "RescanSeries",
        }
    }
}

#[async_trait]
impl ArrService for HttpArrService {
    async fn trigger_file_rescan(
        &self,
        path_for_rescan: &str,
        relative_path: &str,
    ) -> Result<(), ArrError> {
        let config = (self.config)();
        let instance = Self::route(&config.arrs.instances, Path::new(path_for_rescan))
            .ok_or_else(|| ArrError::PathMatchFailed(path_for_rescan.to_string()))?;

        let url = format!(
            "{}/api/v3/command",
            instance.url.trim_end_matches('/')
        );
        let command = RescanCommand {
            name: Self::rescan_command_name(instance.kind),
            path: path_for_rescan,
        };

        debug!(
            "requesting rescan of {relative_path} via {} ({url})",
            instance.name
        );

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &instance.api_key)
            .json(&command)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!(
                    "rescan accepted by {} for {relative_path}",
                    instance.name
                );
                Ok(())
            }
            // The instance no longer tracks anything at this path.
            StatusCode::NOT_FOUND => {
                Err(ArrError::PathMatchFailed(path_for_rescan.to_string()))
            }
            // A competing release already satisfies the slot.
            StatusCode::CONFLICT => Err(ArrError::EpisodeAlreadySatisfied),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ArrError::Api(format!(
                    "{} returned {status}: {body}",
                    instance.name
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn instance(name: &str, roots: &[&str]) -> ArrInstanceConfig {
        ArrInstanceConfig {
            name: name.to_string(),
            kind: ArrKind::Radarr,
            url: format!("http://{name}:7878"),
            api_key: "key".to_string(),
            root_folders: roots.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn routes_to_longest_matching_root() {
        let instances = vec![
            instance("radarr", &["/media"]),
            instance("radarr4k", &["/media/movies-4k"]),
        ];

        let matched =
            HttpArrService::route(&instances, Path::new("/media/movies-4k/film.mkv"))
                .unwrap();
        assert_eq!(matched.name, "radarr4k");

        let matched =
            HttpArrService::route(&instances, Path::new("/media/tv/show.mkv")).unwrap();
        assert_eq!(matched.name, "radarr");

        assert!(HttpArrService::route(&instances, Path::new("/other/x.mkv")).is_none());
    }
}
