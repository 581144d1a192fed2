use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::JobFlow;
use tracing::warn;
use url::Url;

use crate::{error::SettingsError, poller::PollPolicy};

pub const DEFAULT_SETTINGS_FILE: &str = "jobctl.toml";
/// Lower bound applied to `poll_interval_ms`.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub finetune_path: String,
    pub convert_path: String,
    pub status_path: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_consecutive_poll_failures: u32,
    pub terminal_marker: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            finetune_path: "/finetune".into(),
            convert_path: "/convert".into(),
            status_path: "/status".into(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            max_consecutive_poll_failures: 5,
            terminal_marker: "Download".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    finetune_path: Option<String>,
    convert_path: Option<String>,
    status_path: Option<String>,
    request_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    max_consecutive_poll_failures: Option<u32>,
    terminal_marker: Option<String>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS)),
            max_consecutive_failures: self.max_consecutive_poll_failures.max(1),
            terminal_marker: self.terminal_marker.clone(),
        }
    }

    pub fn create_path(&self, flow: JobFlow) -> &str {
        match flow {
            JobFlow::FineTune => &self.finetune_path,
            JobFlow::EbookConversion => &self.convert_path,
        }
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, SettingsError> {
        let base = Url::parse(&self.server_url).map_err(|source| {
            SettingsError::InvalidServerUrl {
                url: self.server_url.clone(),
                source,
            }
        })?;
        base.join(path)
            .map_err(|source| SettingsError::InvalidEndpoint {
                url: self.server_url.clone(),
                path: path.to_string(),
                source,
            })
    }

    fn merge_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.server_url {
            self.server_url = v;
        }
        if let Some(v) = file_cfg.finetune_path {
            self.finetune_path = v;
        }
        if let Some(v) = file_cfg.convert_path {
            self.convert_path = v;
        }
        if let Some(v) = file_cfg.status_path {
            self.status_path = v;
        }
        if let Some(v) = file_cfg.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file_cfg.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.max_consecutive_poll_failures {
            self.max_consecutive_poll_failures = v;
        }
        if let Some(v) = file_cfg.terminal_marker {
            self.set_terminal_marker(v);
        }
    }

    fn set_terminal_marker(&mut self, marker: String) {
        // An empty marker would match every status line.
        if marker.is_empty() {
            warn!("config: ignoring empty terminal_marker");
            return;
        }
        self.terminal_marker = marker;
    }
}

/// Layers defaults, then the settings file, then the environment.
///
/// An explicit `path` must exist; otherwise `jobctl.toml` in the working
/// directory is used when present.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut settings = Settings::default();

    match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.display().to_string(),
                source,
            })?;
            settings.merge_file(parse_file_settings(&raw, path)?);
        }
        None => {
            let default_path = Path::new(DEFAULT_SETTINGS_FILE);
            if let Ok(raw) = fs::read_to_string(default_path) {
                settings.merge_file(parse_file_settings(&raw, default_path)?);
            }
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn parse_file_settings(raw: &str, path: &Path) -> Result<FileSettings, SettingsError> {
    toml::from_str::<FileSettings>(raw).map_err(|source| SettingsError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| {
        lookup(&format!("JOBCTL_{name}")).or_else(|| lookup(&format!("APP__{name}")))
    };

    if let Some(v) = get("SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = get("FINETUNE_PATH") {
        settings.finetune_path = v;
    }
    if let Some(v) = get("CONVERT_PATH") {
        settings.convert_path = v;
    }
    if let Some(v) = get("STATUS_PATH") {
        settings.status_path = v;
    }
    if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.request_timeout_secs = parsed,
            Err(_) => warn!(value = %v, "config: ignoring unparsable REQUEST_TIMEOUT_SECS"),
        }
    }
    if let Some(v) = get("POLL_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.poll_interval_ms = parsed,
            Err(_) => warn!(value = %v, "config: ignoring unparsable POLL_INTERVAL_MS"),
        }
    }
    if let Some(v) = get("MAX_CONSECUTIVE_POLL_FAILURES") {
        match v.parse::<u32>() {
            Ok(parsed) => settings.max_consecutive_poll_failures = parsed,
            Err(_) => warn!(
                value = %v,
                "config: ignoring unparsable MAX_CONSECUTIVE_POLL_FAILURES"
            ),
        }
    }
    if let Some(v) = get("TERMINAL_MARKER") {
        settings.set_terminal_marker(v);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn joins_endpoint_paths_onto_server_url() {
        let settings = Settings {
            server_url: "http://jobs.local:8080".into(),
            ..Settings::default()
        };
        assert_eq!(
            settings.endpoint(&settings.status_path).expect("url").as_str(),
            "http://jobs.local:8080/status"
        );
        assert_eq!(
            settings
                .endpoint(settings.create_path(JobFlow::EbookConversion))
                .expect("url")
                .as_str(),
            "http://jobs.local:8080/convert"
        );
    }

    #[test]
    fn rejects_unparsable_server_url() {
        let settings = Settings {
            server_url: "not a url".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.endpoint("/status"),
            Err(SettingsError::InvalidServerUrl { .. })
        ));
    }

    #[test]
    fn jobctl_prefix_wins_over_app_prefix() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("APP__SERVER_URL", "http://app.local"),
                ("JOBCTL_SERVER_URL", "http://jobctl.local"),
                ("APP__POLL_INTERVAL_MS", "250"),
            ]),
        );
        assert_eq!(settings.server_url, "http://jobctl.local");
        assert_eq!(settings.poll_interval_ms, 250);
    }

    #[test]
    fn ignores_unparsable_numbers_and_empty_marker() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("JOBCTL_REQUEST_TIMEOUT_SECS", "soon"),
                ("JOBCTL_TERMINAL_MARKER", ""),
            ]),
        );
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.terminal_marker, "Download");
    }

    #[test]
    fn poll_policy_never_allows_zero_failure_budget() {
        let settings = Settings {
            max_consecutive_poll_failures: 0,
            poll_interval_ms: 20,
            ..Settings::default()
        };
        let policy = settings.poll_policy();
        assert_eq!(policy.max_consecutive_failures, 1);
        assert_eq!(policy.interval, Duration::from_millis(20));
    }

    #[test]
    fn poll_policy_floors_zero_interval() {
        let settings = Settings {
            poll_interval_ms: 0,
            ..Settings::default()
        };
        assert_eq!(
            settings.poll_policy().interval,
            Duration::from_millis(MIN_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn loads_partial_settings_file() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("jobctl_settings_test_{suffix}.toml"));
        fs::write(
            &path,
            "server_url = \"http://file.local:9000\"\nmax_consecutive_poll_failures = 3\n",
        )
        .expect("write settings");

        let raw = fs::read_to_string(&path).expect("read back");
        let mut settings = Settings::default();
        settings.merge_file(parse_file_settings(&raw, &path).expect("parse"));

        assert_eq!(settings.server_url, "http://file.local:9000");
        assert_eq!(settings.max_consecutive_poll_failures, 3);
        assert_eq!(settings.status_path, "/status");

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn explicit_missing_settings_file_is_an_error() {
        let missing = env::temp_dir().join("jobctl_settings_definitely_missing.toml");
        assert!(matches!(
            load_settings(Some(&missing)),
            Err(SettingsError::Read { .. })
        ));
    }
}
