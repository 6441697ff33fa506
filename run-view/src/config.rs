//! Client configuration from the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REPLAY_COMMAND: &str =
    "uv run apps/service/replay.py --thread {thread_id} --seed 42";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub stream_base: String,
    pub http_timeout: Duration,
    /// `{thread_id}` is substituted when rendering
    pub replay_command: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }
}

impl ClientConfig {
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            stream_base: http_to_ws_url(&api_base),
            api_base,
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            replay_command: DEFAULT_REPLAY_COMMAND.to_string(),
        }
    }

    /// Read `RUN_VIEW_*` variables. Call [`load_env_file`] first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_base = lookup("RUN_VIEW_API_BASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let mut config = Self::with_api_base(api_base);

        if let Some(stream_base) = lookup("RUN_VIEW_STREAM_BASE").filter(|v| !v.trim().is_empty()) {
            config.stream_base = stream_base.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup("RUN_VIEW_HTTP_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.http_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(
                    value = %raw,
                    default_ms = DEFAULT_HTTP_TIMEOUT_MS,
                    "Invalid RUN_VIEW_HTTP_TIMEOUT_MS; using default"
                ),
            }
        }

        if let Some(template) = lookup("RUN_VIEW_REPLAY_COMMAND").filter(|v| !v.trim().is_empty()) {
            config.replay_command = template;
        }

        config
    }

    pub fn render_replay_command(&self, thread_id: &str) -> String {
        render_replay_command(&self.replay_command, thread_id)
    }
}

pub fn render_replay_command(template: &str, thread_id: &str) -> String {
    template.replace("{thread_id}", thread_id)
}

pub fn http_to_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if http_url.starts_with("ws://") || http_url.starts_with("wss://") {
        http_url.to_string()
    } else {
        format!("ws://{http_url}")
    }
}

/// Nearest `.env` in `start` or one of its ancestors.
pub fn find_env_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

/// Load the nearest `.env` above `start` into the process environment.
///
/// Variables already set win over the file. Returns the file that was loaded.
pub fn load_env_from(start: &Path) -> Option<PathBuf> {
    let path = find_env_file(start)?;
    match dotenvy::from_path(&path) {
        Ok(()) => Some(path),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Ignoring unreadable .env file");
            None
        }
    }
}

/// [`load_env_from`] the working directory.
pub fn load_env_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|err| tracing::warn!(error = %err, "No working directory for .env lookup"))
        .ok()?;
    load_env_from(&cwd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.api_base, "http://localhost:8000");
        assert_eq!(config.stream_base, "ws://localhost:8000");
        assert_eq!(config.http_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_stream_base_follows_https() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("RUN_VIEW_API_BASE", "https://ops.example/")]));
        assert_eq!(config.api_base, "https://ops.example");
        assert_eq!(config.stream_base, "wss://ops.example");
    }

    #[test]
    fn test_explicit_stream_base_and_bad_timeout() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("RUN_VIEW_STREAM_BASE", "ws://stream:9000"),
            ("RUN_VIEW_HTTP_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(config.stream_base, "ws://stream:9000");
        assert_eq!(config.http_timeout, Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS));
    }

    #[test]
    fn test_replay_command_rendering() {
        let config = ClientConfig::from_lookup(lookup_from(&[(
            "RUN_VIEW_REPLAY_COMMAND",
            "replay --thread {thread_id}",
        )]));
        assert_eq!(config.render_replay_command("ci_flake"), "replay --thread ci_flake");
    }

    #[test]
    fn test_http_to_ws_url() {
        assert_eq!(http_to_ws_url("http://a:1"), "ws://a:1");
        assert_eq!(http_to_ws_url("https://a"), "wss://a");
        assert_eq!(http_to_ws_url("wss://a"), "wss://a");
        assert_eq!(http_to_ws_url("a:1"), "ws://a:1");
    }

    #[test]
    fn test_env_file_found_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("apps").join("service");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.path().join(".env"),
            "RUN_VIEW_ENV_FILE_MARKER=from-ancestor\n",
        )
        .unwrap();

        let loaded = load_env_from(&nested);
        assert_eq!(loaded, Some(root.path().join(".env")));
        assert_eq!(
            std::env::var("RUN_VIEW_ENV_FILE_MARKER").as_deref(),
            Ok("from-ancestor")
        );
    }

    #[test]
    fn test_nearest_env_file_wins() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("service");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join(".env"), "A=1\n").unwrap();
        std::fs::write(nested.join(".env"), "A=2\n").unwrap();

        assert_eq!(find_env_file(&nested), Some(nested.join(".env")));
        assert_eq!(find_env_file(root.path()), Some(root.path().join(".env")));
    }

    #[test]
    fn test_env_directory_is_not_a_file() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("inner").join(".env")).unwrap();
        std::fs::write(root.path().join(".env"), "A=1\n").unwrap();

        let inner = root.path().join("inner");
        assert_eq!(find_env_file(&inner), Some(root.path().join(".env")));
    }
}
