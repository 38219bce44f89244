use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read once from `GAMEBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Compact the WAL on startup once it holds this many events (0 = never).
    pub compact_threshold: u64,
    pub users_file: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            users_file: None,
            request_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.parse::<u64>().ok());

        Self {
            bind: lookup("GAMEBOOK_BIND").unwrap_or(defaults.bind),
            port: lookup("GAMEBOOK_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("GAMEBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("GAMEBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: number("GAMEBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            users_file: lookup("GAMEBOOK_USERS_FILE").map(PathBuf::from),
            request_timeout: number("GAMEBOOK_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("gamebook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/gamebook.wal"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("GAMEBOOK_PORT", "9000"),
            ("GAMEBOOK_METRICS_PORT", "9100"),
            ("GAMEBOOK_DATA_DIR", "/var/lib/gamebook"),
            ("GAMEBOOK_REQUEST_TIMEOUT_MS", "250"),
            ("GAMEBOOK_USERS_FILE", "users.json"),
        ]));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/gamebook/gamebook.wal"));
        assert_eq!(cfg.request_timeout, Duration::from_millis(250));
        assert_eq!(cfg.users_file, Some(PathBuf::from("users.json")));
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("GAMEBOOK_PORT", "eighty"),
            ("GAMEBOOK_COMPACT_THRESHOLD", "-1"),
            ("GAMEBOOK_METRICS_PORT", "nope"),
        ]));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
    }
}
