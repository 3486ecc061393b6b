use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `ROOMLEDGER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Journal appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub audit_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "roomledger".into(),
            max_connections: 256,
            compact_threshold: 1000,
            audit_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("ROOMLEDGER_{name}"));
        let defaults = Self::default();

        Self {
            port: parse(get("PORT")).unwrap_or(defaults.port),
            bind: get("BIND").unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("PASSWORD").unwrap_or(defaults.password),
            max_connections: parse(get("MAX_CONNECTIONS"))
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse(get("COMPACT_THRESHOLD")).unwrap_or(defaults.compact_threshold),
            audit_interval: parse(get("AUDIT_INTERVAL_SECS"))
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.audit_interval),
            metrics_port: parse(get("METRICS_PORT")),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.parse().ok())
}
