// src/config.rs
use serde::Deserialize;

pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_MAX_FETCH_ROWS: usize = 10_000;
pub const DEFAULT_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// One named connection target.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceDef {
    /// Logical kebab-case name, e.g. "anasa-db".
    pub name: String,
    /// Postgres connection URL.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DataSourceDef {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            max_connections: default_max_connections(),
        }
    }
}

/// What to do when a job is triggered while a run of the same job is still
/// in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Reject the new trigger: log-and-skip on the cron path, `JobBusy` on
    /// the manual path.
    #[default]
    Skip,
    /// Let runs of the same job overlap freely.
    Allow,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "allow" => Ok(OverlapPolicy::Allow),
            other => Err(format!("unknown overlap policy '{other}' (expected skip|allow)")),
        }
    }
}

/// Engine configuration, assembled by the embedding process and passed into
/// `Engine::new`. No global state: everything the engine needs rides in here.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Backs the scheduled_jobs / execution_history tables, and is also
    /// registered as a query target under its own logical name.
    pub primary: DataSourceDef,
    /// Additional named query targets.
    #[serde(default)]
    pub datasources: Vec<DataSourceDef>,
    /// Scheduling tick period, seconds. Ticks align to minute boundaries.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// IANA timezone the cron expressions are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Fetch cap for SELECT results. Rows beyond this are never pulled from
    /// the server.
    #[serde(default = "default_max_fetch_rows")]
    pub max_fetch_rows: usize,
    /// How many result rows are echoed to the log.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_fetch_rows() -> usize {
    DEFAULT_MAX_FETCH_ROWS
}

fn default_sample_rows() -> usize {
    DEFAULT_SAMPLE_ROWS
}

impl EngineConfig {
    pub fn new(primary: DataSourceDef) -> Self {
        Self {
            primary,
            datasources: Vec::new(),
            tick_secs: DEFAULT_TICK_SECS,
            timezone: default_timezone(),
            max_fetch_rows: DEFAULT_MAX_FETCH_ROWS,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            overlap: OverlapPolicy::default(),
        }
    }

    pub fn with_datasource(mut self, ds: DataSourceDef) -> Self {
        self.datasources.push(ds);
        self
    }
}
