//! Runtime configuration.
//!
//! Every setting has a default and can be overridden through a
//! `TOMBSTONE_CASCADE_*` environment variable. Unparseable values fall back to
//! the default with a warning rather than aborting startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::cascade::{
    CascadeSettings, DEFAULT_BATCH_SIZE, DEFAULT_DELETE_CHUNK_SIZE, DEFAULT_RESCHEDULE_DELAY,
};
use crate::types::SiloMode;
use crate::worker::RetryConfig;

const ENV_PREFIX: &str = "TOMBSTONE_CASCADE_";

/// Default interval between `ScheduleAll` triggers per silo (1 minute).
const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 60;

const DEFAULT_REGISTRY_PATH: &str = "relations.json";
const DEFAULT_STATE_DIR: &str = "state";

/// Name of the watermark document inside the state directory.
pub const WATERMARK_FILE: &str = "watermarks.json";

/// Global switch that turns every `ScheduleAll` into a no-op.
///
/// Shared between the enumerator and the admin endpoint. Jobs already queued
/// still run; only new scheduling stops.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn new(engaged: bool) -> Self {
        KillSwitch(Arc::new(AtomicBool::new(engaged)))
    }

    pub fn is_engaged(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the switch, returning the previous value.
    pub fn set(&self, engaged: bool) -> bool {
        self.0.swap(engaged, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Maximum ids per window. `TOMBSTONE_CASCADE_BATCH_SIZE`.
    pub batch_size: u64,

    /// Rows per chunked delete. `TOMBSTONE_CASCADE_DELETE_CHUNK_SIZE`.
    pub delete_chunk_size: usize,

    /// `TOMBSTONE_CASCADE_RESCHEDULE_DELAY_SECS`.
    pub reschedule_delay: Duration,

    /// Interval between `ScheduleAll` triggers.
    /// `TOMBSTONE_CASCADE_SCHEDULE_INTERVAL_SECS`.
    pub schedule_interval: Duration,

    /// Initial kill switch state. `TOMBSTONE_CASCADE_KILL_SWITCH`.
    pub kill_switch: bool,

    /// Relation registry JSON. `TOMBSTONE_CASCADE_REGISTRY`.
    pub registry_path: PathBuf,

    /// Optional seed data for the in-memory backend.
    /// `TOMBSTONE_CASCADE_DATASET`.
    pub dataset_path: Option<PathBuf>,

    /// Directory holding the watermark document.
    /// `TOMBSTONE_CASCADE_STATE_DIR`.
    pub state_dir: PathBuf,

    /// `TOMBSTONE_CASCADE_BIND_ADDR`.
    pub bind_addr: SocketAddr,

    /// Silo modes this process schedules, comma separated.
    /// `TOMBSTONE_CASCADE_SILOS`.
    pub silos: Vec<SiloMode>,

    /// Redelivery policy for transient failures.
    /// `TOMBSTONE_CASCADE_MAX_RETRIES`.
    pub retry: RetryConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            delete_chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            reschedule_delay: DEFAULT_RESCHEDULE_DELAY,
            schedule_interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            kill_switch: false,
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            dataset_path: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            silos: SiloMode::ALL.to_vec(),
            retry: RetryConfig::DEFAULT,
        }
    }
}

impl CascadeConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which receives full variable
    /// names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };
        let defaults = Self::default();

        let batch_size = parse_or(get("BATCH_SIZE"), defaults.batch_size).max(1);
        let delete_chunk_size =
            parse_or(get("DELETE_CHUNK_SIZE"), defaults.delete_chunk_size).max(1);
        let reschedule_delay = Duration::from_secs(parse_or(
            get("RESCHEDULE_DELAY_SECS"),
            defaults.reschedule_delay.as_secs(),
        ));
        let schedule_interval = Duration::from_secs(
            parse_or(
                get("SCHEDULE_INTERVAL_SECS"),
                defaults.schedule_interval.as_secs(),
            )
            .max(1),
        );
        let kill_switch = get("KILL_SWITCH")
            .map(|(name, value)| parse_flag(&name, &value, defaults.kill_switch))
            .unwrap_or(defaults.kill_switch);
        let bind_addr = parse_or(get("BIND_ADDR"), defaults.bind_addr);
        let silos = get("SILOS")
            .map(|(name, value)| parse_silos(&name, &value))
            .unwrap_or(defaults.silos);
        let retry = RetryConfig {
            max_retries: parse_or(get("MAX_RETRIES"), defaults.retry.max_retries),
            ..defaults.retry
        };

        CascadeConfig {
            batch_size,
            delete_chunk_size,
            reschedule_delay,
            schedule_interval,
            kill_switch,
            registry_path: get("REGISTRY")
                .map(|(_, v)| PathBuf::from(v))
                .unwrap_or(defaults.registry_path),
            dataset_path: get("DATASET").map(|(_, v)| PathBuf::from(v)),
            state_dir: get("STATE_DIR")
                .map(|(_, v)| PathBuf::from(v))
                .unwrap_or(defaults.state_dir),
            bind_addr,
            silos,
            retry,
        }
    }

    pub fn cascade_settings(&self) -> CascadeSettings {
        CascadeSettings {
            batch_size: self.batch_size,
            delete_chunk_size: self.delete_chunk_size,
            reschedule_delay: self.reschedule_delay,
        }
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.state_dir.join(WATERMARK_FILE)
    }

    pub fn log_summary(&self) {
        info!(
            batch_size = self.batch_size,
            delete_chunk_size = self.delete_chunk_size,
            reschedule_delay_secs = self.reschedule_delay.as_secs(),
            schedule_interval_secs = self.schedule_interval.as_secs(),
            kill_switch = self.kill_switch,
            registry = %self.registry_path.display(),
            state_dir = %self.state_dir.display(),
            bind_addr = %self.bind_addr,
            silos = ?self.silos,
            "Loaded configuration"
        );
    }
}

fn parse_or<T: FromStr>(entry: Option<(String, String)>, default: T) -> T {
    let Some((name, value)) = entry else {
        return default;
    };
    match value.trim().parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(variable = %name, value = %value, "Invalid value, using default");
            default
        }
    }
}

fn parse_flag(name: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            warn!(variable = %name, value = %value, "Invalid flag, using default");
            default
        }
    }
}

/// Parses a comma-separated silo list, skipping unknown entries.
fn parse_silos(name: &str, value: &str) -> Vec<SiloMode> {
    let mut silos = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        match part.parse::<SiloMode>() {
            Ok(silo) if !silos.contains(&silo) => silos.push(silo),
            Ok(_) => {}
            Err(e) => warn!(variable = %name, error = %e, "Skipping unknown silo"),
        }
    }
    silos
}
