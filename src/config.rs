//! Recognized configuration options (spec §6 "Configuration"), mirroring
//! the shape of `kv-cli::config::ConfigLoad` -- a plain serde struct with
//! a hand-written `Default`, all fields optional except `name`.

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Store-wide options. `name` is the only required field; everything else
/// defaults the way spec §6 documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Required store identifier, used to open/create the backend.
    pub name: String,

    pub pull_url: Option<String>,
    pub push_url: Option<String>,

    pub pull_auth: Option<String>,
    pub push_auth: Option<String>,

    /// Watchdog period for pulls, in milliseconds. `None` disables the watchdog.
    pub pull_interval_ms: Option<u64>,

    /// Debounce window before a push/pull dispatch, in milliseconds.
    #[serde(default = "default_push_delay_ms")]
    pub push_delay_ms: u64,

    /// Opaque string forwarded on every push/pull request.
    #[serde(default)]
    pub schema_version: String,

    /// Selects the in-memory backend instead of the durable one.
    #[serde(default)]
    pub use_memstore: bool,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Admission control: max concurrent in-flight sends per direction.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_push_delay_ms() -> u64 {
    10
}

fn default_max_connections() -> usize {
    3
}

impl Options {
    pub fn new(name: impl Into<String>) -> Self {
        Options {
            name: name.into(),
            pull_url: None,
            push_url: None,
            pull_auth: None,
            push_auth: None,
            pull_interval_ms: None,
            push_delay_ms: default_push_delay_ms(),
            schema_version: String::new(),
            use_memstore: false,
            log_level: LogLevel::default(),
            max_connections: default_max_connections(),
        }
    }

    pub fn memory(name: impl Into<String>) -> Self {
        let mut opts = Self::new(name);
        opts.use_memstore = true;
        opts
    }
}
