/// Adapter configuration
///
/// All timings are bounded waits on the GDB subprocess. Durations are
/// (de)serialised as whole milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{DebuggerError, Result};

/// Names watched automatically on every stop when auto-watch is on
pub const DEFAULT_AUTO_WATCH_NAMES: &[&str] = &[
    "i", "j", "k", "n", "size", "count", "index", "result", "temp", "data",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Debugger executable, looked up on `PATH` when not absolute
    pub gdb_path: String,
    #[serde(with = "millis")]
    pub probe_timeout: Duration,
    #[serde(with = "millis")]
    pub init_timeout: Duration,
    #[serde(with = "millis")]
    pub command_timeout: Duration,
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    /// Pause between a stop and the variable/stack refresh
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    pub auto_watch: bool,
    pub auto_watch_names: Vec<String>,
    /// Eager children per container/array before the "more elements" trailer
    pub max_children: usize,
    /// Diagnostic output buffer size in bytes
    pub output_buffer_limit: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            probe_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(300),
            auto_watch: true,
            auto_watch_names: DEFAULT_AUTO_WATCH_NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            max_children: 100,
            output_buffer_limit: 64 * 1024,
        }
    }
}

impl AdapterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DebuggerError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DebuggerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn with_gdb_path(mut self, gdb_path: impl Into<String>) -> Self {
        self.gdb_path = gdb_path.into();
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.gdb_path, "gdb");
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.settle_delay, Duration::from_millis(300));
        assert_eq!(config.auto_watch_names.len(), 10);
        assert_eq!(config.max_children, 100);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            AdapterConfig::from_json(r#"{"gdb_path":"/usr/bin/gdb","settle_delay":50}"#).unwrap();
        assert_eq!(config.gdb_path, "/usr/bin/gdb");
        assert_eq!(config.settle_delay, Duration::from_millis(50));
        assert_eq!(config.init_timeout, Duration::from_secs(10));
        assert!(config.auto_watch);
    }

    #[test]
    fn test_json_round_trip() {
        let config = AdapterConfig::default().with_gdb_path("gdb-multiarch");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"command_timeout\":10000"));
        assert_eq!(AdapterConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            AdapterConfig::from_json("{\"max_children\":\"many\"}"),
            Err(DebuggerError::Config(_))
        ));
    }
}
