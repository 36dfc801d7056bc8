//! Log file manager.
//!
//! Handles naming of new logs, listing and summary extraction.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, error, warn};
use pblog_core::codec;
use pblog_core::topics::{is_bootstrap, SCENARIO_INFO, TOPIC_LIST};
use serde::Serialize;

use crate::config::default_log_folder;
use crate::error::{FormatError, ModuleError};

use super::bootstrap;

/// Extension of log files
pub const LOG_EXTENSION: &str = "pblog";

/// Summary of a log file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInfo {
    /// Filename (without path)
    pub filename: String,
    /// Full path to the file
    #[serde(skip_serializing)]
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// File modification time (Unix timestamp ms)
    pub modified_ms: u64,
    pub scenario_path: String,
    pub ego_groups: Vec<String>,
    /// Topics listed in the `Topic_List` record
    pub topics: Vec<String>,
    /// Number of records, bootstrap records included
    pub record_count: u64,
    /// Records per channel
    pub channels: BTreeMap<String, u64>,
    /// Simulation time of the first data record (µs)
    pub first_timestamp_us: Option<i64>,
    /// Simulation time of the last data record (µs)
    pub last_timestamp_us: Option<i64>,
    pub duration_ms: u64,
    /// False if the log ends in a partial or corrupt record
    pub complete: bool,
}

/// Manager for log files in one folder
pub struct LogManager {
    base_dir: PathBuf,
}

impl LogManager {
    /// Create a manager for the default log folder
    pub fn new() -> Self {
        Self::with_base_dir(default_log_folder())
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!(
                "Failed to create log directory {}: {}",
                base_dir.display(),
                e
            );
        } else {
            debug!("Log directory: {}", base_dir.display());
        }
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn log_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// Generate a unique filename for a new log
    pub fn generate_filename(&self, prefix: Option<&str>) -> String {
        let now = chrono::Local::now();
        let prefix = prefix.unwrap_or("scenario");
        let base_name = format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"));

        // Find a unique name
        let mut name = format!("{}.{}", base_name, LOG_EXTENSION);
        let mut counter = 1;
        while self.base_dir.join(&name).exists() {
            name = format!("{}_{}.{}", base_name, counter, LOG_EXTENSION);
            counter += 1;
        }

        name
    }

    /// All readable logs in the folder, newest first
    pub fn list_logs(&self) -> Vec<LogInfo> {
        let mut logs = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.base_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() || path.extension().map_or(true, |ext| ext != LOG_EXTENSION) {
                    continue;
                }
                match inspect(&path) {
                    Ok(info) => logs.push(info),
                    Err(e) => warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        logs.sort_by(|a, b| b.modified_ms.cmp(&a.modified_ms));
        logs
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a whole log and summarize it
pub fn inspect(path: &Path) -> Result<LogInfo, ModuleError> {
    let metadata = fs::metadata(path)?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut reader = BufReader::new(File::open(path)?);

    let first = codec::read_event(&mut reader)
        .ok()
        .flatten()
        .ok_or_else(|| FormatError::EmptyLog(path.to_path_buf()))?;
    let scenario = bootstrap::parse_scenario_info(Some(&first))?;
    let second = codec::read_event(&mut reader).ok().flatten();
    let topics = bootstrap::parse_topic_list(second.as_ref())?;

    let mut channels: BTreeMap<String, u64> = BTreeMap::new();
    channels.insert(SCENARIO_INFO.to_string(), 1);
    channels.insert(TOPIC_LIST.to_string(), 1);
    let mut record_count = 2;
    let mut first_timestamp_us = None;
    let mut last_timestamp_us = None;
    let mut complete = true;

    loop {
        match codec::read_event(&mut reader) {
            Ok(Some(event)) => {
                record_count += 1;
                *channels.entry(event.channel().to_string()).or_default() += 1;
                if !is_bootstrap(event.channel()) {
                    first_timestamp_us.get_or_insert(event.timestamp_us());
                    last_timestamp_us = Some(event.timestamp_us());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("{} ends in a bad record: {}", path.display(), e);
                complete = false;
                break;
            }
        }
    }

    let duration_ms = match (first_timestamp_us, last_timestamp_us) {
        (Some(first), Some(last)) => (last.saturating_sub(first).max(0) / 1000) as u64,
        _ => 0,
    };

    Ok(LogInfo {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: metadata.len(),
        modified_ms,
        ego_groups: bootstrap::roster(&scenario),
        scenario_path: scenario.scenario_path,
        topics,
        record_count,
        channels,
        first_timestamp_us,
        last_timestamp_us,
        duration_ms,
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pblog_core::topics::SETTING_INFO;
    use tempfile::TempDir;

    fn create_test_manager() -> (LogManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = LogManager::with_base_dir(temp_dir.path().to_path_buf());
        (manager, temp_dir)
    }

    fn record(channel: &str, payload: &[u8], timestamp_us: i64) -> Vec<u8> {
        codec::encode(channel, payload, timestamp_us).unwrap()
    }

    #[test]
    fn test_generate_filename() {
        let (manager, _temp) = create_test_manager();

        let name1 = manager.generate_filename(Some("highway"));
        assert!(name1.starts_with("highway_"));
        assert!(name1.ends_with(".pblog"));

        // Create the file
        fs::write(manager.log_path(&name1), b"test").unwrap();

        // Next name should be different (with counter)
        let name2 = manager.generate_filename(Some("highway"));
        assert_ne!(name1, name2);
    }

    #[test]
    fn test_list_empty_directory() {
        let (manager, _temp) = create_test_manager();
        assert!(manager.list_logs().is_empty());
    }

    #[test]
    fn test_inspect_log() {
        let (manager, _temp) = create_test_manager();
        let path = manager.log_path("run.pblog");
        let info = bootstrap::scenario_info_payload("a.sim", vec![], b"").unwrap();
        let bytes = [
            record(SCENARIO_INFO, &info, 0),
            record(TOPIC_LIST, b"TRAFFIC||EgoUnion/LOCATION", 0),
            record(SETTING_INFO, b"", 0),
            record("TRAFFIC", b"t1", 1_000_000),
            record("EgoUnion/LOCATION", b"", 1_000_000),
            record("Ego_001/LOCATION", b"l1", 1_000_000),
            record("TRAFFIC", b"t2", 3_500_000),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let logs = manager.list_logs();
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.filename, "run.pblog");
        assert_eq!(log.scenario_path, "a.sim");
        assert_eq!(log.ego_groups, vec!["Ego_001"]);
        assert_eq!(log.topics, vec!["TRAFFIC", "EgoUnion/LOCATION"]);
        assert_eq!(log.record_count, 7);
        assert_eq!(log.channels.get("TRAFFIC"), Some(&2));
        assert_eq!(log.channels.get(SCENARIO_INFO), Some(&1));
        assert_eq!(log.first_timestamp_us, Some(1_000_000));
        assert_eq!(log.duration_ms, 2500);
        assert!(log.complete);
    }

    #[test]
    fn test_invalid_logs_skipped() {
        let (manager, _temp) = create_test_manager();
        fs::write(manager.log_path("bad.pblog"), record(TOPIC_LIST, b"A", 0)).unwrap();
        fs::write(manager.log_path("empty.pblog"), b"").unwrap();
        fs::write(manager.log_path("notes.txt"), b"hello").unwrap();

        assert!(manager.list_logs().is_empty());
        assert!(matches!(
            inspect(&manager.log_path("empty.pblog")),
            Err(ModuleError::Format(FormatError::EmptyLog(_)))
        ));
    }
}
