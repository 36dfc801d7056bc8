//! Module parameters.
//!
//! The host passes string parameters to a module at init. They are parsed
//! once into typed configs so bad values fail init instead of a later step.

use std::path::PathBuf;

use directories::ProjectDirs;
use pblog_core::topics::split_topics;

use crate::error::ModuleError;
use crate::host::InitHelper;

/// Output directory for new logs
pub const PARAM_LOG_FOLDER: &str = "log-folder";
/// Log to replay
pub const PARAM_LOG_FILE: &str = "log-file";
/// `||` separated topic list
pub const PARAM_CHANNELS: &str = "channels";
/// 1 to wait for the post-processing command, 0 to detach it
pub const PARAM_SYNC: &str = "sync";
/// Command run on a finished, non-empty log
pub const PARAM_POST_SCRIPT: &str = "post-script";
/// Queue capacity override
pub const PARAM_QUEUE_SIZE: &str = "queue-size";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tadsim", "tadsim")
}

/// Where logs go when `log-folder` is not set
pub fn default_log_folder() -> PathBuf {
    match get_project_dirs() {
        Some(dirs) => dirs.data_dir().join("sim_data").join("pblog"),
        None => PathBuf::from("pblog"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub log_folder: PathBuf,
    /// Topics to record; `None` records the built-in topic set
    pub channels: Option<Vec<String>>,
    pub post_script: Option<String>,
    /// Block in stop until the post-processing command exits
    pub sync: bool,
    pub queue_size: Option<usize>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_folder: default_log_folder(),
            channels: None,
            post_script: None,
            sync: false,
            queue_size: None,
        }
    }
}

impl RecorderConfig {
    pub fn from_host(helper: &dyn InitHelper) -> Result<Self, ModuleError> {
        let mut config = RecorderConfig::default();

        if let Some(folder) = parameter(helper, PARAM_LOG_FOLDER) {
            config.log_folder = PathBuf::from(folder);
        }
        config.channels = parameter(helper, PARAM_CHANNELS).and_then(|c| parse_channels(&c));
        config.post_script = parameter(helper, PARAM_POST_SCRIPT);
        if let Some(sync) = parameter(helper, PARAM_SYNC) {
            config.sync = parse_bool(PARAM_SYNC, &sync)?;
        }
        if let Some(size) = parameter(helper, PARAM_QUEUE_SIZE) {
            config.queue_size = Some(parse_queue_size(&size)?);
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    pub log_file: PathBuf,
    /// Topics to play back; `None` plays every recorded topic
    pub channels: Option<Vec<String>>,
    pub queue_size: Option<usize>,
}

impl PlayerConfig {
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            channels: None,
            queue_size: None,
        }
    }

    pub fn from_host(helper: &dyn InitHelper) -> Result<Self, ModuleError> {
        let log_file = parameter(helper, PARAM_LOG_FILE)
            .ok_or(ModuleError::MissingParameter(PARAM_LOG_FILE))?;

        let mut config = PlayerConfig::new(log_file);
        config.channels = parameter(helper, PARAM_CHANNELS).and_then(|c| parse_channels(&c));
        if let Some(size) = parameter(helper, PARAM_QUEUE_SIZE) {
            config.queue_size = Some(parse_queue_size(&size)?);
        }

        Ok(config)
    }
}

/// Parameter value with surrounding whitespace removed, blanks treated as unset
fn parameter(helper: &dyn InitHelper, name: &str) -> Option<String> {
    helper
        .get_parameter(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_channels(value: &str) -> Option<Vec<String>> {
    let channels = split_topics(value);
    if channels.is_empty() {
        None
    } else {
        Some(channels)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ModuleError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ModuleError::InvalidParameter {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_queue_size(value: &str) -> Result<usize, ModuleError> {
    match value.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ModuleError::InvalidParameter {
            key: PARAM_QUEUE_SIZE,
            value: value.to_string(),
        }),
    }
}
