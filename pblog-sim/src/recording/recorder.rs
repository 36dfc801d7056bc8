//! Recorder - subscribes to simulation topics and writes them to a .pblog file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use pblog_core::topics::{
    group_channel, join_topics, union_suffix, SCENARIO_INFO, SETTING_INFO, TOPIC_LIST,
    VEHICLE_GEOMETRY,
};
use pblog_core::{Event, TopicTable, DEFAULT_TOPICS};

use crate::config::RecorderConfig;
use crate::error::ModuleError;
use crate::host::{InitHelper, ResetHelper, SimModule, StepHelper};
use crate::queue::{EventChannel, QueueStats, WriteQueue, WRITE_QUEUE_CAPACITY};

use super::bootstrap::scenario_info_payload;
use super::manager::LogManager;
use super::post_process::PostProcess;
use super::union::UnionPayload;

/// One log file, from reset to stop
struct RecordingSession {
    path: PathBuf,
    queue: WriteQueue,
    /// Any non-bootstrap event was queued
    data_logged: bool,
    events: u64,
    skipped_entries: u64,
    first_data_ms: Option<i64>,
    last_data_ms: i64,
}

impl RecordingSession {
    fn new(path: PathBuf, queue: WriteQueue) -> Self {
        Self {
            path,
            queue,
            data_logged: false,
            events: 0,
            skipped_entries: 0,
            first_data_ms: None,
            last_data_ms: 0,
        }
    }

    fn bootstrap(&mut self, channel: &str, payload: Vec<u8>) -> Result<(), ModuleError> {
        self.queue.enqueue(Event::new(channel, payload, 0)?);
        Ok(())
    }

    fn log(&mut self, channel: &str, payload: Vec<u8>, timestamp_ms: i64) {
        match Event::new(channel, payload, timestamp_ms.saturating_mul(1000)) {
            Ok(event) => {
                self.queue.enqueue(event);
                self.data_logged = true;
                self.events += 1;
                self.first_data_ms.get_or_insert(timestamp_ms);
                self.last_data_ms = timestamp_ms;
            }
            Err(e) => warn!("Not logging message on '{}': {}", channel, e),
        }
    }
}

/// Records every configured topic to one log per scenario run.
///
/// Bare ego topic names (see [`TopicTable`]) are recorded in their union
/// form: the union channel itself is logged with an empty payload as a
/// marker, followed by one record per ego group on `<group>/<topic>`.
pub struct Recorder {
    topics: &'static TopicTable,
    config: Option<RecorderConfig>,
    manager: Option<LogManager>,
    /// Resolved topic names, in recording order
    channels: Vec<String>,
    session: Option<RecordingSession>,
    last_log: Option<PathBuf>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::with_topics(&DEFAULT_TOPICS)
    }

    pub fn with_topics(topics: &'static TopicTable) -> Self {
        Self {
            topics,
            config: None,
            manager: None,
            channels: Vec::new(),
            session: None,
            last_log: None,
        }
    }

    /// Topics this recorder subscribes to
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// File being written by the running session
    pub fn output_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    /// Most recent log that was closed with data in it
    pub fn last_log(&self) -> Option<&Path> {
        self.last_log.as_deref()
    }

    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.session.as_ref().map(|s| s.queue.stats())
    }

    /// Close the running session: delete the file if nothing but bootstrap
    /// records went in, otherwise hand it to post-processing.
    fn finish_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let stats = session.queue.clear();

        if !session.data_logged {
            info!(
                "No data recorded, removing empty log {}",
                session.path.display()
            );
            if let Err(e) = fs::remove_file(&session.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", session.path.display(), e);
                }
            }
            return;
        }

        info!(
            "Recording finished: {} events ({} written, {} dropped, {} union entries skipped) in {}",
            session.events,
            stats.processed,
            stats.dropped,
            session.skipped_entries,
            session.path.display()
        );

        if let Some(template) = self.config.as_ref().and_then(|c| c.post_script.as_ref()) {
            let sync = self.config.as_ref().is_some_and(|c| c.sync);
            PostProcess::new(template.as_str(), sync).run(
                &session.path,
                session.first_data_ms.unwrap_or(0),
                session.last_data_ms,
            );
        }
        self.last_log = Some(session.path);
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModule for Recorder {
    fn init(&mut self, helper: &mut dyn InitHelper) -> Result<(), ModuleError> {
        let config = RecorderConfig::from_host(helper)?;

        self.channels = match &config.channels {
            Some(channels) => self.topics.resolve_all(channels),
            None => self.topics.default_channels(),
        };
        for channel in &self.channels {
            helper.subscribe(channel);
        }

        info!(
            "Recording {} topics to {}",
            self.channels.len(),
            config.log_folder.display()
        );
        debug!("Recorded topics: {}", join_topics(&self.channels));

        self.manager = Some(LogManager::with_base_dir(config.log_folder.clone()));
        self.config = Some(config);
        Ok(())
    }

    fn reset(&mut self, helper: &mut dyn ResetHelper) -> Result<(), ModuleError> {
        self.finish_session();

        let (Some(config), Some(manager)) = (self.config.as_ref(), self.manager.as_ref()) else {
            return Err(ModuleError::NotInitialized);
        };

        let stem = Path::new(helper.scenario_path())
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
        let path = manager.log_path(&manager.generate_filename(stem.as_deref()));
        let queue = WriteQueue::create(&path, config.queue_size.unwrap_or(WRITE_QUEUE_CAPACITY));
        info!(
            "Recording scenario '{}' to {}",
            helper.scenario_path(),
            path.display()
        );

        let mut session = RecordingSession::new(path, queue);
        let scenario_info =
            scenario_info_payload(helper.scenario_path(), helper.ego_groups(), helper.scene())?;
        session.bootstrap(SCENARIO_INFO, scenario_info)?;
        session.bootstrap(TOPIC_LIST, join_topics(&self.channels).into_bytes())?;
        session.bootstrap(SETTING_INFO, helper.setting().to_vec())?;
        session.bootstrap(VEHICLE_GEOMETRY, helper.vehicle_geometry().to_vec())?;

        self.session = Some(session);
        Ok(())
    }

    fn step(&mut self, helper: &mut dyn StepHelper) -> Result<(), ModuleError> {
        let session = self.session.as_mut().ok_or(ModuleError::NotReset)?;
        let now_ms = helper.timestamp();

        for channel in &self.channels {
            let Some(payload) = helper.get_subscribed_message(channel) else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }

            let Some(suffix) = union_suffix(channel) else {
                session.log(channel, payload.to_vec(), now_ms);
                continue;
            };

            session.log(channel, Vec::new(), now_ms);
            let union = UnionPayload::decode(payload);
            if !union.is_clean() {
                warn!(
                    "Union payload on '{}' at {} ms: {} entries skipped{}",
                    channel,
                    now_ms,
                    union.skipped,
                    if union.truncated { ", payload truncated" } else { "" }
                );
                session.skipped_entries += union.skipped as u64;
            }
            for pair in union.messages {
                session.log(&group_channel(&pair.groupname, suffix), pair.content, now_ms);
            }
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        self.finish_session();
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.finish_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PARAM_CHANNELS, PARAM_LOG_FOLDER};
    use crate::host::MemoryHost;
    use crate::protos::pblog::{MsgPair, Union};
    use crate::recording::bootstrap::parse_scenario_info;
    use pblog_core::codec;
    use protobuf::Message;
    use std::fs::File;
    use std::io::BufReader;
    use tempfile::TempDir;

    fn host(dir: &Path, channels: &str) -> MemoryHost {
        MemoryHost::new()
            .with_parameter(PARAM_LOG_FOLDER, dir.display().to_string())
            .with_parameter(PARAM_CHANNELS, channels)
            .with_scenario("/scenarios/cut_in.sim", &["EgoGroup_1", "EgoGroup_2"])
            .with_setting(b"setting".to_vec())
            .with_vehicle_geometry(b"geometry".to_vec())
    }

    fn union_payload(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut union = Union::new();
        for (group, content) in entries {
            let mut pair = MsgPair::new();
            pair.groupname = group.to_string();
            pair.content = content.to_vec();
            union.messages.push(pair);
        }
        union.write_to_bytes().unwrap()
    }

    fn read_log(path: &Path) -> Vec<Event> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let mut events = Vec::new();
        while let Some(event) = codec::read_event(&mut reader).unwrap() {
            events.push(event);
        }
        events
    }

    fn data_events(path: &Path) -> Vec<(String, Vec<u8>, i64)> {
        read_log(path)
            .into_iter()
            .skip(4)
            .map(Event::into_parts)
            .collect()
    }

    #[test]
    fn test_subscribes_resolved_topics() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "LOCATION||TRAFFIC||EgoUnion/LOCATION");
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        assert_eq!(recorder.channels(), &["EgoUnion/LOCATION", "TRAFFIC"]);
        assert_eq!(host.subscriptions(), &["EgoUnion/LOCATION", "TRAFFIC"]);
    }

    #[test]
    fn test_default_topics() {
        let temp = TempDir::new().unwrap();
        let mut host =
            MemoryHost::new().with_parameter(PARAM_LOG_FOLDER, temp.path().display().to_string());
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        assert_eq!(recorder.channels(), DEFAULT_TOPICS.default_channels().as_slice());
    }

    #[test]
    fn test_bootstrap_then_data() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "LOCATION||TRAFFIC");
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let path = recorder.output_path().unwrap().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("cut_in_"));

        host.set_timestamp(500);
        host.set_message("TRAFFIC", b"cars".to_vec());
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();

        let events = read_log(&path);
        let channels: Vec<&str> = events.iter().map(|e| e.channel()).collect();
        assert_eq!(
            channels,
            vec![SCENARIO_INFO, TOPIC_LIST, SETTING_INFO, VEHICLE_GEOMETRY, "TRAFFIC"]
        );
        assert!(events[..4].iter().all(|e| e.timestamp_us() == 0));
        assert_eq!(events[1].payload(), b"EgoUnion/LOCATION||TRAFFIC");
        assert_eq!(events[2].payload(), b"setting");
        assert_eq!(events[3].payload(), b"geometry");
        assert_eq!(events[4].payload(), b"cars");
        assert_eq!(events[4].timestamp_us(), 500_000);

        let info = parse_scenario_info(Some(&events[0])).unwrap();
        assert_eq!(info.scenario_path, "/scenarios/cut_in.sim");
        assert_eq!(info.ego_groups, vec!["EgoGroup_1", "EgoGroup_2"]);
        assert_eq!(recorder.last_log(), Some(path.as_path()));
    }

    #[test]
    fn test_union_fan_out() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "TRAJECTORY");
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let path = recorder.output_path().unwrap().to_path_buf();

        host.set_timestamp(20);
        host.set_message(
            "EgoUnion/TRAJECTORY",
            union_payload(&[("EgoGroup_1", b"A"), ("EgoGroup_2", b"B")]),
        );
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();

        assert_eq!(
            data_events(&path),
            vec![
                ("EgoUnion/TRAJECTORY".to_string(), Vec::new(), 20_000),
                ("EgoGroup_1/TRAJECTORY".to_string(), b"A".to_vec(), 20_000),
                ("EgoGroup_2/TRAJECTORY".to_string(), b"B".to_vec(), 20_000),
            ]
        );
    }

    #[test]
    fn test_malformed_union_entry_skipped() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "EgoUnion/LOCATION");
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let path = recorder.output_path().unwrap().to_path_buf();

        let mut payload = union_payload(&[("EgoGroup_1", b"A")]);
        payload.extend_from_slice(&[0x0A, 0x02, 0x12, 0x00]); // entry without a group name
        payload.extend(union_payload(&[("EgoGroup_2", b"B")]));
        host.set_message("EgoUnion/LOCATION", payload);
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();

        let channels: Vec<String> = data_events(&path).into_iter().map(|e| e.0).collect();
        assert_eq!(
            channels,
            vec!["EgoUnion/LOCATION", "EgoGroup_1/LOCATION", "EgoGroup_2/LOCATION"]
        );
    }

    #[test]
    fn test_empty_log_removed() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "TRAFFIC");
        let mut recorder = Recorder::new();

        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let path = recorder.output_path().unwrap().to_path_buf();

        // Empty payloads are not data
        host.set_message("TRAFFIC", Vec::new());
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();

        assert!(!path.exists());
        assert!(recorder.last_log().is_none());
    }

    #[test]
    fn test_reset_starts_new_log() {
        let temp = TempDir::new().unwrap();
        let mut host = host(temp.path(), "TRAFFIC");
        let mut recorder = Recorder::new();
        recorder.init(&mut host).unwrap();

        recorder.reset(&mut host).unwrap();
        let first = recorder.output_path().unwrap().to_path_buf();
        host.set_message("TRAFFIC", b"1".to_vec());
        recorder.step(&mut host).unwrap();

        recorder.reset(&mut host).unwrap();
        let second = recorder.output_path().unwrap().to_path_buf();
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();

        assert_ne!(first, second);
        assert_eq!(data_events(&first).len(), 1);
        assert_eq!(data_events(&second).len(), 1);
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut host = MemoryHost::new();
        let mut recorder = Recorder::new();
        assert!(matches!(recorder.step(&mut host), Err(ModuleError::NotReset)));
        assert!(matches!(
            recorder.reset(&mut host),
            Err(ModuleError::NotInitialized)
        ));
        assert!(recorder.stop().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_post_script_only_for_data() {
        use crate::config::{PARAM_POST_SCRIPT, PARAM_SYNC};

        let temp = TempDir::new().unwrap();
        let make_host = || {
            host(temp.path(), "TRAFFIC")
                .with_parameter(PARAM_POST_SCRIPT, "touch {pblog_path}.done")
                .with_parameter(PARAM_SYNC, "1")
        };

        let mut host = make_host();
        let mut recorder = Recorder::new();
        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let empty = recorder.output_path().unwrap().to_path_buf();
        recorder.stop().unwrap();
        assert!(!Path::new(&format!("{}.done", empty.display())).exists());

        let mut host = make_host();
        recorder.init(&mut host).unwrap();
        recorder.reset(&mut host).unwrap();
        let full = recorder.output_path().unwrap().to_path_buf();
        host.set_message("TRAFFIC", b"x".to_vec());
        recorder.step(&mut host).unwrap();
        recorder.stop().unwrap();
        assert!(Path::new(&format!("{}.done", full.display())).exists());
    }
}
