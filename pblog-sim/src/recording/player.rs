//! Player - reads a .pblog file and publishes it back in simulation time.

use std::time::Duration;

use log::{debug, info, warn};
use pblog_core::topics::{SETTING_INFO, VEHICLE_GEOMETRY};
use pblog_core::{Event, TopicTable, DEFAULT_TOPICS};

use crate::config::PlayerConfig;
use crate::error::{FormatError, ModuleError};
use crate::host::{InitHelper, ResetHelper, SimModule, StepHelper};
use crate::queue::{EventChannel, ReadQueue, READ_QUEUE_CAPACITY};

use super::bootstrap;

/// Consecutive empty polls after which the log is considered finished
pub const EMPTY_POLL_LIMIT: u32 = 4;

/// Wait between empty polls
const EMPTY_POLL_WAIT: Duration = Duration::from_millis(1);

/// How long reset waits for each bootstrap record
const BOOTSTRAP_WAIT: Duration = Duration::from_secs(2);

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Finished,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Finished => write!(f, "finished"),
        }
    }
}

/// Log time and simulation time of the first played event
#[derive(Debug, Clone, Copy)]
struct Anchor {
    log_us: i64,
    sim_us: i64,
}

struct PlaybackSession {
    queue: ReadQueue,
    scenario_path: String,
    roster: Vec<String>,
    recorded: Vec<String>,
    /// Channels published to the host, in declaration order
    outputs: Vec<String>,
    setting: Option<Vec<u8>>,
    vehicle_geometry: Option<Vec<u8>>,
    anchor: Option<Anchor>,
    empty_polls: u32,
    finished: bool,
    published: u64,
}

impl PlaybackSession {
    fn is_output(&self, channel: &str) -> bool {
        self.outputs.iter().any(|o| o == channel)
    }
}

/// Replays a log into a running simulation.
///
/// Events are published once the simulation has advanced at least as far
/// past its first played step as the event lies past the first played
/// event in the log. When the log runs dry the player asks the host to stop
/// the scenario, exactly once.
pub struct Player {
    topics: &'static TopicTable,
    config: Option<PlayerConfig>,
    session: Option<PlaybackSession>,
}

impl Player {
    pub fn new() -> Self {
        Self::with_topics(&DEFAULT_TOPICS)
    }

    pub fn with_topics(topics: &'static TopicTable) -> Self {
        Self {
            topics,
            config: None,
            session: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.session {
            None => PlaybackState::Idle,
            Some(session) if session.finished => PlaybackState::Finished,
            Some(_) => PlaybackState::Playing,
        }
    }

    /// Ego groups read from the log
    pub fn roster(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.roster.as_slice())
            .unwrap_or(&[])
    }

    /// Topics listed in the log's `Topic_List`
    pub fn recorded_topics(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.recorded.as_slice())
            .unwrap_or(&[])
    }

    /// Channels this player publishes
    pub fn outputs(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.outputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn scenario_path(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.scenario_path.as_str())
    }

    pub fn setting(&self) -> Option<&[u8]> {
        self.session.as_ref().and_then(|s| s.setting.as_deref())
    }

    pub fn vehicle_geometry(&self) -> Option<&[u8]> {
        self.session
            .as_ref()
            .and_then(|s| s.vehicle_geometry.as_deref())
    }

    pub fn published_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.published)
    }

    fn finish_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let stats = session.queue.clear();
            info!(
                "Playback of {} ended: {} events published, {} read",
                session.queue.path().display(),
                session.published,
                stats.processed
            );
        }
    }

    /// Expand the requested topics into the channels to publish
    fn playback_channels(
        &self,
        requested: &[String],
        recorded: &[String],
        roster: &[String],
    ) -> Vec<String> {
        let mut outputs: Vec<String> = Vec::new();
        for topic in requested {
            if !recorded.contains(&self.topics.resolve(topic)) && !recorded.contains(topic) {
                warn!(
                    "Topic '{}' is not in the log, nothing will be played on it",
                    topic
                );
            }
            for channel in self.topics.expand(topic, roster) {
                if !outputs.contains(&channel) {
                    outputs.push(channel);
                }
            }
        }
        outputs
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

/// Take the next record, waiting for the reader thread if needed
fn next_record(queue: &mut ReadQueue) -> Option<Event> {
    queue.wait(BOOTSTRAP_WAIT);
    queue.consume()
}

impl SimModule for Player {
    fn init(&mut self, helper: &mut dyn InitHelper) -> Result<(), ModuleError> {
        let config = PlayerConfig::from_host(helper)?;
        info!("Replaying {}", config.log_file.display());
        self.config = Some(config);
        Ok(())
    }

    fn reset(&mut self, helper: &mut dyn ResetHelper) -> Result<(), ModuleError> {
        self.finish_session();
        let config = self.config.as_ref().ok_or(ModuleError::NotInitialized)?;

        let mut queue = ReadQueue::open(
            &config.log_file,
            config.queue_size.unwrap_or(READ_QUEUE_CAPACITY),
        );

        let first = next_record(&mut queue)
            .ok_or_else(|| FormatError::EmptyLog(config.log_file.clone()))?;
        let scenario = bootstrap::parse_scenario_info(Some(&first))?;
        let roster = bootstrap::roster(&scenario);
        let recorded = bootstrap::parse_topic_list(next_record(&mut queue).as_ref())?;

        // Leading settings records share timestamp 0 and must not anchor playback
        let mut setting = None;
        let mut vehicle_geometry = None;
        while queue.wait(BOOTSTRAP_WAIT) {
            let channel = queue.peek().map(|e| e.channel().to_string());
            match channel.as_deref() {
                Some(SETTING_INFO) => setting = queue.consume().map(|e| e.into_parts().1),
                Some(VEHICLE_GEOMETRY) => {
                    vehicle_geometry = queue.consume().map(|e| e.into_parts().1)
                }
                _ => break,
            }
        }

        let requested = config.channels.as_ref().unwrap_or(&recorded);
        let outputs = self.playback_channels(requested, &recorded, &roster);
        for output in &outputs {
            helper.publish(output);
        }

        info!(
            "Replaying '{}' for ego groups [{}] on {} channels",
            scenario.scenario_path,
            roster.join(", "),
            outputs.len()
        );
        debug!("Playback channels: {}", outputs.join(", "));

        self.session = Some(PlaybackSession {
            queue,
            scenario_path: scenario.scenario_path,
            roster,
            recorded,
            outputs,
            setting,
            vehicle_geometry,
            anchor: None,
            empty_polls: 0,
            finished: false,
            published: 0,
        });
        Ok(())
    }

    fn step(&mut self, helper: &mut dyn StepHelper) -> Result<(), ModuleError> {
        let session = self.session.as_mut().ok_or(ModuleError::NotReset)?;
        if session.finished {
            return Ok(());
        }

        let sim_now_us = helper.timestamp().saturating_mul(1000);

        loop {
            let Some(timestamp_us) = session.queue.peek().map(Event::timestamp_us) else {
                session.empty_polls += 1;
                if session.empty_polls >= EMPTY_POLL_LIMIT {
                    session.finished = true;
                    info!(
                        "End of log after {} published events, stopping scenario",
                        session.published
                    );
                    helper.stop_scenario("log replay finished");
                    return Ok(());
                }
                session.queue.wait(EMPTY_POLL_WAIT);
                continue;
            };
            session.empty_polls = 0;

            let anchor = *session.anchor.get_or_insert(Anchor {
                log_us: timestamp_us,
                sim_us: sim_now_us,
            });
            let log_relative = timestamp_us.saturating_sub(anchor.log_us);
            let sim_relative = sim_now_us.saturating_sub(anchor.sim_us);
            if log_relative > sim_relative {
                break;
            }

            if let Some(event) = session.queue.consume() {
                if session.is_output(event.channel()) {
                    helper.publish_message(event.channel(), event.payload());
                    session.published += 1;
                }
            }
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        self.finish_session();
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.finish_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PARAM_CHANNELS, PARAM_LOG_FILE};
    use crate::host::MemoryHost;
    use pblog_core::codec;
    use pblog_core::topics::{SCENARIO_INFO, TOPIC_LIST};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn record(channel: &str, payload: &[u8], timestamp_us: i64) -> Vec<u8> {
        codec::encode(channel, payload, timestamp_us).unwrap()
    }

    fn header(ego_groups: &[&str], topics: &str) -> Vec<u8> {
        let groups = ego_groups.iter().map(|g| g.to_string()).collect();
        let info = bootstrap::scenario_info_payload("/scenarios/a.sim", groups, b"").unwrap();
        [record(SCENARIO_INFO, &info, 0), record(TOPIC_LIST, topics.as_bytes(), 0)].concat()
    }

    fn started(path: &Path, channels: Option<&str>) -> (Player, MemoryHost) {
        let mut host =
            MemoryHost::new().with_parameter(PARAM_LOG_FILE, path.display().to_string());
        if let Some(channels) = channels {
            host = host.with_parameter(PARAM_CHANNELS, channels);
        }
        let mut player = Player::new();
        player.init(&mut host).unwrap();
        player.reset(&mut host).unwrap();
        (player, host)
    }

    fn step_at(player: &mut Player, host: &mut MemoryHost, ms: i64) -> Vec<Vec<u8>> {
        host.set_timestamp(ms);
        player.step(host).unwrap();
        host.take_published().into_iter().map(|p| p.payload).collect()
    }

    #[test]
    fn test_pacing_follows_simulation_time() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [
            header(&[], "TRAFFIC"),
            record("TRAFFIC", b"a", 7_000_000),
            record("TRAFFIC", b"b", 7_100_000),
            record("TRAFFIC", b"c", 7_250_000),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, None);
        assert_eq!(player.state(), PlaybackState::Playing);

        let mut published_at = Vec::new();
        for step in 0..6 {
            let payloads = step_at(&mut player, &mut host, 1000 + step * 50);
            for payload in payloads {
                published_at.push((step, payload));
            }
        }
        assert_eq!(
            published_at,
            vec![(0, b"a".to_vec()), (2, b"b".to_vec()), (5, b"c".to_vec())]
        );
        // The last event drains the log, so the same step ends the scenario
        assert_eq!(host.stop_requests().len(), 1);
    }

    #[test]
    fn test_end_of_log_stops_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [header(&[], "TRAFFIC"), record("TRAFFIC", b"a", 0)].concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, None);
        assert_eq!(step_at(&mut player, &mut host, 0), vec![b"a".to_vec()]);
        assert_eq!(host.stop_requests().len(), 1);
        assert_eq!(player.state(), PlaybackState::Finished);

        for ms in [10, 20, 30] {
            assert!(step_at(&mut player, &mut host, ms).is_empty());
        }
        assert_eq!(host.stop_requests().len(), 1);
        assert_eq!(player.published_count(), 1);
    }

    #[test]
    fn test_union_topics_expand_per_group() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [
            header(&["EgoGroup_1", "EgoGroup_2"], "EgoUnion/TRAJECTORY||TRAFFIC"),
            record("EgoUnion/TRAJECTORY", b"", 0),
            record("EgoGroup_1/TRAJECTORY", b"A", 0),
            record("EgoGroup_2/TRAJECTORY", b"B", 0),
            record("TRAFFIC", b"T", 0),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, None);
        assert_eq!(player.roster(), &["EgoGroup_1", "EgoGroup_2"]);
        assert_eq!(
            host.outputs(),
            &["EgoGroup_1/TRAJECTORY", "EgoGroup_2/TRAJECTORY", "TRAFFIC"]
        );

        host.set_timestamp(0);
        player.step(&mut host).unwrap();
        let topics: Vec<String> = host.published().iter().map(|p| p.topic.clone()).collect();
        assert_eq!(
            topics,
            vec!["EgoGroup_1/TRAJECTORY", "EgoGroup_2/TRAJECTORY", "TRAFFIC"]
        );
    }

    #[test]
    fn test_channel_filter_and_default_roster() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [
            header(&[], "EgoUnion/LOCATION||TRAFFIC"),
            record("EgoUnion/LOCATION", b"", 0),
            record("Ego_001/LOCATION", b"L", 0),
            record("TRAFFIC", b"T", 0),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, Some("LOCATION"));
        assert_eq!(player.roster(), &["Ego_001"]);
        assert_eq!(player.outputs(), &["Ego_001/LOCATION"]);

        assert_eq!(step_at(&mut player, &mut host, 0), vec![b"L".to_vec()]);
    }

    #[test]
    fn test_leading_settings_do_not_anchor() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [
            header(&[], "TRAFFIC"),
            record(SETTING_INFO, b"setting", 0),
            record(VEHICLE_GEOMETRY, b"geometry", 0),
            record("TRAFFIC", b"a", 5_000_000),
            record("TRAFFIC", b"b", 5_040_000),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, None);
        assert_eq!(player.setting(), Some(&b"setting"[..]));
        assert_eq!(player.vehicle_geometry(), Some(&b"geometry"[..]));
        assert_eq!(player.scenario_path(), Some("/scenarios/a.sim"));

        assert_eq!(step_at(&mut player, &mut host, 100), vec![b"a".to_vec()]);
        assert_eq!(step_at(&mut player, &mut host, 140), vec![b"b".to_vec()]);
    }

    #[test]
    fn test_data_right_after_topic_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [
            header(&[], "TRAFFIC"),
            record("TRAFFIC", b"a", 3_000_000),
            record("TRAFFIC", b"b", 3_020_000),
        ]
        .concat();
        fs::write(&path, bytes).unwrap();

        let (mut player, mut host) = started(&path, None);
        assert_eq!(player.setting(), None);
        assert_eq!(player.vehicle_geometry(), None);
        assert_eq!(player.state(), PlaybackState::Playing);

        // The first data record anchors playback at the first step
        assert_eq!(step_at(&mut player, &mut host, 500), vec![b"a".to_vec()]);
        assert!(step_at(&mut player, &mut host, 510).is_empty());
        assert_eq!(step_at(&mut player, &mut host, 520), vec![b"b".to_vec()]);
        assert_eq!(player.published_count(), 2);
    }

    #[test]
    fn test_first_record_must_be_scenario_info() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let bytes = [record(TOPIC_LIST, b"TRAFFIC", 0), record("TRAFFIC", b"a", 0)].concat();
        fs::write(&path, bytes).unwrap();

        let mut host =
            MemoryHost::new().with_parameter(PARAM_LOG_FILE, path.display().to_string());
        let mut player = Player::new();
        player.init(&mut host).unwrap();

        for _ in 0..2 {
            match player.reset(&mut host) {
                Err(ModuleError::Format(FormatError::UnexpectedRecord { expected, found })) => {
                    assert_eq!(expected, SCENARIO_INFO);
                    assert_eq!(found, TOPIC_LIST);
                }
                other => panic!("unexpected reset result: {:?}", other),
            }
        }
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(host.outputs().is_empty());
    }

    #[test]
    fn test_second_record_must_be_topic_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.pblog");
        let info = bootstrap::scenario_info_payload("a.sim", vec![], b"").unwrap();
        let bytes = [record(SCENARIO_INFO, &info, 0), record("TRAFFIC", b"a", 0)].concat();
        fs::write(&path, bytes).unwrap();

        let mut host =
            MemoryHost::new().with_parameter(PARAM_LOG_FILE, path.display().to_string());
        let mut player = Player::new();
        player.init(&mut host).unwrap();
        assert!(matches!(
            player.reset(&mut host),
            Err(ModuleError::Format(FormatError::UnexpectedRecord {
                expected: TOPIC_LIST,
                ..
            }))
        ));
    }

    #[test]
    fn test_missing_log_fails_reset() {
        let temp = TempDir::new().unwrap();
        let mut host = MemoryHost::new()
            .with_parameter(PARAM_LOG_FILE, temp.path().join("nope.pblog").display().to_string());
        let mut player = Player::new();
        player.init(&mut host).unwrap();

        assert!(matches!(
            player.reset(&mut host),
            Err(ModuleError::Format(FormatError::EmptyLog(_)))
        ));
        assert!(matches!(player.step(&mut host), Err(ModuleError::NotReset)));
    }
}
