//! The metadata records at the start of every log.

use pblog_core::topics::{split_topics, DEFAULT_EGO_GROUP, SCENARIO_INFO, TOPIC_LIST};
use pblog_core::Event;
use protobuf::Message;

use crate::error::FormatError;
use crate::protos::pblog::ScenarioInfo;

/// Build the `Scenario_Info` payload
pub fn scenario_info_payload(
    scenario_path: &str,
    ego_groups: Vec<String>,
    scene: &[u8],
) -> Result<Vec<u8>, protobuf::Error> {
    let mut info = ScenarioInfo::new();
    info.scenario_path = scenario_path.to_string();
    info.ego_groups = ego_groups;
    info.scene = scene.to_vec();
    info.write_to_bytes()
}

/// Check that `event` is the record expected at this position
pub fn expect_record<'a>(
    event: Option<&'a Event>,
    expected: &'static str,
) -> Result<&'a Event, FormatError> {
    match event {
        Some(event) if event.channel() == expected => Ok(event),
        Some(event) => Err(FormatError::UnexpectedRecord {
            expected,
            found: event.channel().to_string(),
        }),
        None => Err(FormatError::UnexpectedRecord {
            expected,
            found: "end of log".to_string(),
        }),
    }
}

pub fn parse_scenario_info(event: Option<&Event>) -> Result<ScenarioInfo, FormatError> {
    let event = expect_record(event, SCENARIO_INFO)?;
    ScenarioInfo::parse_from_bytes(event.payload()).map_err(FormatError::ScenarioInfo)
}

pub fn parse_topic_list(event: Option<&Event>) -> Result<Vec<String>, FormatError> {
    let event = expect_record(event, TOPIC_LIST)?;
    let list = std::str::from_utf8(event.payload()).map_err(|_| FormatError::TopicListEncoding)?;
    Ok(split_topics(list))
}

/// Ego groups of a recorded scenario, defaulting to the single default group
pub fn roster(info: &ScenarioInfo) -> Vec<String> {
    let groups: Vec<String> = info
        .ego_groups
        .iter()
        .filter(|g| !g.is_empty())
        .cloned()
        .collect();
    if groups.is_empty() {
        vec![DEFAULT_EGO_GROUP.to_string()]
    } else {
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_info_roundtrip() {
        let payload =
            scenario_info_payload("/data/cut_in.sim", vec!["EgoGroup_1".into()], b"scene").unwrap();
        let event = Event::new(SCENARIO_INFO, payload, 0).unwrap();

        let info = parse_scenario_info(Some(&event)).unwrap();
        assert_eq!(info.scenario_path, "/data/cut_in.sim");
        assert_eq!(info.scene, b"scene".to_vec());
        assert_eq!(roster(&info), vec!["EgoGroup_1"]);
    }

    #[test]
    fn test_default_roster() {
        let info = ScenarioInfo::new();
        assert_eq!(roster(&info), vec![DEFAULT_EGO_GROUP]);
    }

    #[test]
    fn test_wrong_record() {
        let event = Event::new(TOPIC_LIST, b"A||B".to_vec(), 0).unwrap();
        match parse_scenario_info(Some(&event)) {
            Err(FormatError::UnexpectedRecord { expected, found }) => {
                assert_eq!(expected, SCENARIO_INFO);
                assert_eq!(found, TOPIC_LIST);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(parse_topic_list(Some(&event)).unwrap(), vec!["A", "B"]);
        assert!(parse_topic_list(None).is_err());
    }

    #[test]
    fn test_topic_list_encoding() {
        let event = Event::new(TOPIC_LIST, vec![0xFF, 0x00], 0).unwrap();
        assert!(matches!(
            parse_topic_list(Some(&event)),
            Err(FormatError::TopicListEncoding)
        ));
    }
}
