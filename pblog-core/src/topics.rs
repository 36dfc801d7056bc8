//! Topic names and the rules for ego-scoped ("union") topics.
//!
//! A union topic carries one message per ego group in a single payload. On
//! the bus it is published as `EgoUnion/<suffix>`; in a log each group's
//! share is stored on its own channel `<group>/<suffix>`.

/// First record of every log: serialized scenario description
pub const SCENARIO_INFO: &str = "Scenario_Info";

/// Second record of every log: recorded topic names joined by [`TOPIC_SEPARATOR`]
pub const TOPIC_LIST: &str = "Topic_List";

/// Host setting blob, written right after the topic list
pub const SETTING_INFO: &str = "Setting_Info";

/// Vehicle geometry blob, last bootstrap record
pub const VEHICLE_GEOMETRY: &str = "VEHICLE_GEOMETRY";

/// Bootstrap channels in the order they are written
pub const BOOTSTRAP_CHANNELS: [&str; 4] = [SCENARIO_INFO, TOPIC_LIST, SETTING_INFO, VEHICLE_GEOMETRY];

pub const TOPIC_SEPARATOR: &str = "||";

/// Prefix marking a topic as union-scoped
pub const UNION_FLAG: &str = "EgoUnion/";

/// Roster used when a scenario does not name its ego groups
pub const DEFAULT_EGO_GROUP: &str = "Ego_001";

const EGO_TOPICS: &[&str] = &[
    "LOCATION",
    "TRAJECTORY",
    "VEHICLE_STATE",
    "CONTROL",
    "CONTROL_V2",
    "PLAN_STATUS",
    "LOCATION_TRAILER",
];

const GLOBAL_TOPICS: &[&str] = &[
    "TRAFFIC",
    "LANE_MARKS",
    "GRADING",
    "ENVIRONMENTAL",
    "PREDICTION",
    "TRAFFIC_BILLBOARD",
    "DEBUG_MESSAGE",
];

/// Built-in topic tables shared by the recorder and the player
pub static DEFAULT_TOPICS: TopicTable = TopicTable::new(EGO_TOPICS, GLOBAL_TOPICS);

/// Which bare topic names are implicitly ego-scoped, and which topics are
/// logged when no explicit list is configured.
#[derive(Debug, Clone, Copy)]
pub struct TopicTable {
    ego: &'static [&'static str],
    global: &'static [&'static str],
}

impl TopicTable {
    pub const fn new(ego: &'static [&'static str], global: &'static [&'static str]) -> Self {
        Self { ego, global }
    }

    /// True for bare names the host publishes per ego group
    pub fn is_ego_scoped(&self, topic: &str) -> bool {
        self.ego.iter().any(|t| *t == topic)
    }

    /// Map a configured topic name to the name used on the bus.
    ///
    /// `LOCATION` becomes `EgoUnion/LOCATION`; names that already carry the
    /// union prefix and global topics are returned unchanged.
    pub fn resolve(&self, topic: &str) -> String {
        if self.is_ego_scoped(topic) {
            format!("{}{}", UNION_FLAG, topic)
        } else {
            topic.to_string()
        }
    }

    /// Resolve every name, dropping duplicates but keeping first-seen order
    pub fn resolve_all<I, S>(&self, topics: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved: Vec<String> = Vec::new();
        for topic in topics {
            let name = self.resolve(topic.as_ref());
            if !resolved.contains(&name) {
                resolved.push(name);
            }
        }
        resolved
    }

    /// Topics logged when nothing is configured: ego topics, then global ones
    pub fn default_channels(&self) -> Vec<String> {
        self.resolve_all(self.ego.iter().chain(self.global.iter()))
    }

    /// Expand a recorded topic into the channels it was stored under.
    ///
    /// Union topics (prefixed or implicitly ego-scoped) fan out to one
    /// `<group>/<suffix>` channel per roster entry, everything else maps to
    /// itself.
    pub fn expand(&self, topic: &str, roster: &[String]) -> Vec<String> {
        let suffix = union_suffix(topic).or_else(|| self.is_ego_scoped(topic).then_some(topic));
        match suffix {
            Some(suffix) => roster
                .iter()
                .map(|group| group_channel(group, suffix))
                .collect(),
            None => vec![topic.to_string()],
        }
    }
}

/// The topic name with the union prefix stripped
pub fn union_suffix(topic: &str) -> Option<&str> {
    topic.strip_prefix(UNION_FLAG).filter(|s| !s.is_empty())
}

/// Channel under which one ego group's share of a union topic is logged
pub fn group_channel(group: &str, suffix: &str) -> String {
    format!("{}/{}", group, suffix)
}

pub fn is_bootstrap(channel: &str) -> bool {
    BOOTSTRAP_CHANNELS.iter().any(|c| *c == channel)
}

pub fn join_topics<S: AsRef<str>>(topics: &[S]) -> String {
    topics
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(TOPIC_SEPARATOR)
}

/// Split a `||` separated list, trimming whitespace and skipping blanks
pub fn split_topics(list: &str) -> Vec<String> {
    list.split(TOPIC_SEPARATOR)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
