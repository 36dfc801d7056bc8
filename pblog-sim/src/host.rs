//! Interface to the simulation runtime that drives a module.
//!
//! The runtime calls a [`SimModule`] once at init, once per scenario reset,
//! once per simulation step and once at stop. Each phase receives a helper
//! exposing only the primitives valid in that phase.

use std::collections::HashMap;

use crate::error::ModuleError;

/// Primitives available while a module is being initialized
pub trait InitHelper {
    /// Value of a module parameter from the host configuration
    fn get_parameter(&self, name: &str) -> Option<String>;

    fn subscribe(&mut self, topic: &str);

    /// Declare a topic this module publishes
    fn publish(&mut self, topic: &str);
}

/// Primitives available at scenario reset
pub trait ResetHelper {
    fn scenario_path(&self) -> &str;

    /// Ego groups of the scenario, in scenario order
    fn ego_groups(&self) -> Vec<String>;

    /// Serialized scene description
    fn scene(&self) -> &[u8];

    fn setting(&self) -> &[u8];

    fn vehicle_geometry(&self) -> &[u8];

    /// Declare a topic this module publishes
    fn publish(&mut self, topic: &str);
}

/// Primitives available during a simulation step
pub trait StepHelper {
    /// Current simulation time in milliseconds
    fn timestamp(&self) -> i64;

    /// Latest payload received on a subscribed topic, if any arrived
    fn get_subscribed_message(&self, topic: &str) -> Option<&[u8]>;

    fn publish_message(&mut self, topic: &str, payload: &[u8]);

    /// Ask the runtime to end the scenario
    fn stop_scenario(&mut self, reason: &str);
}

/// A module driven by the simulation runtime
pub trait SimModule {
    fn init(&mut self, helper: &mut dyn InitHelper) -> Result<(), ModuleError>;

    fn reset(&mut self, helper: &mut dyn ResetHelper) -> Result<(), ModuleError>;

    fn step(&mut self, helper: &mut dyn StepHelper) -> Result<(), ModuleError>;

    fn stop(&mut self) -> Result<(), ModuleError>;
}

/// A message handed to the runtime by `publish_message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Simulation time of the step it was published in
    pub timestamp_ms: i64,
}

/// In-process runtime that keeps everything in memory.
///
/// Used by the `pblog replay` command to drive a player without a simulator,
/// and by tests.
#[derive(Debug, Default)]
pub struct MemoryHost {
    parameters: HashMap<String, String>,
    scenario_path: String,
    ego_groups: Vec<String>,
    scene: Vec<u8>,
    setting: Vec<u8>,
    vehicle_geometry: Vec<u8>,
    timestamp_ms: i64,
    inbox: HashMap<String, Vec<u8>>,
    subscriptions: Vec<String>,
    outputs: Vec<String>,
    published: Vec<Published>,
    stop_requests: Vec<String>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn with_scenario(mut self, path: impl Into<String>, ego_groups: &[&str]) -> Self {
        self.scenario_path = path.into();
        self.ego_groups = ego_groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_scene(mut self, scene: impl Into<Vec<u8>>) -> Self {
        self.scene = scene.into();
        self
    }

    pub fn with_setting(mut self, setting: impl Into<Vec<u8>>) -> Self {
        self.setting = setting.into();
        self
    }

    pub fn with_vehicle_geometry(mut self, geometry: impl Into<Vec<u8>>) -> Self {
        self.vehicle_geometry = geometry.into();
        self
    }

    pub fn set_timestamp(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }

    /// Make a payload available on a subscribed topic for the next step
    pub fn set_message(&mut self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.inbox.insert(topic.to_string(), payload.into());
    }

    pub fn clear_messages(&mut self) {
        self.inbox.clear();
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Topics declared through `publish`
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn published(&self) -> &[Published] {
        &self.published
    }

    pub fn take_published(&mut self) -> Vec<Published> {
        std::mem::take(&mut self.published)
    }

    pub fn stop_requests(&self) -> &[String] {
        &self.stop_requests
    }

    fn declare_output(&mut self, topic: &str) {
        if !self.outputs.iter().any(|t| t == topic) {
            self.outputs.push(topic.to_string());
        }
    }
}

impl InitHelper for MemoryHost {
    fn get_parameter(&self, name: &str) -> Option<String> {
        self.parameters.get(name).cloned()
    }

    fn subscribe(&mut self, topic: &str) {
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
    }

    fn publish(&mut self, topic: &str) {
        self.declare_output(topic);
    }
}

impl ResetHelper for MemoryHost {
    fn scenario_path(&self) -> &str {
        &self.scenario_path
    }

    fn ego_groups(&self) -> Vec<String> {
        self.ego_groups.clone()
    }

    fn scene(&self) -> &[u8] {
        &self.scene
    }

    fn setting(&self) -> &[u8] {
        &self.setting
    }

    fn vehicle_geometry(&self) -> &[u8] {
        &self.vehicle_geometry
    }

    fn publish(&mut self, topic: &str) {
        self.declare_output(topic);
    }
}

impl StepHelper for MemoryHost {
    fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    fn get_subscribed_message(&self, topic: &str) -> Option<&[u8]> {
        self.inbox.get(topic).map(Vec::as_slice)
    }

    fn publish_message(&mut self, topic: &str, payload: &[u8]) {
        self.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            timestamp_ms: self.timestamp_ms,
        });
    }

    fn stop_scenario(&mut self, reason: &str) {
        self.stop_requests.push(reason.to_string());
    }
}
