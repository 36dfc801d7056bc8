//! Simulation recording and playback module.
//!
//! This module provides functionality to:
//! - Record every subscribed topic of a scenario run to a `.pblog` file
//! - Replay a `.pblog` file into a new run, paced by simulation time
//! - Manage log files (naming, listing, inspection)
//!
//! ## File Format
//!
//! A `.pblog` file is a plain sequence of framed records (see
//! [`pblog_core::codec`]) that always starts with the bootstrap records:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Scenario_Info     (t=0)  │  protobuf ScenarioInfo: path, ego groups, scene
//! ├──────────────────────────┤
//! │ Topic_List        (t=0)  │  recorded topics joined by "||"
//! ├──────────────────────────┤
//! │ Setting_Info      (t=0)  │  host setting blob
//! ├──────────────────────────┤
//! │ VEHICLE_GEOMETRY  (t=0)  │  vehicle geometry blob
//! ├──────────────────────────┤
//! │ data records             │  channel + payload at simulation time (µs)
//! │ ...                      │
//! └──────────────────────────┘
//! ```
//!
//! Union topics are stored as a marker record on `EgoUnion/<topic>` with an
//! empty payload, followed by one record per ego group on `<group>/<topic>`.

pub mod bootstrap;
pub mod manager;
pub mod player;
pub mod post_process;
pub mod recorder;
pub mod union;

pub use manager::{inspect, LogInfo, LogManager, LOG_EXTENSION};
pub use player::{PlaybackState, Player, EMPTY_POLL_LIMIT};
pub use post_process::PostProcess;
pub use recorder::Recorder;
pub use union::UnionPayload;
