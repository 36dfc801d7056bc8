//! # pblog core
//!
//! Platform-independent building blocks for simulation record/replay logs.
//!
//! This crate contains the on-disk event framing and the topic naming rules
//! with **no threads and no file handling**. The runtime pieces (bounded
//! queues, recording and replay controllers) live in `pblog-sim`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  pblog-core                                                 │
//! │  ├── event    (immutable channel/payload/timestamp record)  │
//! │  ├── codec    (little-endian framing, streaming decode)     │
//! │  └── topics   (bootstrap names, ego/union topic tables)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  pblog-sim              │
//!                 │  (queues, controllers,  │
//!                 │   protobuf payloads)    │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Record layout
//!
//! ```text
//! u32 channelLen | u32 payloadLen | i64 timestampMicros | channel | payload
//! ```
//!
//! ## Example
//!
//! ```rust
//! use pblog_core::{codec, Event};
//!
//! let bytes = codec::encode("LOCATION", &[1, 2, 3], 1_234_567).unwrap();
//! assert_eq!(bytes.len(), 27);
//!
//! let event = codec::read_event(&mut &bytes[..]).unwrap().unwrap();
//! assert_eq!(event, Event::new("LOCATION", vec![1, 2, 3], 1_234_567).unwrap());
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod topics;

pub use error::CodecError;
pub use event::Event;
pub use topics::{TopicTable, DEFAULT_TOPICS};
