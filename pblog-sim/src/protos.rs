//! Generated protobuf types, see `src/protos/pblog.proto`.

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
