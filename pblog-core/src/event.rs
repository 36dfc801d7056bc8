//! The unit of data moved through logs and queues.

use crate::error::CodecError;

/// One logged message: the channel it was published on, its opaque payload
/// and the simulation time in microseconds.
///
/// An `Event` always has a non-empty channel. "Nothing available" is
/// expressed as `Option::None` by the APIs that hand events out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    channel: String,
    payload: Vec<u8>,
    timestamp_us: i64,
}

impl Event {
    /// Build an event, taking ownership of both buffers.
    pub fn new(
        channel: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        timestamp_us: i64,
    ) -> Result<Self, CodecError> {
        let channel = channel.into();
        let payload = payload.into();

        if channel.is_empty() {
            return Err(CodecError::EmptyChannel);
        }
        check_len("channel", channel.len())?;
        check_len("payload", payload.len())?;

        Ok(Self {
            channel,
            payload,
            timestamp_us,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Simulation time in microseconds
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    /// Size of this event once framed on disk
    pub fn encoded_len(&self) -> usize {
        crate::codec::HEADER_SIZE + self.channel.len() + self.payload.len()
    }

    pub fn into_parts(self) -> (String, Vec<u8>, i64) {
        (self.channel, self.payload, self.timestamp_us)
    }
}

pub(crate) fn check_len(field: &'static str, len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::TooLong { field, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_channel_rejected() {
        assert!(matches!(
            Event::new("", vec![1], 0),
            Err(CodecError::EmptyChannel)
        ));
    }

    #[test]
    fn test_empty_payload_allowed() {
        let event = Event::new("EgoUnion/LOCATION", Vec::new(), 42).unwrap();
        assert!(event.payload().is_empty());
        assert_eq!(event.timestamp_us(), 42);
        assert_eq!(event.encoded_len(), 16 + "EgoUnion/LOCATION".len());
    }

    #[test]
    fn test_into_parts() {
        let event = Event::new("TRAFFIC", vec![9, 8], -5).unwrap();
        let (channel, payload, ts) = event.into_parts();
        assert_eq!(channel, "TRAFFIC");
        assert_eq!(payload, vec![9, 8]);
        assert_eq!(ts, -5);
    }
}
