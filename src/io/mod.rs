//! # Stream plumbing: bounded channel, sinks/sources, and pumps.
//!
//! - [`OutputChannel`] / [`OutputReader`] - bounded byte queue with
//!   backpressure for streaming capture
//! - [`ByteSink`] / [`ByteSource`] and their implementations - the
//!   replaceable endpoints of every pump, with tee composition
//! - pumps ([`PumpMode`]) - the tasks relaying bytes between the child's
//!   pipes and the endpoints

mod channel;
pub(crate) mod pump;
mod sink;

pub use channel::{OutputChannel, OutputReader, DEFAULT_CHANNEL_CAPACITY};
pub use pump::{PumpMode, DEFAULT_POLL_INTERVAL};
pub use sink::{
    BufferSink, ByteSink, ByteSource, BytesSource, ChannelSink, EmptySource, NullSink,
    ReaderSource, TeeSink, WriterSink,
};

pub(crate) use sink::compose_sinks;
