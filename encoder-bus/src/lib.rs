//! Process-backed encoder streams fed by a fixed-rate frame producer.
//!
//! Data Flow:
//! ```text
//!                                   ┌─► HlsStream  ─► encoder process ─► manifest + segments on disk
//!                                   │
//! FrameProducer ──► Frame ──► FanOut┤
//!                                   │
//!                                   └─► LiveStream* ─► encoder process ─► stdout ─► read callback
//! ```
//!
//! Every encoder runs as an OS child process behind [`process::ProcessPipe`].
//! A stream whose process fails is disposed on its own; the producer and the
//! other streams keep running.

pub mod error;
pub mod fanout;
pub mod frame;
pub mod hls;
pub mod live;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod process;
pub mod producer;
pub mod sink;
pub mod stream;

pub use error::{Channel, ChannelError, SpawnError, StreamError, WriteError};
pub use fanout::{FanOut, SubscriberSet};
pub use frame::Frame;
pub use hls::{HlsOptions, HlsStream};
pub use live::{LiveOptions, LiveStream};
pub use process::{CommandLine, OsLauncher, PipeHandlers, ProcessLauncher, ProcessPipe};
pub use producer::{FrameProducer, Surface};
pub use sink::WriteAck;
pub use stream::{EncodedStream, EncoderOptions, FrameFormat};
