use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{SpawnError, StreamError},
    frame::Frame,
    process::{CommandLine, PipeHandlers, ProcessLauncher},
    sink::WriteAck,
    stream::{EncodedStream, EncoderOptions, StreamCore, log_diagnostic},
};

/// Media type of the bytes a [`LiveStream`] emits.
pub const CONTENT_TYPE: &str = "video/webm";

pub type ReadCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveOptions {
    pub encoder: EncoderOptions,
    /// Target video bitrate, in encoder notation (e.g. "1M").
    pub bitrate: String,
}

impl LiveOptions {
    pub fn new(encoder: EncoderOptions) -> Self {
        Self {
            encoder,
            bitrate: "1M".to_string(),
        }
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        self.encoder.validate()?;
        if self.bitrate.is_empty() || self.bitrate.contains(char::is_whitespace) {
            return Err(StreamError::InvalidOptions(format!(
                "bitrate {:?} must be a single word",
                self.bitrate
            )));
        }
        Ok(())
    }

    /// Low-latency WebM encoding written to stdout.
    pub fn command(&self) -> Result<CommandLine, SpawnError> {
        CommandLine::parse(&format!(
            "{} -hide_banner {} -vcodec libvpx -preset ultrafast -tune zerolatency \
             -qmin 0 -qmax 50 -crf 10 -b:v {} -f webm pipe:1",
            self.encoder.program,
            self.encoder.input_args(),
            self.bitrate
        ))
    }
}

/// Encoder for a single network client; its output goes to the read callback.
pub struct LiveStream {
    core: StreamCore,
    options: LiveOptions,
    reader: Mutex<ReadCallback>,
    this: Weak<LiveStream>,
}

impl LiveStream {
    pub fn new(options: LiveOptions) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: StreamCore::new(uuid::Uuid::new_v4().to_string()),
            options,
            reader: Mutex::new(Arc::new(|_| {})),
            this: this.clone(),
        })
    }

    pub fn open(
        options: LiveOptions,
        launcher: &dyn ProcessLauncher,
    ) -> Result<Arc<Self>, StreamError> {
        let stream = Self::new(options);
        stream.start(launcher)?;
        Ok(stream)
    }

    pub fn start(&self, launcher: &dyn ProcessLauncher) -> Result<(), StreamError> {
        self.options.validate()?;
        if !self.core.claim_start() {
            log::warn!("live stream {}: already started", self.id());
            return Ok(());
        }

        let command = self.options.command()?;
        log::debug!("live stream {}: starting `{}`", self.id(), command);
        let pipe = launcher.start(&command, self.handlers())?;
        if !self.core.attach(pipe) {
            log::debug!("live stream {}: disposed while starting", self.id());
        }
        Ok(())
    }

    /// Replaces the callback receiving encoded output.
    pub fn read(&self, f: impl Fn(Bytes) + Send + Sync + 'static) {
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(f);
    }

    pub fn options(&self) -> &LiveOptions {
        &self.options
    }

    fn forward(&self, data: Bytes) {
        if self.core.is_disposed() {
            return;
        }
        let reader = Arc::clone(&self.reader.lock().unwrap_or_else(PoisonError::into_inner));
        reader(data);
    }

    fn handlers(&self) -> PipeHandlers {
        let id = self.id().to_string();
        let data_target = self.this.clone();
        let error_target = self.this.clone();
        PipeHandlers::default()
            .on_data(move |data| {
                if let Some(stream) = data_target.upgrade() {
                    stream.forward(data);
                }
            })
            .on_diagnostic(move |data| log_diagnostic(&id, &data))
            .on_error(move |err| {
                if let Some(stream) = error_target.upgrade() {
                    log::warn!("live stream {}: {}", stream.id(), err);
                    stream.dispose();
                }
            })
    }
}

impl EncodedStream for LiveStream {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn write(&self, frame: &Frame) -> WriteAck {
        self.core.write(frame)
    }

    fn dispose(&self) {
        if !self.core.begin_dispose() {
            return;
        }
        log::debug!("live stream {}: disposing", self.id());
        // dropping the reader ends whatever body it feeds
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(|_| {});
        self.core.finish_dispose();
    }

    fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    fn disposed(&self) -> CancellationToken {
        self.core.token()
    }
}

#[cfg(test)]
#[path = "live_test.rs"]
mod live_test;
