//! Persistent stream that encodes into an HLS manifest plus media segments.
//!
//! The encoder owns `stream_dir/stream_id` for the stream's lifetime and
//! maintains the manifest and segments there on its own. This module only
//! guarantees the directory exists and is empty before the encoder starts,
//! then feeds it frames. The directory is left in place on disposal so
//! readers already holding the manifest can finish.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{SpawnError, StreamError},
    frame::Frame,
    process::{CommandLine, PipeHandlers, ProcessLauncher},
    sink::WriteAck,
    stream::{EncodedStream, EncoderOptions, StreamCore, log_diagnostic},
};

pub const MANIFEST_NAME: &str = "out.m3u8";

pub type DisposeCallback = Box<dyn FnOnce(&HlsStream) + Send>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HlsOptions {
    pub encoder: EncoderOptions,
    pub stream_dir: PathBuf,
    pub stream_id: String,
    /// Target segment duration in seconds.
    pub segment_seconds: u32,
}

impl HlsOptions {
    pub fn new(
        encoder: EncoderOptions,
        stream_dir: impl Into<PathBuf>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            encoder,
            stream_dir: stream_dir.into(),
            stream_id: stream_id.into(),
            segment_seconds: 1,
        }
    }

    pub fn with_segment_seconds(mut self, segment_seconds: u32) -> Self {
        self.segment_seconds = segment_seconds;
        self
    }

    pub fn directory(&self) -> PathBuf {
        self.stream_dir.join(&self.stream_id)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory().join(MANIFEST_NAME)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        self.encoder.validate()?;
        if self.stream_id.is_empty() || self.stream_id.contains(char::is_whitespace) {
            return Err(StreamError::InvalidOptions(format!(
                "stream id {:?} must be a single word",
                self.stream_id
            )));
        }
        if self.manifest_path().to_string_lossy().contains(char::is_whitespace) {
            return Err(StreamError::InvalidOptions(format!(
                "stream path {} must not contain whitespace",
                self.manifest_path().display()
            )));
        }
        if self.segment_seconds == 0 {
            return Err(StreamError::InvalidOptions(
                "segment duration must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn command(&self) -> Result<CommandLine, SpawnError> {
        CommandLine::parse(&format!(
            "{} -hide_banner {} -hls_time {} {}",
            self.encoder.program,
            self.encoder.input_args(),
            self.segment_seconds,
            self.manifest_path().display()
        ))
    }
}

/// Leaves `path` existing and empty, deleting whatever was there before.
pub fn provision_directory(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)
}

pub struct HlsStream {
    core: StreamCore,
    options: HlsOptions,
    on_dispose: Mutex<Option<DisposeCallback>>,
    this: Weak<HlsStream>,
}

impl HlsStream {
    pub fn new(options: HlsOptions) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: StreamCore::new(options.stream_id.clone()),
            options,
            on_dispose: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Registers the owner's notification, invoked once when the stream is
    /// disposed, explicitly or by a pipe error.
    pub fn on_dispose(&self, f: impl FnOnce(&HlsStream) + Send + 'static) {
        *self
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
    }

    /// Provisions the output directory, then starts the encoder.
    pub fn start(&self, launcher: &dyn ProcessLauncher) -> Result<(), StreamError> {
        self.options.validate()?;
        if !self.core.claim_start() {
            log::warn!("hls stream {}: already started", self.id());
            return Ok(());
        }

        let directory = self.options.directory();
        provision_directory(&directory).map_err(|source| StreamError::Provision {
            path: directory.clone(),
            source,
        })?;

        let command = self.options.command()?;
        log::info!("hls stream {}: starting `{}`", self.id(), command);
        let pipe = launcher.start(&command, self.handlers())?;
        if !self.core.attach(pipe) {
            log::info!("hls stream {}: disposed while starting", self.id());
        }
        Ok(())
    }

    pub fn options(&self) -> &HlsOptions {
        &self.options
    }

    pub fn directory(&self) -> PathBuf {
        self.options.directory()
    }

    fn handlers(&self) -> PipeHandlers {
        let id = self.id().to_string();
        let this = self.this.clone();
        PipeHandlers::default()
            .on_diagnostic(move |data| log_diagnostic(&id, &data))
            .on_error(move |err| {
                if let Some(stream) = this.upgrade() {
                    log::warn!("hls stream {}: {}", stream.id(), err);
                    stream.dispose();
                }
            })
    }
}

impl EncodedStream for HlsStream {
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
        log::info!("hls stream {}: disposing", self.id());
        let callback = self
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(self);
        }
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
#[path = "hls_test.rs"]
mod hls_test;
