use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio_util::sync::CancellationToken;

use crate::{error::StreamError, frame::Frame, process::ProcessPipe, sink::WriteAck};

/// A consumer of frames backed by one encoder process.
pub trait EncodedStream: Send + Sync {
    fn id(&self) -> &str;

    /// Writes one frame to the encoder input.
    ///
    /// Before the process is wired (or after disposal) this resolves
    /// immediately as a successful no-op; frames are never queued here.
    fn write(&self, frame: &Frame) -> WriteAck;

    /// Tears the stream down. Only the first call has any effect.
    fn dispose(&self);

    fn is_ready(&self) -> bool;

    fn is_disposed(&self) -> bool;

    /// Cancelled exactly once, when the stream is disposed for any reason.
    fn disposed(&self) -> CancellationToken;
}

/// How frames are presented to the encoder's standard input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameFormat {
    /// Raw 8-bit RGBA bitmaps of exactly `width * height * 4` bytes.
    #[default]
    Rgba,
    /// A sequence of concatenated PNG images.
    Png,
}

/// Encoder settings shared by every stream variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderOptions {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub format: FrameFormat,
}

impl EncoderOptions {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            width,
            height,
            frame_rate,
            format: FrameFormat::default(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.width == 0 || self.height == 0 {
            return Err(StreamError::InvalidOptions(
                "frame width/height must be non-zero".to_string(),
            ));
        }
        if self.frame_rate == 0 {
            return Err(StreamError::InvalidOptions(
                "frame rate must be non-zero".to_string(),
            ));
        }
        if self.program.is_empty() || self.program.contains(char::is_whitespace) {
            return Err(StreamError::InvalidOptions(format!(
                "encoder program {:?} must be a single word",
                self.program
            )));
        }
        Ok(())
    }

    /// Arguments describing the frames arriving on stdin.
    pub fn input_args(&self) -> String {
        let size = format!("{}x{}", self.width, self.height);
        match self.format {
            FrameFormat::Rgba => format!(
                "-f rawvideo -pix_fmt rgba -s {} -r {} -i -",
                size, self.frame_rate
            ),
            FrameFormat::Png => format!("-f image2pipe -s {} -r {} -i -", size, self.frame_rate),
        }
    }
}

/// Process wiring and lifecycle flags common to every stream variant.
pub(crate) struct StreamCore {
    id: String,
    pipe: Mutex<Option<Arc<dyn ProcessPipe>>>,
    started: AtomicBool,
    ready: AtomicBool,
    disposed: AtomicBool,
    token: CancellationToken,
}

impl StreamCore {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pipe: Mutex::new(None),
            started: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// `true` for the first caller only.
    pub(crate) fn claim_start(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Installs the started process and marks the stream ready. A stream
    /// disposed while its process was starting terminates it right away.
    pub(crate) fn attach(&self, pipe: Arc<dyn ProcessPipe>) -> bool {
        let mut slot = self.pipe.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_disposed() {
            drop(slot);
            pipe.terminate();
            return false;
        }
        *slot = Some(pipe);
        self.ready.store(true, Ordering::Release);
        true
    }

    pub(crate) fn write(&self, frame: &Frame) -> WriteAck {
        if !self.is_ready() {
            return WriteAck::dropped();
        }
        let pipe = self
            .pipe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match pipe {
            Some(pipe) => pipe.send(frame.bytes()),
            None => WriteAck::dropped(),
        }
    }

    /// `true` for the first caller only; stops further writes immediately.
    pub(crate) fn begin_dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.ready.store(false, Ordering::Release);
        true
    }

    /// Terminates the process (if any) and fires the disposed event.
    pub(crate) fn finish_dispose(&self) {
        let pipe = self
            .pipe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pipe) = pipe {
            pipe.terminate();
        }
        self.token.cancel();
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.is_disposed()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Forwards encoder stderr to the log, one record per line.
pub(crate) fn log_diagnostic(id: &str, data: &[u8]) {
    for line in String::from_utf8_lossy(data).lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            log::debug!(target: "encoder_bus::encoder", "[{}] {}", id, line);
        }
    }
}
