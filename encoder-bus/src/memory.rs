//! In-memory stand-ins for encoder processes.
//!
//! [`MemoryLauncher`] implements [`ProcessLauncher`] without spawning
//! anything, so stream and fan-out behaviour can be exercised
//! deterministically. Every started [`MemoryProcess`] records what was
//! written to it and lets the caller push output, diagnostics and pipe
//! errors back through the handlers the stream registered.

use std::{
    io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Channel, ChannelError, SpawnError, WriteError},
    process::{CommandLine, PipeHandlers, ProcessLauncher, ProcessPipe, exit_error},
    sink::WriteAck,
};

/// Runs on every accepted write, after it has been recorded.
pub type Behavior = Arc<dyn Fn(&MemoryProcess, &Bytes) + Send + Sync>;

#[derive(Default)]
pub struct MemoryLauncher {
    processes: Mutex<Vec<Arc<MemoryProcess>>>,
    fail_spawns: AtomicBool,
    behavior: Option<Behavior>,
}

impl MemoryLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(f: impl Fn(&MemoryProcess, &Bytes) + Send + Sync + 'static) -> Self {
        Self {
            behavior: Some(Arc::new(f)),
            ..Self::default()
        }
    }

    /// Every write comes straight back out on the output channel.
    pub fn echo() -> Self {
        Self::with_behavior(|process, data| process.emit_data(data.clone()))
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::Relaxed);
    }

    pub fn processes(&self) -> Vec<Arc<MemoryProcess>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<Arc<MemoryProcess>> {
        self.processes().pop()
    }
}

impl ProcessLauncher for MemoryLauncher {
    fn start(
        &self,
        command: &CommandLine,
        handlers: PipeHandlers,
    ) -> Result<Arc<dyn ProcessPipe>, SpawnError> {
        if self.fail_spawns.load(Ordering::Relaxed) {
            return Err(SpawnError::Io {
                program: command.program().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "program not found"),
            });
        }

        let process = Arc::new(MemoryProcess {
            command: command.clone(),
            handlers,
            behavior: self.behavior.clone(),
            writes: Mutex::new(Vec::new()),
            reject: Mutex::new(None),
            terminations: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            exited: CancellationToken::new(),
        });
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&process));
        Ok(process)
    }
}

pub struct MemoryProcess {
    command: CommandLine,
    handlers: PipeHandlers,
    behavior: Option<Behavior>,
    writes: Mutex<Vec<Bytes>>,
    reject: Mutex<Option<WriteError>>,
    terminations: AtomicUsize,
    alive: AtomicBool,
    exited: CancellationToken,
}

impl MemoryProcess {
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// How many times `terminate` was called, repeated calls included.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::Relaxed)
    }

    pub fn emit_data(&self, data: impl Into<Bytes>) {
        if self.is_alive() {
            (self.handlers.on_data)(data.into());
        }
    }

    pub fn emit_diagnostic(&self, data: impl Into<Bytes>) {
        if self.is_alive() {
            (self.handlers.on_diagnostic)(data.into());
        }
    }

    /// Raises a pipe error on `channel`, as a broken pipe would.
    pub fn fail(&self, channel: Channel, kind: io::ErrorKind) {
        let err = io::Error::new(kind, "injected pipe failure");
        (self.handlers.on_error)(ChannelError::new(channel, &err));
    }

    /// Ends the process as if it crashed: no further output, and the
    /// handlers see the same error a real unexpected exit raises.
    pub fn exit(&self, reason: &str) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        (self.handlers.on_error)(exit_error(reason));
        self.exited.cancel();
    }

    /// Makes subsequent writes fail with `err` (or succeed again with `None`).
    pub fn reject_writes(&self, err: Option<WriteError>) {
        *self.reject.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }
}

impl ProcessPipe for MemoryProcess {
    fn send(&self, data: Bytes) -> WriteAck {
        if !self.is_alive() {
            return WriteAck::ready(Err(WriteError::Closed));
        }
        if let Some(err) = self
            .reject
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return WriteAck::ready(Err(err));
        }

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.clone());
        if let Some(behavior) = &self.behavior {
            behavior(self, &data);
        }
        WriteAck::ready(Ok(()))
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
        self.alive.store(false, Ordering::Release);
        self.exited.cancel();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }
}
