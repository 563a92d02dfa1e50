use std::{
    fmt::{Display, Formatter},
    io,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Channel, ChannelError, SpawnError, WriteError},
    sink::{AckSender, WriteAck},
};

/// Outstanding writes a process input may hold before new writes are rejected.
pub const DEFAULT_WRITE_QUEUE: usize = 32;

const READ_CHUNK: usize = 64 * 1024;
const KILL_GRACE: Duration = Duration::from_secs(2);

pub type DataCallback = Arc<dyn Fn(Bytes) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(ChannelError) + Send + Sync>;

/// A program name plus arguments, split on whitespace.
///
/// There is no quoting: arguments (paths included) must not contain spaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Result<Self, SpawnError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SpawnError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Callbacks wired to a process when it is started.
#[derive(Clone)]
pub struct PipeHandlers {
    pub on_data: DataCallback,
    pub on_diagnostic: DataCallback,
    pub on_error: ErrorCallback,
}

impl Default for PipeHandlers {
    fn default() -> Self {
        Self {
            on_data: Arc::new(|_| {}),
            on_diagnostic: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
        }
    }
}

impl PipeHandlers {
    pub fn on_data(mut self, f: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_data = Arc::new(f);
        self
    }

    pub fn on_diagnostic(mut self, f: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_diagnostic = Arc::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(f);
        self
    }
}

/// A running encoder process seen through its pipes.
pub trait ProcessPipe: Send + Sync {
    /// Queues bytes for the process input.
    fn send(&self, data: Bytes) -> WriteAck;

    /// Asks the process to stop. Safe to call more than once.
    fn terminate(&self);

    fn is_alive(&self) -> bool;

    /// Cancelled once the process has exited and been reaped.
    fn exited(&self) -> CancellationToken;
}

pub trait ProcessLauncher: Send + Sync {
    fn start(
        &self,
        command: &CommandLine,
        handlers: PipeHandlers,
    ) -> Result<Arc<dyn ProcessPipe>, SpawnError>;
}

/// Starts real OS processes with `tokio::process`. Must be called inside a tokio runtime.
#[derive(Clone, Debug)]
pub struct OsLauncher {
    write_queue: usize,
}

impl OsLauncher {
    pub fn new() -> Self {
        Self::with_write_queue(DEFAULT_WRITE_QUEUE)
    }

    pub fn with_write_queue(write_queue: usize) -> Self {
        Self {
            write_queue: write_queue.max(1),
        }
    }
}

impl Default for OsLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for OsLauncher {
    fn start(
        &self,
        command: &CommandLine,
        handlers: PipeHandlers,
    ) -> Result<Arc<dyn ProcessPipe>, SpawnError> {
        let program = command.program().to_string();
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Io {
                program: program.clone(),
                source,
            })?;

        let missing = |channel| SpawnError::MissingPipe {
            program: program.clone(),
            channel,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing(Channel::Input))?;
        let stdout = child.stdout.take().ok_or_else(|| missing(Channel::Output))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| missing(Channel::Diagnostic))?;

        let pid = child.id();
        log::debug!("process: spawned `{}` (pid {:?})", command, pid);

        let (writer, requests) = mpsc::channel(self.write_queue);
        let process = Arc::new(OsProcess {
            pid,
            writer,
            cancel: CancellationToken::new(),
            exited: CancellationToken::new(),
            alive: Arc::new(AtomicBool::new(true)),
        });

        tokio::spawn(write_loop(
            stdin,
            requests,
            process.cancel.clone(),
            Arc::clone(&handlers.on_error),
        ));
        tokio::spawn(read_loop(
            stdout,
            Channel::Output,
            handlers.on_data,
            Arc::clone(&handlers.on_error),
            process.cancel.clone(),
        ));
        tokio::spawn(read_loop(
            stderr,
            Channel::Diagnostic,
            handlers.on_diagnostic,
            Arc::clone(&handlers.on_error),
            process.cancel.clone(),
        ));
        tokio::spawn(supervise(
            child,
            program,
            process.cancel.clone(),
            process.exited.clone(),
            Arc::clone(&process.alive),
            handlers.on_error,
        ));

        Ok(process)
    }
}

struct WriteRequest {
    data: Bytes,
    ack: AckSender,
}

struct OsProcess {
    pid: Option<u32>,
    writer: mpsc::Sender<WriteRequest>,
    cancel: CancellationToken,
    exited: CancellationToken,
    alive: Arc<AtomicBool>,
}

impl ProcessPipe for OsProcess {
    fn send(&self, data: Bytes) -> WriteAck {
        if self.cancel.is_cancelled() || !self.is_alive() {
            return WriteAck::ready(Err(WriteError::Closed));
        }
        let (ack, pending) = WriteAck::channel();
        match self.writer.try_send(WriteRequest { data, ack }) {
            Ok(()) => pending,
            Err(TrySendError::Full(_)) => WriteAck::ready(Err(WriteError::QueueFull)),
            Err(TrySendError::Closed(_)) => WriteAck::ready(Err(WriteError::Closed)),
        }
    }

    fn terminate(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if self.exited.is_cancelled() {
            return;
        }
        if let Some(pid) = self.pid {
            if let Err(e) = interrupt(pid) {
                log::warn!("process: failed to interrupt pid {}: {}", pid, e);
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }
}

async fn write_loop(
    mut stdin: ChildStdin,
    mut requests: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
    on_error: ErrorCallback,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => {
                let Some(WriteRequest { data, ack }) = request else {
                    break;
                };
                match stdin.write_all(&data).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = ack.send(Err(WriteError::Rejected(e.kind())));
                        if !cancel.is_cancelled() {
                            on_error(ChannelError::new(Channel::Input, &e));
                        }
                        break;
                    }
                }
            }
        }
    }
    // queued requests are dropped here, which resolves their acks as Closed
}

async fn read_loop<R>(
    mut reader: R,
    channel: Channel,
    on_data: DataCallback,
    on_error: ErrorCallback,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    on_data(buf.split().freeze());
                    buf.reserve(READ_CHUNK);
                }
                Err(e) => {
                    if !cancel.is_cancelled() {
                        on_error(ChannelError::new(channel, &e));
                    }
                    break;
                }
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    program: String,
    cancel: CancellationToken,
    exited: CancellationToken,
    alive: Arc<AtomicBool>,
    on_error: ErrorCallback,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    log::warn!("process: `{}` ignored interrupt, killing", program);
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    alive.store(false, Ordering::Release);
    let reason = match status {
        Ok(status) => {
            log::debug!("process: `{}` exited with {}", program, status);
            status.to_string()
        }
        Err(e) => {
            log::warn!("process: failed to reap `{}`: {}", program, e);
            e.to_string()
        }
    };
    // nobody asked it to stop, so its input is gone for good
    if !cancel.is_cancelled() {
        on_error(exit_error(&reason));
    }
    exited.cancel();
}

/// The error raised when a process exits without being terminated.
pub(crate) fn exit_error(reason: &str) -> ChannelError {
    let err = io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("process exited on its own ({})", reason),
    );
    ChannelError::new(Channel::Input, &err)
}

#[cfg(unix)]
fn interrupt(pid: u32) -> io::Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupt signal not supported on this platform",
    ))
}

#[cfg(test)]
#[path = "process_test.rs"]
mod process_test;
