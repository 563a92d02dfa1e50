use std::{
    fmt::{Display, Formatter},
    io,
    path::PathBuf,
};

use thiserror::Error;

/// One of the three byte pipes wired to an encoder process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Input,
    Output,
    Diagnostic,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Channel::Input => write!(f, "stdin"),
            Channel::Output => write!(f, "stdout"),
            Channel::Diagnostic => write!(f, "stderr"),
        }
    }
}

/// The encoder executable could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to start `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` started without a {channel} pipe")]
    MissingPipe { program: String, channel: Channel },
}

/// An I/O error on one of a running process's pipes. Fatal for that stream only.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{channel} channel error: {message}")]
pub struct ChannelError {
    pub channel: Channel,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl ChannelError {
    pub fn new(channel: Channel, err: &io::Error) -> Self {
        Self {
            channel,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A single write to a process input was not accepted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("process input is closed")]
    Closed,
    #[error("process input queue is full")]
    QueueFull,
    #[error("process input rejected write: {0:?}")]
    Rejected(io::ErrorKind),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream options: {0}")]
    InvalidOptions(String),
    #[error("failed to provision stream directory {}: {source}", .path.display())]
    Provision {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}
