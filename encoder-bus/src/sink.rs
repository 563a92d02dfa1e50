use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::error::WriteError;

pub type AckSender = oneshot::Sender<Result<(), WriteError>>;

/// Outcome of one write to a process input.
///
/// Resolves once the OS accepted the bytes, or with the reason they were
/// rejected. Dropping it does not cancel the write.
pub struct WriteAck {
    state: AckState,
}

enum AckState {
    Done(Option<Result<(), WriteError>>),
    Pending(oneshot::Receiver<Result<(), WriteError>>),
}

impl WriteAck {
    pub fn ready(result: Result<(), WriteError>) -> Self {
        Self {
            state: AckState::Done(Some(result)),
        }
    }

    /// A write that was dropped on purpose, e.g. before the stream is ready.
    pub fn dropped() -> Self {
        Self::ready(Ok(()))
    }

    pub fn channel() -> (AckSender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: AckState::Pending(rx),
            },
        )
    }
}

impl Future for WriteAck {
    type Output = Result<(), WriteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            AckState::Done(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            AckState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(WriteError::Closed))),
        }
    }
}
