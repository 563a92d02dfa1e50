use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use encoder_bus::{EncodedStream, FanOut, LiveStream, live::CONTENT_TYPE};
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

use crate::{api::AppState, handler::ApiResult};

/// Encoded chunks buffered per client before it counts as too slow.
const BODY_BUFFER: usize = 64;

pub fn video_router() -> Router<AppState> {
    Router::new().route("/video", get(video))
}

/// Starts a dedicated encoder for this client and streams its WebM output.
async fn video(State(state): State<AppState>) -> ApiResult<Response> {
    let stream = LiveStream::open(state.live.clone(), state.launcher.as_ref())?;
    let id = stream.id().to_string();

    let (tx, rx) = mpsc::channel::<Bytes>(BODY_BUFFER);
    let weak = Arc::downgrade(&stream);
    stream.read(move |data| {
        if let Err(TrySendError::Full(_)) = tx.try_send(data) {
            if let Some(stream) = weak.upgrade() {
                log::warn!("video {}: client too slow, dropping", stream.id());
                stream.dispose();
            }
        }
    });

    if !state.fanout.subscribe(stream.clone()) {
        stream.dispose();
        return Err(anyhow::anyhow!("relay is shutting down").into());
    }
    log::info!("video {}: client connected", id);

    let body = LiveBody {
        inner: ReceiverStream::new(rx),
        _guard: ConnectionGuard {
            fanout: state.fanout.clone(),
            id,
        },
    };
    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Closes the client's stream once the response body is dropped.
struct ConnectionGuard {
    fanout: Arc<FanOut>,
    id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        log::info!("video {}: client disconnected", self.id);
        self.fanout.close(&self.id);
    }
}

struct LiveBody {
    inner: ReceiverStream<Bytes>,
    _guard: ConnectionGuard,
}

impl Stream for LiveBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|chunk| chunk.map(Ok))
    }
}
