use std::sync::Arc;

use encoder_bus::{FanOut, FrameProducer, HlsStream, OsLauncher, ProcessLauncher};
use tokio_util::sync::CancellationToken;

use crate::{api::AppState, canvas::Canvas, scene::Scene};

mod api;
mod canvas;
mod config;
mod handler;
mod scene;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    config::init()?;
    let config = config::config();

    let launcher: Arc<dyn ProcessLauncher> =
        Arc::new(OsLauncher::with_write_queue(config.write_queue()));

    let hls = HlsStream::new(config.hls_options());
    hls.on_dispose(|stream| {
        log::info!("hls stream {} disposed", stream.options().stream_id);
    });
    hls.start(launcher.as_ref())?;
    log::info!(
        "hls manifest at {}",
        config.hls_options().manifest_path().display()
    );
    let fanout = FanOut::new(hls);

    let mut scene = Scene::new();
    let producer = FrameProducer::new(
        Canvas::new(config.width(), config.height()),
        config.frame_rate(),
    )?;
    producer.on_update(move |canvas| scene.update(canvas));
    let target = fanout.clone();
    producer.on_frame(move |frame| {
        target.publish(&frame);
    });
    producer.start();

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    api::start_api_server(
        cancel_clone,
        config.listen(),
        config.web_dir(),
        AppState {
            fanout: fanout.clone(),
            launcher,
            live: config.live_options(),
        },
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    producer.dispose();
    fanout.shutdown();
    // let the encoders see the interrupt before the runtime goes away
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}
