use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::Context;
use encoder_bus::{EncoderOptions, HlsOptions, LiveOptions, process::DEFAULT_WRITE_QUEUE};
use serde::{Deserialize, Serialize};

/// Names the JSON file to read the configuration from.
pub const CONFIG_ENV: &str = "FRAME_RELAY_CONFIG";

static CONFIG: OnceLock<RelayConfig> = OnceLock::new();

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    listen: SocketAddr,
    web_dir: PathBuf,
    stream_dir: PathBuf,
    stream_id: String,
    width: u32,
    height: u32,
    frame_rate: u32,
    program: String,
    segment_seconds: u32,
    bitrate: String,
    write_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            web_dir: PathBuf::from("web"),
            stream_dir: PathBuf::from("web/streams"),
            stream_id: "testing".to_string(),
            width: 640,
            height: 480,
            frame_rate: 30,
            program: "ffmpeg".to_string(),
            segment_seconds: 1,
            bitrate: "1M".to_string(),
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Reads the file named by `FRAME_RELAY_CONFIG`, or falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn write_queue(&self) -> usize {
        self.write_queue
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions::new(self.width, self.height, self.frame_rate)
            .with_program(self.program.clone())
    }

    pub fn hls_options(&self) -> HlsOptions {
        HlsOptions::new(
            self.encoder_options(),
            self.stream_dir.clone(),
            self.stream_id.clone(),
        )
        .with_segment_seconds(self.segment_seconds)
    }

    pub fn live_options(&self) -> LiveOptions {
        LiveOptions::new(self.encoder_options()).with_bitrate(self.bitrate.clone())
    }
}

/// Loads the configuration once; later calls return the stored value.
pub fn init() -> anyhow::Result<&'static RelayConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    let loaded = RelayConfig::load()?;
    Ok(CONFIG.get_or_init(|| loaded))
}

pub fn config() -> &'static RelayConfig {
    CONFIG.get_or_init(RelayConfig::default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
