// ============================================================================
// RelayConfig Tests
// ============================================================================

use std::path::Path;

use super::RelayConfig;

#[test]
fn test_defaults() {
    let config = RelayConfig::default();
    assert_eq!(config.listen().to_string(), "0.0.0.0:5000");
    assert_eq!(config.web_dir(), Path::new("web"));
    assert_eq!(config.write_queue(), 32);

    let hls = config.hls_options();
    assert_eq!(hls.directory(), Path::new("web/streams/testing"));
    assert_eq!(hls.segment_seconds, 1);
    assert_eq!(hls.encoder.width, 640);
    assert_eq!(hls.encoder.height, 480);
    assert_eq!(hls.encoder.frame_rate, 30);
    assert_eq!(config.live_options().bitrate, "1M");
}

#[test]
fn test_partial_file_keeps_other_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relay.json");
    std::fs::write(
        &path,
        r#"{ "listen": "127.0.0.1:8080", "stream_id": "lobby", "frame_rate": 15, "bitrate": "500k" }"#,
    )?;

    let config = RelayConfig::from_file(&path)?;
    assert_eq!(config.listen().port(), 8080);
    assert_eq!(config.frame_rate(), 15);
    assert_eq!(config.width(), 640);
    assert_eq!(config.hls_options().stream_id, "lobby");
    assert_eq!(config.live_options().bitrate, "500k");
    assert_eq!(config.encoder_options().program, "ffmpeg");
    Ok(())
}

#[test]
fn test_invalid_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relay.json");
    std::fs::write(&path, "{ not json")?;

    assert!(RelayConfig::from_file(&path).is_err());
    assert!(RelayConfig::from_file(&dir.path().join("missing.json")).is_err());
    Ok(())
}
