// ============================================================================
// FanOut Tests
// ============================================================================

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;

use super::{FanOut, SubscriberSet};
use crate::{
    error::Channel,
    frame::Frame,
    hls::{HlsOptions, HlsStream},
    live::{LiveOptions, LiveStream},
    memory::MemoryLauncher,
    process::{OsLauncher, ProcessPipe},
    stream::{EncodedStream, EncoderOptions},
};

fn live(launcher: &MemoryLauncher) -> Arc<LiveStream> {
    LiveStream::open(LiveOptions::new(EncoderOptions::new(64, 48, 30)), launcher).unwrap()
}

fn persistent(launcher: &MemoryLauncher, dir: &std::path::Path) -> Arc<HlsStream> {
    let stream = HlsStream::new(HlsOptions::new(EncoderOptions::new(64, 48, 30), dir, "t1"));
    stream.start(launcher).unwrap();
    stream
}

/// Waits for the registry watcher to catch up with a disposal.
async fn wait_until_removed(fanout: &FanOut, id: &str) -> bool {
    let wait = async {
        while fanout.contains(id) {
            tokio::task::yield_now().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait).await.is_ok()
}

// ------------------------------------------------------------------------
// SubscriberSet Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_set_insert_and_remove() -> anyhow::Result<()> {
    let launcher = MemoryLauncher::new();
    let a = live(&launcher);
    let b = live(&launcher);

    let mut set = SubscriberSet::new();
    assert!(set.is_empty());
    assert!(set.insert(a.clone()));
    assert!(set.insert(b.clone()));
    assert!(!set.insert(a.clone()));
    assert_eq!(set.len(), 2);
    assert_eq!(set.ids(), vec![a.id().to_string(), b.id().to_string()]);

    assert!(set.remove(a.id()).is_some());
    assert!(set.remove(a.id()).is_none());
    assert!(!set.contains(a.id()));
    assert!(set.contains(b.id()));
    assert_eq!(set.snapshot().len(), 1);
    Ok(())
}

// ------------------------------------------------------------------------
// Publish Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_publish_reaches_every_stream_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let hls = persistent(&launcher, dir.path());
    let fanout = FanOut::new(hls);
    let a = live(&launcher);
    let b = live(&launcher);
    assert!(fanout.subscribe(a.clone()));
    assert!(fanout.subscribe(b.clone()));

    for i in 0u8..3 {
        assert_eq!(fanout.publish(&Frame::new(vec![i; 4])), 3);
    }

    for process in launcher.processes() {
        let writes: Vec<u8> = process.writes().iter().map(|w| w[0]).collect();
        assert_eq!(writes, vec![0, 1, 2]);
    }
    Ok(())
}

#[tokio::test]
async fn test_publish_skips_unready_persistent_stream() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    // never started
    let hls = HlsStream::new(HlsOptions::new(EncoderOptions::new(64, 48, 30), dir.path(), "t1"));
    let fanout = FanOut::new(hls);
    let a = live(&launcher);
    fanout.subscribe(a.clone());

    assert_eq!(fanout.publish(&Frame::new(vec![1])), 1);
    assert_eq!(launcher.last().unwrap().write_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    let b = live(&launcher);
    fanout.subscribe(a.clone());
    fanout.subscribe(b.clone());

    let processes = launcher.processes();
    processes[1].reject_writes(Some(crate::error::WriteError::QueueFull));
    fanout.publish(&Frame::new(vec![1]));

    assert_eq!(processes[0].write_count(), 1);
    assert_eq!(processes[1].write_count(), 0);
    assert_eq!(processes[2].write_count(), 1);
    assert!(!a.is_disposed());
    Ok(())
}

// ------------------------------------------------------------------------
// Registration Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_subscribe_rejects_duplicates_and_disposed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    let b = live(&launcher);

    assert!(fanout.subscribe(a.clone()));
    assert!(!fanout.subscribe(a.clone()));
    b.dispose();
    assert!(!fanout.subscribe(b.clone()));
    assert_eq!(fanout.subscriber_ids(), vec![a.id().to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_closing_one_subscriber_leaves_the_other() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    let b = live(&launcher);
    fanout.subscribe(a.clone());
    fanout.subscribe(b.clone());

    fanout.publish(&Frame::new(vec![0]));
    fanout.close(a.id());
    fanout.close(a.id());
    for i in 1u8..4 {
        fanout.publish(&Frame::new(vec![i]));
    }

    let processes = launcher.processes();
    assert!(a.is_disposed());
    assert_eq!(processes[1].terminations(), 1);
    assert_eq!(processes[1].write_count(), 1);
    let delivered: Vec<u8> = processes[2].writes().iter().map(|w| w[0]).collect();
    assert_eq!(delivered, vec![0, 1, 2, 3]);
    assert_eq!(fanout.subscriber_ids(), vec![b.id().to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_disposed_subscriber_is_removed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    let b = live(&launcher);
    fanout.subscribe(a.clone());
    fanout.subscribe(b.clone());

    // encoder dies on its own
    launcher.processes()[1].fail(Channel::Output, io::ErrorKind::BrokenPipe);
    assert!(a.is_disposed());
    assert!(wait_until_removed(&fanout, a.id()).await);
    assert!(fanout.contains(b.id()));

    b.dispose();
    assert!(wait_until_removed(&fanout, b.id()).await);
    assert!(fanout.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_crashed_encoders_end_their_streams() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = OsLauncher::new();
    // exits immediately with a failure status, like an encoder given bad arguments
    let encoder = EncoderOptions::new(64, 48, 30).with_program("false");

    let hls = HlsStream::new(HlsOptions::new(encoder.clone(), dir.path(), "t1"));
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    hls.on_dispose(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    hls.start(&launcher)?;
    let fanout = FanOut::new(hls.clone());

    let client = LiveStream::open(LiveOptions::new(encoder), &launcher)?;
    fanout.subscribe(client.clone());

    let frame = Frame::new(vec![0u8; 64 * 48 * 4]);
    let settled = async {
        while !(hls.is_disposed() && client.is_disposed() && fanout.is_empty()) {
            fanout.publish(&frame);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), settled).await?;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_exited_subscriber_is_removed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    fanout.subscribe(a.clone());

    launcher.last().unwrap().exit("signal: 11 (SIGSEGV)");
    assert!(wait_until_removed(&fanout, a.id()).await);
    assert!(a.is_disposed());
    assert!(fanout.persistent().is_ready());
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_keeps_stream_alive() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let fanout = FanOut::new(persistent(&launcher, dir.path()));
    let a = live(&launcher);
    fanout.subscribe(a.clone());

    assert!(fanout.unsubscribe(a.id()).is_some());
    assert!(fanout.unsubscribe(a.id()).is_none());
    assert!(a.is_ready());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_disposes_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::new();
    let hls = persistent(&launcher, dir.path());
    let fanout = FanOut::new(hls.clone());
    let a = live(&launcher);
    fanout.subscribe(a.clone());

    fanout.shutdown();

    assert!(hls.is_disposed());
    assert!(a.is_disposed());
    assert!(fanout.is_empty());
    assert!(!fanout.subscribe(live(&launcher)));
    for process in launcher.processes().iter().take(2) {
        assert_eq!(process.terminations(), 1);
    }
    Ok(())
}

// ------------------------------------------------------------------------
// End-to-End Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_live_client_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let launcher = MemoryLauncher::echo();
    let hls = persistent(&launcher, dir.path());
    let fanout = FanOut::new(hls.clone());

    // client connects
    let client = live(&launcher);
    let received = Arc::new(Mutex::new(Vec::<Bytes>::new()));
    let sink = Arc::clone(&received);
    client.read(move |data| sink.lock().unwrap().push(data));
    assert!(fanout.subscribe(client.clone()));

    for i in 0u8..3 {
        fanout.publish(&Frame::new(vec![i; 8]));
    }
    assert_eq!(received.lock().unwrap().len(), 3);

    // client disconnects
    fanout.close(client.id());
    let client_process = launcher.last().unwrap();
    assert!(client.is_disposed());
    assert!(!client_process.is_alive());
    assert!(!fanout.contains(client.id()));

    fanout.publish(&Frame::new(vec![9; 8]));
    assert_eq!(received.lock().unwrap().len(), 3);
    assert_eq!(launcher.processes()[0].write_count(), 4);
    assert!(hls.is_ready());
    Ok(())
}
