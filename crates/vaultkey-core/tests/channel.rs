use std::sync::Arc;
use std::time::Duration;

use vaultkey_core::{
    ChannelConfig, CommandChannel, DeviceError, DeviceSession, DeviceStatus, KdfConfig, SimulatedDevice,
};
use vaultkey_frame::msg;

fn device() -> SimulatedDevice {
    let kdf = KdfConfig {
        memory_kib: 64,
        iterations: 1,
        ..KdfConfig::default()
    };
    SimulatedDevice::new("1234", &kdf).unwrap()
}

async fn channel_with(device: &SimulatedDevice, config: ChannelConfig) -> (CommandChannel, Arc<DeviceSession>) {
    let session = Arc::new(DeviceSession::new());
    let channel = CommandChannel::new(Arc::clone(&session), config).unwrap();
    channel.attach(Box::new(device.link())).await.unwrap();
    (channel, session)
}

fn fast() -> ChannelConfig {
    ChannelConfig {
        default_timeout: Duration::from_millis(500),
        ..ChannelConfig::default()
    }
}

#[tokio::test]
async fn commands_run_in_submission_order() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;

    let (a, b, c) = tokio::join!(
        channel.send(msg::PING, "a"),
        channel.send(msg::PING, "b"),
        channel.send(msg::PING, "c"),
    );
    assert_eq!(a.unwrap().as_ref(), b"a");
    assert_eq!(b.unwrap().as_ref(), b"b");
    assert_eq!(c.unwrap().as_ref(), b"c");

    let order: Vec<_> = device
        .payloads_received(msg::PING)
        .iter()
        .map(|p| p.to_vec())
        .collect();
    assert_eq!(order, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_each_get_their_own_answer() {
    let device = device();
    device.set_latency(Duration::from_millis(2));
    let (channel, _session) = channel_with(&device, fast()).await;
    let channel = Arc::new(channel);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let channel = Arc::clone(&channel);
        tasks.push(tokio::spawn(async move {
            let text = format!("caller-{i}");
            for _ in 0..4 {
                let echo = channel.send(msg::PING, text.clone()).await.unwrap();
                assert_eq!(echo.as_ref(), text.as_bytes());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(device.frames_received(msg::PING), 64);
}

#[tokio::test]
async fn timeout_degrades_and_success_recovers() {
    let device = device();
    let (channel, session) = channel_with(&device, fast()).await;

    device.set_silent(true);
    let err = channel
        .send_with_timeout(msg::PING, "PING", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Timeout(_)));
    assert_eq!(session.status(), DeviceStatus::Degraded);
    assert!(!session.status().is_connected());

    device.set_silent(false);
    channel.send(msg::PING, "PING").await.unwrap();
    assert_eq!(session.status(), DeviceStatus::Connected);
}

#[tokio::test]
async fn late_replies_are_dropped_as_stale() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;

    device.set_latency(Duration::from_millis(300));
    let err = channel
        .send_with_timeout(msg::INFO, Vec::<u8>::new(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Timeout(_)));

    device.set_latency(Duration::ZERO);
    let echo = channel
        .send_with_timeout(msg::PING, "PING", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(echo.as_ref(), b"PING");
}

#[tokio::test]
async fn expired_requests_are_never_written() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;
    device.set_silent(true);

    let (first, second) = tokio::join!(
        channel.send_with_timeout(msg::PING, "PING", Duration::from_millis(300)),
        channel.send_with_timeout(msg::INFO, Vec::<u8>::new(), Duration::from_millis(100)),
    );
    assert!(matches!(first, Err(DeviceError::Timeout(_))));
    assert!(matches!(second, Err(DeviceError::Timeout(_))));
    assert_eq!(device.frames_received(msg::PING), 1);
    assert_eq!(device.frames_received(msg::INFO), 0);
}

#[tokio::test]
async fn link_loss_flushes_the_queue() {
    let device = device();
    let (channel, session) = channel_with(&device, fast()).await;
    device.set_latency(Duration::from_millis(200));

    let (a, b, c, ()) = tokio::join!(
        channel.send(msg::PING, "a"),
        channel.send(msg::PING, "b"),
        channel.send(msg::PING, "c"),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.disconnect();
        },
    );
    for result in [a, b, c] {
        assert!(matches!(result, Err(DeviceError::LinkLost(_))), "{result:?}");
    }
    assert_eq!(session.status(), DeviceStatus::Disconnected);
    assert_eq!(device.frames_received(msg::PING), 1);

    let err = channel.send(msg::PING, "d").await.unwrap_err();
    assert!(matches!(err, DeviceError::Disconnected));
}

#[tokio::test]
async fn reattach_during_link_loss_ends_connected() {
    let device = device();
    let (channel, session) = channel_with(&device, fast()).await;
    let channel = Arc::new(channel);
    device.set_latency(Duration::from_millis(300));

    let in_flight = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.send(msg::PING, "old").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    channel.attach(Box::new(device.link())).await.unwrap();
    let epoch = session.epoch();
    device.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    device.reconnect();
    device.set_latency(Duration::ZERO);

    assert!(matches!(in_flight.await.unwrap(), Err(DeviceError::LinkLost(_))));
    let echo = channel.send(msg::PING, "PING").await.unwrap();
    assert_eq!(echo.as_ref(), b"PING");
    assert_eq!(session.status(), DeviceStatus::Connected);
    assert_eq!(session.epoch(), epoch);
}

#[tokio::test]
async fn stalled_writes_release_the_worker() {
    let device = device();
    let (channel, session) = channel_with(&device, fast()).await;
    device.set_stalled(true);

    let started = std::time::Instant::now();
    let err = channel
        .send_with_timeout(msg::PING, "PING", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::LinkLost(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(session.status(), DeviceStatus::Disconnected);

    let err = channel.send(msg::PING, "PING").await.unwrap_err();
    assert!(matches!(err, DeviceError::Disconnected));

    device.set_stalled(false);
    channel.attach(Box::new(device.link())).await.unwrap();
    let echo = channel.send(msg::PING, "again").await.unwrap();
    assert_eq!(echo.as_ref(), b"again");
}

#[tokio::test]
async fn secret_payloads_reach_the_device_unchanged() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;

    let reply = channel
        .send_secret(msg::KEYBOARD_TYPE, zeroize::Zeroizing::new(b"hunter2".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply.as_ref(), b"OK");
    assert_eq!(device.typed(), vec![b"hunter2".to_vec()]);
}

#[tokio::test]
async fn full_queue_is_busy() {
    let device = device();
    let config = ChannelConfig {
        queue_depth: 1,
        ..fast()
    };
    let (channel, _session) = channel_with(&device, config).await;
    let channel = Arc::new(channel);
    device.set_silent(true);

    let in_flight = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.send(msg::PING, "first").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let queued = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.send(msg::PING, "second").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = channel.send(msg::PING, "third").await.unwrap_err();
    assert!(matches!(err, DeviceError::Busy(1)));

    assert!(matches!(in_flight.await.unwrap(), Err(DeviceError::Timeout(_))));
    assert!(matches!(queued.await.unwrap(), Err(DeviceError::Timeout(_))));
}

#[tokio::test]
async fn device_refusals_become_typed_errors() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;

    let err = channel.send(msg::VAULT_LIST, Vec::<u8>::new()).await.unwrap_err();
    assert!(matches!(err, DeviceError::AuthRequired));

    let err = channel.send(99, Vec::<u8>::new()).await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ref token) if token == "UNSUPPORTED"));
}

#[tokio::test]
async fn unsolicited_frames_are_skipped() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;

    device.inject_frame(41, b"\x01x\x01y");
    let echo = channel.send(msg::PING, "PING").await.unwrap();
    assert_eq!(echo.as_ref(), b"PING");
}

#[tokio::test]
async fn shutdown_joins_the_worker() {
    let device = device();
    let (channel, _session) = channel_with(&device, fast()).await;
    channel.send(msg::PING, "PING").await.unwrap();
    tokio::task::spawn_blocking(move || channel.shutdown())
        .await
        .unwrap();
}
