use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vaultkey_core::{HostConfig, KdfConfig, ManualClock, SimulatedDevice, VaultKeyHost};
use vaultkey_frame::msg;

async fn setup(now: u64) -> (SimulatedDevice, VaultKeyHost, Arc<ManualClock>) {
    let kdf = KdfConfig {
        memory_kib: 64,
        iterations: 1,
        ..KdfConfig::default()
    };
    let device = SimulatedDevice::new("1234", &kdf).unwrap();
    let clock = Arc::new(ManualClock::new(now));
    let config = HostConfig {
        kdf,
        ..HostConfig::default()
    };
    let host = VaultKeyHost::with_clock(config, clock.clone()).unwrap();
    host.attach_link(Box::new(device.link())).await.unwrap();
    (device, host, clock)
}

async fn wait_for_frames(device: &SimulatedDevice, msg_type: u8, count: usize) {
    for _ in 0..100 {
        if device.frames_received(msg_type) >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn overlapping_refreshes_fetch_once() {
    let (device, host, _clock) = setup(1_700_000_000).await;
    device.set_latency(Duration::from_millis(100));

    let provider = host.totp();
    let (first, second) = tokio::join!(provider.refresh(), provider.refresh());
    let results = [first.unwrap(), second.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    assert_eq!(device.frames_received(msg::TOTP), 1);

    assert!(provider.refresh().await.unwrap().is_some());
    assert_eq!(device.frames_received(msg::TOTP), 2);
}

#[tokio::test]
async fn countdown_fetches_at_start_and_at_each_boundary() {
    let (device, host, clock) = setup(1_699_999_981).await;
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(host.totp()).run(Duration::from_millis(10), cancel.clone()));

    wait_for_frames(&device, msg::TOTP, 1).await;
    assert_eq!(device.frames_received(msg::TOTP), 1);

    for _ in 0..10 {
        clock.advance(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(device.frames_received(msg::TOTP), 1, "still inside the first window");

    clock.set(1_700_000_010);
    wait_for_frames(&device, msg::TOTP, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(device.frames_received(msg::TOTP), 2);

    let state = host.totp_state();
    assert_eq!(state.seconds_remaining, 30);
    assert!(state.code.is_some());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn last_completed_fetch_is_kept_even_if_its_clock_reading_is_older() {
    let (_device, host, clock) = setup(1_700_000_040).await;
    let provider = host.totp();

    provider.current_code().await.unwrap();
    clock.set(1_700_000_010);
    let code = provider.current_code().await.unwrap();

    assert_eq!(host.totp_state().code, Some(code));
}
