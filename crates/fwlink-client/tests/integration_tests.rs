//! Integration tests for fwlink-client
//!
//! These tests run the real HTTP transport and liveness probe against an
//! in-process mock device or raw TCP listeners.

use std::time::Duration;

use fwlink_client::testing::{DeviceBehavior, MockDevice, UploadReply};
use fwlink_client::{
    Caveat, Outcome, PollResult, TransactionReport, TransactionState, UpdateConfig,
    UpdateController, UpdateEvent, UpdateImage,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

// =============================================================================
// Helpers
// =============================================================================

fn firmware(size: usize) -> UpdateImage {
    let mut data = vec![0u8; size];
    data[0] = 0xE9; // ESP image magic
    UpdateImage::new("camera.bin", data)
}

async fn run(controller: &UpdateController, image: UpdateImage) -> (Vec<u8>, TransactionReport) {
    let mut transaction = controller.start(image).expect("transaction should start");
    let mut percents = Vec::new();
    let mut report = None;

    while let Some(event) = transaction.next_event().await {
        match event {
            UpdateEvent::Progress(p) => percents.push(p.percent),
            UpdateEvent::Finished(r) => {
                assert!(report.is_none(), "more than one terminal notification");
                report = Some(r);
            }
            _ => {}
        }
    }

    (percents, report.expect("transaction should finish"))
}

/// A device that reads the whole upload and then drops the connection
/// without answering, as it does when it reboots straight after flashing.
async fn rebooting_device() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 8192];
        let read_all = async {
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.ends_with(b"--\r\n") || request.ends_with(b"--\r\n\r\n0\r\n\r\n") {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(5), read_all).await;
        drop(socket);
    });

    format!("http://{}", addr)
}

/// A device that drains the upload slowly and never answers
///
/// The returned receiver fires once the client has closed the connection.
async fn slow_device() -> (String, tokio::sync::oneshot::Receiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = 0;
        let mut buf = [0u8; 8192];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received += n,
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let _ = closed_tx.send(received);
    });

    (format!("http://{}", addr), closed_rx)
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_full_update() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Accept,
        alive_after: Some(2),
    })
    .await
    .unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (percents, report) = run(&controller, firmware(64 * 1024)).await;

    assert_eq!(report.state, TransactionState::Succeeded);
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.reconnect, Some(PollResult::Alive { attempts: 2 }));
    assert_eq!(report.caveat, None);
    assert_eq!(device.uploads(), 1);
    assert!(device.uploaded_bytes() > 64 * 1024);
    assert_eq!(device.health_probes(), 2);

    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert!(percents.iter().all(|p| *p <= 100));
    assert_eq!(controller.state(), TransactionState::Succeeded);
}

#[tokio::test]
async fn test_device_rejects_image() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Reject("bad magic byte".into()),
        alive_after: Some(1),
    })
    .await
    .unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (_, report) = run(&controller, firmware(4096)).await;

    assert_eq!(report.state, TransactionState::Failed);
    assert_eq!(
        report.outcome,
        Outcome::ValidationFailure("bad magic byte".into())
    );
    assert_eq!(report.reconnect, None);
    assert_eq!(device.health_probes(), 0);
}

#[tokio::test]
async fn test_http_error_status() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Raw {
            status: 500,
            body: "Internal Server Error".into(),
        },
        alive_after: Some(1),
    })
    .await
    .unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (_, report) = run(&controller, firmware(4096)).await;
    assert_eq!(
        report.outcome,
        Outcome::ValidationFailure("upload failed: HTTP 500".into())
    );
}

#[tokio::test]
async fn test_unparseable_reply() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Raw {
            status: 200,
            body: "OK".into(),
        },
        alive_after: Some(1),
    })
    .await
    .unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (_, report) = run(&controller, firmware(1024)).await;
    assert_eq!(
        report.outcome,
        Outcome::ValidationFailure("unparseable response".into())
    );
}

#[tokio::test]
async fn test_invalid_image_is_not_sent() {
    let device = MockDevice::start(DeviceBehavior::default()).await.unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (percents, report) = run(&controller, UpdateImage::new("firmware.bin", Vec::new())).await;

    assert_eq!(report.state, TransactionState::Failed);
    assert!(matches!(report.outcome, Outcome::ValidationFailure(ref r) if r.starts_with("empty")));
    assert!(percents.is_empty());
    assert_eq!(device.uploads(), 0);
}

#[tokio::test]
async fn test_oversized_image_is_not_sent() {
    let device = MockDevice::start(DeviceBehavior::default()).await.unwrap();
    let mut config = device.config();
    config.image.max_size = 1024;
    let controller = UpdateController::from_config(&config).unwrap();

    let (_, report) = run(&controller, firmware(1025)).await;

    assert!(matches!(report.outcome, Outcome::ValidationFailure(ref r) if r.contains("too large")));
    assert_eq!(device.uploads(), 0);
}

#[tokio::test]
async fn test_transfer_timeout() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Stall(Duration::from_secs(5)),
        alive_after: Some(1),
    })
    .await
    .unwrap();
    let mut config = device.config();
    config.timeouts.transfer_ms = 200;
    let controller = UpdateController::from_config(&config).unwrap();

    let (_, report) = run(&controller, firmware(2048)).await;

    assert_eq!(report.outcome, Outcome::Timeout);
    assert_eq!(report.state, TransactionState::Failed);
    assert_eq!(device.health_probes(), 0);
}

#[tokio::test]
async fn test_cancel_releases_connection() {
    let (base_url, closed) = slow_device().await;
    let config = UpdateConfig::builder(base_url).build();
    let controller = UpdateController::from_config(&config).unwrap();

    let mut transaction = controller.start(firmware(2 * 1024 * 1024)).unwrap();
    let mut report = None;
    while let Some(event) = transaction.next_event().await {
        match event {
            UpdateEvent::Progress(_) => transaction.cancel(),
            UpdateEvent::Finished(r) => report = Some(r),
            _ => {}
        }
    }

    let report = report.expect("transaction should finish");
    assert_eq!(report.outcome, Outcome::Aborted);
    assert_eq!(report.state, TransactionState::Failed);
    assert_eq!(report.reconnect, None);
    assert_eq!(controller.state(), TransactionState::Failed);

    // Dropping the request closes the socket on the device side
    let received = tokio::time::timeout(Duration::from_secs(10), closed)
        .await
        .expect("device should see the connection close")
        .unwrap();
    assert!(received > 0);
}

#[tokio::test]
async fn test_device_never_returns() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Accept,
        alive_after: None,
    })
    .await
    .unwrap();
    let mut config = device.config();
    config.reconnect.max_attempts = 3;
    let controller = UpdateController::from_config(&config).unwrap();

    let (_, report) = run(&controller, firmware(2048)).await;

    assert_eq!(report.state, TransactionState::Succeeded);
    assert_eq!(report.caveat, Some(Caveat::DeviceUnresponsivePostUpdate));
    assert_eq!(
        report.reconnect,
        Some(PollResult::ExhaustedAttempts { attempts: 3 })
    );
    assert_eq!(device.health_probes(), 3);
}

#[tokio::test]
async fn test_reboot_before_ack_counts_as_success() {
    let base_url = rebooting_device().await;
    let config = UpdateConfig::builder(base_url)
        .reconnect_attempts(1)
        .reconnect_interval_ms(1)
        .reconnect_attempt_timeout_ms(200)
        .build();
    let controller = UpdateController::from_config(&config).unwrap();

    let (percents, report) = run(&controller, firmware(32 * 1024)).await;

    assert_eq!(percents.last(), Some(&100));
    assert_eq!(report.outcome, Outcome::Success);
    // The listener is gone, so the device never answers the probe
    assert_eq!(report.caveat, Some(Caveat::DeviceUnresponsivePostUpdate));
}

#[tokio::test]
async fn test_unreachable_device_is_connection_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = UpdateConfig::builder(format!("http://{}", addr)).build();
    let controller = UpdateController::from_config(&config).unwrap();

    let (_, report) = run(&controller, firmware(2048)).await;

    assert!(matches!(report.outcome, Outcome::ConnectionFailure(_)));
    assert_eq!(report.state, TransactionState::Failed);
}

#[tokio::test]
async fn test_sequential_transactions() {
    let device = MockDevice::start(DeviceBehavior::default()).await.unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let (_, first) = run(&controller, firmware(1024)).await;
    let (_, second) = run(&controller, firmware(1024)).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_ne!(first.id, second.id);
    assert_eq!(device.uploads(), 2);
}

// =============================================================================
// Standalone reconnect
// =============================================================================

#[tokio::test]
async fn test_wait_for_device() {
    let device = MockDevice::start(DeviceBehavior {
        upload: UploadReply::Accept,
        alive_after: Some(3),
    })
    .await
    .unwrap();
    let controller = UpdateController::from_config(&device.config()).unwrap();

    let mut seen = Vec::new();
    let result = controller.poller().run(|a| seen.push(a.number)).await;

    assert_eq!(result, PollResult::Alive { attempts: 3 });
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(device.health_probes(), 3);
}
