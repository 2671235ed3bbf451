use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serial_client::{
    connect_with_retry, ClientConfig, ClientError, Connector, LineTransport, Transport,
};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

#[tokio::test]
async fn exchange_reads_up_to_delimiter() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let device_task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        device.read_line(&mut line).await.expect("read command");
        // split the reply so the reader has to stitch it together
        device.get_mut().write_all(b"12>34.").await.expect("write");
        device.get_mut().write_all(b"5=").await.expect("write");
        device.get_mut().write_all(b">").await.expect("write");
        line
    });

    let response = transport
        .send_and_receive("PINV?", Duration::from_secs(1))
        .await
        .expect("exchange");

    assert_eq!(response, b"12>34.5=>".to_vec());
    assert_eq!(device_task.await.expect("join"), "PINV?\r\n");
}

#[tokio::test]
async fn consecutive_exchanges_keep_framing() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let device_task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        for reply in [&b"50.0=>"[..], &b"230.1=>"[..]] {
            let mut line = String::new();
            device.read_line(&mut line).await.expect("read command");
            device.get_mut().write_all(reply).await.expect("write");
        }
        device
    });

    let first = transport
        .send_and_receive("FRQ?", Duration::from_secs(1))
        .await
        .expect("first");
    let second = transport
        .send_and_receive("VINV?", Duration::from_secs(1))
        .await
        .expect("second");

    assert_eq!(first, b"50.0=>".to_vec());
    assert_eq!(second, b"230.1=>".to_vec());
    drop(device_task.await.expect("join"));
}

#[tokio::test]
async fn silent_device_times_out_without_breaking_link() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let err = transport
        .send_and_receive("TTR?", Duration::from_millis(20))
        .await
        .expect_err("timeout");

    assert!(matches!(err, ClientError::Timeout { timeout_ms: 20 }));
    assert!(!err.breaks_link());
    drop(device);
}

#[tokio::test]
async fn hangup_mid_response_breaks_link() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let device_task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        device.read_line(&mut line).await.expect("read command");
        device.get_mut().write_all(b"12.").await.expect("write");
    });

    let err = transport
        .send_and_receive("IBAT?", Duration::from_secs(1))
        .await
        .expect_err("closed");
    device_task.await.expect("join");

    assert!(matches!(err, ClientError::Closed));
    assert!(err.breaks_link());
}

#[tokio::test]
async fn late_reply_is_never_credited_to_next_command() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let device_task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        device.read_line(&mut line).await.expect("read command");
        tokio::time::sleep(Duration::from_millis(60)).await;
        device.get_mut().write_all(b"1.0=>").await.expect("write");
        device
    });

    let first = transport
        .send_and_receive("POWER ?", Duration::from_millis(20))
        .await
        .expect_err("timeout");
    assert!(matches!(first, ClientError::Timeout { .. }));
    assert!(transport.is_desynced());

    let mut device = device_task.await.expect("join");
    let second = transport
        .send_and_receive("CHAOFF ?", Duration::from_millis(200))
        .await
        .expect_err("desynchronized");

    assert!(matches!(second, ClientError::Desynchronized));
    assert!(second.breaks_link());
    drop(transport);
    let mut rest = String::new();
    device.read_line(&mut rest).await.expect("read rest");
    assert_eq!(rest, "", "nothing written after the timeout");
}

#[tokio::test]
async fn trailing_bytes_do_not_leak_into_next_reply() {
    let (client, device) = duplex(256);
    let mut transport = LineTransport::new(client, "duplex");

    let device_task = tokio::spawn(async move {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        device.read_line(&mut line).await.expect("read command");
        device.get_mut().write_all(b"50.0=>\r\n").await.expect("write");
        line.clear();
        device.read_line(&mut line).await.expect("read command");
        device.get_mut().write_all(b"26.4=>").await.expect("write");
        device
    });

    let first = transport
        .send_and_receive("FRQ?", Duration::from_secs(1))
        .await
        .expect("first");
    let second = transport
        .send_and_receive("VBAT?", Duration::from_secs(1))
        .await
        .expect("second");

    assert_eq!(first, b"50.0=>".to_vec());
    assert_eq!(second, b"26.4=>".to_vec());
    drop(device_task.await.expect("join"));
}

struct FlakyConnector {
    failures: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl Connector for FlakyConnector {
    type Transport = LineTransport<DuplexStream>;

    async fn open(&self) -> Result<Self::Transport, ClientError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ClientError::Open {
                path: "/dev/ttyFAKE".to_string(),
                reason: "no such device".to_string(),
            });
        }
        let (client, _device) = duplex(16);
        Ok(LineTransport::new(client, "flaky"))
    }
}

#[tokio::test]
async fn connect_retries_until_open() {
    let connector = FlakyConnector {
        failures: 2,
        attempts: AtomicUsize::new(0),
    };
    let mut seen = Vec::new();

    let transport = connect_with_retry(&connector, Duration::from_millis(1), |attempt, err| {
        assert!(err.breaks_link());
        seen.push(attempt);
    })
    .await;

    assert_eq!(transport.label(), "flaky");
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn default_config_matches_device() {
    let config = ClientConfig::default();
    assert_eq!(config.baud_rate, 4_800);
    assert!(config.port_path.starts_with("/dev/serial/by-id/"));
}
