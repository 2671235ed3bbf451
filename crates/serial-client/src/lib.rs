use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{sleep, timeout};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use cotek_protocol::{frame, RESPONSE_DELIMITER};

const DEFAULT_PORT_PATH: &str = "/dev/serial/by-id/usb-FTDI_US232B_FTBTMP72-if00-port0";
const DEFAULT_BAUD_RATE: u32 = 4_800;

/// Where the inverter's serial line lives.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port_path: String,
    pub baud_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port_path: DEFAULT_PORT_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to open serial port {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response delimiter after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("serial line closed")]
    Closed,
    #[error("serial line out of step after an unanswered request")]
    Desynchronized,
}

impl ClientError {
    /// Whether the link itself is gone and the loop must reconnect.
    ///
    /// A timeout leaves the port usable but the transport that saw it is
    /// spent: the late reply may still arrive, so it has to be reopened
    /// before the next exchange.
    pub fn breaks_link(&self) -> bool {
        !matches!(self, ClientError::Timeout { .. })
    }
}

/// Half-duplex request/response exchange with the device.
#[async_trait]
pub trait Transport: Send {
    /// Writes `wire` plus the line terminator and reads up to and including
    /// the response delimiter.
    async fn send_and_receive(
        &mut self,
        wire: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, ClientError>;
}

/// Factory for transports; called again after every link break.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn open(&self) -> Result<Self::Transport, ClientError>;
}

/// Transport over any byte stream.
///
/// After a timeout every further exchange fails with `Desynchronized`, so a
/// reply that turns up late can never be read as the answer to a later
/// command.
#[derive(Debug)]
pub struct LineTransport<S> {
    stream: BufReader<S>,
    label: String,
    desynced: bool,
}

pub type SerialTransport = LineTransport<SerialStream>;

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            label: label.into(),
            desynced: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Drops bytes left in the read buffer by a previous exchange.
    fn discard_buffered(&mut self) {
        let buffered = self.stream.buffer().len();
        if buffered > 0 {
            debug!(port = %self.label, bytes = buffered, "discarding trailing bytes");
            AsyncBufRead::consume(Pin::new(&mut self.stream), buffered);
        }
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, ClientError> {
        let last = RESPONSE_DELIMITER[RESPONSE_DELIMITER.len() - 1];
        let mut buf = Vec::new();

        loop {
            let read = self.stream.read_until(last, &mut buf).await?;
            if read == 0 {
                return Err(ClientError::Closed);
            }
            if buf.ends_with(RESPONSE_DELIMITER) {
                return Ok(buf);
            }
        }
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_and_receive(
        &mut self,
        wire: &str,
        limit: Duration,
    ) -> Result<Vec<u8>, ClientError> {
        if self.desynced {
            return Err(ClientError::Desynchronized);
        }
        self.discard_buffered();
        self.stream.write_all(&frame(wire)).await?;
        self.stream.flush().await?;

        match timeout(limit, self.read_response()).await {
            Ok(Ok(response)) => {
                debug!(port = %self.label, command = wire, bytes = response.len(), "serial exchange ok");
                Ok(response)
            }
            Ok(Err(err)) => {
                warn!(port = %self.label, command = wire, error = %err, "serial exchange failed");
                Err(err)
            }
            Err(_) => {
                warn!(port = %self.label, command = wire, "serial read timeout");
                self.desynced = true;
                Err(ClientError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }
}

/// Opens the configured serial device.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: ClientConfig,
}

impl SerialConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Transport = SerialTransport;

    async fn open(&self) -> Result<SerialTransport, ClientError> {
        let stream = tokio_serial::new(&self.config.port_path, self.config.baud_rate)
            .open_native_async()
            .map_err(|err| ClientError::Open {
                path: self.config.port_path.clone(),
                reason: err.to_string(),
            })?;
        // bytes queued by the OS belong to requests made on an earlier handle
        if let Err(err) = stream.clear(ClearBuffer::Input) {
            warn!(port = %self.config.port_path, error = %err, "serial input flush failed");
        }

        Ok(LineTransport::new(stream, self.config.port_path.clone()))
    }
}

/// Opens a transport, retrying forever at a fixed interval.
///
/// `on_failure` sees every failed attempt (1-based) before the pause.
pub async fn connect_with_retry<C, F>(connector: &C, interval: Duration, mut on_failure: F) -> C::Transport
where
    C: Connector + ?Sized,
    F: FnMut(u64, &ClientError),
{
    let mut attempt = 0u64;

    loop {
        attempt = attempt.saturating_add(1);
        match connector.open().await {
            Ok(transport) => {
                info!(attempt, "serial line open");
                return transport;
            }
            Err(err) => {
                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = interval.as_millis() as u64,
                    "serial open failed"
                );
                on_failure(attempt, &err);
                sleep(interval).await;
            }
        }
    }
}
