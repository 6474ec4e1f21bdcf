//! TCP client for probe devices
//!
//! One poll is one short-lived connection: dial, send the command, read until
//! the frame terminator or the deadline, decode. The whole exchange shares a
//! single deadline, so a stalled device costs at most `timeout`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace, warn};

use crate::ProbeEndpoint;
use crate::protocol::{self, RawReading, TERMINATOR};

const READ_CHUNK: usize = 1024;

/// Connectivity failures, scoped to a single endpoint.
#[derive(Debug)]
pub enum ProbeError {
    ConnectTimeout(Duration),
    Connect(std::io::Error),
    Write(std::io::Error),
    WriteTimeout,
    Read(std::io::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::ConnectTimeout(timeout) => {
                write!(f, "connection timed out after {}ms", timeout.as_millis())
            }
            ProbeError::Connect(err) => write!(f, "connection failed: {err}"),
            ProbeError::Write(err) => write!(f, "write failed: {err}"),
            ProbeError::WriteTimeout => write!(f, "write timed out"),
            ProbeError::Read(err) => write!(f, "read failed: {err}"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Connect(err) | ProbeError::Write(err) | ProbeError::Read(err) => Some(err),
            _ => None,
        }
    }
}

/// Result of one successful exchange.
#[derive(Debug, Clone, Default)]
pub struct PollResponse {
    /// Bytes as received, terminator included.
    pub frame: Vec<u8>,
    pub readings: Vec<RawReading>,
}

/// Anything that can ask a probe endpoint for its current values.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn poll(
        &self,
        endpoint: &ProbeEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<PollResponse, ProbeError>;
}

/// The real thing: plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpProbeClient;

impl TcpProbeClient {
    pub fn new() -> Self {
        Self
    }

    /// Read until the buffer ends in `0x0D`, the peer closes, or the
    /// deadline passes. Running out of time with data in hand is not an error.
    async fn read_frame(
        stream: &mut TcpStream,
        deadline: Instant,
    ) -> Result<Vec<u8>, ProbeError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut frame = Vec::new();

        loop {
            match timeout_at(deadline, stream.read(&mut chunk)).await {
                Err(_) => {
                    trace!("read deadline reached with {} byte(s)", frame.len());
                    break;
                }
                Ok(Ok(0)) => {
                    trace!("peer closed connection");
                    break;
                }
                Ok(Ok(n)) => {
                    frame.extend_from_slice(&chunk[..n]);
                    if frame.last() == Some(&TERMINATOR) {
                        break;
                    }
                }
                Ok(Err(e)) if frame.is_empty() => return Err(ProbeError::Read(e)),
                Ok(Err(e)) => {
                    debug!("read error after {} byte(s), using partial frame: {e}", frame.len());
                    break;
                }
            }
        }

        Ok(frame)
    }
}

#[async_trait]
impl ProbeTransport for TcpProbeClient {
    #[instrument(skip(self, timeout), fields(endpoint = %endpoint))]
    async fn poll(
        &self,
        endpoint: &ProbeEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<PollResponse, ProbeError> {
        let deadline = Instant::now() + timeout;
        let address = endpoint.to_string();

        let mut stream = match timeout_at(deadline, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("{address}: connection failed: {e}");
                return Err(ProbeError::Connect(e));
            }
            Err(_) => {
                warn!("{address}: connection timed out");
                return Err(ProbeError::ConnectTimeout(timeout));
            }
        };

        let request = protocol::encode_request(command);
        match timeout_at(deadline, stream.write_all(&request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("{address}: write failed: {e}");
                return Err(ProbeError::Write(e));
            }
            Err(_) => {
                warn!("{address}: write timed out");
                return Err(ProbeError::WriteTimeout);
            }
        }

        let frame = Self::read_frame(&mut stream, deadline).await?;
        if frame.is_empty() {
            debug!("{address}: no response data");
            return Ok(PollResponse::default());
        }

        trace!("{address}: received {}", protocol::hex_dump(&frame));
        let readings = protocol::decode(&frame);
        debug!("{address}: parsed {} probe(s)", readings.len());

        Ok(PollResponse { frame, readings })
    }
}
