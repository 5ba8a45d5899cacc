use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use url::Url;

use crate::protocol::replies::PollReply;

/// The bus runs at 104 baud, 8N1.
pub const BAUD_RATE: u32 = 104;

pub enum Port {
    Serial(SerialStream),
    TcpRaw(TcpStream),
}

/// A byte channel onto the bus.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Parse a port argument.
///
/// Accepts `serial:///dev/ttyUSB0` or `tcp+raw://host:port` URLs. Anything that
/// isn't a URL is taken to be a serial device path.
pub fn port_url(arg: &str) -> Result<Url, url::ParseError> {
    match Url::parse(arg) {
        Ok(url) if url.scheme().len() > 1 => Ok(url),
        // windows drive letters ("C:\...") parse as a one letter scheme
        _ => Url::parse(&format!("serial:{arg}")),
    }
}

impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        match url.scheme() {
            "serial" => {
                let path = url.path();

                let port = tokio_serial::new(path, BAUD_RATE)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .parity(tokio_serial::Parity::None)
                    .stop_bits(tokio_serial::StopBits::One)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {path}"))?;

                Ok(Self::Serial(port))
            }
            "tcp+raw" => {
                let host = url
                    .host_str()
                    .with_context(|| format!("tcp+raw requires a host to be specified in the url: {url}"))?;

                let port = url
                    .port()
                    .with_context(|| format!("tcp+raw requires a port number to be specified in the url: {url}"))?;

                let stream = TcpStream::connect((host, port))
                    .await
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::TcpRaw(stream))
            }
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn transport(self) -> Box<dyn Transport> {
        match self {
            Port::Serial(port) => Box::new(port),
            Port::TcpRaw(stream) => Box::new(stream),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// A read that yields nothing for this long drops any partial frame.
    pub read_timeout: Duration,

    /// Consecutive read timeouts tolerated while collecting our own echo.
    pub echo_timeouts: usize,

    pub poll_reply: PollReply,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(300),
            echo_timeouts: 10,
            poll_reply: PollReply::default(),
        }
    }
}

/// Shortest period the panel may be configured with.
pub const MIN_PERIOD_SECS: u64 = 2;

#[derive(Clone, Debug)]
pub struct PanelConfig {
    /// Time between control frames
    pub period: Duration,

    /// How long to wait for the echo and the unit's reply after sending.
    pub response_timeout: Duration,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(4),
            response_timeout: Duration::from_millis(1500),
        }
    }
}
