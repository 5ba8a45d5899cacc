//! Emulation of the control panel.
//!
//! The panel owns the bus: once per period it sends the current settings and
//! reads back its own echo followed by the unit's reply. Settings edits come in
//! from the console at any time and are picked up by the next period.

use std::fmt::Display;
use std::sync::Arc;

use colored::Colorize;
use futures::{FutureExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::protocol::codec::{Frame, FrameError, FRAME_LEN};
use crate::settings::{CommandError, Settings, SettingsEdit};

/// Echo of our frame plus the unit's reply.
pub const RESPONSE_LEN: usize = 2 * FRAME_LEN;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("not sending settings: {0}")]
    Encode(#[from] FrameError),
    #[error("short response from bus: {received:02x?}")]
    ShortResponse { received: Vec<u8> },
    #[error("transport closed")]
    TransportClosed,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl PanelError {
    /// The port is gone, nothing more can be sent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PanelError::TransportClosed | PanelError::Io(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsState {
    /// Settings in the most recent frame sent.
    pub last_sent: Settings,

    /// Settings to go out with the next frame.
    pub pending: Settings,
}

/// Settings shared between the bus loop and the console.
#[derive(Clone, Default)]
pub struct SharedSettings {
    state: Arc<Mutex<SettingsState>>,
}

impl SharedSettings {
    pub fn new(initial: Settings) -> Self {
        Self {
            state: Arc::new(Mutex::new(SettingsState {
                last_sent: initial.clone(),
                pending: initial,
            })),
        }
    }

    pub async fn snapshot(&self) -> SettingsState {
        self.state.lock().await.clone()
    }

    /// Frame for this period.
    ///
    /// Pending settings that differ from the last sent ones are sent with the
    /// changed bit set and become the last sent settings. Otherwise the last
    /// sent settings are repeated.
    pub async fn next_frame(&self) -> Result<Frame, FrameError> {
        let mut state = self.state.lock().await;

        if state.pending != state.last_sent {
            let frame = state.pending.to_frame(true)?;
            state.last_sent = state.pending.clone();
            Ok(frame)
        } else {
            state.last_sent.to_frame(false)
        }
    }

    /// Replace one field.
    ///
    /// The edit is applied on top of the last *sent* settings, not on top of
    /// earlier edits still pending: of several edits made within one period
    /// only the last one goes out.
    pub async fn apply(&self, edit: SettingsEdit) -> Result<Settings, CommandError> {
        let mut state = self.state.lock().await;

        let pending = state.last_sent.with(edit);
        pending.to_frame(true)?;

        state.pending = pending.clone();
        debug!(attribute = %edit.attribute(), "pending settings updated");

        Ok(pending)
    }

    /// Parse and apply an `attribute=value` command.
    pub async fn apply_line(&self, line: &str) -> Result<Settings, CommandError> {
        self.apply(line.parse()?).await
    }
}

/// One period's exchange on the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub sent: Frame,
    pub response: [u8; RESPONSE_LEN],
}

impl TickReport {
    pub fn echo(&self) -> &[u8] {
        &self.response[..FRAME_LEN]
    }

    pub fn reply(&self) -> Result<Frame, FrameError> {
        Frame::from_bytes(&self.response[FRAME_LEN..])
    }
}

pub struct PanelMaster<T> {
    port: T,
    config: PanelConfig,
    settings: SharedSettings,
}

impl<T> PanelMaster<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(port: T, config: PanelConfig, settings: SharedSettings) -> Self {
        Self { port, config, settings }
    }

    /// Tick once per period until the port fails.
    ///
    /// The first frame goes out one period after start.
    pub async fn run(mut self) -> Result<(), PanelError> {
        info!(period = ?self.config.period, "panel started");

        let mut interval = interval_at(Instant::now() + self.config.period, self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.tick().await {
                Ok(_) => (),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("{err}"),
            }
        }
    }

    /// Send this period's frame and collect the response.
    pub async fn tick(&mut self) -> Result<TickReport, PanelError> {
        let sent = self.settings.next_frame().await?;

        let stale = self.discard_input().await?;
        if !stale.is_empty() {
            warn!("discarding {} stale bytes {stale:02x?}", stale.len());
        }

        self.port.write_all(sent.as_bytes()).await?;
        self.port.flush().await?;

        let response = self.read_response().await?;
        let report = TickReport { sent, response };

        info!("{:02x?}", report.response);

        if report.echo() != &sent.as_bytes()[..] {
            warn!("echo mismatch: sent {:02x?}, bus returned {:02x?}", sent.as_bytes(), report.echo());
        }

        if let Err(err) = report.reply() {
            warn!("bad reply from unit: {err}");
        }

        Ok(report)
    }

    /// Throw away anything already waiting on the port, such as the tail of
    /// a response that arrived after its deadline.
    async fn discard_input(&mut self) -> Result<Vec<u8>, PanelError> {
        let mut stale = Vec::new();
        let mut buf = [0u8; RESPONSE_LEN];

        while let Some(read) = self.port.read(&mut buf).now_or_never() {
            match read {
                Ok(0) => return Err(PanelError::TransportClosed),
                Ok(n) => stale.extend_from_slice(&buf[..n]),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(stale)
    }

    async fn read_response(&mut self) -> Result<[u8; RESPONSE_LEN], PanelError> {
        let deadline = Instant::now() + self.config.response_timeout;

        let mut response = [0u8; RESPONSE_LEN];
        let mut received = 0;

        while received < RESPONSE_LEN {
            match timeout_at(deadline, self.port.read(&mut response[received..])).await {
                Err(_) => {
                    return Err(PanelError::ShortResponse {
                        received: response[..received].to_vec(),
                    })
                }
                Ok(Ok(0)) => return Err(PanelError::TransportClosed),
                Ok(Ok(n)) => received += n,
                Ok(Err(err)) => return Err(err.into()),
            }
        }

        Ok(response)
    }
}

/// Apply console commands until the input ends.
///
/// Every line gets a reply on stdout; bad commands never stop the loop.
pub async fn user_loop<S, E>(settings: SharedSettings, mut lines: S)
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: Display,
{
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                println!("{}", format!("ooops: {err}").red());
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match settings.apply_line(&line).await {
            Ok(pending) => println!("{}", format!("next: {pending:?}").green()),
            Err(err) => println!("{}", err.to_string().red()),
        }
    }

    info!("console closed");
}
