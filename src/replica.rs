//! Emulation of the indoor unit.
//!
//! The unit listens for the panel's control frames and answers every one of
//! them. Because the bus is half duplex, our own reply comes straight back to
//! us and is checked against what was sent.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::ReplicaConfig;
use crate::protocol::codec::{Frame, FrameError, FRAME_LEN};
use crate::protocol::control;
use crate::protocol::replies::ReplyTable;
use crate::settings::Settings;

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("transport closed")]
    TransportClosed,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("intake buffer holds {0} bytes, lost frame boundary")]
    Desync(usize),
}

/// What became of one frame taken off the bus.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Replied, and the echo matched.
    Replied(Frame),
    /// Replied, but the bus gave back something else.
    EchoMismatch { sent: Frame, echoed: Vec<u8> },
    /// Bad frame, nothing sent.
    Discarded(FrameError),
}

pub struct UnitReplica<T> {
    port: T,
    config: ReplicaConfig,
    replies: ReplyTable,

    /// Bytes of a frame still being received. Always shorter than a frame
    /// between intake steps.
    buffer: BytesMut,

    last_observed: Option<Frame>,

    /// Frames logged as differing from the one before.
    changes: usize,
}

impl<T> UnitReplica<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(port: T, config: ReplicaConfig) -> Self {
        let replies = ReplyTable::indoor_unit(config.poll_reply);

        Self {
            port,
            config,
            replies,
            buffer: BytesMut::with_capacity(FRAME_LEN),
            last_observed: None,
            changes: 0,
        }
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer[..]
    }

    pub fn last_observed(&self) -> Option<&Frame> {
        self.last_observed.as_ref()
    }

    pub fn changes_observed(&self) -> usize {
        self.changes
    }

    pub async fn run(mut self) -> Result<(), ReplicaError> {
        info!(poll_reply = ?self.config.poll_reply, "indoor unit listening");

        loop {
            if let Some(bytes) = self.intake().await? {
                self.process(bytes).await?;
            }
        }
    }

    /// One read attempt. Returns a complete frame's bytes once 6 have been
    /// collected.
    ///
    /// A read that times out drops whatever was collected so far, so a glitch
    /// on the bus can't leave us permanently out of step.
    pub async fn intake(&mut self) -> Result<Option<[u8; FRAME_LEN]>, ReplicaError> {
        let mut chunk = [0u8; FRAME_LEN];
        let wanted = FRAME_LEN - self.buffer.len();

        match timeout(self.config.read_timeout, self.port.read(&mut chunk[..wanted])).await {
            Err(_) => {
                if !self.buffer.is_empty() {
                    debug!("read timed out, dropping partial frame {:02x?}", &self.buffer[..]);
                }
                self.buffer.clear();
            }
            Ok(Ok(0)) => return Err(ReplicaError::TransportClosed),
            Ok(Ok(n)) => self.buffer.put_slice(&chunk[..n]),
            Ok(Err(err)) => return Err(err.into()),
        }

        let frame = if self.buffer.len() == FRAME_LEN {
            let mut bytes = [0u8; FRAME_LEN];
            bytes.copy_from_slice(&self.buffer.split_to(FRAME_LEN));
            Some(bytes)
        } else {
            None
        };

        if self.buffer.len() >= FRAME_LEN {
            return Err(ReplicaError::Desync(self.buffer.len()));
        }

        Ok(frame)
    }

    /// Check, log and answer a complete frame.
    pub async fn process(&mut self, bytes: [u8; FRAME_LEN]) -> Result<Outcome, ReplicaError> {
        let frame = match Frame::from_bytes(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("discarding frame {bytes:02x?}: {err}");
                return Ok(Outcome::Discarded(err));
            }
        };

        self.observe(frame);

        let reply = self.replies.reply_to(&frame.data());

        self.port.write_all(reply.as_bytes()).await?;
        self.port.flush().await?;

        let echoed = self.read_echo().await?;
        if echoed[..] != reply.as_bytes()[..] {
            warn!("echo mismatch: sent {:02x?}, bus returned {echoed:02x?}", reply.as_bytes());
            return Ok(Outcome::EchoMismatch { sent: reply, echoed });
        }

        trace!("replied {:02x?}", reply.as_bytes());

        Ok(Outcome::Replied(reply))
    }

    fn observe(&mut self, frame: Frame) {
        if self.last_observed == Some(frame) {
            trace!("unchanged {:02x?}", frame.as_bytes());
            return;
        }

        match control::decode(frame.as_bytes()) {
            Ok(decoded) => {
                info!(
                    changed = decoded.fields.changed,
                    config = decoded.fields.config,
                    "{:02x?} {:?}",
                    frame.as_bytes(),
                    Settings::from(&decoded)
                );
                debug!("{:?}", decoded.fields);
            }
            Err(err) => warn!("{:02x?}: {err}", frame.as_bytes()),
        }

        self.last_observed = Some(frame);
        self.changes += 1;
    }

    /// Read back our own transmission a byte at a time.
    async fn read_echo(&mut self) -> Result<Vec<u8>, ReplicaError> {
        let mut echoed = Vec::with_capacity(FRAME_LEN);
        let mut timeouts = 0;

        while echoed.len() < FRAME_LEN {
            let mut byte = [0u8; 1];

            match timeout(self.config.read_timeout, self.port.read(&mut byte)).await {
                Err(_) => {
                    timeouts += 1;
                    if timeouts >= self.config.echo_timeouts {
                        break;
                    }
                }
                Ok(Ok(0)) => return Err(ReplicaError::TransportClosed),
                Ok(Ok(_)) => {
                    timeouts = 0;
                    echoed.push(byte[0]);
                }
                Ok(Err(err)) => return Err(err.into()),
            }
        }

        Ok(echoed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, DuplexStream};

    use super::*;
    use crate::protocol::codec::DATA_LEN;
    use crate::protocol::replies::{PollReply, POLL};

    fn replica(config: ReplicaConfig) -> (UnitReplica<DuplexStream>, DuplexStream) {
        let (port, bus) = duplex(64);
        (UnitReplica::new(port, config), bus)
    }

    async fn assert_bus_silent(bus: &mut DuplexStream) {
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), bus.read(&mut buf)).await;
        assert!(read.is_err(), "unexpected data on bus");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_to_poll() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        bus.write_all(Frame::new(POLL).as_bytes()).await.unwrap();
        let bytes = replica.intake().await.unwrap().expect("frame");
        assert_eq!(bytes, [0x94, 0x00, 0x00, 0x00, 0x00, 0xc1]);

        let expected = [0xd1, 0x21, 0xe0, 0x00, 0x00, 0x87];
        bus.write_all(&expected).await.unwrap(); // echo

        let outcome = replica.process(bytes).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Frame::from_bytes(&expected).unwrap()));

        let mut written = [0u8; FRAME_LEN];
        bus.read_exact(&mut written).await.unwrap();
        assert_eq!(written, expected);
        assert_eq!(replica.last_observed(), Some(&Frame::new(POLL)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alternate_poll_reply() {
        let config = ReplicaConfig { poll_reply: PollReply::Alternate, ..Default::default() };
        let (mut replica, mut bus) = replica(config);

        let expected = [0xd1, 0x21, 0xe2, 0x00, 0x00, 0x81];
        bus.write_all(&expected).await.unwrap();

        let outcome = replica.process(*Frame::new(POLL).as_bytes()).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Frame::from_bytes(&expected).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledges_other_frames() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        let expected = [0x88, 0x26, 0x00, 0x00, 0x00, 0xfb];
        bus.write_all(&expected).await.unwrap();

        let outcome = replica.process(*Frame::new([0x00; DATA_LEN]).as_bytes()).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Frame::from_bytes(&expected).unwrap()));

        let mut written = [0u8; FRAME_LEN];
        bus.read_exact(&mut written).await.unwrap();
        assert_eq!(written, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accumulates_partial_reads() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());
        let frame = Frame::new(POLL);

        bus.write_all(&frame.as_bytes()[..2]).await.unwrap();
        assert_eq!(replica.intake().await.unwrap(), None);
        assert_eq!(replica.buffered(), &frame.as_bytes()[..2]);

        bus.write_all(&frame.as_bytes()[2..]).await.unwrap();
        assert_eq!(replica.intake().await.unwrap(), Some(*frame.as_bytes()));
        assert!(replica.buffered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_partial_frame() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        bus.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
        assert_eq!(replica.intake().await.unwrap(), None);
        assert_eq!(replica.buffered().len(), 3);

        // nothing arrives before the read timeout
        assert_eq!(replica.intake().await.unwrap(), None);
        assert!(replica.buffered().is_empty());

        // back in step for the next frame
        let frame = Frame::new(POLL);
        bus.write_all(frame.as_bytes()).await.unwrap();
        assert_eq!(replica.intake().await.unwrap(), Some(*frame.as_bytes()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_never_crosses_frame_boundary() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());
        let first = Frame::new(POLL);
        let second = Frame::new([0x00; DATA_LEN]);

        bus.write_all(&first.as_bytes()[..4]).await.unwrap();
        assert_eq!(replica.intake().await.unwrap(), None);

        let mut rest = first.as_bytes()[4..].to_vec();
        rest.extend_from_slice(second.as_bytes());
        bus.write_all(&rest).await.unwrap();

        assert_eq!(replica.intake().await.unwrap(), Some(*first.as_bytes()));
        assert_eq!(replica.intake().await.unwrap(), Some(*second.as_bytes()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_checksum_discarded() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        let mut bytes = *Frame::new(POLL).as_bytes();
        bytes[DATA_LEN] ^= 0xff;

        let outcome = replica.process(bytes).await.unwrap();
        assert!(matches!(outcome, Outcome::Discarded(FrameError::ChecksumMismatch { .. })));
        assert_eq!(replica.last_observed(), None);

        assert_bus_silent(&mut bus).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_mismatch_reported() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        let garbled = [0x88, 0x26, 0x00, 0x40, 0x00, 0xfb];
        bus.write_all(&garbled).await.unwrap();

        let outcome = replica.process(*Frame::new([0x00; DATA_LEN]).as_bytes()).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::EchoMismatch {
                sent: Frame::new([0x88, 0x26, 0x00, 0x00, 0x00]),
                echoed: garbled.to_vec(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_echo_gives_up() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());

        bus.write_all(&[0x88, 0x26]).await.unwrap();

        let outcome = replica.process(*Frame::new([0x00; DATA_LEN]).as_bytes()).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::EchoMismatch {
                sent: Frame::new([0x88, 0x26, 0x00, 0x00, 0x00]),
                echoed: vec![0x88, 0x26],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_observes_changes_only() {
        let (mut replica, mut bus) = replica(ReplicaConfig::default());
        let ack = Frame::new([0x88, 0x26, 0x00, 0x00, 0x00]);

        let idle = Frame::new([0x00, 0x21, 0x22, 0x00, 0x00]);
        let changed = Frame::new([0x41, 0x21, 0x22, 0x00, 0x00]);

        let mut counts = vec![];
        for frame in [idle, idle, idle, changed, changed, idle] {
            bus.write_all(ack.as_bytes()).await.unwrap();
            replica.process(*frame.as_bytes()).await.unwrap();
            counts.push(replica.changes_observed());
        }

        // repeats of the previous frame are not reported again
        assert_eq!(counts, [1, 1, 1, 2, 2, 3]);
        assert_eq!(replica.last_observed(), Some(&idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport() {
        let (mut replica, bus) = replica(ReplicaConfig::default());
        drop(bus);

        assert!(matches!(replica.intake().await, Err(ReplicaError::TransportClosed)));
    }
}
