//! Canned replies sent by the unit.
//!
//! The unit does not interpret the panel's frame; it answers with a fixed
//! payload depending on the incoming data bytes. The table is matched in
//! order, the first matching pattern wins.

use clap::ValueEnum;

use super::codec::{Frame, DATA_LEN};

/// Data bytes of the panel's power-up poll.
pub const POLL: [u8; DATA_LEN] = [0x94, 0x00, 0x00, 0x00, 0x00];

/// Answer to any frame that matches no pattern.
pub const ACK: [u8; DATA_LEN] = [0x88, 0x26, 0x00, 0x00, 0x00];

// byte 1 & 0x20: vane control and power fan speed disabled
// byte 1 & 0x01: heat pump present
// byte 2 is the one that differs between the two known poll replies
pub const POLL_REPLY_PRIMARY: [u8; DATA_LEN] = [0xd1, 0x21, 0xe0, 0x00, 0x00];
pub const POLL_REPLY_ALTERNATE: [u8; DATA_LEN] = [0xd1, 0x21, 0xe2, 0x00, 0x00];

/// Which of the two observed poll replies the unit sends.
#[derive(ValueEnum, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PollReply {
    /// d1 21 e0 00 00
    #[default]
    Primary,
    /// d1 21 e2 00 00
    Alternate,
}

impl PollReply {
    pub fn payload(&self) -> [u8; DATA_LEN] {
        match self {
            PollReply::Primary => POLL_REPLY_PRIMARY,
            PollReply::Alternate => POLL_REPLY_ALTERNATE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReplyTable {
    entries: Vec<([u8; DATA_LEN], [u8; DATA_LEN])>,
    fallback: [u8; DATA_LEN],
}

impl ReplyTable {
    pub fn new(fallback: [u8; DATA_LEN]) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    /// Append a pattern. Earlier patterns take precedence.
    pub fn with(mut self, pattern: [u8; DATA_LEN], reply: [u8; DATA_LEN]) -> Self {
        self.entries.push((pattern, reply));
        self
    }

    /// The table the indoor unit answers with.
    pub fn indoor_unit(poll_reply: PollReply) -> Self {
        Self::new(ACK).with(POLL, poll_reply.payload())
    }

    /// Reply frame for the data bytes of an incoming frame.
    pub fn reply_to(&self, data: &[u8; DATA_LEN]) -> Frame {
        let payload = self
            .entries
            .iter()
            .find(|(pattern, _)| pattern == data)
            .map(|(_, reply)| *reply)
            .unwrap_or(self.fallback);

        Frame::new(payload)
    }
}

impl Default for ReplyTable {
    fn default() -> Self {
        Self::indoor_unit(PollReply::default())
    }
}
