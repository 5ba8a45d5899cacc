use core::fmt::Debug;

use thiserror::Error;

/// Data bytes per frame
pub const DATA_LEN: usize = 5;

/// Data bytes plus the trailing checksum byte
pub const FRAME_LEN: usize = DATA_LEN + 1;

const CHECKSUM_XOR: u8 = 0x55;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame must be {FRAME_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid checksum (expected {expected:02x}, actual: {actual:02x})")]
    ChecksumMismatch {
        expected: u8,
        actual: u8,
    },
    #[error("value {value} out of range for field {field}")]
    FieldOutOfRange {
        field: &'static str,
        value: f64,
    },
}

pub trait Checksum {
    fn checksum(&mut self) -> u8;
}

impl<'a> Checksum for std::slice::Iter<'a, u8> {
    fn checksum(&mut self) -> u8 {
        self.fold(0u8, |acc, byte| acc.wrapping_add(*byte)) ^ CHECKSUM_XOR
    }
}

/// `(sum(data) & 0xff) ^ 0x55`
pub fn checksum(data: &[u8; DATA_LEN]) -> u8 {
    data.iter().checksum()
}

/// A checksummed 6 byte frame, as it appears on the wire.
///
/// Construction always goes through [`Frame::new`] or [`Frame::from_bytes`],
/// so a `Frame` is never holding a bad checksum.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Wrap `data` and append its checksum.
    pub fn new(data: [u8; DATA_LEN]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..DATA_LEN].copy_from_slice(&data);
        bytes[DATA_LEN] = checksum(&data);

        Self(bytes)
    }

    /// Validate raw bytes read off the bus.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let bytes: [u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::InvalidLength(bytes.len()))?;

        let frame = Self::new(data_of(&bytes));
        let actual = bytes[DATA_LEN];

        if frame.checksum() != actual {
            return Err(FrameError::ChecksumMismatch {
                expected: frame.checksum(),
                actual,
            });
        }

        Ok(frame)
    }

    pub fn data(&self) -> [u8; DATA_LEN] {
        data_of(&self.0)
    }

    pub fn checksum(&self) -> u8 {
        self.0[DATA_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

fn data_of(bytes: &[u8; FRAME_LEN]) -> [u8; DATA_LEN] {
    let mut data = [0u8; DATA_LEN];
    data.copy_from_slice(&bytes[..DATA_LEN]);
    data
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({:02x?})", self.0)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
