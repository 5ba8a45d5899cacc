//! Bit layouts as data.
//!
//! A layout is an ordered list of [`FieldSpec`]s. Fields are packed back to
//! back, most significant bit first, into the data bytes of a frame. The same
//! table drives both directions so field order and widths live in one place.

use super::codec::{FrameError, DATA_LEN};

/// Number of bits carried by the data bytes of a frame.
pub const DATA_BITS: u32 = (DATA_LEN * 8) as u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Single bit boolean
    Flag,
    /// Plain unsigned integer
    Unsigned,
    /// Enumerated value, only some bit patterns are valid
    Enum,
    /// Unknown meaning. Always packed as zero, unpacked verbatim.
    Reserved,
}

#[derive(Copy, Clone, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub width: u32,
    pub kind: FieldKind,
}

/// Conversion between a typed field value and its raw bits.
pub trait FieldValue: Sized {
    const KIND: FieldKind;

    fn to_raw(&self) -> u64;

    /// `None` if `raw` is not a valid value of this type.
    fn from_raw(raw: u64) -> Option<Self>;
}

impl FieldValue for bool {
    const KIND: FieldKind = FieldKind::Flag;

    fn to_raw(&self) -> u64 {
        *self as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        Some(raw != 0)
    }
}

impl FieldValue for u8 {
    const KIND: FieldKind = FieldKind::Unsigned;

    fn to_raw(&self) -> u64 {
        *self as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        u8::try_from(raw).ok()
    }
}

/// Bits of a field nobody knows the meaning of yet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Reserved(pub u8);

impl FieldValue for Reserved {
    const KIND: FieldKind = FieldKind::Reserved;

    fn to_raw(&self) -> u64 {
        self.0 as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        u8::try_from(raw).ok().map(Reserved)
    }
}

/// Total width of a layout in bits.
pub fn layout_width(layout: &[FieldSpec]) -> u32 {
    layout.iter().map(|spec| spec.width).sum()
}

/// Pack `values` (one per field, in layout order) into data bytes.
///
/// Reserved fields are written as zero regardless of their value.
pub fn pack(layout: &[FieldSpec], values: &[u64]) -> Result<[u8; DATA_LEN], FrameError> {
    debug_assert_eq!(layout.len(), values.len());
    debug_assert_eq!(layout_width(layout), DATA_BITS);

    let mut acc: u64 = 0;

    for (spec, &value) in layout.iter().zip(values) {
        let value = match spec.kind {
            FieldKind::Reserved => 0,
            _ => value,
        };

        if value >> spec.width != 0 {
            return Err(FrameError::FieldOutOfRange {
                field: spec.name,
                value: value as f64,
            });
        }

        acc = (acc << spec.width) | value;
    }

    let bytes = acc.to_be_bytes();
    let mut data = [0u8; DATA_LEN];
    data.copy_from_slice(&bytes[bytes.len() - DATA_LEN..]);

    Ok(data)
}

/// Split data bytes into raw field values, in layout order.
pub fn unpack(layout: &[FieldSpec], data: &[u8; DATA_LEN]) -> Vec<u64> {
    debug_assert_eq!(layout_width(layout), DATA_BITS);

    let acc = data.iter().fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
    let mut remaining = DATA_BITS;

    layout
        .iter()
        .map(|spec| {
            remaining -= spec.width;
            (acc >> remaining) & ((1u64 << spec.width) - 1)
        })
        .collect()
}
