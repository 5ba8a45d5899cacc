//! The control frame sent by the panel on every period.

use packed_struct::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};

use super::codec::{Frame, FrameError};
use super::layout::{self, FieldKind, FieldSpec, FieldValue, Reserved};

#[derive(PrimitiveEnum_u8, EnumString, Display, EnumIter, Clone, Copy, Debug, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Mode {
    Cool = 0,
    /// Dehumidify
    Dh = 1,
    Fan = 2,
    Auto = 3,
    Heat = 4,
}

#[derive(PrimitiveEnum_u8, EnumString, Display, EnumIter, Clone, Copy, Debug, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FanSpeed {
    Low = 0,
    Medium = 1,
    High = 2,
    Power = 4,
}

impl FieldValue for Mode {
    const KIND: FieldKind = FieldKind::Enum;

    fn to_raw(&self) -> u64 {
        self.to_primitive() as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        u8::try_from(raw).ok().and_then(Self::from_primitive)
    }
}

impl FieldValue for FanSpeed {
    const KIND: FieldKind = FieldKind::Enum;

    fn to_raw(&self) -> u64 {
        self.to_primitive() as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        u8::try_from(raw).ok().and_then(Self::from_primitive)
    }
}

/// Declare a frame struct together with its bit layout.
///
/// Fields are listed as `name: Type = width` in wire order. The macro emits the
/// struct, `LAYOUT` and the conversions to and from raw field values, so the
/// order and widths are written down exactly once.
macro_rules! frame_layout {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$field_meta:meta])* $field:ident : $ty:ty = $width:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )*
        }

        impl $name {
            pub const LAYOUT: &'static [FieldSpec] = &[
                $( FieldSpec { name: stringify!($field), width: $width, kind: <$ty as FieldValue>::KIND }, )*
            ];

            fn to_raw(&self) -> Vec<u64> {
                vec![ $( FieldValue::to_raw(&self.$field), )* ]
            }

            fn from_raw(raw: &[u64]) -> Result<Self, FrameError> {
                let mut raw = raw.iter().copied();

                Ok(Self {
                    $(
                        $field: {
                            let value = raw.next().unwrap_or_default();
                            <$ty as FieldValue>::from_raw(value).ok_or(FrameError::FieldOutOfRange {
                                field: stringify!($field),
                                value: value as f64,
                            })?
                        },
                    )*
                })
            }
        }
    };
}

frame_layout! {
    /// Every field of the control frame, as raw wire values.
    ///
    /// Temperatures are kept raw here; see [`DecodedFrame`] for degrees.
    #[derive(Clone, Debug, PartialEq)]
    pub struct ControlFields {
        config: bool = 1,
        mode: Mode = 3,
        resistor_heating: bool = 1,
        running: bool = 1,
        unknown1: Reserved = 1,
        /// Settings differ from the previous transmission
        changed: bool = 1,
        /// Degrees C = raw / 2 + 10
        raw_room_temperature: u8 = 8,
        plasma: bool = 1,
        fan_speed: FanSpeed = 3,
        /// Degrees C = raw + 16
        raw_set_temperature: u8 = 4,
        unknown3: Reserved = 2,
        swivel: bool = 1,
        unknown4: Reserved = 5,
        unknown5: Reserved = 7,
        swirl: bool = 1,
    }
}

impl ControlFields {
    /// Pack into a checksummed frame. Reserved fields are sent as zero.
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let data = layout::pack(Self::LAYOUT, &self.to_raw())?;

        Ok(Frame::new(data))
    }

    /// Unpack a frame, keeping reserved bits as they were on the wire.
    pub fn decode(frame: &Frame) -> Result<Self, FrameError> {
        Self::from_raw(&layout::unpack(Self::LAYOUT, &frame.data()))
    }
}

const ROOM_TEMPERATURE_OFFSET: f32 = 10.0;
const SET_TEMPERATURE_OFFSET: u8 = 16;
const SET_TEMPERATURE_MAX_RAW: u8 = 0x0f;

pub fn room_temperature_from_raw(raw: u8) -> f32 {
    raw as f32 / 2.0 + ROOM_TEMPERATURE_OFFSET
}

/// Only multiples of 0.5C between 10C and 137.5C can be sent.
pub fn room_temperature_to_raw(celsius: f32) -> Result<u8, FrameError> {
    let raw = (celsius - ROOM_TEMPERATURE_OFFSET) * 2.0;

    if !raw.is_finite() || raw.fract() != 0.0 || !(0.0..=u8::MAX as f32).contains(&raw) {
        return Err(FrameError::FieldOutOfRange {
            field: "room_temperature",
            value: celsius as f64,
        });
    }

    Ok(raw as u8)
}

pub fn set_temperature_from_raw(raw: u8) -> u8 {
    raw.saturating_add(SET_TEMPERATURE_OFFSET)
}

/// 16C to 31C
pub fn set_temperature_to_raw(celsius: u8) -> Result<u8, FrameError> {
    celsius
        .checked_sub(SET_TEMPERATURE_OFFSET)
        .filter(|raw| *raw <= SET_TEMPERATURE_MAX_RAW)
        .ok_or(FrameError::FieldOutOfRange {
            field: "set_temperature",
            value: celsius as f64,
        })
}

/// A control frame read off the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub fields: ControlFields,

    /// Room temperature in degrees C
    pub room_temperature: f32,

    /// Set temperature in degrees C
    pub set_temperature: u8,

    pub frame: Frame,
}

/// Validate and unpack 6 bytes from the bus.
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, FrameError> {
    let frame = Frame::from_bytes(bytes)?;
    let fields = ControlFields::decode(&frame)?;

    Ok(DecodedFrame {
        room_temperature: room_temperature_from_raw(fields.raw_room_temperature),
        set_temperature: set_temperature_from_raw(fields.raw_set_temperature),
        fields,
        frame,
    })
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::protocol::codec::DATA_LEN;
    use crate::protocol::layout::{layout_width, DATA_BITS};

    fn idle_fields() -> ControlFields {
        ControlFields {
            config: false,
            mode: Mode::Cool,
            resistor_heating: false,
            running: false,
            unknown1: Reserved(0),
            changed: false,
            raw_room_temperature: 33,
            plasma: false,
            fan_speed: FanSpeed::High,
            raw_set_temperature: 2,
            unknown3: Reserved(0),
            swivel: false,
            unknown4: Reserved(0),
            unknown5: Reserved(0),
            swirl: false,
        }
    }

    fn random_fields(rng: &mut impl Rng) -> ControlFields {
        let modes: Vec<Mode> = Mode::iter().collect();
        let fan_speeds: Vec<FanSpeed> = FanSpeed::iter().collect();

        ControlFields {
            config: rng.gen(),
            mode: modes[rng.gen_range(0..modes.len())],
            resistor_heating: rng.gen(),
            running: rng.gen(),
            unknown1: Reserved(0),
            changed: rng.gen(),
            raw_room_temperature: rng.gen(),
            plasma: rng.gen(),
            fan_speed: fan_speeds[rng.gen_range(0..fan_speeds.len())],
            raw_set_temperature: rng.gen_range(0..=0x0f),
            unknown3: Reserved(0),
            swivel: rng.gen(),
            unknown4: Reserved(0),
            unknown5: Reserved(0),
            swirl: rng.gen(),
        }
    }

    #[test]
    fn test_layout_fills_data_bytes() {
        assert_eq!(layout_width(ControlFields::LAYOUT), DATA_BITS);
        assert_eq!(ControlFields::LAYOUT.len(), 15);
        assert_eq!(ControlFields::LAYOUT[0].name, "config");
        assert_eq!(ControlFields::LAYOUT[14].name, "swirl");
    }

    #[test]
    fn test_encode_idle_frame() {
        let frame = idle_fields().encode().expect("encode");
        assert_eq!(frame.as_bytes(), &[0x00, 0x21, 0x22, 0x00, 0x00, 0x16]);

        let frame = ControlFields { changed: true, ..idle_fields() }.encode().expect("encode");
        assert_eq!(frame.as_bytes(), &[0x01, 0x21, 0x22, 0x00, 0x00, 0x11]);
    }

    #[test]
    fn test_bit_positions() {
        let fields = ControlFields {
            config: true,
            mode: Mode::Heat,
            swivel: true,
            swirl: true,
            plasma: true,
            fan_speed: FanSpeed::Power,
            raw_set_temperature: 0x0f,
            ..idle_fields()
        };

        let data = fields.encode().expect("encode").data();
        assert_eq!(data, [0b1100_0000, 0x21, 0b1100_1111, 0b0010_0000, 0b0000_0001]);
    }

    #[test]
    fn test_round_trip() {
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let fields = random_fields(&mut rng);
            let frame = fields.encode().expect("encode");
            let decoded = decode(frame.as_bytes()).expect("decode");

            assert_eq!(decoded.fields, fields);
            assert_eq!(decoded.frame, frame);
        }
    }

    #[test]
    fn test_reserved_bits_forced_to_zero_on_encode() {
        let fields = ControlFields {
            unknown1: Reserved(1),
            unknown3: Reserved(3),
            unknown4: Reserved(0x1f),
            unknown5: Reserved(0x7f),
            ..idle_fields()
        };

        let decoded = decode(fields.encode().expect("encode").as_bytes()).expect("decode");
        assert_eq!(decoded.fields, idle_fields());
    }

    #[test]
    fn test_reserved_bits_preserved_on_decode() {
        let frame = Frame::new([0b0000_0010, 0x21, 0x22, 0b1101_1111, 0b1111_1110]);
        let decoded = decode(frame.as_bytes()).expect("decode");

        assert_eq!(decoded.fields.unknown1, Reserved(1));
        assert_eq!(decoded.fields.unknown3, Reserved(3));
        assert!(!decoded.fields.swivel);
        assert_eq!(decoded.fields.unknown4, Reserved(0x1f));
        assert_eq!(decoded.fields.unknown5, Reserved(0x7f));
        assert!(!decoded.fields.swirl);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut bytes = *idle_fields().encode().expect("encode").as_bytes();
        bytes[DATA_LEN] ^= 0x01;

        assert!(matches!(decode(&bytes), Err(FrameError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_decode_rejects_unknown_enum_values() {
        // mode = 0b101
        let frame = Frame::new([0b0101_0000, 0x21, 0x22, 0x00, 0x00]);
        assert_eq!(
            decode(frame.as_bytes()),
            Err(FrameError::FieldOutOfRange { field: "mode", value: 5.0 })
        );

        // fan_speed = 0b011
        let frame = Frame::new([0x00, 0x21, 0b0011_0010, 0x00, 0x00]);
        assert_eq!(
            decode(frame.as_bytes()),
            Err(FrameError::FieldOutOfRange { field: "fan_speed", value: 3.0 })
        );
    }

    #[test]
    fn test_encode_rejects_overwide_set_temperature() {
        let fields = ControlFields { raw_set_temperature: 0x10, ..idle_fields() };

        assert_eq!(
            fields.encode(),
            Err(FrameError::FieldOutOfRange { field: "raw_set_temperature", value: 16.0 })
        );
    }

    #[test]
    fn test_temperature_conversions() {
        assert_eq!(room_temperature_from_raw(0), 10.0);
        assert_eq!(room_temperature_from_raw(255), 137.5);
        assert_eq!(set_temperature_from_raw(0), 16);
        assert_eq!(set_temperature_from_raw(15), 31);

        assert_eq!(room_temperature_to_raw(26.5), Ok(33));
        assert_eq!(room_temperature_to_raw(10.0), Ok(0));
        assert_eq!(room_temperature_to_raw(137.5), Ok(255));
        assert_eq!(set_temperature_to_raw(16), Ok(0));
        assert_eq!(set_temperature_to_raw(31), Ok(15));

        for raw in 0..=u8::MAX {
            assert_eq!(room_temperature_to_raw(room_temperature_from_raw(raw)), Ok(raw));
        }
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        for celsius in [9.5, 138.0, 26.3, f32::NAN, f32::INFINITY] {
            assert!(room_temperature_to_raw(celsius).is_err(), "{celsius} accepted");
        }

        for celsius in [0, 15, 32, 255] {
            assert!(set_temperature_to_raw(celsius).is_err(), "{celsius} accepted");
        }
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("heat".parse::<Mode>(), Ok(Mode::Heat));
        assert_eq!("DH".parse::<Mode>(), Ok(Mode::Dh));
        assert_eq!("Power".parse::<FanSpeed>(), Ok(FanSpeed::Power));
        assert!("turbo".parse::<FanSpeed>().is_err());
        assert_eq!(Mode::Dh.to_string(), "DH");
    }
}
