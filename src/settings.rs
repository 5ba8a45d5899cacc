use std::str::FromStr;

use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::protocol::codec::{Frame, FrameError};
use crate::protocol::control::{
    room_temperature_from_raw, room_temperature_to_raw, set_temperature_from_raw,
    set_temperature_to_raw, ControlFields, DecodedFrame, FanSpeed, Mode,
};
use crate::protocol::layout::Reserved;

/// What the panel wants the unit to do.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub mode: Mode,
    pub resistor_heating: bool,
    pub running: bool,
    /// Degrees C, in 0.5C steps
    pub room_temperature: f32,
    pub plasma: bool,
    pub fan_speed: FanSpeed,
    /// Degrees C
    pub set_temperature: u8,
    pub swivel: bool,
    pub swirl: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Cool,
            resistor_heating: false,
            running: false,
            room_temperature: 26.5,
            plasma: false,
            fan_speed: FanSpeed::High,
            set_temperature: 18,
            swivel: false,
            swirl: false,
        }
    }
}

impl Settings {
    pub fn to_fields(&self, changed: bool) -> Result<ControlFields, FrameError> {
        Ok(ControlFields {
            config: false,
            mode: self.mode,
            resistor_heating: self.resistor_heating,
            running: self.running,
            unknown1: Reserved::default(),
            changed,
            raw_room_temperature: room_temperature_to_raw(self.room_temperature)?,
            plasma: self.plasma,
            fan_speed: self.fan_speed,
            raw_set_temperature: set_temperature_to_raw(self.set_temperature)?,
            unknown3: Reserved::default(),
            swivel: self.swivel,
            unknown4: Reserved::default(),
            unknown5: Reserved::default(),
            swirl: self.swirl,
        })
    }

    pub fn to_frame(&self, changed: bool) -> Result<Frame, FrameError> {
        self.to_fields(changed)?.encode()
    }

    /// Copy of `self` with a single field replaced.
    pub fn with(&self, edit: SettingsEdit) -> Settings {
        let mut settings = self.clone();

        match edit {
            SettingsEdit::Mode(v) => settings.mode = v,
            SettingsEdit::ResistorHeating(v) => settings.resistor_heating = v,
            SettingsEdit::Running(v) => settings.running = v,
            SettingsEdit::RoomTemperature(v) => settings.room_temperature = v,
            SettingsEdit::Plasma(v) => settings.plasma = v,
            SettingsEdit::FanSpeed(v) => settings.fan_speed = v,
            SettingsEdit::SetTemperature(v) => settings.set_temperature = v,
            SettingsEdit::Swivel(v) => settings.swivel = v,
            SettingsEdit::Swirl(v) => settings.swirl = v,
        }

        settings
    }
}

impl From<&ControlFields> for Settings {
    fn from(fields: &ControlFields) -> Self {
        Self {
            mode: fields.mode,
            resistor_heating: fields.resistor_heating,
            running: fields.running,
            room_temperature: room_temperature_from_raw(fields.raw_room_temperature),
            plasma: fields.plasma,
            fan_speed: fields.fan_speed,
            set_temperature: set_temperature_from_raw(fields.raw_set_temperature),
            swivel: fields.swivel,
            swirl: fields.swirl,
        }
    }
}

impl From<&DecodedFrame> for Settings {
    fn from(decoded: &DecodedFrame) -> Self {
        Settings::from(&decoded.fields)
    }
}

/// Names accepted on the left of `attribute=value`.
#[derive(EnumString, Display, Clone, Copy, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Attribute {
    Mode,
    ResistorHeating,
    Running,
    RoomTemperature,
    Plasma,
    FanSpeed,
    SetTemperature,
    Swivel,
    Swirl,
}

/// A change to one field of [`Settings`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SettingsEdit {
    Mode(Mode),
    ResistorHeating(bool),
    Running(bool),
    RoomTemperature(f32),
    Plasma(bool),
    FanSpeed(FanSpeed),
    SetTemperature(u8),
    Swivel(bool),
    Swirl(bool),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("expected attribute=value, got {0:?}")]
    Malformed(String),
    #[error("I don't know {0:?}")]
    UnknownAttribute(String),
    #[error("invalid value {value:?} for {attribute}")]
    InvalidValue {
        attribute: Attribute,
        value: String,
    },
    #[error("can't send that: {0}")]
    Unencodable(#[from] FrameError),
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "y" | "yes" | "on" | "true")
}

fn parse_float(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

impl SettingsEdit {
    pub fn attribute(&self) -> Attribute {
        match self {
            SettingsEdit::Mode(_) => Attribute::Mode,
            SettingsEdit::ResistorHeating(_) => Attribute::ResistorHeating,
            SettingsEdit::Running(_) => Attribute::Running,
            SettingsEdit::RoomTemperature(_) => Attribute::RoomTemperature,
            SettingsEdit::Plasma(_) => Attribute::Plasma,
            SettingsEdit::FanSpeed(_) => Attribute::FanSpeed,
            SettingsEdit::SetTemperature(_) => Attribute::SetTemperature,
            SettingsEdit::Swivel(_) => Attribute::Swivel,
            SettingsEdit::Swirl(_) => Attribute::Swirl,
        }
    }

    pub fn parse(attribute: Attribute, value: &str) -> Result<Self, CommandError> {
        let invalid = || CommandError::InvalidValue {
            attribute,
            value: value.to_string(),
        };

        let edit = match attribute {
            Attribute::ResistorHeating => SettingsEdit::ResistorHeating(parse_bool(value)),
            Attribute::Running => SettingsEdit::Running(parse_bool(value)),
            Attribute::Plasma => SettingsEdit::Plasma(parse_bool(value)),
            Attribute::Swivel => SettingsEdit::Swivel(parse_bool(value)),
            Attribute::Swirl => SettingsEdit::Swirl(parse_bool(value)),

            Attribute::RoomTemperature => {
                SettingsEdit::RoomTemperature(parse_float(value).ok_or_else(invalid)?)
            }
            Attribute::SetTemperature => {
                let celsius = parse_float(value)
                    .filter(|v| v.fract() == 0.0 && (0.0..=u8::MAX as f32).contains(v))
                    .ok_or_else(invalid)?;

                SettingsEdit::SetTemperature(celsius as u8)
            }

            Attribute::Mode => SettingsEdit::Mode(value.trim().parse().map_err(|_| invalid())?),
            Attribute::FanSpeed => {
                SettingsEdit::FanSpeed(value.trim().parse().map_err(|_| invalid())?)
            }
        };

        Ok(edit)
    }
}

impl FromStr for SettingsEdit {
    type Err = CommandError;

    /// Parse an `attribute=value` command line.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (attribute, value) = line
            .split_once('=')
            .ok_or_else(|| CommandError::Malformed(line.to_string()))?;

        let attribute = Attribute::from_str(attribute.trim())
            .map_err(|_| CommandError::UnknownAttribute(attribute.to_string()))?;

        SettingsEdit::parse(attribute, value)
    }
}
