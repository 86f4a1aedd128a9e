//! Command opcodes and field codes for the DPS-150 protocol.
//!
//! Every frame names a field code; the command byte says whether the frame
//! reads it, writes it, or controls the session. Semantic requests are the
//! closed [`Command`] enum, which validates its arguments before encoding.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::frame;

/// Command bytes sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Read a value; the response frame repeats the field code.
    Get = 0xa1,
    /// Select the serial baud rate.
    SetBaudRate = 0xb0,
    /// Write a value.
    Set = 0xb1,
    /// Session control: payload `[1]` starts, `[0]` stops.
    Session = 0xc1,
}

impl From<CommandOpcode> for u8 {
    fn from(cmd: CommandOpcode) -> Self {
        cmd as Self
    }
}

/// Baud rates the device can be switched to.
///
/// The wire value is a 1-based index into the device's rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaudRate {
    B9600 = 1,
    B19200 = 2,
    B38400 = 3,
    B57600 = 4,
    B115200 = 5,
}

impl From<BaudRate> for u8 {
    fn from(rate: BaudRate) -> Self {
        rate as Self
    }
}

/// Field codes carried in the third frame byte.
///
/// The same code space covers settings written by the host, values read
/// back, and unsolicited telemetry pushed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldCode {
    /// Supply input voltage (telemetry).
    InputVoltage = 192,
    /// Output voltage setpoint.
    VoltageSet = 193,
    /// Output current setpoint.
    CurrentSet = 194,
    /// Live output voltage/current/power (telemetry, three floats).
    OutputReading = 195,
    /// Internal temperature (telemetry).
    Temperature = 196,
    /// Group preset 1 voltage.
    Group1Voltage = 197,
    /// Group preset 1 current.
    Group1Current = 198,
    /// Group preset 2 voltage.
    Group2Voltage = 199,
    /// Group preset 2 current.
    Group2Current = 200,
    /// Group preset 3 voltage.
    Group3Voltage = 201,
    /// Group preset 3 current.
    Group3Current = 202,
    /// Group preset 4 voltage.
    Group4Voltage = 203,
    /// Group preset 4 current.
    Group4Current = 204,
    /// Group preset 5 voltage.
    Group5Voltage = 205,
    /// Group preset 5 current.
    Group5Current = 206,
    /// Group preset 6 voltage.
    Group6Voltage = 207,
    /// Group preset 6 current.
    Group6Current = 208,
    /// Over-voltage protection threshold.
    OverVoltageProtection = 209,
    /// Over-current protection threshold.
    OverCurrentProtection = 210,
    /// Over-power protection threshold.
    OverPowerProtection = 211,
    /// Over-temperature protection threshold.
    OverTemperatureProtection = 212,
    /// Low-voltage protection threshold.
    LowVoltageProtection = 213,
    /// Display brightness (0–5).
    Brightness = 214,
    /// Beeper volume (0–5).
    Volume = 215,
    /// Capacity/energy metering on/off.
    MeteringEnable = 216,
    /// Accumulated output capacity in Ah (telemetry).
    OutputCapacity = 217,
    /// Accumulated output energy in Wh (telemetry).
    OutputEnergy = 218,
    /// Output on/off.
    OutputEnable = 219,
    /// Which protection tripped (telemetry).
    ProtectionTrip = 220,
    /// CC/CV regulation mode (telemetry).
    RegulationMode = 221,
    /// Model name string.
    ModelName = 222,
    /// Hardware version string.
    HardwareVersion = 223,
    /// Firmware version string.
    FirmwareVersion = 224,
    /// Maximum settable voltage, reported by the device.
    UpperLimitVoltage = 226,
    /// Maximum settable current, reported by the device.
    UpperLimitCurrent = 227,
    /// Full status record (response to get-all and periodic broadcast).
    All = 255,
}

impl FieldCode {
    /// Attempts to parse a field code from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            192 => Some(Self::InputVoltage),
            193 => Some(Self::VoltageSet),
            194 => Some(Self::CurrentSet),
            195 => Some(Self::OutputReading),
            196 => Some(Self::Temperature),
            197 => Some(Self::Group1Voltage),
            198 => Some(Self::Group1Current),
            199 => Some(Self::Group2Voltage),
            200 => Some(Self::Group2Current),
            201 => Some(Self::Group3Voltage),
            202 => Some(Self::Group3Current),
            203 => Some(Self::Group4Voltage),
            204 => Some(Self::Group4Current),
            205 => Some(Self::Group5Voltage),
            206 => Some(Self::Group5Current),
            207 => Some(Self::Group6Voltage),
            208 => Some(Self::Group6Current),
            209 => Some(Self::OverVoltageProtection),
            210 => Some(Self::OverCurrentProtection),
            211 => Some(Self::OverPowerProtection),
            212 => Some(Self::OverTemperatureProtection),
            213 => Some(Self::LowVoltageProtection),
            214 => Some(Self::Brightness),
            215 => Some(Self::Volume),
            216 => Some(Self::MeteringEnable),
            217 => Some(Self::OutputCapacity),
            218 => Some(Self::OutputEnergy),
            219 => Some(Self::OutputEnable),
            220 => Some(Self::ProtectionTrip),
            221 => Some(Self::RegulationMode),
            222 => Some(Self::ModelName),
            223 => Some(Self::HardwareVersion),
            224 => Some(Self::FirmwareVersion),
            226 => Some(Self::UpperLimitVoltage),
            227 => Some(Self::UpperLimitCurrent),
            255 => Some(Self::All),
            _ => None,
        }
    }

    /// Voltage field of a group preset slot (index 0–5).
    #[must_use]
    pub const fn group_voltage(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Group1Voltage),
            1 => Some(Self::Group2Voltage),
            2 => Some(Self::Group3Voltage),
            3 => Some(Self::Group4Voltage),
            4 => Some(Self::Group5Voltage),
            5 => Some(Self::Group6Voltage),
            _ => None,
        }
    }

    /// Current field of a group preset slot (index 0–5).
    #[must_use]
    pub const fn group_current(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Group1Current),
            1 => Some(Self::Group2Current),
            2 => Some(Self::Group3Current),
            3 => Some(Self::Group4Current),
            4 => Some(Self::Group5Current),
            5 => Some(Self::Group6Current),
            _ => None,
        }
    }

    /// Returns true for fields written as a little-endian f32.
    #[must_use]
    pub const fn is_float_setting(self) -> bool {
        matches!(
            self,
            Self::VoltageSet
                | Self::CurrentSet
                | Self::Group1Voltage
                | Self::Group1Current
                | Self::Group2Voltage
                | Self::Group2Current
                | Self::Group3Voltage
                | Self::Group3Current
                | Self::Group4Voltage
                | Self::Group4Current
                | Self::Group5Voltage
                | Self::Group5Current
                | Self::Group6Voltage
                | Self::Group6Current
                | Self::OverVoltageProtection
                | Self::OverCurrentProtection
                | Self::OverPowerProtection
                | Self::OverTemperatureProtection
                | Self::LowVoltageProtection
        )
    }

    /// Returns the maximum wire value for byte-valued settings.
    #[must_use]
    pub const fn byte_setting_max(self) -> Option<u8> {
        match self {
            Self::Brightness | Self::Volume => Some(5),
            Self::MeteringEnable | Self::OutputEnable => Some(1),
            _ => None,
        }
    }
}

impl From<FieldCode> for u8 {
    fn from(field: FieldCode) -> Self {
        field as Self
    }
}

/// A semantic request to the device.
///
/// The closed set of operations the driver can put on the wire; each encodes
/// to exactly one frame. Group save/recall composes over the group preset
/// fields at the client level, since the device has no dedicated opcode for
/// it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Write a float-valued setting (volts, amps, watts, degrees).
    SetFloat { field: FieldCode, value: f32 },
    /// Write a byte-valued setting (brightness, volume, metering).
    SetByte { field: FieldCode, value: u8 },
    /// Turn the output on.
    EnableOutput,
    /// Turn the output off.
    DisableOutput,
    /// Read a value back; the response repeats the field code.
    Get { field: FieldCode },
    /// Request the full status record.
    GetAll,
    /// Begin a session; the device starts its periodic telemetry stream.
    SessionStart,
    /// End the session.
    SessionStop,
    /// Switch the device's serial baud rate.
    SelectBaudRate(BaudRate),
}

impl Command {
    /// Builds the wire frame for this command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if an argument fails validation, before
    /// any I/O happens.
    pub fn encode(&self) -> Result<Bytes> {
        match *self {
            Self::SetFloat { field, value } => {
                if !field.is_float_setting() {
                    return Err(Error::Protocol {
                        message: format!("field {field:?} is not a float setting"),
                    });
                }
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::OutOfRange {
                        field: "value",
                        value: f64::from(value),
                        min: 0.0,
                        max: f64::from(f32::MAX),
                    });
                }
                Ok(frame::encode(
                    CommandOpcode::Set.into(),
                    field.into(),
                    &value.to_le_bytes(),
                ))
            }
            Self::SetByte { field, value } => {
                let max = field.byte_setting_max().ok_or_else(|| Error::Protocol {
                    message: format!("field {field:?} is not a byte setting"),
                })?;
                if value > max {
                    return Err(Error::OutOfRange {
                        field: "value",
                        value: f64::from(value),
                        min: 0.0,
                        max: f64::from(max),
                    });
                }
                Ok(frame::encode(
                    CommandOpcode::Set.into(),
                    field.into(),
                    &[value],
                ))
            }
            Self::EnableOutput => Ok(frame::encode(
                CommandOpcode::Set.into(),
                FieldCode::OutputEnable.into(),
                &[1],
            )),
            Self::DisableOutput => Ok(frame::encode(
                CommandOpcode::Set.into(),
                FieldCode::OutputEnable.into(),
                &[0],
            )),
            // Get commands carry a single zero payload byte on this firmware.
            Self::Get { field } => Ok(frame::encode(
                CommandOpcode::Get.into(),
                field.into(),
                &[0],
            )),
            Self::GetAll => Ok(frame::encode(
                CommandOpcode::Get.into(),
                FieldCode::All.into(),
                &[0],
            )),
            Self::SessionStart => Ok(frame::encode(CommandOpcode::Session.into(), 0, &[1])),
            Self::SessionStop => Ok(frame::encode(CommandOpcode::Session.into(), 0, &[0])),
            Self::SelectBaudRate(rate) => Ok(frame::encode(
                CommandOpcode::SetBaudRate.into(),
                0,
                &[rate.into()],
            )),
        }
    }

    /// Field code whose arrival answers this command, if it expects one.
    ///
    /// Set and session commands are not acknowledged by the device.
    #[must_use]
    pub const fn response_field(&self) -> Option<FieldCode> {
        match *self {
            Self::Get { field } => Some(field),
            Self::GetAll => Some(FieldCode::All),
            _ => None,
        }
    }
}
