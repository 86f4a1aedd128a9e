//! Interpretation of inbound frames.
//!
//! Every device→host frame names a field code; this module turns the raw
//! payload into a typed [`TelemetryUpdate`]. The wire makes no distinction
//! between the answer to a get command and the unsolicited telemetry
//! stream, so both decode the same way.

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use crate::protocol::command::FieldCode;
use crate::protocol::frame::Frame;
use crate::types::{FullStatus, GROUP_COUNT, RegulationMode, TripState};

/// Minimum payload length of the full status record.
const FULL_STATUS_LEN: usize = 119;

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    /// Supply input voltage in volts.
    InputVoltage(f32),
    /// Live output measurement.
    OutputReading {
        voltage: f32,
        current: f32,
        power: f32,
    },
    /// Internal temperature in degrees Celsius.
    Temperature(f32),
    /// A float-valued setting read back (setpoints, presets, thresholds,
    /// upper limits).
    FloatSetting { field: FieldCode, value: f32 },
    /// Display brightness.
    Brightness(u8),
    /// Beeper volume.
    Volume(u8),
    /// Metering on/off.
    MeteringEnabled(bool),
    /// Accumulated output capacity in amp-hours.
    OutputCapacity(f32),
    /// Accumulated output energy in watt-hours.
    OutputEnergy(f32),
    /// Output on/off.
    OutputEnabled(bool),
    /// Which protection tripped.
    ProtectionTrip(TripState),
    /// CC/CV regulation mode.
    RegulationMode(RegulationMode),
    /// Model name string.
    ModelName(String),
    /// Hardware version string.
    HardwareVersion(String),
    /// Firmware version string.
    FirmwareVersion(String),
    /// Full status record.
    FullStatus(Box<FullStatus>),
    /// A field this library does not know about.
    Unknown { field: u8, payload: Bytes },
}

impl TelemetryUpdate {
    /// The field code this update answers, used to correlate responses.
    #[must_use]
    pub const fn field(&self) -> Option<FieldCode> {
        match self {
            Self::InputVoltage(_) => Some(FieldCode::InputVoltage),
            Self::OutputReading { .. } => Some(FieldCode::OutputReading),
            Self::Temperature(_) => Some(FieldCode::Temperature),
            Self::FloatSetting { field, .. } => Some(*field),
            Self::Brightness(_) => Some(FieldCode::Brightness),
            Self::Volume(_) => Some(FieldCode::Volume),
            Self::MeteringEnabled(_) => Some(FieldCode::MeteringEnable),
            Self::OutputCapacity(_) => Some(FieldCode::OutputCapacity),
            Self::OutputEnergy(_) => Some(FieldCode::OutputEnergy),
            Self::OutputEnabled(_) => Some(FieldCode::OutputEnable),
            Self::ProtectionTrip(_) => Some(FieldCode::ProtectionTrip),
            Self::RegulationMode(_) => Some(FieldCode::RegulationMode),
            Self::ModelName(_) => Some(FieldCode::ModelName),
            Self::HardwareVersion(_) => Some(FieldCode::HardwareVersion),
            Self::FirmwareVersion(_) => Some(FieldCode::FirmwareVersion),
            Self::FullStatus(_) => Some(FieldCode::All),
            Self::Unknown { .. } => None,
        }
    }

    /// The single float this update carries, if it is float-valued.
    #[must_use]
    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::InputVoltage(v)
            | Self::Temperature(v)
            | Self::OutputCapacity(v)
            | Self::OutputEnergy(v)
            | Self::FloatSetting { value: v, .. } => Some(*v),
            _ => None,
        }
    }

    /// The string this update carries, if it is string-valued.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::ModelName(s) | Self::HardwareVersion(s) | Self::FirmwareVersion(s) => Some(s),
            _ => None,
        }
    }
}

/// Reads a little-endian f32, guarding the payload length.
fn read_f32(payload: &[u8], what: &str) -> Result<f32> {
    if payload.len() < 4 {
        return Err(Error::Protocol {
            message: format!("{what}: payload too short ({} bytes)", payload.len()),
        });
    }
    Ok(f32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Reads the first payload byte, guarding the payload length.
fn read_u8(payload: &[u8], what: &str) -> Result<u8> {
    payload.first().copied().ok_or_else(|| Error::Protocol {
        message: format!("{what}: empty payload"),
    })
}

/// Decodes an ASCII identity string, dropping trailing NULs.
fn read_string(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Interprets one inbound frame.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the payload is too short for its field
/// code. Unknown field codes are not an error; they come back as
/// [`TelemetryUpdate::Unknown`].
pub fn interpret(frame: &Frame) -> Result<TelemetryUpdate> {
    let payload = &frame.payload[..];

    let Some(field) = FieldCode::from_byte(frame.field) else {
        return Ok(TelemetryUpdate::Unknown {
            field: frame.field,
            payload: frame.payload.clone(),
        });
    };

    let update = match field {
        FieldCode::InputVoltage => {
            TelemetryUpdate::InputVoltage(read_f32(payload, "input voltage")?)
        }
        FieldCode::OutputReading => {
            if payload.len() < 12 {
                return Err(Error::Protocol {
                    message: format!("output reading: payload too short ({})", payload.len()),
                });
            }
            let mut cursor = payload;
            TelemetryUpdate::OutputReading {
                voltage: cursor.get_f32_le(),
                current: cursor.get_f32_le(),
                power: cursor.get_f32_le(),
            }
        }
        FieldCode::Temperature => TelemetryUpdate::Temperature(read_f32(payload, "temperature")?),
        FieldCode::Brightness => TelemetryUpdate::Brightness(read_u8(payload, "brightness")?),
        FieldCode::Volume => TelemetryUpdate::Volume(read_u8(payload, "volume")?),
        FieldCode::MeteringEnable => {
            TelemetryUpdate::MeteringEnabled(read_u8(payload, "metering")? != 0)
        }
        FieldCode::OutputCapacity => {
            TelemetryUpdate::OutputCapacity(read_f32(payload, "capacity")?)
        }
        FieldCode::OutputEnergy => TelemetryUpdate::OutputEnergy(read_f32(payload, "energy")?),
        FieldCode::OutputEnable => {
            TelemetryUpdate::OutputEnabled(read_u8(payload, "output enable")? == 1)
        }
        FieldCode::ProtectionTrip => {
            TelemetryUpdate::ProtectionTrip(TripState::from_byte(read_u8(payload, "trip")?))
        }
        FieldCode::RegulationMode => {
            TelemetryUpdate::RegulationMode(RegulationMode::from_byte(read_u8(payload, "mode")?))
        }
        FieldCode::ModelName => TelemetryUpdate::ModelName(read_string(payload)),
        FieldCode::HardwareVersion => TelemetryUpdate::HardwareVersion(read_string(payload)),
        FieldCode::FirmwareVersion => TelemetryUpdate::FirmwareVersion(read_string(payload)),
        FieldCode::All => TelemetryUpdate::FullStatus(Box::new(parse_full_status(payload)?)),
        // Everything else is a float-valued setting read back verbatim.
        other => TelemetryUpdate::FloatSetting {
            field: other,
            value: read_f32(payload, "float setting")?,
        },
    };

    Ok(update)
}

/// Parses the 119-byte full status record.
///
/// Layout (offsets from the payload start): seven floats of live readings,
/// six voltage/current preset pairs, five protection thresholds, display
/// bytes, metering flag, accumulators, output/trip/mode bytes, one reserved
/// byte, then the two upper-limit floats.
pub fn parse_full_status(payload: &[u8]) -> Result<FullStatus> {
    if payload.len() < FULL_STATUS_LEN {
        return Err(Error::Protocol {
            message: format!(
                "full status: expected {FULL_STATUS_LEN} bytes, got {}",
                payload.len()
            ),
        });
    }

    let mut cursor = payload;
    let mut status = FullStatus {
        input_voltage: cursor.get_f32_le(),
        set_voltage: cursor.get_f32_le(),
        set_current: cursor.get_f32_le(),
        output_voltage: cursor.get_f32_le(),
        output_current: cursor.get_f32_le(),
        output_power: cursor.get_f32_le(),
        temperature: cursor.get_f32_le(),
        ..FullStatus::default()
    };

    for group in 0..GROUP_COUNT {
        status.groups[group].voltage = cursor.get_f32_le();
        status.groups[group].current = cursor.get_f32_le();
    }

    status.protection.over_voltage = cursor.get_f32_le();
    status.protection.over_current = cursor.get_f32_le();
    status.protection.over_power = cursor.get_f32_le();
    status.protection.over_temperature = cursor.get_f32_le();
    status.protection.low_voltage = cursor.get_f32_le();

    status.brightness = cursor.get_u8();
    status.volume = cursor.get_u8();
    status.metering_on = cursor.get_u8() != 0;

    status.output_capacity_ah = cursor.get_f32_le();
    status.output_energy_wh = cursor.get_f32_le();

    status.output_on = cursor.get_u8() == 1;
    status.protection_trip = TripState::from_byte(cursor.get_u8());
    status.mode = RegulationMode::from_byte(cursor.get_u8());
    cursor.advance(1); // reserved

    status.upper_limit_voltage = cursor.get_f32_le();
    status.upper_limit_current = cursor.get_f32_le();

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{DEVICE_COMMAND, Frame};

    fn frame(field: u8, payload: &[u8]) -> Frame {
        Frame {
            command: DEVICE_COMMAND,
            field,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Builds a full status payload with recognizable values.
    fn full_status_payload() -> Vec<u8> {
        let mut p = Vec::with_capacity(FULL_STATUS_LEN);
        // input, setV, setI, outV, outI, outP, temp
        for v in [24.0f32, 12.0, 2.0, 11.98, 1.5, 17.97, 31.2] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        // six preset pairs
        for group in 0..6u8 {
            p.extend_from_slice(&(f32::from(group) + 1.0).to_le_bytes());
            p.extend_from_slice(&0.5f32.to_le_bytes());
        }
        // OVP OCP OPP OTP LVP
        for v in [31.0f32, 5.1, 155.0, 80.0, 2.9] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.push(4); // brightness
        p.push(2); // volume
        p.push(1); // metering on
        p.extend_from_slice(&0.75f32.to_le_bytes()); // capacity
        p.extend_from_slice(&9.0f32.to_le_bytes()); // energy
        p.push(1); // output on
        p.push(2); // trip: OCP
        p.push(0); // mode: CC
        p.push(0); // reserved
        p.extend_from_slice(&30.0f32.to_le_bytes()); // upper limit V
        p.extend_from_slice(&5.0f32.to_le_bytes()); // upper limit I
        assert_eq!(p.len(), FULL_STATUS_LEN);
        p
    }

    #[test]
    fn test_interpret_output_reading() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&12.5f32.to_le_bytes());
        payload.extend_from_slice(&1.0f32.to_le_bytes());
        payload.extend_from_slice(&12.5f32.to_le_bytes());

        let update = interpret(&frame(195, &payload)).unwrap();
        assert_eq!(
            update,
            TelemetryUpdate::OutputReading {
                voltage: 12.5,
                current: 1.0,
                power: 12.5,
            }
        );
        assert_eq!(update.field(), Some(FieldCode::OutputReading));
    }

    #[test]
    fn test_interpret_voltage_response() {
        // A 12.5 V response payload must report 12.5.
        let update = interpret(&frame(193, &12.5f32.to_le_bytes())).unwrap();
        assert_eq!(
            update,
            TelemetryUpdate::FloatSetting {
                field: FieldCode::VoltageSet,
                value: 12.5,
            }
        );
        assert_eq!(update.as_float(), Some(12.5));
    }

    #[test]
    fn test_interpret_protection_threshold() {
        let update = interpret(&frame(209, &31.0f32.to_le_bytes())).unwrap();
        assert_eq!(update.field(), Some(FieldCode::OverVoltageProtection));
        assert_eq!(update.as_float(), Some(31.0));
    }

    #[test]
    fn test_interpret_byte_fields() {
        assert_eq!(
            interpret(&frame(219, &[1])).unwrap(),
            TelemetryUpdate::OutputEnabled(true)
        );
        assert_eq!(
            interpret(&frame(220, &[3])).unwrap(),
            TelemetryUpdate::ProtectionTrip(TripState::OverPower)
        );
        assert_eq!(
            interpret(&frame(221, &[0])).unwrap(),
            TelemetryUpdate::RegulationMode(RegulationMode::ConstantCurrent)
        );
    }

    #[test]
    fn test_interpret_model_name() {
        let update = interpret(&frame(222, b"DPS-150\0")).unwrap();
        assert_eq!(update, TelemetryUpdate::ModelName("DPS-150".into()));
        assert_eq!(update.as_string(), Some("DPS-150"));
    }

    #[test]
    fn test_interpret_unknown_field() {
        let update = interpret(&frame(230, &[1, 2, 3])).unwrap();
        assert!(matches!(
            update,
            TelemetryUpdate::Unknown { field: 230, .. }
        ));
        assert_eq!(update.field(), None);
    }

    #[test]
    fn test_interpret_short_payload() {
        assert!(interpret(&frame(193, &[0, 0])).is_err());
        assert!(interpret(&frame(219, &[])).is_err());
    }

    #[test]
    fn test_parse_full_status() {
        let status = parse_full_status(&full_status_payload()).unwrap();

        assert_eq!(status.input_voltage, 24.0);
        assert_eq!(status.set_voltage, 12.0);
        assert_eq!(status.output_current, 1.5);
        assert_eq!(status.temperature, 31.2);
        assert_eq!(status.groups[0].voltage, 1.0);
        assert_eq!(status.groups[5].voltage, 6.0);
        assert_eq!(status.groups[5].current, 0.5);
        assert_eq!(status.protection.over_power, 155.0);
        assert_eq!(status.protection.low_voltage, 2.9);
        assert_eq!(status.brightness, 4);
        assert_eq!(status.volume, 2);
        assert!(status.metering_on);
        assert_eq!(status.output_capacity_ah, 0.75);
        assert_eq!(status.output_energy_wh, 9.0);
        assert!(status.output_on);
        assert_eq!(status.protection_trip, TripState::OverCurrent);
        assert_eq!(status.mode, RegulationMode::ConstantCurrent);
        assert_eq!(status.upper_limit_voltage, 30.0);
        assert_eq!(status.upper_limit_current, 5.0);
    }

    #[test]
    fn test_parse_full_status_too_short() {
        assert!(parse_full_status(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_full_status_applies_atomically() {
        use crate::types::DeviceState;

        let update = interpret(&frame(255, &full_status_payload())).unwrap();
        let mut state = DeviceState::default();
        state.apply(&update);

        // Every field carried by the record lands in the same apply call.
        assert_eq!(state.set_voltage, 12.0);
        assert_eq!(state.output_power, 17.97);
        assert_eq!(state.protection.over_voltage, 31.0);
        assert!(state.output_on);
        assert_eq!(state.upper_limit_current, 5.0);
    }
}
