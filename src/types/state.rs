//! Device state types.
//!
//! The [`DeviceState`] snapshot holds the last-known value of every
//! telemetry field. It is written only by the telemetry processing task and
//! handed to observers as a copy, never shared mutably.

use crate::protocol::command::FieldCode;
use crate::protocol::parser::TelemetryUpdate;

/// Number of group preset slots on the device.
pub const GROUP_COUNT: usize = 6;

/// Which protection tripped, as reported in the status stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TripState {
    /// No protection active.
    #[default]
    Normal = 0,
    /// Over-voltage protection tripped.
    OverVoltage = 1,
    /// Over-current protection tripped.
    OverCurrent = 2,
    /// Over-power protection tripped.
    OverPower = 3,
    /// Over-temperature protection tripped.
    OverTemperature = 4,
    /// Low-voltage protection tripped.
    LowVoltage = 5,
    /// Reverse-polarity protection tripped.
    ReversePolarity = 6,
}

impl TripState {
    /// Parses a trip state from the wire byte. Unknown values read as
    /// [`TripState::Normal`].
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::OverVoltage,
            2 => Self::OverCurrent,
            3 => Self::OverPower,
            4 => Self::OverTemperature,
            5 => Self::LowVoltage,
            6 => Self::ReversePolarity,
            _ => Self::Normal,
        }
    }

    /// Returns true if any protection is active.
    #[must_use]
    pub const fn is_tripped(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Output regulation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegulationMode {
    /// Constant current.
    ConstantCurrent,
    /// Constant voltage.
    #[default]
    ConstantVoltage,
}

impl RegulationMode {
    /// Parses the mode byte: zero is CC, anything else CV.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        if byte == 0 {
            Self::ConstantCurrent
        } else {
            Self::ConstantVoltage
        }
    }
}

/// The protection threshold kinds that can be set and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionKind {
    /// Over-voltage protection.
    OverVoltage,
    /// Over-current protection.
    OverCurrent,
    /// Over-power protection.
    OverPower,
    /// Over-temperature protection.
    OverTemperature,
    /// Low-voltage protection.
    LowVoltage,
}

impl ProtectionKind {
    /// The wire field carrying this threshold.
    #[must_use]
    pub const fn field(self) -> FieldCode {
        match self {
            Self::OverVoltage => FieldCode::OverVoltageProtection,
            Self::OverCurrent => FieldCode::OverCurrentProtection,
            Self::OverPower => FieldCode::OverPowerProtection,
            Self::OverTemperature => FieldCode::OverTemperatureProtection,
            Self::LowVoltage => FieldCode::LowVoltageProtection,
        }
    }
}

/// One group preset slot: a stored voltage/current pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupPreset {
    /// Stored voltage setpoint in volts.
    pub voltage: f32,
    /// Stored current setpoint in amps.
    pub current: f32,
}

/// The five protection thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProtectionThresholds {
    /// Over-voltage threshold in volts.
    pub over_voltage: f32,
    /// Over-current threshold in amps.
    pub over_current: f32,
    /// Over-power threshold in watts.
    pub over_power: f32,
    /// Over-temperature threshold in degrees Celsius.
    pub over_temperature: f32,
    /// Low-voltage threshold in volts.
    pub low_voltage: f32,
}

/// Identity strings read from the device at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Model name, e.g. "DPS-150".
    pub model: String,
    /// Hardware version string.
    pub hardware_version: String,
    /// Firmware version string.
    pub firmware_version: String,
}

/// The full status record the device sends as a periodic broadcast and in
/// answer to a get-all request. Updates every snapshot field it carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullStatus {
    pub input_voltage: f32,
    pub set_voltage: f32,
    pub set_current: f32,
    pub output_voltage: f32,
    pub output_current: f32,
    pub output_power: f32,
    pub temperature: f32,
    pub groups: [GroupPreset; GROUP_COUNT],
    pub protection: ProtectionThresholds,
    pub brightness: u8,
    pub volume: u8,
    pub metering_on: bool,
    pub output_capacity_ah: f32,
    pub output_energy_wh: f32,
    pub output_on: bool,
    pub protection_trip: TripState,
    pub mode: RegulationMode,
    pub upper_limit_voltage: f32,
    pub upper_limit_current: f32,
}

/// Last-known values of all telemetry fields.
///
/// Created empty at connect time; mutated only by the telemetry processing
/// task via [`DeviceState::apply`]; discarded at disconnect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Supply input voltage in volts.
    pub input_voltage: f32,
    /// Output voltage setpoint in volts.
    pub set_voltage: f32,
    /// Output current setpoint in amps.
    pub set_current: f32,
    /// Measured output voltage in volts.
    pub output_voltage: f32,
    /// Measured output current in amps.
    pub output_current: f32,
    /// Measured output power in watts.
    pub output_power: f32,
    /// Internal temperature in degrees Celsius.
    pub temperature: f32,
    /// Group preset slots 1–6.
    pub groups: [GroupPreset; GROUP_COUNT],
    /// Protection thresholds.
    pub protection: ProtectionThresholds,
    /// Display brightness (0–5).
    pub brightness: u8,
    /// Beeper volume (0–5).
    pub volume: u8,
    /// Whether capacity/energy metering is running.
    pub metering_on: bool,
    /// Accumulated output capacity in amp-hours.
    pub output_capacity_ah: f32,
    /// Accumulated output energy in watt-hours.
    pub output_energy_wh: f32,
    /// Whether the output is on.
    pub output_on: bool,
    /// Which protection tripped, if any.
    pub protection_trip: TripState,
    /// CC/CV regulation mode.
    pub mode: RegulationMode,
    /// Maximum settable voltage reported by the device, volts.
    pub upper_limit_voltage: f32,
    /// Maximum settable current reported by the device, amps.
    pub upper_limit_current: f32,
    /// Model name, once read.
    pub model_name: Option<String>,
    /// Hardware version, once read.
    pub hardware_version: Option<String>,
    /// Firmware version, once read.
    pub firmware_version: Option<String>,
}

impl DeviceState {
    /// Folds one decoded update into the snapshot.
    ///
    /// A full status record replaces every field it carries in one call, so
    /// observers of the resulting copy never see a half-applied broadcast.
    pub fn apply(&mut self, update: &TelemetryUpdate) {
        match update {
            TelemetryUpdate::InputVoltage(v) => self.input_voltage = *v,
            TelemetryUpdate::OutputReading {
                voltage,
                current,
                power,
            } => {
                self.output_voltage = *voltage;
                self.output_current = *current;
                self.output_power = *power;
            }
            TelemetryUpdate::Temperature(t) => self.temperature = *t,
            TelemetryUpdate::FloatSetting { field, value } => self.apply_float(*field, *value),
            TelemetryUpdate::Brightness(b) => self.brightness = *b,
            TelemetryUpdate::Volume(v) => self.volume = *v,
            TelemetryUpdate::MeteringEnabled(on) => self.metering_on = *on,
            TelemetryUpdate::OutputCapacity(ah) => self.output_capacity_ah = *ah,
            TelemetryUpdate::OutputEnergy(wh) => self.output_energy_wh = *wh,
            TelemetryUpdate::OutputEnabled(on) => self.output_on = *on,
            TelemetryUpdate::ProtectionTrip(trip) => self.protection_trip = *trip,
            TelemetryUpdate::RegulationMode(mode) => self.mode = *mode,
            TelemetryUpdate::ModelName(name) => self.model_name = Some(name.clone()),
            TelemetryUpdate::HardwareVersion(v) => self.hardware_version = Some(v.clone()),
            TelemetryUpdate::FirmwareVersion(v) => self.firmware_version = Some(v.clone()),
            TelemetryUpdate::FullStatus(status) => self.apply_full(status),
            TelemetryUpdate::Unknown { .. } => {}
        }
    }

    fn apply_float(&mut self, field: FieldCode, value: f32) {
        match field {
            FieldCode::VoltageSet => self.set_voltage = value,
            FieldCode::CurrentSet => self.set_current = value,
            FieldCode::OverVoltageProtection => self.protection.over_voltage = value,
            FieldCode::OverCurrentProtection => self.protection.over_current = value,
            FieldCode::OverPowerProtection => self.protection.over_power = value,
            FieldCode::OverTemperatureProtection => self.protection.over_temperature = value,
            FieldCode::LowVoltageProtection => self.protection.low_voltage = value,
            FieldCode::UpperLimitVoltage => self.upper_limit_voltage = value,
            FieldCode::UpperLimitCurrent => self.upper_limit_current = value,
            other => {
                // Group preset fields are laid out in voltage/current pairs.
                let code = other as u8;
                if (FieldCode::Group1Voltage as u8..=FieldCode::Group6Current as u8)
                    .contains(&code)
                {
                    let offset = (code - FieldCode::Group1Voltage as u8) as usize;
                    let slot = &mut self.groups[offset / 2];
                    if offset % 2 == 0 {
                        slot.voltage = value;
                    } else {
                        slot.current = value;
                    }
                }
            }
        }
    }

    fn apply_full(&mut self, status: &FullStatus) {
        self.input_voltage = status.input_voltage;
        self.set_voltage = status.set_voltage;
        self.set_current = status.set_current;
        self.output_voltage = status.output_voltage;
        self.output_current = status.output_current;
        self.output_power = status.output_power;
        self.temperature = status.temperature;
        self.groups = status.groups;
        self.protection = status.protection;
        self.brightness = status.brightness;
        self.volume = status.volume;
        self.metering_on = status.metering_on;
        self.output_capacity_ah = status.output_capacity_ah;
        self.output_energy_wh = status.output_energy_wh;
        self.output_on = status.output_on;
        self.protection_trip = status.protection_trip;
        self.mode = status.mode;
        self.upper_limit_voltage = status.upper_limit_voltage;
        self.upper_limit_current = status.upper_limit_current;
    }

    /// Identity strings, if all three have been read.
    #[must_use]
    pub fn identity(&self) -> Option<DeviceIdentity> {
        Some(DeviceIdentity {
            model: self.model_name.clone()?,
            hardware_version: self.hardware_version.clone()?,
            firmware_version: self.firmware_version.clone()?,
        })
    }
}
