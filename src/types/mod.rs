//! Data structures for device state and telemetry.

pub mod state;

pub use state::{
    DeviceIdentity, DeviceState, FullStatus, GROUP_COUNT, GroupPreset, ProtectionKind,
    ProtectionThresholds, RegulationMode, TripState,
};
