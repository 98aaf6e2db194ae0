pub mod mock_transport;

use wiimote_driver::{CalibrationSource, DriverSettings};

/// Settings that keep tests off the filesystem and skip the ready signal
#[allow(dead_code)]
pub fn test_settings() -> DriverSettings {
    DriverSettings {
        accel_calibration: CalibrationSource::Disabled,
        ready_signal: false,
        ..DriverSettings::default()
    }
}
