//! Wii Remote protocol driver
//!
//! Decodes input reports, tracks connection state and exposes the device's
//! outputs (LEDs, rumble, report mode, memory, speaker) over a transport the
//! host application provides.
//!
//! ```no_run
//! use wiimote_driver::{DriverSettings, ReportMode, TransportChannel, Wiimote};
//! use std::sync::Arc;
//!
//! # async fn run(transport: Arc<dyn TransportChannel>) -> Result<(), wiimote_driver::DriverError> {
//! let wiimote = Wiimote::with_transport(transport, DriverSettings::default()).await?;
//! wiimote.set_report_mode(ReportMode::ButtonsAccel).await?;
//! if wiimote.buttons().a {
//!     wiimote.set_rumble(true).await?;
//! }
//! wiimote.stop().await
//! # }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::calibration::{AxisCalibration, CalibrationProfile, CalibrationSource};
pub use domain::models::{
    AccelSample, ButtonState, ConnectionState, ConnectionStatus, MemoryRegion, ReportMode,
    SpeakerConfig, SpeakerFormat, StatusFlags,
};
pub use domain::settings::{DriverSettings, LogSettings, SettingsService};
pub use error::{CalibrationError, DriverError, MemoryAccessError, TransportError};
pub use infrastructure::bluetooth::transport::{BoxedTransport, DeviceDiscovery, TransportChannel};
pub use infrastructure::bluetooth::Wiimote;
pub use infrastructure::logging::{init_logger, LoggingGuard};
