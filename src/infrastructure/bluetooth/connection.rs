//! Connection Module
//!
//! Shared per-connection state and the receive loop that owns the read side
//! of the transport.

use crate::domain::calibration::CalibrationProfile;
use crate::domain::models::{AccelSample, ButtonState, ConnectionState, ConnectionStatus};
use crate::error::{DriverError, TransportError};
use crate::infrastructure::bluetooth::correlator::{Reply, RequestCorrelator, RequestKind};
use crate::infrastructure::bluetooth::memory::MemoryTransfer;
use crate::infrastructure::bluetooth::protocol::{self, DecodeError, OutputReport, Report};
use crate::infrastructure::bluetooth::transport::{BoxedTransport, FrameWriter};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Latest decoded input, replaced as a unit
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub buttons: ButtonState,
    pub accel: Option<AccelSample>,
}

/// State shared between the receive loop and foreground calls
#[derive(Default)]
pub struct SharedState {
    connection: Mutex<ConnectionState>,
    input: Mutex<InputState>,
    calibration: RwLock<CalibrationProfile>,
}

impl SharedState {
    pub fn connection(&self) -> ConnectionState {
        *self.connection.lock()
    }

    pub fn update_connection<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        f(&mut self.connection.lock())
    }

    pub fn rumble_on(&self) -> bool {
        self.connection.lock().rumble_on
    }

    pub fn input(&self) -> InputState {
        *self.input.lock()
    }

    /// Update buttons, keeping the last accelerometer sample
    pub fn set_buttons(&self, buttons: ButtonState) {
        self.input.lock().buttons = buttons;
    }

    pub fn set_input(&self, buttons: ButtonState, accel: Option<AccelSample>) {
        *self.input.lock() = InputState { buttons, accel };
    }

    pub fn calibration(&self) -> CalibrationProfile {
        *self.calibration.read()
    }

    pub fn set_calibration(&self, profile: CalibrationProfile) {
        *self.calibration.write() = profile;
    }
}

/// Background task pulling frames off the transport
pub struct ReceiveLoop {
    transport: BoxedTransport,
    writer: Arc<FrameWriter>,
    state: Arc<SharedState>,
    correlator: Arc<RequestCorrelator>,
    memory: Arc<MemoryTransfer>,
    idle: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReceiveLoop {
    pub fn new(
        transport: BoxedTransport,
        writer: Arc<FrameWriter>,
        state: Arc<SharedState>,
        correlator: Arc<RequestCorrelator>,
        memory: Arc<MemoryTransfer>,
        idle: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            writer,
            state,
            correlator,
            memory,
            idle,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), DriverError>> {
        self.state.update_connection(|c| c.alive = true);
        tokio::spawn(self.run())
    }

    /// Runs until a stop is requested or the stream loses framing
    async fn run(mut self) -> Result<(), DriverError> {
        info!("Receive loop started");

        let outcome = loop {
            if *self.shutdown.borrow() {
                break Ok(());
            }

            match self.transport.try_receive().await {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(&frame).await {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    if self.idle().await {
                        break Ok(());
                    }
                }
                Err(TransportError::Closed) => {
                    warn!("Transport closed underneath the receive loop");
                    break Err(DriverError::Disconnected);
                }
                Err(e) => {
                    trace!("Receive error, retrying: {}", e);
                    if self.idle().await {
                        break Ok(());
                    }
                }
            }
        };

        self.shutdown_connection().await;
        match &outcome {
            Ok(()) => info!("Receive loop stopped"),
            Err(e) => error!("Receive loop terminated: {}", e),
        }
        outcome
    }

    /// Sleep for the idle interval. Returns `true` once the owner is gone;
    /// a stop request itself is picked up at the top of the loop.
    async fn idle(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.idle) => false,
            changed = self.shutdown.changed() => changed.is_err(),
        }
    }

    async fn shutdown_connection(&self) {
        self.state.update_connection(|c| {
            c.alive = false;
            c.lifecycle = ConnectionStatus::Stopped;
        });
        self.correlator.fail_all(|| DriverError::Disconnected);
        self.memory.reset();
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {}", e);
        }
    }

    /// Decode one frame and apply it. Only a framing violation is an error.
    pub(crate) async fn handle_frame(&self, frame: &[u8]) -> Result<(), DriverError> {
        let calibration = self.state.calibration();
        let report = match protocol::decode_report(frame, &calibration) {
            Ok(report) => report,
            Err(DecodeError::BadMarker(marker)) => {
                error!(
                    "Protocol framing violation: marker 0x{:02X} in {:02X?}",
                    marker, frame
                );
                return Err(DriverError::ProtocolFraming { marker });
            }
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return Ok(());
            }
        };

        debug!("Received {:?}", report);

        match report {
            Report::Status {
                buttons,
                status,
                battery,
            } => {
                self.state.set_buttons(buttons);
                if let Some(battery) = battery {
                    trace!("Battery level: 0x{:02X}", battery);
                }
                let (extension_changed, mode, continuous) = self.state.update_connection(|c| {
                    let changed = c.status.extension_present != status.extension_present;
                    c.status = status;
                    (changed, c.report_mode, c.continuous)
                });
                self.correlator
                    .resolve(RequestKind::StatusQuery, Reply::Status(status));

                if extension_changed {
                    info!(
                        "Extension {}, restoring report mode {:?}",
                        if status.extension_present { "connected" } else { "disconnected" },
                        mode
                    );
                    let payload = protocol::report_mode_payload(continuous, mode);
                    if let Err(e) = self.writer.send(OutputReport::ReportMode, &payload).await {
                        warn!("Failed to restore report mode: {}", e);
                    }
                }
            }
            Report::MemoryData { buttons, chunk } => {
                self.state.set_buttons(buttons);
                self.memory.on_chunk(chunk);
            }
            Report::Acknowledge {
                buttons,
                report,
                code,
            } => {
                self.state.set_buttons(buttons);
                if code != 0 {
                    warn!("Device rejected report 0x{:02X}: error {}", report, code);
                }
            }
            Report::Data { buttons, accel, .. } => {
                self.state.set_input(buttons.unwrap_or_default(), accel);
            }
            Report::Unknown { report } => {
                debug!("Ignoring report 0x{:02X}", report);
            }
        }
        Ok(())
    }
}
