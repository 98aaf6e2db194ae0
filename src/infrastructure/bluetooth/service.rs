//! Wiimote Service Module
//!
//! Public handle for one connected controller: runs the handshake, owns the
//! receive loop and exposes the device operations.

use crate::domain::calibration::{CalibrationProfile, CalibrationSource};
use crate::domain::models::{
    AccelSample, ButtonState, ConnectionState, ConnectionStatus, MemoryRegion, ReportMode,
    SpeakerConfig, StatusFlags,
};
use crate::domain::settings::DriverSettings;
use crate::error::DriverError;
use crate::infrastructure::bluetooth::{
    connection::{ReceiveLoop, SharedState},
    correlator::{Reply, RequestCorrelator, RequestKind},
    memory::MemoryTransfer,
    protocol::{self, OutputReport},
    speaker::SpeakerStream,
    transport::{BoxedTransport, DeviceDiscovery, FrameWriter},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mask lighting all four player LEDs
pub const ALL_LEDS: u8 = 0b1111;

// Extension controller registers
const REG_EXTENSION_INIT_1: u32 = 0xA400F0;
const REG_EXTENSION_INIT_2: u32 = 0xA400FB;
const REG_EXTENSION_ID: u32 = 0xA400FA;
const EXTENSION_ID_LEN: usize = 16;

/// A connected Wii Remote
pub struct Wiimote {
    settings: DriverSettings,
    state: Arc<SharedState>,
    writer: Arc<FrameWriter>,
    correlator: Arc<RequestCorrelator>,
    memory: Arc<MemoryTransfer>,
    speaker: SpeakerStream,
    shutdown: watch::Sender<bool>,
    receive_task: Mutex<Option<JoinHandle<Result<(), DriverError>>>>,
}

impl Wiimote {
    /// Discover a device and connect to it
    pub async fn connect(
        discovery: &dyn DeviceDiscovery,
        settings: DriverSettings,
    ) -> Result<Self, DriverError> {
        info!("Searching for Wii Remote...");
        let transport = discovery
            .discover()
            .await?
            .ok_or(DriverError::DeviceNotFound)?;
        Self::with_transport(transport, settings).await
    }

    /// Run the handshake over an already open transport
    pub async fn with_transport(
        transport: BoxedTransport,
        settings: DriverSettings,
    ) -> Result<Self, DriverError> {
        let state = Arc::new(SharedState::default());
        state.update_connection(|c| {
            c.lifecycle = ConnectionStatus::Connecting;
            c.report_mode = settings.initial_report_mode;
        });

        let writer = Arc::new(FrameWriter::new(transport.clone(), state.clone()));
        let correlator = Arc::new(RequestCorrelator::new(settings.receive_timeout()));
        let memory = Arc::new(MemoryTransfer::new(writer.clone(), correlator.clone()));
        let speaker = SpeakerStream::new(writer.clone(), memory.clone(), settings.register_settle());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let wiimote = Self {
            state,
            writer,
            correlator,
            memory,
            speaker,
            shutdown,
            receive_task: Mutex::new(None),
            settings,
        };

        if let Err(e) = wiimote.handshake(transport.clone(), shutdown_rx).await {
            warn!("Handshake failed: {}", e);
            let loop_started = wiimote.receive_task.lock().is_some();
            if !loop_started {
                if let Err(close_err) = transport.close().await {
                    warn!("Failed to close transport: {}", close_err);
                }
            }
            let _ = wiimote.stop().await;
            return Err(e);
        }

        wiimote
            .state
            .update_connection(|c| c.lifecycle = ConnectionStatus::Ready);
        info!("Wii Remote ready");
        Ok(wiimote)
    }

    async fn handshake(
        &self,
        transport: BoxedTransport,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), DriverError> {
        info!("Sending handshake...");
        self.writer
            .send(OutputReport::Leds, &protocol::led_payload(0))
            .await?;
        self.send_report_mode().await?;
        self.load_calibration(&self.settings.accel_calibration);

        let receive = ReceiveLoop::new(
            transport,
            self.writer.clone(),
            self.state.clone(),
            self.correlator.clone(),
            self.memory.clone(),
            self.settings.receive_idle(),
            shutdown,
        );
        *self.receive_task.lock() = Some(receive.spawn());

        if self.settings.ready_signal {
            self.ready_signal().await?;
        }
        Ok(())
    }

    /// Light every LED and pulse rumble so the user sees the device is live
    async fn ready_signal(&self) -> Result<(), DriverError> {
        self.set_led_mask(ALL_LEDS).await?;
        self.set_rumble(true).await?;
        tokio::time::sleep(self.settings.ready_signal_duration()).await;
        self.set_rumble(false).await
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection()
    }

    pub fn is_alive(&self) -> bool {
        self.state.connection().alive
    }

    /// Last status the device reported
    pub fn status(&self) -> StatusFlags {
        self.state.connection().status
    }

    pub fn buttons(&self) -> ButtonState {
        self.state.input().buttons
    }

    /// `None` while the report mode carries no accelerometer data
    pub fn accelerometer(&self) -> Option<AccelSample> {
        self.state.input().accel
    }

    pub fn calibration(&self) -> CalibrationProfile {
        self.state.calibration()
    }

    pub fn set_calibration(&self, profile: CalibrationProfile) {
        self.state.set_calibration(profile);
    }

    /// Reload calibration, falling back to identity when unavailable
    pub fn load_calibration(&self, source: &CalibrationSource) {
        self.state
            .set_calibration(CalibrationProfile::load_or_identity(source));
    }

    fn ensure_alive(&self) -> Result<(), DriverError> {
        if self.state.connection().lifecycle == ConnectionStatus::Stopped {
            return Err(DriverError::Disconnected);
        }
        Ok(())
    }

    async fn send_report_mode(&self) -> Result<(), DriverError> {
        let (continuous, mode) = self
            .state
            .update_connection(|c| (c.continuous, c.report_mode));
        debug!("Report mode {:?} (continuous: {})", mode, continuous);
        self.writer
            .send(
                OutputReport::ReportMode,
                &protocol::report_mode_payload(continuous, mode),
            )
            .await?;
        Ok(())
    }

    pub async fn set_report_mode(&self, mode: ReportMode) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.state.update_connection(|c| c.report_mode = mode);
        self.send_report_mode().await
    }

    /// Continuous reporting sends data reports even when nothing changed
    pub async fn set_continuous(&self, continuous: bool) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.state.update_connection(|c| c.continuous = continuous);
        self.send_report_mode().await
    }

    /// Set the player LEDs and wait for the device to confirm via status
    pub async fn set_led_mask(&self, mask: u8) -> Result<StatusFlags, DriverError> {
        if mask > ALL_LEDS {
            return Err(DriverError::Misuse(format!(
                "LED mask 0x{mask:02X} out of range 0..=15"
            )));
        }
        self.ensure_alive()?;
        self.state.update_connection(|c| c.led_mask = mask);
        self.writer
            .send(OutputReport::Leds, &protocol::led_payload(mask))
            .await?;
        self.request_status(true).await
    }

    pub async fn set_rumble(&self, on: bool) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.state.update_connection(|c| c.rumble_on = on);
        self.writer
            .send(OutputReport::Rumble, &protocol::EMPTY_PAYLOAD)
            .await?;
        Ok(())
    }

    /// Ask the device for a status report.
    ///
    /// With `wait` the fresh status is returned; without it the request is
    /// only sent and the last known status is returned.
    pub async fn request_status(&self, wait: bool) -> Result<StatusFlags, DriverError> {
        self.ensure_alive()?;
        if !wait {
            self.writer
                .send(OutputReport::StatusRequest, &protocol::EMPTY_PAYLOAD)
                .await?;
            return Ok(self.status());
        }

        let pending = self.correlator.begin_wait(RequestKind::StatusQuery);
        if let Err(e) = self
            .writer
            .send(OutputReport::StatusRequest, &protocol::EMPTY_PAYLOAD)
            .await
        {
            self.correlator.cancel(pending);
            return Err(e.into());
        }
        match self.correlator.wait(pending).await? {
            Reply::Status(status) => Ok(status),
            other => Err(DriverError::Internal(format!(
                "status query resolved with {other:?}"
            ))),
        }
    }

    pub async fn read_memory(
        &self,
        offset: u32,
        size: usize,
        region: MemoryRegion,
    ) -> Result<Vec<u8>, DriverError> {
        self.ensure_alive()?;
        self.memory.read(offset, size, region).await
    }

    pub async fn write_memory(
        &self,
        data: &[u8],
        offset: u32,
        region: MemoryRegion,
    ) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.memory.write(data, offset, region).await
    }

    pub async fn init_speaker(&self, config: SpeakerConfig) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.speaker.initialize(config).await
    }

    /// Stream audio in the speaker's configured format
    pub async fn play(&self, data: Vec<u8>, wait: bool) -> Result<(), DriverError> {
        self.ensure_alive()?;
        self.speaker.play(data, wait).await
    }

    /// Initialise an attached extension and return its 16-byte identifier block
    pub async fn init_extension(&self) -> Result<Vec<u8>, DriverError> {
        self.ensure_alive()?;
        if !self.status().extension_present {
            return Err(DriverError::Misuse("no extension connected".into()));
        }

        info!("Initializing extension...");
        self.memory
            .write(&[0x55], REG_EXTENSION_INIT_1, MemoryRegion::ControlRegister)
            .await?;
        self.memory
            .write(&[0x00], REG_EXTENSION_INIT_2, MemoryRegion::ControlRegister)
            .await?;
        tokio::time::sleep(self.settings.register_settle()).await;

        let id = self
            .memory
            .read(REG_EXTENSION_ID, EXTENSION_ID_LEN, MemoryRegion::ControlRegister)
            .await?;
        info!("Extension identifier: {:02X?}", id);
        Ok(id)
    }

    /// Stop the receive loop and release the transport.
    ///
    /// Returns how the loop ended, e.g. a framing violation that already
    /// terminated it.
    pub async fn stop(&self) -> Result<(), DriverError> {
        self.shutdown.send_replace(true);
        let Some(handle) = self.receive_task.lock().take() else {
            return Ok(());
        };
        info!("Stopping Wii Remote connection");
        handle
            .await
            .map_err(|e| DriverError::Internal(format!("receive loop failed: {e}")))?
    }
}

impl Drop for Wiimote {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
