use crate::error::DriverError;
use serde::{Deserialize, Serialize};

/// Core button state carried in bytes 0-1 of every core report payload.
///
/// Always replaced as a whole; there is no way to update a single button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub d_left: bool,
    pub d_right: bool,
    pub d_down: bool,
    pub d_up: bool,
    pub plus: bool,
    pub two: bool,
    pub one: bool,
    pub b: bool,
    pub a: bool,
    pub minus: bool,
    pub home: bool,
}

impl ButtonState {
    /// Decode the two core button bytes
    ///
    /// ```text
    /// byte0: 0x01 dLeft  0x02 dRight 0x04 dDown 0x08 dUp 0x10 plus
    /// byte1: 0x01 two    0x02 one    0x04 b     0x08 a   0x10 minus 0x80 home
    /// ```
    pub fn from_bytes(byte0: u8, byte1: u8) -> Self {
        Self {
            d_left: byte0 & 0x01 != 0,
            d_right: byte0 & 0x02 != 0,
            d_down: byte0 & 0x04 != 0,
            d_up: byte0 & 0x08 != 0,
            plus: byte0 & 0x10 != 0,
            two: byte1 & 0x01 != 0,
            one: byte1 & 0x02 != 0,
            b: byte1 & 0x04 != 0,
            a: byte1 & 0x08 != 0,
            minus: byte1 & 0x10 != 0,
            home: byte1 & 0x80 != 0,
        }
    }

    pub fn any_pressed(&self) -> bool {
        *self != Self::default()
    }
}

/// One accelerometer reading: raw 8-bit counts plus the calibrated values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub raw: [u8; 3],
    pub calibrated: [f64; 3],
}

/// Flags reported in byte 4 of a status report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub low_battery: bool,
    pub extension_present: bool,
    pub speaker_enabled: bool,
    pub ir_enabled: bool,
    pub led_mask: u8,
}

impl StatusFlags {
    pub fn from_byte(flags: u8) -> Self {
        Self {
            low_battery: flags & 0x01 != 0,
            extension_present: flags & 0x02 != 0,
            speaker_enabled: flags & 0x04 != 0,
            ir_enabled: flags & 0x08 != 0,
            led_mask: flags >> 4,
        }
    }
}

/// Data reporting mode, selects the layout of periodic `0x30..=0x3F` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    Buttons,
    ButtonsAccel,
    ButtonsExtension8,
    ButtonsAccelIr,
    ButtonsExtension19,
    ButtonsAccelExtension16,
    ButtonsAccelIr10Extension9,
    ButtonsAccelIr10Extension6,
    Extension21,
}

impl ReportMode {
    pub const ALL: [ReportMode; 9] = [
        Self::Buttons,
        Self::ButtonsAccel,
        Self::ButtonsExtension8,
        Self::ButtonsAccelIr,
        Self::ButtonsExtension19,
        Self::ButtonsAccelExtension16,
        Self::ButtonsAccelIr10Extension9,
        Self::ButtonsAccelIr10Extension6,
        Self::Extension21,
    ];

    /// Report id the device uses for this mode
    pub fn code(self) -> u8 {
        match self {
            Self::Buttons => 0x30,
            Self::ButtonsAccel => 0x31,
            Self::ButtonsExtension8 => 0x32,
            Self::ButtonsAccelIr => 0x33,
            Self::ButtonsExtension19 => 0x34,
            Self::ButtonsAccelExtension16 => 0x35,
            Self::ButtonsAccelIr10Extension9 => 0x36,
            Self::ButtonsAccelIr10Extension6 => 0x37,
            Self::Extension21 => 0x3D,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.code() == code)
    }

    pub fn carries_buttons(self) -> bool {
        self != Self::Extension21
    }

    pub fn carries_accelerometer(self) -> bool {
        !matches!(
            self,
            Self::Buttons | Self::ButtonsExtension8 | Self::ButtonsExtension19 | Self::Extension21
        )
    }
}

impl Default for ReportMode {
    fn default() -> Self {
        Self::Buttons
    }
}

/// Address space targeted by a memory read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    Eeprom,
    ControlRegister,
}

impl MemoryRegion {
    pub fn selector(self) -> u8 {
        match self {
            Self::Eeprom => 0x00,
            Self::ControlRegister => 0x04,
        }
    }
}

/// Speaker sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerFormat {
    Pcm,
    Adpcm,
}

impl SpeakerFormat {
    pub fn code(self) -> u8 {
        match self {
            Self::Pcm => 0x40,
            Self::Adpcm => 0x00,
        }
    }

    /// Full-scale value of the volume byte
    fn volume_scale(self) -> f64 {
        match self {
            Self::Pcm => 255.0,
            Self::Adpcm => 64.0,
        }
    }
}

/// Speaker clock base; the configuration carries `SPEAKER_CLOCK_HZ / sample_rate`
const SPEAKER_CLOCK_HZ: u32 = 12_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerConfig {
    sample_rate: u32,
    format: SpeakerFormat,
    volume: f64,
}

impl SpeakerConfig {
    /// Validates that the sample-rate divisor fits the 16-bit register and
    /// clamps `volume` into `[0, 1]`.
    pub fn new(sample_rate: u32, format: SpeakerFormat, volume: f64) -> Result<Self, DriverError> {
        if sample_rate == 0 || SPEAKER_CLOCK_HZ / sample_rate > u32::from(u16::MAX) {
            return Err(DriverError::Misuse(format!(
                "unsupported speaker sample rate {sample_rate} Hz"
            )));
        }
        if !volume.is_finite() {
            return Err(DriverError::Misuse("speaker volume must be finite".into()));
        }
        Ok(Self {
            sample_rate,
            format,
            volume: volume.clamp(0.0, 1.0),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format(&self) -> SpeakerFormat {
        self.format
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Register block written to `0xA20001`
    ///
    /// ```text
    /// [0] 0x00
    /// [1] format
    /// [2-3] 12 MHz / sample_rate (u16 little-endian)
    /// [4] volume scaled to the format's full-scale value
    /// [5] 0x00
    /// ```
    pub fn descriptor(&self) -> [u8; 6] {
        let divisor = (SPEAKER_CLOCK_HZ / self.sample_rate) as u16;
        let volume = (self.volume * self.format.volume_scale()) as u8;
        let [lo, hi] = divisor.to_le_bytes();
        [0x00, self.format.code(), lo, hi, volume, 0x00]
    }
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2000,
            format: SpeakerFormat::Pcm,
            volume: 0.2,
        }
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
    Stopped,
}

/// Snapshot of per-connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub lifecycle: ConnectionStatus,
    pub alive: bool,
    pub report_mode: ReportMode,
    pub continuous: bool,
    pub rumble_on: bool,
    pub led_mask: u8,
    pub status: StatusFlags,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            lifecycle: ConnectionStatus::Disconnected,
            alive: false,
            report_mode: ReportMode::default(),
            continuous: false,
            rumble_on: false,
            led_mask: 0,
            status: StatusFlags::default(),
        }
    }
}
