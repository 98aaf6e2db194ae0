//! Wii Remote Report Protocol
//!
//! Report ids, frame encoding and decoding of incoming reports.
//!
//! # Framing
//!
//! ```text
//! outgoing: [0xA2] [report id] [payload...]   payload[0] bit 0 = rumble
//! incoming: [0xA1] [report id] [payload...]
//! ```
//!
//! # Incoming report layouts (frame offsets)
//!
//! ```text
//! 0x20 status       [2-3] buttons  [4] flags  [7] battery
//! 0x21 memory data  [2-3] buttons  [4] size/error  [5-6] address  [7..] data
//! 0x22 acknowledge  [2-3] buttons  [4] report id  [5] error code
//! 0x30-0x3F data    [2-3] buttons (not 0x3D)  [4-6] accelerometer (accel modes)
//! ```

use crate::domain::calibration::CalibrationProfile;
use crate::domain::models::{AccelSample, ButtonState, ReportMode, StatusFlags};
use crate::error::MemoryAccessError;
use thiserror::Error;
use tracing::trace;

/// Leading byte of every frame sent to the device
pub const OUTPUT_MARKER: u8 = 0xA2;

/// Leading byte of frames received from the device
pub const INPUT_MARKER: u8 = 0xA1;

/// Some stacks strip the HID transaction header and deliver a zero byte instead
pub const INPUT_MARKER_ALT: u8 = 0x00;

/// Offset of the payload in a frame (after marker and report id)
const PAYLOAD_OFFSET: usize = 2;

/// Offset of memory-read data in a `0x21` frame
const MEMORY_DATA_OFFSET: usize = 7;

/// Maximum number of data bytes in one memory-read reply
pub const MAX_READ_CHUNK: usize = 16;

/// Output report ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputReport {
    /// Rumble only
    Rumble,
    /// Player LEDs
    Leds,
    /// Data reporting mode
    ReportMode,
    /// Speaker enable
    SpeakerEnable,
    /// Status information request
    StatusRequest,
    /// Write memory and registers
    WriteMemory,
    /// Read memory and registers
    ReadMemory,
    /// Speaker data
    SpeakerData,
    /// Speaker mute
    SpeakerMute,
}

impl OutputReport {
    pub fn code(self) -> u8 {
        match self {
            Self::Rumble => 0x10,
            Self::Leds => 0x11,
            Self::ReportMode => 0x12,
            Self::SpeakerEnable => 0x14,
            Self::StatusRequest => 0x15,
            Self::WriteMemory => 0x16,
            Self::ReadMemory => 0x17,
            Self::SpeakerData => 0x18,
            Self::SpeakerMute => 0x19,
        }
    }
}

/// Input report ids
pub mod input {
    pub const STATUS: u8 = 0x20;
    pub const MEMORY_DATA: u8 = 0x21;
    pub const ACKNOWLEDGE: u8 = 0x22;
    pub const DATA_FIRST: u8 = 0x30;
    pub const DATA_LAST: u8 = 0x3F;
    pub const EXTENSION_ONLY: u8 = 0x3D;
}

/// Build an outgoing frame, OR-ing the rumble flag into the first payload byte
pub fn encode_frame(report: OutputReport, payload: &[u8], rumble: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + PAYLOAD_OFFSET);
    frame.push(OUTPUT_MARKER);
    frame.push(report.code());
    frame.extend_from_slice(payload);
    if let Some(first) = frame.get_mut(PAYLOAD_OFFSET) {
        *first |= u8::from(rumble);
    }
    frame
}

/// `0x11` payload: LED mask in the high nibble
pub fn led_payload(mask: u8) -> [u8; 1] {
    [(mask & 0x0F) << 4]
}

/// `0x12` payload: continuous flag then mode
pub fn report_mode_payload(continuous: bool, mode: ReportMode) -> [u8; 2] {
    [if continuous { 0x04 } else { 0x00 }, mode.code()]
}

/// Payload for reports that only carry the rumble bit (`0x10`, `0x15`)
pub const EMPTY_PAYLOAD: [u8; 1] = [0x00];

/// One memory-read reply, either data or the device's error code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Low 16 bits of the address this chunk starts at
    pub address: u16,
    pub data: Result<Vec<u8>, MemoryAccessError>,
}

/// A decoded incoming report
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Status {
        buttons: ButtonState,
        status: StatusFlags,
        battery: Option<u8>,
    },
    MemoryData {
        buttons: ButtonState,
        chunk: MemoryChunk,
    },
    Acknowledge {
        buttons: ButtonState,
        report: u8,
        code: u8,
    },
    /// Periodic data report; `None` fields are absent in this report's layout
    Data {
        report: u8,
        buttons: Option<ButtonState>,
        accel: Option<AccelSample>,
    },
    Unknown {
        report: u8,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Bad leading marker 0x{0:02X}")]
    BadMarker(u8),

    #[error("Report 0x{report:02X} truncated: {len} bytes")]
    Truncated { report: u8, len: usize },
}

impl DecodeError {
    /// A bad marker means the stream is no longer framed; the rest can be skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BadMarker(_))
    }
}

/// Decode one received frame
pub fn decode_report(frame: &[u8], calibration: &CalibrationProfile) -> Result<Report, DecodeError> {
    let (&marker, rest) = frame.split_first().ok_or(DecodeError::Empty)?;
    if marker != INPUT_MARKER && marker != INPUT_MARKER_ALT {
        return Err(DecodeError::BadMarker(marker));
    }
    let (&report, payload) = rest.split_first().ok_or(DecodeError::Empty)?;
    let truncated = || DecodeError::Truncated {
        report,
        len: frame.len(),
    };

    trace!("Decoding report 0x{:02X}: {:02X?}", report, payload);

    match report {
        input::STATUS => {
            let &[b0, b1, flags, ..] = payload else {
                return Err(truncated());
            };
            Ok(Report::Status {
                buttons: ButtonState::from_bytes(b0, b1),
                status: StatusFlags::from_byte(flags),
                battery: payload.get(5).copied(),
            })
        }
        input::MEMORY_DATA => {
            let &[b0, b1, size_error, addr_hi, addr_lo, ..] = payload else {
                return Err(truncated());
            };
            let address = u16::from_be_bytes([addr_hi, addr_lo]);
            let data = match MemoryAccessError::from_code(size_error) {
                Some(err) => Err(err),
                None => {
                    // High nibble is the chunk length minus one
                    let len = usize::from(size_error >> 4) + 1;
                    let start = MEMORY_DATA_OFFSET - PAYLOAD_OFFSET;
                    let bytes = payload.get(start..start + len).ok_or_else(truncated)?;
                    Ok(bytes.to_vec())
                }
            };
            Ok(Report::MemoryData {
                buttons: ButtonState::from_bytes(b0, b1),
                chunk: MemoryChunk { address, data },
            })
        }
        input::ACKNOWLEDGE => {
            let &[b0, b1, acked, code, ..] = payload else {
                return Err(truncated());
            };
            Ok(Report::Acknowledge {
                buttons: ButtonState::from_bytes(b0, b1),
                report: acked,
                code,
            })
        }
        input::DATA_FIRST..=input::DATA_LAST => {
            let mode = ReportMode::from_code(report);
            let buttons = if report == input::EXTENSION_ONLY {
                None
            } else {
                let &[b0, b1, ..] = payload else {
                    return Err(truncated());
                };
                Some(ButtonState::from_bytes(b0, b1))
            };
            let accel = match mode {
                Some(mode) if mode.carries_accelerometer() => {
                    let &[_, _, x, y, z, ..] = payload else {
                        return Err(truncated());
                    };
                    Some(calibration.sample([x, y, z]))
                }
                _ => None,
            };
            Ok(Report::Data {
                report,
                buttons,
                accel,
            })
        }
        other => Ok(Report::Unknown { report: other }),
    }
}
