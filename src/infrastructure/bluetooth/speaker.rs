//! Speaker streaming
//!
//! Audio goes out as `0x18` frames of up to 20 samples. The device has no
//! flow control for speaker data, so frames are paced from the host side.

use crate::domain::models::{MemoryRegion, SpeakerConfig};
use crate::error::DriverError;
use crate::infrastructure::bluetooth::memory::MemoryTransfer;
use crate::infrastructure::bluetooth::protocol::OutputReport;
use crate::infrastructure::bluetooth::transport::FrameWriter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sample bytes per speaker frame
pub const SPEAKER_CHUNK: usize = 20;

/// Payload enabling the speaker or muting it
const SPEAKER_ON: [u8; 1] = [0x04];
const SPEAKER_OFF: [u8; 1] = [0x00];

// Speaker control registers
const REG_SPEAKER_RESET: u32 = 0xA20009;
const REG_SPEAKER_CONFIG: u32 = 0xA20001;
const REG_SPEAKER_START: u32 = 0xA20008;

/// `0x18` payloads for `data`: length in the top five bits, then 20 bytes
pub fn data_frames(data: &[u8]) -> Vec<[u8; SPEAKER_CHUNK + 1]> {
    data.chunks(SPEAKER_CHUNK)
        .map(|chunk| {
            let mut payload = [0u8; SPEAKER_CHUNK + 1];
            payload[0] = (chunk.len() as u8) << 3;
            payload[1..=chunk.len()].copy_from_slice(chunk);
            payload
        })
        .collect()
}

/// Delay between frames: 5 µs per Hz of sample rate
pub fn frame_interval(sample_rate: u32) -> Duration {
    Duration::from_micros(u64::from(sample_rate) * 5)
}

pub struct SpeakerStream {
    writer: Arc<FrameWriter>,
    memory: Arc<MemoryTransfer>,
    settle: Duration,
    config: Mutex<Option<SpeakerConfig>>,
}

impl SpeakerStream {
    pub fn new(writer: Arc<FrameWriter>, memory: Arc<MemoryTransfer>, settle: Duration) -> Self {
        Self {
            writer,
            memory,
            settle,
            config: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Option<SpeakerConfig> {
        *self.config.lock()
    }

    /// Run the speaker enable sequence and program `config`
    pub async fn initialize(&self, config: SpeakerConfig) -> Result<(), DriverError> {
        info!(
            "Initializing speaker: {} Hz {:?} volume {:.2}",
            config.sample_rate(),
            config.format(),
            config.volume()
        );

        self.writer.send(OutputReport::SpeakerEnable, &SPEAKER_ON).await?;
        self.writer.send(OutputReport::SpeakerMute, &SPEAKER_ON).await?;

        let descriptor = config.descriptor();
        let writes: [(&[u8], u32); 4] = [
            (&[0x01], REG_SPEAKER_RESET),
            (&[0x08], REG_SPEAKER_CONFIG),
            (&descriptor, REG_SPEAKER_CONFIG),
            (&[0x01], REG_SPEAKER_START),
        ];
        for (data, register) in writes {
            self.memory
                .write(data, register, MemoryRegion::ControlRegister)
                .await?;
            tokio::time::sleep(self.settle).await;
        }

        self.writer.send(OutputReport::SpeakerMute, &SPEAKER_OFF).await?;

        *self.config.lock() = Some(config);
        info!("Speaker ready");
        Ok(())
    }

    /// Start streaming `data` in the background
    pub fn start_playback(
        &self,
        data: Vec<u8>,
    ) -> Result<JoinHandle<Result<(), DriverError>>, DriverError> {
        let config = self.config().ok_or_else(|| {
            DriverError::Misuse("speaker must be initialized before playing".into())
        })?;

        let writer = self.writer.clone();
        let interval = frame_interval(config.sample_rate());
        let frames = data_frames(&data);
        debug!(
            "Streaming {} bytes as {} frames, {:?} apart",
            data.len(),
            frames.len(),
            interval
        );

        Ok(tokio::spawn(async move {
            for frame in &frames {
                if let Err(e) = writer.send(OutputReport::SpeakerData, frame).await {
                    warn!("Speaker playback aborted: {}", e);
                    return Err(e.into());
                }
                tokio::time::sleep(interval).await;
            }
            debug!("Speaker playback finished");
            Ok(())
        }))
    }

    /// Stream `data`; with `wait` the call returns once every frame is sent
    pub async fn play(&self, data: Vec<u8>, wait: bool) -> Result<(), DriverError> {
        let handle = self.start_playback(data)?;
        if !wait {
            return Ok(());
        }
        handle
            .await
            .map_err(|e| DriverError::Internal(format!("speaker task failed: {e}")))?
    }
}
