//! Transport seam
//!
//! Discovery and the L2CAP channel itself live outside this crate. The driver
//! only needs an ordered, reliable byte channel with a non-blocking receive.

use crate::error::TransportError;
use crate::infrastructure::bluetooth::connection::SharedState;
use crate::infrastructure::bluetooth::protocol::{self, OutputReport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Connected channel to one device
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Send one complete frame
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one frame if one is queued.
    ///
    /// Returns `Ok(None)` instead of blocking when nothing is available.
    async fn try_receive(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the channel
    async fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn TransportChannel>;

/// Finds a device and opens a channel to it
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// `Ok(None)` when no matching device answered
    async fn discover(&self) -> Result<Option<BoxedTransport>, TransportError>;
}

/// Serialized write side of the transport.
///
/// Every outgoing frame goes through here so concurrent senders never
/// interleave and the current rumble flag rides on every frame.
pub struct FrameWriter {
    transport: BoxedTransport,
    state: Arc<SharedState>,
    send_lock: tokio::sync::Mutex<()>,
}

impl FrameWriter {
    pub(crate) fn new(transport: BoxedTransport, state: Arc<SharedState>) -> Self {
        Self {
            transport,
            state,
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn send(&self, report: OutputReport, payload: &[u8]) -> Result<(), TransportError> {
        let _guard = self.send_lock.lock().await;
        let frame = protocol::encode_frame(report, payload, self.state.rumble_on());
        trace!("Sending {:?}: {:02X?}", report, frame);
        self.transport.send(&frame).await
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[tokio::test]
    async fn test_writer_carries_rumble_flag() {
        let transport = MockTransport::new();
        let state = Arc::new(SharedState::default());
        let writer = FrameWriter::new(transport.clone(), state.clone());

        writer
            .send(OutputReport::StatusRequest, &protocol::EMPTY_PAYLOAD)
            .await
            .unwrap();
        state.update_connection(|c| c.rumble_on = true);
        writer
            .send(OutputReport::Leds, &protocol::led_payload(0b0101))
            .await
            .unwrap();

        assert_eq!(
            transport.sent_frames(),
            vec![vec![0xA2, 0x15, 0x00], vec![0xA2, 0x11, 0x51]]
        );
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let transport = MockTransport::new();
        let writer = Arc::new(FrameWriter::new(
            transport.clone(),
            Arc::new(SharedState::default()),
        ));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.send(OutputReport::SpeakerData, &[i; 21]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let frames = transport.sent_frames();
        assert_eq!(frames.len(), 8);
        for frame in frames {
            assert_eq!(frame.len(), 23);
            assert!(frame[2..].iter().all(|b| *b == frame[2]));
        }
    }
}
