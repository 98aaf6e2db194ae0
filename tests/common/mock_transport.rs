//! Scripted Wii Remote for integration tests.
//!
//! Answers status requests and memory reads the way the device does and
//! records every frame the driver sends.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wiimote_driver::{BoxedTransport, DeviceDiscovery, TransportChannel, TransportError};

pub struct MockWiimote {
    sent: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    memory: Mutex<HashMap<u32, u8>>,
    status_flags: Mutex<u8>,
    read_error: Mutex<Option<u8>>,
    answer_status: AtomicBool,
    closed: AtomicBool,
}

#[allow(dead_code)]
impl MockWiimote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            memory: Mutex::new(HashMap::new()),
            status_flags: Mutex::new(0x00),
            read_error: Mutex::new(None),
            answer_status: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    pub fn as_transport(self: &Arc<Self>) -> BoxedTransport {
        self.clone()
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn sent_with_report(&self, report: u8) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.get(1) == Some(&report))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn inject(&self, frame: Vec<u8>) {
        self.inbound.lock().push_back(frame);
    }

    /// Low nibble of the status flags; the LED nibble follows `0x11` frames
    pub fn set_status_flags(&self, flags: u8) {
        let mut current = self.status_flags.lock();
        *current = (*current & 0xF0) | (flags & 0x0F);
    }

    pub fn set_answer_status(&self, answer: bool) {
        self.answer_status.store(answer, Ordering::SeqCst);
    }

    /// Make the next reads fail with the given error nibble
    pub fn set_read_error(&self, code: Option<u8>) {
        *self.read_error.lock() = code;
    }

    pub fn fill_memory(&self, offset: u32, data: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, byte) in data.iter().enumerate() {
            memory.insert(offset + i as u32, *byte);
        }
    }

    pub fn memory_at(&self, offset: u32, len: usize) -> Vec<u8> {
        let memory = self.memory.lock();
        (0..len as u32)
            .map(|i| memory.get(&(offset + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn status_frame(&self) -> Vec<u8> {
        vec![0xA1, 0x20, 0x00, 0x00, *self.status_flags.lock(), 0x00, 0x00, 0xC8]
    }

    fn offset(payload: &[u8]) -> u32 {
        u32::from_be_bytes([0, payload[1], payload[2], payload[3]])
    }

    fn respond(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let (report, payload) = (frame[1], &frame[2..]);
        match report {
            0x11 => {
                let mut flags = self.status_flags.lock();
                *flags = (*flags & 0x0F) | (payload[0] & 0xF0);
                Vec::new()
            }
            0x15 if self.answer_status.load(Ordering::SeqCst) => vec![self.status_frame()],
            0x16 => {
                let offset = Self::offset(payload);
                let len = usize::from(payload[4]);
                self.fill_memory(offset, &payload[5..5 + len]);
                vec![vec![0xA1, 0x22, 0x00, 0x00, 0x16, 0x00]]
            }
            0x17 => self.read_reply(payload),
            _ => Vec::new(),
        }
    }

    fn read_reply(&self, payload: &[u8]) -> Vec<Vec<u8>> {
        let offset = Self::offset(payload);
        let size = usize::from(u16::from_be_bytes([payload[4], payload[5]])) / 2;

        if let Some(code) = *self.read_error.lock() {
            let [_, _, hi, lo] = offset.to_be_bytes();
            return vec![vec![0xA1, 0x21, 0x00, 0x00, 0xF0 | code, hi, lo]];
        }

        let data = self.memory_at(offset, size);
        data.chunks(16)
            .enumerate()
            .map(|(i, chunk)| {
                let [_, _, hi, lo] = (offset + 16 * i as u32).to_be_bytes();
                let mut frame = vec![0xA1, 0x21, 0x00, 0x00, (chunk.len() as u8 - 1) << 4, hi, lo];
                frame.extend_from_slice(chunk);
                frame.resize(7 + 16, 0);
                frame
            })
            .collect()
    }
}

#[async_trait]
impl TransportChannel for MockWiimote {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(frame.to_vec());
        let replies = self.respond(frame);
        self.inbound.lock().extend(replies);
        Ok(())
    }

    async fn try_receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(self.inbound.lock().pop_front())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Discovery that yields a prepared device, or nothing
pub struct MockDiscovery {
    pub device: Option<Arc<MockWiimote>>,
}

#[async_trait]
impl DeviceDiscovery for MockDiscovery {
    async fn discover(&self) -> Result<Option<BoxedTransport>, TransportError> {
        Ok(self.device.as_ref().map(|device| device.as_transport()))
    }
}
