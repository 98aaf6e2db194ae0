//! Memory and register access
//!
//! ```text
//! 0x17 read:  [region] [offset: 3 BE] [size * 2: 2 BE]
//! 0x16 write: [region] [offset: 3 BE] [len] [data: 16, zero padded]
//! ```
//!
//! Read replies arrive as `0x21` chunks of up to 16 bytes and are appended to
//! a [`ReadAssembly`] until the requested size is reached.

use crate::domain::models::MemoryRegion;
use crate::error::DriverError;
use crate::infrastructure::bluetooth::correlator::{Reply, RequestCorrelator, RequestKind};
use crate::infrastructure::bluetooth::protocol::{MemoryChunk, OutputReport};
use crate::infrastructure::bluetooth::transport::FrameWriter;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Data bytes carried by one write frame
pub const WRITE_CHUNK: usize = 16;

/// Offsets are 24-bit on the wire
const ADDRESS_SPACE: u64 = 1 << 24;

/// Largest read whose doubled size still fits the 16-bit size field
pub const MAX_READ_SIZE: usize = (u16::MAX / 2) as usize;

fn address_bytes(offset: u32) -> [u8; 3] {
    let [_, hi, mid, lo] = offset.to_be_bytes();
    [hi, mid, lo]
}

fn check_range(offset: u32, len: usize) -> Result<(), DriverError> {
    if u64::from(offset) + len as u64 > ADDRESS_SPACE {
        return Err(DriverError::Misuse(format!(
            "range 0x{offset:06X}+{len} exceeds the 24-bit address space"
        )));
    }
    Ok(())
}

/// Payload of a `0x17` read request
pub fn read_request_payload(
    offset: u32,
    size: usize,
    region: MemoryRegion,
) -> Result<[u8; 6], DriverError> {
    if size > MAX_READ_SIZE {
        return Err(DriverError::Misuse(format!(
            "read of {size} bytes exceeds the {MAX_READ_SIZE} byte limit"
        )));
    }
    check_range(offset, size)?;

    let [a0, a1, a2] = address_bytes(offset);
    // The device expects the size field doubled
    let [s0, s1] = ((size * 2) as u16).to_be_bytes();
    Ok([region.selector(), a0, a1, a2, s0, s1])
}

/// Payloads of the `0x16` frames needed to write `data` at `offset`
pub fn write_request_payloads(
    data: &[u8],
    offset: u32,
    region: MemoryRegion,
) -> Result<Vec<[u8; 21]>, DriverError> {
    check_range(offset, data.len())?;

    Ok(data
        .chunks(WRITE_CHUNK)
        .enumerate()
        .map(|(idx, chunk)| {
            let [a0, a1, a2] = address_bytes(offset + (idx * WRITE_CHUNK) as u32);
            let mut payload = [0u8; 21];
            payload[..5].copy_from_slice(&[region.selector(), a0, a1, a2, chunk.len() as u8]);
            payload[5..5 + chunk.len()].copy_from_slice(chunk);
            payload
        })
        .collect())
}

/// Accumulates the chunks of one memory read.
///
/// Grows monotonically, never past the target size, and reports completion
/// exactly once.
#[derive(Debug)]
pub struct ReadAssembly {
    offset: u32,
    target: usize,
    buffer: Vec<u8>,
    completed: bool,
}

impl ReadAssembly {
    pub fn new(offset: u32, target: usize) -> Self {
        Self {
            offset,
            target,
            buffer: Vec::with_capacity(target),
            completed: false,
        }
    }

    /// Address the next chunk must carry. Replies only echo the low 16 bits.
    pub fn expected_address(&self) -> u16 {
        (self.offset as usize + self.buffer.len()) as u16
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a chunk. Returns the full buffer the first time the target
    /// size is reached; bytes past the target are discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if self.completed {
            return None;
        }
        let room = self.target - self.buffer.len();
        if bytes.len() > room {
            debug!("Discarding {} bytes past the requested size", bytes.len() - room);
        }
        self.buffer.extend_from_slice(&bytes[..bytes.len().min(room)]);

        if self.buffer.len() == self.target {
            self.completed = true;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }
}

pub struct MemoryTransfer {
    writer: Arc<FrameWriter>,
    correlator: Arc<RequestCorrelator>,
    assembly: Mutex<Option<ReadAssembly>>,
}

impl MemoryTransfer {
    pub fn new(writer: Arc<FrameWriter>, correlator: Arc<RequestCorrelator>) -> Self {
        Self {
            writer,
            correlator,
            assembly: Mutex::new(None),
        }
    }

    /// Read `size` bytes at `offset` and wait for the reassembled reply
    pub async fn read(
        &self,
        offset: u32,
        size: usize,
        region: MemoryRegion,
    ) -> Result<Vec<u8>, DriverError> {
        let payload = read_request_payload(offset, size, region)?;
        if size == 0 {
            return Ok(Vec::new());
        }

        debug!("Reading {} bytes at 0x{:06X} ({:?})", size, offset, region);
        *self.assembly.lock() = Some(ReadAssembly::new(offset, size));
        let pending = self.correlator.begin_wait(RequestKind::MemoryRead);

        if let Err(e) = self.writer.send(OutputReport::ReadMemory, &payload).await {
            self.correlator.cancel(pending);
            self.assembly.lock().take();
            return Err(e.into());
        }

        let result = self.correlator.wait(pending).await;
        if matches!(result, Err(DriverError::Timeout)) {
            self.assembly.lock().take();
        }
        match result? {
            Reply::Memory(data) => Ok(data),
            other => Err(DriverError::Internal(format!(
                "memory read resolved with {other:?}"
            ))),
        }
    }

    /// Write `data` at `offset`, 16 bytes per frame. Does not wait for
    /// acknowledgements.
    pub async fn write(
        &self,
        data: &[u8],
        offset: u32,
        region: MemoryRegion,
    ) -> Result<(), DriverError> {
        let payloads = write_request_payloads(data, offset, region)?;
        debug!(
            "Writing {} bytes at 0x{:06X} ({:?}) in {} frames",
            data.len(),
            offset,
            region,
            payloads.len()
        );
        for payload in &payloads {
            self.writer.send(OutputReport::WriteMemory, payload).await?;
        }
        Ok(())
    }

    /// Feed one decoded `0x21` reply, called from the receive loop
    pub fn on_chunk(&self, chunk: MemoryChunk) {
        let mut assembly = self.assembly.lock();
        let Some(current) = assembly.as_mut() else {
            debug!("Memory chunk at 0x{:04X} with no read in progress", chunk.address);
            return;
        };
        if chunk.address != current.expected_address() {
            debug!(
                "Dropping memory chunk at 0x{:04X}, expected 0x{:04X}",
                chunk.address,
                current.expected_address()
            );
            return;
        }

        match chunk.data {
            Ok(bytes) => {
                trace!(
                    "Memory chunk at 0x{:04X}: {} bytes ({}/{})",
                    chunk.address,
                    bytes.len(),
                    current.len(),
                    current.target()
                );
                if let Some(buffer) = current.push(&bytes) {
                    assembly.take();
                    drop(assembly);
                    self.correlator
                        .resolve(RequestKind::MemoryRead, Reply::Memory(buffer));
                }
            }
            Err(e) => {
                warn!("Memory read failed at 0x{:04X}: {}", chunk.address, e);
                assembly.take();
                drop(assembly);
                self.correlator.fail(RequestKind::MemoryRead, e.into());
            }
        }
    }

    /// Forget any read in progress
    pub fn reset(&self) {
        self.assembly.lock().take();
    }

    pub fn read_in_progress(&self) -> bool {
        self.assembly.lock().is_some()
    }
}
