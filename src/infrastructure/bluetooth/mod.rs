//! Bluetooth Module
//!
//! Talks the Wii Remote report protocol over an L2CAP-style channel
//! supplied by the host application.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Wiimote                           │
//! │   (handshake, mutators, lifecycle - public API)          │
//! └───────┬──────────────┬──────────────┬───────────────────┘
//!         │              │              │
//!         ▼              ▼              ▼
//! ┌─────────────┐ ┌────────────┐ ┌────────────┐
//! │ ReceiveLoop │ │  Memory    │ │  Speaker   │
//! │             │ │  Transfer  │ │  Stream    │
//! │ - decode    │ │ - read     │ │ - init     │
//! │ - state     │ │ - write    │ │ - play     │
//! └──────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!        │              │              │
//!        ▼              ▼              ▼
//! ┌────────────┐ ┌──────────────────────────────┐
//! │ Correlator │ │ FrameWriter -> Transport     │
//! └────────────┘ └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Report ids, frame encoding and report decoding
//! - [`transport`] - Transport and discovery traits, serialized frame writer
//! - [`correlator`] - Matches status/memory replies to waiting callers
//! - [`memory`] - Chunked memory reads and writes
//! - [`speaker`] - Speaker initialisation and paced audio streaming
//! - [`connection`] - Shared state and the receive loop
//! - [`service`] - Main connection handle

pub mod connection;
pub mod correlator;
pub mod memory;
pub mod protocol;
pub mod service;
pub mod speaker;
pub mod transport;

// Re-export main service for convenience
pub use service::Wiimote;
