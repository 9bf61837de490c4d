//! Hardware wallet device handling
//!
//! # Architecture
//!
//! ```text
//! DeviceTransport (hwi subprocess) → HardwareDeviceManager → LoadOrchestrator
//! ```
//!
//! Descriptors are snapshots: valid only until the next setup/unlock, after
//! which the caller must re-enumerate. The manager enforces the per-device
//! readiness checks and the configured time boxes; the transport stays dumb.

pub mod hwi;
pub mod manager;
pub mod transport;
pub mod types;

pub use hwi::HwiTransport;
pub use manager::HardwareDeviceManager;
pub use transport::{DeviceTransport, PinPrompt};
pub use types::{DeviceDescriptor, DeviceModel, DevicePath, DeviceReadiness};
