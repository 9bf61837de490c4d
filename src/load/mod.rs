//! Wallet load pipeline
//!
//! [`LoadOrchestrator`] sequences a load from one of three sources (wallet
//! file, password check, hardware device) into a loaded wallet record,
//! publishing [`LoadPhase`] transitions along the way.

pub mod orchestrator;
pub mod session;

pub use orchestrator::LoadOrchestrator;
pub use session::{LoadPhase, LoadSession, LoadSource, LoadedWallet};
