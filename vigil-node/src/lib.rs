//! Vigil engine node library.
//!
//! Server-side license integrity and threat response: the license
//! registry and its state machine, the heartbeat protocol, tamper
//! assessment and forensics, the per-IP reputation ledger, encrypted
//! state snapshots, and typed broadcast fan-out.

pub mod api;
pub mod authorizer;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod reputation;
pub mod secret;
pub mod snapshot;
pub mod tamper;

pub use config::VigilConfig;
pub use engine::Engine;
pub use error::{Result, VigilError};
