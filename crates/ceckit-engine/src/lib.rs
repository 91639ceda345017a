//! CEC command dispatch engine.
//!
//! A single worker task owns the adapter connection (lifecycle, device
//! resolution, script supervision) and executes commands from two queues:
//! the main queue, and an exec queue that is live only while a shell script
//! runs. Producers enqueue from anywhere; synchronous callers wait on
//! per-command completion serials.

pub mod command;
pub mod config;
pub mod engine;
pub mod exec;
pub mod keymap;
pub mod lifecycle;
pub mod queue;
pub mod resolver;

// Re-exports
pub use command::{CecCommand, Device, Serial, SerialCounter, SERIAL_MAX};

pub use config::{BusCommandHandler, EngineConfig};

pub use engine::{CecEngine, EngineError, EngineStatus};

pub use keymap::{HostKey, IdentityKeymap, KeyTranslator};

pub use lifecycle::{BusSnapshot, DeviceEntry};
