//! ## opl_sequencer - a tick-driven MIDI sequencer and rhythm-mode FM synthesis engine
//! for an OPL2-compatible chip.

pub mod allocator;
pub mod driver;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod fade;
pub mod interpreter;
pub mod level;
pub mod mailbox;
pub mod tables;
pub mod voice;

pub use emitter::RegisterSink;
pub use engine::{DriverStatus, Engine};
pub use error::EngineError;
