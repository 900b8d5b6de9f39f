//! Error types for the narrow set of conditions that are caller mistakes rather than malformed
//! data inside an already-loaded MIDI stream (see the crate-level docs for that distinction).

use thiserror::Error;

/// Failure modes surfaced to the host. Nothing in [`crate::Engine::tick`] or
/// [`crate::Engine::command`] returns this type — those run on a timer/interrupt boundary and
/// silently do nothing on bad input, per the engine's "never block" contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The buffer handed to [`crate::Engine::load`] is shorter than a 7-byte header (4-byte
    /// signature, 1 tempo byte, 2 division bytes) plus a first event record's delta and status.
    #[error("buffer too short: need at least 10 bytes for a header and first event, got {0}")]
    BufferTooShort(usize),

    /// [`crate::Engine::resume`] was called with nothing loaded.
    #[error("no buffer loaded")]
    NoBuffer,
}
