//! State owned by the interpreter (per-channel settings) and the allocator/driver (melodic
//! voice and percussion slot occupancy).

/// Sixteen logical MIDI channels; channel 9 (zero-based) is the percussion channel and never
/// consults `program`/`volume` the way melodic channels do.
pub const NUM_MIDI_CHANNELS: usize = 16;
/// Six two-operator FM voices available in OPL2 rhythm mode.
pub const NUM_MELODIC_VOICES: usize = 6;
/// Five percussion instruments (hi-hat, cymbal, tom, snare, bass drum).
pub const NUM_PERCUSSIONS: usize = 5;
/// Zero-based MIDI channel reserved for percussion.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Per-channel MIDI state: current instrument, volume, and sustain-pedal position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiChannel {
    pub program: u8,
    pub volume: u8,
    pub pedal: bool,
}

impl MidiChannel {
    pub const fn new() -> Self {
        MidiChannel { program: 0, volume: 127, pedal: false }
    }
}

impl Default for MidiChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the six hardware melodic voices. `-1` sentinels on `key`/`program`/`channel` mean
/// "never assigned"; once a voice is struck, `in_use` latches `true` and is never cleared by a
/// note-off — only a reallocation overwrites these fields (see `allocator.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MelodicVoice {
    pub key: i16,
    pub program: i16,
    pub channel: i16,
    pub timestamp: i64,
    pub fnumber: u16,
    pub octave: u8,
    pub in_use: bool,
}

impl MelodicVoice {
    pub const fn vacant() -> Self {
        MelodicVoice { key: -1, program: -1, channel: -1, timestamp: 0, fnumber: 0, octave: 0, in_use: false }
    }
}

impl Default for MelodicVoice {
    fn default() -> Self {
        Self::vacant()
    }
}

/// Occupancy of one of the five rhythm-mode percussion instruments: the MIDI note currently
/// sounding it, if any. Unlike a melodic voice, a percussion slot has no separate `in_use` flag
/// — `None` and "idle" are the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PercussionSlot {
    pub note: Option<u8>,
}

impl PercussionSlot {
    pub const fn vacant() -> Self {
        PercussionSlot { note: None }
    }
}
