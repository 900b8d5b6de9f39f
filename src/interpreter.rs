//! Running-status MIDI byte-stream reader and channel-event dispatch.
//!
//! Owns the loaded buffer, the read cursor, and the sixteen per-channel settings mutated by
//! program-change/volume/pedal controllers. Does not own voices, percussion slots, or the
//! register emitter — those are passed in by the caller (`engine.rs`) so this module stays a pure
//! "bytes in, hardware-agnostic event out" transform, in the same spirit as the trait-seam
//! pattern used for [`crate::emitter::RegisterSink`].

use crate::driver;
use crate::emitter::RegisterEmitter;
use crate::emitter::RegisterSink;
use crate::allocator::VoiceAllocator;
use crate::driver::PercussionDriver;
use crate::error::EngineError;
use crate::voice::{MidiChannel, NUM_MIDI_CHANNELS, PERCUSSION_CHANNEL};

/// Smallest buffer `load` will accept: 4-byte signature, 1 tempo byte, 2 division bytes, then at
/// least a 2-byte delta and a 1-byte status to have a first event to read.
pub const MIN_BUFFER_LEN: usize = 10;

/// Meta-event type byte for a tempo change.
const META_TEMPO: u8 = 0x51;

#[derive(Debug)]
pub struct Interpreter {
    buffer: Vec<u8>,
    pos: usize,
    pub event_delta: u16,
    pub event_type: u8,
    last_event_type: u8,
    pub tempo: u8,
    pub division: u16,
    pub channels: [MidiChannel; NUM_MIDI_CHANNELS],
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            buffer: Vec::new(),
            pos: 0,
            event_delta: 0,
            event_type: 0,
            last_event_type: 0,
            tempo: 120,
            division: 192,
            channels: [MidiChannel::new(); NUM_MIDI_CHANNELS],
        }
    }

    /// Copies in a new event buffer. Rejects anything too short to hold a header and a first
    /// event record; does not parse it yet (call [`Interpreter::parse_header`] to do that, on
    /// the resume-from-stopped path).
    pub fn load(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if data.len() < MIN_BUFFER_LEN {
            return Err(EngineError::BufferTooShort(data.len()));
        }
        self.buffer = data.to_vec();
        Ok(())
    }

    pub fn reset_channels(&mut self) {
        self.channels = [MidiChannel::new(); NUM_MIDI_CHANNELS];
    }

    /// Whether a buffer has been supplied via [`Interpreter::load`] yet.
    pub fn has_buffer(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Reads the header (skips the 4-byte signature, then tempo byte and division word) and
    /// primes `event_delta`/`event_type` with the first record. Division is clamped to 192 if the
    /// stream claims anything above 255 PPQN — a division that large is treated as corrupt.
    pub fn parse_header(&mut self) {
        self.pos = 4;
        self.tempo = self.read_byte();
        self.division = self.read_word();
        if self.division > 255 {
            self.division = 192;
        }
        self.last_event_type = 0;
        self.event_delta = self.read_word();
        self.event_type = self.read_byte();
    }

    /// Rewinds to offset 7 (past signature, tempo byte, and division word) and re-primes the
    /// first event record, for `loop = true` end-of-buffer handling.
    pub fn rewind_to_loop_point(&mut self) {
        self.pos = 7;
        self.event_delta = self.read_word();
        self.event_type = self.read_byte();
    }

    fn read_byte(&mut self) -> u8 {
        match self.buffer.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                b
            }
            None => {
                log::debug!(target: "opl_sequencer::interpreter", "read past end of buffer (len {}) at {}", self.buffer.len(), self.pos);
                0
            }
        }
    }

    fn read_word(&mut self) -> u16 {
        let lo = self.read_byte() as u16;
        let hi = self.read_byte() as u16;
        (hi << 8) | lo
    }

    /// Whether the stream cursor has run past the loaded buffer.
    pub fn at_end(&self) -> bool {
        self.pos >= self.buffer.len()
    }

    /// Processes exactly one event record (meta or channel) at the current `event_type`, then
    /// reads the following delta/status into `event_delta`/`event_type` for the caller's next
    /// tick. Returns the new tempo in BPM if the event was a tempo meta-event.
    #[allow(clippy::too_many_arguments)]
    pub fn process_event<R: RegisterSink>(
        &mut self,
        emitter: &mut RegisterEmitter<R>,
        allocator: &mut VoiceAllocator,
        percussion: &mut PercussionDriver,
        log_volume: &[u32; 129],
        lin_volume: &[u32; 128],
        master_volume: u8,
        timestamp: i64,
    ) -> Option<u8> {
        if self.event_type == 0xFF {
            let new_tempo = self.process_meta_event();
            self.event_delta = self.read_word();
            self.event_type = self.read_byte();
            return new_tempo;
        }

        if self.event_type & 0x80 == 0 {
            // running status: this byte was actually the first data byte of an event carrying
            // the same status as the previous one. Put it back and reuse last_event_type.
            self.pos = self.pos.saturating_sub(1);
            self.event_type = self.last_event_type;
        }

        self.process_channel_event(emitter, allocator, percussion, log_volume, lin_volume, master_volume, timestamp);
        self.last_event_type = self.event_type;
        self.event_delta = self.read_word();
        self.event_type = self.read_byte();
        None
    }

    fn process_meta_event(&mut self) -> Option<u8> {
        let meta_type = self.read_byte();
        let length = self.read_byte();

        if meta_type == META_TEMPO {
            let v0 = self.read_byte() as u32;
            let v1 = self.read_byte() as u32;
            let v2 = self.read_byte() as u32;
            let microseconds_per_quarter = (v0 << 16) | (v1 << 8) | v2;
            if microseconds_per_quarter == 0 {
                return None;
            }
            let bpm = (60_000_000 / microseconds_per_quarter).min(255) as u8;
            self.tempo = bpm;
            Some(bpm)
        } else {
            for _ in 0..length {
                self.read_byte();
            }
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_channel_event<R: RegisterSink>(
        &mut self,
        emitter: &mut RegisterEmitter<R>,
        allocator: &mut VoiceAllocator,
        percussion: &mut PercussionDriver,
        log_volume: &[u32; 129],
        lin_volume: &[u32; 128],
        master_volume: u8,
        timestamp: i64,
    ) {
        let channel = self.event_type & 0x0F;
        let kind = self.event_type >> 4;

        match kind {
            0x9 => {
                let key = self.read_byte();
                let velocity = self.read_byte();
                if velocity == 0 {
                    self.note_off(emitter, allocator, percussion, channel, key);
                } else {
                    self.note_on(emitter, allocator, percussion, log_volume, lin_volume, master_volume, channel, key, velocity, timestamp);
                }
            }
            0x8 => {
                let key = self.read_byte();
                let _velocity = self.read_byte();
                self.note_off(emitter, allocator, percussion, channel, key);
            }
            0xC => {
                let program = self.read_byte();
                self.channels[channel as usize].program = program;
            }
            0xD => {
                self.read_byte();
            }
            0xA => {
                self.read_byte();
                self.read_byte();
            }
            0xE => {
                let lsb = self.read_byte() & 0x7F;
                let msb = self.read_byte() & 0x7F;
                let bend14 = ((msb as u16) << 7) | lsb as u16;
                driver::pitch_bend(emitter, &mut allocator.voices, channel, bend14, timestamp);
            }
            0xB => {
                let controller = self.read_byte();
                let value = self.read_byte();
                match controller {
                    1 => driver::modulation(emitter, value),
                    7 => self.channels[channel as usize].volume = value,
                    4 => self.channels[channel as usize].pedal = value >= 64,
                    123 => driver::all_notes_off(emitter, &allocator.voices),
                    _ => {
                        log::trace!(target: "opl_sequencer::interpreter", "unhandled controller {controller} = {value}");
                    }
                }
            }
            _ => {
                log::debug!(target: "opl_sequencer::interpreter", "unhandled event type {kind:#x}");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn note_on<R: RegisterSink>(
        &mut self,
        emitter: &mut RegisterEmitter<R>,
        allocator: &mut VoiceAllocator,
        percussion: &mut PercussionDriver,
        log_volume: &[u32; 129],
        lin_volume: &[u32; 128],
        master_volume: u8,
        channel: u8,
        key: u8,
        velocity: u8,
        timestamp: i64,
    ) {
        let channel_volume = self.channels[channel as usize].volume;
        let scaled_velocity = ((lin_volume[master_volume as usize] * velocity as u32) >> 8).min(127) as u8;

        if channel == PERCUSSION_CHANNEL {
            percussion.note_on(emitter, log_volume, key, scaled_velocity, channel_volume);
            return;
        }

        let program = self.channels[channel as usize].program;
        let assignment = allocator.assign(channel, program, key);
        let voice_index = assignment.voice();

        if assignment.needs_mute() {
            driver::mute_melodic_voice(emitter, &allocator.voices[voice_index], voice_index);
        }
        if assignment.needs_reprogram() {
            driver::program_melodic_voice(emitter, &allocator.voices[voice_index], voice_index, program);
        }

        let voice = driver::strike_melodic_voice(emitter, log_volume, voice_index, channel, program, key, scaled_velocity, channel_volume, timestamp);
        allocator.voices[voice_index] = voice;
    }

    fn note_off<R: RegisterSink>(
        &mut self,
        emitter: &mut RegisterEmitter<R>,
        allocator: &mut VoiceAllocator,
        percussion: &mut PercussionDriver,
        channel: u8,
        key: u8,
    ) {
        if channel == PERCUSSION_CHANNEL {
            percussion.note_off(emitter, key);
            return;
        }

        if self.channels[channel as usize].pedal {
            return;
        }

        let sounding: arrayvec::ArrayVec<usize, 6> = allocator.find_sounding(channel, key).collect();
        for i in sounding {
            driver::mute_melodic_voice(emitter, &allocator.voices[i], i);
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::RecordingSink;
    use crate::level::{build_lin_volume_table, build_log_volume_table};

    fn fixture_buffer() -> Vec<u8> {
        let mut buf = vec![b'M', b'T', b'h', b'd', 120, 192, 0];
        buf.extend_from_slice(&[0, 0]); // event_delta = 0
        buf.push(0x90); // note-on channel 0
        buf.push(60); // key
        buf.push(100); // velocity
        buf.extend_from_slice(&[4, 0]); // next delta
        buf.push(0x80);
        buf.push(60);
        buf.push(0);
        buf
    }

    #[test]
    fn load_rejects_too_short_buffer() {
        let mut it = Interpreter::new();
        assert!(matches!(it.load(&[0u8; 3]), Err(EngineError::BufferTooShort(3))));
    }

    #[test]
    fn parse_header_reads_tempo_and_clamped_division() {
        let mut it = Interpreter::new();
        let mut buf = fixture_buffer();
        buf[5] = 0x00;
        buf[6] = 0x02; // division = 0x0200 = 512, little-endian -> clamps to 192
        it.load(&buf).unwrap();
        it.parse_header();
        assert_eq!(it.tempo, 120);
        assert_eq!(it.division, 192);
        assert_eq!(it.event_delta, 0);
        assert_eq!(it.event_type, 0x90);
    }

    #[test]
    fn note_on_then_note_off_round_trips_through_the_allocator() {
        let mut it = Interpreter::new();
        it.load(&fixture_buffer()).unwrap();
        it.parse_header();

        let mut emitter = RegisterEmitter::new(RecordingSink::default());
        let mut allocator = VoiceAllocator::new();
        let mut percussion = PercussionDriver::new();
        let log_volume = build_log_volume_table();
        let lin_volume = build_lin_volume_table();

        it.process_event(&mut emitter, &mut allocator, &mut percussion, &log_volume, &lin_volume, 127, 0);
        assert!(allocator.voices[0].in_use);
        assert_eq!(allocator.voices[0].key, 60);

        it.process_event(&mut emitter, &mut allocator, &mut percussion, &log_volume, &lin_volume, 127, 1);
        // note-off mutes but does not clear in_use
        assert!(allocator.voices[0].in_use);
    }

    #[test]
    fn held_pedal_suppresses_note_off() {
        let mut it = Interpreter::new();
        it.load(&fixture_buffer()).unwrap();
        it.parse_header();
        it.channels[0].pedal = true;

        let mut emitter = RegisterEmitter::new(RecordingSink::default());
        let mut allocator = VoiceAllocator::new();
        let mut percussion = PercussionDriver::new();
        let log_volume = build_log_volume_table();
        let lin_volume = build_lin_volume_table();

        it.process_event(&mut emitter, &mut allocator, &mut percussion, &log_volume, &lin_volume, 127, 0);
        let before = allocator.voices[0];
        it.process_event(&mut emitter, &mut allocator, &mut percussion, &log_volume, &lin_volume, 127, 1);
        assert_eq!(allocator.voices[0], before);
    }

    #[test]
    fn tempo_meta_event_is_parsed_and_reported() {
        let mut it = Interpreter::new();
        // signature(4) tempo(1) division(2) delta(2)=0 type=0xFF meta_type=0x51 length=3 + 3 tempo bytes + next delta/type
        let mut buf = vec![b'M', b'T', b'h', b'd', 120, 192, 0, 0, 0, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0, 0, 0x80];
        buf.push(0);
        buf.push(0);
        it.load(&buf).unwrap();
        it.parse_header();
        assert_eq!(it.event_type, 0xFF);

        let mut emitter = RegisterEmitter::new(RecordingSink::default());
        let mut allocator = VoiceAllocator::new();
        let mut percussion = PercussionDriver::new();
        let log_volume = build_log_volume_table();
        let lin_volume = build_lin_volume_table();

        let new_tempo = it.process_event(&mut emitter, &mut allocator, &mut percussion, &log_volume, &lin_volume, 127, 0);
        assert!(new_tempo.is_some());
    }
}
