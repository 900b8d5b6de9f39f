//! Programs OPL operators, strikes and mutes notes, and implements the rhythm-mode percussion
//! protocol (shared operators, mask-driven key-on) and pitch bend.
//!
//! Melodic voice state lives in [`crate::allocator::VoiceAllocator`]; this module only knows how
//! to turn `(voice index, program, note)` tuples into register writes. The one piece of state
//! this module does own is percussion-slot occupancy (`notes_per_percussion` in the reference
//! firmware), since which note is currently sounding a given percussion instrument is a driver
//! concern, not an allocator one — percussions don't get reassigned, they're fixed per slot.

use crate::emitter::RegisterEmitter;
use crate::emitter::RegisterSink;
use crate::level::{self};
use crate::tables::{
    Operator, PercussionNote, BASS_DRUM_OPERATOR1_OFFSET, BASS_DRUM_OPERATOR2_OFFSET, BASS_DRUM_VOICE,
    HIGHEST_PERCUSSION_NOTE, LEVEL_MASK, LOWEST_PERCUSSION_NOTE, MAXIMUM_LEVEL, MELODIC_FNUMBERS, MELODIC_PROGRAMS,
    OPERATOR1_OFFSET_FOR_MELODIC, OPERATOR2_OFFSET_FOR_MELODIC, OPERATOR_OFFSET_FOR_PERCUSSION, PERCUSSION_NOTES,
    SNARE_DRUM, TOM_TOM,
};
use crate::voice::{MelodicVoice, PercussionSlot, NUM_MELODIC_VOICES, NUM_PERCUSSIONS};

/// Re-centers a 14-bit MIDI pitch-bend value (`0..0x3FFF`, `0x2000` = no bend) to a signed offset.
pub const PITCH_BEND_CENTER: i32 = 0x2000;

/// Five writes that fully program an operator: characteristic, attack/decay, sustain/release,
/// level, waveform — in that order, matching the register layout the reference firmware writes.
pub fn program_operator<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, offset: u8, op: &Operator) {
    emitter.write(0x20 + offset, op.characteristic);
    emitter.write(0x60 + offset, op.attack_decay);
    emitter.write(0x80 + offset, op.sustain_release);
    emitter.write(0x40 + offset, op.levels);
    emitter.write(0xE0 + offset, op.waveform);
}

/// Three-write variant used when setting up a single-operator percussion: the level write is
/// masked to the low six bits (key-scale-level is not yet known; [`set_operator_level`] restores
/// it on the first strike).
pub fn program_operator_short<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, offset: u8, op: &Operator) {
    emitter.write(0x40 + offset, op.levels & LEVEL_MASK);
    emitter.write(0x60 + offset, op.attack_decay);
    emitter.write(0x80 + offset, op.sustain_release);
}

/// Combines velocity, channel volume and an operator's own attenuation into the 6-bit total
/// level, re-ORs the untouched key-scale-level bits back in, and writes register `0x40 + offset`.
pub fn set_operator_level<R: RegisterSink>(
    emitter: &mut RegisterEmitter<R>,
    log_volume: &[u32; 129],
    offset: u8,
    op: &Operator,
    velocity: u8,
    channel_volume: u8,
    full_volume: bool,
) {
    let program_level = level::operator_program_level(op, full_volume);
    let total_level = level::compose_level(log_volume, velocity, channel_volume, program_level);
    let scaling = op.levels & !LEVEL_MASK;
    emitter.write(0x40 + offset, scaling | total_level);
}

/// Writes a voice's pitch: `0xA0+voice <- fnumber low byte`, then
/// `0xB0+voice <- (key_on << 5) | (octave << 2) | (fnumber high 2 bits)`. This is the corrected
/// encoding (see DESIGN.md) — the reference firmware's `ADLIB_B0` macro mis-masks the key-on bit.
pub fn write_pitch<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, voice: usize, octave: u8, fnumber: u16, key_on: bool) {
    emitter.write(0xA0 + voice as u8, (fnumber & 0xFF) as u8);
    let b0 = ((key_on as u8) << 5) | ((octave & 7) << 2) | ((fnumber >> 8) & 3) as u8;
    emitter.write(0xB0 + voice as u8, b0);
}

/// Silences a melodic voice by restating its current pitch with key-on cleared. Does not touch
/// `in_use` — the voice stays allocator-visible until reassigned (see `allocator.rs`).
pub fn mute_melodic_voice<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, voice: &MelodicVoice, voice_index: usize) {
    write_pitch(emitter, voice_index, voice.octave, voice.fnumber, false);
}

/// Zeros both operators to full attenuation, mutes the voice at its prior pitch, then reprograms
/// both operators and the feedback/algorithm register for a new program.
pub fn program_melodic_voice<R: RegisterSink>(
    emitter: &mut RegisterEmitter<R>,
    voice: &MelodicVoice,
    voice_index: usize,
    program: u8,
) {
    let prg = &MELODIC_PROGRAMS[program as usize];
    let offset1 = OPERATOR1_OFFSET_FOR_MELODIC[voice_index];
    let offset2 = OPERATOR2_OFFSET_FOR_MELODIC[voice_index];

    emitter.write(0x40 + offset1, MAXIMUM_LEVEL);
    emitter.write(0x40 + offset2, MAXIMUM_LEVEL);
    mute_melodic_voice(emitter, voice, voice_index);

    program_operator(emitter, offset1, &prg.op[0]);
    program_operator(emitter, offset2, &prg.op[1]);
    emitter.write(0xC0 + voice_index as u8, prg.feedback_algo);
}

/// Strikes a melodic note on an already-programmed (or about-to-be-struck-as-is) voice: computes
/// octave/F-number from the MIDI key, sets operator levels from velocity/channel volume, writes
/// the pitch with key-on set, and returns the new voice state for the caller to store.
#[allow(clippy::too_many_arguments)]
pub fn strike_melodic_voice<R: RegisterSink>(
    emitter: &mut RegisterEmitter<R>,
    log_volume: &[u32; 129],
    voice_index: usize,
    channel: u8,
    program: u8,
    key: u8,
    velocity: u8,
    channel_volume: u8,
    timestamp: i64,
) -> MelodicVoice {
    let octave = (key / 12).min(7);
    let f_index = 12 + (key % 12) as usize;
    let fnumber = MELODIC_FNUMBERS[f_index];

    let prg = &MELODIC_PROGRAMS[program as usize];
    let offset1 = OPERATOR1_OFFSET_FOR_MELODIC[voice_index];
    let offset2 = OPERATOR2_OFFSET_FOR_MELODIC[voice_index];

    if prg.is_additive() {
        set_operator_level(emitter, log_volume, offset1, &prg.op[0], velocity, channel_volume, false);
        set_operator_level(emitter, log_volume, offset2, &prg.op[1], velocity, channel_volume, false);
    } else {
        set_operator_level(emitter, log_volume, offset2, &prg.op[1], velocity, channel_volume, true);
    }

    write_pitch(emitter, voice_index, octave, fnumber, true);

    MelodicVoice {
        key: key as i16,
        program: program as i16,
        channel: channel as i16,
        timestamp,
        fnumber,
        octave,
        in_use: true,
    }
}

/// Key-offs every melodic voice and restores the default percussion mask. Used by controller 123
/// (all notes off) and by `stop`/`pause`.
pub fn all_notes_off<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, voices: &[MelodicVoice; NUM_MELODIC_VOICES]) {
    for (i, voice) in voices.iter().enumerate() {
        mute_melodic_voice(emitter, voice, i);
    }
    emitter.set_mask(crate::emitter::DEFAULT_PERCUSSION_MASK);
}

/// Sets bit 7 of the percussion mask (AM depth 4.8dB) when `value >= 64`, clears it (1dB)
/// otherwise. Controller 1 (modulation) affects all voices globally, not just one channel.
pub fn modulation<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, value: u8) {
    emitter.set_mask_bits(0x80, value >= 64);
}

/// Rewrites the pitch of every in-use voice on `channel` using a 14-bit bend value re-centered at
/// [`PITCH_BEND_CENTER`]. The bend interpolates toward the F-number two semitones up or down
/// (read from the headroom either side of [`crate::tables::MELODIC_FNUMBERS`]'s home octave) and
/// never key-offs — the note keeps sounding through the retune.
pub fn pitch_bend<R: RegisterSink>(
    emitter: &mut RegisterEmitter<R>,
    voices: &mut [MelodicVoice; NUM_MELODIC_VOICES],
    channel: u8,
    bend14: u16,
    timestamp: i64,
) {
    let amount = bend14 as i32 - PITCH_BEND_CENTER;

    for (i, voice) in voices.iter_mut().enumerate() {
        if !voice.in_use || voice.channel != channel as i16 {
            continue;
        }
        let f_index = 12 + (voice.key as u8 % 12) as usize;
        let base = MELODIC_FNUMBERS[f_index] as i32;
        let bend_delta = if amount > 0 {
            amount * (MELODIC_FNUMBERS[f_index + 2] as i32 - base) / PITCH_BEND_CENTER
        } else {
            amount * (base - MELODIC_FNUMBERS[f_index - 2] as i32) / PITCH_BEND_CENTER
        };
        let new_fnumber = (base + bend_delta) as u16;

        write_pitch(emitter, i, voice.octave, new_fnumber, true);
        voice.fnumber = new_fnumber;
        voice.timestamp = timestamp;
    }
}

/// Percussion-slot occupancy and the rhythm-mode setup/play/off protocol. Owns nothing the
/// allocator or interpreter need; it is purely "which note is sounding each of the five
/// instruments right now".
#[derive(Debug)]
pub struct PercussionDriver {
    slots: [PercussionSlot; NUM_PERCUSSIONS],
}

impl PercussionDriver {
    pub fn new() -> Self {
        PercussionDriver { slots: [PercussionSlot::vacant(); NUM_PERCUSSIONS] }
    }

    pub fn reset(&mut self) {
        self.slots = [PercussionSlot::vacant(); NUM_PERCUSSIONS];
    }

    pub fn slots(&self) -> &[PercussionSlot; NUM_PERCUSSIONS] {
        &self.slots
    }

    fn lookup(note: u8) -> Option<&'static PercussionNote> {
        if !(LOWEST_PERCUSSION_NOTE..=HIGHEST_PERCUSSION_NOTE).contains(&note) {
            return None;
        }
        PERCUSSION_NOTES.get((note - LOWEST_PERCUSSION_NOTE) as usize)
    }

    /// Note-on (velocity > 0) on the percussion channel. Drops the event silently (per §7) if the
    /// note is out of range or its table entry is marked invalid. Reprograms the slot's operators
    /// only when the incoming note differs from whatever is currently occupying it.
    pub fn note_on<R: RegisterSink>(
        &mut self,
        emitter: &mut RegisterEmitter<R>,
        log_volume: &[u32; 129],
        note: u8,
        velocity: u8,
        channel_volume: u8,
    ) {
        let Some(entry) = Self::lookup(note) else {
            log::debug!(target: "opl_sequencer::driver", "percussion note {note} out of range 35..=81, dropped");
            return;
        };
        if !entry.valid {
            log::debug!(target: "opl_sequencer::driver", "percussion note {note} has no valid table entry, dropped");
            return;
        }

        let slot = &mut self.slots[entry.percussion as usize];
        if slot.note != Some(note) {
            Self::setup(emitter, entry);
            slot.note = Some(note);
        }
        Self::play(emitter, log_volume, entry, velocity, channel_volume);
    }

    /// Note-off on the percussion channel: clears the slot's key-on bit only. Slot occupancy is
    /// left alone, matching the reference firmware — a later note-on of the same note does not
    /// need to re-setup the operators.
    pub fn note_off<R: RegisterSink>(&mut self, emitter: &mut RegisterEmitter<R>, note: u8) {
        let Some(entry) = Self::lookup(note) else {
            log::debug!(target: "opl_sequencer::driver", "percussion note-off {note} out of range, dropped");
            return;
        };
        emitter.set_mask_bits(1 << entry.percussion, false);
    }

    fn setup<R: RegisterSink>(emitter: &mut RegisterEmitter<R>, entry: &PercussionNote) {
        if entry.percussion < 4 {
            emitter.set_mask_bits(1 << entry.percussion, false);
            let offset = OPERATOR_OFFSET_FOR_PERCUSSION[entry.percussion as usize];
            program_operator_short(emitter, offset, &entry.op[0]);
        } else {
            emitter.set_mask_bits(0x10, false);
            program_operator(emitter, BASS_DRUM_OPERATOR1_OFFSET, &entry.op[0]);
            program_operator(emitter, BASS_DRUM_OPERATOR2_OFFSET, &entry.op[1]);
            emitter.write(0xC0 + BASS_DRUM_VOICE as u8, entry.feedback_algo);
        }
    }

    fn play<R: RegisterSink>(
        emitter: &mut RegisterEmitter<R>,
        log_volume: &[u32; 129],
        entry: &PercussionNote,
        velocity: u8,
        channel_volume: u8,
    ) {
        if entry.percussion < 4 {
            emitter.set_mask_bits(1 << entry.percussion, false);
            let offset = OPERATOR_OFFSET_FOR_PERCUSSION[entry.percussion as usize];
            set_operator_level(emitter, log_volume, offset, &entry.op[0], velocity, channel_volume, true);

            if entry.percussion == TOM_TOM {
                write_pitch(emitter, 8, entry.octave, entry.fnumber, false);
            } else if entry.percussion == SNARE_DRUM {
                write_pitch(emitter, 7, entry.octave, entry.fnumber, false);
            }

            emitter.set_mask_bits(1 << entry.percussion, true);
        } else {
            emitter.set_mask_bits(0x10, false);

            if entry.is_additive() {
                set_operator_level(emitter, log_volume, BASS_DRUM_OPERATOR1_OFFSET, &entry.op[0], velocity, channel_volume, true);
                set_operator_level(emitter, log_volume, BASS_DRUM_OPERATOR2_OFFSET, &entry.op[1], velocity, channel_volume, true);
            } else {
                set_operator_level(emitter, log_volume, BASS_DRUM_OPERATOR2_OFFSET, &entry.op[1], velocity, channel_volume, true);
            }

            write_pitch(emitter, BASS_DRUM_VOICE, entry.octave, entry.fnumber, false);
            emitter.set_mask_bits(0x10, true);
        }
    }
}

impl Default for PercussionDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::RecordingSink;
    use crate::level::build_log_volume_table;

    fn emitter() -> RegisterEmitter<RecordingSink> {
        RegisterEmitter::new(RecordingSink::default())
    }

    #[test]
    fn write_pitch_uses_the_corrected_b0_encoding() {
        let mut e = emitter();
        write_pitch(&mut e, 0, 4, 0x1ab, true);
        let writes = &e.into_sink().writes;
        assert_eq!(writes[0], (0xA0, 0xab));
        // key_on=1 -> bit5 (0x20); octave 4 -> bits 4..2 = 0b10000 = 0x10; fnumber high bits = 1
        assert_eq!(writes[1], (0xB0, 0x20 | 0x10 | 0x01));
    }

    #[test]
    fn strike_melodic_voice_programs_additive_algorithm_on_both_operators() {
        let mut e = emitter();
        let log_volume = build_log_volume_table();
        let program = MELODIC_PROGRAMS.iter().position(|p| p.is_additive()).expect("fixture has an additive program");
        let voice = strike_melodic_voice(&mut e, &log_volume, 0, 0, program as u8, 60, 100, 127, 5);
        assert!(voice.in_use);
        assert_eq!(voice.key, 60);
        assert_eq!(voice.channel, 0);
        assert_eq!(voice.timestamp, 5);
    }

    #[test]
    fn percussion_note_out_of_range_is_dropped_without_writes() {
        let mut e = emitter();
        let log_volume = build_log_volume_table();
        let mut pd = PercussionDriver::new();
        pd.note_on(&mut e, &log_volume, 10, 100, 127);
        assert!(e.into_sink().writes.is_empty());
    }

    #[test]
    fn percussion_bass_drum_toggles_mask_bit_four_around_the_strike() {
        let mut e = emitter();
        let log_volume = build_log_volume_table();
        let mut pd = PercussionDriver::new();
        pd.note_on(&mut e, &log_volume, LOWEST_PERCUSSION_NOTE, 80, 127);
        let writes = e.into_sink().writes;
        let mask_writes: Vec<_> = writes.iter().filter(|(addr, _)| *addr == 0xBD).map(|(_, v)| *v).collect();
        assert_eq!(mask_writes.len(), 2);
        assert_eq!(mask_writes[0] & 0x10, 0);
        assert_eq!(mask_writes[1] & 0x10, 0x10);
    }

    #[test]
    fn all_notes_off_mutes_every_voice_and_resets_mask() {
        let mut e = emitter();
        let mut voices = [MelodicVoice::vacant(); NUM_MELODIC_VOICES];
        voices[0].in_use = true;
        voices[0].fnumber = 0x100;
        voices[0].octave = 3;
        all_notes_off(&mut e, &voices);
        assert_eq!(e.mask(), crate::emitter::DEFAULT_PERCUSSION_MASK);
    }

    #[test]
    fn pitch_bend_at_center_restates_the_same_fnumber() {
        let mut e = emitter();
        let mut voices = [MelodicVoice::vacant(); NUM_MELODIC_VOICES];
        voices[0] = MelodicVoice { key: 60, program: 0, channel: 0, timestamp: 1, fnumber: MELODIC_FNUMBERS[12], octave: 5, in_use: true };
        pitch_bend(&mut e, &mut voices, 0, 0x2000, 9);
        assert_eq!(voices[0].fnumber, MELODIC_FNUMBERS[12]);
        assert_eq!(voices[0].timestamp, 9);
    }
}
