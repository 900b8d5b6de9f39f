//! Six-voice round-robin/LRU allocator assigning OPL melodic voices to MIDI note-on events.
//!
//! A voice's `in_use` flag is set the first time it is struck and is never cleared by a
//! note-off: releasing a note mutes it but keeps its `(channel, program, key)` identity live, so
//! a same-note re-hit on the same channel and program is always caught by the exact-match tier
//! before any reallocation is considered. This mirrors the way `oscen`'s voice allocator keeps a
//! released voice "active" through its release phase until something else reclaims it.

use crate::voice::{MelodicVoice, NUM_MELODIC_VOICES};

/// Outcome of a note-on allocation search. The caller (the driver) performs the actual register
/// writes and voice-state bookkeeping appropriate to each case; the allocator only decides which
/// voice and what shape of work is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Exact `(channel, program, key)` match, already sounding: mute then re-strike.
    Restrike(usize),
    /// A voice already carrying the right program — busy or released (muted by a prior note-off
    /// but not yet reclaimed) — strike without reprogramming.
    StrikeIdle(usize),
    /// Idle voice carrying the wrong program: reprogram, then strike.
    ReprogramIdle(usize),
    /// Busy voice already carrying the right program: mute, then strike without reprogramming.
    StealSameProgram(usize),
    /// No idle or same-program voice available: steal whichever voice was touched longest ago.
    StealLru(usize),
}

impl Assignment {
    pub fn voice(self) -> usize {
        match self {
            Assignment::Restrike(v)
            | Assignment::StrikeIdle(v)
            | Assignment::ReprogramIdle(v)
            | Assignment::StealSameProgram(v)
            | Assignment::StealLru(v) => v,
        }
    }

    /// Whether the voice's operators must be (re)programmed before striking.
    pub fn needs_reprogram(self) -> bool {
        matches!(self, Assignment::ReprogramIdle(_) | Assignment::StealLru(_))
    }

    /// Whether a currently-sounding voice must be muted before the new note strikes. Reprogram
    /// cases mute as part of their own sequence, so this is only set for the non-reprogram
    /// steal/restrike cases.
    pub fn needs_mute(self) -> bool {
        matches!(self, Assignment::Restrike(_) | Assignment::StealSameProgram(_))
    }
}

/// Owns the six melodic voice slots and the round-robin cursor used to break ties between
/// otherwise-equal candidates.
#[derive(Debug)]
pub struct VoiceAllocator {
    pub voices: [MelodicVoice; NUM_MELODIC_VOICES],
    cursor: usize,
}

impl VoiceAllocator {
    pub fn new() -> Self {
        VoiceAllocator { voices: [MelodicVoice::vacant(); NUM_MELODIC_VOICES], cursor: 0 }
    }

    pub fn reset(&mut self) {
        self.voices = [MelodicVoice::vacant(); NUM_MELODIC_VOICES];
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Runs the four-tier search plus LRU fallback for a melodic note-on.
    pub fn assign(&mut self, channel: u8, program: u8, key: u8) -> Assignment {
        if let Some(v) = self.find_exact(channel, program, key) {
            return Assignment::Restrike(v);
        }

        let start = self.cursor;

        for _ in 0..NUM_MELODIC_VOICES {
            self.cursor = (self.cursor + 1) % NUM_MELODIC_VOICES;
            let v = &self.voices[self.cursor];
            if v.in_use && v.program == program as i16 {
                return Assignment::StrikeIdle(self.cursor);
            }
        }

        for _ in 0..NUM_MELODIC_VOICES {
            self.cursor = (self.cursor + 1) % NUM_MELODIC_VOICES;
            if !self.voices[self.cursor].in_use {
                return Assignment::ReprogramIdle(self.cursor);
            }
        }

        self.cursor = start;
        for _ in 0..NUM_MELODIC_VOICES {
            self.cursor = (self.cursor + 1) % NUM_MELODIC_VOICES;
            if self.voices[self.cursor].program == program as i16 {
                return Assignment::StealSameProgram(self.cursor);
            }
        }

        let lru = self
            .voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.timestamp)
            .map(|(i, _)| i)
            .expect("voice pool is never empty");
        self.cursor = lru;
        Assignment::StealLru(lru)
    }

    fn find_exact(&self, channel: u8, program: u8, key: u8) -> Option<usize> {
        self.voices.iter().position(|v| {
            v.in_use && v.channel == channel as i16 && v.program == program as i16 && v.key == key as i16
        })
    }

    /// Every voice currently sounding `key` on `channel`, for note-off handling.
    pub fn find_sounding(&self, channel: u8, key: u8) -> impl Iterator<Item = usize> + '_ {
        self.voices
            .iter()
            .enumerate()
            .filter_map(move |(i, v)| (v.in_use && v.channel == channel as i16 && v.key == key as i16).then_some(i))
    }
}

impl Default for VoiceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strike(pool: &mut VoiceAllocator, voice: usize, channel: u8, program: u8, key: u8, timestamp: i64) {
        pool.voices[voice] = MelodicVoice {
            key: key as i16,
            program: program as i16,
            channel: channel as i16,
            timestamp,
            fnumber: 0,
            octave: 4,
            in_use: true,
        };
    }

    #[test]
    fn first_six_notes_fill_idle_voices_in_round_robin_order() {
        let mut pool = VoiceAllocator::new();
        for i in 0..NUM_MELODIC_VOICES {
            let assignment = pool.assign(0, 0, i as u8);
            assert_eq!(assignment.voice(), i);
            assert!(assignment.needs_reprogram());
            strike(&mut pool, i, 0, 0, i as u8, i as i64);
        }
    }

    #[test]
    fn exact_rehit_reuses_the_same_voice() {
        let mut pool = VoiceAllocator::new();
        strike(&mut pool, 2, 0, 5, 60, 10);
        let assignment = pool.assign(0, 5, 60);
        assert_eq!(assignment, Assignment::Restrike(2));
        assert!(assignment.needs_mute());
        assert!(!assignment.needs_reprogram());
    }

    #[test]
    fn seventh_note_on_a_new_program_steals_the_least_recently_touched_voice() {
        let mut pool = VoiceAllocator::new();
        for i in 0..NUM_MELODIC_VOICES {
            strike(&mut pool, i, 0, 1, 40 + i as u8, i as i64 * 10);
        }
        let assignment = pool.assign(0, 2, 72);
        assert_eq!(assignment, Assignment::StealLru(0));
        assert!(assignment.needs_reprogram());
    }

    #[test]
    fn busy_voice_with_matching_program_is_reused_before_the_lru_steal() {
        let mut pool = VoiceAllocator::new();
        for i in 0..NUM_MELODIC_VOICES {
            strike(&mut pool, i, 0, i as u8, 40 + i as u8, (NUM_MELODIC_VOICES - i) as i64);
        }
        // every voice is in_use, so tier 2 (busy-same-program) finds voice 3 before the LRU tier
        // is ever considered; no mute, no reprogram.
        let assignment = pool.assign(1, 3, 90);
        assert_eq!(assignment, Assignment::StrikeIdle(3));
        assert!(!assignment.needs_reprogram());
        assert!(!assignment.needs_mute());
    }

    #[test]
    fn steal_same_program_assignment_mutes_without_reprogramming() {
        // StealSameProgram itself is exercised only through its Assignment methods here: every
        // assign() path that could reach it is already intercepted earlier by tier 2 (any in_use
        // voice with a matching program) or tier 3 (any idle voice), mirroring the reference
        // firmware's `ADLIB_turn_on_melodic`, whose "last attempt" fallback is equally unreachable.
        let assignment = Assignment::StealSameProgram(3);
        assert!(!assignment.needs_reprogram());
        assert!(assignment.needs_mute());
    }

    #[test]
    fn note_off_leaves_voice_in_use_for_exact_rehit() {
        let mut pool = VoiceAllocator::new();
        strike(&mut pool, 0, 3, 9, 64, 1);
        let sounding: Vec<_> = pool.find_sounding(3, 64).collect();
        assert_eq!(sounding, vec![0]);
        // note-off does not clear in_use; a later assign() for the same note still finds it.
        let assignment = pool.assign(3, 9, 64);
        assert_eq!(assignment, Assignment::Restrike(0));
    }

    #[test]
    fn busy_same_program_voice_is_struck_without_mute_or_reprogram() {
        let mut pool = VoiceAllocator::new();
        strike(&mut pool, 0, 0, 7, 1, 100);
        let assignment = pool.assign(0, 7, 2);
        assert_eq!(assignment, Assignment::StrikeIdle(0));
        assert!(!assignment.needs_mute());
        assert!(!assignment.needs_reprogram());
    }
}
