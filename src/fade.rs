//! Fixed-point fade-in/fade-out accumulators for the master volume.
//!
//! Volume is tracked in two units: the "coarse" 0..127 MIDI volume the rest of the engine reads
//! every tick, and a `<<8` "fine" accumulator used internally so the per-tick increment/decrement
//! can be smaller than one coarse unit without rounding to zero. `coarse(x) = x >> 8`,
//! `fine(x) = x << 8`, matching the reference firmware's `COARSE_VOL`/`FINE_VOL` macros.

/// One fade's direction and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    FadingIn { cur: u32, inc: u32, full: u8 },
    FadingOut { cur: u32, dec: u32 },
}

/// What happened to a fade on a given tick, as reported by [`Fader::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeEvent {
    /// Nothing completed this tick (including the common case of no fade running at all).
    None,
    /// A fade-in reached full volume this tick. The caller must return before processing any
    /// MIDI for the tick, matching `midi_driver`'s break on fade-in completion.
    FadeInComplete,
    /// A fade-out reached silence this tick. The caller must stop playback in response.
    FadeOutComplete,
}

/// Coarse-to-fine and back conversions, kept as free functions since both fade directions use
/// them identically.
fn coarse(fine: u32) -> u32 {
    fine >> 8
}

fn fine(coarse: u8) -> u32 {
    (coarse as u32) << 8
}

/// Owns the current master volume and any in-progress fade. `volume()` is what the rest of the
/// engine reads every tick to scale note-on velocity.
#[derive(Debug)]
pub struct Fader {
    volume: u8,
    stage: Stage,
}

impl Fader {
    pub fn new(initial_volume: u8) -> Self {
        Fader { volume: initial_volume, stage: Stage::Idle }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
    }

    pub fn is_fading_in(&self) -> bool {
        matches!(self.stage, Stage::FadingIn { .. })
    }

    pub fn is_fading_out(&self) -> bool {
        matches!(self.stage, Stage::FadingOut { .. })
    }

    /// Starts a fade-in to `self.volume`'s current value over `rate * division` ticks, unless one
    /// is already running. Mirrors `midi_resume`'s `fadein_volume_inc` computation.
    pub fn start_fade_in(&mut self, rate: u32, division: u16) {
        if self.is_fading_in() {
            return;
        }
        let full = self.volume;
        let denom = (rate * division as u32).max(1);
        let inc = fine(full) / denom;
        self.stage = Stage::FadingIn { cur: 0, inc, full };
    }

    /// Starts a fade-out from `self.volume`'s current value, unless one is already running.
    /// Mirrors `midi_fadeout_and_stop`'s `fadeout_volume_dec` computation.
    pub fn start_fade_out(&mut self, rate: u32, division: u16) {
        if self.is_fading_out() {
            return;
        }
        let full = self.volume;
        let denom = (rate * division as u32).max(1);
        let dec = fine(full) / denom;
        self.stage = Stage::FadingOut { cur: fine(full), dec };
    }

    pub fn cancel(&mut self) {
        self.stage = Stage::Idle;
    }

    /// Advances one tick. Reports whether a fade-in or fade-out just completed — see
    /// [`FadeEvent`]; a caller that ignores the distinction can still match on `!= FadeEvent::None`.
    pub fn advance(&mut self) -> FadeEvent {
        match self.stage {
            Stage::Idle => FadeEvent::None,
            Stage::FadingIn { cur, inc, full } => {
                let next = cur + inc;
                if coarse(next) < full as u32 {
                    self.stage = Stage::FadingIn { cur: next, inc, full };
                    self.volume = coarse(next) as u8;
                    FadeEvent::None
                } else {
                    self.stage = Stage::Idle;
                    self.volume = full;
                    FadeEvent::FadeInComplete
                }
            }
            Stage::FadingOut { cur, dec } => {
                if coarse(cur) == 0 {
                    self.stage = Stage::Idle;
                    return FadeEvent::FadeOutComplete;
                }
                let next = cur.saturating_sub(dec);
                self.volume = coarse(next) as u8;
                if coarse(next) == 0 {
                    self.stage = Stage::Idle;
                    FadeEvent::FadeOutComplete
                } else {
                    self.stage = Stage::FadingOut { cur: next, dec };
                    FadeEvent::None
                }
            }
        }
    }
}

impl Default for Fader {
    fn default() -> Self {
        Self::new(127)
    }
}
