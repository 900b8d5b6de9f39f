//! Top-level composition: one owned [`Engine`] value replacing the original firmware's
//! process-wide globals. Everything the host touches — loading a buffer, advancing playback one
//! tick at a time, and sending mailbox commands — goes through this one type.

use crate::allocator::VoiceAllocator;
use crate::driver::{self, PercussionDriver};
use crate::emitter::{RegisterEmitter, RegisterSink, DEFAULT_PERCUSSION_MASK};
use crate::error::EngineError;
use crate::fade::{FadeEvent, Fader};
use crate::interpreter::Interpreter;
use crate::level::{build_lin_volume_table, build_log_volume_table};
use crate::mailbox::{self, Command};

/// Playback state machine. Mirrors the reference firmware's `kStatusStopped/Playing/Paused`
/// ordering, since mailbox command 12 reports this as a raw `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

/// Tick-driven MIDI sequencer and rhythm-mode OPL2 FM-synthesis engine.
///
/// Not `Send`/`Sync`: every method takes `&mut self` and assumes single-threaded, run-to-completion
/// calls from one driving loop (a timer callback for [`Engine::tick`], an arbitrary call-site for
/// [`Engine::command`]) — see the concurrency model this crate implements.
pub struct Engine<R> {
    emitter: RegisterEmitter<R>,
    allocator: VoiceAllocator,
    percussion: PercussionDriver,
    interpreter: Interpreter,
    fader: Fader,
    log_volume: [u32; 129],
    lin_volume: [u32; 128],

    status: DriverStatus,
    installed: bool,
    timestamp: i64,
    loop_enabled: bool,
    fade_in_flag: bool,
    fade_out_flag: bool,
    fade_rate: u32,
}

impl<R: RegisterSink> Engine<R> {
    /// Brings up the OPL2 rhythm-mode bring-up sequence on `sink` and builds the volume tables.
    /// The engine starts `Stopped` but installed; call [`Engine::load`] then [`Engine::resume`]
    /// to begin playback.
    pub fn new(sink: R) -> Self {
        let mut emitter = RegisterEmitter::new(sink);
        emitter.init();

        Engine {
            emitter,
            allocator: VoiceAllocator::new(),
            percussion: PercussionDriver::new(),
            interpreter: Interpreter::new(),
            fader: Fader::new(127),
            log_volume: build_log_volume_table(),
            lin_volume: build_lin_volume_table(),
            status: DriverStatus::Stopped,
            installed: true,
            timestamp: 0,
            loop_enabled: false,
            fade_in_flag: false,
            fade_out_flag: false,
            fade_rate: 0,
        }
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    /// Unwraps the engine back into its register sink. Used by tests with a [`RecordingSink`]
    /// to inspect the writes a run produced.
    pub fn into_sink(self) -> R {
        self.emitter.into_sink()
    }

    /// Borrows the register sink without consuming the engine, for tests that need to inspect
    /// writes between ticks.
    pub fn sink(&self) -> &R {
        self.emitter.sink()
    }

    /// Ticks the hardware timer should fire at, `(tempo * division) / 60`. Informational only —
    /// installing/removing the actual periodic callback is the host's job (out of scope here).
    pub fn tick_rate_hz(&self) -> u32 {
        (self.interpreter.tempo as u32 * self.interpreter.division as u32) / 60
    }

    /// Loads a new event buffer. Does not start playback — call [`Engine::resume`] after.
    pub fn load(&mut self, data: &[u8]) -> Result<(), EngineError> {
        self.interpreter.load(data)
    }

    /// Advances playback by one tick: fade, timestamp, delta-decrement, and (when the delta
    /// reaches zero) dispatches every event sharing that tick until a non-zero delta is read.
    /// No-ops if the engine is uninstalled or not `Playing`. On the tick a fade-in completes,
    /// returns immediately after the fade without touching the timestamp or dispatching any
    /// MIDI for that tick, matching the reference firmware's break on fade-in completion.
    pub fn tick(&mut self) {
        if !self.installed || self.status != DriverStatus::Playing {
            return;
        }

        match self.fader.advance() {
            FadeEvent::FadeOutComplete => {
                log::debug!(target: "opl_sequencer::engine", "fade-out complete, stopping");
                self.stop();
                return;
            }
            FadeEvent::FadeInComplete => {
                log::debug!(target: "opl_sequencer::engine", "fade-in complete");
                return;
            }
            FadeEvent::None => {}
        }

        self.timestamp += 1;

        if self.interpreter.event_delta != 0 {
            self.interpreter.event_delta -= 1;
            return;
        }

        loop {
            let master_volume = self.fader.volume();
            let new_tempo = self.interpreter.process_event(
                &mut self.emitter,
                &mut self.allocator,
                &mut self.percussion,
                &self.log_volume,
                &self.lin_volume,
                master_volume,
                self.timestamp,
            );
            if let Some(bpm) = new_tempo {
                log::info!(target: "opl_sequencer::engine", "tempo changed to {bpm} bpm");
            }

            if self.interpreter.at_end() {
                if self.loop_enabled {
                    self.interpreter.rewind_to_loop_point();
                } else {
                    self.stop();
                    return;
                }
            }

            if self.interpreter.event_delta != 0 {
                break;
            }
        }
    }

    /// Resumes playback. From `Stopped`, re-parses the buffer header and resets voices, channels,
    /// percussion slots, and the percussion mask; from `Paused`, preserves position. Returns
    /// [`EngineError::NoBuffer`] if resuming from `Stopped` with nothing loaded, and does not
    /// change status in that case. No-op if uninstalled.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if !self.installed {
            return Ok(());
        }

        if self.status != DriverStatus::Paused {
            if !self.interpreter.has_buffer() {
                return Err(EngineError::NoBuffer);
            }
            self.allocator.reset();
            self.interpreter.reset_channels();
            self.percussion.reset();
            self.interpreter.parse_header();
            self.timestamp = 0;
            self.emitter.set_mask(DEFAULT_PERCUSSION_MASK);

            if self.fade_in_flag && !self.fader.is_fading_in() {
                self.fader.start_fade_in(self.fade_rate, self.interpreter.division);
            }
        }

        self.status = DriverStatus::Playing;
        log::info!(target: "opl_sequencer::engine", "resumed playback");
        Ok(())
    }

    /// Mutes everything and stops. No-op if uninstalled.
    pub fn stop(&mut self) {
        if !self.installed {
            return;
        }
        driver::all_notes_off(&mut self.emitter, &self.allocator.voices);
        self.fader.cancel();
        self.status = DriverStatus::Stopped;
        log::info!(target: "opl_sequencer::engine", "stopped");
    }

    /// Mutes everything and pauses, preserving stream position. No-op if uninstalled.
    pub fn pause(&mut self) {
        if !self.installed {
            return;
        }
        driver::all_notes_off(&mut self.emitter, &self.allocator.voices);
        self.status = DriverStatus::Paused;
        log::info!(target: "opl_sequencer::engine", "paused");
    }

    /// Starts a fade-out if one isn't already running and `fade_out_flag` is set; otherwise stops
    /// immediately. No-op if uninstalled or already `Stopped`.
    pub fn fadeout_and_stop(&mut self) {
        if !self.installed || self.status == DriverStatus::Stopped {
            return;
        }
        if self.fade_out_flag && !self.fader.is_fading_out() {
            self.fader.start_fade_out(self.fade_rate, self.interpreter.division);
        } else {
            self.stop();
        }
    }

    /// Processes one host mailbox command, returning the query result (0 for non-query commands).
    /// No-op (returns 0) if uninstalled.
    pub fn command(&mut self, code: u8, parameter: u16) -> u16 {
        if !self.installed {
            return 0;
        }

        match mailbox::decode(code, parameter) {
            Command::SetBufferAddressHigh | Command::SetBufferAddressLow => {
                self.stop();
                0
            }
            Command::SetBufferSize => 0,
            Command::Resume => {
                if let Err(e) = self.resume() {
                    log::debug!(target: "opl_sequencer::engine", "resume command ignored: {e}");
                }
                0
            }
            Command::FadeOutAndStop => {
                self.fadeout_and_stop();
                0
            }
            Command::Pause => {
                self.pause();
                0
            }
            Command::SetChannelVolume { channel, volume } => {
                self.interpreter.channels[channel as usize & 0x0F].volume = volume;
                0
            }
            Command::SetFadeInFlag(flag) => {
                self.fade_in_flag = flag;
                0
            }
            Command::SetFadeOutFlag(flag) => {
                self.fade_out_flag = flag;
                0
            }
            Command::SetMasterVolume(volume) => {
                self.fader.set_volume(volume);
                0
            }
            Command::TearDown => {
                driver::all_notes_off(&mut self.emitter, &self.allocator.voices);
                self.installed = false;
                log::info!(target: "opl_sequencer::engine", "torn down");
                0
            }
            Command::QueryStatus => self.status as u16,
            Command::SetFadeRate(rate) => {
                self.fade_rate = rate as u32;
                self.fader.cancel();
                0
            }
            Command::QueryMasterVolume => self.fader.volume() as u16,
            Command::QueryFadeInFlag => self.fade_in_flag as u16,
            Command::QueryFadeOutFlag => self.fade_out_flag as u16,
            Command::SetTempo(bpm) => {
                self.interpreter.tempo = bpm;
                0
            }
            Command::QueryTempo => self.interpreter.tempo as u16,
            Command::QueryFadeRate => self.fade_rate as u16,
            Command::SetLoopFlag(flag) => {
                self.loop_enabled = flag;
                0
            }
            Command::QueryLoopFlag => self.loop_enabled as u16,
            Command::QueryVersionMajor => mailbox::VERSION_MAJOR,
            Command::QueryVersionMinor => mailbox::VERSION_MINOR,
            Command::SetChannelProgram { channel, program } => {
                self.interpreter.channels[channel as usize & 0x0F].program = program;
                0
            }
            Command::QueryChannelProgram { channel } => self.interpreter.channels[channel as usize & 0x0F].program as u16,
            Command::Unknown => 0,
        }
    }
}
