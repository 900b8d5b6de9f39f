//! The single funnel for OPL register writes. Every other component reaches the chip through
//! this one type, so the rhythm-mode mask shadow can never go stale.

/// Hardware (or test-double) write port: an OPL2 index/data pair.
///
/// Real OPL hardware has two such ports per chip (primary/secondary for OPL3's second voice
/// bank); rhythm mode only needs the primary, so `write` is the entire contract.
pub trait RegisterSink {
    fn write(&mut self, addr: u8, value: u8);
}

/// Records every write, for tests. Not used outside `#[cfg(test)]` and `tests/`.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub writes: Vec<(u8, u8)>,
}

impl RegisterSink for RecordingSink {
    fn write(&mut self, addr: u8, value: u8) {
        self.writes.push((addr, value));
    }
}

/// Register address of the rhythm-mode/AM-depth/percussion-key-on mask.
pub const PERCUSSION_MASK_REGISTER: u8 = 0xBD;
/// Bit 5 of the mask register; must stay set for as long as rhythm mode is active.
pub const RHYTHM_ENABLE_BIT: u8 = 0x20;
/// Default mask written on init/stop/all-notes-off: rhythm enabled, nothing else.
pub const DEFAULT_PERCUSSION_MASK: u8 = RHYTHM_ENABLE_BIT;

/// Wraps a [`RegisterSink`] and shadows the last value written to [`PERCUSSION_MASK_REGISTER`],
/// so nothing downstream can touch 0xBD without going through [`RegisterEmitter::set_mask`] (or
/// [`RegisterEmitter::set_mask_bits`]) first.
pub struct RegisterEmitter<R> {
    sink: R,
    percussion_mask: u8,
}

impl<R: RegisterSink> RegisterEmitter<R> {
    pub fn new(sink: R) -> Self {
        RegisterEmitter { sink, percussion_mask: DEFAULT_PERCUSSION_MASK }
    }

    /// Writes any non-mask register. Never use this for `0xBD` — it would desynchronize the
    /// shadow; use [`RegisterEmitter::set_mask`]/[`set_mask_bits`](Self::set_mask_bits) instead.
    pub fn write(&mut self, addr: u8, value: u8) {
        debug_assert_ne!(addr, PERCUSSION_MASK_REGISTER, "0xBD must go through set_mask");
        log::trace!(target: "opl_sequencer::emitter", "write {addr:#04x} <- {value:#04x}");
        self.sink.write(addr, value);
    }

    /// The mask currently latched on the hardware (or believed to be, per the shadow contract).
    pub fn mask(&self) -> u8 {
        self.percussion_mask
    }

    /// Unwraps the emitter back into its sink. Used by tests with a [`RecordingSink`] to inspect
    /// the writes that were made; not otherwise needed since the emitter owns the sink for the
    /// engine's whole lifetime.
    pub fn into_sink(self) -> R {
        self.sink
    }

    /// Borrows the sink without consuming the emitter, for tests that need to inspect writes
    /// between ticks.
    pub fn sink(&self) -> &R {
        &self.sink
    }

    /// Replaces the whole mask and writes it out unconditionally.
    pub fn set_mask(&mut self, mask: u8) {
        self.percussion_mask = mask;
        log::trace!(target: "opl_sequencer::emitter", "write 0xbd <- {mask:#04x}");
        self.sink.write(PERCUSSION_MASK_REGISTER, mask);
    }

    /// Sets (`value = true`) or clears (`value = false`) `bits` in the mask and writes it out.
    pub fn set_mask_bits(&mut self, bits: u8, value: bool) {
        let mask = if value { self.percussion_mask | bits } else { self.percussion_mask & !bits };
        self.set_mask(mask);
    }

    /// Performs the two-write OPL2 rhythm-mode bring-up sequence (`0x01 <- 0x80` then
    /// `0x01 <- 0x20`) and latches the default mask.
    pub fn init(&mut self) {
        self.write(0x01, 0x80);
        self.write(0x01, 0x20);
        self.set_mask(DEFAULT_PERCUSSION_MASK);
    }
}
