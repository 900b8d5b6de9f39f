//! Logarithmic/linear volume composition: velocity, channel volume and a program's attenuation
//! collapse into the six-bit value the hardware's `0x40`-series level registers expect.

use crate::tables::{Operator, MAXIMUM_LEVEL};

/// 129-entry logarithmic volume table: `log_volume[i] = round(256 * ln(i+1) / ln(128))`.
/// Built once at engine construction and reused for every level composition.
pub fn build_log_volume_table() -> [u32; 129] {
    let mut table = [0u32; 129];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = (256.0_f64 * ((i as f64 + 1.0).ln() / 128.0_f64.ln())).round() as u32;
    }
    table
}

/// 128-entry linear table mapping a 0..127 master volume into a 0..128 driver-scale volume,
/// used to scale note-on velocity by the current master volume before level composition.
pub fn build_lin_volume_table() -> [u32; 128] {
    let k = 128.0_f64 / 127.0_f64;
    let mut table = [0u32; 128];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = (k * i as f64).round() as u32;
    }
    table
}

/// The program-level input to [`compose_level`] for an operator, given whether the caller wants
/// the operator's own attenuation applied (`full_volume = false`) or ignored (`true`, used for
/// percussions and additive-algorithm carriers).
pub fn operator_program_level(op: &Operator, full_volume: bool) -> u8 {
    if full_volume {
        MAXIMUM_LEVEL
    } else {
        MAXIMUM_LEVEL - op.total_level()
    }
}

/// Combines note velocity, channel volume and a program's attenuation into a six-bit level,
/// saturating at 0 rather than wrapping if the scaled product exceeds it (it shouldn't, given
/// the shipped tables, but nothing here assumes the tables are well-behaved).
pub fn compose_level(log_volume: &[u32; 129], velocity: u8, channel_volume: u8, program_level: u8) -> u8 {
    let note_level = log_volume[velocity as usize] as u64;
    let channel_level = log_volume[channel_volume as usize] as u64;
    let scaled = ((note_level * channel_level * program_level as u64) >> 16) as u32;
    MAXIMUM_LEVEL.saturating_sub(scaled.min(MAXIMUM_LEVEL as u32) as u8)
}
