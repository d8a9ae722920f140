//! MCS (Modulation and Coding Scheme) domain tables and frame duration.
//!
//! The 802.11ax HE table for MCS 0-9: bits per subcarrier symbol and coding
//! rate are fixed constants, not formulas, matching the distilled spec's
//! instruction that PHY numerics are domain tables, not reverse-engineered.

use crate::runtime::SimDuration;

const SYMBOL_TIME_SECS: f64 = 12.8e-6 + 0.8e-6; // HE OFDM symbol + 0.8us GI

/// Fixed PHY preamble + legacy/HE signal-field overhead (L-STF, L-LTF,
/// L-SIG, RL-SIG, HE-SIG-A): independent of MCS, bandwidth, or channel
/// count, unlike the payload portion of `frame_duration`.
pub const PHY_PREAMBLE_SECS: f64 = 20e-6;

/// Coded bits per subcarrier symbol per 20 MHz channel, MCS 0-9.
const BITS_PER_SYMBOL_PER_20MHZ: [f64; 10] = [26.0, 52.0, 78.0, 104.0, 156.0, 208.0, 234.0, 260.0, 312.0, 346.6667];

/// Coding rate, MCS 0-9.
const CODING_RATE: [f64; 10] = [0.5, 0.5, 0.75, 0.5, 0.75, 0.667, 0.75, 0.833, 0.75, 0.833];

/// Minimum SINR (linear ratio) for reliable decode at each MCS.
const MIN_SINR: [f64; 10] = [1.0, 1.8, 3.2, 5.6, 10.0, 15.8, 19.9, 25.1, 31.6, 35.5];

pub fn bits_per_ofdm_symbol(mcs: u8, num_channels: u32) -> f64 {
    let mcs = (mcs as usize).min(BITS_PER_SYMBOL_PER_20MHZ.len() - 1);
    BITS_PER_SYMBOL_PER_20MHZ[mcs] * num_channels as f64
}

pub fn coding_rate(mcs: u8) -> f64 {
    CODING_RATE[(mcs as usize).min(CODING_RATE.len() - 1)]
}

pub fn min_sinr(mcs: u8) -> f64 {
    MIN_SINR[(mcs as usize).min(MIN_SINR.len() - 1)]
}

/// `duration = preamble + ceil(totalBits / (bitsPerSymbol * codingRate)) *
/// symbolTime + extensionSignal`.
pub fn frame_duration(preamble: SimDuration, header_bits: u32, payload_bits: u32, n_aggregated: u32, mcs: u8, num_channels: u32, extension_signal: SimDuration) -> SimDuration {
    let total_bits = header_bits as f64 + payload_bits as f64 * n_aggregated as f64;
    let per_symbol = bits_per_ofdm_symbol(mcs, num_channels) * coding_rate(mcs);
    let symbols = (total_bits / per_symbol).ceil().max(1.0);
    let payload_secs = symbols * SYMBOL_TIME_SECS;
    preamble + SimDuration::from_secs_f64(payload_secs) + extension_signal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_mcs_yields_shorter_duration_for_same_payload() {
        let preamble = SimDuration::from_micros(20);
        let ext = SimDuration::ZERO;
        let low = frame_duration(preamble, 100, 12_000, 1, 0, 1, ext);
        let high = frame_duration(preamble, 100, 12_000, 1, 7, 1, ext);
        assert!(high.as_nanos() < low.as_nanos());
    }

    #[test]
    fn wider_channel_shortens_duration() {
        let preamble = SimDuration::from_micros(20);
        let ext = SimDuration::ZERO;
        let one_ch = frame_duration(preamble, 100, 12_000, 1, 4, 1, ext);
        let four_ch = frame_duration(preamble, 100, 12_000, 1, 4, 4, ext);
        assert!(four_ch.as_nanos() < one_ch.as_nanos());
    }
}
