//! Channel bonding policies: given the primary channel, the allowed range,
//! and which channels are currently free, choose the contiguous transmit
//! range.
//!
//! Grounded operation-for-operation in the CB_* policy family: ONLY_PRIMARY,
//! STATIC (SCB), STATIC_LOG2 (SCB_LOG2), DYNAMIC (ALWAYS_MAX),
//! DYNAMIC_LOG2, PROB_UNIFORM_LOG2. The deprecated ALWAYS_MAX_LOG2_MCS
//! policy aborts rather than inventing behavior, matching the source it was
//! deprecated in.

use rand::rngs::StdRng;
use rand::Rng;

use crate::simulation::config::ChannelBondingModel;
use crate::simulation::notification::ChannelIdx;

/// Widest power-of-two-aligned block of `free[min..=max]` that contains
/// `primary` and is entirely free, searched from narrowest (just the
/// primary) to widest.
fn log2_aligned_blocks(min: u8, max: u8, primary: u8, free: &[bool]) -> Vec<(u8, u8)> {
    let mut blocks = Vec::new();
    let mut width: u32 = 1;
    loop {
        let block_start = (primary as u32 / width) * width;
        let block_end = block_start + width - 1;
        if block_start < min as u32 || block_end > max as u32 {
            break;
        }
        let all_free = (block_start..=block_end).all(|c| free[c as usize]);
        if !all_free {
            break;
        }
        blocks.push((block_start as u8, block_end as u8));
        if block_end - block_start + 1 >= (max - min + 1) as u32 {
            break;
        }
        width *= 2;
    }
    blocks
}

/// Returns `None` when the policy finds no legal transmit range (e.g.
/// ONLY_PRIMARY with the primary busy).
pub fn select_tx_channels(model: ChannelBondingModel, min: u8, max: u8, primary: u8, free: &[bool], rng: &mut StdRng) -> Option<(ChannelIdx, ChannelIdx)> {
    match model {
        ChannelBondingModel::OnlyPrimary => {
            if free[primary as usize] {
                Some((primary, primary))
            } else {
                None
            }
        }
        ChannelBondingModel::Static => {
            if (min..=max).all(|c| free[c as usize]) {
                Some((min, max))
            } else {
                None
            }
        }
        ChannelBondingModel::StaticLog2 => {
            let blocks = log2_aligned_blocks(min, max, primary, free);
            blocks.last().copied()
        }
        ChannelBondingModel::Dynamic => {
            if !free[primary as usize] {
                return None;
            }
            let mut lo = primary;
            while lo > min && free[(lo - 1) as usize] {
                lo -= 1;
            }
            let mut hi = primary;
            while hi < max && free[(hi + 1) as usize] {
                hi += 1;
            }
            Some((lo, hi))
        }
        ChannelBondingModel::DynamicLog2 => {
            let blocks = log2_aligned_blocks(min, max, primary, free);
            blocks.last().copied()
        }
        ChannelBondingModel::ProbUniformLog2 => {
            let blocks = log2_aligned_blocks(min, max, primary, free);
            if blocks.is_empty() {
                None
            } else {
                let idx = rng.gen_range(0..blocks.len());
                Some(blocks[idx])
            }
        }
        ChannelBondingModel::AlwaysMaxLog2Mcs => {
            panic!("channel bonding model ALWAYS_MAX_LOG2_MCS is deprecated and has no defined behavior");
        }
        ChannelBondingModel::Unknown => unreachable!("Scene::validate() rejects an unknown channel bonding model before a run starts"),
    }
}

/// 802.11ax-style CCA tiering: primary 20 MHz uses its own threshold,
/// secondary 20/40/80 MHz tiers use theirs; the candidate block widens only
/// while every channel in it clears its own tier's threshold.
pub fn select_tx_channels_11ax(min: u8, max: u8, primary: u8, power_dbm: &[f64], cca_primary_20: f64, cca_secondary_20: f64, cca_40: f64, cca_80: f64) -> (ChannelIdx, ChannelIdx) {
    if power_dbm[primary as usize] >= cca_primary_20 {
        return (primary, primary);
    }
    let tiers: [(u32, f64); 3] = [(2, cca_secondary_20), (4, cca_40), (8, cca_80)];
    let mut best = (primary, primary);
    for (width, threshold) in tiers {
        let block_start = (primary as u32 / width) * width;
        let block_end = block_start + width - 1;
        if block_start < min as u32 || block_end > max as u32 {
            break;
        }
        let clears = (block_start..=block_end).all(|c| power_dbm[c as usize] < threshold);
        if clears {
            best = (block_start as u8, block_end as u8);
        } else {
            break;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn dynamic_picks_maximal_contiguous_free_run_containing_primary() {
        let free = [true, true, true, false];
        let mut rng = StdRng::seed_from_u64(0);
        let range = select_tx_channels(ChannelBondingModel::Dynamic, 0, 3, 1, &free, &mut rng).unwrap();
        assert_eq!(range, (0, 2));
    }

    #[test]
    fn only_primary_aborts_transmission_when_busy() {
        let free = [false, true, true, true];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_tx_channels(ChannelBondingModel::OnlyPrimary, 0, 3, 0, &free, &mut rng).is_none());
    }

    #[test]
    fn static_requires_entire_allowed_range_free() {
        let free = [true, true, false, true];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_tx_channels(ChannelBondingModel::Static, 0, 3, 0, &free, &mut rng).is_none());
        let free_all = [true, true, true, true];
        assert_eq!(select_tx_channels(ChannelBondingModel::Static, 0, 3, 0, &free_all, &mut rng), Some((0, 3)));
    }

    #[test]
    #[should_panic(expected = "deprecated")]
    fn always_max_log2_mcs_aborts() {
        let free = [true, true, true, true];
        let mut rng = StdRng::seed_from_u64(0);
        select_tx_channels(ChannelBondingModel::AlwaysMaxLog2Mcs, 0, 3, 0, &free, &mut rng);
    }

    #[test]
    fn selected_range_always_contiguous_and_within_bounds() {
        let free = [true, true, true, true, false, true, true, true];
        let mut rng = StdRng::seed_from_u64(7);
        for model in [ChannelBondingModel::Dynamic, ChannelBondingModel::DynamicLog2, ChannelBondingModel::StaticLog2] {
            if let Some((lo, hi)) = select_tx_channels(model, 0, 7, 2, &free, &mut rng) {
                assert!(lo <= hi);
                assert!(lo >= 0 && hi <= 7);
            }
        }
    }
}
