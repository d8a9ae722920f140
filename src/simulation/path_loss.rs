//! Path-loss models: distance + transmit parameters to received power.
//!
//! Generalizes the teacher's single log-distance-with-shadowing model
//! (`signal_calculations.rs::calculate_path_loss`) to the named model
//! families. Shadowing, where a model samples it, always comes from the
//! caller-supplied RNG — never a fresh thread-local generator — so replay
//! with the same seed is exact.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::simulation::config::PathLossModelId;

/// Converts dBm to milliwatts.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

pub fn mw_to_pw(mw: f64) -> f64 {
    mw * 1e9
}

pub fn pw_to_mw(pw: f64) -> f64 {
    pw / 1e9
}

/// Parameters shared by the log-distance-family models (free space, indoor,
/// TGn variants, TMB): a reference-distance loss, a path-loss exponent, and
/// an optional shadowing sigma in dB.
#[derive(Debug, Clone, Copy)]
struct LogDistanceParams {
    reference_loss_db: f64,
    exponent: f64,
    shadowing_sigma_db: f64,
}

impl PathLossModelId {
    fn log_distance_params(self) -> LogDistanceParams {
        match self {
            PathLossModelId::FreeSpace => LogDistanceParams { reference_loss_db: 40.0, exponent: 2.0, shadowing_sigma_db: 0.0 },
            PathLossModelId::Indoor => LogDistanceParams { reference_loss_db: 46.0, exponent: 3.5, shadowing_sigma_db: 4.0 },
            PathLossModelId::TgnB => LogDistanceParams { reference_loss_db: 47.0, exponent: 3.3, shadowing_sigma_db: 3.0 },
            PathLossModelId::TgnD => LogDistanceParams { reference_loss_db: 46.0, exponent: 3.5, shadowing_sigma_db: 3.0 },
            PathLossModelId::TgnE => LogDistanceParams { reference_loss_db: 45.0, exponent: 3.5, shadowing_sigma_db: 3.0 },
            PathLossModelId::Tmb => LogDistanceParams { reference_loss_db: 42.0, exponent: 2.8, shadowing_sigma_db: 2.0 },
            PathLossModelId::OkumuraHata => unreachable!("Okumura-Hata computed directly, not via log-distance params"),
            PathLossModelId::Unknown => unreachable!("Scene::validate() rejects an unknown path-loss model before a run starts"),
        }
    }
}

/// Okumura-Hata for an urban macrocell, fixed 1.5 GHz-band constants.
fn okumura_hata_loss_db(distance_km: f64, central_frequency_ghz: f64) -> f64 {
    let f_mhz = (central_frequency_ghz * 1000.0).max(150.0);
    let h_b = 30.0; // base station height, m
    let h_m = 1.5; // mobile height, m
    let a_hm = (1.1 * f_mhz.log10() - 0.7) * h_m - (1.56 * f_mhz.log10() - 0.8);
    69.55 + 26.16 * f_mhz.log10() - 13.82 * h_b.log10() - a_hm + (44.9 - 6.55 * h_b.log10()) * distance_km.max(0.001).log10()
}

/// Resolve a transmit event into a received power in picowatts at the given
/// distance. `shadowing_rng` is consulted only by models with a nonzero
/// shadowing sigma.
pub fn received_power_pw(model: PathLossModelId, distance_m: f64, tx_power_pw: f64, tx_gain_db: f64, rx_gain_db: f64, central_frequency_ghz: f64, shadowing_rng: &mut StdRng) -> f64 {
    let d = distance_m.max(1.0);
    let tx_power_dbm = mw_to_dbm(pw_to_mw(tx_power_pw));

    let loss_db = match model {
        PathLossModelId::OkumuraHata => okumura_hata_loss_db(d / 1000.0, central_frequency_ghz),
        _ => {
            let p = model.log_distance_params();
            let deterministic = p.reference_loss_db + 10.0 * p.exponent * d.log10();
            let shadow = if p.shadowing_sigma_db > 0.0 {
                let normal = Normal::new(0.0, p.shadowing_sigma_db).expect("shadowing sigma must be finite and positive");
                normal.sample(shadowing_rng)
            } else {
                0.0
            };
            deterministic + shadow
        }
    };

    let received_dbm = tx_power_dbm + tx_gain_db + rx_gain_db - loss_db;
    mw_to_pw(dbm_to_mw(received_dbm)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn received_power_decreases_with_distance() {
        let mut rng = StdRng::seed_from_u64(1);
        let near = received_power_pw(PathLossModelId::FreeSpace, 10.0, mw_to_pw(100.0), 0.0, 0.0, 5.0, &mut rng);
        let far = received_power_pw(PathLossModelId::FreeSpace, 1000.0, mw_to_pw(100.0), 0.0, 0.0, 5.0, &mut rng);
        assert!(near > far);
    }

    #[test]
    fn same_seed_gives_same_shadowed_result() {
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = received_power_pw(PathLossModelId::Indoor, 50.0, mw_to_pw(20.0), 2.0, 2.0, 5.0, &mut rng_a);
        let b = received_power_pw(PathLossModelId::Indoor, 50.0, mw_to_pw(20.0), 2.0, 2.0, 5.0, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn dbm_mw_roundtrip() {
        for v in [-80.0, -30.0, 0.0, 20.0] {
            let mw = dbm_to_mw(v);
            assert!((mw_to_dbm(mw) - v).abs() < 1e-9);
        }
    }
}
