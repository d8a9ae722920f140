//! Traffic generation feeding each node's per-direction send buffer.
//!
//! Modeled as a small piece of per-node state rather than a standalone
//! component/port pair: the generator only ever affects its owning node's
//! own buffer, so it needs no port binding of its own. `FullBuffer` never
//! empties; `Poisson` draws inter-arrival gaps from the exponential
//! distribution using the runtime's shared RNG, so arrivals replay
//! identically for a given seed.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};

use crate::runtime::SimDuration;
use crate::simulation::config::TrafficModel;

pub struct TrafficGenerator {
    model: TrafficModel,
    pending: u64,
}

impl TrafficGenerator {
    pub fn new(model: TrafficModel) -> Self {
        TrafficGenerator { model, pending: 0 }
    }

    pub fn has_pending(&self) -> bool {
        match self.model {
            TrafficModel::FullBuffer => true,
            TrafficModel::Poisson { .. } => self.pending > 0,
        }
    }

    /// Called when a packet is dequeued for transmission.
    pub fn take_one(&mut self) {
        if let TrafficModel::Poisson { .. } = self.model {
            self.pending = self.pending.saturating_sub(1);
        }
    }

    /// Next inter-arrival gap for a `Poisson` model; `None` for `FullBuffer`
    /// (which never needs to schedule an arrival).
    pub fn next_arrival_gap(&self, rng: &mut StdRng) -> Option<SimDuration> {
        match self.model {
            TrafficModel::FullBuffer => None,
            TrafficModel::Poisson { rate } => {
                let exp = Exp::new(rate).expect("poisson rate must be positive");
                Some(SimDuration::from_secs_f64(exp.sample(rng)))
            }
        }
    }

    pub fn on_arrival(&mut self) {
        if let TrafficModel::Poisson { .. } = self.model {
            self.pending += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn full_buffer_always_has_pending_work() {
        let gen = TrafficGenerator::new(TrafficModel::FullBuffer);
        assert!(gen.has_pending());
    }

    #[test]
    fn poisson_starts_empty_and_fills_on_arrival() {
        let mut gen = TrafficGenerator::new(TrafficModel::Poisson { rate: 10.0 });
        assert!(!gen.has_pending());
        gen.on_arrival();
        assert!(gen.has_pending());
        gen.take_one();
        assert!(!gen.has_pending());
    }

    #[test]
    fn poisson_gap_is_deterministic_given_seed() {
        let gen = TrafficGenerator::new(TrafficModel::Poisson { rate: 5.0 });
        let mut rng_a = StdRng::seed_from_u64(3);
        let mut rng_b = StdRng::seed_from_u64(3);
        assert_eq!(gen.next_arrival_gap(&mut rng_a), gen.next_arrival_gap(&mut rng_b));
    }
}
