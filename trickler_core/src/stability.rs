//! Two-cluster stability filter.
//!
//! The balance reports discrete values, so "stable" means: the same value has
//! been seen continuously for longer than the window. Two clusters are
//! tracked so that a single flicker to a neighbouring value does not restart
//! the clock on the value that was already holding.

use trickler_traits::Clock;

use crate::error::ScaleError;
use crate::scale::InstantWeight;

#[derive(Debug, Clone, Copy)]
struct Cluster {
    value: f32,
    since_ms: u64,
}

impl Cluster {
    fn held_longer_than(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.since_ms) > window_ms
    }
}

/// Pure sample-by-sample core of [`stable_weight`].
#[derive(Debug, Clone)]
pub struct StabilityFilter {
    confirmed: Cluster,
    candidate: Cluster,
    window_ms: u64,
}

impl StabilityFilter {
    /// Seed both clusters with the first sample.
    pub fn new(first: f32, at_ms: u64, window_ms: u64) -> Self {
        let seed = Cluster {
            value: first,
            since_ms: at_ms,
        };
        Self {
            confirmed: seed,
            candidate: seed,
            window_ms,
        }
    }

    /// Feed one sample; returns the settled value once either cluster has
    /// held strictly longer than the window.
    pub fn observe(&mut self, sample: f32, at_ms: u64) -> Option<f32> {
        if sample == self.confirmed.value {
            self.confirmed
                .held_longer_than(at_ms, self.window_ms)
                .then_some(self.confirmed.value)
        } else if sample == self.candidate.value {
            self.candidate
                .held_longer_than(at_ms, self.window_ms)
                .then_some(self.candidate.value)
        } else {
            self.confirmed = self.candidate;
            self.candidate = Cluster {
                value: sample,
                since_ms: at_ms,
            };
            None
        }
    }
}

/// Read `source` until a value has been stable for longer than `window_ms`.
///
/// Any read error ends the wait immediately and is returned as-is.
pub fn stable_weight<W>(source: &mut W, clock: &dyn Clock, window_ms: u64) -> Result<f32, ScaleError>
where
    W: InstantWeight + ?Sized,
{
    let epoch = clock.now();
    let first = source.read_instant()?;
    let mut filter = StabilityFilter::new(first, clock.ms_since(epoch), window_ms);
    loop {
        let sample = source.read_instant()?;
        if let Some(settled) = filter.observe(sample, clock.ms_since(epoch)) {
            tracing::trace!(weight = settled, window_ms, "stable");
            return Ok(settled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trickler_traits::ManualClock;

    /// Replays a fixed sequence, one sample every `period_ms`, then repeats the last.
    struct Replay {
        clock: ManualClock,
        samples: Vec<Result<f32, ScaleError>>,
        next: usize,
        period_ms: u64,
    }

    impl InstantWeight for Replay {
        fn read_instant(&mut self) -> Result<f32, ScaleError> {
            self.clock.sleep_ms(self.period_ms);
            let i = self.next.min(self.samples.len() - 1);
            self.next += 1;
            self.samples[i].clone()
        }
    }

    fn replay(samples: Vec<Result<f32, ScaleError>>) -> (Replay, ManualClock) {
        let clock = ManualClock::new();
        (
            Replay {
                clock: clock.clone(),
                samples,
                next: 0,
                period_ms: 100,
            },
            clock,
        )
    }

    #[test]
    fn flicker_does_not_reset_the_holding_value() {
        let mut f = StabilityFilter::new(10.0, 0, 250);
        assert_eq!(f.observe(10.02, 100), None);
        assert_eq!(f.observe(10.0, 200), None);
        assert_eq!(f.observe(10.0, 250), None, "window comparison is strict");
        assert_eq!(f.observe(10.0, 251), Some(10.0));
    }

    #[test]
    fn third_value_shifts_clusters() {
        let mut f = StabilityFilter::new(1.0, 0, 100);
        f.observe(2.0, 10);
        f.observe(3.0, 20);
        assert_eq!(f.observe(1.0, 500), None);
        // 1.0 was dropped, so its clock restarted at 500
        assert_eq!(f.observe(1.0, 550), None);
        assert_eq!(f.observe(1.0, 601), Some(1.0));
    }

    #[test]
    fn returns_first_value_held_past_window() {
        let (mut src, clock) = replay(vec![Ok(5.0), Ok(5.5), Ok(6.0), Ok(6.0), Ok(6.0), Ok(6.0)]);
        let w = stable_weight(&mut src, &clock, 250).unwrap();
        assert_eq!(w, 6.0);
        assert_eq!(clock.elapsed_ms(), 600);
    }

    #[test]
    fn error_short_circuits() {
        let (mut src, _) = replay(vec![Ok(5.0), Ok(5.0), Err(ScaleError::Timeout), Ok(5.0)]);
        assert_eq!(stable_weight(&mut src, &ManualClock::new(), 10_000), Err(ScaleError::Timeout));
        assert_eq!(src.next, 3);
    }

    #[test]
    fn error_on_first_read_short_circuits() {
        let (mut src, clock) = replay(vec![Err(ScaleError::Format)]);
        assert_eq!(stable_weight(&mut src, &clock, 50), Err(ScaleError::Format));
    }

    proptest! {
        #[test]
        fn same_samples_same_answer(
            raw in proptest::collection::vec(0u8..4, 1..40),
            window in 0u64..400,
        ) {
            let samples: Vec<_> = raw.iter().map(|&v| Ok(f32::from(v) * 0.02)).collect();
            let (mut a, ca) = replay(samples.clone());
            let (mut b, cb) = replay(samples);
            let wa = stable_weight(&mut a, &ca, window).unwrap();
            let wb = stable_weight(&mut b, &cb, window).unwrap();
            prop_assert_eq!(wa, wb);
            prop_assert_eq!(ca.elapsed_ms(), cb.elapsed_ms());
            // The settled value always appeared in the input.
            prop_assert!(raw.iter().any(|&v| f32::from(v) * 0.02 == wa));
        }
    }
}
