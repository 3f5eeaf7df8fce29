//! Per-charge bookkeeping shared between the dispense and evaluate states.

#[derive(Debug, Clone, PartialEq)]
pub struct DispenseSession {
    target: f32,
    dispense_weight: f32,
    start_ms: u64,
    end_ms: u64,
}

impl DispenseSession {
    /// Open a session; the end time starts equal to the start time so an
    /// aborted throw reports zero elapsed.
    pub fn begin(target: f32, now_ms: u64) -> Self {
        Self {
            target,
            dispense_weight: 0.0,
            start_ms: now_ms,
            end_ms: now_ms,
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Most recent stable pan weight taken during the throw.
    pub fn dispense_weight(&self) -> f32 {
        self.dispense_weight
    }

    /// Record a stable reading and return the remaining weight (target - reading).
    pub fn record(&mut self, weight: f32) -> f32 {
        self.dispense_weight = weight;
        self.remaining()
    }

    pub fn remaining(&self) -> f32 {
        self.target - self.dispense_weight
    }

    pub fn restart_clock(&mut self, now_ms: u64) {
        self.start_ms = now_ms;
        self.end_ms = now_ms;
    }

    pub fn mark_end(&mut self, now_ms: u64) {
        self.end_ms = now_ms;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}
