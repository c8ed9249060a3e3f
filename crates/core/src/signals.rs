//! Cognitive signals as a small atomic state block.
//!
//! Frustration, confidence, urgency and curiosity are adaptive signals, not
//! traits: they are nudged by outcomes, decay toward baseline over time,
//! and behavior modulation is a pure function of the block.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
}

#[derive(Debug)]
pub struct CognitiveSignals {
    frustration: AtomicU32,
    confidence: AtomicU32,
    urgency: AtomicU32,
    curiosity: AtomicU32,
    /// Unix millis of the last decay pass.
    last_update_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningDepth {
    Quick,
    Adaptive,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyBias {
    Standard,
    Conservative,
}

/// Behavior modifiers derived from the current signal block.
#[derive(Debug, Clone, Copy)]
pub struct Modulation {
    pub verbosity: Verbosity,
    pub planning_depth: PlanningDepth,
    pub safety_bias: SafetyBias,
}

impl Modulation {
    pub fn describe(&self) -> String {
        format!(
            "Verbosity: {:?}, Planning: {:?}, Safety: {:?}",
            self.verbosity, self.planning_depth, self.safety_bias
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Frustration,
    Confidence,
    Urgency,
    Curiosity,
}

impl CognitiveSignals {
    pub fn new() -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let signals = Self {
            frustration: AtomicU32::new(0.0f32.to_bits()),
            confidence: AtomicU32::new(0.5f32.to_bits()),
            urgency: AtomicU32::new(0.0f32.to_bits()),
            curiosity: AtomicU32::new(0.3f32.to_bits()),
            last_update_ms: AtomicU64::new(now_ms),
        };
        signals
    }

    fn cell(&self, signal: Signal) -> &AtomicU32 {
        match signal {
            Signal::Frustration => &self.frustration,
            Signal::Confidence => &self.confidence,
            Signal::Urgency => &self.urgency,
            Signal::Curiosity => &self.curiosity,
        }
    }

    pub fn get(&self, signal: Signal) -> f32 {
        load_f32(self.cell(signal))
    }

    pub fn adjust(&self, signal: Signal, delta: f32) {
        let cell = self.cell(signal);
        store_f32(cell, load_f32(cell) + delta);
    }

    /// Natural return to baseline: 5% per minute, except confidence which is
    /// sticky and drifts toward 0.5 at a tenth of the rate.
    pub fn decay(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let last_ms = self.last_update_ms.swap(now_ms, Ordering::Relaxed);
        let elapsed_mins = (now_ms.saturating_sub(last_ms)) as f32 / 60_000.0;
        let rate = 0.05 * elapsed_mins;

        for signal in [Signal::Frustration, Signal::Urgency, Signal::Curiosity] {
            let cell = self.cell(signal);
            store_f32(cell, load_f32(cell) - rate);
        }
        let confidence = load_f32(&self.confidence);
        let drift = rate * 0.1;
        store_f32(
            &self.confidence,
            if confidence > 0.5 { confidence - drift } else { confidence + drift },
        );
    }

    /// Pure derivation of behavior modifiers from the block.
    pub fn modulation(&self) -> Modulation {
        let frustration = self.get(Signal::Frustration);
        let confidence = self.get(Signal::Confidence);
        let urgency = self.get(Signal::Urgency);

        Modulation {
            verbosity: if urgency > 0.7 {
                Verbosity::Minimal
            } else if frustration > 0.5 {
                Verbosity::Detailed
            } else {
                Verbosity::Standard
            },
            planning_depth: if frustration > 0.4 {
                PlanningDepth::Deep
            } else if confidence > 0.8 {
                PlanningDepth::Quick
            } else {
                PlanningDepth::Adaptive
            },
            safety_bias: if frustration > 0.6 {
                SafetyBias::Conservative
            } else {
                SafetyBias::Standard
            },
        }
    }
}

impl Default for CognitiveSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_clamps_to_unit_interval() {
        let signals = CognitiveSignals::new();
        signals.adjust(Signal::Frustration, 5.0);
        assert_eq!(signals.get(Signal::Frustration), 1.0);
        signals.adjust(Signal::Frustration, -5.0);
        assert_eq!(signals.get(Signal::Frustration), 0.0);
    }

    #[test]
    fn modulation_reflects_frustration() {
        let signals = CognitiveSignals::new();
        signals.adjust(Signal::Frustration, 0.7);
        let m = signals.modulation();
        assert_eq!(m.planning_depth, PlanningDepth::Deep);
        assert_eq!(m.safety_bias, SafetyBias::Conservative);
    }

    #[test]
    fn high_urgency_minimizes_verbosity() {
        let signals = CognitiveSignals::new();
        signals.adjust(Signal::Urgency, 0.8);
        assert_eq!(signals.modulation().verbosity, Verbosity::Minimal);
    }

    #[test]
    fn baseline_modulation_is_standard() {
        let signals = CognitiveSignals::new();
        let m = signals.modulation();
        assert_eq!(m.verbosity, Verbosity::Standard);
        assert_eq!(m.planning_depth, PlanningDepth::Adaptive);
        assert_eq!(m.safety_bias, SafetyBias::Standard);
    }
}
