//! Dual-Process Salience Decay
//!
//! Salience blends a fast short-term exponential with a slow long-term one.
//! Access count shifts weight toward the long-term component, so memories
//! that are used repeatedly resist decay. The result never drops below the
//! configured floor.

use chrono::{DateTime, Utc};
use std::f64::consts::LN_2;

use crate::config::DecayConfig;
use crate::types::{MemoryRecord, Sector};
use crate::utils::days_between;

/// Computes time-decayed salience
#[derive(Debug, Clone)]
pub struct DecayEngine {
    config: DecayConfig,
}

impl Default for DecayEngine {
    fn default() -> Self {
        Self::new(DecayConfig::default())
    }
}

impl DecayEngine {
    pub fn new(config: DecayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Salience of a record at `now`, in `[floor, 1]`
    pub fn salience(&self, record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        let elapsed = days_between(record.last_accessed_at, now);
        self.salience_at(elapsed, record.access_count, record.sector)
    }

    /// Salience after `elapsed_days` without access
    pub fn salience_at(&self, elapsed_days: f64, access_count: u32, sector: Sector) -> f64 {
        let rate = self.config.sector_rates.rate(sector);
        let retention = self.retention(elapsed_days * rate, access_count);
        let floor = self.config.floor;
        (floor + (1.0 - floor) * retention).clamp(floor, 1.0)
    }

    /// Unfloored retention in `[0, 1]` shared with waypoint weights
    pub fn retention_raw(&self, elapsed_days: f64, reinforcement: u32) -> f64 {
        self.retention(elapsed_days, reinforcement)
    }

    /// Share of the long-term component for a given access count
    pub fn long_term_weight(&self, access_count: u32) -> f64 {
        1.0 - (-self.config.entrenchment_rate * access_count as f64).exp()
    }

    fn retention(&self, elapsed_days: f64, reinforcement: u32) -> f64 {
        let t = elapsed_days.max(0.0);
        let short = (-LN_2 * t / self.config.short_half_life_days).exp();
        let long = (-LN_2 * t / self.config.long_half_life_days).exp();
        let w = self.long_term_weight(reinforcement);
        ((1.0 - w) * short + w * long).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(access_count: u32, sector: Sector) -> MemoryRecord {
        let mut r = MemoryRecord::new("m1", "u1", "content", sector, Utc::now());
        r.access_count = access_count;
        r
    }

    #[test]
    fn test_fresh_record_is_fully_salient() {
        let engine = DecayEngine::default();
        let r = record(0, Sector::Semantic);
        assert!((engine.salience(&r, r.last_accessed_at) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_non_increasing() {
        let engine = DecayEngine::default();
        for access_count in [0, 1, 3, 10, 50] {
            for sector in Sector::ALL {
                let mut previous = f64::INFINITY;
                for step in 0..400 {
                    let s = engine.salience_at(step as f64 * 0.5, access_count, sector);
                    assert!(s <= previous, "salience rose at step {step}");
                    assert!((0.0..=1.0).contains(&s));
                    previous = s;
                }
            }
        }
    }

    #[test]
    fn test_zero_access_is_pure_short_term() {
        let engine = DecayEngine::default();
        assert_eq!(engine.long_term_weight(0), 0.0);

        // one short half-life at neutral rate: retention 0.5
        let r = engine.retention_raw(1.0, 0);
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_access_entrenches() {
        let engine = DecayEngine::default();
        let rarely = engine.salience_at(30.0, 1, Sector::Semantic);
        let often = engine.salience_at(30.0, 20, Sector::Semantic);
        assert!(often > rarely);
    }

    #[test]
    fn test_access_jumps_salience_upward() {
        let engine = DecayEngine::default();
        let mut r = record(2, Sector::Episodic);
        let later = r.last_accessed_at + Duration::days(10);
        let before = engine.salience(&r, later);

        r.last_accessed_at = later;
        r.access_count += 1;
        let after = engine.salience(&r, later);
        assert!(after > before);
        assert!((after - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_saturates_to_floor() {
        let engine = DecayEngine::default();
        let s = engine.salience_at(100_000.0, 100, Sector::Procedural);
        assert!(s > 0.0);
        assert!((s - engine.config().floor).abs() < 1e-9);
    }

    #[test]
    fn test_unaccessed_note_is_archivable_after_sixty_days() {
        let engine = DecayEngine::default();
        let r = record(0, Sector::Semantic);
        let s = engine.salience(&r, r.last_accessed_at + Duration::days(61));
        assert!(s <= 0.2);
    }

    #[test]
    fn test_sector_rates_change_speed() {
        let engine = DecayEngine::default();
        let episodic = engine.salience_at(2.0, 0, Sector::Episodic);
        let procedural = engine.salience_at(2.0, 0, Sector::Procedural);
        assert!(procedural > episodic);
    }
}
