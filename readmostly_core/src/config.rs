//! Tuning knobs for the lock. None of them affect correctness, only how long
//! waiters spin before parking and how often dead readers are reclaimed.

use crate::constants::*;
use crate::errors::Error;
use log::warn;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Failed attempts that yield the processor before a waiter parks.
    pub spin_threshold: u32,
    /// Length of a single timed park.
    pub park_interval: Duration,
    /// Minimum time between two dead-reader GC passes in `write_unlock`.
    pub gc_interval: Duration,
    /// When false, impatient readers never fail; they wait like everyone else.
    pub cancel_on_contention: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
            park_interval: DEFAULT_PARK_INTERVAL,
            gc_interval: DEFAULT_GC_INTERVAL,
            cancel_on_contention: true,
        }
    }
}

impl LockConfig {
    pub fn with_spin_threshold(mut self, spin_threshold: u32) -> Self {
        self.spin_threshold = spin_threshold;
        self
    }

    pub fn with_park_interval(mut self, park_interval: Duration) -> Self {
        self.park_interval = park_interval;
        self
    }

    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    pub fn with_cancel_on_contention(mut self, enabled: bool) -> Self {
        self.cancel_on_contention = enabled;
        self
    }

    /// Defaults overlaid with the `READMOSTLY_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `READMOSTLY_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_SPIN_THRESHOLD) {
            cfg.spin_threshold = parse_num(ENV_SPIN_THRESHOLD, &v)? as u32;
        }
        if let Some(v) = lookup(ENV_PARK_INTERVAL_US) {
            cfg.park_interval = Duration::from_micros(parse_num(ENV_PARK_INTERVAL_US, &v)?);
        }
        if let Some(v) = lookup(ENV_GC_INTERVAL_US) {
            cfg.gc_interval = Duration::from_micros(parse_num(ENV_GC_INTERVAL_US, &v)?);
        }
        if let Some(v) = lookup(ENV_CANCEL_ON_CONTENTION) {
            cfg.cancel_on_contention = match v.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => {
                    return Err(Error::from(format!(
                        "{ENV_CANCEL_ON_CONTENTION}: expected 0/1/true/false, got {other:?}"
                    )))
                }
            };
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.park_interval.is_zero() {
            return Err(Error::from("park_interval must be non-zero"));
        }
        if self.spin_threshold == 0 {
            warn!("spin_threshold is 0: every failed attempt parks immediately");
        }
        Ok(())
    }
}

fn parse_num(key: &str, raw: &str) -> Result<u64, Error> {
    let n = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::from(format!("{key}: {e}")))?;
    if key == ENV_SPIN_THRESHOLD && n > u32::MAX as u64 {
        return Err(Error::from(format!("{key}: {n} does not fit in u32")));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let cfg = LockConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, LockConfig::default());
        assert_eq!(cfg.spin_threshold, DEFAULT_SPIN_THRESHOLD);
        assert!(cfg.cancel_on_contention);
    }

    #[test]
    fn overrides_applied() {
        let cfg = LockConfig::from_lookup(lookup_from(&[
            (ENV_SPIN_THRESHOLD, "7"),
            (ENV_PARK_INTERVAL_US, "250"),
            (ENV_GC_INTERVAL_US, "5000"),
            (ENV_CANCEL_ON_CONTENTION, "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.spin_threshold, 7);
        assert_eq!(cfg.park_interval, Duration::from_micros(250));
        assert_eq!(cfg.gc_interval, Duration::from_millis(5));
        assert!(!cfg.cancel_on_contention);
    }

    #[test]
    fn malformed_values_rejected() {
        assert!(LockConfig::from_lookup(lookup_from(&[(ENV_SPIN_THRESHOLD, "lots")])).is_err());
        assert!(LockConfig::from_lookup(lookup_from(&[(ENV_CANCEL_ON_CONTENTION, "maybe")])).is_err());
        assert!(LockConfig::from_lookup(lookup_from(&[(ENV_PARK_INTERVAL_US, "0")])).is_err());
    }

    #[test]
    fn builder_setters() {
        let cfg = LockConfig::default()
            .with_spin_threshold(3)
            .with_park_interval(Duration::from_micros(100))
            .with_gc_interval(Duration::ZERO)
            .with_cancel_on_contention(false);
        assert_eq!(cfg.spin_threshold, 3);
        assert_eq!(cfg.gc_interval, Duration::ZERO);
        assert!(cfg.validate().is_ok());
    }
}
