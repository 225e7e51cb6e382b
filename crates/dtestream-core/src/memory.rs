//! Host memory headroom checks used to stop decoding before the machine runs out.

use tracing::debug;

/// Reports how much of the host's memory is in use.
pub trait MemoryProbe {
    /// Fraction of memory in use (0.0-1.0), or None if it cannot be determined.
    fn used_ratio(&self) -> Option<f64>;
}

/// Reads `/proc/meminfo`. On hosts without it the guard stays inactive.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMeminfo;

impl MemoryProbe for ProcMeminfo {
    fn used_ratio(&self) -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let ratio = parse_used_ratio(&meminfo);
        debug!(?ratio, "memory usage");
        ratio
    }
}

/// Value in kB of a `/proc/meminfo` line such as `MemTotal:  16318412 kB`.
fn meminfo_kb(meminfo: &str, key: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

fn parse_used_ratio(meminfo: &str) -> Option<f64> {
    let total = meminfo_kb(meminfo, "MemTotal")?;
    let available = meminfo_kb(meminfo, "MemAvailable")?;
    if total == 0 {
        return None;
    }
    Some(1.0 - available.min(total) as f64 / total as f64)
}

/// Stops decoding once usage reaches `threshold`.
pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    threshold: f64,
}

impl MemoryGuard {
    pub fn new(probe: Box<dyn MemoryProbe>, threshold: f64) -> Self {
        Self { probe, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The observed usage ratio if it is at or above the threshold.
    pub fn exceeded(&self) -> Option<f64> {
        self.probe
            .used_ratio()
            .filter(|ratio| *ratio >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:       16000000 kB\n\
                          MemFree:         1000000 kB\n\
                          MemAvailable:    4000000 kB\n\
                          Buffers:          200000 kB\n";

    struct Fixed(Option<f64>);

    impl MemoryProbe for Fixed {
        fn used_ratio(&self) -> Option<f64> {
            self.0
        }
    }

    #[test]
    fn parses_meminfo() {
        let ratio = parse_used_ratio(SAMPLE).unwrap();
        assert!((ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn missing_fields_give_none() {
        assert_eq!(parse_used_ratio("MemTotal: 100 kB\n"), None);
        assert_eq!(parse_used_ratio(""), None);
    }

    #[test]
    fn guard_trips_at_threshold() {
        assert_eq!(MemoryGuard::new(Box::new(Fixed(Some(0.95))), 0.9).exceeded(), Some(0.95));
        assert_eq!(MemoryGuard::new(Box::new(Fixed(Some(0.90))), 0.9).exceeded(), Some(0.90));
        assert_eq!(MemoryGuard::new(Box::new(Fixed(Some(0.5))), 0.9).exceeded(), None);
        assert_eq!(MemoryGuard::new(Box::new(Fixed(None)), 0.9).exceeded(), None);
    }
}
