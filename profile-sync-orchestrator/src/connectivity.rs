//! Online/offline tracking with hysteresis on probe failures.

/// Lightweight reachability check, run on the probe interval.
pub trait ReachabilityProbe: Send + Sync {
    fn probe(&self) -> bool;
}

impl<F> ReachabilityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn probe(&self) -> bool {
        self()
    }
}

/// Probe that never fails; the default when no network check is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl ReachabilityProbe for AlwaysReachable {
    fn probe(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    WentOnline,
    WentOffline,
}

/// Online state machine.
///
/// Direct signals from the environment apply immediately. Probe results go
/// through hysteresis: `threshold` consecutive failures are needed to go
/// offline, while a single success brings the tracker back online.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    online: bool,
    consecutive_failures: u32,
    threshold: u32,
}

impl ConnectivityTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            online: true,
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_probe(&mut self, reachable: bool) -> Transition {
        if reachable {
            self.consecutive_failures = 0;
            return self.set(true);
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            self.set(false)
        } else {
            Transition::None
        }
    }

    pub fn set_direct(&mut self, online: bool) -> Transition {
        self.consecutive_failures = 0;
        self.set(online)
    }

    fn set(&mut self, online: bool) -> Transition {
        match (self.online, online) {
            (false, true) => {
                self.online = true;
                Transition::WentOnline
            }
            (true, false) => {
                self.online = false;
                Transition::WentOffline
            }
            _ => Transition::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_probe_failure_does_not_flip() {
        let mut tracker = ConnectivityTracker::new(3);
        assert_eq!(tracker.record_probe(false), Transition::None);
        assert_eq!(tracker.record_probe(false), Transition::None);
        assert!(tracker.is_online());
        assert_eq!(tracker.record_probe(false), Transition::WentOffline);
        assert_eq!(tracker.record_probe(false), Transition::None);
        assert_eq!(tracker.record_probe(true), Transition::WentOnline);
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut tracker = ConnectivityTracker::new(2);
        tracker.record_probe(false);
        tracker.record_probe(true);
        assert_eq!(tracker.record_probe(false), Transition::None);
        assert_eq!(tracker.consecutive_failures(), 1);
    }

    #[test]
    fn direct_signal_applies_immediately() {
        let mut tracker = ConnectivityTracker::new(3);
        assert_eq!(tracker.set_direct(false), Transition::WentOffline);
        assert_eq!(tracker.set_direct(false), Transition::None);
        assert_eq!(tracker.set_direct(true), Transition::WentOnline);
    }

    #[test]
    fn closures_are_probes() {
        let probe = || false;
        assert!(!probe.probe());
        assert!(AlwaysReachable.probe());
    }
}
