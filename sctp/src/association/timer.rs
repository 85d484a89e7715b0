use std::time::{Duration, Instant};

/// RTO constants, RFC 4960 Section 15 with this profile's clamps.
pub(crate) const RTO_INITIAL_MS: f64 = 3000.0;
pub(crate) const RTO_MIN_MS: f64 = 1000.0;
pub(crate) const RTO_MAX_MS: f64 = 60000.0;
pub(crate) const RTO_ALPHA: f64 = 1.0 / 8.0;
pub(crate) const RTO_BETA: f64 = 1.0 / 4.0;

/// The handshake timer gives up after this many retransmissions
/// (Max.Init.Retransmits).
pub(crate) const MAX_INIT_RETRANS: u32 = 8;
/// Non-handshake timers give up after this many retransmissions
/// (Association.Max.Retrans).
pub(crate) const MAX_ASSOCIATION_RETRANS: u32 = 10;

/// RtoManager derives the retransmission timeout from handshake-only RTT
/// samples with RFC 6298 smoothing. There is no data-driven update in this
/// profile.
#[derive(Debug, Clone)]
pub(crate) struct RtoManager {
    pub(crate) srtt: f64,
    pub(crate) rttvar: f64,
    pub(crate) rto: f64,
    no_update: bool,
}

impl Default for RtoManager {
    fn default() -> Self {
        RtoManager {
            srtt: 0.0,
            rttvar: 0.0,
            rto: RTO_INITIAL_MS,
            no_update: false,
        }
    }
}

impl RtoManager {
    pub(crate) fn new() -> Self {
        RtoManager::default()
    }

    /// set_new_rtt takes a round-trip sample in milliseconds and returns the
    /// smoothed RTT.
    pub(crate) fn set_new_rtt(&mut self, rtt: f64) -> f64 {
        if self.no_update {
            return self.srtt;
        }

        if self.srtt == 0.0 {
            // First measurement
            self.srtt = rtt;
            self.rttvar = rtt / 2.0;
        } else {
            // Subsequent measurement
            self.rttvar = (1.0 - RTO_BETA) * self.rttvar + RTO_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }

        self.rto = (self.srtt + 4.0 * self.rttvar).clamp(RTO_MIN_MS, RTO_MAX_MS);
        self.srtt
    }

    pub(crate) fn get_rto(&self) -> f64 {
        self.rto
    }

    /// no_update freezes the RTO; used once the handshake completes since
    /// the reduced profile takes no data-driven samples.
    pub(crate) fn set_no_update(&mut self) {
        self.no_update = true;
    }
}

/// RtxTimer is a deadline-based retransmission timer for one in-flight
/// control exchange (T1-init, T1-cookie, T2-shutdown, T-reconfig).
#[derive(Debug, Clone, Default)]
pub(crate) struct RtxTimer {
    pub(crate) deadline: Option<Instant>,
    pub(crate) interval: Duration,
    pub(crate) retransmits: u32,
    pub(crate) max_retrans: u32,
}

impl RtxTimer {
    pub(crate) fn new(max_retrans: u32) -> Self {
        RtxTimer {
            deadline: None,
            interval: Duration::ZERO,
            retransmits: 0,
            max_retrans,
        }
    }

    pub(crate) fn start(&mut self, now: Instant, rto_ms: f64) {
        self.interval = Duration::from_millis(rto_ms as u64);
        self.deadline = Some(now + self.interval);
        self.retransmits = 0;
    }

    pub(crate) fn stop(&mut self) {
        self.deadline = None;
        self.retransmits = 0;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// backoff doubles the interval and re-arms the timer, returning false
    /// once the retransmission budget is exhausted.
    pub(crate) fn backoff(&mut self, now: Instant) -> bool {
        self.retransmits += 1;
        if self.retransmits > self.max_retrans {
            self.deadline = None;
            return false;
        }
        self.interval = (self.interval * 2).min(Duration::from_millis(RTO_MAX_MS as u64));
        self.deadline = Some(now + self.interval);
        true
    }

    /// backoff_reconfig grows the interval by ceil(rto * 1.5) semantics:
    /// the next interval is 1.5 times the previous, rounded up to the
    /// millisecond.
    pub(crate) fn backoff_reconfig(&mut self, now: Instant) -> bool {
        self.retransmits += 1;
        if self.retransmits > self.max_retrans {
            self.deadline = None;
            return false;
        }
        let next_ms = (self.interval.as_millis() as f64 * 1.5).ceil() as u64;
        self.interval = Duration::from_millis(next_ms).min(Duration::from_millis(RTO_MAX_MS as u64));
        self.deadline = Some(now + self.interval);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rto_initial_and_clamp() {
        let mut mgr = RtoManager::new();
        assert_eq!(mgr.get_rto(), RTO_INITIAL_MS);

        // tiny RTT clamps at the floor
        mgr.set_new_rtt(10.0);
        assert_eq!(mgr.get_rto(), RTO_MIN_MS);
    }

    #[test]
    fn test_rto_first_measurement() {
        let mut mgr = RtoManager::new();
        let srtt = mgr.set_new_rtt(600.0);
        assert_eq!(srtt, 600.0);
        assert_eq!(mgr.rttvar, 300.0);
        // rto = srtt + 4 * rttvar = 1800
        assert_eq!(mgr.get_rto(), 1800.0);
    }

    #[test]
    fn test_rto_smoothing() {
        let mut mgr = RtoManager::new();
        mgr.set_new_rtt(600.0);
        let srtt = mgr.set_new_rtt(800.0);
        // srtt = 0.875*600 + 0.125*800 = 625
        assert_eq!(srtt, 625.0);
    }

    #[test]
    fn test_rto_no_update() {
        let mut mgr = RtoManager::new();
        mgr.set_new_rtt(600.0);
        mgr.set_no_update();
        mgr.set_new_rtt(5.0);
        assert_eq!(mgr.srtt, 600.0);
    }

    #[test]
    fn test_rtx_timer_budget() {
        let mut timer = RtxTimer::new(2);
        let now = Instant::now();
        timer.start(now, 100.0);
        assert!(timer.is_running());

        assert!(timer.backoff(now)); // 1
        assert!(timer.backoff(now)); // 2
        assert!(!timer.backoff(now)); // exceeded
        assert!(!timer.is_running());
    }

    #[test]
    fn test_rtx_timer_reconfig_growth() {
        let mut timer = RtxTimer::new(10);
        let now = Instant::now();
        timer.start(now, 1000.0);
        assert!(timer.backoff_reconfig(now));
        assert_eq!(timer.interval, Duration::from_millis(1500));
        assert!(timer.backoff_reconfig(now));
        assert_eq!(timer.interval, Duration::from_millis(2250));
    }
}
