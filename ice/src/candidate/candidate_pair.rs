use std::fmt;

use super::Candidate;

/// CandidatePairState represent the ICE candidate pair state.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CandidatePairState {
    /// The check for this pair hasn't been performed, and it can't yet be
    /// performed until some other check succeeds, allowing this pair to
    /// unfreeze.
    #[default]
    Frozen,

    /// The check has not been performed for this pair, and can be performed
    /// as soon as it is the highest-priority Waiting pair on the check list.
    Waiting,

    /// A check has been sent for this pair, but the transaction is in
    /// progress.
    InProgress,

    /// The check for this pair was already done and failed, either never
    /// producing any response or producing an unrecoverable failure response.
    Failed,

    /// A check for this pair was already done and produced a successful
    /// result.
    Succeeded,
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidatePairState::Frozen => "frozen",
            CandidatePairState::Waiting => "waiting",
            CandidatePairState::InProgress => "in-progress",
            CandidatePairState::Failed => "failed",
            CandidatePairState::Succeeded => "succeeded",
        };
        write!(f, "{s}")
    }
}

/// CandidatePair is a combination of a local and remote candidate.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub local: Candidate,
    pub remote: Candidate,
    pub state: CandidatePairState,
    pub nominated: bool,
    /// Set once the peer asked for nomination; applied when the pair
    /// succeeds.
    pub nomination_requested: bool,
    pub binding_request_count: u16,
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(true),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority(),
        )
    }
}

impl CandidatePair {
    pub fn new(local: Candidate, remote: Candidate) -> Self {
        CandidatePair {
            local,
            remote,
            state: CandidatePairState::Waiting,
            nominated: false,
            nomination_requested: false,
            binding_request_count: 0,
        }
    }

    /// priority computes the pair priority.
    ///
    /// Let G be the priority of the controlling agent's candidate and D the
    /// priority of the controlled agent's candidate:
    ///
    /// pair priority = min(G,D)*2^32 + 2*max(G,D) + (G>D ? 1 : 0)
    ///
    /// RFC 5245 Section 5.7.2
    pub fn priority(&self, controlling: bool) -> u64 {
        let (g, d) = if controlling {
            (self.local.priority(), self.remote.priority())
        } else {
            (self.remote.priority(), self.local.priority())
        };

        let (min, max) = if g < d { (g, d) } else { (d, g) };
        let cmp = if g > d { 1u64 } else { 0u64 };

        (min as u64) * (1 << 32) + 2 * (max as u64) + cmp
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::candidate::CandidateType;

    fn host(port: u16) -> Candidate {
        Candidate::host("192.168.1.2".to_owned(), port)
    }

    fn relay(port: u16) -> Candidate {
        Candidate::relay(
            "1.2.3.4".to_owned(),
            port,
            ("192.168.1.2".to_owned(), port),
            "turn.example.org:3478".to_owned(),
        )
    }

    #[test]
    fn test_pair_priority_symmetric() {
        // both agents must compute the same pair priority regardless of role
        let pair = CandidatePair::new(host(1000), relay(2000));
        let mirrored = CandidatePair::new(relay(2000), host(1000));
        assert_eq!(pair.priority(true), mirrored.priority(false));
    }

    #[test]
    fn test_pair_priority_prefers_host_pairs() {
        let host_pair = CandidatePair::new(host(1000), host(2000));
        let relay_pair = CandidatePair::new(relay(1000), host(2000));
        assert!(host_pair.priority(true) > relay_pair.priority(true));
        assert_eq!(host_pair.local.candidate_type, CandidateType::Host);
    }
}
