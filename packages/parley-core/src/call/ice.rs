//! Remote ICE candidate buffering.
//!
//! Trickle candidates can reach us before the description they belong to
//! (the callee sees them while still ringing; the caller can see them
//! ahead of the answer). A peer connection rejects candidates until its
//! remote description is set, so they wait here and are flushed in
//! arrival order the moment it is.

use crate::signaling::IceCandidate;

/// Holds remote candidates until the remote description is applied.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    remote_applied: bool,
    pending: Vec<IceCandidate>,
}

impl CandidateBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a received candidate. Returns it back if it can be applied
    /// now, otherwise keeps it.
    pub fn accept(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Record that the remote description is set and hand back everything
    /// buffered so far, oldest first.
    pub fn mark_remote_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_applied = true;
        std::mem::take(&mut self.pending)
    }

    /// Whether the remote description has been applied
    pub fn is_remote_applied(&self) -> bool {
        self.remote_applied
    }

    /// Number of buffered candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{}", n),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_buffers_until_remote_applied() {
        let mut buffer = CandidateBuffer::new();
        for n in 0..5 {
            assert!(buffer.accept(candidate(n)).is_none());
        }
        assert_eq!(buffer.len(), 5);

        let flushed = buffer.mark_remote_applied();
        let order: Vec<_> = flushed.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(
            order,
            ["candidate:0", "candidate:1", "candidate:2", "candidate:3", "candidate:4"]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_passes_through_after_remote_applied() {
        let mut buffer = CandidateBuffer::new();
        assert!(buffer.mark_remote_applied().is_empty());
        assert_eq!(buffer.accept(candidate(7)), Some(candidate(7)));
        assert!(buffer.is_empty());
        assert!(buffer.is_remote_applied());
    }
}
