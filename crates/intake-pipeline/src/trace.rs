//! Stage traces: content hashes and latency of each pipeline stage
use intake_core::Stage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub stage: Stage,
    pub in_hash: String,
    pub out_hash: String,
    pub latency_ms: u64,
}

pub fn hash_bytes(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data))
}

/// Running measurement of one stage.
pub(crate) struct StageTimer {
    stage: Stage,
    in_hash: String,
    start: Instant,
}

impl StageTimer {
    pub(crate) fn start(stage: Stage, input: &[u8]) -> Self {
        Self {
            stage,
            in_hash: hash_bytes(input),
            start: Instant::now(),
        }
    }

    pub(crate) fn finish(self, output: &[u8]) -> StageTrace {
        StageTrace {
            stage: self.stage,
            in_hash: self.in_hash,
            out_hash: hash_bytes(output),
            latency_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_prefixed_and_stable() {
        let a = hash_bytes(b"We need 500 units");
        assert!(a.starts_with("blake3:"));
        assert_eq!(a.len(), "blake3:".len() + 64);
        assert_eq!(a, hash_bytes(b"We need 500 units"));
        assert_ne!(a, hash_bytes(b"We need 501 units"));
    }

    #[test]
    fn test_timer_links_hashes() {
        let trace = StageTimer::start(Stage::Classify, b"in").finish(b"out");
        assert_eq!(trace.stage, Stage::Classify);
        assert_eq!(trace.in_hash, hash_bytes(b"in"));
        assert_eq!(trace.out_hash, hash_bytes(b"out"));
    }
}
