//! Observability counters
//!
//! Operators observe failures through counters and logs rather than any
//! interactive surface. Counters are relaxed atomics owned by their
//! component and threaded through constructor injection; `snapshot()`
//! produces the serializable view published in heartbeat status messages.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters owned by the edge scanner process.
#[derive(Debug, Default)]
pub struct AdmissionCounters {
    pub admitted: AtomicU64,
    pub dropped_denylist: AtomicU64,
    pub dropped_duplicate: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub publish_failed: AtomicU64,
    pub swept: AtomicU64,
}

impl AdmissionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped_denylist: self.dropped_denylist.load(Ordering::Relaxed),
            dropped_duplicate: self.dropped_duplicate.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`AdmissionCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSnapshot {
    pub admitted: u64,
    pub dropped_denylist: u64,
    pub dropped_duplicate: u64,
    pub dropped_malformed: u64,
    pub publish_failed: u64,
    pub swept: u64,
}

/// Counters owned by the ingest pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub archived: AtomicU64,
    pub archive_failed: AtomicU64,
    pub no_decoder: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_failed: AtomicU64,
    pub readings_stored: AtomicU64,
    pub reading_store_failed: AtomicU64,
    pub device_upserts: AtomicU64,
    pub upsert_failed: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            archived: self.archived.load(Ordering::Relaxed),
            archive_failed: self.archive_failed.load(Ordering::Relaxed),
            no_decoder: self.no_decoder.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            readings_stored: self.readings_stored.load(Ordering::Relaxed),
            reading_store_failed: self.reading_store_failed.load(Ordering::Relaxed),
            device_upserts: self.device_upserts.load(Ordering::Relaxed),
            upsert_failed: self.upsert_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub archived: u64,
    pub archive_failed: u64,
    pub no_decoder: u64,
    pub decoded: u64,
    pub decode_failed: u64,
    pub readings_stored: u64,
    pub reading_store_failed: u64,
    pub device_upserts: u64,
    pub upsert_failed: u64,
}

/// Increment a counter by one.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Increment a counter by an arbitrary amount.
pub fn bump_by(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_snapshot_reflects_bumps() {
        let counters = AdmissionCounters::new();
        bump(&counters.admitted);
        bump(&counters.admitted);
        bump(&counters.dropped_duplicate);

        let snap = counters.snapshot();
        assert_eq!(snap.admitted, 2);
        assert_eq!(snap.dropped_duplicate, 1);
        assert_eq!(snap.dropped_denylist, 0);
    }

    #[test]
    fn test_pipeline_snapshot_serializes() {
        let counters = PipelineCounters::new();
        bump(&counters.archived);
        bump_by(&counters.decoded, 3);

        let snap = counters.snapshot();
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json.get("archived").unwrap(), 1);
        assert_eq!(json.get("decoded").unwrap(), 3);
    }
}
