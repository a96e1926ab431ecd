//! Stress tests for seglake.
//!
//! These tests hammer offset tables with concurrent readers while a
//! single writer updates values in place.

use seglake_core::attribute::{VarLenAttributeReader, VarLenAttributeWriter};
use seglake_core::{CoreError, DocId, OffsetConfig};
use seglake_storage::InMemoryDirectory;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const ATTR_PATH: &str = "segment_0/attribute/stress";

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations (e.g. updates refused with `CapacityExceeded`).
    pub failed_ops: usize,
    /// Reads that returned a value of another document.
    pub mismatches: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, mismatches: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            mismatches,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Mismatches: {}", self.mismatches);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }

    /// Serializes the result as pretty JSON, for archiving benchmark runs.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("Failed to serialize stress result")
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Documents in the attribute.
    pub doc_count: u32,
    /// Largest value written by an update, in bytes.
    pub value_size: usize,
    /// Offset table options of the attribute.
    pub offset_config: OffsetConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            doc_count: 1_000,
            value_size: 64,
            offset_config: OffsetConfig::new().updatable(true),
        }
    }
}

/// Value of `doc` written in `round`; starts with the doc id so readers
/// can tell whose value they got.
fn value_of(doc: DocId, round: usize, max_size: usize) -> Vec<u8> {
    let mut value = doc.to_le_bytes().to_vec();
    value.resize(4 + round % max_size.max(1), (round % 251) as u8);
    value
}

fn owner_of(value: &[u8]) -> Option<DocId> {
    let prefix: [u8; 4] = value.get(..4)?.try_into().ok()?;
    Some(DocId::from_le_bytes(prefix))
}

/// Builds an attribute of `config.doc_count` values and opens it.
fn build_attribute(config: &StressConfig) -> VarLenAttributeReader {
    let dir = InMemoryDirectory::new();
    let mut writer = VarLenAttributeWriter::new(config.offset_config.clone());
    for doc in 0..config.doc_count {
        writer
            .add_value(&value_of(doc, 0, config.value_size))
            .expect("Failed to add value");
    }
    writer.dump(&dir, ATTR_PATH).expect("Failed to dump attribute");
    VarLenAttributeReader::open(&dir, ATTR_PATH, config.doc_count, &config.offset_config)
        .expect("Failed to open attribute")
}

/// Run a concurrent batch lookup stress test.
pub fn stress_concurrent_lookups(config: &StressConfig) -> StressTestResult {
    let reader = build_attribute(config);
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let ops_per_thread = config.operations / config.threads.max(1);
    let doc_count = config.doc_count as usize;

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let offsets = reader.offsets().session_reader();
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for i in 0..ops_per_thread {
                    // one in-range id and one id past the end per batch
                    let doc = ((t * ops_per_thread + i) % doc_count) as DocId;
                    let results = offsets.get_offsets(&[doc, offsets.doc_count() + doc]);
                    if results[0].is_ok() && results[1].is_err() {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        0,
        start.elapsed(),
    )
}

/// Run a single-writer, many-reader update stress test.
///
/// Updates refused with `CapacityExceeded` count as failed operations;
/// any other update error aborts the run.
pub fn stress_updates_under_reads(config: &StressConfig) -> StressTestResult {
    let mut reader = build_attribute(config);
    let mismatches = AtomicUsize::new(0);
    let reads = AtomicUsize::new(0);
    let done = AtomicBool::new(false);
    let doc_count = config.doc_count as usize;
    let mut successful = 0usize;
    let mut failed = 0usize;

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let session = reader.session_reader();
            let (mismatches, reads, done) = (&mismatches, &reads, &done);
            scope.spawn(move || {
                let mut i = t;
                while !done.load(Ordering::Acquire) {
                    let doc = (i % doc_count) as DocId;
                    let value = session.read(doc).expect("Failed to read value");
                    if owner_of(&value) != Some(doc) {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                    reads.fetch_add(1, Ordering::Relaxed);
                    i += config.threads;
                }
            });
        }

        for round in 0..config.operations {
            let doc = ((round * 7) % doc_count) as DocId;
            match reader.update_field(doc, &value_of(doc, round + 1, config.value_size)) {
                Ok(_) => successful += 1,
                Err(CoreError::CapacityExceeded { .. }) => failed += 1,
                Err(e) => panic!("update of doc {doc} failed: {e}"),
            }
        }
        done.store(true, Ordering::Release);
    });

    StressTestResult::new(
        successful + reads.load(Ordering::Relaxed),
        failed,
        mismatches.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
