//! Shared test fixtures: an in-memory indexed alignment source, a
//! scriptable memory probe, and tracing setup.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessella::coordinator::MemoryProbe;
use tessella::sam::{Alignment, AlignmentHeader, AlignmentIterator, AlignmentReader};
use tessella::{TessellaError, TessellaResult};

/// Initialize test logging once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// In-memory alignment source keyed by sequence name, coordinate-sorted,
/// with query accounting and fault injection.
pub struct MockReader {
    records: Vec<(String, Alignment)>,
    header: AlignmentHeader,
    indexed: bool,
    corrupt_after: Option<usize>,
    query_count: AtomicUsize,
    query_log: Mutex<Vec<(String, i64, i64)>>,
}

impl MockReader {
    pub fn new(mut records: Vec<(String, Alignment)>) -> Self {
        records.sort_by(|(seq_a, a), (seq_b, b)| seq_a.cmp(seq_b).then(a.start.cmp(&b.start)));
        Self {
            records,
            header: AlignmentHeader {
                text: "@HD\tVN:1.6\tSO:coordinate".to_string(),
            },
            indexed: true,
            corrupt_after: None,
            query_count: AtomicUsize::new(0),
            query_log: Mutex::new(Vec::new()),
        }
    }

    /// Records all on one sequence.
    pub fn on_sequence(sequence: &str, records: Vec<Alignment>) -> Self {
        Self::new(
            records
                .into_iter()
                .map(|a| (sequence.to_string(), a))
                .collect(),
        )
    }

    pub fn without_index(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Emit `n` records from each range query, then a corrupt-index
    /// fault.
    pub fn with_corrupt_after(mut self, n: usize) -> Self {
        self.corrupt_after = Some(n);
        self
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    /// `(sequence, start_1based, end)` per range query issued.
    pub fn queries(&self) -> Vec<(String, i64, i64)> {
        self.query_log.lock().clone()
    }
}

impl AlignmentReader for MockReader {
    fn sequence_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|(seq, _)| seq.clone()).collect();
        names.dedup();
        names
    }

    fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    fn has_index(&self) -> bool {
        self.indexed
    }

    fn iter_all(&mut self) -> TessellaResult<Box<dyn AlignmentIterator + '_>> {
        let items: Vec<TessellaResult<Alignment>> = self
            .records
            .iter()
            .map(|(_, a)| Ok(a.clone()))
            .collect();
        Ok(Box::new(MockIter::new(items)))
    }

    fn query(
        &mut self,
        sequence: &str,
        start_1based: i64,
        end: i64,
        _contained: bool,
    ) -> TessellaResult<Box<dyn AlignmentIterator + '_>> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.query_log
            .lock()
            .push((sequence.to_string(), start_1based, end));

        let start = start_1based - 1;
        let mut items: Vec<TessellaResult<Alignment>> = self
            .records
            .iter()
            .filter(|(seq, a)| seq == sequence && a.start < end && a.end > start)
            .map(|(_, a)| Ok(a.clone()))
            .collect();
        if let Some(n) = self.corrupt_after {
            items.truncate(n);
            items.push(Err(TessellaError::CorruptIndex(
                "unexpected end of index block".into(),
            )));
        }
        Ok(Box::new(MockIter::new(items)))
    }

    fn close(&mut self) -> TessellaResult<()> {
        Ok(())
    }
}

pub struct MockIter {
    items: std::vec::IntoIter<TessellaResult<Alignment>>,
    closed: bool,
}

impl MockIter {
    fn new(items: Vec<TessellaResult<Alignment>>) -> Self {
        Self {
            items: items.into_iter(),
            closed: false,
        }
    }
}

impl Iterator for MockIter {
    type Item = TessellaResult<Alignment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.items.next()
    }
}

impl AlignmentIterator for MockIter {
    fn close(&mut self) {
        self.closed = true;
    }
}

/// Memory probe that replays a fixed sequence of readings, then reports
/// `default` forever.
pub struct ScriptedProbe {
    fractions: Mutex<VecDeque<f64>>,
    default: f64,
}

impl ScriptedProbe {
    pub fn new(fractions: impl IntoIterator<Item = f64>) -> Self {
        Self {
            fractions: Mutex::new(fractions.into_iter().collect()),
            default: 1.0,
        }
    }
}

impl MemoryProbe for ScriptedProbe {
    fn available_fraction(&self) -> f64 {
        self.fractions.lock().pop_front().unwrap_or(self.default)
    }
}

/// `count` unpaired reads of `length` bases tiled `spacing` apart from
/// `start`.
pub fn read_ladder(start: i64, count: usize, spacing: i64, length: i64) -> Vec<Alignment> {
    (0..count)
        .map(|i| {
            let read_start = start + i as i64 * spacing;
            Alignment::new(format!("read{i}"), read_start, read_start + length)
        })
        .collect()
}
