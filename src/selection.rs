//! Index selection over persisted labels.
//!
//! The label range is cut into batches of `batch_labels` labels.  Batches are
//! handed out in waves, one per worker, each worker reading its range through
//! its own [`LabelReader`].  A worker returns the ascending list of
//! qualifying indices in its range (at most `k2` of them); a wave's lists are
//! combined by an ordered k-way merge, and scanning stops once `k2` indices
//! are known.  The outcome is the first `k2` qualifying indices of the whole
//! dataset regardless of batch size or worker count.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::ProvingParams;
use crate::difficulty::{candidate_hash, passes};
use crate::label::{Challenge, Commitment};
use crate::logging::Logger;
use crate::prover::ProvingError;
use crate::storage::{LabelReader, Layout};

/// Labels fetched per read; cancellation is polled between reads.
pub(crate) const READ_CHUNK: u64 = 1 << 12;

/// Inputs shared by every scan worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanJob<'a> {
    pub dir: &'a Path,
    pub layout: Layout,
    pub params: &'a ProvingParams,
    pub commitment: &'a Commitment,
    pub challenge: &'a Challenge,
}

/// Streams labels `[start, end)` to `visit` in bounded reads.
///
/// `visit` returns `false` to stop early.
pub(crate) fn visit_labels(
    reader: &mut LabelReader,
    width: usize,
    start: u64,
    end: u64,
    cancel: &CancelToken,
    mut visit: impl FnMut(u64, &[u8]) -> bool,
) -> Result<(), ProvingError> {
    let mut buf = Vec::new();
    let mut position = start;
    while position < end {
        if cancel.is_cancelled() {
            return Err(ProvingError::Cancelled);
        }
        let read_end = end.min(position + READ_CHUNK);
        reader.read_range(position, read_end, &mut buf)?;
        for (offset, raw) in buf.chunks_exact(width).enumerate() {
            if !visit(position + offset as u64, raw) {
                return Ok(());
            }
        }
        position = read_end;
    }
    Ok(())
}

/// Finds the first `k2` qualifying indices, ascending.
pub(crate) fn select_indices(
    job: ScanJob<'_>,
    batch_labels: u64,
    cancel: &CancelToken,
    logger: &dyn Logger,
) -> Result<Vec<u64>, ProvingError> {
    let num_labels = job.params.num_labels;
    let k2 = job.params.k2 as usize;
    let batch_labels = batch_labels.max(1);
    let wave = wave_width();

    let mut selected: Vec<u64> = Vec::with_capacity(k2);
    let mut next = 0u64;
    while next < num_labels && selected.len() < k2 {
        if cancel.is_cancelled() {
            return Err(ProvingError::Cancelled);
        }
        let mut ranges = Vec::with_capacity(wave);
        while ranges.len() < wave && next < num_labels {
            let end = next.saturating_add(batch_labels).min(num_labels);
            ranges.push((next, end));
            next = end;
        }

        let lists = scan_wave(job, &ranges, cancel)?;
        let found: usize = lists.iter().map(Vec::len).sum();
        let needed = k2 - selected.len();
        selected.extend(merge_ascending(lists).into_iter().take(needed));
        logger.debug(format_args!(
            "scanned labels [{}, {next}): {found} qualifying, {} of {k2} selected",
            ranges.first().map_or(0, |range| range.0),
            selected.len()
        ));
    }

    if selected.len() < k2 {
        return Err(ProvingError::InsufficientQualifyingIndices {
            found: selected.len() as u64,
            required: job.params.k2,
            num_labels,
        });
    }
    Ok(selected)
}

/// Batches handed out per wave: one per worker thread.
pub(crate) fn wave_width() -> usize {
    #[cfg(not(target_arch = "wasm32"))]
    {
        rayon::current_num_threads().max(1)
    }
    #[cfg(target_arch = "wasm32")]
    {
        1
    }
}

fn scan_wave(
    job: ScanJob<'_>,
    ranges: &[(u64, u64)],
    cancel: &CancelToken,
) -> Result<Vec<Vec<u64>>, ProvingError> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        ranges
            .par_iter()
            .map(|&(start, end)| scan_batch(job, start, end, cancel))
            .collect()
    }
    #[cfg(target_arch = "wasm32")]
    {
        ranges
            .iter()
            .map(|&(start, end)| scan_batch(job, start, end, cancel))
            .collect()
    }
}

/// Qualifying indices of `[start, end)`, ascending, capped at `k2`.
fn scan_batch(
    job: ScanJob<'_>,
    start: u64,
    end: u64,
    cancel: &CancelToken,
) -> Result<Vec<u64>, ProvingError> {
    let k2 = job.params.k2 as usize;
    let mut reader = LabelReader::new(job.dir, job.layout);
    let mut hits = Vec::new();
    visit_labels(
        &mut reader,
        job.params.label_width,
        start,
        end,
        cancel,
        |index, raw| {
            let hash = candidate_hash(job.commitment, job.challenge, index, raw);
            if passes(&hash, job.params.difficulty) {
                hits.push(index);
            }
            hits.len() < k2
        },
    )?;
    Ok(hits)
}

/// Merges ascending lists into one ascending list.
pub(crate) fn merge_ascending(lists: Vec<Vec<u64>>) -> Vec<u64> {
    let total = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    let mut heap = BinaryHeap::with_capacity(lists.len());
    for (list, values) in lists.iter().enumerate() {
        if let Some(&first) = values.first() {
            heap.push(Reverse((first, list, 0usize)));
        }
    }
    while let Some(Reverse((value, list, position))) = heap.pop() {
        merged.push(value);
        if let Some(&next) = lists[list].get(position + 1) {
            heap.push(Reverse((next, list, position + 1)));
        }
    }
    merged
}
