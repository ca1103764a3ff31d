//! Splitting the total request count across workers.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),
}

/// Splits `total` requests across `workers` as evenly as possible.
///
/// Every worker gets `total / workers`; the first `total % workers` workers
/// get one extra request.
pub fn partition(total: u64, workers: usize) -> Result<Vec<u64>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::InvalidWorkerCount(workers));
    }

    let base = total / workers as u64;
    let remainder = (total % workers as u64) as usize;

    Ok((0..workers)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect())
}
