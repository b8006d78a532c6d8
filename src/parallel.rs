use crate::corpus::RunCorpus;
use crate::error::PipelineError;
use rayon::prelude::*;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

/// Normalize `months` on a rayon pool of `num_threads` workers.
///
/// Months touch disjoint files, so the written files match the sequential
/// `RunCorpus::normalize_range`. Results are reported in month order and
/// the error of the lowest failing month is returned.
pub fn normalize_range_parallel(
    corpus: &RunCorpus,
    months: Range<u32>,
    num_threads: usize,
) -> Result<Vec<PathBuf>, PipelineError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("thread pool: {}", e)))?;

    info!(
        "{}: normalizing months {}..{} on {} threads",
        corpus.run_tag(),
        months.start,
        months.end,
        num_threads
    );
    let start = Instant::now();

    let results: Vec<Result<PathBuf, PipelineError>> = pool.install(|| {
        months
            .clone()
            .into_par_iter()
            .map(|month| corpus.normalize_month(month))
            .collect()
    });

    let mut written = Vec::with_capacity(results.len());
    for (month, result) in months.clone().zip(results) {
        match result {
            Ok(path) => written.push(path),
            Err(e) => {
                error!("{}: month {} failed: {}", corpus.run_tag(), month, e);
                return Err(e);
            }
        }
    }

    info!(
        "{}: normalized {} months in {:.1}s",
        corpus.run_tag(),
        written.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(written)
}

/// Sequential below two threads, parallel otherwise
pub fn normalize_range_with(
    corpus: &RunCorpus,
    months: Range<u32>,
    num_threads: usize,
) -> Result<Vec<PathBuf>, PipelineError> {
    if num_threads <= 1 {
        corpus.normalize_range(months)
    } else {
        normalize_range_parallel(corpus, months, num_threads)
    }
}
