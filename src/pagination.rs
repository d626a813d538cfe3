//! Complete result sets from offset-paginated listing endpoints.
//!
//! The first page is fetched alone to learn the server's page size and the
//! total item count; the remaining offsets are fanned out to a small worker
//! pool. Any failed page aborts the whole fetch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::unbounded;
use thiserror::Error;

use crate::catalog::{CatalogError, Page};

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Page size requested from the server (it may answer with less)
    pub page_size: usize,
    /// Upper bound on concurrent page requests after the first page
    pub workers: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            workers: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page at offset {offset} failed: {source}")]
    Request {
        offset: usize,
        #[source]
        source: CatalogError,
    },

    #[error("page at offset {offset} reports limit 0 with {total} items")]
    ZeroLimit { offset: usize, total: usize },
}

impl PageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PageError::Request { source, .. } if source.is_fatal())
    }
}

/// Offsets of every page after the first: `limit * n` for `n` in `1..ceil(total / limit)`.
pub fn remaining_offsets(limit: usize, total: usize) -> Vec<usize> {
    if limit == 0 {
        return Vec::new();
    }
    (1..total.div_ceil(limit)).map(|n| n * limit).collect()
}

/// Fetch every item behind `endpoint(offset, limit)`, converting each with `parser`.
///
/// Pages are requested concurrently but reassembled by offset, so the result
/// keeps the listing's order.
pub fn fetch_all<R, T, E, P>(
    endpoint: E,
    parser: P,
    options: &FetchOptions,
) -> Result<Vec<T>, PageError>
where
    E: Fn(usize, usize) -> Result<Page<R>, CatalogError> + Sync,
    P: Fn(R) -> T + Sync,
    T: Send,
{
    let first = endpoint(0, options.page_size)
        .map_err(|source| PageError::Request { offset: 0, source })?;
    let limit = first.limit;
    let total = first.total_number_of_items;
    let mut items: Vec<T> = first.items.into_iter().map(&parser).collect();

    if items.len() >= total {
        return Ok(items);
    }
    if limit == 0 {
        return Err(PageError::ZeroLimit { offset: 0, total });
    }

    let offsets = remaining_offsets(limit, total);
    if offsets.is_empty() {
        return Ok(items);
    }
    let workers = options.workers.clamp(1, offsets.len());
    log::debug!(
        "Fetching {} more pages of {} items with {} workers",
        offsets.len(),
        limit,
        workers
    );

    let (job_tx, job_rx) = unbounded::<usize>();
    for offset in &offsets {
        job_tx.send(*offset).ok();
    }
    drop(job_tx);

    let (out_tx, out_rx) = unbounded::<Result<(usize, Vec<T>), PageError>>();
    let abort = AtomicBool::new(false);
    let mut first_error = None;
    let mut pages: BTreeMap<usize, Vec<T>> = BTreeMap::new();

    thread::scope(|scope| {
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = out_tx.clone();
            let endpoint = &endpoint;
            let parser = &parser;
            let abort = &abort;

            scope.spawn(move || {
                while let Ok(offset) = rx.recv() {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let outcome = endpoint(offset, limit)
                        .map(|page| (offset, page.items.into_iter().map(parser).collect()))
                        .map_err(|source| PageError::Request { offset, source });
                    if outcome.is_err() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    let _ = tx.send(outcome);
                }
            });
        }
        drop(out_tx); // collector ends when every worker is done

        for outcome in out_rx.iter() {
            match outcome {
                Ok((offset, page)) => {
                    pages.insert(offset, page);
                }
                Err(e) => {
                    if first_error.is_none() {
                        log::warn!("Aborting paginated fetch: {}", e);
                        first_error = Some(e);
                    }
                }
            }
        }
    });

    if let Some(e) = first_error {
        return Err(e);
    }
    items.extend(pages.into_values().flatten());
    Ok(items)
}
