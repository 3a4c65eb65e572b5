//! Fixed-size worker pool over a slice, results kept in input order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

/// Ceiling on concurrent detail fetches against the upstream site.
pub const DETAIL_CONCURRENCY: usize = 4;

/// Run `work` over every item with at most `limit` calls in flight.
///
/// Each of the `limit` workers pulls the next index from a shared atomic
/// cursor until the slice is exhausted. Output slot `i` holds the result
/// for `items[i]` whatever the completion order.
pub async fn run_bounded<'a, T, R, F, Fut>(items: &'a [T], limit: usize, work: F) -> Vec<R>
where
    F: Fn(usize, &'a T) -> Fut,
    Fut: Future<Output = R>,
{
    let cursor = AtomicUsize::new(0);
    let cursor = &cursor;
    let work = &work;
    let workers = limit.max(1).min(items.len());

    let worker = move || async move {
        let mut done = Vec::new();
        loop {
            let idx = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(item) = items.get(idx) else {
                break;
            };
            done.push((idx, work(idx, item).await));
        }
        done
    };

    let batches = join_all((0..workers).map(|_| worker())).await;

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (idx, result) in batches.into_iter().flatten() {
        slots[idx] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
