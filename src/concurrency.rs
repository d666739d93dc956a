//! Bounded fork-join parallelism for bulk per-element work.
//!
//! Both primitives run sequentially when parallelism is not configured or
//! the slice is too small to be worth the pool, and fail fast on the first
//! error either way.

use rayon::prelude::*;

use crate::Error;

/// Slices below this size always run sequentially.
pub const MIN_ITEMS_FOR_PARALLEL: usize = 101;

fn pool(cores: usize) -> Result<rayon::ThreadPool, Error> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(cores)
        .build()
        .map_err(|e| Error::ProtocolMisuse(format!("failed to build worker pool: {}", e)))
}

/// Runs `worker` over every item, distributing across `cores` workers.
pub fn for_each<T, F>(cores: usize, items: &[T], worker: F) -> Result<(), Error>
where
    T: Sync,
    F: Fn(usize, &T) -> Result<(), Error> + Sync + Send,
{
    if items.is_empty() {
        return Ok(());
    }

    if cores <= 1 || items.len() < MIN_ITEMS_FOR_PARALLEL {
        for (index, item) in items.iter().enumerate() {
            worker(index, item)?;
        }
        return Ok(());
    }

    pool(cores)?.install(|| {
        items
            .par_iter()
            .enumerate()
            .try_for_each(|(index, item)| worker(index, item))
    })
}

/// Runs `worker` over every item and collects the results in input order.
pub fn map<T, U, F>(cores: usize, items: Vec<T>, worker: F) -> Result<Vec<U>, Error>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U, Error> + Sync + Send,
{
    if cores <= 1 || items.len() < MIN_ITEMS_FOR_PARALLEL {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(worker(item)?);
        }
        return Ok(results);
    }

    pool(cores)?.install(|| items.into_par_iter().map(worker).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_order() {
        let items: Vec<usize> = (0..500).collect();
        let sequential = map(1, items.clone(), |i| Ok(i * 2)).unwrap();
        let parallel = map(4, items, |i| Ok(i * 2)).unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(parallel[123], 246);
    }

    #[test]
    fn first_error_is_surfaced() {
        let items: Vec<usize> = (0..500).collect();
        let result = map(4, items, |i| {
            if i == 250 {
                Err(Error::ProtocolMisuse("boom".into()))
            } else {
                Ok(i)
            }
        });
        assert!(matches!(result, Err(Error::ProtocolMisuse(_))));
    }

    #[test]
    fn for_each_visits_every_item() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = AtomicUsize::new(0);
        let items: Vec<u32> = (0..200).collect();
        for_each(4, &items, |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn small_slices_run_sequentially() {
        // Below the threshold the worker runs on the caller's thread.
        let caller = std::thread::current().id();
        let items: Vec<u32> = (0..MIN_ITEMS_FOR_PARALLEL as u32 - 1).collect();
        for_each(8, &items, |_, _| {
            assert_eq!(std::thread::current().id(), caller);
            Ok(())
        })
        .unwrap();
    }
}
