//! Batch encoding of many vector sets.
//!
//! [`BatchDriver::encode_batch`] runs on the calling thread and hands control
//! back to the host scheduler every `items_per_yield` items, so a large batch
//! never monopolises a single-threaded host. [`BatchDriver::encode_batch_parallel`]
//! replaces yielding with a bounded rayon pool.
//!
//! Both report progress after every item, check a shared cancellation flag
//! before every item, and return results in input order. A vector set with
//! the wrong dimension is rejected on its own; its siblings are still encoded.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fde_core::{Encoding, EncodingConfig, EncodingType, FdeError, Result, VectorSet};
use fde_encode::FdeEncoder;
use rayon::prelude::*;

/// Outcome of one item of a batch.
pub type ItemResult = Result<Encoding>;

/// Items encoded between yields unless configured otherwise.
pub const DEFAULT_ITEMS_PER_YIELD: NonZeroUsize = NonZeroUsize::new(16).unwrap();

/// Scheduling parameters for batch encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items encoded between two yields to the host scheduler.
    pub items_per_yield: NonZeroUsize,
    /// Worker threads for parallel batches. 0 uses the global rayon pool.
    pub num_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            items_per_yield: DEFAULT_ITEMS_PER_YIELD,
            num_workers: 0,
        }
    }
}

/// Hands control back to whatever scheduler hosts the batch.
pub trait Yielder {
    fn yield_now(&self);
}

/// Yields the current OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadYielder;

impl Yielder for ThreadYielder {
    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Never yields. For hosts that run batches on a dedicated thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoYield;

impl Yielder for NoYield {
    fn yield_now(&self) {}
}

/// Cooperative cancellation shared between a batch and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed before the next item starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Drives an [`FdeEncoder`] over many vector sets.
#[derive(Debug)]
pub struct BatchDriver<'a, Y = ThreadYielder> {
    encoder: &'a FdeEncoder,
    config: BatchConfig,
    yielder: Y,
    cancellation: CancellationFlag,
}

impl<'a> BatchDriver<'a, ThreadYielder> {
    #[must_use]
    pub fn new(encoder: &'a FdeEncoder, config: BatchConfig) -> Self {
        Self {
            encoder,
            config,
            yielder: ThreadYielder,
            cancellation: CancellationFlag::new(),
        }
    }
}

impl<'a, Y: Yielder> BatchDriver<'a, Y> {
    /// Replace the yield strategy.
    #[must_use]
    pub fn with_yielder<Y2: Yielder>(self, yielder: Y2) -> BatchDriver<'a, Y2> {
        BatchDriver {
            encoder: self.encoder,
            config: self.config,
            yielder,
            cancellation: self.cancellation,
        }
    }

    /// Share an existing cancellation flag with this driver.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Flag that cancels batches run by this driver.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Encode `vector_sets` in order on the calling thread.
    ///
    /// `on_progress(completed, total)` fires after every item, rejected ones
    /// included. If cancellation is observed the whole call returns
    /// [`FdeError::Cancelled`] and partial results are discarded.
    pub fn encode_batch<F>(
        &self,
        vector_sets: &[VectorSet],
        mode: EncodingType,
        mut on_progress: F,
    ) -> Result<Vec<ItemResult>>
    where
        F: FnMut(usize, usize),
    {
        let total = vector_sets.len();
        let items_per_yield = self.config.items_per_yield.get();
        let mut results = Vec::with_capacity(total);

        for (index, vector_set) in vector_sets.iter().enumerate() {
            if index > 0 && index % items_per_yield == 0 {
                self.yielder.yield_now();
            }
            if self.cancellation.is_cancelled() {
                tracing::info!(completed = index, total, "batch cancelled");
                return Err(FdeError::Cancelled {
                    completed: index,
                    total,
                });
            }

            let result = self.encoder.encode_with_mode(vector_set, mode);
            if let Err(err) = &result {
                tracing::warn!(index, %err, "rejecting vector set");
            }
            results.push(result);
            on_progress(index + 1, total);
        }

        tracing::debug!(total, ?mode, "batch encoded");
        Ok(results)
    }

    /// Encode `vector_sets` on a bounded worker pool.
    ///
    /// Results keep input order. `on_progress` is called from worker threads;
    /// `completed` counts are unique but may arrive out of order.
    pub fn encode_batch_parallel<F>(
        &self,
        vector_sets: &[VectorSet],
        mode: EncodingType,
        on_progress: F,
    ) -> Result<Vec<ItemResult>>
    where
        F: Fn(usize, usize) + Sync,
        Y: Sync,
    {
        let total = vector_sets.len();
        let completed = AtomicUsize::new(0);

        let run = || -> Vec<Option<ItemResult>> {
            vector_sets
                .par_iter()
                .enumerate()
                .map(|(index, vector_set)| {
                    if self.cancellation.is_cancelled() {
                        return None;
                    }
                    let result = self.encoder.encode_with_mode(vector_set, mode);
                    if let Err(err) = &result {
                        tracing::warn!(index, %err, "rejecting vector set");
                    }
                    let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                    on_progress(done, total);
                    Some(result)
                })
                .collect()
        };

        let results = if self.config.num_workers == 0 {
            run()
        } else {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_workers)
                .build()
                .map_err(|err| {
                    FdeError::configuration(format!("failed to build worker pool: {err}"))
                })?
                .install(run)
        };

        let results: Option<Vec<ItemResult>> = results.into_iter().collect();
        results.ok_or_else(|| {
            let completed = completed.load(Ordering::Acquire);
            tracing::info!(completed, total, "batch cancelled");
            FdeError::Cancelled { completed, total }
        })
    }
}

/// Encode many vector sets under `config` on the calling thread.
///
/// An invalid config fails the whole call; dimension errors fail only their item.
pub fn encode_batch<F>(
    vector_sets: &[VectorSet],
    config: &EncodingConfig,
    mode: EncodingType,
    on_progress: F,
) -> Result<Vec<ItemResult>>
where
    F: FnMut(usize, usize),
{
    let encoder = FdeEncoder::new(config.clone())?;
    BatchDriver::new(&encoder, BatchConfig::default()).encode_batch(vector_sets, mode, on_progress)
}
