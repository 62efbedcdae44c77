//! Minibatch sampling and background row gather.
//!
//! [`MinibatchSampler`] picks `dest_size` distinct rows out of `source_size`.
//! [`MinibatchLoader`] runs sampling and gathering on a worker thread one
//! epoch ahead of the kernels: while epoch `n` trains, the rows of epoch
//! `n + 1` are being copied. The staged rows are owned by the worker until
//! [`MinibatchLoader::next_batch`] joins it, then ownership passes to the
//! caller, which pushes them to the device.

use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::DataSet;
use crate::error::{FlatnetError, FlatnetResult};

/// Draws row indices without replacement.
#[derive(Debug, Clone)]
pub struct MinibatchSampler {
    source_size: usize,
    dest_size: usize,
    used: Vec<bool>,
    rng: StdRng,
}

impl MinibatchSampler {
    /// Sampler over `[0, source_size)` yielding `dest_size` indices per call.
    pub fn new(source_size: usize, dest_size: usize, seed: Option<u64>) -> FlatnetResult<Self> {
        if source_size == 0 || dest_size == 0 || dest_size > source_size {
            return Err(FlatnetError::data_mismatch(format!(
                "cannot draw {} rows out of {}",
                dest_size, source_size
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            source_size,
            dest_size,
            used: vec![false; source_size],
            rng,
        })
    }

    pub fn source_size(&self) -> usize {
        self.source_size
    }

    pub fn dest_size(&self) -> usize {
        self.dest_size
    }

    /// Draws `dest_size` distinct indices.
    ///
    /// Each draw picks a uniform index; on collision it probes forward,
    /// wrapping at `source_size`, to the next unused one.
    pub fn generate(&mut self) -> Vec<usize> {
        self.used.fill(false);
        let mut indices = Vec::with_capacity(self.dest_size);
        for _ in 0..self.dest_size {
            let mut idx = self.rng.gen_range(0..self.source_size);
            while self.used[idx] {
                idx += 1;
                if idx == self.source_size {
                    idx = 0;
                }
            }
            self.used[idx] = true;
            indices.push(idx);
        }
        indices
    }
}

/// Rows gathered for one epoch.
#[derive(Debug, Clone, Default)]
pub struct MinibatchStage {
    /// Source rows, in gather order.
    pub indices: Vec<usize>,
    /// `indices.len() × input_width` features.
    pub inputs: Vec<f32>,
    /// `indices.len() × output_width` targets.
    pub targets: Vec<f32>,
}

impl MinibatchStage {
    pub fn rows(&self) -> usize {
        self.indices.len()
    }
}

/// Copies the rows named by `indices` out of `data`.
pub fn gather(data: &DataSet, indices: Vec<usize>) -> MinibatchStage {
    let mut inputs = Vec::with_capacity(indices.len() * data.input_width());
    let mut targets = Vec::with_capacity(indices.len() * data.output_width());
    for &row in &indices {
        inputs.extend_from_slice(data.input_row(row));
        targets.extend_from_slice(data.target_row(row));
    }
    MinibatchStage {
        indices,
        inputs,
        targets,
    }
}

type Pending = JoinHandle<(MinibatchSampler, MinibatchStage)>;

/// Sampler plus a worker thread keeping one gathered batch in flight.
pub struct MinibatchLoader {
    data: Arc<DataSet>,
    sampler: Option<MinibatchSampler>,
    pending: Option<Pending>,
}

impl MinibatchLoader {
    /// Loader drawing `batch_size` rows (clamped to the set size) per epoch.
    pub fn new(data: Arc<DataSet>, batch_size: usize, seed: Option<u64>) -> FlatnetResult<Self> {
        let batch = batch_size.min(data.rows());
        let sampler = MinibatchSampler::new(data.rows(), batch, seed)?;
        Ok(Self {
            data,
            sampler: Some(sampler),
            pending: None,
        })
    }

    /// Rows per batch.
    pub fn batch_size(&self) -> usize {
        match self.sampler {
            Some(ref s) => s.dest_size(),
            None => 0,
        }
    }

    fn spawn(&mut self) -> FlatnetResult<()> {
        let mut sampler = self
            .sampler
            .take()
            .ok_or_else(|| FlatnetError::worker("minibatch sampler lost"))?;
        let data = Arc::clone(&self.data);
        let handle = std::thread::Builder::new()
            .name("minibatch".into())
            .spawn(move || {
                let indices = sampler.generate();
                let stage = gather(&data, indices);
                (sampler, stage)
            })?;
        self.pending = Some(handle);
        Ok(())
    }

    fn join(&mut self) -> FlatnetResult<MinibatchStage> {
        let handle = match self.pending.take() {
            Some(handle) => handle,
            None => {
                self.spawn()?;
                self.pending
                    .take()
                    .ok_or_else(|| FlatnetError::worker("minibatch worker not started"))?
            }
        };
        let (sampler, stage) = handle
            .join()
            .map_err(|_| FlatnetError::worker("minibatch worker panicked"))?;
        self.sampler = Some(sampler);
        Ok(stage)
    }

    /// Waits for the batch in flight, starts gathering the next one and
    /// returns the finished batch.
    pub fn next_batch(&mut self) -> FlatnetResult<MinibatchStage> {
        let stage = self.join()?;
        self.spawn()?;
        Ok(stage)
    }

    /// Waits for any batch in flight and drops it.
    pub fn shutdown(&mut self) -> FlatnetResult<()> {
        if self.pending.is_some() {
            self.join()?;
        }
        Ok(())
    }
}

impl Drop for MinibatchLoader {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for MinibatchLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinibatchLoader")
            .field("rows", &self.data.rows())
            .field("batch_size", &self.batch_size())
            .field("in_flight", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: usize) -> DataSet {
        let inputs = (0..rows * 2).map(|i| i as f32).collect();
        let targets = (0..rows).map(|i| i as f32).collect();
        DataSet::from_flat(inputs, targets, 2, 1).unwrap()
    }

    #[test]
    fn test_generate_full_permutation() {
        let mut sampler = MinibatchSampler::new(10, 10, Some(7)).unwrap();
        let mut idx = sampler.generate();
        idx.sort_unstable();
        assert_eq!(idx, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_generate_no_duplicates_partial() {
        let mut sampler = MinibatchSampler::new(50, 20, Some(3)).unwrap();
        for _ in 0..5 {
            let mut idx = sampler.generate();
            assert_eq!(idx.len(), 20);
            idx.sort_unstable();
            idx.dedup();
            assert_eq!(idx.len(), 20);
            assert!(idx.iter().all(|&i| i < 50));
        }
    }

    #[test]
    fn test_sampler_rejects_oversized_batch() {
        assert!(MinibatchSampler::new(5, 6, None).is_err());
        assert!(MinibatchSampler::new(0, 0, None).is_err());
    }

    #[test]
    fn test_gather_rows() {
        let data = dataset(4);
        let stage = gather(&data, vec![3, 1]);
        assert_eq!(stage.inputs, vec![6.0, 7.0, 2.0, 3.0]);
        assert_eq!(stage.targets, vec![3.0, 1.0]);
    }

    #[test]
    fn test_loader_pipelines_batches() {
        let data = Arc::new(dataset(16));
        let mut loader = MinibatchLoader::new(Arc::clone(&data), 32, Some(1)).unwrap();
        assert_eq!(loader.batch_size(), 16);
        for _ in 0..3 {
            let stage = loader.next_batch().unwrap();
            assert_eq!(stage.rows(), 16);
            for (k, &row) in stage.indices.iter().enumerate() {
                assert_eq!(stage.targets[k], row as f32);
            }
        }
        loader.shutdown().unwrap();
    }
}
