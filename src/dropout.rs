//! Hidden-neuron dropout over compacted buffers.
//!
//! Each epoch every hidden neuron survives with probability 1/2. The
//! surviving neurons of each hidden layer are packed into a narrower layer
//! whose width is rounded up to the alignment with placeholder neurons, and
//! the weights and biases between surviving neurons are copied into a
//! separate [`Parameters`] set sized for the widest possible compaction.
//! Training runs on that set; afterwards the updated values are scattered
//! back into the full-size host arrays.
//!
//! Placeholder neurons have zero incoming weights, zero outgoing weights and
//! zero bias, so they never reach the outputs.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::backend::ComputeBackend;
use crate::config::DropoutConfig;
use crate::error::{FlatnetError, FlatnetResult};
use crate::kernels::Dispatcher;
use crate::network::{Parameters, PassLayout};
use crate::topology::{NetworkTopology, OffsetTable};

/// Fair coin flips from a buffered 64-bit stream.
#[derive(Debug, Clone)]
struct CoinFlips {
    rng: StdRng,
    word: u64,
    left: u32,
}

impl CoinFlips {
    fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, word: 0, left: 0 }
    }

    fn flip(&mut self) -> bool {
        if self.left == 0 {
            self.word = self.rng.next_u64();
            self.left = 64;
        }
        let bit = self.word & 1;
        self.word >>= 1;
        self.left -= 1;
        bit == 1
    }
}

/// Rounds `n` up to a multiple of `alignment`, at least one `alignment`.
#[inline]
pub fn padded_width(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment).max(1) * alignment
}

/// Dropout mask and the compacted parameters it selects.
pub struct DropoutState {
    alignment: usize,
    full_widths: Vec<usize>,
    full_table: OffsetTable,
    capacity_widths: Vec<usize>,
    /// Per layer: source neuron of each compacted slot, `None` for padding.
    survivors: Vec<Vec<Option<usize>>>,
    widths: Vec<usize>,
    table: OffsetTable,
    params: Parameters,
    coins: CoinFlips,
}

impl DropoutState {
    /// Allocates compacted buffers for `topology`.
    pub fn new(
        topology: &NetworkTopology,
        config: DropoutConfig,
        seed: Option<u64>,
        backend: &mut dyn ComputeBackend,
    ) -> FlatnetResult<Self> {
        if config.alignment == 0 {
            return Err(FlatnetError::invalid_topology("dropout alignment must be > 0"));
        }
        let full_widths = topology.layers().to_vec();
        let hidden = topology.hidden_layers();
        let capacity_widths: Vec<usize> = full_widths
            .iter()
            .enumerate()
            .map(|(l, &n)| {
                if hidden.contains(&l) {
                    padded_width(n, config.alignment)
                } else {
                    n
                }
            })
            .collect();

        let capacity = OffsetTable::compute(&capacity_widths, 0);
        let params = Parameters::create(
            vec![0.0; capacity.weight_len()],
            vec![0.0; capacity.bias_len()],
            backend,
        )?;
        let survivors = full_widths
            .iter()
            .map(|&n| (0..n).map(Some).collect())
            .collect();

        Ok(Self {
            alignment: config.alignment,
            full_table: OffsetTable::compute(&full_widths, 0),
            table: OffsetTable::compute(&full_widths, 0),
            widths: full_widths.clone(),
            full_widths,
            capacity_widths,
            survivors,
            params,
            coins: CoinFlips::new(seed),
        })
    }

    /// Widest width each layer can take; size training workspaces with this.
    pub fn capacity_widths(&self) -> &[usize] {
        &self.capacity_widths
    }

    /// Widths of the current compaction.
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    /// Source neuron per compacted slot, per layer.
    pub fn survivors(&self) -> &[Vec<Option<usize>>] {
        &self.survivors
    }

    /// Compacted parameters.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Layout of the current compaction for `rows` samples.
    pub fn layout(&self, rows: usize) -> PassLayout {
        PassLayout::new(&self.widths, rows)
    }

    /// Draws a new mask. Input and output layers keep every neuron.
    pub fn sample(&mut self) {
        let last = self.full_widths.len() - 1;
        for l in 1..last {
            let n = self.full_widths[l];
            let mut kept: Vec<Option<usize>> = Vec::with_capacity(self.capacity_widths[l]);
            for i in 0..n {
                if self.coins.flip() {
                    kept.push(Some(i));
                }
            }
            let padded = padded_width(kept.len(), self.alignment);
            kept.resize(padded, None);
            self.widths[l] = padded;
            self.survivors[l] = kept;
        }
        self.table = OffsetTable::compute(&self.widths, 0);
        log::debug!("Dropout widths {:?}", self.widths);
    }

    /// Copies the surviving weights, biases and increments out of `full`
    /// and pushes them to the device.
    pub fn compact(&mut self, full: &Parameters, backend: &mut dyn ComputeBackend) -> FlatnetResult<()> {
        let boundaries = self.widths.len() - 1;
        {
            let Parameters {
                weights,
                increment_weights,
                bias,
                increment_bias,
            } = &mut self.params;
            let (w, iw) = (weights.host_mut(), increment_weights.host_mut());
            for b in 0..boundaries {
                let src_cols = self.full_widths[b + 1];
                let src_off = self.full_table.weight_offset(b);
                let dst_cols = self.widths[b + 1];
                let dst_off = self.table.weight_offset(b);
                for (i, from) in self.survivors[b].iter().enumerate() {
                    for (j, to) in self.survivors[b + 1].iter().enumerate() {
                        let dst = dst_off + i * dst_cols + j;
                        match (from, to) {
                            (Some(s), Some(t)) => {
                                let src = src_off + s * src_cols + t;
                                w[dst] = full.weights.host()[src];
                                iw[dst] = full.increment_weights.host()[src];
                            }
                            _ => {
                                w[dst] = 0.0;
                                iw[dst] = 0.0;
                            }
                        }
                    }
                }
            }

            let (bh, ibh) = (bias.host_mut(), increment_bias.host_mut());
            for b in 0..boundaries {
                let src_off = self.full_table.bias_offset(b);
                let dst_off = self.table.bias_offset(b);
                for (j, to) in self.survivors[b + 1].iter().enumerate() {
                    let dst = dst_off + j;
                    match to {
                        Some(t) => {
                            bh[dst] = full.bias.host()[src_off + t];
                            ibh[dst] = full.increment_bias.host()[src_off + t];
                        }
                        None => {
                            bh[dst] = 0.0;
                            ibh[dst] = 0.0;
                        }
                    }
                }
            }
        }

        let wl = self.table.weight_len();
        let bl = self.table.bias_len();
        self.params.weights.write_to_device(backend, Some(wl))?;
        self.params.increment_weights.write_to_device(backend, Some(wl))?;
        self.params.bias.write_to_device(backend, Some(bl))?;
        self.params.increment_bias.write_to_device(backend, Some(bl))
    }

    /// Samples a mask and compacts `full` under it.
    pub fn dropout_neurons(&mut self, full: &Parameters, backend: &mut dyn ComputeBackend) -> FlatnetResult<()> {
        self.sample();
        self.compact(full, backend)
    }

    /// Reads the compacted buffers back and writes every surviving weight,
    /// bias and increment to its place in the full-size host arrays.
    /// Entries of dropped neurons are left as they were.
    pub fn update_from_last_dropout(
        &mut self,
        full: &mut Parameters,
        backend: &mut dyn ComputeBackend,
    ) -> FlatnetResult<()> {
        self.params.read_from_device(backend)?;
        let boundaries = self.widths.len() - 1;
        let w = self.params.weights.host();
        let iw = self.params.increment_weights.host();
        let bh = self.params.bias.host();
        let ibh = self.params.increment_bias.host();

        for b in 0..boundaries {
            let full_cols = self.full_widths[b + 1];
            let full_off = self.full_table.weight_offset(b);
            let cols = self.widths[b + 1];
            let off = self.table.weight_offset(b);
            for (i, from) in self.survivors[b].iter().enumerate() {
                let Some(s) = from else { continue };
                for (j, to) in self.survivors[b + 1].iter().enumerate() {
                    let Some(t) = to else { continue };
                    let src = off + i * cols + j;
                    let dst = full_off + s * full_cols + t;
                    full.weights.host_mut()[dst] = w[src];
                    full.increment_weights.host_mut()[dst] = iw[src];
                }
            }

            let full_bias = self.full_table.bias_offset(b);
            let bias_off = self.table.bias_offset(b);
            for (j, to) in self.survivors[b + 1].iter().enumerate() {
                let Some(t) = to else { continue };
                full.bias.host_mut()[full_bias + t] = bh[bias_off + j];
                full.increment_bias.host_mut()[full_bias + t] = ibh[bias_off + j];
            }
        }
        Ok(())
    }

    /// Writes the full host weights and biases to the device and halves,
    /// on the device only, every weight leaving a hidden layer.
    pub fn transfer_all_weights(&self, full: &Parameters, d: &mut Dispatcher) -> FlatnetResult<()> {
        full.weights.write_to_device(d.backend_mut(), None)?;
        full.bias.write_to_device(d.backend_mut(), None)?;
        for b in 1..self.full_widths.len() - 1 {
            let view = full.weights.view(
                self.full_widths[b],
                self.full_widths[b + 1],
                self.full_table.weight_offset(b),
            );
            d.scale(view, 0.5)?;
        }
        Ok(())
    }

    pub fn release(self, backend: &mut dyn ComputeBackend) {
        self.params.release(backend);
    }
}

impl std::fmt::Debug for DropoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropoutState")
            .field("alignment", &self.alignment)
            .field("full_widths", &self.full_widths)
            .field("widths", &self.widths)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    #[test]
    fn test_padded_width() {
        assert_eq!(padded_width(0, 16), 16);
        assert_eq!(padded_width(1, 16), 16);
        assert_eq!(padded_width(16, 16), 16);
        assert_eq!(padded_width(17, 16), 32);
    }

    #[test]
    fn test_coin_flips_refill() {
        let mut coins = CoinFlips::new(Some(9));
        let heads = (0..6400).filter(|_| coins.flip()).count();
        assert!(heads > 2800 && heads < 3600, "heads = {}", heads);
    }

    #[test]
    fn test_sample_keeps_io_layers() {
        let mut backend = CpuBackend::new();
        let topo = NetworkTopology::new(vec![5, 40, 20, 3]).unwrap();
        let mut state = DropoutState::new(&topo, DropoutConfig { alignment: 8 }, Some(2), &mut backend).unwrap();
        for _ in 0..10 {
            state.sample();
            let w = state.widths();
            assert_eq!(w[0], 5);
            assert_eq!(w[3], 3);
            for l in 1..3 {
                assert_eq!(w[l] % 8, 0);
                assert!(w[l] <= state.capacity_widths()[l]);
                let real: Vec<usize> = state.survivors()[l].iter().flatten().copied().collect();
                assert!(real.windows(2).all(|p| p[0] < p[1]));
            }
            assert_eq!(state.survivors()[0].len(), 5);
        }
    }
}
