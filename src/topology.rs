//! Layer topology and the offset table that places every layer's data
//! inside the shared flat buffers.
//!
//! ## Layout
//!
//! For a topology `[n0, n1, ..., n(L-1)]` and `rows` samples:
//!
//! ```text
//! activations: | rows×n0 | rows×n1 | ... | rows×n(L-1) |
//! deltas:                | rows×n1 | ... | rows×n(L-1) |   (no input layer)
//! weights:     | n0×n1 | n1×n2 | ... |                    (one per boundary)
//! biases:      | n1 | n2 | ... |                          (one per boundary)
//! ```
//!
//! Weight block `b` is a row-major `n(b) × n(b+1)` matrix: row = source
//! neuron, column = destination neuron.

use crate::error::{FlatnetError, FlatnetResult};

/// Ordered per-layer neuron counts, input first.
///
/// Invariant: at least two layers, every count > 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTopology {
    layers: Vec<usize>,
}

impl NetworkTopology {
    /// Validates and wraps a list of layer widths.
    pub fn new(layers: Vec<usize>) -> FlatnetResult<Self> {
        if layers.len() < 2 {
            return Err(FlatnetError::invalid_topology(format!(
                "need at least 2 layers, got {}",
                layers.len()
            )));
        }
        if let Some(pos) = layers.iter().position(|&n| n == 0) {
            return Err(FlatnetError::invalid_topology(format!(
                "layer {} has zero neurons",
                pos
            )));
        }
        Ok(Self { layers })
    }

    /// Neuron counts per layer.
    #[inline]
    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    /// Number of layers, including input and output.
    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn input_width(&self) -> usize {
        self.layers[0]
    }

    #[inline]
    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1]
    }

    /// Total number of weights over all boundaries.
    pub fn weight_count(&self) -> usize {
        self.layers.windows(2).map(|w| w[0] * w[1]).sum()
    }

    /// Total number of biases (every layer but the input).
    pub fn bias_count(&self) -> usize {
        self.layers[1..].iter().sum()
    }

    /// Indices of hidden layers (neither input nor output).
    pub fn hidden_layers(&self) -> std::ops::Range<usize> {
        1..self.layers.len() - 1
    }
}

/// Cumulative element offsets of each layer's region in the flat buffers.
///
/// Every array carries a trailing entry holding the total region size, so
/// `x[i + 1] - x[i]` is always the size of region `i`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetTable {
    /// Row count the activation and delta offsets were computed for.
    pub rows: usize,
    /// `activations[l]` = start of layer `l`; length `L + 1`.
    pub activations: Vec<usize>,
    /// `weights[b]` = start of boundary `b` (`l=b -> l=b+1`); length `L`.
    pub weights: Vec<usize>,
    /// `biases[b]` = start of boundary `b`'s bias row; length `L`.
    pub biases: Vec<usize>,
    /// `deltas[l]` = `activations[l] - activations[1]` for `l >= 1`;
    /// `deltas[0]` is unused and zero. Length `L + 1`.
    pub deltas: Vec<usize>,
}

impl OffsetTable {
    /// Computes all offsets for `layers` and `rows` samples.
    pub fn compute(layers: &[usize], rows: usize) -> Self {
        let n = layers.len();
        let mut activations = vec![0; n + 1];
        let mut weights = vec![0; n];
        let mut biases = vec![0; n];

        for i in 1..=n {
            activations[i] = activations[i - 1] + rows * layers[i - 1];
        }
        for i in 1..n {
            weights[i] = weights[i - 1] + layers[i - 1] * layers[i];
            biases[i] = biases[i - 1] + layers[i];
        }

        let mut deltas = vec![0; n + 1];
        if n > 1 {
            for i in 1..=n {
                deltas[i] = activations[i] - activations[1];
            }
        }

        Self {
            rows,
            activations,
            weights,
            biases,
            deltas,
        }
    }

    /// Recomputes in place; used whenever the row count or the effective
    /// per-layer widths change.
    pub fn recompute(&mut self, layers: &[usize], rows: usize) {
        *self = Self::compute(layers, rows);
    }

    /// Number of layers this table describes.
    #[inline]
    pub fn num_layers(&self) -> usize {
        self.activations.len().saturating_sub(1)
    }

    #[inline]
    pub fn activation_offset(&self, layer: usize) -> usize {
        self.activations[layer]
    }

    #[inline]
    pub fn weight_offset(&self, boundary: usize) -> usize {
        self.weights[boundary]
    }

    #[inline]
    pub fn bias_offset(&self, boundary: usize) -> usize {
        self.biases[boundary]
    }

    /// Start of layer `layer`'s deltas. The input layer has none.
    #[inline]
    pub fn delta_offset(&self, layer: usize) -> usize {
        debug_assert!(layer >= 1, "input layer has no delta");
        self.deltas[layer]
    }

    /// Elements needed for all activations.
    #[inline]
    pub fn activation_len(&self) -> usize {
        self.activations[self.activations.len() - 1]
    }

    /// Elements needed for all deltas.
    #[inline]
    pub fn delta_len(&self) -> usize {
        self.deltas[self.deltas.len() - 1]
    }

    #[inline]
    pub fn weight_len(&self) -> usize {
        self.weights[self.weights.len() - 1]
    }

    #[inline]
    pub fn bias_len(&self) -> usize {
        self.biases[self.biases.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_validation() {
        assert!(NetworkTopology::new(vec![4]).is_err());
        assert!(NetworkTopology::new(vec![4, 0, 2]).is_err());
        let topo = NetworkTopology::new(vec![4, 3, 2]).unwrap();
        assert_eq!(topo.input_width(), 4);
        assert_eq!(topo.output_width(), 2);
        assert_eq!(topo.weight_count(), 4 * 3 + 3 * 2);
        assert_eq!(topo.bias_count(), 5);
        assert_eq!(topo.hidden_layers(), 1..2);
    }

    #[test]
    fn test_offsets_small() {
        let t = OffsetTable::compute(&[4, 3, 2], 5);
        assert_eq!(t.activations, vec![0, 20, 35, 45]);
        assert_eq!(t.weights, vec![0, 12, 18]);
        assert_eq!(t.biases, vec![0, 3, 5]);
        assert_eq!(t.delta_offset(1), 0);
        assert_eq!(t.delta_offset(2), 15);
        assert_eq!(t.delta_len(), 25);
        assert_eq!(t.num_layers(), 3);
    }

    #[test]
    fn test_recompute_rows() {
        let mut t = OffsetTable::compute(&[2, 2], 10);
        assert_eq!(t.activation_len(), 40);
        t.recompute(&[2, 2], 3);
        assert_eq!(t.rows, 3);
        assert_eq!(t.activation_len(), 12);
        assert_eq!(t.weight_len(), 4);
    }
}
