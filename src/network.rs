//! Fully-connected network over flat buffers.
//!
//! [`Parameters`] holds the four parameter buffers (weights, weight
//! increments, biases, bias increments) of one topology; [`Workspace`] holds
//! the per-row buffers (activations, deltas, targets) of one row count.
//! A [`PassLayout`] ties them together: the widths the passes run over and
//! the [`OffsetTable`] locating each layer inside the flat buffers. The same
//! pass code drives the full network and the compacted dropout network.
//!
//! # Layout
//!
//! - Weights of boundary `b` are an `n_b × n_{b+1}` row-major block: row =
//!   source neuron, column = destination neuron.
//! - Activations of layer `l` are a `rows × n_l` block; layer 0 holds the
//!   inputs.
//! - Deltas skip the input layer.
//!
//! # Saved format
//!
//! Native-endian binary, no version field:
//! `[i32 layer count][i32 × layer count sizes][u8 weights present]`
//! then, if present, `[f32 × bias count][f32 × weight count]`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::ComputeBackend;
use crate::buffer::Buffer;
use crate::config::{OutputActivation, WeightInit};
use crate::error::{FlatnetError, FlatnetResult};
use crate::kernels::{Activation, Dispatcher, MatMulMode, MAX_PARTIALS};
use crate::topology::{NetworkTopology, OffsetTable};

/// Widths and offsets one pass runs over.
#[derive(Debug, Clone, PartialEq)]
pub struct PassLayout {
    widths: Vec<usize>,
    table: OffsetTable,
}

impl PassLayout {
    pub fn new(widths: &[usize], rows: usize) -> Self {
        Self {
            widths: widths.to_vec(),
            table: OffsetTable::compute(widths, rows),
        }
    }

    #[inline]
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.table.rows
    }

    #[inline]
    pub fn table(&self) -> &OffsetTable {
        &self.table
    }

    #[inline]
    fn boundaries(&self) -> usize {
        self.widths.len() - 1
    }
}

/// Scalars of one weight update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateStep {
    pub learning_rate: f32,
    pub momentum: f32,
    /// L2 strength; 0 disables the decay term.
    pub lambda: f32,
    /// Size of the whole training set, the L2 normaliser.
    pub training_rows: usize,
}

/// Per-row buffers for one row count.
pub struct Workspace {
    rows: usize,
    activations: Buffer,
    deltas: Buffer,
    targets: Buffer,
}

impl Workspace {
    /// Workspace for training passes over `widths` (the widest widths any
    /// pass will use).
    pub fn training(widths: &[usize], rows: usize, backend: &mut dyn ComputeBackend) -> FlatnetResult<Self> {
        Self::allocate(widths, rows, true, backend)
    }

    /// Forward-only workspace; no delta storage.
    pub fn evaluation(widths: &[usize], rows: usize, backend: &mut dyn ComputeBackend) -> FlatnetResult<Self> {
        Self::allocate(widths, rows, false, backend)
    }

    fn allocate(
        widths: &[usize],
        rows: usize,
        with_deltas: bool,
        backend: &mut dyn ComputeBackend,
    ) -> FlatnetResult<Self> {
        let table = OffsetTable::compute(widths, rows);
        let output = widths[widths.len() - 1];
        let delta_len = if with_deltas { table.delta_len() } else { 0 };
        Ok(Self {
            rows,
            activations: Buffer::zeros("activations", table.activation_len(), backend)?,
            deltas: Buffer::zeros("deltas", delta_len, backend)?,
            targets: Buffer::zeros("targets", rows * output, backend)?,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn activations(&self) -> &Buffer {
        &self.activations
    }

    pub fn deltas(&self) -> &Buffer {
        &self.deltas
    }

    pub fn targets(&self) -> &Buffer {
        &self.targets
    }

    /// Copies input and target rows into layer 0 and the target buffer and
    /// pushes just those ranges to the device.
    pub fn load_rows(
        &mut self,
        inputs: &[f32],
        targets: &[f32],
        backend: &mut dyn ComputeBackend,
    ) -> FlatnetResult<()> {
        if targets.len() != self.targets.len() || inputs.len() > self.activations.len() {
            return Err(FlatnetError::shape_mismatch(
                &[self.activations.len(), self.targets.len()],
                &[inputs.len(), targets.len()],
            ));
        }
        self.activations.host_mut()[..inputs.len()].copy_from_slice(inputs);
        self.activations.write_to_device(backend, Some(inputs.len()))?;
        self.targets.host_mut().copy_from_slice(targets);
        self.targets.write_to_device(backend, None)
    }

    /// Reads the activations back and returns the output layer rows.
    pub fn read_outputs(&mut self, layout: &PassLayout, backend: &mut dyn ComputeBackend) -> FlatnetResult<&[f32]> {
        self.activations.read_from_device(backend)?;
        let last = layout.boundaries();
        let start = layout.table().activation_offset(last);
        let end = layout.table().activation_offset(last + 1);
        Ok(&self.activations.host()[start..end])
    }

    pub fn release(self, backend: &mut dyn ComputeBackend) {
        self.activations.release(backend);
        self.deltas.release(backend);
        self.targets.release(backend);
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("rows", &self.rows)
            .field("activations", &self.activations.len())
            .field("deltas", &self.deltas.len())
            .finish()
    }
}

/// Weight, bias and increment buffers of one topology.
#[derive(Debug)]
pub struct Parameters {
    pub weights: Buffer,
    pub increment_weights: Buffer,
    pub bias: Buffer,
    pub increment_bias: Buffer,
}

impl Parameters {
    /// Uploads `weights` and `bias`; increments start at zero.
    pub fn create(weights: Vec<f32>, bias: Vec<f32>, backend: &mut dyn ComputeBackend) -> FlatnetResult<Self> {
        let weight_len = weights.len();
        let bias_len = bias.len();
        Ok(Self {
            weights: Buffer::create("weights", weights, backend)?,
            increment_weights: Buffer::zeros("increment_weights", weight_len, backend)?,
            bias: Buffer::create("bias", bias, backend)?,
            increment_bias: Buffer::zeros("increment_bias", bias_len, backend)?,
        })
    }

    /// Pushes all four host arrays to the device.
    pub fn write_to_device(&self, backend: &mut dyn ComputeBackend) -> FlatnetResult<()> {
        self.weights.write_to_device(backend, None)?;
        self.increment_weights.write_to_device(backend, None)?;
        self.bias.write_to_device(backend, None)?;
        self.increment_bias.write_to_device(backend, None)
    }

    /// Pulls all four device arrays into the host copies.
    pub fn read_from_device(&mut self, backend: &mut dyn ComputeBackend) -> FlatnetResult<()> {
        self.weights.read_from_device(backend)?;
        self.increment_weights.read_from_device(backend)?;
        self.bias.read_from_device(backend)?;
        self.increment_bias.read_from_device(backend)
    }

    pub fn release(self, backend: &mut dyn ComputeBackend) {
        self.weights.release(backend);
        self.increment_weights.release(backend);
        self.bias.release(backend);
        self.increment_bias.release(backend);
    }

    /// Feed-forward over every boundary in index order.
    ///
    /// Hidden layers use the sigmoid. The final layer is a softmax over the
    /// linear output or a sigmoid, per `output`.
    pub fn forward(
        &self,
        d: &mut Dispatcher,
        layout: &PassLayout,
        ws: &Workspace,
        output: OutputActivation,
    ) -> FlatnetResult<()> {
        let t = layout.table();
        let w = layout.widths();
        let rows = layout.rows();
        let last = layout.boundaries() - 1;
        for b in 0..layout.boundaries() {
            let a = ws.activations.view(rows, w[b], t.activation_offset(b));
            let weights = self.weights.view(w[b], w[b + 1], t.weight_offset(b));
            let c = ws.activations.view(rows, w[b + 1], t.activation_offset(b + 1));
            let bias = self.bias.view(1, w[b + 1], t.bias_offset(b));
            let activation = if b == last && output == OutputActivation::Softmax {
                Activation::Identity
            } else {
                Activation::Sigmoid
            };
            d.matmul(a, weights, c, Some(bias), MatMulMode::Forward { activation })?;
            if b == last && output == OutputActivation::Softmax {
                d.softmax(c)?;
            }
        }
        Ok(())
    }

    /// Backpropagation of the output error to every non-input layer.
    pub fn backward(&self, d: &mut Dispatcher, layout: &PassLayout, ws: &Workspace) -> FlatnetResult<()> {
        let t = layout.table();
        let w = layout.widths();
        let rows = layout.rows();
        let out = layout.boundaries();

        let y = ws.activations.view(rows, w[out], t.activation_offset(out));
        let target = ws.targets.view(rows, w[out], 0);
        let delta_out = ws.deltas.view(rows, w[out], t.delta_offset(out));
        d.subtract(y, target, delta_out)?;

        for l in (1..out).rev() {
            let next = ws.deltas.view(rows, w[l + 1], t.delta_offset(l + 1));
            let weights = self.weights.view(w[l], w[l + 1], t.weight_offset(l)).t();
            let delta = ws.deltas.view(rows, w[l], t.delta_offset(l));
            d.matmul(
                next,
                weights,
                delta,
                None,
                MatMulMode::Forward {
                    activation: Activation::Identity,
                },
            )?;
            let act = ws.activations.view(rows, w[l], t.activation_offset(l));
            d.sigmoid_derivative(delta, act)?;
        }
        Ok(())
    }

    /// Momentum-weighted gradient step on every boundary.
    ///
    /// `ΔW := μ·ΔW - (η/rows)·Aᵀ·δ [- (η·λ/N)·W]`, `W += ΔW`, and the same
    /// for the biases through a column sum of the deltas.
    pub fn update(&self, d: &mut Dispatcher, layout: &PassLayout, ws: &Workspace, step: &UpdateStep) -> FlatnetResult<()> {
        let t = layout.table();
        let w = layout.widths();
        let rows = layout.rows();
        let scale = -step.learning_rate / rows as f32;
        let decay = step.learning_rate * step.lambda / step.training_rows.max(1) as f32;

        for b in 0..layout.boundaries() {
            let act = ws.activations.view(rows, w[b], t.activation_offset(b)).t();
            let delta = ws.deltas.view(rows, w[b + 1], t.delta_offset(b + 1));
            let weights = self.weights.view(w[b], w[b + 1], t.weight_offset(b));
            let inc = self.increment_weights.view(w[b], w[b + 1], t.weight_offset(b));
            d.matmul(
                act,
                delta,
                inc,
                None,
                MatMulMode::Accumulate {
                    decay: step.momentum,
                    scale,
                },
            )?;
            if step.lambda > 0.0 {
                d.elementwise_sum(inc, weights, inc, 1.0, -decay)?;
            }
            d.elementwise_sum(weights, inc, weights, 1.0, 1.0)?;

            let bias = self.bias.view(1, w[b + 1], t.bias_offset(b));
            let inc_bias = self.increment_bias.view(1, w[b + 1], t.bias_offset(b));
            d.row_sum(delta, inc_bias, step.momentum, scale)?;
            d.elementwise_sum(bias, inc_bias, bias, 1.0, 1.0)?;
        }
        Ok(())
    }

    /// `W += factor·ΔW`, `B += factor·ΔB` over the region `layout` uses.
    ///
    /// `factor = μ` before the forward pass is the Nesterov look-ahead;
    /// `factor = -μ` after backpropagation undoes it.
    pub fn nag_shift(&self, d: &mut Dispatcher, layout: &PassLayout, factor: f32) -> FlatnetResult<()> {
        let t = layout.table();
        let weights = self.weights.view(1, t.weight_len(), 0);
        let inc = self.increment_weights.view(1, t.weight_len(), 0);
        d.elementwise_sum(weights, inc, weights, 1.0, factor)?;
        let bias = self.bias.view(1, t.bias_len(), 0);
        let inc_bias = self.increment_bias.view(1, t.bias_len(), 0);
        d.elementwise_sum(bias, inc_bias, bias, 1.0, factor)
    }

    /// Look-ahead before the forward pass.
    pub fn nag_preupdate(&self, d: &mut Dispatcher, layout: &PassLayout, momentum: f32) -> FlatnetResult<()> {
        self.nag_shift(d, layout, momentum)
    }

    /// Restores the weights shifted by [`nag_preupdate`](Self::nag_preupdate).
    pub fn nag_postupdate(&self, d: &mut Dispatcher, layout: &PassLayout, momentum: f32) -> FlatnetResult<()> {
        self.nag_shift(d, layout, -momentum)
    }
}

/// Cross-entropy and accuracy of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    pub cross_entropy: f32,
    /// Fraction of rows whose arg-max output matches the arg-max target.
    pub accuracy: f32,
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Fraction of matching rows. Single-column outputs compare at 0.5.
pub fn accuracy(outputs: &[f32], targets: &[f32], width: usize) -> f32 {
    if width == 0 || targets.is_empty() {
        return 0.0;
    }
    let rows = targets.len() / width;
    let hits = outputs
        .chunks_exact(width)
        .zip(targets.chunks_exact(width))
        .filter(|(y, t)| {
            if width == 1 {
                (y[0] >= 0.5) == (t[0] >= 0.5)
            } else {
                argmax(y) == argmax(t)
            }
        })
        .count();
    hits as f32 / rows as f32
}

/// A network: topology, parameters and the dispatcher they live on.
pub struct Network {
    topology: NetworkTopology,
    params: Parameters,
    dispatcher: Dispatcher,
    scratch: Buffer,
    dropout_scaled: bool,
}

impl Network {
    /// New network with weights drawn from `init` and zero biases.
    pub fn new(
        topology: NetworkTopology,
        init: WeightInit,
        seed: Option<u64>,
        backend: Box<dyn ComputeBackend>,
    ) -> FlatnetResult<Self> {
        let weights = match init {
            WeightInit::Uniform { min, max } => {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                (0..topology.weight_count())
                    .map(|_| rng.gen_range(min..max))
                    .collect()
            }
            WeightInit::Fixed(v) => vec![v; topology.weight_count()],
        };
        let bias = vec![0.0; topology.bias_count()];
        Self::from_parts(topology, bias, weights, backend)
    }

    /// Network with the given parameters.
    pub fn from_parts(
        topology: NetworkTopology,
        bias: Vec<f32>,
        weights: Vec<f32>,
        backend: Box<dyn ComputeBackend>,
    ) -> FlatnetResult<Self> {
        if weights.len() != topology.weight_count() || bias.len() != topology.bias_count() {
            return Err(FlatnetError::shape_mismatch(
                &[topology.weight_count(), topology.bias_count()],
                &[weights.len(), bias.len()],
            ));
        }
        let mut dispatcher = Dispatcher::new(backend);
        let backend = dispatcher.backend_mut();
        let params = Parameters::create(weights, bias, backend)?;
        let scratch = Buffer::zeros("reduce_scratch", MAX_PARTIALS, backend)?;
        log::info!(
            "Network {:?}: {} weights, {} biases",
            topology.layers(),
            topology.weight_count(),
            topology.bias_count()
        );
        Ok(Self {
            topology,
            params,
            dispatcher,
            scratch,
            dropout_scaled: false,
        })
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Dispatcher and full-size parameters, borrowed together.
    pub fn parts_mut(&mut self) -> (&mut Dispatcher, &mut Parameters) {
        (&mut self.dispatcher, &mut self.params)
    }

    /// Layout of the full topology for `rows` samples.
    pub fn layout(&self, rows: usize) -> PassLayout {
        PassLayout::new(self.topology.layers(), rows)
    }

    /// Host copy of the weights (current once [`sync_host`](Self::sync_host) ran).
    pub fn weights(&self) -> &[f32] {
        self.params.weights.host()
    }

    pub fn bias(&self) -> &[f32] {
        self.params.bias.host()
    }

    /// Pulls device parameters into the host copies.
    pub fn sync_host(&mut self) -> FlatnetResult<()> {
        self.params.read_from_device(self.dispatcher.backend_mut())
    }

    /// Pushes host parameters to the device.
    pub fn sync_device(&mut self) -> FlatnetResult<()> {
        self.params.write_to_device(self.dispatcher.backend_mut())
    }

    /// Zeroes both increment buffers.
    pub fn reset_increments(&mut self) -> FlatnetResult<()> {
        self.params.increment_weights.host_mut().fill(0.0);
        self.params.increment_bias.host_mut().fill(0.0);
        let backend = self.dispatcher.backend_mut();
        self.params.increment_weights.write_to_device(backend, None)?;
        self.params.increment_bias.write_to_device(backend, None)
    }

    /// Whether the weights hold the halved inference values of a dropout run.
    pub fn dropout_scaled(&self) -> bool {
        self.dropout_scaled
    }

    fn scale_hidden_sources(&mut self, factor: f32) -> FlatnetResult<()> {
        let layers = self.topology.layers().to_vec();
        let table = OffsetTable::compute(&layers, 0);
        let host = self.params.weights.host_mut();
        for b in 1..layers.len() - 1 {
            let start = table.weight_offset(b);
            let end = table.weight_offset(b + 1);
            host[start..end].iter_mut().for_each(|w| *w *= factor);
        }
        self.params.weights.write_to_device(self.dispatcher.backend_mut(), None)
    }

    /// Halves every weight leaving a hidden layer, turning dropout-trained
    /// weights into inference weights. Expects the host copy to be current.
    pub fn apply_dropout_scaling(&mut self) -> FlatnetResult<()> {
        if !self.dropout_scaled {
            self.scale_hidden_sources(0.5)?;
            self.dropout_scaled = true;
        }
        Ok(())
    }

    /// Inverse of [`apply_dropout_scaling`](Self::apply_dropout_scaling).
    pub fn undo_dropout_scaling(&mut self) -> FlatnetResult<()> {
        if self.dropout_scaled {
            self.scale_hidden_sources(2.0)?;
            self.dropout_scaled = false;
        }
        Ok(())
    }

    /// Treats the current weights as plain training weights without
    /// rescaling them.
    pub fn forget_dropout_scaling(&mut self) {
        self.dropout_scaled = false;
    }

    /// Forward pass of the full network over `ws`.
    pub fn forward(&mut self, ws: &Workspace, output: OutputActivation) -> FlatnetResult<()> {
        let layout = self.layout(ws.rows());
        self.params.forward(&mut self.dispatcher, &layout, ws, output)
    }

    /// Cross-entropy and accuracy over the rows loaded in `ws`.
    pub fn evaluate(&mut self, ws: &mut Workspace, output: OutputActivation) -> FlatnetResult<Evaluation> {
        let layout = self.layout(ws.rows());
        self.params.forward(&mut self.dispatcher, &layout, ws, output)?;

        let last = layout.widths().len() - 1;
        let rows = layout.rows();
        let width = layout.widths()[last];
        let y = ws.activations.view(rows, width, layout.table().activation_offset(last));
        let t = ws.targets.view(rows, width, 0);
        let cross_entropy = self.dispatcher.cross_entropy(t, y, &mut self.scratch, output)?;

        ws.activations.read_from_device(self.dispatcher.backend_mut())?;
        let start = layout.table().activation_offset(last);
        let outputs = &ws.activations.host()[start..start + rows * width];
        let accuracy = accuracy(outputs, ws.targets.host(), width);
        Ok(Evaluation {
            cross_entropy,
            accuracy,
        })
    }

    /// Sum of squared weights, on the device copy.
    pub fn l2_norm(&mut self) -> FlatnetResult<f32> {
        let len = self.params.weights.len();
        let view = self.params.weights.view(1, len, 0);
        self.dispatcher.l2_norm(view, &mut self.scratch)
    }

    /// Output rows for `inputs` (row-major, `input_width` columns).
    pub fn predict(&mut self, inputs: &[f32], output: OutputActivation) -> FlatnetResult<Vec<f32>> {
        let width = self.topology.input_width();
        if inputs.is_empty() || inputs.len() % width != 0 {
            return Err(FlatnetError::shape_mismatch(&[width], &[inputs.len()]));
        }
        let rows = inputs.len() / width;
        let layers = self.topology.layers().to_vec();
        let mut ws = Workspace::evaluation(&layers, rows, self.dispatcher.backend_mut())?;
        let targets = vec![0.0; rows * self.topology.output_width()];
        ws.load_rows(inputs, &targets, self.dispatcher.backend_mut())?;
        self.forward(&ws, output)?;
        let layout = self.layout(rows);
        let result = ws.read_outputs(&layout, self.dispatcher.backend_mut())?.to_vec();
        ws.release(self.dispatcher.backend_mut());
        Ok(result)
    }

    /// Weights followed by biases, from the host copy.
    pub fn weight_vector(&self) -> Vec<f32> {
        let mut v = self.params.weights.host().to_vec();
        v.extend_from_slice(self.params.bias.host());
        v
    }

    /// Replaces the weights (and biases, when `values` carries both) and
    /// clears the increments.
    pub fn set_weight_vector(&mut self, values: &[f32]) -> FlatnetResult<()> {
        let nw = self.topology.weight_count();
        let nb = self.topology.bias_count();
        if values.len() != nw && values.len() != nw + nb {
            return Err(FlatnetError::data_mismatch(format!(
                "weight vector has {} values, expected {} (weights) or {} (weights + biases)",
                values.len(),
                nw,
                nw + nb
            )));
        }
        self.params.weights.host_mut().copy_from_slice(&values[..nw]);
        if values.len() == nw + nb {
            self.params.bias.host_mut().copy_from_slice(&values[nw..]);
        }
        self.params.increment_weights.host_mut().fill(0.0);
        self.params.increment_bias.host_mut().fill(0.0);
        self.dropout_scaled = false;
        self.sync_device()
    }

    /// Writes the saved-network format from the host copies.
    pub fn write_to<W: Write>(&self, mut writer: W) -> FlatnetResult<()> {
        let layers = self.topology.layers();
        let count = i32::try_from(layers.len())
            .map_err(|_| FlatnetError::overflow(format!("{} layers", layers.len())))?;
        let sizes = layers
            .iter()
            .map(|&n| i32::try_from(n).map_err(|_| FlatnetError::overflow(format!("layer width {}", n))))
            .collect::<FlatnetResult<Vec<i32>>>()?;

        writer.write_all(&count.to_ne_bytes())?;
        writer.write_all(bytemuck::cast_slice(&sizes))?;
        writer.write_all(&[1u8])?;
        writer.write_all(bytemuck::cast_slice(self.params.bias.host()))?;
        writer.write_all(bytemuck::cast_slice(self.params.weights.host()))?;
        writer.flush()?;
        Ok(())
    }

    /// Reads the saved-network format. Without stored weights the network
    /// is initialised from `init`.
    pub fn read_from<R: Read>(
        mut reader: R,
        init: WeightInit,
        backend: Box<dyn ComputeBackend>,
    ) -> FlatnetResult<Self> {
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let count = i32::from_ne_bytes(word);
        if count < 2 {
            return Err(FlatnetError::invalid_topology(format!("saved network has {} layers", count)));
        }
        let mut sizes = vec![0i32; count as usize];
        reader.read_exact(bytemuck::cast_slice_mut(&mut sizes))?;
        let layers = sizes
            .iter()
            .map(|&n| {
                usize::try_from(n)
                    .map_err(|_| FlatnetError::invalid_topology(format!("layer width {}", n)))
            })
            .collect::<FlatnetResult<Vec<usize>>>()?;
        let topology = NetworkTopology::new(layers)?;

        let mut flag = [0u8; 1];
        reader.read_exact(&mut flag)?;
        if flag[0] == 0 {
            return Self::new(topology, init, None, backend);
        }

        let mut bias = vec![0.0f32; topology.bias_count()];
        reader.read_exact(bytemuck::cast_slice_mut(&mut bias))?;
        let mut weights = vec![0.0f32; topology.weight_count()];
        reader.read_exact(bytemuck::cast_slice_mut(&mut weights))?;
        Self::from_parts(topology, bias, weights, backend)
    }

    /// Saves to `path`. Expects the host copy to be current.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> FlatnetResult<()> {
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))?;
        log::info!("Saved network {:?} to {}", self.topology.layers(), path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, backend: Box<dyn ComputeBackend>) -> FlatnetResult<Self> {
        let file = File::open(path.as_ref())?;
        let network = Self::read_from(BufReader::new(file), WeightInit::default(), backend)?;
        log::info!("Loaded network {:?} from {}", network.topology.layers(), path.as_ref().display());
        Ok(network)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("layers", &self.topology.layers())
            .field("dispatcher", &self.dispatcher)
            .field("dropout_scaled", &self.dropout_scaled)
            .finish()
    }
}
