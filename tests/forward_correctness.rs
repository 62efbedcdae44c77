//! Tests for forward pass and loss numerical correctness.
//!
//! These tests verify:
//! - Offsets of a small topology against hand-computed values
//! - Sigmoid and softmax outputs against a scalar reference
//! - Cross-entropy in both output modes

use flatnet::kernels::MAX_PARTIALS;
use flatnet::{
    Buffer, CpuBackend, Dispatcher, Network, NetworkTopology, OffsetTable, OutputActivation,
};

/// Tolerance for floating-point comparison.
const TOL: f32 = 1e-5;

fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() <= tol,
            "Mismatch at [{}]: {} vs {} (tol {})",
            i,
            x,
            y,
            tol
        );
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Reference forward pass, one row at a time.
fn reference_forward(
    layers: &[usize],
    weights: &[f32],
    bias: &[f32],
    inputs: &[f32],
    output: OutputActivation,
) -> Vec<f32> {
    let table = OffsetTable::compute(layers, 0);
    let rows = inputs.len() / layers[0];
    let last = layers.len() - 2;
    let mut out = Vec::new();
    for r in 0..rows {
        let mut a: Vec<f32> = inputs[r * layers[0]..(r + 1) * layers[0]].to_vec();
        for b in 0..layers.len() - 1 {
            let (n_in, n_out) = (layers[b], layers[b + 1]);
            let mut z = vec![0.0f32; n_out];
            for j in 0..n_out {
                let mut acc = bias[table.bias_offset(b) + j];
                for i in 0..n_in {
                    acc += a[i] * weights[table.weight_offset(b) + i * n_out + j];
                }
                z[j] = acc;
            }
            a = if b == last && output == OutputActivation::Softmax {
                let max = z.iter().cloned().fold(f32::MIN, f32::max);
                let e: Vec<f32> = z.iter().map(|v| (v - max).exp()).collect();
                let s: f32 = e.iter().sum();
                e.iter().map(|v| v / s).collect()
            } else {
                z.iter().map(|&v| sigmoid(v)).collect()
            };
        }
        out.extend(a);
    }
    out
}

fn patterned(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| ((i * 7 % 11) as f32 - 5.0) * scale).collect()
}

// =============================================================================
// Offsets
// =============================================================================

#[test]
fn test_offset_table_4_3_2() {
    let table = OffsetTable::compute(&[4, 3, 2], 5);
    assert_eq!(table.activations, vec![0, 20, 35, 45]);
    assert_eq!(table.weights, vec![0, 12, 18]);
    assert_eq!(table.biases, vec![0, 3, 5]);
    assert_eq!(table.deltas, vec![0, 0, 15, 25]);
    assert_eq!(table.activation_len(), 45);
    assert_eq!(table.delta_len(), 25);
    assert_eq!(table.weight_len(), 18);
    assert_eq!(table.bias_len(), 5);
}

// =============================================================================
// Forward pass
// =============================================================================

fn network_4_3_2() -> (Network, Vec<f32>, Vec<f32>) {
    let topo = NetworkTopology::new(vec![4, 3, 2]).unwrap();
    let weights = patterned(topo.weight_count(), 0.1);
    let bias = patterned(topo.bias_count(), 0.05);
    let net = Network::from_parts(topo, bias.clone(), weights.clone(), Box::new(CpuBackend::new())).unwrap();
    (net, weights, bias)
}

#[test]
fn test_forward_sigmoid_batch_of_5() {
    let (mut net, weights, bias) = network_4_3_2();
    let inputs = patterned(20, 0.2);
    let out = net.predict(&inputs, OutputActivation::Sigmoid).unwrap();
    let expected = reference_forward(&[4, 3, 2], &weights, &bias, &inputs, OutputActivation::Sigmoid);
    assert_approx_eq(&out, &expected, TOL);
}

#[test]
fn test_forward_softmax_batch_of_5() {
    let (mut net, weights, bias) = network_4_3_2();
    let inputs = patterned(20, 0.3);
    let out = net.predict(&inputs, OutputActivation::Softmax).unwrap();
    let expected = reference_forward(&[4, 3, 2], &weights, &bias, &inputs, OutputActivation::Softmax);
    assert_approx_eq(&out, &expected, TOL);
    for row in out.chunks(2) {
        assert!((row[0] + row[1] - 1.0).abs() < TOL);
    }
}

#[test]
fn test_forward_deep_network() {
    let layers = [5, 17, 9, 3];
    let topo = NetworkTopology::new(layers.to_vec()).unwrap();
    let weights = patterned(topo.weight_count(), 0.03);
    let bias = patterned(topo.bias_count(), 0.01);
    let mut net =
        Network::from_parts(topo, bias.clone(), weights.clone(), Box::new(CpuBackend::new())).unwrap();
    let inputs = patterned(5 * 40, 0.1);
    let out = net.predict(&inputs, OutputActivation::Softmax).unwrap();
    let expected = reference_forward(&layers, &weights, &bias, &inputs, OutputActivation::Softmax);
    assert_approx_eq(&out, &expected, TOL);
}

#[test]
fn test_predict_rejects_ragged_input() {
    let (mut net, _, _) = network_4_3_2();
    assert!(net.predict(&[0.0; 7], OutputActivation::Sigmoid).is_err());
    assert!(net.predict(&[], OutputActivation::Sigmoid).is_err());
}

// =============================================================================
// Cross-entropy
// =============================================================================

fn cross_entropy(targets: Vec<f32>, predictions: Vec<f32>, cols: usize, output: OutputActivation) -> f32 {
    let mut d = Dispatcher::new(Box::new(CpuBackend::new()));
    let rows = targets.len() / cols;
    let t = Buffer::create("targets", targets, d.backend_mut()).unwrap();
    let y = Buffer::create("predictions", predictions, d.backend_mut()).unwrap();
    let mut scratch = Buffer::zeros("scratch", MAX_PARTIALS, d.backend_mut()).unwrap();
    d.cross_entropy(t.view(rows, cols, 0), y.view(rows, cols, 0), &mut scratch, output)
        .unwrap()
}

#[test]
fn test_categorical_cross_entropy_value() {
    let ce = cross_entropy(
        vec![1.0, 0.0, 0.0, 1.0],
        vec![0.9, 0.1, 0.1, 0.9],
        2,
        OutputActivation::Softmax,
    );
    assert!((ce - (-(0.9f32).ln())).abs() < TOL, "ce = {}", ce);
}

#[test]
fn test_cross_entropy_exact_match_is_zero() {
    let t = vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0];
    assert_eq!(cross_entropy(t.clone(), t.clone(), 3, OutputActivation::Softmax), 0.0);
    assert_eq!(cross_entropy(t.clone(), t, 3, OutputActivation::Sigmoid), 0.0);
}

#[test]
fn test_binary_cross_entropy_value() {
    // -(ln 0.8 + ln 0.6) / 2
    let ce = cross_entropy(vec![1.0, 0.0], vec![0.8, 0.4], 2, OutputActivation::Sigmoid);
    let expected = -((0.8f32).ln() + (0.6f32).ln()) / 2.0;
    assert!((ce - expected).abs() < TOL, "ce = {}, expected {}", ce, expected);
}

#[test]
fn test_cross_entropy_floors_log_of_zero() {
    let ce = cross_entropy(vec![1.0, 0.0], vec![0.0, 1.0], 2, OutputActivation::Softmax);
    assert!(ce.is_finite());
    assert!(ce > 60.0);
}
