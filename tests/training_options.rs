//! Tests that training options actually do what they claim.
//!
//! Covers:
//! - The momentum update against a hand-derived single step
//! - L2 decay shrinking weights by exactly η·λ/N·W
//! - Nesterov look-ahead shift and its exact inverse
//! - Dropout compaction and scatter-back

use flatnet::{
    CpuBackend, DropoutConfig, DropoutState, Network, NetworkTopology, OutputActivation, UpdateStep,
    Workspace,
};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn network(layers: Vec<usize>, weights: Vec<f32>, bias: Vec<f32>) -> Network {
    let topo = NetworkTopology::new(layers).unwrap();
    Network::from_parts(topo, bias, weights, Box::new(CpuBackend::new())).unwrap()
}

/// One forward/backward/update on a single row.
fn step(net: &mut Network, inputs: &[f32], targets: &[f32], update: UpdateStep) {
    let layers = net.topology().layers().to_vec();
    let rows = inputs.len() / layers[0];
    let layout = net.layout(rows);
    let (d, params) = net.parts_mut();
    let mut ws = Workspace::training(&layers, rows, d.backend_mut()).unwrap();
    ws.load_rows(inputs, targets, d.backend_mut()).unwrap();
    params.forward(d, &layout, &ws, OutputActivation::Sigmoid).unwrap();
    params.backward(d, &layout, &ws).unwrap();
    params.update(d, &layout, &ws, &update).unwrap();
    ws.release(d.backend_mut());
    net.sync_host().unwrap();
}

fn plain_step(lr: f32, momentum: f32, lambda: f32) -> UpdateStep {
    UpdateStep {
        learning_rate: lr,
        momentum,
        lambda,
        training_rows: 1,
    }
}

// =============================================================================
// Momentum update
// =============================================================================

#[test]
fn test_single_step_matches_hand_derivation() {
    let mut net = network(vec![1, 1], vec![0.5], vec![0.0]);
    step(&mut net, &[1.0], &[1.0], plain_step(0.5, 0.9, 0.0));

    let y = sigmoid(0.5);
    let inc = -0.5 * (y - 1.0);
    assert!((net.weights()[0] - (0.5 + inc)).abs() < 1e-6);
    assert!((net.bias()[0] - inc).abs() < 1e-6);
    assert!((net.params().increment_weights.host()[0] - inc).abs() < 1e-6);
}

#[test]
fn test_momentum_carries_previous_increment() {
    let mut net = network(vec![1, 1], vec![0.5], vec![0.0]);
    step(&mut net, &[1.0], &[1.0], plain_step(0.5, 0.5, 0.0));
    let inc1 = net.params().increment_weights.host()[0];
    let w1 = net.weights()[0];
    let b1 = net.bias()[0];

    step(&mut net, &[1.0], &[1.0], plain_step(0.5, 0.5, 0.0));
    let y2 = sigmoid(w1 + b1);
    let inc2 = 0.5 * inc1 - 0.5 * (y2 - 1.0);
    assert!((net.params().increment_weights.host()[0] - inc2).abs() < 1e-6);
    assert!((net.weights()[0] - (w1 + inc2)).abs() < 1e-6);
}

#[test]
fn test_learning_rate_zero_no_change() {
    let mut net = network(vec![2, 3, 1], vec![0.25; 9], vec![0.125; 4]);
    step(&mut net, &[1.0, -1.0], &[1.0], plain_step(0.0, 0.9, 0.0));
    assert_eq!(net.weights(), &[0.25; 9]);
    assert_eq!(net.bias(), &[0.125; 4]);
}

// =============================================================================
// L2 decay
// =============================================================================

#[test]
fn test_weight_decay_actually_decays() {
    let mut plain = network(vec![1, 1], vec![0.5], vec![0.0]);
    let mut decayed = network(vec![1, 1], vec![0.5], vec![0.0]);
    step(&mut plain, &[1.0], &[1.0], plain_step(0.5, 0.0, 0.0));
    step(&mut decayed, &[1.0], &[1.0], plain_step(0.5, 0.0, 1.0));

    // η·λ/N·W = 0.5 · 1 / 1 · 0.5
    let diff = decayed.weights()[0] - plain.weights()[0];
    assert!((diff + 0.25).abs() < 1e-6, "diff = {}", diff);
    // biases are not decayed
    assert!((decayed.bias()[0] - plain.bias()[0]).abs() < 1e-7);
}

#[test]
fn test_weight_decay_normalised_by_training_rows() {
    let mut plain = network(vec![1, 1], vec![0.5], vec![0.0]);
    let mut decayed = network(vec![1, 1], vec![0.5], vec![0.0]);
    step(&mut plain, &[1.0], &[1.0], plain_step(0.5, 0.0, 0.0));
    step(
        &mut decayed,
        &[1.0],
        &[1.0],
        UpdateStep {
            training_rows: 10,
            ..plain_step(0.5, 0.0, 1.0)
        },
    );
    let diff = decayed.weights()[0] - plain.weights()[0];
    assert!((diff + 0.025).abs() < 1e-6, "diff = {}", diff);
}

// =============================================================================
// Nesterov look-ahead
// =============================================================================

#[test]
fn test_nag_shift_is_exactly_undone() {
    // Dyadic values keep every addition exact.
    let weights: Vec<f32> = (0..9).map(|i| i as f32 * 0.25 - 1.0).collect();
    let bias = vec![0.5, -0.5, 0.25, 1.0];
    let mut net = network(vec![2, 3, 1], weights.clone(), bias.clone());
    {
        let (d, params) = net.parts_mut();
        for (i, v) in params.increment_weights.host_mut().iter_mut().enumerate() {
            *v = 0.125 * (i as f32 - 4.0);
        }
        params.increment_bias.host_mut().fill(0.375);
        params.write_to_device(d.backend_mut()).unwrap();
    }
    let layout = net.layout(1);

    {
        let (d, params) = net.parts_mut();
        params.nag_preupdate(d, &layout, 0.5).unwrap();
    }
    net.sync_host().unwrap();
    for (i, &w) in net.weights().iter().enumerate() {
        assert_eq!(w, weights[i] + 0.5 * 0.125 * (i as f32 - 4.0));
    }
    assert_eq!(net.bias()[0], 0.5 + 0.5 * 0.375);

    {
        let (d, params) = net.parts_mut();
        params.nag_postupdate(d, &layout, 0.5).unwrap();
    }
    net.sync_host().unwrap();
    assert_eq!(net.weights(), &weights[..]);
    assert_eq!(net.bias(), &bias[..]);
}

// =============================================================================
// Dropout
// =============================================================================

fn dropout_network() -> Network {
    let topo = NetworkTopology::new(vec![3, 10, 6, 2]).unwrap();
    let weights: Vec<f32> = (0..topo.weight_count()).map(|i| i as f32 + 1.0).collect();
    let bias: Vec<f32> = (0..topo.bias_count()).map(|i| -(i as f32) - 1.0).collect();
    Network::from_parts(topo, bias, weights, Box::new(CpuBackend::new())).unwrap()
}

#[test]
fn test_dropout_compaction_copies_survivors() {
    let mut net = dropout_network();
    let topo = net.topology().clone();
    let full_weights = net.weights().to_vec();
    let mut state = {
        let (d, _) = net.parts_mut();
        DropoutState::new(&topo, DropoutConfig { alignment: 4 }, Some(11), d.backend_mut()).unwrap()
    };
    let (d, params) = net.parts_mut();
    state.dropout_neurons(params, d.backend_mut()).unwrap();

    let widths = state.widths().to_vec();
    let layout = state.layout(1);
    let full = flatnet::OffsetTable::compute(topo.layers(), 0);
    let compact = state.params().weights.host();
    for b in 0..widths.len() - 1 {
        for (i, from) in state.survivors()[b].iter().enumerate() {
            for (j, to) in state.survivors()[b + 1].iter().enumerate() {
                let got = compact[layout.table().weight_offset(b) + i * widths[b + 1] + j];
                match (from, to) {
                    (Some(s), Some(t)) => {
                        let want = full_weights[full.weight_offset(b) + s * topo.layers()[b + 1] + t];
                        assert_eq!(got, want);
                    }
                    _ => assert_eq!(got, 0.0, "padding must be zero"),
                }
            }
        }
    }
}

#[test]
fn test_dropout_scatter_back_roundtrip() {
    let mut net = dropout_network();
    let topo = net.topology().clone();
    let weights = net.weights().to_vec();
    let bias = net.bias().to_vec();
    let (d, params) = net.parts_mut();
    let mut state =
        DropoutState::new(&topo, DropoutConfig { alignment: 4 }, Some(5), d.backend_mut()).unwrap();
    for _ in 0..5 {
        state.dropout_neurons(params, d.backend_mut()).unwrap();
        state.update_from_last_dropout(params, d.backend_mut()).unwrap();
    }
    assert_eq!(params.weights.host(), &weights[..]);
    assert_eq!(params.bias.host(), &bias[..]);
    state.release(d.backend_mut());
}

#[test]
fn test_dropout_transfer_halves_hidden_sources_on_device() {
    let mut net = dropout_network();
    let topo = net.topology().clone();
    let weights = net.weights().to_vec();
    {
        let (d, params) = net.parts_mut();
        let state =
            DropoutState::new(&topo, DropoutConfig { alignment: 4 }, Some(5), d.backend_mut()).unwrap();
        state.transfer_all_weights(params, d).unwrap();
    }
    net.sync_host().unwrap();
    let first = 3 * 10;
    assert_eq!(&net.weights()[..first], &weights[..first]);
    for (got, want) in net.weights()[first..].iter().zip(&weights[first..]) {
        assert_eq!(*got, want * 0.5);
    }
}
