//! End-to-end training runs and the run-state machine.
//!
//! These tests verify:
//! - XOR converges with momentum, NAG and minibatch = set size
//! - Pause keeps the epoch counter, stop resets it
//! - Dropout runs leave inference-scaled weights behind

use std::time::{Duration, Instant};

use flatnet::data::parse_training_set;
use flatnet::{
    DataSet, DropoutConfig, OutputActivation, RunOutcome, TrainConfig, Trainer, TrainingControl,
    TrainingStatus, WeightInit,
};

fn xor(hidden: usize) -> DataSet {
    let text = format!("4\n2,{},1\n0,0,0\n0,1,1\n1,0,1\n1,1,0\n", hidden);
    parse_training_set(text.as_bytes(), "xor").unwrap()
}

fn xor_config() -> TrainConfig {
    TrainConfig {
        learning_rate: 0.5,
        momentum: 0.9,
        max_epochs: 20_000,
        min_error: 0.05,
        print_epochs: 50,
        minibatch_size: 4,
        nag: true,
        output: OutputActivation::Sigmoid,
        weight_init: WeightInit::Uniform { min: -1.0, max: 1.0 },
        seed: Some(1234),
        ..Default::default()
    }
}

fn wait_for(control: &TrainingControl, epoch: usize) {
    let start = Instant::now();
    while control.epoch() < epoch {
        assert!(start.elapsed() < Duration::from_secs(60), "training stalled");
        std::thread::sleep(Duration::from_millis(1));
    }
}

type Handle = std::thread::JoinHandle<(Trainer, flatnet::FlatnetResult<RunOutcome>)>;

fn spawn(mut trainer: Trainer) -> Handle {
    std::thread::spawn(move || {
        let result = trainer.train();
        (trainer, result)
    })
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_xor_converges() {
    let mut trainer = Trainer::new(xor_config()).unwrap();
    trainer.set_training_set(xor(8)).unwrap();
    let outcome = trainer.train().unwrap();

    assert!(
        matches!(outcome, RunOutcome::Converged { .. }),
        "outcome {:?}, CE {}",
        outcome,
        trainer.state().cross_entropy
    );
    assert!(trainer.state().cross_entropy < 0.05);
    assert_eq!(trainer.state().train_accuracy, 1.0);

    let out = trainer
        .network_mut()
        .unwrap()
        .predict(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0], OutputActivation::Sigmoid)
        .unwrap();
    assert!(out[0] < 0.5 && out[1] > 0.5 && out[2] > 0.5 && out[3] < 0.5, "{:?}", out);
}

#[test]
fn test_history_and_test_set_evaluation() {
    let config = TrainConfig {
        max_epochs: 100,
        print_epochs: 25,
        min_error: 0.0,
        ..xor_config()
    };
    let mut trainer = Trainer::new(config).unwrap();
    trainer.set_training_set(xor(4)).unwrap();
    trainer.set_test_set(xor(4)).unwrap();

    assert_eq!(trainer.train().unwrap(), RunOutcome::EpochLimit);
    let state = trainer.state();
    assert_eq!(state.epoch, 100);
    let epochs: Vec<usize> = state.history.iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, vec![25, 50, 75, 100]);
    for record in &state.history {
        assert!(record.train_cross_entropy.is_finite());
        assert!(record.l2_norm > 0.0);
        // same rows, same network
        assert_eq!(record.test_accuracy, Some(record.train_accuracy));
    }
    assert!(!state.plot(10, 20).is_empty());
}

// =============================================================================
// Pause / stop
// =============================================================================

#[test]
fn test_pause_resume_stop() {
    let config = TrainConfig {
        max_epochs: usize::MAX,
        print_epochs: 1000,
        min_error: 0.0,
        ..xor_config()
    };
    let mut trainer = Trainer::new(config).unwrap();
    trainer.set_training_set(xor(4)).unwrap();
    let control = trainer.control();

    let handle = spawn(trainer);
    wait_for(&control, 20);
    control.request_pause();
    let (trainer, result) = handle.join().unwrap();
    assert_eq!(result.unwrap(), RunOutcome::Paused);
    assert_eq!(control.status(), TrainingStatus::Paused);
    let paused_at = trainer.state().epoch;
    assert!(paused_at >= 20);
    assert_eq!(control.epoch(), paused_at);

    // resume continues from the paused epoch
    let handle = spawn(trainer);
    wait_for(&control, paused_at + 10);
    control.request_stop();
    let (mut trainer, result) = handle.join().unwrap();
    assert_eq!(result.unwrap(), RunOutcome::Stopped);
    assert_eq!(control.status(), TrainingStatus::Idle);
    assert_eq!(trainer.state().epoch, 0);

    // a stopped run starts over
    let config = TrainConfig {
        max_epochs: 30,
        print_epochs: 10,
        ..trainer.config().clone()
    };
    trainer.set_config(config).unwrap();
    assert_eq!(trainer.train().unwrap(), RunOutcome::EpochLimit);
    assert_eq!(trainer.state().epoch, 30);
    assert_eq!(trainer.state().history.len(), 3);
}

#[test]
fn test_reset_while_paused() {
    let config = TrainConfig {
        max_epochs: usize::MAX,
        print_epochs: 1000,
        min_error: 0.0,
        ..xor_config()
    };
    let mut trainer = Trainer::new(config).unwrap();
    trainer.set_training_set(xor(4)).unwrap();
    let control = trainer.control();

    let handle = spawn(trainer);
    wait_for(&control, 5);
    control.request_pause();
    let (mut trainer, _) = handle.join().unwrap();
    assert_eq!(control.status(), TrainingStatus::Paused);

    trainer.reset();
    assert_eq!(control.status(), TrainingStatus::Idle);
    assert_eq!(control.epoch(), 0);
}

#[test]
fn test_settings_validated() {
    let mut trainer = Trainer::new(xor_config()).unwrap();
    assert!(trainer.set_learning_rate(1.5).is_err());
    assert!(trainer.set_momentum(-0.1).is_err());
    trainer.set_learning_rate(0.25).unwrap();
    assert_eq!(trainer.config().learning_rate, 0.25);
}

// =============================================================================
// Dropout
// =============================================================================

#[test]
fn test_dropout_run_scales_weights() {
    let config = TrainConfig {
        max_epochs: 200,
        print_epochs: 50,
        min_error: 0.0,
        dropout: Some(DropoutConfig { alignment: 8 }),
        ..xor_config()
    };
    let mut trainer = Trainer::new(config).unwrap();
    trainer.set_training_set(xor(16)).unwrap();
    assert_eq!(trainer.train().unwrap(), RunOutcome::EpochLimit);
    assert_eq!(trainer.state().history.len(), 4);
    assert!(trainer.state().history.iter().all(|r| r.train_cross_entropy.is_finite()));

    let net = trainer.network_mut().unwrap();
    assert!(net.dropout_scaled());
    let host = net.weights().to_vec();
    net.sync_host().unwrap();
    assert_eq!(net.weights(), &host[..], "host and device agree after a run");

    // continuing with dropout undoes the scaling first, without it keeps the weights
    let config = TrainConfig {
        dropout: None,
        max_epochs: 10,
        print_epochs: 10,
        ..trainer.config().clone()
    };
    trainer.set_config(config).unwrap();
    trainer.train().unwrap();
    assert!(!trainer.network().unwrap().dropout_scaled());
}
