//! Training orchestration.
//!
//! [`Trainer`] owns the configuration, the network and the data sets and
//! drives the epoch loop. [`TrainingControl`] is the part shared with other
//! threads: run status, epoch counter and the cooperative pause/stop flags,
//! which the loop checks once per epoch.
//!
//! # Status
//!
//! ```text
//! Idle ──train()──▶ Running ──pause──▶ Paused ──train()──▶ Running
//!                      │
//!                      ├──stop──▶ Stopping ──▶ Idle
//!                      └──converged / epoch limit──▶ Idle
//! ```
//!
//! Pausing keeps the epoch counter and history so the next run resumes;
//! any other exit makes the next run start again from epoch 0.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::default_backend;
use crate::config::TrainConfig;
use crate::data::{self, DataSet};
use crate::dropout::DropoutState;
use crate::error::{FlatnetError, FlatnetResult};
use crate::kernels::Dispatcher;
use crate::minibatch::MinibatchLoader;
use crate::network::{Network, Parameters, PassLayout, UpdateStep, Workspace};
use crate::topology::NetworkTopology;

/// Sleep between polls of [`TrainingControl::wait_idle`].
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Run status of a trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrainingStatus {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopping = 3,
}

impl TrainingStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TrainingStatus::Running,
            2 => TrainingStatus::Paused,
            3 => TrainingStatus::Stopping,
            _ => TrainingStatus::Idle,
        }
    }
}

impl std::fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrainingStatus::Idle => "idle",
            TrainingStatus::Running => "running",
            TrainingStatus::Paused => "paused",
            TrainingStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Status and flags shared between the training thread and its callers.
#[derive(Debug)]
pub struct TrainingControl {
    status: AtomicU8,
    stop: AtomicBool,
    pause: AtomicBool,
    epoch: AtomicUsize,
}

impl Default for TrainingControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingControl {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(TrainingStatus::Idle as u8),
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            epoch: AtomicUsize::new(0),
        }
    }

    pub fn status(&self) -> TrainingStatus {
        TrainingStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Running or winding down.
    pub fn is_active(&self) -> bool {
        matches!(self.status(), TrainingStatus::Running | TrainingStatus::Stopping)
    }

    /// Epochs completed in the current (or last) run.
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Asks a running loop to exit and reset at the next epoch boundary.
    pub fn request_stop(&self) {
        if self
            .status
            .compare_exchange(
                TrainingStatus::Running as u8,
                TrainingStatus::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.stop.store(true, Ordering::Release);
        }
    }

    /// Asks a running loop to exit at the next epoch boundary, keeping its
    /// progress.
    pub fn request_pause(&self) {
        if self.status() == TrainingStatus::Running {
            self.pause.store(true, Ordering::Release);
        }
    }

    /// Spins until no run is active.
    pub fn wait_idle(&self) {
        while self.is_active() {
            std::thread::sleep(IDLE_POLL);
        }
    }

    /// Idle or Paused -> Running. False if a run is already active.
    fn begin(&self) -> bool {
        for from in [TrainingStatus::Idle, TrainingStatus::Paused] {
            if self
                .status
                .compare_exchange(
                    from as u8,
                    TrainingStatus::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.stop.store(false, Ordering::Release);
                self.pause.store(false, Ordering::Release);
                return true;
            }
        }
        false
    }

    fn stop_requested(&self) -> bool {
        self.stop.swap(false, Ordering::AcqRel)
    }

    fn pause_requested(&self) -> bool {
        self.pause.swap(false, Ordering::AcqRel)
    }

    fn end(&self, status: TrainingStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }
}

/// One periodic evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_cross_entropy: f32,
    pub train_accuracy: f32,
    pub test_cross_entropy: Option<f32>,
    pub test_accuracy: Option<f32>,
    pub l2_norm: f32,
}

/// Progress of the current run, mutated only by the training loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingState {
    pub epoch: usize,
    pub momentum: f32,
    pub cross_entropy: f32,
    pub train_accuracy: f32,
    pub test_accuracy: Option<f32>,
    pub history: Vec<EpochRecord>,
}

impl TrainingState {
    /// Text chart of the training cross-entropy over the recorded history,
    /// at most `rows` lines with bars up to `width` characters.
    pub fn plot(&self, rows: usize, width: usize) -> String {
        if self.history.is_empty() {
            return "no evaluations recorded\n".to_string();
        }
        let step = self.history.len().div_ceil(rows.max(1));
        let picked: Vec<&EpochRecord> = self.history.iter().step_by(step).collect();
        let max = picked
            .iter()
            .map(|r| r.train_cross_entropy)
            .fold(f32::MIN_POSITIVE, f32::max);

        let mut out = String::new();
        for r in picked {
            let len = ((r.train_cross_entropy / max) * width as f32).round() as usize;
            out.push_str(&format!(
                "{:>8} | {:<width$} | {:.6}",
                r.epoch,
                "#".repeat(len.min(width)),
                r.train_cross_entropy,
                width = width
            ));
            if let Some(acc) = r.test_accuracy {
                out.push_str(&format!("  test {:.2}%", acc * 100.0));
            }
            out.push('\n');
        }
        out
    }
}

/// Why a call to [`Trainer::train`] returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    /// Another run was active; nothing happened.
    AlreadyRunning,
    /// Training cross-entropy fell below the configured minimum.
    Converged { epoch: usize, cross_entropy: f32 },
    /// `max_epochs` reached.
    EpochLimit,
    Paused,
    Stopped,
}

/// Buffers and workers that exist only while a run is active.
struct Session {
    loader: MinibatchLoader,
    batch: Workspace,
    layout: PassLayout,
    train_eval: Workspace,
    test_eval: Option<Workspace>,
    dropout: Option<DropoutState>,
    training_rows: usize,
}

impl Session {
    fn open(
        network: &mut Network,
        config: &TrainConfig,
        train: &Arc<DataSet>,
        test: Option<&Arc<DataSet>>,
    ) -> FlatnetResult<Self> {
        let topology = network.topology().clone();
        let layers = topology.layers().to_vec();
        let sample_seed = config.seed.map(|s| s.wrapping_add(1));
        let dropout_seed = config.seed.map(|s| s.wrapping_add(2));

        let loader = MinibatchLoader::new(Arc::clone(train), config.minibatch_size, sample_seed)?;
        let rows = loader.batch_size();
        let backend = network.dispatcher_mut().backend_mut();

        let dropout = match config.dropout {
            Some(cfg) => Some(DropoutState::new(&topology, cfg, dropout_seed, backend)?),
            None => None,
        };
        let capacity = match dropout {
            Some(ref d) => d.capacity_widths().to_vec(),
            None => layers.clone(),
        };
        let batch = Workspace::training(&capacity, rows, backend)?;

        let mut train_eval = Workspace::evaluation(&layers, train.rows(), backend)?;
        train_eval.load_rows(train.inputs(), train.targets(), backend)?;
        let test_eval = match test {
            Some(test) => {
                let mut ws = Workspace::evaluation(&layers, test.rows(), backend)?;
                ws.load_rows(test.inputs(), test.targets(), backend)?;
                Some(ws)
            }
            None => None,
        };

        log::debug!(
            "Session: batch {} of {} rows, capacity widths {:?}",
            rows,
            train.rows(),
            capacity
        );
        Ok(Self {
            loader,
            batch,
            layout: PassLayout::new(&layers, rows),
            train_eval,
            test_eval,
            dropout,
            training_rows: train.rows(),
        })
    }

    fn close(mut self, network: &mut Network) -> FlatnetResult<()> {
        self.loader.shutdown()?;
        let backend = network.dispatcher_mut().backend_mut();
        self.batch.release(backend);
        self.train_eval.release(backend);
        if let Some(ws) = self.test_eval {
            ws.release(backend);
        }
        match self.dropout {
            Some(dropout) => {
                dropout.release(backend);
                network.sync_device()?;
                network.apply_dropout_scaling()
            }
            None => network.sync_host(),
        }
    }
}

/// One gradient step on `params`: optional look-ahead, forward, backward,
/// undo look-ahead, update.
fn train_step(
    d: &mut Dispatcher,
    params: &Parameters,
    layout: &PassLayout,
    ws: &Workspace,
    config: &TrainConfig,
    step: &UpdateStep,
) -> FlatnetResult<()> {
    if config.nag {
        params.nag_preupdate(d, layout, step.momentum)?;
    }
    params.forward(d, layout, ws, config.output)?;
    params.backward(d, layout, ws)?;
    if config.nag {
        params.nag_postupdate(d, layout, step.momentum)?;
    }
    params.update(d, layout, ws, step)
}

/// Owns a network, its data sets and the training loop.
pub struct Trainer {
    config: TrainConfig,
    network: Option<Network>,
    training_set: Option<Arc<DataSet>>,
    test_set: Option<Arc<DataSet>>,
    state: TrainingState,
    control: Arc<TrainingControl>,
    prefer_gpu: bool,
    resume: bool,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> FlatnetResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            network: None,
            training_set: None,
            test_set: None,
            state: TrainingState::default(),
            control: Arc::new(TrainingControl::new()),
            prefer_gpu: false,
            resume: false,
        })
    }

    /// Networks created by this trainer use the GPU backend when available.
    pub fn set_prefer_gpu(&mut self, prefer_gpu: bool) {
        self.prefer_gpu = prefer_gpu;
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn control(&self) -> Arc<TrainingControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    pub fn network_mut(&mut self) -> Option<&mut Network> {
        self.network.as_mut()
    }

    pub fn training_set(&self) -> Option<&DataSet> {
        self.training_set.as_deref()
    }

    pub fn test_set(&self) -> Option<&DataSet> {
        self.test_set.as_deref()
    }

    fn ensure_idle(&self) -> FlatnetResult<()> {
        if self.control.is_active() {
            return Err(FlatnetError::TrainingActive);
        }
        Ok(())
    }

    /// Replaces the configuration.
    pub fn set_config(&mut self, config: TrainConfig) -> FlatnetResult<()> {
        self.ensure_idle()?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_learning_rate(&mut self, lr: f32) -> FlatnetResult<()> {
        let config = TrainConfig {
            learning_rate: lr,
            ..self.config.clone()
        };
        self.set_config(config)
    }

    pub fn set_momentum(&mut self, momentum: f32) -> FlatnetResult<()> {
        let config = TrainConfig {
            momentum,
            ..self.config.clone()
        };
        self.set_config(config)
    }

    fn create_network(&self, layers: &[usize]) -> FlatnetResult<Network> {
        let topology = NetworkTopology::new(layers.to_vec())?;
        Network::new(
            topology,
            self.config.weight_init,
            self.config.seed,
            default_backend(self.prefer_gpu),
        )
    }

    /// Installs a network. Data sets whose widths do not match are dropped.
    pub fn set_network(&mut self, network: Network) -> FlatnetResult<()> {
        self.ensure_idle()?;
        if let Some(ref train) = self.training_set {
            if !train.fits(network.topology()) {
                log::warn!("Training set does not fit {:?}; unloading it", network.topology().layers());
                self.training_set = None;
            }
        }
        if let Some(ref test) = self.test_set {
            if !test.fits(network.topology()) {
                log::warn!("Test set does not fit {:?}; unloading it", network.topology().layers());
                self.test_set = None;
            }
        }
        self.network = Some(network);
        self.reset();
        Ok(())
    }

    /// Installs a training set, creating a network from its declared layer
    /// widths when none fits.
    pub fn set_training_set(&mut self, data: DataSet) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let fits = self
            .network
            .as_ref()
            .map_or(false, |n| data.fits(n.topology()));
        if !fits {
            let network = self.create_network(data.layers())?;
            if let Some(ref test) = self.test_set {
                if !test.fits(network.topology()) {
                    log::warn!("Test set does not fit the new network; unloading it");
                    self.test_set = None;
                }
            }
            self.network = Some(network);
        }
        self.training_set = Some(Arc::new(data));
        self.reset();
        Ok(())
    }

    /// Installs a test set. It must match the current network.
    pub fn set_test_set(&mut self, data: DataSet) -> FlatnetResult<()> {
        self.ensure_idle()?;
        if let Some(ref network) = self.network {
            if !data.fits(network.topology()) {
                return Err(FlatnetError::data_mismatch(format!(
                    "test rows are {} -> {}, network is {:?}",
                    data.input_width(),
                    data.output_width(),
                    network.topology().layers()
                )));
            }
        }
        self.test_set = Some(Arc::new(data));
        Ok(())
    }

    pub fn load_training_set<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let data = data::load_training_set(path)?;
        self.set_training_set(data)
    }

    pub fn load_test_set<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let data = data::load_training_set(path)?;
        self.set_test_set(data)
    }

    /// Loads MNIST as training and test set. A new network gets `hidden`
    /// between the 784 inputs and 10 outputs.
    pub fn load_mnist<P: AsRef<Path>>(&mut self, dir: P, hidden: &[usize]) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let (train, test) = data::load_mnist(dir)?;
        let mut layers = vec![train.input_width()];
        layers.extend_from_slice(hidden);
        layers.push(train.output_width());
        self.test_set = None;
        self.set_training_set(train.with_layers(layers)?)?;
        self.set_test_set(test)
    }

    pub fn load_network<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let network = Network::load(path, default_backend(self.prefer_gpu))?;
        self.set_network(network)
    }

    fn require_network(&mut self) -> FlatnetResult<&mut Network> {
        self.network
            .as_mut()
            .ok_or_else(|| FlatnetError::invalid_topology("no network loaded"))
    }

    pub fn save_network<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        self.require_network()?.save(path)
    }

    /// Loads a weight vector into the current network.
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let values = data::load_weights(path)?;
        self.require_network()?.set_weight_vector(&values)?;
        self.reset();
        Ok(())
    }

    /// Saves weights followed by biases as a weight vector.
    pub fn save_weights<P: AsRef<Path>>(&mut self, path: P) -> FlatnetResult<()> {
        self.ensure_idle()?;
        let values = self.require_network()?.weight_vector();
        data::save_weights(path, &values)
    }

    /// Forgets run progress; the next run starts at epoch 0.
    pub fn reset(&mut self) {
        self.resume = false;
        self.state.epoch = 0;
        self.control.set_epoch(0);
        if self.control.status() == TrainingStatus::Paused {
            self.control.end(TrainingStatus::Idle);
        }
    }

    /// Runs the epoch loop until convergence, the epoch limit, or a pause
    /// or stop request. Returns at once if a run is already active.
    pub fn train(&mut self) -> FlatnetResult<RunOutcome> {
        if !self.control.begin() {
            return Ok(RunOutcome::AlreadyRunning);
        }
        let result = self.run();
        let status = match result {
            Ok(RunOutcome::Paused) => TrainingStatus::Paused,
            _ => TrainingStatus::Idle,
        };
        self.control.end(status);
        result
    }

    fn run(&mut self) -> FlatnetResult<RunOutcome> {
        self.config.validate()?;
        let train = self
            .training_set
            .clone()
            .ok_or(FlatnetError::MissingTrainingSet)?;
        let test = self.test_set.clone();
        if self.network.is_none() {
            self.network = Some(self.create_network(train.layers())?);
        }
        let config = self.config.clone();
        let mut network = self
            .network
            .take()
            .ok_or_else(|| FlatnetError::invalid_topology("no network loaded"))?;

        let result = self.run_with(&mut network, &config, &train, test.as_ref());
        self.network = Some(network);
        result
    }

    fn run_with(
        &mut self,
        network: &mut Network,
        config: &TrainConfig,
        train: &Arc<DataSet>,
        test: Option<&Arc<DataSet>>,
    ) -> FlatnetResult<RunOutcome> {
        if !train.fits(network.topology()) {
            return Err(FlatnetError::data_mismatch("training set does not fit the network"));
        }

        if !self.resume {
            self.state = TrainingState::default();
            network.reset_increments()?;
        }
        if config.dropout.is_some() {
            network.undo_dropout_scaling()?;
        } else if network.dropout_scaled() {
            network.forget_dropout_scaling();
        }

        log::info!(
            "Training {:?} from epoch {} (lr {}, momentum {}, batch {}, nag {}, dropout {})",
            network.topology().layers(),
            self.state.epoch,
            config.learning_rate,
            config.momentum,
            config.minibatch_size.min(train.rows()),
            config.nag,
            config.dropout.is_some()
        );

        let mut session = Session::open(network, config, train, test)?;
        let outcome = self.epochs(network, config, &mut session);
        let closed = session.close(network);
        let outcome = outcome?;
        closed?;

        self.resume = outcome == RunOutcome::Paused;
        if outcome == RunOutcome::Stopped {
            self.state.epoch = 0;
            self.control.set_epoch(0);
        }
        log::info!("Training {:?} at epoch {}", outcome, self.state.epoch);
        Ok(outcome)
    }

    fn epochs(
        &mut self,
        network: &mut Network,
        config: &TrainConfig,
        session: &mut Session,
    ) -> FlatnetResult<RunOutcome> {
        loop {
            if self.control.stop_requested() {
                return Ok(RunOutcome::Stopped);
            }
            if self.control.pause_requested() {
                return Ok(RunOutcome::Paused);
            }
            if self.state.epoch >= config.max_epochs {
                return Ok(RunOutcome::EpochLimit);
            }

            self.epoch(network, config, session)?;
            self.state.epoch += 1;
            self.control.set_epoch(self.state.epoch);

            if self.state.epoch % config.print_epochs == 0 {
                let record = self.evaluate(network, config, session)?;
                if record.train_cross_entropy < config.min_error {
                    return Ok(RunOutcome::Converged {
                        epoch: record.epoch,
                        cross_entropy: record.train_cross_entropy,
                    });
                }
            }
        }
    }

    fn epoch(&mut self, network: &mut Network, config: &TrainConfig, session: &mut Session) -> FlatnetResult<()> {
        let stage = session.loader.next_batch()?;
        let (d, full) = network.parts_mut();
        session
            .batch
            .load_rows(&stage.inputs, &stage.targets, d.backend_mut())?;

        let momentum = config.momentum_at(self.state.epoch);
        self.state.momentum = momentum;
        let step = UpdateStep {
            learning_rate: config.learning_rate,
            momentum,
            lambda: config.lambda,
            training_rows: session.training_rows,
        };

        match session.dropout.as_mut() {
            Some(dropout) => {
                dropout.dropout_neurons(full, d.backend_mut())?;
                let layout = dropout.layout(session.batch.rows());
                train_step(d, dropout.params(), &layout, &session.batch, config, &step)?;
                dropout.update_from_last_dropout(full, d.backend_mut())
            }
            None => train_step(d, full, &session.layout, &session.batch, config, &step),
        }
    }

    fn evaluate(
        &mut self,
        network: &mut Network,
        config: &TrainConfig,
        session: &mut Session,
    ) -> FlatnetResult<EpochRecord> {
        if let Some(ref dropout) = session.dropout {
            let (d, full) = network.parts_mut();
            dropout.transfer_all_weights(full, d)?;
        }
        let train_eval = network.evaluate(&mut session.train_eval, config.output)?;
        let test_eval = match session.test_eval.as_mut() {
            Some(ws) => Some(network.evaluate(ws, config.output)?),
            None => None,
        };
        let l2_norm = network.l2_norm()?;

        let record = EpochRecord {
            epoch: self.state.epoch,
            train_cross_entropy: train_eval.cross_entropy,
            train_accuracy: train_eval.accuracy,
            test_cross_entropy: test_eval.map(|e| e.cross_entropy),
            test_accuracy: test_eval.map(|e| e.accuracy),
            l2_norm,
        };
        self.state.cross_entropy = record.train_cross_entropy;
        self.state.train_accuracy = record.train_accuracy;
        self.state.test_accuracy = record.test_accuracy;
        self.state.history.push(record);

        match test_eval {
            Some(t) => log::info!(
                "Epoch {}: CE {:.6}, train {:.2}%, test CE {:.6}, test {:.2}%, L2 {:.4}",
                record.epoch,
                record.train_cross_entropy,
                record.train_accuracy * 100.0,
                t.cross_entropy,
                t.accuracy * 100.0,
                l2_norm
            ),
            None => log::info!(
                "Epoch {}: CE {:.6}, train {:.2}%, L2 {:.4}",
                record.epoch,
                record.train_cross_entropy,
                record.train_accuracy * 100.0,
                l2_norm
            ),
        }
        Ok(record)
    }
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("status", &self.control.status())
            .field("epoch", &self.state.epoch)
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_transitions() {
        let control = TrainingControl::new();
        assert_eq!(control.status(), TrainingStatus::Idle);
        control.request_stop();
        assert!(!control.stop_requested(), "stop ignored while idle");

        assert!(control.begin());
        assert!(!control.begin(), "second begin rejected");
        control.request_pause();
        assert!(control.pause_requested());
        control.end(TrainingStatus::Paused);
        assert!(!control.is_active());

        assert!(control.begin());
        control.request_stop();
        assert_eq!(control.status(), TrainingStatus::Stopping);
        assert!(control.is_active());
        assert!(control.stop_requested());
        control.end(TrainingStatus::Idle);
        control.wait_idle();
    }

    #[test]
    fn test_plot_scales_bars() {
        let mut state = TrainingState::default();
        for (i, ce) in [1.0f32, 0.5, 0.25].iter().enumerate() {
            state.history.push(EpochRecord {
                epoch: (i + 1) * 10,
                train_cross_entropy: *ce,
                train_accuracy: 0.0,
                test_cross_entropy: None,
                test_accuracy: None,
                l2_norm: 0.0,
            });
        }
        let chart = state.plot(10, 8);
        let lines: Vec<&str> = chart.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("########"));
        assert!(lines[2].contains(&format!("| {:<8} |", "##")));
    }

    #[test]
    fn test_train_without_data() {
        let mut trainer = Trainer::new(TrainConfig::default()).unwrap();
        assert!(matches!(trainer.train(), Err(FlatnetError::MissingTrainingSet)));
        assert_eq!(trainer.control().status(), TrainingStatus::Idle);
    }
}
