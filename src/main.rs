//! Interactive trainer.
//!
//! Loads data and networks from the command line, then reads commands from
//! stdin while training runs on a background thread.
//!
//! # Usage
//!
//! ```bash
//! # XOR from a CSV training set, start immediately
//! flatnet --trainingset xor.csv --minibatch 4 --print-epochs 500 --run
//!
//! # MNIST with one hidden layer of 300 and dropout on the GPU
//! flatnet --mnist data/mnist --hidden 300 --dropout --gpu
//! ```
//!
//! Commands: `set lr|momentum <value>`, `load trainingset|testset|nn|weights|mnist "<path>"`,
//! `save nn|weights "<path>"`, `train run|pause|stop`, `plot`, `status`, `help`, `quit`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::Parser;
use flatnet::{
    DropoutConfig, FlatnetResult, MomentumSchedule, OutputActivation, RunOutcome, TrainConfig,
    Trainer, TrainingControl, TrainingStatus,
};

#[derive(Parser, Debug)]
#[command(name = "flatnet")]
#[command(about = "Train fully-connected networks on flat buffers")]
struct Args {
    /// Learning rate
    #[arg(long, default_value = "0.3")]
    lr: f32,

    /// Momentum coefficient
    #[arg(long, default_value = "0.9")]
    momentum: f32,

    /// Ramp momentum from 0.5 up to this value instead of using --momentum
    #[arg(long)]
    momentum_ramp: Option<f32>,

    /// Rows per minibatch
    #[arg(long, default_value = "128")]
    minibatch: usize,

    /// Epoch limit
    #[arg(long, default_value = "10000")]
    epochs: usize,

    /// Evaluate every this many epochs
    #[arg(long, default_value = "100")]
    print_epochs: usize,

    /// Stop once the training cross-entropy falls below this
    #[arg(long, default_value = "0.01")]
    min_error: f32,

    /// Disable the Nesterov look-ahead
    #[arg(long)]
    no_nag: bool,

    /// Drop hidden neurons with probability 1/2 each epoch
    #[arg(long)]
    dropout: bool,

    /// Compacted dropout widths are rounded up to a multiple of this
    #[arg(long, default_value = "16")]
    alignment: usize,

    /// L2 regularization strength
    #[arg(long, default_value = "0.0")]
    lambda: f32,

    /// Output activation: softmax or sigmoid
    #[arg(long, default_value = "softmax")]
    output: String,

    /// Seed for weight init, sampling and dropout
    #[arg(long)]
    seed: Option<u64>,

    /// Use the GPU backend when available
    #[arg(long)]
    gpu: bool,

    /// Hidden layer widths for MNIST networks
    #[arg(long, value_delimiter = ',', default_value = "300")]
    hidden: Vec<usize>,

    /// Training set file
    #[arg(long)]
    trainingset: Option<PathBuf>,

    /// Test set file
    #[arg(long)]
    testset: Option<PathBuf>,

    /// Saved network to start from
    #[arg(long)]
    nn: Option<PathBuf>,

    /// Weight vector to load into the network
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Directory holding the four MNIST idx files
    #[arg(long)]
    mnist: Option<PathBuf>,

    /// Start training right away
    #[arg(long)]
    run: bool,
}

impl Args {
    fn config(&self) -> Result<TrainConfig, String> {
        let output = match self.output.as_str() {
            "softmax" => OutputActivation::Softmax,
            "sigmoid" => OutputActivation::Sigmoid,
            other => return Err(format!("unknown output activation '{}'", other)),
        };
        Ok(TrainConfig {
            learning_rate: self.lr,
            momentum: self.momentum,
            momentum_schedule: match self.momentum_ramp {
                Some(max) => MomentumSchedule::Ramp { max },
                None => MomentumSchedule::Constant,
            },
            max_epochs: self.epochs,
            min_error: self.min_error,
            print_epochs: self.print_epochs,
            minibatch_size: self.minibatch,
            nag: !self.no_nag,
            dropout: self.dropout.then_some(DropoutConfig {
                alignment: self.alignment,
            }),
            lambda: self.lambda,
            output,
            seed: self.seed,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setting {
    LearningRate,
    Momentum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    TrainingSet,
    TestSet,
    Network,
    Weights,
    Mnist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrainAction {
    Run,
    Pause,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Set(Setting, f32),
    Load(Resource, PathBuf),
    Save(Resource, PathBuf),
    Train(TrainAction),
    Plot,
    Status,
    Help,
    Quit,
    Empty,
}

const HELP: &str = "\
Commands:
  set lr <value>                 learning rate in [0, 1]
  set momentum <value>           momentum in [0, 1]
  load trainingset \"<path>\"      training set file
  load testset \"<path>\"          test set file
  load nn \"<path>\"               saved network
  load weights \"<path>\"          weight vector
  load mnist \"<dir>\"             MNIST idx files
  save nn \"<path>\"
  save weights \"<path>\"
  train run|pause|stop
  plot                           cross-entropy history
  status
  quit";

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_resource(word: &str) -> Option<Resource> {
    match word {
        "trainingset" => Some(Resource::TrainingSet),
        "testset" => Some(Resource::TestSet),
        "nn" => Some(Resource::Network),
        "weights" => Some(Resource::Weights),
        "mnist" => Some(Resource::Mnist),
        _ => None,
    }
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let mut parts = line.splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or("");
    let object = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match verb {
        "" => Ok(Command::Empty),
        "set" => {
            let setting = match object {
                "lr" => Setting::LearningRate,
                "momentum" => Setting::Momentum,
                _ => return Err(format!("unknown setting '{}'", object)),
            };
            let value = rest
                .parse::<f32>()
                .map_err(|e| format!("invalid value '{}': {}", rest, e))?;
            Ok(Command::Set(setting, value))
        }
        "load" | "save" => {
            let resource =
                parse_resource(object).ok_or_else(|| format!("unknown resource '{}'", object))?;
            let path = unquote(rest);
            if path.is_empty() {
                return Err(format!("missing path for {} {}", verb, object));
            }
            if verb == "load" {
                Ok(Command::Load(resource, PathBuf::from(path)))
            } else if matches!(resource, Resource::Network | Resource::Weights) {
                Ok(Command::Save(resource, PathBuf::from(path)))
            } else {
                Err(format!("cannot save {}", object))
            }
        }
        "train" => match object {
            "run" => Ok(Command::Train(TrainAction::Run)),
            "pause" => Ok(Command::Train(TrainAction::Pause)),
            "stop" => Ok(Command::Train(TrainAction::Stop)),
            _ => Err(format!("unknown train action '{}'", object)),
        },
        "plot" => Ok(Command::Plot),
        "status" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        _ => Err(format!("unknown command '{}'", line)),
    }
}

type Run = JoinHandle<(Trainer, FlatnetResult<RunOutcome>)>;

/// The trainer is either here or on the training thread.
struct Shell {
    trainer: Option<Trainer>,
    running: Option<Run>,
    control: Arc<TrainingControl>,
    hidden: Vec<usize>,
}

impl Shell {
    fn new(trainer: Trainer, hidden: Vec<usize>) -> Self {
        Self {
            control: trainer.control(),
            trainer: Some(trainer),
            running: None,
            hidden,
        }
    }

    /// Joins a finished run and reports how it ended.
    fn reclaim(&mut self, block: bool) {
        let done = self
            .running
            .as_ref()
            .map_or(false, |h| block || h.is_finished());
        if !done {
            return;
        }
        let Some(handle) = self.running.take() else {
            return;
        };
        match handle.join() {
            Ok((trainer, result)) => {
                match result {
                    Ok(outcome) => report(&outcome, &trainer),
                    Err(e) => println!("Error: {}", e),
                }
                self.trainer = Some(trainer);
            }
            Err(_) => println!("Error: training thread panicked; the network is lost"),
        }
    }

    /// The idle trainer, or None (after printing why) while training runs.
    fn idle(&mut self) -> Option<&mut Trainer> {
        self.reclaim(false);
        if self.trainer.is_none() {
            println!("Error: NN training. Pause or stop training first.");
        }
        self.trainer.as_mut()
    }

    fn start(&mut self) {
        if self.idle().is_none() {
            return;
        }
        let Some(mut trainer) = self.trainer.take() else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name("training".into())
            .spawn(move || {
                let result = trainer.train();
                (trainer, result)
            });
        match spawned {
            Ok(handle) => {
                self.running = Some(handle);
                println!("Training started");
            }
            Err(e) => println!("Error: cannot start training thread: {}", e),
        }
    }

    fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Help => println!("{}", HELP),
            Command::Quit => {
                self.control.request_stop();
                self.reclaim(true);
                return false;
            }
            Command::Set(setting, value) => {
                if let Some(trainer) = self.idle() {
                    let result = match setting {
                        Setting::LearningRate => trainer.set_learning_rate(value),
                        Setting::Momentum => trainer.set_momentum(value),
                    };
                    match result {
                        Ok(()) => println!("{:?} = {}", setting, value),
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            Command::Load(resource, path) => {
                let hidden = self.hidden.clone();
                if let Some(trainer) = self.idle() {
                    let result = match resource {
                        Resource::TrainingSet => trainer.load_training_set(&path),
                        Resource::TestSet => trainer.load_test_set(&path),
                        Resource::Network => trainer.load_network(&path),
                        Resource::Weights => trainer.load_weights(&path),
                        Resource::Mnist => trainer.load_mnist(&path, &hidden),
                    };
                    match result {
                        Ok(()) => println!("Loaded {}", path.display()),
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            Command::Save(resource, path) => {
                if let Some(trainer) = self.idle() {
                    let result = match resource {
                        Resource::Weights => trainer.save_weights(&path),
                        _ => trainer.save_network(&path),
                    };
                    match result {
                        Ok(()) => println!("Saved {}", path.display()),
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            Command::Train(TrainAction::Run) => self.start(),
            Command::Train(TrainAction::Pause) => {
                if self.running.is_some() {
                    self.control.request_pause();
                    self.reclaim(true);
                } else {
                    println!("Training is not running");
                }
            }
            Command::Train(TrainAction::Stop) => {
                if self.running.is_some() {
                    self.control.request_stop();
                    self.reclaim(true);
                } else if let Some(trainer) = self.trainer.as_mut() {
                    trainer.reset();
                    println!("Training reset");
                }
            }
            Command::Plot => {
                if let Some(trainer) = self.idle() {
                    print!("{}", trainer.state().plot(20, 50));
                }
            }
            Command::Status => {
                self.reclaim(false);
                println!("Status: {}, epoch {}", self.control.status(), self.control.epoch());
                if let Some(ref trainer) = self.trainer {
                    let state = trainer.state();
                    if let Some(network) = trainer.network() {
                        println!("Network: {:?}", network.topology().layers());
                    }
                    if !state.history.is_empty() {
                        println!(
                            "CE {:.6}, train {:.2}%, momentum {}",
                            state.cross_entropy,
                            state.train_accuracy * 100.0,
                            state.momentum
                        );
                    }
                    if let Some(acc) = state.test_accuracy {
                        println!("Test accuracy {:.2}%", acc * 100.0);
                    }
                }
            }
        }
        true
    }
}

fn report(outcome: &RunOutcome, trainer: &Trainer) {
    match outcome {
        RunOutcome::Converged {
            epoch,
            cross_entropy,
        } => println!("Converged at epoch {} (CE {:.6})", epoch, cross_entropy),
        RunOutcome::EpochLimit => println!(
            "Epoch limit reached (CE {:.6})",
            trainer.state().cross_entropy
        ),
        RunOutcome::Paused => println!("Paused at epoch {}", trainer.state().epoch),
        RunOutcome::Stopped => println!("Stopped"),
        RunOutcome::AlreadyRunning => println!("Error: NN training."),
    }
}

fn preload(trainer: &mut Trainer, args: &Args) -> FlatnetResult<()> {
    if let Some(ref path) = args.nn {
        trainer.load_network(path)?;
    }
    if let Some(ref dir) = args.mnist {
        trainer.load_mnist(dir, &args.hidden)?;
    }
    if let Some(ref path) = args.trainingset {
        trainer.load_training_set(path)?;
    }
    if let Some(ref path) = args.testset {
        trainer.load_test_set(path)?;
    }
    if let Some(ref path) = args.weights {
        trainer.load_weights(path)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut trainer = Trainer::new(args.config()?)?;
    trainer.set_prefer_gpu(args.gpu);
    preload(&mut trainer, &args)?;

    let mut shell = Shell::new(trainer, args.hidden.clone());
    if args.run {
        shell.execute(Command::Train(TrainAction::Run));
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            // stdin closed: let an active run finish
            shell.reclaim(true);
            break;
        };
        match parse_command(&line?) {
            Ok(command) => {
                if !shell.execute(command) {
                    break;
                }
            }
            Err(msg) => println!("Error: {}. Type 'help' for commands.", msg),
        }
    }

    if shell.control.status() == TrainingStatus::Paused {
        log::info!("Exiting with training paused at epoch {}", shell.control.epoch());
    }
    Ok(())
}
