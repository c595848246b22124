use agentsim_kernel::{KernelConfig, DEFAULT_PHASES};
use agentsim_lab::{Agent, CounterAgent, Experiment, SimLogger};
use agentsim_persist::CheckpointStore;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentsim", about = "Deterministic agent simulation runner")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and kernel defaults
    Info,
    /// Run a counter-agent experiment and print the final counters
    Run {
        #[command(flatten)]
        sim: SimArgs,
        /// Write the experiment event log as JSON Lines
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Check that repeated and resumed runs agree bit for bit
    Verify {
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Run, save a checkpoint into a store, reload and verify it
    Checkpoint {
        #[command(flatten)]
        sim: SimArgs,
        /// Checkpoint store directory
        #[arg(short, long)]
        dir: PathBuf,
    },
}

#[derive(Args, Clone)]
struct SimArgs {
    /// YAML kernel config (seed, phases)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Master seed; overrides the config file
    #[arg(short, long)]
    seed: Option<u64>,
    /// Number of ticks to run
    #[arg(short, long, default_value = "10")]
    ticks: u64,
    /// Number of counter agents
    #[arg(short, long, default_value = "3")]
    agents: usize,
}

impl SimArgs {
    fn kernel_config(&self) -> anyhow::Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                KernelConfig::from_yaml_str(&text)?
            }
            None => KernelConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

type Agents = Vec<Rc<RefCell<CounterAgent>>>;

fn build(config: &KernelConfig, agents: usize) -> anyhow::Result<(Experiment, Agents)> {
    let mut exp = Experiment::from_config(config)?;
    let mut handles = Vec::with_capacity(agents);
    for i in 0..agents {
        let agent = CounterAgent::shared(format!("a{i}"));
        exp.add_agent(agent.clone(), None)?;
        handles.push(agent);
    }
    Ok((exp, handles))
}

fn counters(agents: &Agents) -> Vec<u64> {
    agents.iter().map(|a| a.borrow().counter().to_bits()).collect()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("agentsim v{}", env!("CARGO_PKG_VERSION"));
            println!("default phases: {}", DEFAULT_PHASES.join(", "));
            println!("stream algorithm: {}", agentsim_kernel::rng::STREAM_ALGORITHM);
            println!(
                "snapshot schema: {} v{}",
                agentsim_kernel::snapshot::SNAPSHOT_MAGIC,
                agentsim_kernel::snapshot::SNAPSHOT_SCHEMA_VERSION
            );
        }
        Commands::Run { sim, events } => {
            let config = sim.kernel_config()?;
            let (mut exp, agents) = build(&config, sim.agents)?;
            exp.attach_logger(SimLogger::new());
            exp.run(sim.ticks)?;

            println!("seed={} time={}", config.seed, exp.kernel().time());
            for agent in &agents {
                let agent = agent.borrow();
                println!("{}: {:.12}", agent.id(), agent.counter());
            }
            if let (Some(path), Some(logger)) = (events, exp.logger()) {
                logger.export_jsonl(&path)?;
                println!("events written to {}", path.display());
            }
        }
        Commands::Verify { sim } => {
            let config = sim.kernel_config()?;
            let half = sim.ticks / 2;

            let (mut first, first_agents) = build(&config, sim.agents)?;
            first.run(sim.ticks)?;

            let (mut second, second_agents) = build(&config, sim.agents)?;
            second.run(sim.ticks)?;

            let (mut paused, _) = build(&config, sim.agents)?;
            paused.run(half)?;
            let checkpoint = paused.snapshot()?;
            let fresh = KernelConfig {
                seed: 0,
                phases: config.phases.clone(),
            };
            let (mut resumed, resumed_agents) = build(&fresh, sim.agents)?;
            resumed.restore(&checkpoint)?;
            resumed.run(sim.ticks - half)?;

            let repeat_ok = counters(&first_agents) == counters(&second_agents)
                && first.kernel().time() == second.kernel().time();
            let resume_ok = counters(&first_agents) == counters(&resumed_agents)
                && first.kernel().export_state() == resumed.kernel().export_state();
            println!("repeat run: {}", if repeat_ok { "OK" } else { "MISMATCH" });
            println!(
                "resume at tick {half}: {}",
                if resume_ok { "OK" } else { "MISMATCH" }
            );
            if !(repeat_ok && resume_ok) {
                anyhow::bail!("runs diverged");
            }
        }
        Commands::Checkpoint { sim, dir } => {
            let config = sim.kernel_config()?;
            let (mut exp, _) = build(&config, sim.agents)?;
            exp.run(sim.ticks)?;

            let mut store = CheckpointStore::open(&dir)?;
            tracing::info!(dir = %dir.display(), "writing checkpoint");
            let index = store.save(&exp.snapshot()?)?;
            store.verify_integrity()?;
            let loaded = store.load(index)?;
            println!(
                "checkpoint {index}: time={}, agents={}, store={}",
                loaded.kernel_time()?,
                loaded.agent_states.len(),
                store.root().display()
            );
        }
    }

    Ok(())
}
