//! ElasticGoose - elastic training state tools
//!
//! CLI entry point for discovery checks, port selection and the in-process
//! elastic training simulation.

use std::fs;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use eyre::{Context, Result, eyre};
use serde_json::json;
use tracing::info;

use elasticgoose::cli::{Cli, Command, OutputFormat};
use elasticgoose::config::Config;
use elasticgoose::coordinator::RecoveryReport;
use elasticgoose::discovery::{DiscoveryScript, NodeDiscovery};
use elasticgoose::domain::{HostInfo, Model, NamedTensors, Optimizer, OptimizerState, Tensor};
use elasticgoose::driver::DriverEvent;
use elasticgoose::network::bind_free_port;
use elasticgoose::notification::HostsUpdated;
use elasticgoose::state::{State, StateManager, StateResponse};
use elasticgoose::LocalCluster;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elasticgoose")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("elasticgoose.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "ElasticGoose loaded config: sync_timeout_ms={}, root_rank={}",
        config.elastic.sync_timeout_ms, config.elastic.root_rank
    );

    match cli.command {
        Some(Command::Hosts { script, format }) => cmd_hosts(&config, script, format).await,
        Some(Command::Port) => cmd_port(&config).await,
        Some(Command::Simulate {
            workers,
            epochs,
            fail_at,
        }) => cmd_simulate(&config, workers, epochs, fail_at).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run discovery once
async fn cmd_hosts(config: &Config, script: Option<String>, format: OutputFormat) -> Result<()> {
    let script = script
        .or_else(|| config.discovery.script.clone())
        .ok_or_else(|| eyre!("No discovery script given and none configured"))?;

    let discovery = DiscoveryScript::new(script, config.discovery.default_slots);
    let hosts = discovery.enumerate_hosts().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&hosts)?);
        }
        OutputFormat::Text => {
            if hosts.is_empty() {
                println!("No hosts found");
            }
            for host in &hosts {
                println!("{}", host);
            }
        }
    }
    Ok(())
}

/// Bind a free port from the configured range
async fn cmd_port(config: &Config) -> Result<()> {
    let (_listener, port) = bind_free_port(config.network.min_port, config.network.max_port).await?;
    println!("{}", port);
    Ok(())
}

fn worker_state(_rank: usize) -> StateResponse<State> {
    let mut params = NamedTensors::new();
    params.insert("weight".to_string(), Tensor::zeros(vec![4]));
    params.insert("bias".to_string(), Tensor::zeros(vec![1]));

    State::builder()
        .model(Model::new(params))
        .optimizer(Optimizer::new(OptimizerState::with_lr(0.01)))
        .value("epoch", json!(0))
        .build()
}

/// One epoch of pretend training: nudge every weight and advance counters
async fn train_epoch(state: &StateManager, epoch: usize) -> Result<()> {
    state
        .update(move |s| -> StateResponse<()> {
            if let Some(model) = s.model("model") {
                model.update(|params| params.values_mut().for_each(|t| t.map_inplace(|x| x + 1.0)))?;
            }
            if let Some(optimizer) = s.optimizer("optimizer") {
                optimizer.update(|o| o.step += 1)?;
            }
            s.set("epoch", json!(epoch))
        })
        .await??;
    Ok(())
}

fn print_reports(reports: &[RecoveryReport]) {
    for report in reports {
        match &report.outcome {
            Ok(action) => println!("  worker {}: {:?}", report.rank, action),
            Err(e) => println!("  worker {}: failed: {}", report.rank, e),
        }
    }
}

/// Run the in-process elastic training simulation
async fn cmd_simulate(config: &Config, workers: usize, epochs: usize, fail_at: Option<usize>) -> Result<()> {
    let mut cluster = LocalCluster::spawn(workers, worker_state, &config.elastic)?;

    // Every worker starts from the root's state
    let hosts: Vec<HostInfo> = (0..workers).map(|rank| HostInfo::new(format!("local-{}", rank), 1)).collect();
    if let Some(update) = HostsUpdated::diff(&[], &hosts) {
        println!("Initial sync across {} workers", workers);
        print_reports(&cluster.raise(DriverEvent::MembershipChanged(update)).await?);
    }
    cluster.commit_all().await?;

    let mut failed = false;
    let mut epoch = 1;
    while epoch <= epochs {
        for worker in cluster.workers() {
            train_epoch(worker.state(), epoch).await?;
        }

        if fail_at == Some(epoch) && !failed {
            failed = true;
            println!("Epoch {}: injecting node failure", epoch);
            let reports = cluster
                .raise(DriverEvent::NodeInternalError {
                    host: "local-0".to_string(),
                    reason: "injected failure".to_string(),
                })
                .await?;
            print_reports(&reports);
            continue;
        }

        cluster.commit_all().await?;
        println!("Epoch {}: committed", epoch);
        epoch += 1;
    }

    println!();
    println!("Recovered state");
    println!("---------------");
    for worker in cluster.workers() {
        let (epoch, weight, step) = worker
            .state()
            .update(|s| -> StateResponse<(serde_json::Value, f32, u64)> {
                let epoch = s.get_as::<serde_json::Value>("epoch")?;
                let weight = match s.model("model") {
                    Some(m) => m.read(|p| p.values().flat_map(|t| t.data.iter()).sum::<f32>())?,
                    None => 0.0,
                };
                let step = match s.optimizer("optimizer") {
                    Some(o) => o.read(|o| o.step)?,
                    None => 0,
                };
                Ok((epoch, weight, step))
            })
            .await??;
        println!(
            "  worker {}: epoch={} weight_sum={} optimizer_step={}",
            worker.rank(),
            epoch,
            weight,
            step
        );
    }

    let stats = cluster.shutdown().await?;
    println!();
    for (rank, s) in stats.iter().enumerate() {
        println!("  worker {}: {}", rank, s);
    }
    Ok(())
}
