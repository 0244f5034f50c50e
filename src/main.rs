mod aggregator;
mod channel;
mod config;
mod display;
mod poll;
mod sensors;
mod snapshot;

use aggregator::SensorAggregator;
use channel::publish_channel;
use clap::Parser;
use config::{Config, DisplayMode};
use display::{Display, DisplayOutcome};
use poll::{PollLoop, StopReason};
use sensors::system::SystemSensorsOptions;
use sensors::SystemSensors;
use std::io::{self, IsTerminal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hwoverlay")]
#[command(version)]
#[command(about = "CPU, GPU and RAM load and temperature at a glance")]
struct Cli {
    /// YAML config file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Sampling interval, e.g. `500ms` or `2s`.
    #[arg(long)]
    interval: Option<String>,
    /// Print one JSON object per snapshot instead of bars.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(interval) = cli.interval {
        cfg.interval = interval;
    }
    if cli.json {
        cfg.display.mode = DisplayMode::Json;
    }

    let (interval, refresh) = match cfg
        .validate()
        .and_then(|()| Ok((cfg.interval()?, cfg.display.refresh()?)))
    {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        interval_ms = interval.as_millis() as u64,
        refresh_ms = refresh.as_millis() as u64,
        mode = ?cfg.display.mode,
        "starting hwoverlay"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (publisher, subscriber) = publish_channel();

    let poll_task = {
        let sensors = SystemSensors::new(SystemSensorsOptions {
            nvidia_smi: cfg.sensors.nvidia_smi,
        });
        let poll = PollLoop::new(SensorAggregator::new(sensors), interval);
        tokio::spawn(poll.run(publisher, shutdown_rx.clone()))
    };

    let signal_task = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for Ctrl+C");
                return;
            }
            info!("received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(true);
        })
    };

    let stdout = io::stdout();
    let redraw_in_place = stdout.is_terminal();
    let mut display = Display::new(stdout, &cfg.display, refresh, redraw_in_place);
    let outcome = display.run(subscriber, shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    signal_task.abort();
    match poll_task.await {
        Ok(StopReason::Cancelled) => info!("poll loop stopped"),
        Ok(reason) => info!(reason = ?reason, "poll loop stopped"),
        Err(err) => warn!(error = %err, "poll loop task failed"),
    }

    match outcome {
        Ok(DisplayOutcome::Cancelled) => {}
        Ok(DisplayOutcome::Terminated(notice)) => {
            debug!(cause = ?notice.error, "monitoring stopped on a fatal error");
            eprintln!("{}", notice.message);
            std::process::exit(1);
        }
        Err(err) => {
            error!(error = %err, "display output failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
