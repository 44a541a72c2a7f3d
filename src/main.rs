use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracer_mqtt_bridge::config::Config;
use tracer_mqtt_bridge::controller::Controller;
use tracer_mqtt_bridge::error::Result;
use tracer_mqtt_bridge::publish::MqttBus;
use tracer_mqtt_bridge::scheduler::{PollScheduler, SchedulerSettings};

/// Publish Tracer SC points and climate sets to MQTT.
#[derive(Parser, Debug)]
#[command(name = "tracer-mqtt-bridge", version, about)]
struct Cli {
    /// Configuration file (defaults to config.yml, then config.yaml)
    #[arg(short, long, env = "TRACER_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single discovery and poll cycle, then exit
    #[arg(long)]
    once: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {
            info!("Tracer MQTT Bridge stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting Tracer MQTT Bridge");

    let config = Config::load(cli.config.as_deref())?;
    log::set_max_level(config.bridge.log_level.filter());
    info!("Configuration loaded:");
    info!("  Controllers: {}", config.tracers.len());
    info!("  MQTT broker: {}:{}", config.mqtt.server, config.mqtt.port);
    info!("  Base topic: {}", config.mqtt.base_topic);
    info!("  Poll interval: {}s", config.bridge.poll_interval);

    let transport_settings = config.bridge.transport_settings();
    let controllers = config
        .tracers
        .iter()
        .map(|tracer| Controller::from_config(tracer, transport_settings.clone()).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let shutdown = CancellationToken::new();
    let bus = MqttBus::new(&config.mqtt);
    let publisher = Arc::new(bus.publisher());
    let mut bus_task = tokio::spawn(bus.run(shutdown.clone()));

    let mut scheduler = PollScheduler::new(
        controllers,
        publisher,
        SchedulerSettings::from_config(&config),
    );
    scheduler.discover().await;

    if cli.once {
        let result = scheduler.run_cycle().await.map(|summary| {
            info!(
                "[Poll] Published {} points and {} climate sets",
                summary.points_published, summary.climate_published
            );
        });
        shutdown.cancel();
        return result.and(flatten(bus_task.await));
    }

    let mut scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));
    info!("Tracer MQTT Bridge is running, press Ctrl+C to exit");

    let outcome = tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            Ok(())
        }
        result = &mut bus_task => flatten(result),
        result = &mut scheduler_task => flatten(result),
    };

    shutdown.cancel();
    finish(bus_task).await;
    finish(scheduler_task).await;
    outcome
}

fn flatten(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result?
}

/// Wait for a task that has not already been awaited.
async fn finish(task: JoinHandle<Result<()>>) {
    if task.is_finished() {
        return;
    }
    if let Err(e) = flatten(task.await) {
        error!("{}", e);
    }
}
