use anyhow::{Context, Result};
use channel_registry::{
    ChannelRegistry, ChannelUpdate, DeviceManager, MemoryRegistry, TokioScheduler,
};
use clap::Parser;
use filter_channels::{load_config_file, EngineConfig, FilterEngine, Services};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

mod sim;

const DEFAULT_CONFIG: &str = include_str!("../config/filters.yaml");

#[derive(Parser, Debug)]
#[command(name = "filter-daemon", version)]
#[command(about = "Run filter channel factories over simulated device drivers")]
struct Args {
    /// Engine config (YAML or JSON); the bundled sample config when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of simulated boilers
    #[arg(long, default_value_t = 2)]
    devices: usize,

    /// Seconds before simulated device instances register
    #[arg(long, default_value_t = 5.0)]
    device_delay_secs: f64,

    /// Milliseconds between simulated samples
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,

    /// Exit after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print metrics in Prometheus text format on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => serde_yaml::from_str::<EngineConfig>(DEFAULT_CONFIG)
            .context("parsing bundled config")?,
    };
    info!(
        factories = config.factories.len(),
        retry_attempts = config.retry.attempts,
        "filter-daemon starting"
    );

    let channels: Arc<dyn ChannelRegistry> = Arc::new(MemoryRegistry::new());
    let devices = Arc::new(DeviceManager::new(channels.clone()));
    let services = Services {
        channels: channels.clone(),
        instances: devices.clone(),
        scheduler: Arc::new(TokioScheduler::new(Handle::current())),
    };

    log_derived_channels(&channels);

    let engine = FilterEngine::from_config(&config, services)?;
    for factory in engine.factories() {
        info!(
            factory = factory.name(),
            kind = factory.kind_name(),
            filter = %factory.filter(),
            "filter factory configured"
        );
    }
    engine.start();

    let sim = sim::spawn(
        sim::SimConfig {
            devices: args.devices,
            tick: Duration::from_millis(args.tick_ms.max(1)),
            instance_delay: Duration::from_secs_f64(args.device_delay_secs.max(0.0)),
        },
        channels.clone(),
        devices,
    )?;

    match args.duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        }
    }

    sim.abort();
    engine.stop();
    for factory in engine.factories() {
        for (source, derived) in factory.bindings() {
            info!(factory = factory.name(), %source, %derived, "binding");
        }
    }
    if args.metrics {
        print!("{}", engine.metrics().encode_text());
    }
    info!("filter-daemon shutting down");
    Ok(())
}

/// Log every sample published on a `_`-prefixed derived channel.
fn log_derived_channels(channels: &Arc<dyn ChannelRegistry>) {
    let weak: Weak<dyn ChannelRegistry> = Arc::downgrade(channels);
    channels.subscribe_new_channels(Arc::new(move |name: &str| {
        let derived = name
            .split_once('.')
            .map(|(_, prop)| prop.starts_with('_'))
            .unwrap_or(false);
        if !derived {
            return;
        }
        let Some(channels) = weak.upgrade() else {
            return;
        };
        channels.subscribe(
            name,
            Arc::new(|update: &ChannelUpdate| {
                info!(
                    channel = %update.channel,
                    value = %update.sample.value,
                    unit = %update.sample.unit,
                    "derived sample"
                );
            }),
        );
    }));
}

fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
