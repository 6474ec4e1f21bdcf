use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use probe_monitoring::{
    ProbeEndpoint,
    actors::Scheduler,
    config::{Config, NotifierConfig, StorageConfig, read_config_file},
    events::{EngineEvent, EventKind},
    notifier::{NoopNotifier, Notifier, WebhookNotifier},
    probe::{ProbeTransport, TcpProbeClient},
    storage::{MemoryRepository, Repository},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Log level for this crate (error, warn, info, debug, trace)
    #[arg(long, default_value = "trace")]
    log_level: LevelFilter,

    /// Poll a single endpoint (`ip` or `ip:port`), print the readings and exit
    #[arg(long)]
    probe: Option<String>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("probe_monitoring", level),
        ("probe_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    }
    .apply_env();

    if let Some(target) = &args.probe {
        return probe_once(&config, target).await;
    }

    let repository = open_repository(&config).await?;
    seed_probes(repository.as_ref(), &config).await?;

    let notifier = build_notifier(&config)?;
    let transport: Arc<dyn ProbeTransport> = Arc::new(TcpProbeClient::new());

    let scheduler = Scheduler::new(config.polling.clone(), repository, transport, notifier);
    let event_logger = tokio::spawn(log_events(
        scheduler.subscribe(&[EventKind::DataSaved, EventKind::TemperatureUpdate]),
    ));

    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    scheduler.stop().await;
    event_logger.abort();

    let stats = scheduler.dispatch_stats();
    debug!("notification dispatch: {stats:?}");

    let mut states: Vec<_> = scheduler.alert_states().snapshot().into_iter().collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, classification) in states.iter().filter(|(_, c)| c.is_alert()) {
        warn!("{key} still in {} state at shutdown", classification.code());
    }
    debug!("{} probe state(s) tracked at shutdown", states.len());

    Ok(())
}

async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn Repository>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory repository (no persistence)");
            Ok(Arc::new(MemoryRepository::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let repository = probe_monitoring::storage::sqlite::SqliteRepository::new(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(repository))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requires the `storage-sqlite` feature")
        }
    }
}

async fn seed_probes(repository: &dyn Repository, config: &Config) -> anyhow::Result<()> {
    let Some(probes) = &config.probes else {
        return Ok(());
    };

    for probe in probes {
        repository
            .upsert_probe_config(probe)
            .await
            .with_context(|| format!("failed to store probe config {}", probe.key()))?;
    }
    info!("seeded {} probe config(s)", probes.len());
    Ok(())
}

fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notifier {
        Some(NotifierConfig::LegacyApi { url, token }) => {
            let notifier = WebhookNotifier::new(url.clone(), token.clone())
                .context("failed to build legacy API client")?;
            if notifier.is_enabled() {
                info!("legacy API notifications enabled ({url})");
            } else {
                warn!("legacy API configured without url or token, notifications disabled");
            }
            Ok(Arc::new(notifier))
        }
        None => {
            info!("no notifier configured");
            Ok(Arc::new(NoopNotifier))
        }
    }
}

async fn log_events(mut subscription: probe_monitoring::events::Subscription) {
    while let Some(event) = subscription.recv().await {
        match event {
            EngineEvent::DataSaved(saved) => {
                info!("data saved: {} reading(s), {} error(s)", saved.saved, saved.errors);
            }
            EngineEvent::TemperatureUpdate(snapshot) => {
                for update in snapshot {
                    trace!(
                        "{}: {:.2} [{}] at {}",
                        update.name,
                        update.value,
                        update.classification.code(),
                        update.timestamp
                    );
                }
            }
        }
    }
}

async fn probe_once(config: &Config, target: &str) -> anyhow::Result<()> {
    let endpoint = match target.rsplit_once(':') {
        Some((ip, port)) => ProbeEndpoint::new(
            ip,
            port.parse()
                .with_context(|| format!("invalid port in {target}"))?,
        ),
        None => ProbeEndpoint::new(target, config.polling.port),
    };

    let timeout = config.polling.save_timeout();
    let response = TcpProbeClient::new()
        .poll(&endpoint, &config.polling.command, timeout)
        .await
        .inspect_err(|e| error!("{endpoint}: {e}"))
        .with_context(|| format!("failed to poll {endpoint}"))?;

    println!(
        "{endpoint}: {}",
        probe_monitoring::protocol::hex_dump(&response.frame)
    );
    for reading in &response.readings {
        let fault = if reading.is_sensor_fault() {
            " (sensor fault)"
        } else {
            ""
        };
        println!(
            "  probe {} [{}]: raw {} -> {:.2}{fault}",
            reading.probe_no, reading.mcu_id, reading.raw_value, reading.temperature
        );
    }

    Ok(())
}
