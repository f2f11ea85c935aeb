//! drivewatchd - The drivewatch on-vehicle agent
//!
//! This is the main entry point for the agent. It wires together:
//! - Configuration loading and command-line overrides
//! - Store initialization and device identity
//! - Provisioning from the central service
//! - Session engine fed by the badge scanner
//! - Periodic sync, telemetry and retention passes

use anyhow::{Context, Result};
use clap::Parser;
use drivewatch_api::{AlertLevel, DeviceConfig, OperationalState};
use drivewatch_config::{AgentConfig, load_config_or_default};
use drivewatch_core::{DriverRegistry, DurationStatus, Journal, Retention, SessionEngine};
use drivewatch_host_api::{Alerter, CloudClient, MetricsSource};
use drivewatch_host_linux::{
    ConsoleAlerter, SystemMetrics, SpoolUploader, machine_id, spawn_stdin_scanner,
};
use drivewatch_store::{SqliteStore, Store};
use drivewatch_sync::{HttpCloudClient, PassReport, SyncOrchestrator};
use drivewatch_util::{
    DATABASE_FILENAME, MonotonicInstant, Scheduler, Subsystem, VehicleId, default_config_path,
    AgentError, is_mock_time_active, now,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Scanner payload of the operator's acknowledgement card
const ACK_PAYLOAD: &str = "ack";

/// drivewatchd - Driver session and telemetry agent
#[derive(Parser, Debug)]
#[command(name = "drivewatchd")]
#[command(about = "On-vehicle driver session and telemetry agent", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/drivewatch/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set DRIVEWATCH_DATA_DIR env var)
    #[arg(short, long, env = "DRIVEWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Central service token override (or set DRIVEWATCH_TOKEN env var)
    #[arg(long, env = "DRIVEWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Vehicle plate to provision against
    #[arg(short, long)]
    plate: Option<String>,

    /// Do not read badge scans from stdin
    #[arg(long)]
    no_scanner: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main agent state
struct Service {
    config: AgentConfig,
    store: Arc<dyn Store>,
    engine: SessionEngine,
    journal: Journal,
    sync: SyncOrchestrator,
    retention: Retention,
    metrics: Arc<dyn MetricsSource>,
    alerter: Arc<dyn Alerter>,
    device: DeviceConfig,
    scheduler: Scheduler,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let mut config = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;
        apply_overrides(&mut config, args);

        info!(
            config_path = %args.config.display(),
            data_dir = %config.agent.data_dir.display(),
            base_url = %config.cloud.base_url,
            "Configuration loaded"
        );

        for dir in [
            &config.agent.data_dir,
            &config.agent.media_dir,
            &config.agent.spool_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }

        let db_path = config.agent.data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        info!(db_path = %db_path.display(), "Store initialized");

        let cloud: Arc<dyn CloudClient> = Arc::new(
            HttpCloudClient::new(&config.cloud).context("Failed to create cloud client")?,
        );
        let alerter: Arc<dyn Alerter> = Arc::new(ConsoleAlerter::new());
        let uploader = Arc::new(SpoolUploader::new(&config.agent.spool_dir));
        let metrics: Arc<dyn MetricsSource> = Arc::new(SystemMetrics::new(&config.agent.data_dir));

        let engine = SessionEngine::new(store.clone(), cloud.clone(), alerter.clone(), &config.session);
        let sync = SyncOrchestrator::new(
            store.clone(),
            cloud,
            uploader,
            DriverRegistry::new(store.clone(), config.session.driver_max_age),
            config.sync.clone(),
        );
        let retention = Retention::new(store.clone(), config.retention.clone());
        let journal = Journal::new(store.clone());

        let device = load_or_init_device(store.as_ref(), &config)?;
        info!(
            hardware_id = %device.hardware_id,
            vehicle_id = ?device.vehicle_id,
            state = device.state.as_str(),
            "Device identity"
        );

        let start = MonotonicInstant::now();
        let scheduler = Subsystem::ALL
            .into_iter()
            .fold(Scheduler::new(), |s, sub| s.with(sub, config.interval(sub), start));

        let mut service = Self {
            config,
            store,
            engine,
            journal,
            sync,
            retention,
            metrics,
            alerter,
            device,
            scheduler,
        };
        service.provision().await;

        let pending = service.engine.pending_alerts()?.len();
        if pending > 0 {
            info!(pending, "Unacknowledged alerts from previous runs");
        }

        Ok(service)
    }

    fn vehicle(&self) -> Option<VehicleId> {
        self.device
            .is_provisioned()
            .then_some(self.device.vehicle_id)
            .flatten()
    }

    /// Pull vehicle and drivers for the configured plate.
    ///
    /// Failure keeps the previous binding, if any, and is retried on the next
    /// session check while the device is still unprovisioned.
    async fn provision(&mut self) {
        let Some(plate) = self.config.agent.vehicle_plate.clone() else {
            if self.vehicle().is_none() {
                warn!("No vehicle plate configured and device not provisioned; scans are ignored");
            }
            return;
        };

        match self
            .sync
            .provision(
                &plate,
                &self.device.hardware_id,
                &self.config.agent.firmware_version,
                now(),
            )
            .await
        {
            Ok(_) => match self.store.load_device_config() {
                Ok(Some(device)) => self.device = device,
                Ok(None) => warn!("Device config missing after provisioning"),
                Err(e) => error!(error = %e, "Failed to reload device config"),
            },
            Err(e) if self.vehicle().is_some() => {
                warn!(plate = %plate, error = %e, "Provisioning refresh failed, using cached data");
            }
            Err(e) => {
                warn!(plate = %plate, error = %e, "Provisioning failed, will retry");
            }
        }
    }

    async fn run(mut self, no_scanner: bool) -> Result<()> {
        let (scan_tx, mut scan_rx) = mpsc::channel::<String>(32);
        let _scanner = if no_scanner {
            drop(scan_tx);
            None
        } else {
            Some(spawn_stdin_scanner(scan_tx))
        };

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;
        let mut sigusr1 = signal(SignalKind::user_defined1())
            .context("Failed to create SIGUSR1 handler")?;

        let mut tick_timer = tokio::time::interval(Duration::from_secs(1));
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut scanner_open = !no_scanner;

        info!("Agent running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }
                _ = sigusr1.recv() => {
                    self.log_status();
                }

                scan = scan_rx.recv(), if scanner_open => {
                    match scan {
                        Some(raw) => self.handle_scan(&raw).await,
                        None => {
                            debug!("Scanner channel closed");
                            scanner_open = false;
                        }
                    }
                }

                _ = tick_timer.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Agent stopped");
        Ok(())
    }

    async fn handle_scan(&mut self, raw: &str) {
        if is_ack(raw) {
            match self.engine.acknowledge_pending() {
                Ok(0) => debug!("No alerts to acknowledge"),
                Ok(count) => {
                    self.alerter
                        .notify(AlertLevel::Info, &format!("{} alert(s) acknowledged.", count));
                }
                Err(e) => warn!(error = %e, "Acknowledgement failed"),
            }
            return;
        }

        let Some(vehicle) = self.vehicle() else {
            warn!("Scan received before provisioning");
            self.alerter.notify(
                AlertLevel::Warning,
                "This device is not assigned to a vehicle yet.",
            );
            return;
        };

        let result = self
            .engine
            .handle_scan(vehicle, raw, now())
            .await
            .and_then(|outcome| outcome.into_result());
        match result {
            Err(AgentError::InactiveDriver(driver_id)) => {
                info!(driver_id = %driver_id, "Scan rejected, driver inactive");
            }
            Ok(outcome) => {
                debug!(?outcome, "Scan handled");
                // Get the transition to the remote side promptly
                self.scheduler.force_due(Subsystem::SessionPush);
                self.scheduler.force_due(Subsystem::EventPush);
            }
            Err(e) => warn!(error = %e, "Scan not applied"),
        }
    }

    /// Log who is driving and what the operator has not acknowledged
    fn log_status(&self) {
        let pending = self.engine.pending_alerts().map(|a| a.len()).unwrap_or_default();
        let Some(vehicle) = self.vehicle() else {
            info!(pending_alerts = pending, "Status: not provisioned");
            return;
        };

        match self.engine.current_assignment(vehicle, now()) {
            Ok(Some(a)) => info!(
                vehicle_id = %vehicle,
                driver_id = %a.driver_id,
                driver = %a.driver_name,
                session_id = %a.session_id,
                elapsed_secs = a.elapsed.num_seconds(),
                provisional = a.provisional,
                pending_alerts = pending,
                "Status: driving"
            ),
            Ok(None) => info!(vehicle_id = %vehicle, pending_alerts = pending, "Status: idle"),
            Err(e) => warn!(error = %e, "Status unavailable"),
        }
    }

    /// Run every due subsystem to completion, in fixed order
    async fn tick(&mut self) {
        let mono = MonotonicInstant::now();
        for subsystem in self.scheduler.due(mono) {
            if let Err(e) = self.run_subsystem(subsystem).await {
                error!(subsystem = %subsystem, error = %e, "Pass failed");
            }
            self.scheduler.mark_run(subsystem, MonotonicInstant::now());
        }
    }

    async fn run_subsystem(&mut self, subsystem: Subsystem) -> drivewatch_util::AgentResult<()> {
        let now = now();
        match subsystem {
            Subsystem::SessionCheck => {
                if self.vehicle().is_none() {
                    self.provision().await;
                }
                if let Some(vehicle) = self.vehicle()
                    && let DurationStatus::Exceeded { session_id, elapsed, .. } =
                        self.engine.check_duration(vehicle, now)?
                {
                    debug!(session_id = %session_id, elapsed_secs = elapsed.num_seconds(), "Duration alert raised");
                }
            }
            Subsystem::TelemetryCollect => match self.metrics.collect() {
                Ok(metrics) => {
                    self.journal
                        .record_metrics(&self.device.hardware_id, metrics, now)?;
                }
                Err(e) => warn!(error = %e, "Metric collection failed"),
            },
            Subsystem::EventPush => log_pass(subsystem, self.sync.push_events(now).await?),
            Subsystem::TelemetryPush => log_pass(subsystem, self.sync.push_telemetry(now).await?),
            Subsystem::SessionPush => {
                if let Some(vehicle) = self.vehicle() {
                    log_pass(subsystem, self.sync.push_sessions(vehicle, now).await?);
                }
            }
            Subsystem::MediaPush => log_pass(subsystem, self.sync.push_media().await?),
            Subsystem::Retention => {
                self.retention.run(now)?;
            }
        }
        Ok(())
    }
}

fn log_pass(subsystem: Subsystem, report: PassReport) {
    if report.failed > 0 {
        warn!(
            subsystem = %subsystem,
            selected = report.selected,
            synced = report.synced,
            failed = report.failed,
            "Sync pass incomplete"
        );
    } else if !report.is_idle() {
        debug!(subsystem = %subsystem, synced = report.synced, "Sync pass complete");
    }
}

fn is_ack(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case(ACK_PAYLOAD)
}

/// Apply command-line overrides on top of the loaded configuration
fn apply_overrides(config: &mut AgentConfig, args: &Args) {
    if let Some(dir) = &args.data_dir {
        let old = config.agent.data_dir.clone();
        config.agent.media_dir = rebase(&config.agent.media_dir, &old, dir);
        config.agent.spool_dir = rebase(&config.agent.spool_dir, &old, dir);
        config.agent.data_dir = dir.clone();
    }
    if let Some(token) = args.token.as_ref().filter(|t| !t.is_empty()) {
        config.cloud.auth_token = Some(token.clone());
    }
    if let Some(plate) = &args.plate {
        config.agent.vehicle_plate = Some(plate.trim().to_string());
    }
}

/// Move `path` under `new` if it lived under `old`
fn rebase(path: &Path, old: &Path, new: &Path) -> PathBuf {
    match path.strip_prefix(old) {
        Ok(rel) => new.join(rel),
        Err(_) => path.to_path_buf(),
    }
}

/// Stored device identity, or a fresh unprovisioned one on first boot
fn load_or_init_device(store: &dyn Store, config: &AgentConfig) -> Result<DeviceConfig> {
    if let Some(mut device) = store.load_device_config()? {
        let mut changed = false;
        if let Some(hw) = config.agent.hardware_id.as_ref().filter(|hw| **hw != device.hardware_id) {
            info!(previous = %device.hardware_id, hardware_id = %hw, "Hardware id changed by config");
            device.hardware_id = hw.clone();
            changed = true;
        }
        if device.firmware_version != config.agent.firmware_version {
            device.firmware_version = config.agent.firmware_version.clone();
            changed = true;
        }
        if changed {
            device.updated_at = now();
            store.save_device_config(&device)?;
        }
        return Ok(device);
    }

    let hardware_id = config
        .agent
        .hardware_id
        .clone()
        .or_else(machine_id)
        .unwrap_or_else(|| format!("dw-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]));

    let device = DeviceConfig {
        hardware_id,
        vehicle_id: None,
        state: OperationalState::Unprovisioned,
        firmware_version: config.agent.firmware_version.clone(),
        updated_at: now(),
    };
    store
        .save_device_config(&device)
        .context("Failed to store device identity")?;
    info!(hardware_id = %device.hardware_id, "First boot, device registered locally");
    Ok(device)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "drivewatchd starting");
    if is_mock_time_active() {
        warn!(now = %now(), "Mock time is active");
    }

    let service = Service::new(&args).await?;
    service.run(args.no_scanner).await
}
