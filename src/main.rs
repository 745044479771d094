use anyhow::Result;
use heart_monitor::domain::models::AppEvent;
use heart_monitor::domain::registry::SharedRegistry;
use heart_monitor::domain::settings::SettingsService;
use heart_monitor::domain::values::HeartRateDecoder;
use heart_monitor::infrastructure::bluetooth::transport::GattTransport;
use heart_monitor::infrastructure::bluetooth::AcquisitionOrchestrator;
use heart_monitor::infrastructure::logging::init_logger;
use heart_monitor::presentation::console::ConsoleView;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[cfg(windows)]
fn start_backend(
    registry: SharedRegistry,
    event_sender: mpsc::UnboundedSender<AppEvent>,
) -> Result<(Arc<dyn GattTransport>, JoinHandle<Result<()>>)> {
    use heart_monitor::infrastructure::bluetooth::scanner::DiscoveryPump;
    use heart_monitor::infrastructure::bluetooth::transport::DiscoveryEvent;
    use heart_monitor::infrastructure::bluetooth::winrt::{WinRtTransport, WinRtWatcher};

    let (discovery_tx, discovery_rx) = mpsc::unbounded_channel::<DiscoveryEvent>();
    let watcher = WinRtWatcher::new(discovery_tx)?;
    let pump = DiscoveryPump::new(watcher, registry, event_sender);
    let pump_task = tokio::spawn(pump.run(discovery_rx));
    Ok((Arc::new(WinRtTransport::new()), pump_task))
}

#[cfg(not(windows))]
fn start_backend(
    _registry: SharedRegistry,
    _event_sender: mpsc::UnboundedSender<AppEvent>,
) -> Result<(Arc<dyn GattTransport>, JoinHandle<Result<()>>)> {
    anyhow::bail!("no Bluetooth LE backend is available on this platform")
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Settings unavailable ({}), using defaults", e);
        SettingsService::with_path(PathBuf::from("settings.json"))
    });
    let _guard = init_logger(&settings_service.get().log_settings)?;

    if !settings_service.path().exists() {
        if let Err(e) = settings_service.save() {
            warn!("Failed to write default settings: {}", e);
        }
    }
    let settings = settings_service.get().clone();
    info!("Starting HeartMonitor");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let registry = SharedRegistry::new();

    let (transport, pump_task) = start_backend(registry.clone(), event_tx.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = AcquisitionOrchestrator::new(
        transport,
        registry,
        Arc::new(HeartRateDecoder),
        event_tx,
        settings.acquisition.clone(),
    );
    let mut acquisition = tokio::spawn(orchestrator.run(shutdown_rx));

    let mut view = ConsoleView::new(&settings.display);
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = view.handle(event) {
                    println!("{}", line);
                }
                if view.device_lost() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut acquisition => {
                error!("Acquisition task ended unexpectedly");
                pump_task.abort();
                return Ok(());
            }
        }
    }

    let _ = shutdown_tx.send(true);
    match acquisition.await {
        Ok(state) => info!("Acquisition finished in state: {}", state),
        Err(e) => error!("Acquisition task failed: {}", e),
    }

    // Flush what the teardown reported
    while let Ok(event) = event_rx.try_recv() {
        if let Some(line) = view.handle(event) {
            println!("{}", line);
        }
    }

    pump_task.abort();
    println!(" > {} samples received", view.buffer().count());
    println!(" > HeartMonitor exited");
    Ok(())
}
