use anyhow::Context;
use braslet::domain::models::{AppEvent, BluetoothCommand, ConnectionState, PeripheralId};
use braslet::domain::settings::SettingsService;
use braslet::infrastructure::bluetooth::bluest_radio::BluestRadio;
use braslet::infrastructure::bluetooth::DeviceSessionController;
use braslet::infrastructure::logging::init_logger;
use braslet::presentation::console::ConsolePresenter;
use braslet::presentation::sink::EventSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;
    let _log_guard = init_logger(&settings.get().log_settings)?;
    info!("Starting Braslet, settings at {:?}", settings.path());

    let config = settings.get().session_config()?;
    let radio = Arc::new(
        BluestRadio::new()
            .await
            .context("Bluetooth is not available")?,
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn EventSink> = Arc::new(event_tx);
    let controller = DeviceSessionController::new(radio, sink, config);
    let controller_task = tokio::spawn(controller.run(command_rx));

    let mut presenter = ConsolePresenter::new(
        settings.get().preferred_device_name.clone(),
        settings.get().last_connected_id.clone().map(PeripheralId::new),
    );
    command_tx.send(BluetoothCommand::StartScan)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let AppEvent::ConnectionState {
                    device,
                    state: ConnectionState::Streaming,
                } = &event
                {
                    if let Err(e) = settings.remember_device(device.id.as_str()) {
                        warn!("Could not save last connected device: {}", e);
                    }
                }
                for command in presenter.handle(event) {
                    command_tx.send(command)?;
                }
            }
        }
    }

    let _ = command_tx.send(BluetoothCommand::Shutdown);
    controller_task.await?;
    info!("Stopped");
    Ok(())
}
