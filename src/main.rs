//! Command line probe for the portal broker.
//!
//! Runs a single portal operation against the session bus and prints the
//! outcome. Ctrl-C cancels the in-flight request.

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xdg_portal_client::desktop::camera::CAMERA_INTERFACE;
use xdg_portal_client::{CancellationToken, Portal, PortalConfig};

const USAGE: &str = "usage: portal-probe <camera|screenshot|pick-color|version <interface>>";

#[tokio::main]
async fn main() -> Result<()> {
    let config = PortalConfig::load();
    init_tracing(&config);

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!(USAGE);
    };

    let portal = Portal::with_config(&config)
        .await
        .context("Failed to connect to the portal broker")?;
    info!(sender = portal.sender(), "Connected to D-Bus session bus");

    let cancellable = CancellationToken::new();
    let on_interrupt = cancellable.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    match command.as_str() {
        "camera" => camera(&portal, cancellable).await,
        "screenshot" => {
            let result = portal
                .take_screenshot(None, true, Some(cancellable))
                .await;
            let uri = portal.take_screenshot_finish(result)?;
            println!("{uri}");
            Ok(())
        }
        "pick-color" => {
            let result = portal.pick_color(None, Some(cancellable)).await;
            let color = portal.pick_color_finish(result)?;
            println!("{:.4} {:.4} {:.4}", color.red, color.green, color.blue);
            Ok(())
        }
        "version" => {
            let interface = args.next().unwrap_or_else(|| CAMERA_INTERFACE.to_string());
            let version = portal.interface_version(&interface).await?;
            println!("{interface} {version}");
            Ok(())
        }
        other => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

async fn camera(portal: &Portal, cancellable: CancellationToken) -> Result<()> {
    if !portal.is_camera_present().await {
        warn!("No camera present");
        println!("no camera");
        return Ok(());
    }

    let result = portal.access_camera(None, Some(cancellable)).await;
    match portal.access_camera_finish(result) {
        Ok(_) => info!("Camera access granted"),
        Err(err) if err.is_cancelled() => {
            println!("camera access denied");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    match portal.open_pipewire_remote_for_camera().await {
        Some(fd) => println!("camera remote opened: {fd:?}"),
        None => bail!("Failed to open the camera PipeWire remote"),
    }

    Ok(())
}

fn init_tracing(config: &PortalConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
