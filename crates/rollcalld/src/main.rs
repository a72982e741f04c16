use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod dbus_interface;
mod engine;
mod gallery;
mod notifier;
mod session;

use api::RestClient;
use dbus_interface::KioskService;
use engine::ModelService;
use notifier::{ChannelService, MqttSettings, Notifier};
use rollcall_hw::V4lSource;

const BUS_NAME: &str = "org.rollcall.Kiosk1";
const OBJECT_PATH: &str = "/org/rollcall/Kiosk1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        line = %config.line,
        station = %config.station,
        api = %config.api_url,
        "rollcalld starting"
    );

    let models = Arc::new(ModelService::new(
        config.scrfd_model_path(),
        config.arcface_model_path(),
    ));
    let api = Arc::new(RestClient::new(
        &config.api_url,
        &config.line,
        config.api_token.clone(),
        config.http_timeout(),
    )?);

    let channel = Arc::new(ChannelService::connect(&MqttSettings {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        client_id: format!("rollcall-{}-{}", config.line, uuid::Uuid::new_v4().simple()),
        reconnect_interval: std::time::Duration::from_secs(config.mqtt_reconnect_secs),
    }));
    let notifier = Notifier::new(channel.clone(), config.led_topic());

    let camera = Arc::new(V4lSource::new(config.camera_device.clone(), config.warmup_frames));

    let service = KioskService::new(config, models.clone(), api.clone(), api, notifier, camera);

    // Startup failures are reported through Status and OpenSession, not fatal here.
    match service.rebuild_gallery().await {
        Ok(size) => tracing::info!(size, "initial gallery ready"),
        Err(e) => tracing::error!(error = %e, "initial gallery build failed"),
    }

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let server = connection.object_server();
    if let Ok(iface) = server.interface::<_, KioskService>(OBJECT_PATH).await {
        iface.get().await.close_current();
    }
    channel.disconnect().await;
    models.teardown().await;

    Ok(())
}
