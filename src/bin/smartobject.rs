use tokio::signal;
use tracing_subscriber::EnvFilter;

use coap_smartobject::{
    Config, DeviceId, DirectoryClient, Registration, Server, SmartObject,
    observer::memory::MemObserver,
};

async fn register_with_directory(config: Config, link_format: String) {
    let client = match DirectoryClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Directory registration skipped: {}", e);
            return;
        }
    };

    let registration = Registration::new(&config, link_format);
    match client.register(&registration).await {
        Ok(ack) => tracing::info!(
            "Registered {} at /{} ({:?})",
            registration.endpoint_name,
            ack.location,
            ack.status
        ),
        Err(e) => tracing::warn!(
            "Registration with {} failed, serving locally only: {}",
            client.url(),
            e
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let device_id = DeviceId::generate(&config.device_prefix);
    tracing::info!("Smart object {}", device_id);

    let mut root = SmartObject::demo(device_id, config.sensor_interval)?;

    let server = Server::bind(
        config.listen_addr.as_str(),
        &root,
        MemObserver::new(),
        config.notification_buffer,
    )
    .await?;

    for resource in root.resources() {
        tracing::info!(
            "Resource {} -> URI: /{} (Observable: {})",
            resource.name(),
            resource.name(),
            resource.is_observable()
        );
    }

    let registration = config
        .registration_enabled
        .then(|| tokio::spawn(register_with_directory(config.clone(), root.link_format())));

    server
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if let Some(registration) = registration {
        registration.abort();
    }
    root.shutdown();

    Ok(())
}
