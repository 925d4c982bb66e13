mod config_loader;
mod error;
mod event;
mod pool_registry;
mod redirect_service;
mod resolver;
mod settings;

use anyhow::{Context, Result};
use pingora_core::server::Server;
use pingora_core::server::configuration::Opt;
use pingora_proxy::http_proxy_service;
use tracing::{info, warn};

use config_loader::load_registry_from_file;
use redirect_service::RedirectService;
use resolver::RedirectResolver;
use settings::Settings;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting pool redirect server");

    let settings = Settings::from_env();

    // Setup server
    let opt = Opt::parse_args();
    let mut server = Server::new(Some(opt))?;
    server.bootstrap();

    // Pool config must be valid before anything listens
    let registry = load_registry_from_file(&settings.config_path)
        .context("refusing to start without a valid pool config")?;

    if registry.is_empty() {
        warn!("No pools configured; every redirect request will return 404");
    }
    info!(
        "Loaded {} pools: {}",
        registry.len(),
        registry.pool_ids().join(", ")
    );

    let service = RedirectService::new(RedirectResolver::new(registry), settings.probe_token);
    let mut redirect_service = http_proxy_service(&server.configuration, service);
    redirect_service.add_tcp(&settings.listen_addr);

    info!("Redirect service listening on {}", settings.listen_addr);

    server.add_service(redirect_service);
    info!("Server configured, starting main loop");
    server.run_forever();
}
