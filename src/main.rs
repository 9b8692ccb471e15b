use crate::state::{ControllerContext, Readiness};
use std::env;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod config;
mod controller;
mod engine;
mod image_reference;
mod oci_registry;
mod reactor;
mod resolver;
mod resource;
mod state;
mod webserver;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-image-trigger {}", env!("CARGO_PKG_VERSION"));

    let config_path =
        env::var("KUBE_IMAGE_TRIGGER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::load_config(&config_path)?;
    let http_client = oci_registry::create_client(&config)?;
    let kube_client = controller::create_client().await?;

    let readiness = Readiness::default();
    let port = config.webserver.port;
    let cron_schedule = config.cron_schedule.clone();
    let ctx = ControllerContext {
        kube_client,
        config: Arc::new(config),
        http_client,
        readiness: readiness.clone(),
    };

    info!("Executing job scheduler at cron schedule {}", cron_schedule);
    let mut scheduler = JobScheduler::new().await?;

    let job = Job::new_async(cron_schedule, move |_uuid, _l| {
        let ctx = ctx.clone();
        Box::pin(async move {
            info!("Running reconciliation pass");
            match controller::run(&ctx).await {
                Ok(()) => ctx.readiness.mark_ready(),
                Err(e) => error!("Error running controller job: {:?}", e),
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            shutdown.cancel();
        }
    });

    let app = webserver::create_app(readiness);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Shutting down job scheduler");
    scheduler.shutdown().await?;

    Ok(())
}
