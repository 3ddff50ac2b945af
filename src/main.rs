use std::{error::Error, sync::Arc};

use clap::Parser;
use sysinfo::System;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::lib::{
    api::types::{ApiServer, ApiState},
    config::Config,
    containers::{docker::DockerClient, images::ImageTable, manager::ContainerManager},
    scheduler::scheduler::{Scheduler, available_compute_units, max_concurrency_for},
    submissions::sqlite::SqliteStore,
    workspace::Workspace,
};

mod lib {
    pub mod api;
    pub mod config;
    pub mod containers;
    pub mod scheduler;
    pub mod submissions;
    pub mod ticker;
    pub mod workspace;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    info!(data_dir = %config.data_dir.display(), listen = %config.listen, "starting code runner");

    let workspace = Arc::new(Workspace::new(&config.data_dir));
    workspace.init().await?;
    let store = Arc::new(SqliteStore::open(config.database_path())?);

    let runtime = Arc::new(DockerClient::connect()?);
    let containers = Arc::new(ContainerManager::new(
        runtime,
        Arc::new(ImageTable::defaults()),
        config.manager_settings(),
    ));
    if config.skip_image_pull {
        warn!("skipping image pull, missing images will fail at dispatch");
    } else {
        containers.prime_images().await;
    }

    let compute_units = available_compute_units();
    let max_concurrency = max_concurrency_for(compute_units, config.reserved_cpus);
    if max_concurrency == 0 {
        warn!(
            compute_units,
            reserved = config.reserved_cpus,
            "no capacity left after reserving host cpus, nothing will be dispatched"
        );
    }
    info!(compute_units, max_concurrency, "capacity computed");

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        workspace.clone(),
        containers.clone(),
        max_concurrency,
    ));
    let requeued = scheduler.recover().await?;
    if requeued > 0 {
        info!(requeued, "recovered interrupted submissions");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor = tokio::spawn(
        containers
            .clone()
            .run_monitor(config.monitor_interval(), stop_rx.clone()),
    );
    let scheduling = tokio::spawn(scheduler.run(config.tick_interval(), stop_rx));

    let state = Arc::new(ApiState {
        store,
        workspace,
        containers,
        max_concurrency,
        system: Mutex::new(System::new()),
    });
    let server = ApiServer::new(state, config.listen);
    let served = server
        .serve(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            let _ = stop_tx.send(true);
        })
        .await;

    let (monitor, scheduling) = tokio::join!(monitor, scheduling);
    for (task, result) in [("container-monitor", monitor), ("scheduler", scheduling)] {
        if let Err(e) = result {
            error!(task, error = %e, "background task ended abnormally");
        }
    }

    served?;
    Ok(())
}
