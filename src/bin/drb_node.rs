// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Daemon entrypoint: parses `Config`, wires tracing, runs the tokio
//! runtime on a dedicated thread with an enlarged stack, drives migration
//! and beacon loading, and blocks on shutdown.

use drb_node::daemon::{migrate, Supervisor};
use drb_node::Error;
use eyre::Result;
use std::sync::Arc;
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// The OS default stack overflows under the recursion depth the `bls_dkg`
/// polynomial evaluation can reach for larger groups.
const RUNTIME_STACK_SIZE: usize = 16 * 1024 * 1024;

fn init_tracing(config: &drb_node::config::Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match config.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "drb_node.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Leaked deliberately: the guard must outlive the process, and this
            // function only ever runs once at startup.
            Box::leak(Box::new(guard));
            if config.json_logs {
                builder.json().with_writer(writer).init();
            } else {
                builder.with_writer(writer).init();
            }
        }
        None if config.json_logs => builder.json().init(),
        None => builder.init(),
    }
}

fn run(config: drb_node::config::Config) -> Result<()> {
    init_tracing(&config);
    color_eyre::install()?;

    let base_dir = config.resolved_data_dir();
    if migrate::is_legacy_layout(&base_dir) {
        let default = config.default_beacon.clone().unwrap_or_else(|| "default".to_string());
        info!("legacy single-beacon layout detected, migrating");
        migrate::migrate(&base_dir, &default)?;
    }

    let supervisor = Arc::new(Supervisor::new(
        config.default_beacon.clone(),
        config.self_address.clone(),
        config.multibeacon_root(),
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_stack_size(RUNTIME_STACK_SIZE)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        info!(data_dir = %base_dir.display(), "drb_node starting");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        shutdown.await.ok();

        info!("shutdown requested, stopping beacon processes");
        supervisor.shutdown_all().await;
    });

    Ok(())
}

fn main() {
    let config = drb_node::config::Config::from_args();
    if let Err(report) = run(config) {
        match report.downcast_ref::<Error>() {
            Some(Error::Config(message)) => error!("configuration error: {}", message),
            Some(Error::Migration(message)) => error!("migration failed: {}", message),
            Some(other) => error!("startup failed: {}", other),
            None => error!("startup failed: {:?}", report),
        }
        std::process::exit(1);
    }
}
