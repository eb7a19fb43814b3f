//! uplinkd process entry point.
//!
//! No async runtime: the orchestrator owns a background OS thread and this
//! binary's `main` is a thin signal-polling loop (`spec.md` §5: "parallel
//! threads with a cooperative tick", not coroutines).

mod config_loader;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};
use uplinkd_core::{LogLevelController, Orchestrator, OrchestratorError};

/// Backs `Action::SetLogLevel` (`spec.md` §6) with the filter handle
/// `tracing_subscriber::reload` hands back at init, so a runtime log-level
/// change actually takes effect instead of only being logged.
struct ReloadableLogLevel(reload::Handle<EnvFilter, Registry>);

impl LogLevelController for ReloadableLogLevel {
    fn set_level(&self, level: &str) {
        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        if let Err(e) = self.0.reload(filter) {
            tracing::warn!(error = %e, level = %level, "failed to apply log level change");
        }
    }
}

/// uplinkd: multi-WAN failover daemon.
#[derive(Parser, Debug)]
#[command(name = "uplinkd", about = "Multi-WAN failover daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/uplinkd/config.toml")]
    config: PathBuf,
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_reload_signal(_: libc::c_int) {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs SIGTERM/SIGINT (graceful shutdown) and SIGHUP (hot reload)
/// handlers. Both set an atomic flag; all real work happens back on the
/// main thread's poll loop, never inside the signal handler itself.
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, on_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGHUP, on_reload_signal as libc::sighandler_t);
    }
}

fn main() {
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
    let log_controller: Arc<dyn LogLevelController> = Arc::new(ReloadableLogLevel(filter_handle));

    let cli = Cli::parse();
    install_signal_handlers();

    let config = match config_loader::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(path = %cli.config.display(), members = config.members.len(), "uplinkd starting");

    let mut orchestrator = match Orchestrator::spawn_with_log_controller(config, Some(log_controller)) {
        Ok(o) => o,
        Err(OrchestratorError::Config(e)) => {
            tracing::error!(error = %e, "initialization failed");
            std::process::exit(1);
        }
        Err(OrchestratorError::ControllerUnsupported(msg)) => {
            tracing::error!(reason = %msg, "controller adapter rejected at startup");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "initialization failed");
            std::process::exit(1);
        }
    };

    loop {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            tracing::info!("shutdown signal received, stopping");
            orchestrator.shutdown();
            std::process::exit(130);
        }

        if RELOAD_REQUESTED.swap(false, Ordering::SeqCst) {
            tracing::info!(path = %cli.config.display(), "reload signal received");
            match config_loader::load(&cli.config) {
                Ok(new_config) => {
                    if let Err(e) = orchestrator.reload(new_config) {
                        tracing::error!(error = %e, "reload rejected, retaining current configuration");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to reload configuration, retaining current configuration");
                }
            }
        }

        std::thread::sleep(Duration::from_millis(250));
    }
}
