//! The town's background daemon binary: one process per rig, running the
//! capacity scheduler's dispatch loop and the witness's patrol loop.

use anyhow::{Context, Result};
use at_core::config::Config;
use at_core::lockfile::DaemonLockfile;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    at_telemetry::logging::init_logging("at-daemon", "info");
    info!("auto-tundra daemon starting");

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let data_dir = std::path::Path::new(&home).join(".auto-tundra");
    std::fs::create_dir_all(&data_dir).ok();

    let mut config = load_config(&home).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    if config.cache.path.starts_with("~/") {
        config.cache.path = config.cache.path.replacen("~", &home, 1);
    }

    let rig = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "default".to_string());

    let replace_mode = std::env::args().any(|a| a == "--replace" || a == "-r");
    if let Some(existing) = DaemonLockfile::read_valid() {
        if replace_mode {
            info!(pid = existing.pid, "replacing existing daemon (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            DaemonLockfile::remove();
        } else {
            eprintln!(
                "auto-tundra daemon already running (pid={})\n  Hint: use --replace to restart it.",
                existing.pid,
            );
            std::process::exit(1);
        }
    }

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        api_port: 0,
        frontend_port: 0,
        host: config.daemon.host.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
        project_path: std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(msg) = lockfile.acquire_or_fail() {
        eprintln!("failed to acquire lockfile: {msg}");
        std::process::exit(1);
    }
    info!("lockfile written to {}", DaemonLockfile::path().display());

    let daemon = at_daemon::daemon::Daemon::new(config, rig.clone()).await?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        DaemonLockfile::remove();
        shutdown.trigger();
    });

    info!(rig = %rig, "daemon ready");

    if let Err(e) = daemon.run().await {
        tracing::error!(error = %e, "daemon execution failed");
        DaemonLockfile::remove();
        return Err(e);
    }

    DaemonLockfile::remove();
    info!("daemon stopped");
    Ok(())
}

fn load_config(home: &str) -> Result<Config> {
    let path = std::path::Path::new(home)
        .join(".auto-tundra")
        .join("config.toml");
    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("failed to parse config.toml")?;
        Ok(config)
    } else {
        info!("no config file found at {}, using defaults", path.display());
        Ok(Config::default())
    }
}
