//! `bucketfsd`: the long-running mount process a service manager (systemd,
//! an init script) supervises directly, as opposed to `bucketfs mount`'s
//! interactive/backgrounded CLI invocation. Reads its configuration from
//! the default path only — there is no flag surface here; interactive
//! overrides live in the CLI, and this process just does the one thing
//! it was configured to do.

use anyhow::{Context, Result};
use bucketfs_core::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(&Config::default_path());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mount_point = config.mount.mount_point.clone();
    std::fs::create_dir_all(&mount_point)
        .with_context(|| format!("creating mount point {}", mount_point.display()))?;

    let session = bucketfs_daemon::mount(config, &mount_point).await?;
    tracing::info!(mount_point = %mount_point.display(), "bucketfsd mounted, waiting for unmount");
    session.join();
    Ok(())
}
