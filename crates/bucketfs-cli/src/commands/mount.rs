//! `bucketfs mount` / `bucketfs unmount`: load config, resolve the mount
//! point, validate the mount point is usable, hand everything to
//! `fuser::spawn_mount2` via [`bucketfs_daemon::mount`], then either wait
//! on Ctrl-C in the foreground or detach and return immediately.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bucketfs_core::config::Config;
use clap::Args;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct MountCommand {
    /// Name of the bucket to mount.
    pub bucket: String,
    /// Directory to mount the bucket at.
    pub mount_point: PathBuf,
    /// Stay attached to the terminal and wait for Ctrl-C instead of
    /// returning once the mount is up.
    #[arg(long)]
    pub foreground: bool,
}

impl MountCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: Option<PathBuf>) -> Result<()> {
        let formatter = get_formatter(format == OutputFormat::Json);

        let config_path = config_path.unwrap_or_else(Config::default_path);
        let mut config = Config::load_or_default(&config_path);
        config.mount.bucket = Some(self.bucket.clone());

        let mount_point = expand_tilde(&self.mount_point);
        config.mount.mount_point = mount_point.clone();

        if !Path::new("/dev/fuse").exists() {
            bail!("/dev/fuse does not exist — is the fuse kernel module loaded?");
        }

        std::fs::create_dir_all(&mount_point)
            .with_context(|| format!("creating mount point {}", mount_point.display()))?;
        is_mount_point_suitable(&mount_point)?;

        let session = bucketfs_daemon::mount(config, &mount_point).await?;
        formatter.success(&format!("mounted {} at {}", self.bucket, mount_point.display()));

        if self.foreground {
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            formatter.info("received interrupt, unmounting");
            session.join();
        } else {
            // `fuser::BackgroundSession` unmounts on drop; forgetting it
            // keeps the mount alive for as long as this process runs.
            std::mem::forget(session);
            formatter.warn("mount is only active while this process keeps running");
        }

        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct UnmountCommand {
    /// Mount point to unmount.
    pub path: PathBuf,
    /// Force unmount even if the mount point is busy.
    #[arg(short, long)]
    pub force: bool,
}

impl UnmountCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format == OutputFormat::Json);
        let path = expand_tilde(&self.path);

        let program = if which_exists("fusermount3") { "fusermount3" } else { "fusermount" };

        let mut args: Vec<&str> = vec!["-u"];
        if self.force {
            args.push("-z");
        }

        info!(program, path = %path.display(), "unmounting");
        let status = std::process::Command::new(program)
            .args(&args)
            .arg(&path)
            .status()
            .with_context(|| format!("running {program}"))?;

        if !status.success() {
            bail!("{program} exited with {status}");
        }

        formatter.success(&format!("unmounted {}", path.display()));
        Ok(())
    }
}

fn which_exists(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path.to_path_buf();
    };
    dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf())
}

/// A mount point must either be empty or contain only dotfiles (§6's own
/// mount-point constraint); anything else risks hiding existing data
/// under the mount.
fn is_mount_point_suitable(path: &Path) -> Result<()> {
    let entries = std::fs::read_dir(path).with_context(|| format!("reading {}", path.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with('.') {
            bail!("mount point {} is not empty", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_leaves_absolute_paths_alone() {
        let path = PathBuf::from("/mnt/bucket");
        assert_eq!(expand_tilde(&path), path);
    }

    #[test]
    fn suitable_mount_point_allows_only_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".keep"), b"").unwrap();
        assert!(is_mount_point_suitable(dir.path()).is_ok());
    }

    #[test]
    fn unsuitable_mount_point_rejects_visible_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), b"").unwrap();
        assert!(is_mount_point_suitable(dir.path()).is_err());
    }
}
