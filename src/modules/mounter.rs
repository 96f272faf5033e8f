//! Mount, unmount and mount-state inspection.
//!
//! All three operations shell out to the standard tools (`mount`,
//! `umount`, `findmnt`) so the combined tool output lands in the error
//! message when something fails. Mount state comes from `findmnt`'s JSON
//! report restricted to a single target; a target the tool knows nothing
//! about is simply not mounted, not an error.
//!
//! Bind mounts require `shared` propagation on the parent mount to be
//! visible across mount namespaces, so any entry with a different
//! propagation mode is refused unless the configuration explicitly
//! tolerates it (single-namespace test environments).

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::process::{Command, Output};

use log::{debug, warn};
use serde::Deserialize;

use super::config::ClusterConfig;
use super::constants::MOUNT_DIR_MODE;
use super::error::{Error, Result};

const MOUNT_CMD: &str = "mount";
const UMOUNT_CMD: &str = "umount";
const FINDMNT_CMD: &str = "findmnt";

/// The mount seam: everything above this crate's mount plumbing talks to
/// this trait, so orchestration logic can run against a fake in tests.
pub trait MountBackend: Send + Sync {
    /// Mount `source` at `target` with the given filesystem type and
    /// options, creating the target directory if needed.
    fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String]) -> Result<()>;

    /// Unmount whatever is mounted at `target`.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Whether `target` currently has a mount on it.
    fn is_mounted(&self, target: &Path) -> Result<bool>;
}

/// [`MountBackend`] implementation over the host's mount tools.
#[derive(Debug, Clone, Default)]
pub struct Mounter {
    allow_private_propagation: bool,
}

#[derive(Debug, Deserialize)]
struct FindmntReport {
    #[serde(default)]
    filesystems: Vec<MountEntry>,
}

#[derive(Debug, Deserialize)]
struct MountEntry {
    #[serde(default)]
    target: String,
    #[serde(default)]
    propagation: String,
    #[serde(default)]
    fstype: String,
    #[serde(default)]
    options: String,
}

pub(crate) fn run_tool(tool: &str, args: &[String]) -> Result<Output> {
    Command::new(tool).args(args).output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            Error::Io(e)
        }
    })
}

pub(crate) fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

impl Mounter {
    /// Mounter requiring `shared` propagation on inspected mounts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounter honoring the configured propagation tolerance.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            allow_private_propagation: config.allow_private_propagation,
        }
    }

    fn parse_report(&self, raw: &str, target: &Path) -> Result<bool> {
        let report: FindmntReport = serde_json::from_str(raw).map_err(|e| {
            Error::Internal(format!("couldn't parse findmnt output {raw:?}: {e}"))
        })?;

        for entry in &report.filesystems {
            debug!(
                "findmnt entry: target {} propagation {} fstype {} options {}",
                entry.target, entry.propagation, entry.fstype, entry.options
            );
            if entry.propagation != "shared" {
                if self.allow_private_propagation {
                    warn!(
                        "mount propagation for target {} is {} instead of shared",
                        target.display(),
                        entry.propagation
                    );
                } else {
                    return Err(Error::Mount(format!(
                        "mount propagation for target {} is not enabled ({} instead of shared)",
                        target.display(),
                        entry.propagation
                    )));
                }
            }
            if Path::new(&entry.target) == target {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl MountBackend for Mounter {
    fn mount(&self, source: &str, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
        if source.is_empty() {
            return Err(Error::InvalidArgument(
                "mount source must be provided".to_string(),
            ));
        }
        if target.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "mount target must be provided".to_string(),
            ));
        }

        let mut args = vec!["-t".to_string(), fs_type.to_string()];
        if !options.is_empty() {
            args.push("-o".to_string());
            args.push(options.join(","));
        }
        args.push(source.to_string());
        args.push(target.to_string_lossy().into_owned());

        // mkdir -p; a target that already exists is fine.
        DirBuilder::new()
            .recursive(true)
            .mode(MOUNT_DIR_MODE)
            .create(target)?;

        let output = run_tool(MOUNT_CMD, &args)?;
        if !output.status.success() {
            return Err(Error::Mount(format!(
                "mounting failed: cmd: '{MOUNT_CMD} {}' output: {:?}",
                args.join(" "),
                combined_output(&output)
            )));
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        if target.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "unmount target must be provided".to_string(),
            ));
        }
        let args = vec![target.to_string_lossy().into_owned()];
        let output = run_tool(UMOUNT_CMD, &args)?;
        if !output.status.success() {
            return Err(Error::Mount(format!(
                "unmounting failed: cmd: '{UMOUNT_CMD} {}' output: {:?}",
                args.join(" "),
                combined_output(&output)
            )));
        }
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        if target.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "mount-state target must be provided".to_string(),
            ));
        }
        let args = vec![
            "-o".to_string(),
            "TARGET,PROPAGATION,FSTYPE,OPTIONS".to_string(),
            "-M".to_string(),
            target.to_string_lossy().into_owned(),
            "-J".to_string(),
        ];
        let output = run_tool(FINDMNT_CMD, &args)?;
        let raw = combined_output(&output);

        // findmnt exits non-zero when it finds nothing for the target.
        if !output.status.success() {
            if raw.trim().is_empty() {
                return Ok(false);
            }
            return Err(Error::Internal(format!(
                "checking mount state failed: cmd: '{FINDMNT_CMD} {}' output: {raw:?}",
                args.join(" ")
            )));
        }
        if raw.trim().is_empty() {
            warn!(
                "{FINDMNT_CMD} returned no output with zero status for {} - unexpected but not an error",
                target.display()
            );
            return Ok(false);
        }
        self.parse_report(&raw, target)
    }
}
