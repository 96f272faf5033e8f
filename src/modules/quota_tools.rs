//! Quota management through the cluster's command-line tools.
//!
//! The alternative to speaking the master protocol directly: run the
//! filesystem's own get/set quota binaries against a path on the mounted
//! filesystem and parse the limit out of their tabular report. Two report
//! shapes exist in the wild; both put the hard limit on the fourth row
//! from the end, the current one in column 4 and the legacy one in
//! column 3.

use std::path::Path;

use log::info;

use super::error::{Error, Result};
use super::mounter::{combined_output, run_tool};

const LIMIT_FLAG: &str = "-L";

/// Quota access through external tool binaries. Tool names are
/// caller-supplied, so any cluster flavor's tooling fits.
#[derive(Debug, Clone)]
pub struct QuotaTools {
    get_cmd: String,
    set_cmd: String,
}

impl QuotaTools {
    /// Backend running `get_cmd` to query and `set_cmd` to apply quotas.
    pub fn new(get_cmd: impl Into<String>, set_cmd: impl Into<String>) -> Self {
        Self {
            get_cmd: get_cmd.into(),
            set_cmd: set_cmd.into(),
        }
    }

    /// Query the hard-size limit on `path`. An unset quota is an error:
    /// every provisioned volume is expected to carry one.
    pub fn get_quota(&self, path: &Path) -> Result<u64> {
        info!("quota tools get (path {})", path.display());
        let args = vec![path.to_string_lossy().into_owned()];
        self.run_and_parse(&self.get_cmd, args, path)
    }

    /// Apply a hard-size limit of `size` bytes to `path` and return the
    /// limit the tool reports back.
    pub fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidArgument(
                "quota size must be positive".to_string(),
            ));
        }
        info!("quota tools set (path {}, size {size})", path.display());
        let args = vec![
            LIMIT_FLAG.to_string(),
            size.to_string(),
            path.to_string_lossy().into_owned(),
        ];
        self.run_and_parse(&self.set_cmd, args, path)
    }

    fn run_and_parse(&self, tool: &str, args: Vec<String>, path: &Path) -> Result<u64> {
        let output = run_tool(tool, &args)?;
        let raw = combined_output(&output);
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "quota tool failed: cmd: '{tool} {}' output: {raw:?}",
                args.join(" ")
            )));
        }
        match parse_quota_report(&raw)? {
            Some(limit) => Ok(limit),
            None => Err(Error::Internal(format!(
                "quota for {} is not set or {tool} output is incorrect: {raw:?}",
                path.display()
            ))),
        }
    }
}

/// Extract the hard limit from a quota tool report. `Ok(None)` means the
/// report is well-formed but no quota is set.
fn parse_quota_report(output: &str) -> Result<Option<u64>> {
    let lines: Vec<&str> = output.split('\n').collect();
    let (row, column) = match lines.len() {
        8 => (lines[4], 4),
        6 => (lines[2], 3),
        _ => {
            return Err(Error::Internal(format!(
                "unexpected number of lines in quota tool output: {output:?}"
            )));
        }
    };
    let cell = row
        .split('|')
        .nth(column)
        .map(str::trim)
        .ok_or_else(|| {
            Error::Internal(format!(
                "couldn't find the limit column in quota tool output: {output:?}"
            ))
        })?;
    if cell == "-" {
        return Ok(None);
    }
    cell.parse::<u64>().map(Some).map_err(|e| {
        Error::Internal(format!("couldn't parse quota limit {cell:?}: {e}"))
    })
}
