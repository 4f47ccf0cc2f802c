//! Applying configured phases to the status record.
//!
//! Static phases are pure and delegate to [`crate::core::phase::apply_static`].
//! Command phases use a file round-trip: the status is written as JSON to a
//! temp file whose path is exported in [`STATUS_ENV_VAR`], the command may
//! rewrite it, and the result is read back once the command exits zero.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::phase::{Phase, Slots, apply_static};
use crate::core::status::StatusRecord;
use crate::io::process::{OUTPUT_LIMIT_BYTES, Shell, run_command};

/// Environment variable holding the path of the status file for a command.
pub const STATUS_ENV_VAR: &str = "SLICK_AGENT_STATUS";

/// Applies phases using the configured shell for command phases.
#[derive(Debug, Clone, Default)]
pub struct PhaseApplier {
    shell: Shell,
}

impl PhaseApplier {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// Apply one phase. On error `status` is left as it was before the call.
    pub fn apply(&self, phase: &Phase, status: &mut StatusRecord, slots: Slots) -> Result<()> {
        match phase {
            Phase::Command(command) => self.run_round_trip(command, status),
            Phase::WriteFile(path) => write_status(path, status),
            Phase::HttpUrl(url) => {
                debug!(url, "http-url phases are not implemented, skipping");
                Ok(())
            }
            Phase::StaticValue(_) | Phase::StaticList(_) | Phase::StaticMap(_) => {
                apply_static(phase, status, slots).map_err(|err| anyhow!(err))
            }
            Phase::Noop => Ok(()),
        }
    }

    #[instrument(skip_all, fields(command = %command))]
    fn run_round_trip(&self, command: &str, status: &mut StatusRecord) -> Result<()> {
        // Removed when dropped, on every return path.
        let mut status_file = tempfile::Builder::new()
            .prefix("slick-agent-status-")
            .suffix(".json")
            .tempfile()
            .context("create status temp file")?;
        let content = status.to_json().context("serialize status")?;
        status_file
            .write_all(content.as_bytes())
            .and_then(|()| status_file.flush())
            .with_context(|| format!("write status to {}", status_file.path().display()))?;

        let path = status_file.path().to_path_buf();
        debug!(shell = %self.shell.program, status_file = %path.display(), "running command");
        let cmd = self
            .shell
            .command(command, &[(STATUS_ENV_VAR, path.as_os_str())]);
        let output = run_command(cmd, OUTPUT_LIMIT_BYTES).context("run phase command")?;
        if !output.stdout.is_empty() {
            debug!(stdout = %String::from_utf8_lossy(&output.stdout), "command stdout");
        }
        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr), "command stderr");
        }
        if !output.status.success() {
            return Err(anyhow!(
                "command {command:?} failed with status {:?}",
                output.status.code()
            ));
        }

        let written = fs::read_to_string(&path)
            .with_context(|| format!("read status back from {}", path.display()))?;
        let updated = status
            .overlaid_with(&written)
            .with_context(|| format!("parse status from {}", path.display()))?;
        debug!(?updated, "status after command");
        *status = updated;
        Ok(())
    }
}

/// Serialize the status as JSON and overwrite `path` with it.
pub fn write_status(path: &Path, status: &StatusRecord) -> Result<()> {
    let content = status.to_json().context("serialize status")?;
    fs::write(path, content).with_context(|| format!("write status to {}", path.display()))
}

/// Apply every phase in order; failures are logged and do not stop the list.
pub fn apply_all(
    applier: &PhaseApplier,
    label: &str,
    phases: &[Phase],
    status: &mut StatusRecord,
    slots: Slots,
) {
    debug!(stage = label, phases = phases.len(), "running phases");
    for phase in phases {
        if let Err(err) = applier.apply(phase, status, slots) {
            warn!(stage = label, phase = phase.kind(), "phase failed: {err:#}");
        }
    }
}
