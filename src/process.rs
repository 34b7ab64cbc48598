//! Running external tools.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::ReleaseError;

/// Run `command` to completion and return its trimmed stdout.
///
/// A non-zero exit is an error carrying the command's stderr.
pub async fn run(command: &mut Command) -> Result<String> {
    let program = describe(command);
    debug!(command = %program, "running");

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run `{}`", program))?;

    if !output.status.success() {
        return Err(ReleaseError::CommandFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn describe(command: &Command) -> String {
    let inner = command.as_std();
    std::iter::once(inner.get_program())
        .chain(inner.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
