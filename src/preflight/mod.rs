//! Host checks run before any sandbox is opened.
//!
//! Everything except the container runtime happens inside containers, so
//! the runtime is the only host tool that must be present.

use anyhow::{bail, Result};

/// Check if a command exists on `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Debian package that provides a known runtime binary.
fn package_for(runtime: &str) -> &str {
    match runtime {
        "docker" => "docker.io",
        "podman" => "podman",
        other => other,
    }
}

/// Check that specific tools are available.
///
/// Each tuple is `(command, package)`.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that the configured container runtime can be found.
pub fn check_runtime(runtime: &str) -> Result<()> {
    check_required_tools(&[(runtime, package_for(runtime))])?;
    tracing::debug!("container runtime '{runtime}' found");
    Ok(())
}
