//! Helper program executor.
//! Spawns the external helpers used by the Wake-on-LAN and RMC backends.

use std::path::Path;

use tracing::{debug, trace};

use crate::error::{PowerError, PowerResult};

/// Fail early when a helper is missing from the helper directory.
pub fn ensure_helper(program: &Path) -> PowerResult<()> {
    if program.is_file() {
        Ok(())
    } else {
        Err(PowerError::HelperNotFound(program.display().to_string()))
    }
}

/// Run `program args...` to completion and return its stdout.
pub async fn run_helper(program: &Path, args: &[String]) -> PowerResult<String> {
    ensure_helper(program)?;

    debug!("Executing: {} {}", program.display(), args.join(" "));

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| PowerError::HelperFailed {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(PowerError::HelperFailed {
            program: program.display().to_string(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    trace!("{} said: {}", program.display(), stdout.trim_end());
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_helper(Path::new("/bin/sh"), &sh("echo woken")).await.unwrap();
        assert_eq!(out, "woken\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_helper_failure() {
        let err = run_helper(Path::new("/bin/sh"), &sh("echo nope >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            PowerError::HelperFailed { message, .. } => assert!(message.contains("nope")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_helper_is_reported() {
        let err = run_helper(Path::new("/nonexistent/ether-wake"), &[]).await.unwrap_err();
        assert!(matches!(err, PowerError::HelperNotFound(_)));
        assert_eq!(err.exit_code(), 20);
    }
}
