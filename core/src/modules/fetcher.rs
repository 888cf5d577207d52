use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::core::ProfileFetcher;
use crate::utils;

/// Delegates each profile fetch to an external helper program.
///
/// The helper is invoked as `<program> [args..] <id> [<e164>]`; exit status 0
/// means the profile was fetched and stored. How the helper talks to the
/// profile service is entirely its own business.
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandFetcher {
    /// Resolves `name` via ./tools, the working directory, then PATH.
    pub fn resolve(name: &str) -> anyhow::Result<Self> {
        let program = utils::get_binary_path(name)
            .ok_or_else(|| anyhow::anyhow!("profile fetch helper '{}' not found", name))?;
        Ok(Self::new(program))
    }

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ProfileFetcher for CommandFetcher {
    async fn fetch_profile(&self, id: &str, e164: Option<&str>) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(e164) = e164 {
            command.arg(e164);
        }

        let output = command
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start '{}': {}", self.program, e))?;

        if output.status.success() {
            debug!("Fetched profile for {}", id);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        if detail.is_empty() {
            anyhow::bail!("'{}' exited with {} for {}", self.program, output.status, id);
        }
        anyhow::bail!("'{}' exited with {} for {}: {}", self.program, output.status, id, detail);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandFetcher {
        CommandFetcher::new("sh").with_args(vec!["-c".to_string(), script.to_string(), "sh".to_string()])
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        assert!(sh("exit 0").fetch_profile("alice", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let err = sh("echo boom >&2; exit 3")
            .fetch_profile("alice", Some("+15550001"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("alice"));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_passes_id_and_secondary_id() {
        // $1 is the id, $2 the e164.
        let fetcher = sh(r#"[ "$1" = "alice" ] && [ "$2" = "+15550001" ]"#);
        assert!(fetcher.fetch_profile("alice", Some("+15550001")).await.is_ok());
        assert!(fetcher.fetch_profile("bob", Some("+15550001")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program_errors() {
        let fetcher = CommandFetcher::new("/nonexistent/freshen-helper");
        assert!(fetcher.fetch_profile("alice", None).await.is_err());
    }

    #[test]
    fn test_resolve_unknown_helper_fails() {
        assert!(CommandFetcher::resolve("freshen-definitely-not-installed-helper").is_err());
    }
}
