//! Discovery through a user-supplied shell command

use std::process::Stdio;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use tokio::process::Command;
use tracing::debug;

use super::NodeDiscovery;
use crate::domain::HostInfo;

/// Runs a shell command that prints one `host[:slots]` per line
#[derive(Debug, Clone)]
pub struct DiscoveryScript {
    script: String,
    default_slots: usize,
}

impl DiscoveryScript {
    pub fn new(script: impl Into<String>, default_slots: usize) -> Self {
        Self {
            script: script.into(),
            default_slots,
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Parse script output, skipping blank lines and `#` comments
    pub fn parse_output(&self, stdout: &str) -> Result<Vec<HostInfo>> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| HostInfo::parse_with_default(line, self.default_slots))
            .collect()
    }
}

#[async_trait]
impl NodeDiscovery for DiscoveryScript {
    async fn enumerate_hosts(&self) -> Result<Vec<HostInfo>> {
        debug!(script = %self.script, "DiscoveryScript::enumerate_hosts: called");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run discovery script")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("Discovery script failed ({}): {}", output.status, stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hosts = self.parse_output(&stdout)?;
        debug!(count = hosts.len(), "DiscoveryScript::enumerate_hosts: parsed");
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output() {
        let script = DiscoveryScript::new("unused", 2);
        let hosts = script
            .parse_output("# cluster\nnode-a:4\n\nnode-b\n  node-c:1  \n")
            .unwrap();
        assert_eq!(
            hosts,
            vec![
                HostInfo::new("node-a", 4),
                HostInfo::new("node-b", 2),
                HostInfo::new("node-c", 1)
            ]
        );
    }

    #[test]
    fn test_parse_output_rejects_bad_line() {
        let script = DiscoveryScript::new("unused", 1);
        assert!(script.parse_output("node-a:four").is_err());
    }

    #[tokio::test]
    async fn test_runs_script() {
        let script = DiscoveryScript::new("printf 'h1:2\\nh2:3\\n'", 1);
        let hosts = script.enumerate_hosts().await.unwrap();
        assert_eq!(hosts, vec![HostInfo::new("h1", 2), HostInfo::new("h2", 3)]);
    }

    #[tokio::test]
    async fn test_failing_script() {
        let script = DiscoveryScript::new("echo oops >&2; exit 3", 1);
        let err = script.enumerate_hosts().await.unwrap_err();
        assert!(err.to_string().contains("oops"));
    }
}
