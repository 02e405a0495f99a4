//! Test server management.
//!
//! Runs the slircd-bans binary against a throwaway configuration, feeding
//! console lines on stdin and collecting the replies from stdout.

use anyhow::Context as _;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A configured test server. Each [`TestServer::run`] is one process
/// lifetime sharing the same ban journal.
pub struct TestServer {
    _data_dir: TempDir,
    config_path: PathBuf,
}

impl TestServer {
    /// Write a configuration with one all-privileged operator, `admin`,
    /// plus `extra`.
    pub fn new(extra: &str) -> anyhow::Result<Self> {
        Self::with_server("irc.example.net", "0AB", extra)
    }

    pub fn with_server(name: &str, sid: &str, extra: &str) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let config_path = data_dir.path().join("config.toml");
        let config = format!(
            r#"
[server]
name = "{name}"
sid = "{sid}"
description = "Test server"

[database]
path = "{}/bans.msgpack"

[[oper]]
name = "admin"
privileges = ["kline", "unkline", "dline", "undline", "xline", "unxline", "resv", "unresv"]

{extra}
"#,
            data_dir.path().display()
        );
        std::fs::write(&config_path, config)?;

        Ok(Self {
            _data_dir: data_dir,
            config_path,
        })
    }

    /// Start the server, send `lines`, close stdin and return the replies.
    pub async fn run(&self, lines: &[&str]) -> anyhow::Result<Vec<String>> {
        let (status, stdout) = self.spawn(lines).await?;
        anyhow::ensure!(status.success(), "server exited with {status}");
        Ok(stdout)
    }

    /// Exit status of a run that is expected to fail.
    pub async fn status(&self) -> anyhow::Result<ExitStatus> {
        Ok(self.spawn(&[]).await?.0)
    }

    async fn spawn(&self, lines: &[&str]) -> anyhow::Result<(ExitStatus, Vec<String>)> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_slircd-bans"))
            .arg(&self.config_path)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdin = child.stdin.take().context("stdin not captured")?;
        for line in lines {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }
        drop(stdin);

        let output = tokio::time::timeout(Duration::from_secs(10), child.wait_with_output())
            .await
            .context("server did not exit after stdin closed")??;
        let stdout = String::from_utf8(output.stdout)?
            .lines()
            .map(str::to_string)
            .collect();
        Ok((output.status, stdout))
    }
}
