use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Run a command with `input` on stdin and capture stdout
pub fn run_with_input(cmd: &str, args: &[&str], input: &[u8]) -> Result<String> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    // Dropped at the end of the block so the child sees EOF
    {
        let mut stdin = child.stdin.take().context("Child stdin was not captured")?;
        stdin
            .write_all(input)
            .with_context(|| format!("Failed to write stdin of {cmd}"))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {cmd}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{cmd} failed: {}", stderr.trim())
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
