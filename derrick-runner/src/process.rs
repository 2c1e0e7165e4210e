//! Child process helpers
//!
//! Every concrete collaborator shells out to a tool already on the
//! developer's machine (docker, kubectl, helm, git). These helpers run
//! those commands with output streamed to the shared terminal handle and
//! kill the child promptly when the cancellation handle fires.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::output::Output;

/// Runs a command, streaming stdout and stderr line by line to `out`
pub async fn run_streamed(
    cancel: &CancellationToken,
    out: &Output,
    cmd: Command,
    what: &str,
) -> Result<()> {
    run_streamed_with_input(cancel, out, cmd, None, what).await
}

/// Like `run_streamed`, optionally feeding bytes to the child's stdin
pub async fn run_streamed_with_input(
    cancel: &CancellationToken,
    out: &Output,
    mut cmd: Command,
    input: Option<Vec<u8>>,
    what: &str,
) -> Result<()> {
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    cmd.stdin(if input.is_some() {
        std::process::Stdio::piped()
    } else {
        std::process::Stdio::null()
    });

    let mut child = cmd.spawn().with_context(|| format!("spawning {what}"))?;

    // Drain output concurrently before feeding stdin so a chatty child
    // cannot deadlock against a full pipe.
    let mut copiers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        copiers.push(spawn_line_copier(stdout, out.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        copiers.push(spawn_line_copier(stderr, out.clone()));
    }

    if let Some(input) = input {
        let mut stdin = child.stdin.take().context("child stdin not captured")?;
        stdin
            .write_all(&input)
            .await
            .with_context(|| format!("writing input to {what}"))?;
        drop(stdin);
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            anyhow::bail!("{what} cancelled");
        }
        status = child.wait() => {
            status.with_context(|| format!("waiting for {what}"))?
        }
    };

    for copier in copiers {
        let _ = copier.await;
    }

    if !status.success() {
        anyhow::bail!("{what} failed: exit status {}", status.code().unwrap_or(-1));
    }

    Ok(())
}

/// Runs a command to completion and returns its trimmed stdout
pub async fn capture_output(
    cancel: &CancellationToken,
    mut cmd: Command,
    what: &str,
) -> Result<String> {
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);

    let output = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("{what} cancelled"),
        output = cmd.output() => output.with_context(|| format!("running {what}"))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{what} failed: exit status {}, stderr: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Synchronous variant for factory-time lookups (kubectl context, git)
pub fn output_of(cmd: &mut std::process::Command, what: &str) -> Result<String> {
    let output = cmd.output().with_context(|| format!("running {what}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{what} failed: exit status {}, stderr: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn spawn_line_copier(
    stream: impl AsyncRead + Unpin + Send + 'static,
    out: Output,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            out.write_line(&line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::capture::captured_output;

    #[tokio::test]
    async fn test_run_streamed_captures_output() {
        let (out, captured) = captured_output();
        let cancel = CancellationToken::new();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello");

        run_streamed(&cancel, &out, cmd, "echo").await.unwrap();
        assert_eq!(captured.contents(), "hello\n");
    }

    #[tokio::test]
    async fn test_run_streamed_reports_failure() {
        let (out, _captured) = captured_output();
        let cancel = CancellationToken::new();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");

        let err = run_streamed(&cancel, &out, cmd, "failing command")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit status 3"));
    }

    #[tokio::test]
    async fn test_run_streamed_with_input() {
        let (out, captured) = captured_output();
        let cancel = CancellationToken::new();

        let cmd = Command::new("cat");
        run_streamed_with_input(&cancel, &out, cmd, Some(b"piped\n".to_vec()), "cat")
            .await
            .unwrap();

        assert_eq!(captured.contents(), "piped\n");
    }

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let (out, _captured) = captured_output();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut cmd = Command::new("sleep");
        cmd.arg("10");

        let err = run_streamed(&cancel, &out, cmd, "sleep").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_capture_output() {
        let cancel = CancellationToken::new();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo '  trimmed  '");

        let stdout = capture_output(&cancel, cmd, "echo").await.unwrap();
        assert_eq!(stdout, "trimmed");
    }
}
