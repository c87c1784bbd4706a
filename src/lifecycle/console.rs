//! Operator console.
//!
//! Typing `1` followed by Enter on the server's stdin shuts it down.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const SHUTDOWN_COMMAND: &str = "1";

/// Read lines until the shutdown command arrives.
///
/// Returns `true` on the command, `false` when input ends or fails first.
pub async fn wait_for_shutdown_command<R>(input: R) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == SHUTDOWN_COMMAND => {
                tracing::info!("Shutdown requested from console");
                return true;
            }
            Ok(Some(line)) => {
                tracing::debug!(input = %line.trim(), "Ignoring console input");
            }
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Console input failed");
                return false;
            }
        }
    }
}

/// Watch the process's stdin. Resolves only on the shutdown command.
pub async fn console_shutdown() {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if !wait_for_shutdown_command(stdin).await {
        tracing::debug!("Console closed, shutdown command unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_triggers_shutdown() {
        let input: &[u8] = b"hello\n  1  \nignored\n";
        assert!(wait_for_shutdown_command(input).await);
    }

    #[tokio::test]
    async fn end_of_input_does_not() {
        let input: &[u8] = b"2\n11\n";
        assert!(!wait_for_shutdown_command(input).await);
    }
}
