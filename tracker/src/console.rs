//! Console transport: runs the game server as a child process and answers
//! [`LogFeed`] queries from its stdout.

use crate::error::Result;
use crate::feed::{leading_index, ChunkOptions, LogFeed};
use log::{debug, error, info, trace, warn};
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{timeout_at, Instant};

/// Lines buffered per query before a slow reader starts lagging
const LINE_BUFFER: usize = 4096;

/// Lifecycle notifications from the server process
#[derive(Debug)]
pub enum ConsoleEvent {
    /// The server printed its start line; previously seen ids are meaningless now
    Started,
    /// The server process ended
    Exited(Option<ExitStatus>),
}

pub struct ConsoleFeed {
    stdin: Mutex<ChildStdin>,
    lines: broadcast::Sender<String>,
}

impl ConsoleFeed {
    /// Spawns `program` with `args` and starts reading its output.
    ///
    /// Lifecycle events are sent on the returned receiver.
    pub fn spawn(
        program: &str,
        args: &[String],
        start_pattern: Regex,
    ) -> Result<(Self, mpsc::Receiver<ConsoleEvent>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        info!("Spawned game server '{}' (pid {:?})", program, child.id());

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("server stdin unavailable"))?;

        let (lines, _) = broadcast::channel(LINE_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(16);

        Self::spawn_reader(child, lines.clone(), event_tx, start_pattern)?;

        Ok((
            Self {
                stdin: Mutex::new(stdin),
                lines,
            },
            event_rx,
        ))
    }

    /// Spawns task that fans stdout lines out to queries and watches for restarts
    fn spawn_reader(
        mut child: Child,
        lines: broadcast::Sender<String>,
        event_tx: mpsc::Sender<ConsoleEvent>,
        start_pattern: Regex,
    ) -> Result<()> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("server stdout unavailable"))?;

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();

            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r').to_string();
                        trace!(target: "console", "{}", line);

                        if start_pattern.is_match(&line) {
                            info!("Game server started");
                            if event_tx.send(ConsoleEvent::Started).await.is_err() {
                                break;
                            }
                        }

                        // No receivers just means no query is in flight
                        let _ = lines.send(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading server output: {}", e);
                        break;
                    }
                }
            }

            let status = match child.wait().await {
                Ok(status) => Some(status),
                Err(e) => {
                    error!("Failed to wait on game server: {}", e);
                    None
                }
            };
            warn!("Game server exited ({:?})", status);
            let _ = event_tx.send(ConsoleEvent::Exited(status)).await;
        });

        Ok(())
    }

    async fn write_command(&self, command: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
}

impl LogFeed for ConsoleFeed {
    async fn watch_chunk(
        &self,
        command: &str,
        pattern: &Regex,
        options: ChunkOptions,
    ) -> Vec<String> {
        // Subscribe before writing so no answer line can slip past
        let mut lines = self.lines.subscribe();

        if let Err(e) = self.write_command(command).await {
            error!("Failed to send '{}' to server: {}", command, e);
            return Vec::new();
        }

        let deadline = Instant::now() + options.timeout_delay;
        let mut settle_at: Option<Instant> = None;
        let mut rows = BTreeMap::new();

        loop {
            let wait_until = settle_at.map_or(deadline, |settle| settle.min(deadline));

            match timeout_at(wait_until, lines.recv()).await {
                Err(_) => break,
                Ok(Ok(line)) => {
                    if let Some(index) = leading_index(pattern, &line) {
                        rows.insert(index, line);
                        settle_at = Some(Instant::now() + options.after_match_delay);
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!("Query '{}' lagged, {} lines skipped", command, skipped);
                }
                Ok(Err(RecvError::Closed)) => break,
            }
        }

        debug!("Query '{}' collected {} rows", command, rows.len());
        rows.into_values().collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> ChunkOptions {
        ChunkOptions {
            timeout_delay: Duration::from_secs(2),
            after_match_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_watch_chunk_reads_child_output() {
        // `cat` echoes every command back, which is enough to act as a console
        let (feed, _events) =
            ConsoleFeed::spawn("cat", &[], Regex::new("never matches").unwrap()).unwrap();
        let pattern = Regex::new(r"(?P<index>\d+)\) echo$").unwrap();

        let rows = feed.watch_chunk("0) echo", &pattern, options()).await;
        assert_eq!(rows, vec!["0) echo".to_string()]);
    }

    #[tokio::test]
    async fn test_watch_chunk_returns_after_settle_delay() {
        let (feed, _events) =
            ConsoleFeed::spawn("cat", &[], Regex::new("never matches").unwrap()).unwrap();
        let pattern = Regex::new(r"(?P<index>\d+)\) echo$").unwrap();

        let options = ChunkOptions {
            timeout_delay: Duration::from_secs(5),
            after_match_delay: Duration::from_millis(100),
        };
        let started = std::time::Instant::now();
        let rows = feed.watch_chunk("0) echo", &pattern, options).await;

        assert_eq!(rows, vec!["0) echo".to_string()]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_watch_chunk_times_out_empty() {
        let (feed, _events) =
            ConsoleFeed::spawn("cat", &[], Regex::new("never matches").unwrap()).unwrap();
        let pattern = Regex::new(r"(?P<index>\d+)\) other$").unwrap();

        let options = ChunkOptions {
            timeout_delay: Duration::from_millis(200),
            after_match_delay: Duration::from_millis(50),
        };
        let rows = feed.watch_chunk("no answer", &pattern, options).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_start_line_reported() {
        let (feed, mut events) = ConsoleFeed::spawn(
            "cat",
            &[],
            Regex::new(crate::config::DEFAULT_START_PATTERN).unwrap(),
        )
        .unwrap();

        feed.write_command("LogBrickadia: Server started").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(ConsoleEvent::Started)));
    }
}
