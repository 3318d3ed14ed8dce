// src/warehouse/shell.rs

//! Warehouse client backed by a shell command.
//!
//! Every statement spawns the configured command (e.g. `psql "$DSN" -tA -v
//! ON_ERROR_STOP=1`) and writes the SQL to its stdin. A non-zero exit status is
//! a statement failure; for scalar queries the first line of stdout is read and
//! its first `|`-separated column parsed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::WarehouseError;
use crate::types::BoxFuture;
use crate::warehouse::{ScalarValue, WarehouseClient};

#[derive(Debug, Clone)]
pub struct ShellWarehouse {
    cmd: String,
    timeout: Option<Duration>,
}

impl ShellWarehouse {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            timeout: None,
        }
    }

    /// Kill the client process if a statement runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut c = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };
        c.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        c
    }

    /// Run one statement and return the client's stdout.
    async fn run_statement(&self, statement: &str) -> Result<String, WarehouseError> {
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| WarehouseError::Connection(format!("spawning '{}': {e}", self.cmd)))?;

        // Feed stdin while draining stdout/stderr: a client that answers
        // before it has read the whole script must not stall the write.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(statement.as_bytes()).await?;
                // Closing stdin tells the client the script is complete.
                drop(stdin);
            }
            Ok::<(), std::io::Error>(())
        };
        let exchange = async move { tokio::join!(write, child.wait_with_output()) };

        let (written, output) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| WarehouseError::Timeout(limit))?,
            None => exchange.await,
        };
        let output =
            output.map_err(|e| WarehouseError::Connection(format!("waiting for client: {e}")))?;
        match written {
            // The client exited without reading everything; its exit status decides.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("warehouse client closed stdin early");
            }
            Err(e) => {
                return Err(WarehouseError::Connection(format!("writing statement: {e}")));
            }
            Ok(()) => {}
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!(exit_code = code, "warehouse client exited with failure");
            let detail = if stderr.is_empty() {
                format!("client exited with code {code}")
            } else {
                stderr
            };
            return Err(WarehouseError::Statement(detail));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| WarehouseError::Decode(format!("client output is not UTF-8: {e}")))
    }
}

impl WarehouseClient for ShellWarehouse {
    fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>> {
        Box::pin(async move {
            debug!(bytes = statement.len(), "executing statement via shell client");
            self.run_statement(statement).await.map(|_| ())
        })
    }

    fn query_scalar<'a>(
        &'a self,
        statement: &'a str,
    ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>> {
        Box::pin(async move {
            let stdout = self.run_statement(statement).await?;
            Ok(first_cell(&stdout))
        })
    }
}

/// First column of the first non-empty line, or `None` if there are no rows.
fn first_cell(stdout: &str) -> Option<ScalarValue> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let cell = line.split('|').next().unwrap_or(line);
    Some(ScalarValue::parse(cell))
}
