//! Best-effort container runtime commands. Exit codes are not interpreted:
//! a container that is already gone is an expected outcome.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

/// Run `<runtime> <args..>` to completion and ignore the result.
pub async fn run_best_effort(runtime: &str, args: &[&str]) {
    let status = Command::new(runtime)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) => debug!(runtime, ?args, code = ?status.code(), "container command finished"),
        Err(e) => warn!(runtime, ?args, error = %e, "container command could not be started"),
    }
}

pub async fn stop_container(runtime: &str, name: &str) {
    run_best_effort(runtime, &["stop", name]).await;
}

pub async fn remove_volume(runtime: &str, volume: &str) {
    run_best_effort(runtime, &["volume", "rm", "-f", volume]).await;
}
