//! Shell script supervision.
//!
//! Scripts run detached in their own session so they outlive the engine if
//! need be. While a script runs the worker drains the exec queue instead of
//! the main queue, so only connection management can interleave with it.

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::command::CecCommand;
use crate::engine::Shared;
use crate::lifecycle::ConnectionManager;
use crate::queue::WorkItem;

/// Lowest file descriptor closed in the child; stdio and the descriptor
/// used by the runtime to signal exec completion stay open.
#[cfg(unix)]
const RESERVED_FDS: i32 = 4;

fn spawn_detached(command_text: &str) -> std::io::Result<Child> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command_text)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    // Detach from our session and drop every inherited descriptor so the
    // script cannot hold the adapter or any socket open.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            let max_fd = libc::sysconf(libc::_SC_OPEN_MAX) as i32;
            for fd in RESERVED_FDS..max_fd {
                libc::close(fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Run `command_text` under /bin/sh, serving the exec queue until the child
/// exits. Returns true when an exit command arrived while the script ran.
pub(crate) async fn run_script(
    shared: &Arc<Shared>,
    manager: &mut ConnectionManager,
    command_text: &str,
) -> bool {
    info!("executing script: {command_text}");
    let mut child = match spawn_detached(command_text) {
        Ok(child) => child,
        Err(e) => {
            error!("failed to start script '{command_text}': {e}");
            return false;
        }
    };

    shared.in_exec.store(true, Ordering::SeqCst);
    let mut exit_requested = false;

    loop {
        tokio::select! {
            entry = shared.exec.pop() => {
                match entry.item {
                    WorkItem::Snapshot(reply) => {
                        let _ = reply.send(manager.snapshot());
                    }
                    WorkItem::Command(CecCommand::Exit) => {
                        shared.publish(entry.serial);
                        exit_requested = true;
                        break;
                    }
                    WorkItem::Command(CecCommand::Connect) => manager.connect().await,
                    WorkItem::Command(CecCommand::Disconnect) => manager.disconnect(),
                    WorkItem::Command(CecCommand::Reconnect) => manager.reconnect().await,
                    WorkItem::Command(other) => {
                        error!(
                            "command {} not allowed while a script is running",
                            other.kind_name()
                        );
                    }
                }
                shared.publish(entry.serial);
            }
            status = child.wait() => {
                match status {
                    Ok(status) => info!("script finished: {status}"),
                    Err(e) => error!("script wait failed: {e}"),
                }
                break;
            }
        }
    }

    shared.in_exec.store(false, Ordering::SeqCst);
    if exit_requested {
        debug!("exit requested while script still running, leaving it detached");
    }
    // Entries still on the exec queue stay there until the next script; they
    // remain visible through the queue depth counters.
    exit_requested
}
