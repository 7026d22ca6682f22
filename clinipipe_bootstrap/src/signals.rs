// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Bridges OS termination signals onto the shutdown coordinator. One task
//! waits for Ctrl-C (and SIGTERM on Unix) and initiates graceful shutdown;
//! workers observe the shared stop event and drain.

use crate::shutdown::ShutdownCoordinator;

/// Spawns the signal listener task.
///
/// The task initiates shutdown on the first signal and exits. A second
/// signal is left to the default handler (hard kill), which is the
/// conventional escape hatch for a wedged drain.
pub fn spawn_signal_listener(coordinator: ShutdownCoordinator) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        tracing::info!("Termination signal received");
        coordinator.initiate_shutdown();
    })
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
