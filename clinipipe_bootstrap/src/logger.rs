// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logger Initialization
//!
//! Installs the global `tracing` subscriber for the process. The filter is
//! taken from `CLINIPIPE_LOG` (falling back to `RUST_LOG`, then the level
//! passed by the CLI). Initialization is idempotent: a second call is a
//! no-op so tests can initialize freely.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted first for the log filter.
pub const LOG_ENV_VAR: &str = "CLINIPIPE_LOG";

/// Initializes the global tracing subscriber.
///
/// `default_level` is used when neither `CLINIPIPE_LOG` nor `RUST_LOG` is
/// set (e.g. "info", "clinipipe=debug").
pub fn init_logging(default_level: &str) {
    let filter = std::env::var(LOG_ENV_VAR)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| default_level.to_string());

    let subscriber = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .finish();

    // try_init so repeated calls (tests, embedded use) are harmless.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("info");
        init_logging("debug");
    }
}
