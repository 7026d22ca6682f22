// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Clinipipe Bootstrap
//!
//! Entry-point scaffolding shared by the clinipipe binaries: exit codes,
//! shutdown coordination (stop event + grace period), signal handling, and
//! logger initialization. Application logic lives in the `clinipipe`
//! crate; this crate only wires the process up and tears it down.

pub mod exit_code;
pub mod logger;
pub mod shutdown;
pub mod signals;

pub use exit_code::ExitCode;
pub use shutdown::{ShutdownCoordinator, StopEvent};
