// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Code Management
//!
//! Process exit codes for the clinipipe CLI:
//!
//! - **0**: success
//! - **1**: pipeline failure (records failed, stage aborted, run cancelled)
//! - **2**: configuration error (invalid config file, bad argument values)
//! - **130/143**: interrupted or terminated by signal
//!
//! The narrow code space is deliberate: operators script against these
//! three outcomes, and signal codes follow the 128+N convention.

use std::fmt;

/// Exit codes for the clinipipe command-line surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful termination (0)
    #[default]
    Success = 0,

    /// Pipeline failure (1): the run finished `failed` or `cancelled`, or
    /// could not start for a non-configuration reason.
    PipelineFailure = 1,

    /// Configuration error (2): invalid or missing configuration.
    ConfigError = 2,

    /// Interrupted by SIGINT (130)
    Interrupted = 130,

    /// Terminated by SIGTERM (143)
    Terminated = 143,
}

impl ExitCode {
    /// Convert to i32 for use with std::process::exit
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Success)
    }

    pub fn is_signal(self) -> bool {
        matches!(self, ExitCode::Interrupted | ExitCode::Terminated)
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::PipelineFailure => "Pipeline failure",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::Interrupted => "Interrupted by signal (SIGINT)",
            ExitCode::Terminated => "Terminated by signal (SIGTERM)",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code.as_i32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::PipelineFailure.as_i32(), 1);
        assert_eq!(ExitCode::ConfigError.as_i32(), 2);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
        assert_eq!(ExitCode::Terminated.as_i32(), 143);
    }

    #[test]
    fn test_is_success() {
        assert!(ExitCode::Success.is_success());
        assert!(!ExitCode::PipelineFailure.is_success());
        assert!(!ExitCode::ConfigError.is_success());
    }

    #[test]
    fn test_is_signal() {
        assert!(ExitCode::Interrupted.is_signal());
        assert!(ExitCode::Terminated.is_signal());
        assert!(!ExitCode::PipelineFailure.is_signal());
    }

    #[test]
    fn test_display() {
        let display = format!("{}", ExitCode::ConfigError);
        assert!(display.contains("Configuration error"));
        assert!(display.contains('2'));
    }
}
