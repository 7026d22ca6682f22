// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Clinipipe Domain
//!
//! Pure domain layer for the Clinipipe healthcare ingestion pipeline:
//!
//! - **Entities**: the telemetry data model (pipeline runs, ingestion
//!   stats, quality metrics, audit events, performance and system metrics)
//!   and the normalized clinical/operational content model.
//! - **Value objects**: run and batch identifiers, normalized paths.
//! - **Ports**: the persistence provider and bookmark store contracts
//!   implemented by the infrastructure layer.
//! - **Errors**: the [`PipelineError`] taxonomy shared by every layer.
//!
//! This crate contains no I/O, no async runtime, and no logging; the only
//! async surface is the trait definitions of the infrastructure ports.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod value_objects;

pub use error::{DatabaseError, ErrorCategory, PipelineError};
