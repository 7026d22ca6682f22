// /////////////////////////////////////////////////////////////////////////////
// Clinipipe
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! X12 implied-decimal parsing.
//!
//! Monetary elements carry either an explicit decimal point (taken
//! verbatim) or an implied one: `1500` with two implied places reads as
//! `15.00`. Malformed values parse to `0.00` with a warning rather than
//! failing the segment.

use tracing::warn;

/// Parses an X12 numeric element with the given implied decimal places.
pub fn parse_x12_decimal(value: &str, implied_decimal_places: u32) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }

    if value.contains('.') {
        return match value.parse::<f64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("invalid decimal value encountered: '{}'", value);
                0.0
            }
        };
    }

    match value.parse::<f64>() {
        Ok(parsed) => parsed / 10f64.powi(implied_decimal_places as i32),
        Err(_) => {
            warn!("invalid decimal value encountered: '{}'", value);
            0.0
        }
    }
}

/// Two implied decimal places, the form used by monetary elements.
pub fn parse_x12_money(value: &str) -> f64 {
    parse_x12_decimal(value, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_decimal() {
        assert!((parse_x12_money("1500") - 15.00).abs() < 1e-9);
        assert!((parse_x12_money("7") - 0.07).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_decimal_verbatim() {
        assert!((parse_x12_money("15.00") - 15.00).abs() < 1e-9);
        assert!((parse_x12_money("0.5") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_amounts() {
        assert!((parse_x12_money("-1200") - (-12.00)).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_becomes_zero() {
        assert_eq!(parse_x12_money("12AB"), 0.0);
        assert_eq!(parse_x12_money(""), 0.0);
        assert_eq!(parse_x12_money("  "), 0.0);
    }
}
