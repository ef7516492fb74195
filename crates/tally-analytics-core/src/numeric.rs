// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-precision rendering for revenue and coordinates.
//!
//! Inputs arrive as loosely typed JSON. Numbers and numeric strings are
//! rounded to a fixed number of significant digits; anything else becomes `0`
//! instead of failing the event.

use serde_json::{Number, Value};

/// Significant digits kept for `revenue`.
pub const REVENUE_PRECISION: usize = 2;

/// Significant digits kept for `location_lat` / `location_lng`.
pub const COORDINATE_PRECISION: usize = 15;

/// Rounds `value` to `precision` significant digits, or returns `0` if it is
/// not numeric. A precision of zero keeps one digit.
pub fn fixed_precision(value: &Value, precision: usize) -> Value {
	let fraction_digits = precision.max(1) - 1;
	let rounded = as_f64(value)
		.and_then(|n| format!("{n:.fraction_digits$e}").parse::<f64>().ok())
		.and_then(Number::from_f64);

	Value::Number(rounded.unwrap_or_else(|| Number::from(0)))
}

fn as_f64(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse::<f64>().ok(),
		_ => None,
	}
	.filter(|n| n.is_finite())
}
