// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device, OS, and location information attached to outgoing events.
//!
//! The host application supplies a [`DeviceContext`]; platform probing and
//! carrier/country lookup tables live outside this crate. [`DeviceContext::detect`]
//! fills in what can be learnt portably (OS platform and system locale).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hardware identity and model information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
	/// Platform-reported unique hardware identifier, if the platform exposes one.
	pub hardware_id: Option<String>,
	pub brand: Option<String>,
	pub manufacturer: Option<String>,
	pub model: Option<String>,
}

/// Operating system information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
	pub platform: Option<String>,
	pub name: Option<String>,
	pub version: Option<String>,
}

/// Coarse and fine location information.
///
/// Coordinates are kept as raw JSON values because hosts hand them over
/// untyped; they are normalised when an event is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
	pub country: Option<String>,
	pub region: Option<String>,
	pub city: Option<String>,
	pub dma: Option<String>,
	pub lat: Option<Value>,
	pub lng: Option<Value>,
}

/// Everything about the device that ends up on an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
	pub device: DeviceInfo,
	pub os: OsInfo,
	pub location: LocationInfo,
	pub carrier: Option<String>,
	pub language: Option<String>,
	pub ip: Option<String>,
}

impl DeviceContext {
	/// Builds a context from what the current process can observe.
	///
	/// Only the OS platform and the system locale are probed; hardware ids,
	/// carrier and location stay unset. `language` is the English name of the
	/// locale's language (`"English"`), falling back to the ISO 639 code for
	/// languages without a known name. `country` is the ISO 3166 region code.
	pub fn detect() -> Self {
		let mut ctx = Self {
			os: OsInfo {
				platform: Some(platform_name(std::env::consts::OS).to_string()),
				name: None,
				version: None,
			},
			..Self::default()
		};

		if let Some(tag) = sys_locale::get_locale() {
			let (language, country) = split_locale_tag(&tag);
			ctx.language = language.map(|code| language_name(&code).map_or(code, str::to_string));
			ctx.location.country = country;
		}

		ctx
	}

	/// Returns the hardware id when it is set and non-empty.
	pub fn hardware_id(&self) -> Option<&str> {
		non_empty(&self.device.hardware_id)
	}
}

/// Returns the string when it is set and non-empty.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|s| !s.is_empty())
}

fn platform_name(os: &str) -> &str {
	match os {
		"linux" => "Linux",
		"windows" => "Windows",
		"macos" => "macOS",
		"ios" => "iOS",
		"android" => "Android",
		"freebsd" => "FreeBSD",
		other => other,
	}
}

/// English name for an ISO 639-1 language code.
fn language_name(code: &str) -> Option<&'static str> {
	let name = match code {
		"ar" => "Arabic",
		"bg" => "Bulgarian",
		"ca" => "Catalan",
		"cs" => "Czech",
		"da" => "Danish",
		"de" => "German",
		"el" => "Greek",
		"en" => "English",
		"es" => "Spanish",
		"et" => "Estonian",
		"fa" => "Persian",
		"fi" => "Finnish",
		"fr" => "French",
		"he" => "Hebrew",
		"hi" => "Hindi",
		"hr" => "Croatian",
		"hu" => "Hungarian",
		"id" => "Indonesian",
		"it" => "Italian",
		"ja" => "Japanese",
		"ko" => "Korean",
		"lt" => "Lithuanian",
		"lv" => "Latvian",
		"ms" => "Malay",
		"nb" => "Norwegian Bokmal",
		"nl" => "Dutch",
		"pl" => "Polish",
		"pt" => "Portuguese",
		"ro" => "Romanian",
		"ru" => "Russian",
		"sk" => "Slovak",
		"sl" => "Slovenian",
		"sr" => "Serbian",
		"sv" => "Swedish",
		"th" => "Thai",
		"tr" => "Turkish",
		"uk" => "Ukrainian",
		"vi" => "Vietnamese",
		"zh" => "Chinese",
		_ => return None,
	};
	Some(name)
}

/// Splits a BCP 47 style tag (`en-US`, `pt_BR.UTF-8`) into language and
/// region subtags.
fn split_locale_tag(tag: &str) -> (Option<String>, Option<String>) {
	let tag = tag.split('.').next().unwrap_or(tag);
	let mut parts = tag.split(['-', '_']);

	let language = parts
		.next()
		.filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("c") && !l.eq_ignore_ascii_case("posix"))
		.map(|l| l.to_ascii_lowercase());

	let country = parts
		.find(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_alphabetic()))
		.map(|c| c.to_ascii_uppercase());

	(language, country)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_locale_tag_handles_common_forms() {
		assert_eq!(
			split_locale_tag("en-US"),
			(Some("en".to_string()), Some("US".to_string()))
		);
		assert_eq!(
			split_locale_tag("pt_BR.UTF-8"),
			(Some("pt".to_string()), Some("BR".to_string()))
		);
		assert_eq!(
			split_locale_tag("zh-Hans-CN"),
			(Some("zh".to_string()), Some("CN".to_string()))
		);
		assert_eq!(split_locale_tag("de"), (Some("de".to_string()), None));
	}

	#[test]
	fn language_codes_map_to_names() {
		assert_eq!(language_name("en"), Some("English"));
		assert_eq!(language_name("pt"), Some("Portuguese"));
		assert_eq!(language_name("zh"), Some("Chinese"));
		assert_eq!(language_name("tlh"), None);
	}

	#[test]
	fn split_locale_tag_ignores_c_locale() {
		assert_eq!(split_locale_tag("C"), (None, None));
		assert_eq!(split_locale_tag("POSIX"), (None, None));
	}

	#[test]
	fn detect_sets_platform_only_for_device_fields() {
		let ctx = DeviceContext::detect();
		assert!(ctx.os.platform.is_some());
		assert!(ctx.device.hardware_id.is_none());
		assert!(ctx.carrier.is_none());
		assert!(ctx.location.lat.is_none());
		if let Some(language) = &ctx.language {
			assert!(!language.is_empty());
			assert_ne!(language.as_str(), "en");
		}
	}

	#[test]
	fn empty_hardware_id_is_treated_as_missing() {
		let mut ctx = DeviceContext::default();
		assert_eq!(ctx.hardware_id(), None);
		ctx.device.hardware_id = Some(String::new());
		assert_eq!(ctx.hardware_id(), None);
		ctx.device.hardware_id = Some("imei-1".to_string());
		assert_eq!(ctx.hardware_id(), Some("imei-1"));
	}
}
