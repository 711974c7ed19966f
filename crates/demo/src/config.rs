//! Demo configuration file.
//!
//! ```toml
//! [resolve]
//! unused-registrations = "warn"
//!
//! [demo]
//! requests = 3
//! greeting = "hello"
//! store-latency-ms = 10
//! ```

use std::path::Path;

use anyhow::Context as _;
use fusion_core::ResolveOptions;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
	pub resolve: ResolveOptions,
	pub demo: Settings,
}

/// Values the sample plugins read through the settings token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
	pub requests: usize,
	pub greeting: String,
	pub session_prefix: String,
	/// Simulated connect latency of the primary store.
	pub store_latency_ms: u64,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			requests: 3,
			greeting: "hello".into(),
			session_prefix: "session".into(),
			store_latency_ms: 10,
		}
	}
}

impl DemoConfig {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let input = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
		toml::from_str(&input).with_context(|| format!("parsing {}", path.display()))
	}
}

#[cfg(test)]
mod tests {
	use fusion_core::Strictness;

	use super::*;

	#[test]
	fn sections_default_independently() {
		let config: DemoConfig = toml::from_str("[demo]\ngreeting = \"hi\"\n").expect("parses");
		assert_eq!(config.demo.greeting, "hi");
		assert_eq!(config.demo.requests, 3);
		assert_eq!(config.resolve, ResolveOptions::default());
	}

	#[test]
	fn resolve_section_feeds_options() {
		let config: DemoConfig = toml::from_str("[resolve]\nunused-registrations = \"allow\"\n").expect("parses");
		assert_eq!(config.resolve.unused_registrations, Strictness::Allow);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(toml::from_str::<DemoConfig>("[demo]\nbogus = 1\n").is_err());
	}
}
