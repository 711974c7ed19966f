//! Resolve-time policy knobs.
//!
//! ```toml
//! unused-registrations = "warn"
//! orphan-enhancers = "deny"
//! require-render = false
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// How a diagnosable condition is treated during resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strictness {
	/// Fail resolution.
	#[default]
	Deny,
	/// Log a warning and continue.
	Warn,
	/// Continue silently.
	Allow,
}

/// Options consulted by [`App::resolve`](crate::App::resolve).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResolveOptions {
	/// Plain values registered under a token nothing depends on.
	pub unused_registrations: Strictness,
	/// Enhancers attached to a token that was never registered.
	pub orphan_enhancers: Strictness,
	/// Fail when no renderer was registered.
	pub require_render: bool,
}

impl Default for ResolveOptions {
	fn default() -> Self {
		Self {
			unused_registrations: Strictness::Deny,
			orphan_enhancers: Strictness::Warn,
			require_render: true,
		}
	}
}

impl ResolveOptions {
	/// Parses options from a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}

	/// Reads and parses options from a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}
}

/// Errors loading [`ResolveOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or an unknown key.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_uses_defaults() {
		assert_eq!(ResolveOptions::from_toml_str("").expect("parses"), ResolveOptions::default());
	}

	#[test]
	fn kebab_case_keys() {
		let options = ResolveOptions::from_toml_str(
			r#"
			unused-registrations = "allow"
			orphan-enhancers = "deny"
			require-render = false
			"#,
		)
		.expect("parses");
		assert_eq!(
			options,
			ResolveOptions {
				unused_registrations: Strictness::Allow,
				orphan_enhancers: Strictness::Deny,
				require_render: false,
			}
		);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = ResolveOptions::from_toml_str("unused = true").expect_err("unknown key");
		assert!(matches!(err, ConfigError::Toml(_)));
	}

	#[test]
	fn load_reads_file() {
		let mut file = tempfile::NamedTempFile::new().expect("temp file");
		writeln!(file, "orphan-enhancers = \"allow\"").expect("write");
		let options = ResolveOptions::load(file.path()).expect("loads");
		assert_eq!(options.orphan_enhancers, Strictness::Allow);
		assert_eq!(options.unused_registrations, Strictness::Deny);
	}

	#[test]
	fn load_reports_missing_path() {
		let err = ResolveOptions::load("/nonexistent/fusion.toml").expect_err("missing file");
		assert!(matches!(err, ConfigError::Io { .. }));
	}
}
