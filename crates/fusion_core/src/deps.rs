//! Resolved dependency records handed to plugin factories.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

/// A resolved service value.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Failures reading a [`Deps`] record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepsError {
	/// The plugin never declared a dependency under this key.
	#[error("`{owner}` has no dependency named `{key}`")]
	UnknownKey { owner: String, key: String },
	/// A required read hit an optional dependency that resolved to nothing.
	#[error("dependency `{key}` of `{owner}` resolved to nothing")]
	Absent { owner: String, key: String },
	/// The resolved service is not of the requested type.
	#[error("dependency `{key}` of `{owner}` is not a `{expected}`")]
	TypeMismatch {
		owner: String,
		key: String,
		expected: &'static str,
	},
}

/// Record of resolved dependencies keyed by the field names a plugin declared.
#[derive(Clone)]
pub struct Deps {
	owner: Arc<str>,
	values: IndexMap<Box<str>, Option<Service>>,
}

impl Deps {
	pub(crate) fn new(owner: Arc<str>) -> Self {
		Self {
			owner,
			values: IndexMap::new(),
		}
	}

	pub(crate) fn insert(&mut self, key: Box<str>, value: Option<Service>) {
		self.values.insert(key, value);
	}

	/// Reads a required dependency.
	pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, DepsError> {
		self.optional::<T>(key)?.ok_or_else(|| DepsError::Absent {
			owner: self.owner.to_string(),
			key: key.to_string(),
		})
	}

	/// Reads a dependency that may have resolved to nothing.
	pub fn optional<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>, DepsError> {
		let Some(value) = self.values.get(key) else {
			return Err(DepsError::UnknownKey {
				owner: self.owner.to_string(),
				key: key.to_string(),
			});
		};
		match value {
			None => Ok(None),
			Some(service) => service.clone().downcast::<T>().map(Some).map_err(|_| DepsError::TypeMismatch {
				owner: self.owner.to_string(),
				key: key.to_string(),
				expected: std::any::type_name::<T>(),
			}),
		}
	}

	/// Returns true if `key` was declared.
	pub fn contains(&self, key: &str) -> bool {
		self.values.contains_key(key)
	}

	/// Declared keys in declaration order.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.values.keys().map(|k| &**k)
	}

	/// Number of declared dependencies.
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Returns true when nothing was declared.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Name of the plugin this record belongs to.
	pub fn owner(&self) -> &str {
		&self.owner
	}
}

impl std::fmt::Debug for Deps {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Deps")
			.field("owner", &self.owner)
			.field("keys", &self.values.keys().collect::<Vec<_>>())
			.finish()
	}
}
