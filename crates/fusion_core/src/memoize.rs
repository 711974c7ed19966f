//! Per-context memoization of plugin-provided accessors.

use std::sync::Arc;

use fusion_compose::{Context, MemoKey};

/// An accessor computed at most once per [`Context`].
///
/// Each `Memoized` owns a unique [`MemoKey`]; cached values live in the
/// context, so nothing leaks across requests.
pub struct Memoized<T> {
	key: MemoKey,
	compute: Arc<dyn Fn(&mut Context) -> T + Send + Sync>,
}

impl<T: Send + Sync + 'static> Memoized<T> {
	/// Returns the cached value for `ctx`, computing it on first use.
	pub fn get(&self, ctx: &mut Context) -> Arc<T> {
		if let Some(cached) = ctx.memoized(self.key).and_then(|value| value.downcast::<T>().ok()) {
			return cached;
		}
		let value = Arc::new((self.compute)(ctx));
		ctx.set_memoized(self.key, value.clone());
		value
	}

	/// Capability key under which values are cached.
	pub fn key(&self) -> MemoKey {
		self.key
	}
}

impl<T> Clone for Memoized<T> {
	fn clone(&self) -> Self {
		Self {
			key: self.key,
			compute: self.compute.clone(),
		}
	}
}

impl<T> std::fmt::Debug for Memoized<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Memoized").field("key", &self.key).finish()
	}
}

/// Wraps `f` so repeated calls with the same context return the same value.
pub fn memoize<T, F>(f: F) -> Memoized<T>
where
	T: Send + Sync + 'static,
	F: Fn(&mut Context) -> T + Send + Sync + 'static,
{
	Memoized {
		key: MemoKey::next(),
		compute: Arc::new(f),
	}
}
