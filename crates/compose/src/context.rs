//! Per-request context threaded through a middleware chain.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap as HashMap;

static NEXT_MEMO_KEY: AtomicU64 = AtomicU64::new(1);

/// Capability key identifying one memoized accessor.
///
/// Keys are process-unique; two accessors never share cached values even
/// when they compute the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoKey(u64);

impl MemoKey {
	/// Allocates a fresh key.
	pub fn next() -> Self {
		Self(NEXT_MEMO_KEY.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw key value.
	pub const fn get(self) -> u64 {
		self.0
	}
}

/// State for one unit of work (an inbound request, a hydration pass).
///
/// Middleware may attach arbitrary typed properties; the DI core itself only
/// owns the `memoized` store.
#[derive(Default)]
pub struct Context {
	extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
	memoized: HashMap<MemoKey, Arc<dyn Any + Send + Sync>>,
}

impl Context {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a typed property, returning the previous value of that type.
	pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
		self.extensions
			.insert(TypeId::of::<T>(), Box::new(value))
			.and_then(|prev| prev.downcast::<T>().ok())
			.map(|prev| *prev)
	}

	/// Returns a typed property.
	pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
		self.extensions.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
	}

	/// Returns a typed property mutably.
	pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
		self.extensions.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut::<T>())
	}

	/// Returns a typed property, inserting `T::default()` when absent.
	pub fn get_or_default<T: Default + Send + Sync + 'static>(&mut self) -> &mut T {
		self.get_or_insert_with(T::default)
	}

	/// Returns a typed property, inserting the result of `init` when absent.
	pub fn get_or_insert_with<T: Send + Sync + 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
		let slot = self.extensions.entry(TypeId::of::<T>()).or_insert_with(|| Box::new(init()));
		match slot.downcast_mut::<T>() {
			Some(value) => value,
			None => unreachable!("extension slot holds the keyed type"),
		}
	}

	/// Removes a typed property.
	pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
		self.extensions
			.remove(&TypeId::of::<T>())
			.and_then(|v| v.downcast::<T>().ok())
			.map(|v| *v)
	}

	/// Returns the memoized value stored under `key`.
	pub fn memoized(&self, key: MemoKey) -> Option<Arc<dyn Any + Send + Sync>> {
		self.memoized.get(&key).cloned()
	}

	/// Stores a memoized value under `key`.
	pub fn set_memoized(&mut self, key: MemoKey, value: Arc<dyn Any + Send + Sync>) {
		self.memoized.insert(key, value);
	}

	/// Number of memoized entries held by this context.
	pub fn memoized_len(&self) -> usize {
		self.memoized.len()
	}
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context")
			.field("extensions", &self.extensions.len())
			.field("memoized", &self.memoized.len())
			.finish()
	}
}
