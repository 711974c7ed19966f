//! Opaque registration keys.
//!
//! A [`Token`] names one registration slot. Identity is a process-unique
//! [`TokenId`]; the name is diagnostic only, so two tokens may share a name and
//! still be distinct. [`Token::optional`] yields a handle onto the same slot
//! whose absence resolves to `None` instead of failing resolution.

use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
	fn next() -> Self {
		Self(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for TokenId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Whether a missing registration fails resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
	/// Resolution fails when nothing is registered.
	Required,
	/// Resolves to `None` when nothing is registered.
	Optional,
}

/// What happened at a recorded call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteEvent {
	/// The token was created.
	Created,
	/// A value or plugin was registered under the token.
	Registered,
	/// The registered plugin was created here.
	Plugin,
	/// An enhancer was attached.
	Enhanced,
	/// The token was the source of an alias.
	AliasFrom,
	/// The token was the target of an alias.
	AliasTo,
}

impl SiteEvent {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Created => "created",
			Self::Registered => "registered",
			Self::Plugin => "plugin created",
			Self::Enhanced => "enhanced",
			Self::AliasFrom => "aliased from",
			Self::AliasTo => "aliased to",
		}
	}
}

/// A diagnostic call-site record attached to a token.
#[derive(Debug, Clone, Copy)]
pub struct CallSite {
	/// Event recorded at this site.
	pub event: SiteEvent,
	/// Source location of the call.
	pub location: &'static Location<'static>,
}

impl fmt::Display for CallSite {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} at {}", self.event.as_str(), self.location)
	}
}

struct TokenInner {
	id: TokenId,
	name: Box<str>,
	sites: Mutex<Vec<CallSite>>,
}

impl TokenInner {
	fn create(name: Box<str>, location: &'static Location<'static>) -> Arc<Self> {
		Arc::new(Self {
			id: TokenId::next(),
			name,
			sites: Mutex::new(vec![CallSite {
				event: SiteEvent::Created,
				location,
			}]),
		})
	}
}

/// Typed key for a registration slot holding a `T`.
pub struct Token<T> {
	inner: Arc<TokenInner>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Token<T> {
	/// Creates a fresh required token.
	#[track_caller]
	pub fn new(name: impl Into<Box<str>>) -> Self {
		Self {
			inner: TokenInner::create(name.into(), Location::caller()),
			_marker: PhantomData,
		}
	}

	/// Diagnostic name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Slot identity.
	pub fn id(&self) -> TokenId {
		self.inner.id
	}

	/// Optional counterpart sharing this token's slot.
	pub fn optional(&self) -> OptionalToken<T> {
		OptionalToken {
			inner: self.inner.clone(),
			_marker: PhantomData,
		}
	}

	/// Recorded call sites, oldest first.
	pub fn sites(&self) -> Vec<CallSite> {
		self.inner.sites.lock().clone()
	}
}

impl<T> Clone for Token<T> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> PartialEq for Token<T> {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl<T> Eq for Token<T> {}

impl<T> std::hash::Hash for Token<T> {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.inner.id.hash(state);
	}
}

impl<T> fmt::Debug for Token<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Token")
			.field("name", &self.inner.name)
			.field("id", &self.inner.id)
			.finish()
	}
}

/// Optional view of a [`Token`]'s slot.
pub struct OptionalToken<T> {
	inner: Arc<TokenInner>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> OptionalToken<T> {
	/// Diagnostic name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Slot identity, shared with the required token.
	pub fn id(&self) -> TokenId {
		self.inner.id
	}

	/// Required counterpart.
	pub fn required(&self) -> Token<T> {
		Token {
			inner: self.inner.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> Clone for OptionalToken<T> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> fmt::Debug for OptionalToken<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OptionalToken")
			.field("name", &self.inner.name)
			.field("id", &self.inner.id)
			.finish()
	}
}

/// Untyped token reference used by dependency declarations.
#[derive(Clone)]
pub struct TokenHandle {
	inner: Arc<TokenInner>,
	kind: TokenKind,
}

impl TokenHandle {
	/// Slot identity.
	pub fn id(&self) -> TokenId {
		self.inner.id
	}

	/// Diagnostic name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Required or optional.
	pub fn kind(&self) -> TokenKind {
		self.kind
	}

	/// Shorthand for `kind() == TokenKind::Optional`.
	pub fn is_optional(&self) -> bool {
		self.kind == TokenKind::Optional
	}

	/// Recorded call sites, oldest first.
	pub fn sites(&self) -> Vec<CallSite> {
		self.inner.sites.lock().clone()
	}

	/// Location where the token was created.
	pub fn created_at(&self) -> Option<&'static Location<'static>> {
		self.inner
			.sites
			.lock()
			.iter()
			.find(|site| site.event == SiteEvent::Created)
			.map(|site| site.location)
	}

	pub(crate) fn record(&self, event: SiteEvent, location: &'static Location<'static>) {
		self.inner.sites.lock().push(CallSite { event, location });
	}

	pub(crate) fn to_required(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			kind: TokenKind::Required,
		}
	}
}

impl fmt::Debug for TokenHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TokenHandle")
			.field("name", &self.inner.name)
			.field("id", &self.inner.id)
			.field("kind", &self.kind)
			.finish()
	}
}

mod sealed {
	pub trait Sealed {}
	impl<T> Sealed for super::Token<T> {}
	impl<T> Sealed for super::OptionalToken<T> {}
}

/// Something a plugin can depend on: a [`Token`] or an [`OptionalToken`].
pub trait Dependency: sealed::Sealed {
	/// Type of the service held by the slot.
	type Service: Send + Sync + 'static;
	/// What a lookup yields: `Arc<T>` or `Option<Arc<T>>`.
	type Output;

	/// Untyped handle carrying identity and kind.
	fn handle(&self) -> TokenHandle;

	/// Converts a raw lookup; `None` means a required slot had no value.
	fn from_resolved(value: Option<Arc<Self::Service>>) -> Option<Self::Output>;
}

impl<T: Send + Sync + 'static> Dependency for Token<T> {
	type Service = T;
	type Output = Arc<T>;

	fn handle(&self) -> TokenHandle {
		TokenHandle {
			inner: self.inner.clone(),
			kind: TokenKind::Required,
		}
	}

	fn from_resolved(value: Option<Arc<T>>) -> Option<Arc<T>> {
		value
	}
}

impl<T: Send + Sync + 'static> Dependency for OptionalToken<T> {
	type Service = T;
	type Output = Option<Arc<T>>;

	fn handle(&self) -> TokenHandle {
		TokenHandle {
			inner: self.inner.clone(),
			kind: TokenKind::Optional,
		}
	}

	fn from_resolved(value: Option<Arc<T>>) -> Option<Option<Arc<T>>> {
		Some(value)
	}
}
