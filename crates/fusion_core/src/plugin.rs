//! Plugin descriptors and registrations.
//!
//! A [`Plugin`] is pure data: the dependencies it declares plus the factories
//! the scheduler invokes once those dependencies resolve. Nothing runs until
//! [`App::resolve`](crate::App::resolve).

use std::future::Future;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

use fusion_compose::{BoxError, BoxFuture, BoxMiddleware, Middleware};

use crate::deps::{Deps, Service};
use crate::token::{Dependency, TokenHandle};

pub(crate) type ProvideFn = Box<dyn FnOnce(&Deps) -> Result<Service, BoxError> + Send>;
pub(crate) type StartupFn = Box<dyn FnOnce(Deps) -> BoxFuture<'static, Result<Service, BoxError>> + Send>;
pub(crate) type MiddlewareFactory = Box<dyn FnOnce(&Deps, Option<Service>) -> Result<BoxMiddleware, BoxError> + Send>;
pub(crate) type CleanupFn = Box<dyn FnOnce(Service) -> BoxFuture<'static, Result<(), BoxError>> + Send>;
pub(crate) type ChildFactory = Box<dyn FnOnce(&Deps) -> Result<ErasedPlugin, BoxError> + Send>;
pub(crate) type EnhanceFn = Box<dyn FnOnce(Service) -> Result<ErasedRegistration, BoxError> + Send>;

/// How a plugin produces its service.
pub(crate) enum Provider {
	/// Computed synchronously from resolved dependencies.
	Sync(ProvideFn),
	/// Computed by an async startup function; resolution waits for it.
	Startup(StartupFn),
}

/// Type-erased plugin as seen by the scheduler.
pub(crate) struct ErasedPlugin {
	pub(crate) site: &'static Location<'static>,
	pub(crate) deps: Vec<(Box<str>, TokenHandle)>,
	pub(crate) provider: Option<Provider>,
	pub(crate) middleware: Vec<MiddlewareFactory>,
	pub(crate) cleanup: Option<CleanupFn>,
	pub(crate) children: Vec<(Box<str>, ChildFactory)>,
}

/// Type-erased registration.
pub(crate) enum ErasedRegistration {
	Value(Service),
	Plugin(ErasedPlugin),
}

/// Descriptor for a service of type `T`.
///
/// ```ignore
/// let session = Plugin::<Session>::new()
/// 	.dep("store", &STORE)
/// 	.dep("clock", &CLOCK.optional())
/// 	.provides(|deps| Ok(Session::new(deps.get::<Store>("store")?)))
/// 	.middleware(|_deps, session| Ok(SessionMiddleware::new(session)))
/// 	.cleanup(|session| async move { session.flush().await });
/// ```
pub struct Plugin<T> {
	inner: ErasedPlugin,
	_marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Plugin<T> {
	/// Creates an empty descriptor and records its creation site.
	#[track_caller]
	#[allow(clippy::new_without_default, reason = "records the caller location")]
	pub fn new() -> Self {
		Self {
			inner: ErasedPlugin {
				site: Location::caller(),
				deps: Vec::new(),
				provider: None,
				middleware: Vec::new(),
				cleanup: None,
				children: Vec::new(),
			},
			_marker: PhantomData,
		}
	}

	/// Declares a dependency readable from [`Deps`] under `key`.
	pub fn dep(mut self, key: impl Into<Box<str>>, token: &impl Dependency) -> Self {
		self.inner.deps.push((key.into(), token.handle()));
		self
	}

	/// Sets a synchronous factory for the service.
	pub fn provides<F>(mut self, f: F) -> Self
	where
		F: FnOnce(&Deps) -> Result<T, BoxError> + Send + 'static,
	{
		self.inner.provider = Some(Provider::Sync(Box::new(move |deps| f(deps).map(|v| Arc::new(v) as Service))));
		self
	}

	/// Sets an async startup factory for the service.
	///
	/// Apps using async providers must be resolved with
	/// [`App::resolve_async`](crate::App::resolve_async).
	pub fn provides_async<F, Fut>(mut self, f: F) -> Self
	where
		F: FnOnce(Deps) -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
	{
		self.inner.provider = Some(Provider::Startup(Box::new(move |deps| {
			let fut = f(deps);
			Box::pin(async move { fut.await.map(|v| Arc::new(v) as Service) })
		})));
		self
	}

	/// Adds a middleware factory, invoked with the resolved deps and service.
	///
	/// A plugin contributes at most one middleware; adding a second one makes
	/// resolution fail.
	pub fn middleware<F, M>(mut self, f: F) -> Self
	where
		F: FnOnce(&Deps, Option<Arc<T>>) -> Result<M, BoxError> + Send + 'static,
		M: Middleware,
	{
		self.inner.middleware.push(Box::new(move |deps, service| {
			let service = service.map(downcast::<T>).transpose()?;
			f(deps, service).map(|m| Arc::new(m) as BoxMiddleware)
		}));
		self
	}

	/// Sets a teardown hook receiving the exact value the factory produced.
	pub fn cleanup<F, Fut>(mut self, f: F) -> Self
	where
		F: FnOnce(Arc<T>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
	{
		self.inner.cleanup = Some(Box::new(move |service| match downcast::<T>(service) {
			Ok(service) => Box::pin(f(service)),
			Err(err) => Box::pin(async move { Err(err) }),
		}));
		self
	}

	/// Adds a nested plugin resolved as a dependency of this one.
	///
	/// The child inherits this plugin's aliases and its value is readable from
	/// [`Deps`] under `key`. Its middleware runs before this plugin's.
	pub fn child<U: Send + Sync + 'static>(self, key: impl Into<Box<str>>, plugin: Plugin<U>) -> Self {
		self.child_with(key, move |_| Ok(plugin))
	}

	/// Adds a nested plugin built from this plugin's resolved dependencies.
	pub fn child_with<U, F>(mut self, key: impl Into<Box<str>>, f: F) -> Self
	where
		U: Send + Sync + 'static,
		F: FnOnce(&Deps) -> Result<Plugin<U>, BoxError> + Send + 'static,
	{
		self.inner.children.push((key.into(), Box::new(move |deps| f(deps).map(Plugin::into_erased))));
		self
	}

	/// Where this descriptor was created.
	pub fn site(&self) -> &'static Location<'static> {
		self.inner.site
	}

	/// Dependency keys in declaration order.
	pub fn dep_keys(&self) -> impl Iterator<Item = &str> {
		self.inner.deps.iter().map(|(key, _)| &**key)
	}

	pub(crate) fn into_erased(self) -> ErasedPlugin {
		self.inner
	}
}

impl<T> std::fmt::Debug for Plugin<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Plugin")
			.field("site", &format_args!("{}", self.inner.site))
			.field("deps", &self.inner.deps.iter().map(|(k, t)| (k, t.name())).collect::<Vec<_>>())
			.field("provides", &self.inner.provider.is_some())
			.field("middleware", &self.inner.middleware.len())
			.field("cleanup", &self.inner.cleanup.is_some())
			.field("children", &self.inner.children.len())
			.finish()
	}
}

fn downcast<T: Send + Sync + 'static>(service: Service) -> Result<Arc<T>, BoxError> {
	service
		.downcast::<T>()
		.map_err(|_| format!("service is not a `{}`", std::any::type_name::<T>()).into())
}

/// A plain value or a plugin, decided at registration time.
pub enum Registration<T> {
	/// A ready value; resolves without running anything.
	Value(Arc<T>),
	/// A descriptor resolved by the scheduler.
	Plugin(Plugin<T>),
}

impl<T: Send + Sync + 'static> Registration<T> {
	/// Wraps a plain value.
	pub fn value(value: T) -> Self {
		Self::Value(Arc::new(value))
	}

	/// Returns true for plugin registrations.
	pub fn is_plugin(&self) -> bool {
		matches!(self, Self::Plugin(_))
	}

	pub(crate) fn into_erased(self) -> ErasedRegistration {
		match self {
			Self::Value(value) => ErasedRegistration::Value(value),
			Self::Plugin(plugin) => ErasedRegistration::Plugin(plugin.into_erased()),
		}
	}
}

impl<T> From<Plugin<T>> for Registration<T> {
	fn from(plugin: Plugin<T>) -> Self {
		Self::Plugin(plugin)
	}
}

impl<T> From<Arc<T>> for Registration<T> {
	fn from(value: Arc<T>) -> Self {
		Self::Value(value)
	}
}

impl<T> std::fmt::Debug for Registration<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Value(_) => f.write_str("Registration::Value(..)"),
			Self::Plugin(plugin) => f.debug_tuple("Registration::Plugin").field(plugin).finish(),
		}
	}
}

/// Wraps a typed enhancer for the scheduler.
pub(crate) fn erase_enhancer<T, F>(f: F) -> EnhanceFn
where
	T: Send + Sync + 'static,
	F: FnOnce(Arc<T>) -> Registration<T> + Send + 'static,
{
	Box::new(move |service| downcast::<T>(service).map(|prev| f(prev).into_erased()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::token::Token;

	#[test]
	fn builder_records_declarations() {
		let port: Token<u16> = Token::new("Port");
		let host: Token<String> = Token::new("Host");
		let plugin = Plugin::<String>::new()
			.dep("port", &port)
			.dep("host", &host.optional())
			.provides(|deps| Ok(format!("{}", deps.get::<u16>("port")?)));

		assert_eq!(plugin.dep_keys().collect::<Vec<_>>(), vec!["port", "host"]);
		assert!(plugin.site().file().ends_with("plugin.rs"));

		let erased = plugin.into_erased();
		assert!(erased.deps[1].1.is_optional());
		assert!(matches!(erased.provider, Some(Provider::Sync(_))));
	}

	#[test]
	fn registration_variants() {
		assert!(!Registration::value(1u8).is_plugin());
		assert!(Registration::from(Plugin::<u8>::new()).is_plugin());
	}
}
