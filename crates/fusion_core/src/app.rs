//! Registration and resolution surface.

use std::panic::Location;
use std::sync::Arc;

use fusion_compose::{BoxError, BoxMiddleware, Composed, Middleware, compose};
use futures::FutureExt;
use futures::future::try_join_all;
use rustc_hash::FxHashMap;

use crate::config::ResolveOptions;
use crate::deps::{Deps, Service};
use crate::error::{Error, MissingTokenReport, Result};
use crate::plugin::{ErasedRegistration, Plugin, Registration, erase_enhancer};
use crate::render::{RenderMiddleware, Renderer};
use crate::scheduler::{Cleanup, Resolution, Scheduler};
use crate::table::RegistrationTable;
use crate::token::{Dependency, Token, TokenHandle, TokenId};


enum Phase {
	Registering(RegistrationTable),
	/// Registrations were handed to the scheduler; stays here if resolution fails.
	Consumed,
	Resolved(Box<Resolved>),
}

struct Resolved {
	services: FxHashMap<TokenId, Option<Service>>,
	plugins: Vec<BoxMiddleware>,
	cleanups: Vec<Cleanup>,
	renderer: Option<Renderer>,
}

/// A plugin graph and, once resolved, its services and middleware.
///
/// ```ignore
/// let mut app = App::with_renderer(render_fn(|ctx| Box::pin(async move { Ok(()) })));
/// app.register(&STORE, Plugin::new().provides(|_| Ok(Store::default())));
/// app.register(&SESSION, session_plugin()).alias(&CLOCK, &TEST_CLOCK)?;
/// app.resolve()?;
/// let handler = app.handler()?;
/// ```
pub struct App {
	phase: Phase,
	render: Token<Renderer>,
	options: ResolveOptions,
}

impl App {
	/// Creates an app with no renderer registered yet.
	#[track_caller]
	#[allow(clippy::new_without_default, reason = "records the caller location")]
	pub fn new() -> Self {
		Self {
			phase: Phase::Registering(RegistrationTable::default()),
			render: Token::new("RenderToken"),
			options: ResolveOptions::default(),
		}
	}

	/// Creates an app with `renderer` registered under its render token.
	#[track_caller]
	pub fn with_renderer(renderer: Renderer) -> Self {
		let mut app = Self::new();
		let token = app.render.clone();
		app.register(&token, Registration::value(renderer));
		app
	}

	/// Replaces the resolve options.
	pub fn with_options(mut self, options: ResolveOptions) -> Self {
		self.options = options;
		self
	}

	/// Token under which the renderer is registered.
	///
	/// Its registration always resolves and runs last.
	pub fn render_token(&self) -> &Token<Renderer> {
		&self.render
	}

	/// Options consulted by [`App::resolve`].
	pub fn options(&self) -> &ResolveOptions {
		&self.options
	}

	/// Registers a value or plugin under `token`; later registrations win.
	#[track_caller]
	pub fn register<T: Send + Sync + 'static>(&mut self, token: &Token<T>, registration: impl Into<Registration<T>>) -> Aliaser<'_> {
		let site = Location::caller();
		let handle = token.handle();
		self.insert(&handle, registration.into().into_erased(), site);
		Aliaser {
			app: self,
			owner: handle.id(),
		}
	}

	/// Registers a plain value under `token`.
	#[track_caller]
	pub fn register_value<T: Send + Sync + 'static>(&mut self, token: &Token<T>, value: T) -> Aliaser<'_> {
		self.register(token, Registration::value(value))
	}

	/// Registers a plugin nothing can depend on, for its middleware or side effects.
	///
	/// Registering a plain value this way is an error: nothing could ever read it.
	#[track_caller]
	pub fn register_plugin<T: Send + Sync + 'static>(&mut self, registration: impl Into<Registration<T>>) -> Result<Aliaser<'_>> {
		let plugin = match registration.into() {
			Registration::Value(_) => {
				return Err(Error::ValueWithoutToken {
					site: Location::caller(),
				});
			}
			Registration::Plugin(plugin) => plugin,
		};
		let token = Token::<T>::new("UnnamedPlugin");
		Ok(self.register(&token, plugin))
	}

	/// Registers an anonymous plugin contributing only `middleware`.
	#[track_caller]
	pub fn middleware<M: Middleware>(&mut self, middleware: M) {
		let plugin = Plugin::<()>::new().middleware(move |_, _| Ok(middleware));
		let token = Token::<()>::new("UnnamedMiddleware");
		self.register(&token, plugin);
	}

	/// Registers an anonymous middleware built from the dependencies declared on `deps`.
	///
	/// ```ignore
	/// app.middleware_with(Plugin::new().dep("store", &STORE), |deps| {
	/// 	Ok(StoreMiddleware::new(deps.get::<Store>("store")?))
	/// });
	/// ```
	#[track_caller]
	pub fn middleware_with<F, M>(&mut self, deps: Plugin<()>, factory: F)
	where
		F: FnOnce(&Deps) -> std::result::Result<M, BoxError> + Send + 'static,
		M: Middleware,
	{
		let plugin = deps.middleware(move |deps, _| factory(deps));
		let token = Token::<()>::new("UnnamedMiddleware");
		self.register(&token, plugin);
	}

	/// Appends an enhancer to `token`'s chain.
	///
	/// The enhancer receives the previous link's value: the registered value for
	/// the first enhancer, the prior enhancer's output after that.
	#[track_caller]
	pub fn enhance<T, F>(&mut self, token: &Token<T>, enhancer: F)
	where
		T: Send + Sync + 'static,
		F: FnOnce(Arc<T>) -> Registration<T> + Send + 'static,
	{
		let site = Location::caller();
		let handle = token.handle();
		match &mut self.phase {
			Phase::Registering(table) => table.enhance(&handle, erase_enhancer(enhancer), site),
			_ => tracing::warn!(token = %handle.name(), %site, "app.enhance_after_resolve"),
		}
	}

	fn insert(&mut self, handle: &TokenHandle, value: ErasedRegistration, site: &'static Location<'static>) {
		match &mut self.phase {
			Phase::Registering(table) => {
				tracing::trace!(token = %handle.name(), %site, "app.register");
				table.register(handle, value, site);
			}
			_ => tracing::warn!(token = %handle.name(), %site, "app.register_after_resolve"),
		}
	}

	/// Resolves every registration synchronously.
	///
	/// Fails with [`Error::StartupPending`] if an async startup does not
	/// complete on first poll; use [`App::resolve_async`] for those graphs.
	pub fn resolve(&mut self) -> Result<()> {
		let scheduler = self.begin()?;
		let resolution = scheduler.run_sync()?;
		self.complete(resolution);
		Ok(())
	}

	/// Resolves every registration, awaiting async startups.
	pub async fn resolve_async(&mut self) -> Result<()> {
		let scheduler = self.begin()?;
		let resolution = scheduler.run().await?;
		self.complete(resolution);
		Ok(())
	}

	fn begin(&mut self) -> Result<Scheduler> {
		let table = match std::mem::replace(&mut self.phase, Phase::Consumed) {
			Phase::Registering(table) => table,
			other => {
				self.phase = other;
				return Err(Error::AlreadyResolved);
			}
		};
		if self.options.require_render && !table.is_registered(self.render.id()) {
			return Err(Error::MissingRender);
		}
		tracing::debug!(registrations = table.len(), "app.resolve");
		Scheduler::new(table, self.render.id(), self.options.clone())
	}

	fn complete(&mut self, resolution: Resolution) {
		let Resolution {
			services,
			plugins,
			cleanups,
		} = resolution;
		let renderer = services
			.get(&self.render.id())
			.cloned()
			.flatten()
			.and_then(|service| service.downcast::<Renderer>().ok())
			.map(|renderer| (*renderer).clone());
		tracing::info!(services = services.len(), middleware = plugins.len(), "app.resolved");
		self.phase = Phase::Resolved(Box::new(Resolved {
			services,
			plugins,
			cleanups,
			renderer,
		}));
	}

	fn resolved(&self) -> Result<&Resolved> {
		match &self.phase {
			Phase::Resolved(resolved) => Ok(resolved),
			_ => Err(Error::Unresolved),
		}
	}

	/// Returns true once [`App::resolve`] succeeded.
	pub fn is_resolved(&self) -> bool {
		matches!(self.phase, Phase::Resolved(_))
	}

	/// Reads a resolved service.
	///
	/// A required token yields `Arc<T>`; an optional one yields `Option<Arc<T>>`.
	pub fn get_service<D: Dependency>(&self, token: &D) -> Result<D::Output> {
		let resolved = self.resolved()?;
		let handle = token.handle();
		let value = match resolved.services.get(&handle.id()) {
			Some(value) => value.clone(),
			None if handle.is_optional() => None,
			None => {
				return Err(Error::MissingToken(Box::new(MissingTokenReport {
					token: handle.name().to_string(),
					created_at: handle.created_at(),
					dependents: Vec::new(),
					same_name: Vec::new(),
				})));
			}
		};
		let typed = value
			.map(|service| service.downcast::<D::Service>())
			.transpose()
			.map_err(|_| Error::TypeMismatch {
				token: handle.name().to_string(),
				expected: std::any::type_name::<D::Service>(),
			})?;
		D::from_resolved(typed).ok_or_else(|| Error::ServiceUnavailable {
			token: handle.name().to_string(),
		})
	}

	/// Middleware contributed by plugins, in canonical order.
	pub fn plugins(&self) -> Result<&[BoxMiddleware]> {
		Ok(&self.resolved()?.plugins)
	}

	/// Composes the plugin middleware with the render step appended.
	pub fn handler(&self) -> Result<Composed> {
		let resolved = self.resolved()?;
		let render = resolved
			.renderer
			.clone()
			.map(|renderer| Arc::new(RenderMiddleware(renderer)) as BoxMiddleware);
		Ok(compose(resolved.plugins.iter().cloned().chain(render)))
	}

	/// Runs every plugin cleanup with the value its plugin provided.
	///
	/// Cleanups run concurrently and the first failure is returned. They are
	/// consumed: a second call does nothing.
	pub async fn cleanup(&mut self) -> Result<()> {
		let cleanups = match &mut self.phase {
			Phase::Resolved(resolved) => std::mem::take(&mut resolved.cleanups),
			_ => return Err(Error::Unresolved),
		};
		tracing::debug!(count = cleanups.len(), "app.cleanup");
		let runs = cleanups.into_iter().map(|cleanup| {
			let Cleanup { name, run, value } = cleanup;
			run(value).map(move |result| {
				result.inspect_err(|err| tracing::warn!(token = %name, error = %err, "app.cleanup_failed"))
			})
		});
		try_join_all(runs).await.map_err(Error::Cleanup)?;
		Ok(())
	}
}

impl std::fmt::Debug for App {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let phase = match &self.phase {
			Phase::Registering(_) => "registering",
			Phase::Consumed => "consumed",
			Phase::Resolved(_) => "resolved",
		};
		f.debug_struct("App")
			.field("phase", &phase)
			.field("options", &self.options)
			.finish()
	}
}

/// Declares dependency substitutions for the registration that produced it.
pub struct Aliaser<'a> {
	app: &'a mut App,
	owner: TokenId,
}

impl Aliaser<'_> {
	/// Wherever this registration's plugin depends on `from`, it reads `to` instead.
	///
	/// Other registrations keep seeing `from`. The substitution carries over to
	/// child plugins and to plugins produced by this token's enhancers.
	#[track_caller]
	pub fn alias<A, B>(self, from: &A, to: &B) -> Result<Self>
	where
		A: Dependency,
		B: Dependency<Service = A::Service>,
	{
		if self.owner == self.app.render.id() {
			return Err(Error::RenderAlias);
		}
		let site = Location::caller();
		let from = from.handle();
		match &mut self.app.phase {
			Phase::Registering(table) => table.alias(self.owner, &from, to.handle(), site),
			_ => tracing::warn!(token = %from.name(), %site, "app.alias_after_resolve"),
		}
		Ok(self)
	}
}
