//! Sample plugin graph.
//!
//! * `SettingsToken` is a plain value read by the store and session plugins.
//! * `StoreToken` connects asynchronously and flushes on cleanup.
//! * `ReplicaToken` stands in for the store wherever the audit plugin asks for it.
//! * `GreetingToken` is enhanced once to add punctuation.
//! * `SessionToken` exposes a memoized per-request session id and owns a
//!   request counter child.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use fusion_core::{App, BoxError, Context, Memoized, Plugin, Registration, Token, memoize, middleware_fn, render_fn};

use crate::config::Settings;

pub static SETTINGS: LazyLock<Token<Settings>> = LazyLock::new(|| Token::new("SettingsToken"));
pub static STORE: LazyLock<Token<Store>> = LazyLock::new(|| Token::new("StoreToken"));
pub static REPLICA: LazyLock<Token<Store>> = LazyLock::new(|| Token::new("ReplicaToken"));
pub static GREETING: LazyLock<Token<String>> = LazyLock::new(|| Token::new("GreetingToken"));
pub static SESSION: LazyLock<Token<Memoized<String>>> = LazyLock::new(|| Token::new("SessionToken"));
pub static AUDIT: LazyLock<Token<Audit>> = LazyLock::new(|| Token::new("AuditToken"));

/// Request id assigned by the driver loop.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub u64);

/// Position of a request as seen by the session counter.
#[derive(Debug, Clone, Copy)]
pub struct Ordinal(pub usize);

/// Accumulated output of one request.
#[derive(Debug, Default)]
pub struct Response {
	pub lines: Vec<String>,
	pub rendered: bool,
}

#[derive(Debug)]
pub struct Store {
	pub name: &'static str,
	hits: AtomicUsize,
}

impl Store {
	fn new(name: &'static str) -> Self {
		Self {
			name,
			hits: AtomicUsize::new(0),
		}
	}

	fn touch(&self) -> usize {
		self.hits.fetch_add(1, Ordering::Relaxed) + 1
	}

	pub fn hits(&self) -> usize {
		self.hits.load(Ordering::Relaxed)
	}
}

#[derive(Debug)]
pub struct Audit {
	store: Arc<Store>,
}

#[derive(Debug, Default)]
struct Counter(AtomicUsize);

pub fn build(app: &mut App, settings: Settings) -> anyhow::Result<()> {
	app.register_value(&SETTINGS, settings);
	app.register_value(&REPLICA, Store::new("replica"));

	app.register(
		&STORE,
		Plugin::new()
			.dep("settings", &*SETTINGS)
			.provides_async(|deps| async move {
				let latency = deps.get::<Settings>("settings")?.store_latency_ms;
				tokio::time::sleep(Duration::from_millis(latency)).await;
				tracing::info!(latency_ms = latency, "store.connected");
				Ok::<_, BoxError>(Store::new("primary"))
			})
			.cleanup(|store: Arc<Store>| async move {
				tracing::info!(store = store.name, hits = store.hits(), "store.flushed");
				Ok(())
			}),
	);

	app.register(
		&GREETING,
		Plugin::new()
			.dep("settings", &*SETTINGS)
			.provides(|deps| Ok(deps.get::<Settings>("settings")?.greeting.clone())),
	);
	app.enhance(&GREETING, |greeting: Arc<String>| Registration::value(format!("{greeting}!")));

	app.register(&SESSION, session_plugin());

	app.register(
		&AUDIT,
		Plugin::new()
			.dep("store", &*STORE)
			.provides(|deps| Ok(Audit { store: deps.get::<Store>("store")? }))
			.middleware(|_, audit: Option<Arc<Audit>>| {
				let audit = audit.ok_or("audit service missing")?;
				Ok(middleware_fn(move |ctx, mut next| {
					let hits = audit.store.touch();
					tracing::debug!(store = audit.store.name, hits, "audit.record");
					Box::pin(async move { next.run(ctx).await })
				}))
			}),
	)
	.alias(&*STORE, &*REPLICA)?;

	app.middleware(middleware_fn(|ctx, mut next| {
		Box::pin(async move {
			let started = Instant::now();
			next.run(ctx).await?;
			let id = ctx.get::<RequestId>().map_or(0, |id| id.0);
			tracing::info!(request = id, elapsed = ?started.elapsed(), "demo.request");
			Ok(())
		})
	}));

	app.middleware_with(
		Plugin::new()
			.dep("greeting", &*GREETING)
			.dep("session", &*SESSION)
			.dep("store", &*STORE),
		|deps| {
			let greeting = deps.get::<String>("greeting")?;
			let session = deps.get::<Memoized<String>>("session")?;
			let store = deps.get::<Store>("store")?;
			Ok(middleware_fn(move |ctx, mut next| {
				let greeting = greeting.clone();
				let session = session.clone();
				let store = store.clone();
				Box::pin(async move {
					let id = session.get(ctx);
					let hits = store.touch();
					ctx.get_or_default::<Response>()
						.lines
						.push(format!("{greeting} {id} (store hit {hits})"));
					next.run(ctx).await
				})
			}))
		},
	);

	Ok(())
}

fn session_plugin() -> Plugin<Memoized<String>> {
	let counter = Plugin::<Counter>::new()
		.provides(|_| Ok(Counter::default()))
		.middleware(|_, counter: Option<Arc<Counter>>| {
			let counter = counter.ok_or("counter service missing")?;
			Ok(middleware_fn(move |ctx, mut next| {
				let ordinal = counter.0.fetch_add(1, Ordering::Relaxed) + 1;
				Box::pin(async move {
					ctx.insert(Ordinal(ordinal));
					next.run(ctx).await
				})
			}))
		});

	Plugin::new()
		.dep("settings", &*SETTINGS)
		.child("counter", counter)
		.provides(|deps| {
			let prefix = deps.get::<Settings>("settings")?.session_prefix.clone();
			Ok(memoize(move |ctx: &mut Context| {
				let id = ctx.get::<RequestId>().map_or(0, |id| id.0);
				let ordinal = ctx.get::<Ordinal>().map_or(0, |ordinal| ordinal.0);
				format!("{prefix}-{id}#{ordinal}")
			}))
		})
}

pub fn renderer() -> fusion_core::Renderer {
	render_fn(|ctx| {
		Box::pin(async move {
			let response = ctx.get_or_default::<Response>();
			response.rendered = true;
			Ok(())
		})
	})
}

#[cfg(test)]
mod tests {
	use fusion_core::ResolveOptions;

	use super::*;

	async fn resolved(settings: Settings) -> App {
		let mut app = App::with_renderer(renderer()).with_options(ResolveOptions::default());
		build(&mut app, settings).expect("graph builds");
		app.resolve_async().await.expect("resolves");
		app
	}

	fn settings() -> Settings {
		Settings {
			store_latency_ms: 0,
			..Settings::default()
		}
	}

	#[tokio::test]
	async fn serves_enhanced_greeting_with_session() {
		let app = resolved(settings()).await;
		let handler = app.handler().expect("handler");

		let mut ctx = Context::new();
		ctx.insert(RequestId(7));
		handler.run(&mut ctx).await.expect("request");

		let response = ctx.get::<Response>().expect("response");
		assert!(response.rendered);
		assert_eq!(response.lines, vec!["hello! session-7#1 (store hit 1)".to_string()]);
	}

	#[tokio::test]
	async fn audit_reads_replica() {
		let app = resolved(settings()).await;
		let handler = app.handler().expect("handler");
		for id in 0..2 {
			let mut ctx = Context::new();
			ctx.insert(RequestId(id));
			handler.run(&mut ctx).await.expect("request");
		}
		assert_eq!(app.get_service(&*REPLICA).expect("replica").hits(), 2);
		assert_eq!(app.get_service(&*STORE).expect("store").hits(), 2);
	}

	#[tokio::test]
	async fn cleanup_flushes_store() {
		let mut app = resolved(settings()).await;
		app.cleanup().await.expect("cleanup");
	}
}
