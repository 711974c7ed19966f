//! The middleware contract and closure adapter.

use std::sync::Arc;

use crate::{BoxFuture, Context, MiddlewareResult, Next};

/// A `(ctx, next)` request handler participating in onion-style processing.
///
/// Code before `next.run(ctx).await` runs downstream (in chain order), code
/// after it runs upstream (in reverse order). Returning without running `next`
/// truncates the chain.
pub trait Middleware: Send + Sync + 'static {
	/// Handles one request context.
	fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, MiddlewareResult>;
}

/// Shared, type-erased middleware.
pub type BoxMiddleware = Arc<dyn Middleware>;

/// Middleware backed by a closure. See [`middleware_fn`].
#[derive(Clone)]
pub struct FnMiddleware<F> {
	f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
	F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
	fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, MiddlewareResult> {
		(self.f)(ctx, next)
	}
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("FnMiddleware(..)")
	}
}

/// Adapts a closure into a [`Middleware`].
///
/// ```ignore
/// let logger = middleware_fn(|ctx, mut next| {
/// 	Box::pin(async move {
/// 		let started = std::time::Instant::now();
/// 		next.run(ctx).await?;
/// 		tracing::info!(elapsed = ?started.elapsed(), "request");
/// 		Ok(())
/// 	})
/// });
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
	F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
	FnMiddleware { f }
}
