//! The render step that runs after every other middleware.

use std::sync::Arc;

use fusion_compose::{BoxFuture, Context, Middleware, MiddlewareResult, Next};

/// Produces the response for a context once all middleware ran downstream.
pub trait Render: Send + Sync + 'static {
	/// Renders into `ctx`.
	fn render<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, MiddlewareResult>;
}

/// Shared renderer, the value held by an app's render token.
pub type Renderer = Arc<dyn Render>;

/// Adapter turning a closure into a [`Render`].
pub struct RenderFn<F>(F);

impl<F> Render for RenderFn<F>
where
	F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
	fn render<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, MiddlewareResult> {
		(self.0)(ctx)
	}
}

/// Wraps a closure as a [`Renderer`].
pub fn render_fn<F>(f: F) -> Renderer
where
	F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, MiddlewareResult> + Send + Sync + 'static,
{
	Arc::new(RenderFn(f))
}

/// Terminal middleware: render, then continue with whatever follows.
pub(crate) struct RenderMiddleware(pub(crate) Renderer);

impl Middleware for RenderMiddleware {
	fn call<'a>(&'a self, ctx: &'a mut Context, mut next: Next<'a>) -> BoxFuture<'a, MiddlewareResult> {
		Box::pin(async move {
			tracing::trace!("render.start");
			self.0.render(ctx).await?;
			next.run(ctx).await
		})
	}
}
