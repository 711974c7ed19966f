//! Koa-style composition of an ordered middleware list.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future;

use crate::{BoxFuture, BoxMiddleware, Context, Middleware, MiddlewareError, MiddlewareResult};


/// Continuation handed to a middleware; runs the rest of the chain.
///
/// Each handle may be run once. A second run resolves to
/// [`MiddlewareError::NextCalledMultipleTimes`] without touching the chain.
pub struct Next<'a> {
	chain: &'a [BoxMiddleware],
	index: usize,
	called: bool,
	outer: Option<Box<Next<'a>>>,
}

impl<'a> Next<'a> {
	/// Continuation with nothing after it.
	///
	/// Useful for invoking a single middleware outside of a composed chain.
	pub fn terminal() -> Self {
		Self {
			chain: &[],
			index: 0,
			called: false,
			outer: None,
		}
	}

	/// Runs the remainder of the chain against `ctx`.
	pub fn run<'b>(&'b mut self, ctx: &'b mut Context) -> BoxFuture<'b, MiddlewareResult>
	where
		'a: 'b,
	{
		if self.called {
			tracing::debug!(index = self.index, "compose.next_called_twice");
			return Box::pin(future::ready(Err(MiddlewareError::NextCalledMultipleTimes)));
		}
		self.called = true;
		dispatch(self.chain, self.index + 1, ctx, self.outer.take())
	}

	/// Returns true once this continuation has been run.
	pub fn is_called(&self) -> bool {
		self.called
	}
}

impl std::fmt::Debug for Next<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Next")
			.field("index", &self.index)
			.field("len", &self.chain.len())
			.field("called", &self.called)
			.finish()
	}
}

fn dispatch<'a, 'b>(chain: &'a [BoxMiddleware], index: usize, ctx: &'b mut Context, outer: Option<Box<Next<'a>>>) -> BoxFuture<'b, MiddlewareResult>
where
	'a: 'b,
{
	let Some(middleware) = chain.get(index) else {
		return match outer {
			Some(mut outer) => Box::pin(async move { outer.run(ctx).await }),
			None => Box::pin(future::ready(Ok(()))),
		};
	};

	let next = Next {
		chain,
		index,
		called: false,
		outer,
	};

	// A panic while the middleware builds its future becomes a failed result,
	// so callers observe every failure through the returned future.
	match std::panic::catch_unwind(AssertUnwindSafe(move || middleware.call(ctx, next))) {
		Ok(fut) => fut,
		Err(payload) => {
			let message = panic_message(payload.as_ref());
			tracing::warn!(index, %message, "compose.middleware_panicked");
			Box::pin(future::ready(Err(MiddlewareError::Panicked(message))))
		}
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// A single middleware built from an ordered list.
///
/// Cheap to clone; the underlying chain is shared.
#[derive(Clone)]
pub struct Composed {
	chain: Arc<[BoxMiddleware]>,
}

impl Composed {
	/// Runs the chain against `ctx` with nothing downstream of the last middleware.
	pub fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, MiddlewareResult> {
		dispatch(&self.chain, 0, ctx, None)
	}

	/// Number of middleware in the chain.
	pub fn len(&self) -> usize {
		self.chain.len()
	}

	/// Returns true for an empty chain.
	pub fn is_empty(&self) -> bool {
		self.chain.is_empty()
	}
}

impl Middleware for Composed {
	fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, MiddlewareResult> {
		dispatch(&self.chain, 0, ctx, Some(Box::new(next)))
	}
}

impl std::fmt::Debug for Composed {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Composed").field("len", &self.chain.len()).finish()
	}
}

/// Composes `middleware` into one onion-style middleware.
///
/// Downstream code runs in list order, upstream code in reverse order. A
/// composed chain can itself be nested inside another chain; the outer
/// continuation runs once the innermost middleware calls `next`.
pub fn compose<I>(middleware: I) -> Composed
where
	I: IntoIterator<Item = BoxMiddleware>,
{
	let chain: Arc<[BoxMiddleware]> = middleware.into_iter().collect();
	tracing::trace!(len = chain.len(), "compose.build");
	Composed { chain }
}
