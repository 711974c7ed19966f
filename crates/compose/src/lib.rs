//! Onion-style middleware composition for Fusion applications.
//!
//! This crate provides the request-time half of the framework core:
//! * `Context`: per-request state shared by every middleware in a chain
//! * `Middleware`: the `(ctx, next)` contract middleware authors implement
//! * `Next`: continuation handle that runs the remainder of a chain at most once
//! * `compose`: folds an ordered list of middleware into one `Composed` middleware

#![warn(missing_docs)]

pub mod compose;
pub mod context;
pub mod error;
pub mod middleware;

pub use compose::{Composed, Next, compose};
pub use context::{Context, MemoKey};
pub use error::{BoxError, MiddlewareError, MiddlewareResult};
pub use middleware::{BoxMiddleware, FnMiddleware, Middleware, middleware_fn};

/// Boxed, sendable future returned by middleware.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
