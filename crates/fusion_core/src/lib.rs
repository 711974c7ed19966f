//! Plugin dependency resolution for Fusion applications.
//!
//! Applications register values and [`Plugin`]s under typed [`Token`]s, then
//! call [`App::resolve`] once. Resolution runs every plugin factory exactly
//! once, dependencies first, and collects the middleware each plugin
//! contributes into one deterministic order:
//!
//! * dependencies before dependents
//! * child plugins before their parent
//! * enhancer middleware right after the registration it enhances
//! * the render registration last
//!
//! [`App::handler`] composes that list into a single middleware run once per
//! request [`Context`].

pub mod app;
pub mod config;
pub mod deps;
pub mod error;
pub mod memoize;
pub mod plugin;
pub mod render;
mod scheduler;
mod table;
pub mod token;

pub use app::{Aliaser, App};
pub use config::{ConfigError, ResolveOptions, Strictness};
pub use deps::{Deps, DepsError, Service};
pub use error::{CycleMember, CycleReport, Dependent, Error, MissingTokenReport, Result};
pub use fusion_compose::{BoxError, BoxFuture, BoxMiddleware, Composed, Context, Middleware, MiddlewareError, MiddlewareResult, Next, compose, middleware_fn};
pub use memoize::{Memoized, memoize};
pub use plugin::{Plugin, Registration};
pub use render::{Render, RenderFn, Renderer, render_fn};
pub use token::{CallSite, Dependency, OptionalToken, SiteEvent, Token, TokenHandle, TokenId, TokenKind};
