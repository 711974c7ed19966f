//! Resolution error taxonomy.

use std::fmt;
use std::panic::Location;

use fusion_compose::BoxError;
use thiserror::Error;


/// A plugin that needed a token, with the site it was registered at.
#[derive(Debug, Clone)]
pub struct Dependent {
	/// Name of the dependent's registration token.
	pub name: String,
	/// Where the dependent was registered.
	pub site: &'static Location<'static>,
}

/// Diagnostic for a required token with no registration.
#[derive(Debug, Clone)]
pub struct MissingTokenReport {
	/// Name of the missing token.
	pub token: String,
	/// Where the missing token was created, when known.
	pub created_at: Option<&'static Location<'static>>,
	/// Every pending plugin that declared the token.
	pub dependents: Vec<Dependent>,
	/// Registration sites of other tokens sharing the missing token's name.
	pub same_name: Vec<&'static Location<'static>>,
}

impl fmt::Display for MissingTokenReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "missing registration for token `{}`", self.token)?;
		if let Some(created) = self.created_at {
			write!(f, " (created at {created})")?;
		}
		for dependent in &self.dependents {
			write!(f, "\n  required by `{}` registered at {}", dependent.name, dependent.site)?;
		}
		for site in &self.same_name {
			write!(
				f,
				"\n  note: a different token named `{}` is registered at {site}; tokens compare by identity, not by name",
				self.token
			)?;
		}
		Ok(())
	}
}

/// One participant in a dependency cycle.
#[derive(Debug, Clone)]
pub struct CycleMember {
	/// Token name of the participant.
	pub name: String,
	/// Where the participant was registered.
	pub site: &'static Location<'static>,
}

/// Diagnostic for mutually blocked registrations.
#[derive(Debug, Clone)]
pub struct CycleReport {
	/// Each distinct cycle, in dependency order starting from the member whose token was created first.
	pub cycles: Vec<Vec<CycleMember>>,
}

impl fmt::Display for CycleReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "circular dependency detected ({} cycle", self.cycles.len())?;
		if self.cycles.len() != 1 {
			f.write_str("s")?;
		}
		f.write_str(")")?;
		for cycle in &self.cycles {
			f.write_str("\n")?;
			f.write_str(&crate::scheduler::render_cycle(cycle))?;
		}
		Ok(())
	}
}

/// Errors raised while registering, resolving, or reading services.
#[derive(Debug, Error)]
pub enum Error {
	/// A required dependency was never registered.
	#[error("{0}")]
	MissingToken(Box<MissingTokenReport>),

	/// Registrations depend on each other in a loop.
	#[error("{0}")]
	CircularDependency(Box<CycleReport>),

	/// A plain value was registered without a token.
	#[error("cannot register a plain value without a token (at {site}); register it under a token or wrap it in a plugin")]
	ValueWithoutToken {
		/// Call site of the offending registration.
		site: &'static Location<'static>,
	},

	/// An alias was declared on the render registration.
	#[error("the render registration cannot be aliased")]
	RenderAlias,

	/// Resolution finished without a renderer.
	#[error("no renderer registered; register one under the render token before resolving")]
	MissingRender,

	/// A service was read before resolution.
	#[error("app is not resolved; call resolve() before reading services")]
	Unresolved,

	/// `resolve` was called more than once.
	#[error("app is already resolved")]
	AlreadyResolved,

	/// A plain value was registered but nothing depends on it.
	#[error("registered token `{token}` at {site} without depending on it")]
	UnusedRegistration {
		/// Name of the unused token.
		token: String,
		/// Where it was registered.
		site: &'static Location<'static>,
	},

	/// A single registration contributed more than one middleware.
	#[error("`{token}` contributed more than one middleware")]
	MultipleMiddleware {
		/// Name of the registration.
		token: String,
	},

	/// An enhancer targeted a registration that produced no value.
	#[error("cannot enhance `{token}`: its registration provides no value")]
	EnhanceUnprovided {
		/// Name of the enhanced token.
		token: String,
	},

	/// Enhancers were attached to a token that was never registered.
	#[error("`{token}` was enhanced at {site} but never registered")]
	OrphanEnhancer {
		/// Name of the enhanced token.
		token: String,
		/// Where the first enhancer was attached.
		site: &'static Location<'static>,
	},

	/// A plugin factory failed.
	#[error("`{token}` failed during resolution: {source}")]
	Provider {
		/// Name of the failing registration.
		token: String,
		/// Error returned by the factory.
		#[source]
		source: BoxError,
	},

	/// Synchronous resolution hit async startup work.
	#[error("startup for {} is still pending; use resolve_async()", .tokens.join(", "))]
	StartupPending {
		/// Names of the registrations waiting on startup futures.
		tokens: Vec<String>,
	},

	/// A resolved service is not of the type its token promises.
	#[error("token `{token}` does not hold a `{expected}`")]
	TypeMismatch {
		/// Name of the token.
		token: String,
		/// Requested type.
		expected: &'static str,
	},

	/// The token resolved to nothing and the caller asked for a required value.
	#[error("token `{token}` has no resolved value")]
	ServiceUnavailable {
		/// Name of the token.
		token: String,
	},

	/// A cleanup hook failed.
	#[error("cleanup failed: {0}")]
	Cleanup(#[source] BoxError),
}

impl Error {
	/// Returns true for [`Error::MissingToken`].
	pub fn is_missing_token(&self) -> bool {
		matches!(self, Self::MissingToken(_))
	}

	/// Returns true for [`Error::CircularDependency`].
	pub fn is_cycle(&self) -> bool {
		matches!(self, Self::CircularDependency(_))
	}
}

/// Result type for app operations.
pub type Result<T> = std::result::Result<T, Error>;
