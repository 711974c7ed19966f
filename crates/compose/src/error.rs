//! Error types surfaced while running a middleware chain.

/// Type-erased error produced by middleware and plugin authors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by every middleware invocation.
pub type MiddlewareResult = std::result::Result<(), MiddlewareError>;

/// Failures raised while a request travels through a composed chain.
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
	/// A middleware invoked its `next` continuation more than once.
	#[error("next() called multiple times")]
	NextCalledMultipleTimes,

	/// A middleware panicked while building its future.
	#[error("middleware panicked: {0}")]
	Panicked(String),

	/// A middleware failed with an application error.
	#[error(transparent)]
	Failed(#[from] BoxError),
}

impl MiddlewareError {
	/// Wraps an arbitrary error as a middleware failure.
	pub fn failed(err: impl Into<BoxError>) -> Self {
		Self::Failed(err.into())
	}

	/// Returns true for the double-`next` contract violation.
	pub fn is_next_called_multiple_times(&self) -> bool {
		matches!(self, Self::NextCalledMultipleTimes)
	}
}
