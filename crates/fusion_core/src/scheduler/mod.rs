//! Cooperative dependency scheduler.
//!
//! Every registered slot becomes a [`Task`]; enhancer links and spawned child
//! plugins get tasks of their own. The scheduler drains the pending queue
//! round-robin: a task whose dependencies are unresolved goes to the back,
//! a task that makes progress goes to the front. Async startup work is parked
//! in a [`FuturesUnordered`] and resumed when it settles.
//!
//! When a full pass over the queue makes no progress and nothing is in
//! flight, the remaining tasks wait on each other and the cycle is reported.

mod cycle;
mod order;
mod task;
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::panic::Location;
use std::sync::Arc;

use fusion_compose::{BoxError, BoxFuture, BoxMiddleware};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};

pub(crate) use self::cycle::render_cycle;
use self::task::{Aliases, Stage, Step, Task};
use crate::config::{ResolveOptions, Strictness};
use crate::deps::Service;
use crate::error::{Dependent, Error, MissingTokenReport, Result};
use crate::plugin::{CleanupFn, ErasedPlugin, ErasedRegistration};
use crate::table::RegistrationTable;
use crate::token::{TokenHandle, TokenId};

/// Identity of a schedulable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Slot {
	/// The value registered under a token.
	Token(TokenId),
	/// Output of the n-th enhancer applied to a token.
	Enhancer(TokenId, usize),
	/// A child plugin spawned during resolution.
	Child(usize),
}

enum Lookup {
	Slot(Slot),
	Absent,
	Missing,
}

type Startup = BoxFuture<'static, (Slot, std::result::Result<Service, BoxError>)>;

/// A pending teardown hook bound to the value its plugin provided.
pub(crate) struct Cleanup {
	pub(crate) name: Arc<str>,
	pub(crate) run: CleanupFn,
	pub(crate) value: Service,
}

/// Output of a completed resolution.
pub(crate) struct Resolution {
	/// Final value per registered token, read at the end of its enhancer chain.
	pub(crate) services: FxHashMap<TokenId, Option<Service>>,
	/// Middleware in canonical order.
	pub(crate) plugins: Vec<BoxMiddleware>,
	/// Cleanups in canonical order.
	pub(crate) cleanups: Vec<Cleanup>,
}

struct Registered {
	token: TokenHandle,
	site: &'static Location<'static>,
	plain_value: bool,
}

pub(crate) struct Scheduler {
	options: ResolveOptions,
	render: TokenId,
	pending: VecDeque<Task>,
	parked: FxHashMap<Slot, Task>,
	in_flight: FuturesUnordered<Startup>,
	resolved: FxHashMap<Slot, Option<Service>>,
	edges: FxHashMap<Slot, Vec<Slot>>,
	middleware: FxHashMap<Slot, BoxMiddleware>,
	cleanups: FxHashMap<Slot, Cleanup>,
	tails: FxHashMap<TokenId, Slot>,
	roots: Vec<TokenId>,
	registered: Vec<Registered>,
	depended: FxHashSet<TokenId>,
	next_child: usize,
	stall: usize,
}

impl Scheduler {
	/// Builds one task per registered slot and enhancer link.
	pub(crate) fn new(table: RegistrationTable, render: TokenId, options: ResolveOptions) -> Result<Self> {
		let mut scheduler = Self {
			options,
			render,
			pending: VecDeque::new(),
			parked: FxHashMap::default(),
			in_flight: FuturesUnordered::new(),
			resolved: FxHashMap::default(),
			edges: FxHashMap::default(),
			middleware: FxHashMap::default(),
			cleanups: FxHashMap::default(),
			tails: FxHashMap::default(),
			roots: Vec::new(),
			registered: Vec::new(),
			depended: FxHashSet::default(),
			next_child: 0,
			stall: 0,
		};

		let mut render_root = None;
		for entry in table.into_entries() {
			let id = entry.token.id();
			let name: Arc<str> = entry.token.name().into();
			let (Some(value), Some(site)) = (entry.value, entry.site) else {
				if let Some(first) = entry.enhancers.first() {
					scheduler.orphan_enhancer(&name, first.site)?;
				}
				continue;
			};

			let aliases: Aliases = entry.aliases.into_iter().map(|alias| (alias.from, alias.to)).collect();
			scheduler.depended.extend(aliases.iter().map(|(_, to)| to.id()));
			scheduler.registered.push(Registered {
				token: entry.token,
				site,
				plain_value: matches!(value, ErasedRegistration::Value(_)),
			});

			let root = Slot::Token(id);
			let task = match value {
				ErasedRegistration::Value(value) => Task::value(root, name.clone(), site, value),
				ErasedRegistration::Plugin(plugin) => {
					scheduler.note_declared(&plugin);
					Task::plugin(root, name.clone(), site, plugin, aliases.clone())
				}
			};
			scheduler.pending.push_back(task);

			let mut tail = root;
			for (index, enhancer) in entry.enhancers.into_iter().enumerate() {
				let link = Slot::Enhancer(id, index);
				scheduler.pending.push_back(Task::enhancer(
					link,
					name.clone(),
					index,
					enhancer.site,
					tail,
					enhancer.enhance,
					aliases.clone(),
				));
				scheduler.edges.entry(link).or_default().push(tail);
				tail = link;
			}
			scheduler.tails.insert(id, tail);

			if id == render {
				render_root = Some(id);
			} else {
				scheduler.roots.push(id);
			}
		}
		scheduler.roots.extend(render_root);

		tracing::debug!(
			tasks = scheduler.pending.len(),
			roots = scheduler.roots.len(),
			"scheduler.init"
		);
		Ok(scheduler)
	}

	fn orphan_enhancer(&self, name: &str, site: &'static Location<'static>) -> Result<()> {
		match self.options.orphan_enhancers {
			Strictness::Deny => Err(Error::OrphanEnhancer {
				token: name.to_string(),
				site,
			}),
			Strictness::Warn => {
				tracing::warn!(token = %name, %site, "scheduler.orphan_enhancer");
				Ok(())
			}
			Strictness::Allow => Ok(()),
		}
	}

	/// Records the pre-alias dependency declarations of a plugin.
	fn note_declared(&mut self, plugin: &ErasedPlugin) {
		self.depended.extend(plugin.deps.iter().map(|(_, handle)| handle.id()));
	}

	fn lookup(&self, handle: &TokenHandle) -> Lookup {
		match self.tails.get(&handle.id()) {
			Some(slot) => Lookup::Slot(*slot),
			None if handle.is_optional() => Lookup::Absent,
			None => Lookup::Missing,
		}
	}

	fn missing_token(&self, handle: &TokenHandle, name: &Arc<str>, site: &'static Location<'static>) -> Error {
		let mut dependents = vec![Dependent {
			name: name.to_string(),
			site,
		}];
		for task in self.pending.iter().chain(self.parked.values()) {
			if task.wanted.iter().any(|(_, wanted)| wanted.id() == handle.id() && !wanted.is_optional()) {
				dependents.push(Dependent {
					name: task.name.to_string(),
					site: task.site,
				});
			}
		}
		let same_name = self
			.registered
			.iter()
			.filter(|r| r.token.name() == handle.name() && r.token.id() != handle.id())
			.map(|r| r.site)
			.collect();

		tracing::debug!(token = %handle.name(), dependents = dependents.len(), "scheduler.missing_token");
		Error::MissingToken(Box::new(MissingTokenReport {
			token: handle.name().to_string(),
			created_at: handle.created_at(),
			dependents,
			same_name,
		}))
	}

	/// Advances pending tasks until the queue empties or everything left waits
	/// on in-flight startup work.
	fn drain(&mut self) -> Result<()> {
		while let Some(mut task) = self.pending.pop_front() {
			match self.advance(&mut task)? {
				Step::Blocked => {
					self.pending.push_back(task);
					self.stall += 1;
					if self.stall >= self.pending.len() {
						if self.in_flight.is_empty() {
							return Err(self.cycle_error());
						}
						return Ok(());
					}
				}
				Step::Progressed => {
					self.stall = 0;
					self.pending.push_front(task);
				}
				Step::Spawned(children) => {
					self.stall = 0;
					self.pending.push_front(task);
					for child in children.into_iter().rev() {
						self.pending.push_front(child);
					}
				}
				Step::Detached(startup) => {
					self.stall = 0;
					tracing::trace!(task = %task.name, "scheduler.detach");
					self.parked.insert(task.slot, task);
					self.in_flight.push(startup);
				}
				Step::Complete(value) => {
					self.stall = 0;
					tracing::trace!(task = %task.name, provided = value.is_some(), "scheduler.complete");
					self.resolved.insert(task.slot, value);
				}
			}
		}
		Ok(())
	}

	fn resume(&mut self, slot: Slot, result: std::result::Result<Service, BoxError>) -> Result<()> {
		let Some(mut task) = self.parked.remove(&slot) else {
			return Ok(());
		};
		let value = result.map_err(|source| task.fail(source))?;
		tracing::trace!(task = %task.name, "scheduler.resume");
		task.resume(value);
		self.stall = 0;
		self.pending.push_front(task);
		Ok(())
	}

	/// Resolves without an executor.
	///
	/// Startup futures that are ready on first poll are accepted; anything
	/// that actually suspends fails with [`Error::StartupPending`].
	pub(crate) fn run_sync(mut self) -> Result<Resolution> {
		loop {
			self.drain()?;
			if self.in_flight.is_empty() {
				return self.finish();
			}
			match self.in_flight.next().now_or_never() {
				Some(Some((slot, result))) => self.resume(slot, result)?,
				_ => {
					let tokens = self
						.parked
						.values()
						.filter(|task| task.stage() == Some(Stage::AwaitingAsync))
						.map(|task| task.name.to_string())
						.collect();
					return Err(Error::StartupPending { tokens });
				}
			}
		}
	}

	/// Resolves, awaiting startup futures as they settle.
	pub(crate) async fn run(mut self) -> Result<Resolution> {
		loop {
			self.drain()?;
			if self.in_flight.is_empty() {
				return self.finish();
			}
			match self.in_flight.next().await {
				Some((slot, result)) => self.resume(slot, result)?,
				None => return Err(self.cycle_error()),
			}
		}
	}

	fn finish(mut self) -> Result<Resolution> {
		if !self.pending.is_empty() {
			return Err(self.cycle_error());
		}
		self.check_unused()?;

		let roots: Vec<Slot> = self.roots.iter().filter_map(|id| self.tails.get(id).copied()).collect();
		let order = order::canonical_order(&roots, &self.edges);
		let plugins: Vec<_> = order.iter().filter_map(|slot| self.middleware.remove(slot)).collect();
		let cleanups: Vec<_> = order.iter().filter_map(|slot| self.cleanups.remove(slot)).collect();
		let services = self
			.tails
			.iter()
			.map(|(id, tail)| (*id, self.resolved.get(tail).cloned().flatten()))
			.collect();

		tracing::debug!(
			tasks = self.resolved.len(),
			middleware = plugins.len(),
			cleanups = cleanups.len(),
			"scheduler.resolved"
		);
		Ok(Resolution {
			services,
			plugins,
			cleanups,
		})
	}

	fn check_unused(&self) -> Result<()> {
		let unused = self
			.registered
			.iter()
			.filter(|r| r.plain_value && r.token.id() != self.render && !self.depended.contains(&r.token.id()));
		for registration in unused {
			match self.options.unused_registrations {
				Strictness::Deny => {
					return Err(Error::UnusedRegistration {
						token: registration.token.name().to_string(),
						site: registration.site,
					});
				}
				Strictness::Warn => {
					tracing::warn!(token = %registration.token.name(), site = %registration.site, "scheduler.unused_registration");
				}
				Strictness::Allow => {}
			}
		}
		Ok(())
	}
}
