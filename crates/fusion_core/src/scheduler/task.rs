//! Per-registration state machines.

use std::panic::Location;
use std::sync::Arc;

use fusion_compose::BoxError;
use futures::FutureExt;

use super::{Cleanup, Lookup, Scheduler, Slot, Startup};
use crate::deps::{Deps, Service};
use crate::error::{Error, Result};
use crate::plugin::{ChildFactory, CleanupFn, EnhanceFn, ErasedPlugin, ErasedRegistration, MiddlewareFactory, Provider};
use crate::token::{TokenHandle, TokenId};

/// Outcome of advancing a task once.
pub(super) enum Step {
	/// Waiting on an unresolved slot; requeue at the back.
	Blocked,
	/// Changed shape; advance again before anything else.
	Progressed,
	/// Spawned child tasks that must run ahead of this one.
	Spawned(Vec<Task>),
	/// Handed off to a startup future.
	Detached(Startup),
	/// Finished with the slot's value.
	Complete(Option<Service>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Stage {
	Start,
	AwaitingDeps,
	AwaitingChildren,
	Providing,
	AwaitingAsync,
	Finishing,
}

pub(super) type Aliases = Arc<[(TokenId, TokenHandle)]>;

/// A plugin being driven through its stages.
pub(super) struct PluginRun {
	stage: Stage,
	deps: Deps,
	dep_slots: Vec<(Box<str>, Option<Slot>)>,
	child_slots: Vec<(Box<str>, Slot)>,
	provider: Option<Provider>,
	middleware: Vec<MiddlewareFactory>,
	cleanup: Option<CleanupFn>,
	children: Vec<(Box<str>, ChildFactory)>,
	value: Option<Service>,
}

enum State {
	Value(Option<Service>),
	Enhance {
		token: Arc<str>,
		source: Slot,
		enhance: Option<EnhanceFn>,
	},
	Plugin(Box<PluginRun>),
}

/// One schedulable unit: a registration, an enhancer link, or a child plugin.
pub(super) struct Task {
	pub(super) slot: Slot,
	pub(super) name: Arc<str>,
	pub(super) site: &'static Location<'static>,
	/// Declared dependencies after alias substitution.
	pub(super) wanted: Vec<(Box<str>, TokenHandle)>,
	aliases: Aliases,
	state: State,
}

impl Task {
	pub(super) fn value(slot: Slot, name: Arc<str>, site: &'static Location<'static>, value: Service) -> Self {
		Self {
			slot,
			name,
			site,
			wanted: Vec::new(),
			aliases: Arc::from([]),
			state: State::Value(Some(value)),
		}
	}

	pub(super) fn enhancer(
		slot: Slot,
		token: Arc<str>,
		index: usize,
		site: &'static Location<'static>,
		source: Slot,
		enhance: EnhanceFn,
		aliases: Aliases,
	) -> Self {
		Self {
			slot,
			name: format!("{token} (enhancer {index})").into(),
			site,
			wanted: Vec::new(),
			aliases,
			state: State::Enhance {
				token,
				source,
				enhance: Some(enhance),
			},
		}
	}

	pub(super) fn plugin(slot: Slot, name: Arc<str>, site: &'static Location<'static>, plugin: ErasedPlugin, aliases: Aliases) -> Self {
		let mut task = Self {
			slot,
			name,
			site,
			wanted: Vec::new(),
			aliases,
			state: State::Value(None),
		};
		task.become_plugin(plugin);
		task
	}

	fn become_plugin(&mut self, plugin: ErasedPlugin) {
		let ErasedPlugin {
			deps,
			provider,
			middleware,
			cleanup,
			children,
			..
		} = plugin;
		self.wanted = deps
			.into_iter()
			.map(|(key, handle)| {
				let handle = substitute(&self.aliases, handle);
				(key, handle)
			})
			.collect();
		self.state = State::Plugin(Box::new(PluginRun {
			stage: Stage::Start,
			deps: Deps::new(self.name.clone()),
			dep_slots: Vec::new(),
			child_slots: Vec::new(),
			provider,
			middleware,
			cleanup,
			children,
			value: None,
		}));
	}

	pub(super) fn stage(&self) -> Option<Stage> {
		match &self.state {
			State::Plugin(run) => Some(run.stage),
			_ => None,
		}
	}

	/// Stores a startup result and moves on to the finishing stage.
	pub(super) fn resume(&mut self, value: Service) {
		if let State::Plugin(run) = &mut self.state {
			run.value = Some(value);
			run.stage = Stage::Finishing;
		}
	}

	pub(super) fn fail(&self, source: BoxError) -> Error {
		Error::Provider {
			token: self.name.to_string(),
			source,
		}
	}
}

/// Applies the last alias declared for `handle`'s slot; the target keeps its own kind.
fn substitute(aliases: &[(TokenId, TokenHandle)], handle: TokenHandle) -> TokenHandle {
	match aliases.iter().rev().find(|(from, _)| *from == handle.id()) {
		Some((_, to)) => to.clone(),
		None => handle,
	}
}

impl Scheduler {
	pub(super) fn advance(&mut self, task: &mut Task) -> Result<Step> {
		let produced = match &mut task.state {
			State::Value(value) => return Ok(Step::Complete(value.take())),
			State::Plugin(_) => None,
			State::Enhance { token, source, enhance } => {
				let Some(previous) = self.resolved.get(source) else {
					return Ok(Step::Blocked);
				};
				let Some(previous) = previous.clone() else {
					return Err(Error::EnhanceUnprovided { token: token.to_string() });
				};
				let Some(enhance) = enhance.take() else {
					return Ok(Step::Blocked);
				};
				let next = match enhance(previous) {
					Ok(next) => next,
					Err(source) => return Err(task.fail(source)),
				};
				Some(next)
			}
		};

		match produced {
			Some(ErasedRegistration::Value(value)) => Ok(Step::Complete(Some(value))),
			Some(ErasedRegistration::Plugin(plugin)) => {
				self.note_declared(&plugin);
				task.become_plugin(plugin);
				tracing::trace!(task = %task.name, "scheduler.enhancer_plugin");
				Ok(Step::Progressed)
			}
			None => self.advance_plugin(task),
		}
	}

	fn advance_plugin(&mut self, task: &mut Task) -> Result<Step> {
		let Task {
			slot,
			name,
			site,
			wanted,
			aliases,
			state,
		} = task;
		let State::Plugin(run) = state else {
			return Ok(Step::Blocked);
		};
		let slot = *slot;
		let fail = |source: BoxError| Error::Provider {
			token: name.to_string(),
			source,
		};

		loop {
			match run.stage {
				Stage::Start => {
					if run.middleware.len() > 1 {
						return Err(Error::MultipleMiddleware { token: name.to_string() });
					}
					let mut slots = Vec::with_capacity(wanted.len());
					for (key, handle) in wanted.iter() {
						match self.lookup(handle) {
							Lookup::Slot(dep) => slots.push((key.clone(), Some(dep))),
							Lookup::Absent => slots.push((key.clone(), None)),
							Lookup::Missing => return Err(self.missing_token(handle, name, *site)),
						}
					}
					self.edges
						.entry(slot)
						.or_default()
						.extend(slots.iter().filter_map(|(_, dep)| *dep));
					run.dep_slots = slots;
					run.stage = Stage::AwaitingDeps;
				}
				Stage::AwaitingDeps => {
					let ready = run
						.dep_slots
						.iter()
						.all(|(_, dep)| dep.is_none_or(|dep| self.resolved.contains_key(&dep)));
					if !ready {
						return Ok(Step::Blocked);
					}
					for (key, dep) in &run.dep_slots {
						let value = dep.and_then(|dep| self.resolved.get(&dep).cloned().flatten());
						run.deps.insert(key.clone(), value);
					}
					if run.children.is_empty() {
						run.stage = Stage::Providing;
						continue;
					}

					let mut spawned = Vec::with_capacity(run.children.len());
					for (key, factory) in std::mem::take(&mut run.children) {
						let plugin = factory(&run.deps).map_err(fail)?;
						let child = Slot::Child(self.next_child);
						self.next_child += 1;
						self.note_declared(&plugin);
						let child_site = plugin.site;
						spawned.push(Task::plugin(child, format!("{name}/{key}").into(), child_site, plugin, aliases.clone()));
						run.child_slots.push((key, child));
					}
					self.edges
						.entry(slot)
						.or_default()
						.extend(run.child_slots.iter().map(|(_, child)| *child));
					run.stage = Stage::AwaitingChildren;
					tracing::trace!(task = %name, children = spawned.len(), "scheduler.spawn");
					return Ok(Step::Spawned(spawned));
				}
				Stage::AwaitingChildren => {
					if !run.child_slots.iter().all(|(_, child)| self.resolved.contains_key(child)) {
						return Ok(Step::Blocked);
					}
					for (key, child) in &run.child_slots {
						let value = self.resolved.get(child).cloned().flatten();
						run.deps.insert(key.clone(), value);
					}
					run.stage = Stage::Providing;
				}
				Stage::Providing => match run.provider.take() {
					None => run.stage = Stage::Finishing,
					Some(Provider::Sync(provide)) => {
						run.value = Some(provide(&run.deps).map_err(fail)?);
						run.stage = Stage::Finishing;
					}
					Some(Provider::Startup(start)) => {
						run.stage = Stage::AwaitingAsync;
						let startup = start(run.deps.clone()).map(move |result| (slot, result));
						return Ok(Step::Detached(Box::pin(startup)));
					}
				},
				Stage::AwaitingAsync => return Ok(Step::Blocked),
				Stage::Finishing => {
					if let Some(factory) = run.middleware.pop() {
						let middleware = factory(&run.deps, run.value.clone()).map_err(fail)?;
						self.middleware.insert(slot, middleware);
					}
					if let (Some(cleanup), Some(value)) = (run.cleanup.take(), run.value.clone()) {
						self.cleanups.insert(
							slot,
							Cleanup {
								name: name.clone(),
								run: cleanup,
								value,
							},
						);
					}
					return Ok(Step::Complete(run.value.take()));
				}
			}
		}
	}
}
