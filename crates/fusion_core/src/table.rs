//! Registration table frozen at resolve time.

use std::panic::Location;

use indexmap::{IndexMap, IndexSet};

use crate::plugin::{EnhanceFn, ErasedRegistration};
use crate::token::{SiteEvent, TokenHandle, TokenId};

/// Dependency substitution declared on one registration.
pub(crate) struct Alias {
	pub(crate) from: TokenId,
	pub(crate) to: TokenHandle,
}

pub(crate) struct Enhancer {
	pub(crate) enhance: EnhanceFn,
	pub(crate) site: &'static Location<'static>,
}

/// Everything accumulated under one token slot.
pub(crate) struct Entry {
	pub(crate) token: TokenHandle,
	pub(crate) value: Option<ErasedRegistration>,
	pub(crate) site: Option<&'static Location<'static>>,
	pub(crate) aliases: Vec<Alias>,
	pub(crate) enhancers: Vec<Enhancer>,
}

impl Entry {
	fn new(token: TokenHandle) -> Self {
		Self {
			token,
			value: None,
			site: None,
			aliases: Vec::new(),
			enhancers: Vec::new(),
		}
	}
}

/// Token slot to registration mapping, keyed by slot identity.
///
/// A slot is created by whichever of `register` or `enhance` touches it first.
/// Re-registering replaces the value and keeps aliases and enhancers.
#[derive(Default)]
pub(crate) struct RegistrationTable {
	entries: IndexMap<TokenId, Entry>,
	order: IndexSet<TokenId>,
}

impl RegistrationTable {
	fn slot(&mut self, token: &TokenHandle) -> &mut Entry {
		self.entries
			.entry(token.id())
			.or_insert_with(|| Entry::new(token.to_required()))
	}

	pub(crate) fn register(&mut self, token: &TokenHandle, value: ErasedRegistration, site: &'static Location<'static>) {
		token.record(SiteEvent::Registered, site);
		if let ErasedRegistration::Plugin(plugin) = &value {
			token.record(SiteEvent::Plugin, plugin.site);
		}
		let entry = self.slot(token);
		if entry.value.is_some() {
			tracing::debug!(token = %token.name(), %site, "table.replace");
		}
		entry.value = Some(value);
		entry.site = Some(site);
		self.order.insert(token.id());
	}

	/// Declares that `owner`'s plugin reads `to` wherever it asked for `from`.
	pub(crate) fn alias(&mut self, owner: TokenId, from: &TokenHandle, to: TokenHandle, site: &'static Location<'static>) {
		let Some(entry) = self.entries.get_mut(&owner) else {
			tracing::debug!(token = %from.name(), %site, "table.alias_without_owner");
			return;
		};
		from.record(SiteEvent::AliasFrom, site);
		to.record(SiteEvent::AliasTo, site);
		entry.aliases.push(Alias { from: from.id(), to });
	}

	pub(crate) fn enhance(&mut self, token: &TokenHandle, enhance: EnhanceFn, site: &'static Location<'static>) {
		token.record(SiteEvent::Enhanced, site);
		self.slot(token).enhancers.push(Enhancer { enhance, site });
	}

	pub(crate) fn is_registered(&self, id: TokenId) -> bool {
		self.entries.get(&id).is_some_and(|entry| entry.value.is_some())
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	/// Consumes the table: registered slots in first-registration order,
	/// then enhancer-only slots in the order they were first enhanced.
	pub(crate) fn into_entries(mut self) -> Vec<Entry> {
		let mut out = Vec::with_capacity(self.entries.len());
		for id in &self.order {
			if let Some(entry) = self.entries.shift_remove(id) {
				out.push(entry);
			}
		}
		out.extend(self.entries.into_values());
		out
	}
}
