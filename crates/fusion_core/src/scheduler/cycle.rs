//! Cycle discovery over blocked tasks and its rendering.

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Scheduler, Slot};
use crate::error::{CycleMember, CycleReport, Error};

impl Scheduler {
	/// Reports every cycle among the tasks still pending.
	pub(super) fn cycle_error(&self) -> Error {
		let members: FxHashMap<Slot, CycleMember> = self
			.pending
			.iter()
			.map(|task| {
				(
					task.slot,
					CycleMember {
						name: task.name.to_string(),
						site: task.site,
					},
				)
			})
			.collect();
		let nodes: Vec<Slot> = self.pending.iter().map(|task| task.slot).collect();
		let cycles = find_cycles(&nodes, |slot| {
			self.edges
				.get(&slot)
				.into_iter()
				.flatten()
				.copied()
				.filter(|dep| members.contains_key(dep) && !self.resolved.contains_key(dep))
				.collect()
		});

		let cycles: Vec<Vec<CycleMember>> = cycles
			.into_iter()
			.map(|cycle| cycle.iter().filter_map(|slot| members.get(slot).cloned()).collect())
			.collect();
		tracing::debug!(pending = nodes.len(), cycles = cycles.len(), "scheduler.cycle");
		Error::CircularDependency(Box::new(CycleReport { cycles }))
	}
}

/// Finds cycles reachable from `roots` with an iterative depth-first walk.
///
/// Each cycle is rotated to start at its smallest slot and reported once.
pub(super) fn find_cycles(roots: &[Slot], successors: impl Fn(Slot) -> Vec<Slot>) -> Vec<Vec<Slot>> {
	let mut done = FxHashSet::default();
	let mut seen = FxHashSet::default();
	let mut cycles = Vec::new();

	for &root in roots {
		if done.contains(&root) {
			continue;
		}
		let mut path: Vec<Slot> = vec![root];
		let mut stack: Vec<(Vec<Slot>, usize)> = vec![(successors(root), 0)];

		while let Some((next, cursor)) = stack.last_mut() {
			let Some(&succ) = next.get(*cursor) else {
				stack.pop();
				if let Some(finished) = path.pop() {
					done.insert(finished);
				}
				continue;
			};
			*cursor += 1;

			if let Some(start) = path.iter().position(|slot| *slot == succ) {
				let mut cycle = path[start..].to_vec();
				let min = cycle.iter().enumerate().min_by_key(|(_, slot)| **slot).map_or(0, |(i, _)| i);
				cycle.rotate_left(min);
				if seen.insert(cycle.clone()) {
					cycles.push(cycle);
				}
			} else if !done.contains(&succ) {
				path.push(succ);
				stack.push((successors(succ), 0));
			}
		}
	}
	cycles
}

/// Draws a cycle as a column of boxes joined by "depends on" arrows, ending
/// with an arrow back to the first participant.
pub(crate) fn render_cycle(cycle: &[CycleMember]) -> String {
	let lines: Vec<(String, String)> = cycle
		.iter()
		.map(|member| (member.name.clone(), format!("registered at {}", member.site)))
		.collect();
	let width = lines
		.iter()
		.map(|(name, site)| name.len().max(site.len()))
		.max()
		.unwrap_or(0);
	let border = format!("+{}+", "-".repeat(width + 2));

	let mut out = String::new();
	for (index, (name, site)) in lines.iter().enumerate() {
		if index > 0 {
			out.push_str("      |\n      | depends on\n      v\n");
		}
		let _ = writeln!(out, "{border}");
		let _ = writeln!(out, "| {name:<width$} |");
		let _ = writeln!(out, "| {site:<width$} |");
		let _ = writeln!(out, "{border}");
	}
	if let Some((first, _)) = lines.first() {
		out.push_str("      |\n      | depends on\n      v\n");
		let _ = write!(out, "   (back to {first})");
	}
	out
}
