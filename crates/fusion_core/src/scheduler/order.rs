//! Canonical middleware order.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Slot;

/// Post-order walk over requested edges, roots taken in the given order.
///
/// Every slot appears after the slots it requested: dependencies before
/// dependents, children before their parent, and each enhancer link right
/// after the link it wraps.
pub(super) fn canonical_order(roots: &[Slot], edges: &FxHashMap<Slot, Vec<Slot>>) -> Vec<Slot> {
	let mut visited = FxHashSet::default();
	let mut order = Vec::new();
	let mut stack: Vec<(Slot, usize)> = Vec::new();

	for &root in roots {
		if !visited.insert(root) {
			continue;
		}
		stack.push((root, 0));
		while let Some((slot, cursor)) = stack.last_mut() {
			let next = edges.get(slot).and_then(|deps| deps.get(*cursor)).copied();
			*cursor += 1;
			match next {
				Some(dep) => {
					if visited.insert(dep) {
						stack.push((dep, 0));
					}
				}
				None => {
					order.push(*slot);
					stack.pop();
				}
			}
		}
	}
	order
}
