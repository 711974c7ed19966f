use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::cycle::find_cycles;
use super::*;
use crate::config::Strictness;
use crate::error::CycleMember;
use crate::plugin::{Plugin, Registration, erase_enhancer};
use crate::token::{Dependency, Token};

fn scheduler(table: RegistrationTable) -> Result<Scheduler> {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let render: Token<()> = Token::new("Render");
	let options = ResolveOptions {
		unused_registrations: Strictness::Allow,
		..ResolveOptions::default()
	};
	Scheduler::new(table, render.id(), options)
}

fn register<T: Send + Sync + 'static>(table: &mut RegistrationTable, token: &Token<T>, registration: impl Into<Registration<T>>) {
	table.register(&token.handle(), registration.into().into_erased(), Location::caller());
}

fn value_of<T: Send + Sync + 'static>(resolution: &Resolution, token: &Token<T>) -> Option<Arc<T>> {
	resolution
		.services
		.get(&token.id())
		.cloned()
		.flatten()
		.and_then(|service| service.downcast::<T>().ok())
}

#[test]
fn resolves_dependencies_before_dependents() {
	let a: Token<u32> = Token::new("A");
	let b: Token<u32> = Token::new("B");
	let mut table = RegistrationTable::default();
	register(
		&mut table,
		&a,
		Plugin::new().dep("b", &b).provides(|deps| Ok(*deps.get::<u32>("b")? + 1)),
	);
	register(&mut table, &b, Plugin::new().provides(|_| Ok(41)));

	let resolution = scheduler(table).and_then(Scheduler::run_sync).expect("resolves");
	assert_eq!(value_of(&resolution, &a).as_deref(), Some(&42));
}

#[test]
fn cycle_is_reported_before_any_provider_runs() {
	let a: Token<u32> = Token::new("A");
	let b: Token<u32> = Token::new("B");
	let calls = Arc::new(AtomicUsize::new(0));
	let mut table = RegistrationTable::default();
	for (token, dep) in [(&a, &b), (&b, &a)] {
		let calls = calls.clone();
		register(
			&mut table,
			token,
			Plugin::new().dep("dep", dep).provides(move |_| {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(0)
			}),
		);
	}

	let err = scheduler(table).and_then(Scheduler::run_sync).err().expect("cycle");
	let Error::CircularDependency(report) = &err else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(report.cycles.len(), 1);
	let names: Vec<_> = report.cycles[0].iter().map(|m| m.name.as_str()).collect();
	assert_eq!(names, vec!["A", "B"]);
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	assert!(err.to_string().contains("depends on"));
}

#[test]
fn missing_token_lists_every_dependent() {
	let missing: Token<u32> = Token::new("Missing");
	let impostor: Token<u32> = Token::new("Missing");
	let a: Token<u32> = Token::new("A");
	let b: Token<u32> = Token::new("B");
	let mut table = RegistrationTable::default();
	register(&mut table, &a, Plugin::new().dep("m", &missing));
	register(&mut table, &b, Plugin::new().dep("m", &missing));
	register(&mut table, &impostor, Registration::value(0));

	let err = scheduler(table).and_then(Scheduler::run_sync).err().expect("missing");
	let Error::MissingToken(report) = &err else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(report.token, "Missing");
	let dependents: Vec<_> = report.dependents.iter().map(|d| d.name.as_str()).collect();
	assert_eq!(dependents, vec!["A", "B"]);
	assert_eq!(report.same_name.len(), 1);
}

#[test]
fn absent_optional_resolves_to_none() {
	let missing: Token<u32> = Token::new("Missing");
	let a: Token<bool> = Token::new("A");
	let mut table = RegistrationTable::default();
	register(
		&mut table,
		&a,
		Plugin::new()
			.dep("m", &missing.optional())
			.provides(|deps| Ok(deps.optional::<u32>("m")?.is_none())),
	);

	let resolution = scheduler(table).and_then(Scheduler::run_sync).expect("resolves");
	assert_eq!(value_of(&resolution, &a).as_deref(), Some(&true));
}

#[test]
fn children_resolve_ahead_of_parent() {
	let parent: Token<String> = Token::new("Parent");
	let base: Token<u32> = Token::new("Base");
	let mut table = RegistrationTable::default();
	register(&mut table, &base, Registration::value(2));
	register(
		&mut table,
		&parent,
		Plugin::new()
			.dep("base", &base)
			.child_with("double", |deps| {
				let base = deps.get::<u32>("base")?;
				Ok(Plugin::<u32>::new().provides(move |_| Ok(*base * 2)))
			})
			.provides(|deps| Ok(format!("child={}", deps.get::<u32>("double")?))),
	);

	let resolution = scheduler(table).and_then(Scheduler::run_sync).expect("resolves");
	assert_eq!(value_of(&resolution, &parent).as_deref().map(String::as_str), Some("child=4"));
}

#[test]
fn enhancer_chain_applies_in_order() {
	let a: Token<String> = Token::new("A");
	let mut table = RegistrationTable::default();
	register(&mut table, &a, Registration::value("x".to_string()));
	for suffix in ["1", "2", "3"] {
		table.enhance(
			&a.handle(),
			erase_enhancer(move |prev: Arc<String>| Registration::value(format!("{prev}{suffix}"))),
			Location::caller(),
		);
	}

	let resolution = scheduler(table).and_then(Scheduler::run_sync).expect("resolves");
	assert_eq!(value_of(&resolution, &a).as_deref().map(String::as_str), Some("x123"));
}

#[test]
fn enhancing_unprovided_value_fails() {
	let a: Token<u32> = Token::new("A");
	let mut table = RegistrationTable::default();
	register(&mut table, &a, Plugin::new());
	table.enhance(&a.handle(), erase_enhancer(|prev: Arc<u32>| Registration::Value(prev)), Location::caller());

	let err = scheduler(table).and_then(Scheduler::run_sync).err().expect("unprovided");
	assert!(matches!(err, Error::EnhanceUnprovided { ref token } if token == "A"));
}

#[test]
fn orphan_enhancer_follows_options() {
	let build = || {
		let a: Token<u32> = Token::new("Orphan");
		let mut table = RegistrationTable::default();
		table.enhance(&a.handle(), erase_enhancer(|prev: Arc<u32>| Registration::Value(prev)), Location::caller());
		table
	};
	let render: Token<()> = Token::new("Render");

	let warn = ResolveOptions::default();
	assert!(Scheduler::new(build(), render.id(), warn).is_ok());

	let deny = ResolveOptions {
		orphan_enhancers: Strictness::Deny,
		..ResolveOptions::default()
	};
	let err = Scheduler::new(build(), render.id(), deny).err().expect("orphan denied");
	assert!(matches!(err, Error::OrphanEnhancer { .. }));
}

#[test]
fn pending_startup_fails_synchronous_run() {
	let a: Token<u32> = Token::new("Slow");
	let mut table = RegistrationTable::default();
	register(
		&mut table,
		&a,
		Plugin::new().provides_async(|_| async {
			futures::future::pending::<()>().await;
			Ok(1)
		}),
	);

	let err = scheduler(table).and_then(Scheduler::run_sync).err().expect("pending");
	let Error::StartupPending { tokens } = &err else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(tokens, &vec!["Slow".to_string()]);
}

#[test]
fn ready_startup_completes_synchronously() {
	let a: Token<u32> = Token::new("Ready");
	let mut table = RegistrationTable::default();
	register(&mut table, &a, Plugin::new().provides_async(|_| async { Ok(7) }));

	let resolution = scheduler(table).and_then(Scheduler::run_sync).expect("resolves");
	assert_eq!(value_of(&resolution, &a).as_deref(), Some(&7));
}

#[tokio::test]
async fn dependents_wait_for_startup() {
	let slow: Token<u32> = Token::new("Slow");
	let fast: Token<u32> = Token::new("Fast");
	let mut table = RegistrationTable::default();
	register(
		&mut table,
		&fast,
		Plugin::new().dep("slow", &slow).provides(|deps| Ok(*deps.get::<u32>("slow")? + 1)),
	);
	register(
		&mut table,
		&slow,
		Plugin::new().provides_async(|_| async {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
			Ok(10)
		}),
	);

	let resolution = scheduler(table).expect("init").run().await.expect("resolves");
	assert_eq!(value_of(&resolution, &fast).as_deref(), Some(&11));
}

#[test]
fn multiple_middleware_is_rejected() {
	let a: Token<()> = Token::new("Greedy");
	let noop = || fusion_compose::middleware_fn(|_ctx, _next| Box::pin(async { Ok(()) }));
	let mut table = RegistrationTable::default();
	register(
		&mut table,
		&a,
		Plugin::new().middleware(move |_, _| Ok(noop())).middleware(move |_, _| Ok(noop())),
	);

	let err = scheduler(table).and_then(Scheduler::run_sync).err().expect("rejected");
	assert!(matches!(err, Error::MultipleMiddleware { ref token } if token == "Greedy"));
}

#[test]
fn unused_plain_value_is_denied_by_default() {
	let unused: Token<u32> = Token::new("Unused");
	let render: Token<()> = Token::new("Render");
	let mut table = RegistrationTable::default();
	register(&mut table, &unused, Registration::value(1));
	register(&mut table, &render, Registration::value(()));

	let err = Scheduler::new(table, render.id(), ResolveOptions::default())
		.and_then(Scheduler::run_sync)
		.err()
		.expect("unused");
	assert!(matches!(err, Error::UnusedRegistration { ref token, .. } if token == "Unused"));
}

#[test]
fn find_cycles_reports_each_loop_once() {
	let s = Slot::Child;
	let edges: FxHashMap<Slot, Vec<Slot>> = [
		(s(0), vec![s(1)]),
		(s(1), vec![s(2)]),
		(s(2), vec![s(0), s(3)]),
		(s(3), vec![s(3)]),
	]
	.into_iter()
	.collect();
	let cycles = find_cycles(&[s(1), s(0), s(3)], |slot| edges.get(&slot).cloned().unwrap_or_default());
	assert_eq!(cycles, vec![vec![s(0), s(1), s(2)], vec![s(3)]]);
}

#[test]
fn cycle_diagram_boxes_each_member() {
	let site = Location::caller();
	let diagram = render_cycle(&[
		CycleMember {
			name: "A".into(),
			site,
		},
		CycleMember {
			name: "B".into(),
			site,
		},
	]);
	let lines: Vec<&str> = diagram.lines().collect();
	assert!(lines[0].starts_with("+-"));
	assert!(lines[1].starts_with("| A "));
	assert!(lines[2].contains("registered at"));
	assert_eq!(diagram.matches("depends on").count(), 2);
	assert!(diagram.ends_with("(back to A)"));
}
