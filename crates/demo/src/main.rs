//! Resolves the sample plugin graph and drives synthetic requests through it.

mod config;
mod plugins;

use std::path::PathBuf;

use clap::Parser;
use fusion_core::{App, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DemoConfig;
use crate::plugins::{RequestId, Response};

#[derive(Parser, Debug)]
#[command(name = "fusion-demo", about = "Resolve a sample Fusion plugin graph and serve requests")]
struct Args {
	/// TOML file with `[resolve]` and `[demo]` tables.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Number of requests to run, overriding the config file.
	#[arg(short = 'n', long)]
	requests: Option<usize>,

	/// Enable debug logging.
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let default_level = if args.verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => DemoConfig::load(path)?,
		None => DemoConfig::default(),
	};
	let requests = args.requests.unwrap_or(config.demo.requests);

	let mut app = App::with_renderer(plugins::renderer()).with_options(config.resolve);
	plugins::build(&mut app, config.demo)?;
	app.resolve_async().await?;
	info!(middleware = app.plugins()?.len(), "demo.resolved");

	let handler = app.handler()?;
	for id in 1..=requests as u64 {
		let mut ctx = Context::new();
		ctx.insert(RequestId(id));
		handler.run(&mut ctx).await?;
		if let Some(response) = ctx.get::<Response>() {
			for line in &response.lines {
				println!("{line}");
			}
		}
	}

	app.cleanup().await?;
	info!("demo.shutdown");
	Ok(())
}
