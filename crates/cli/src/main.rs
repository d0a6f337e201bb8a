use std::sync::Arc;

use anyhow::{Context, Result};
use chatmux::{DriverEngineFactory, SessionManager};
use chatmux_cli::cli::{Cli, Commands, ConfigArgs, ServeArgs};
use chatmux_cli::config::{self, ServerConfig};
use chatmux_cli::{logging, server};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = dispatch(cli.command).await {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}

async fn dispatch(command: Commands) -> Result<()> {
	match command {
		Commands::Serve(args) => serve(args).await,
		Commands::Config(args) => print_config(args),
	}
}

/// With `require_file`, an explicit `--config` must exist.
fn effective_config(args: &ServeArgs, require_file: bool) -> Result<ServerConfig> {
	let mut config = match (&args.config, require_file) {
		(Some(path), false) => ServerConfig::load(path)?.unwrap_or_default(),
		(explicit, _) => ServerConfig::resolve(explicit.as_deref())?,
	};
	config.merge(args.overrides());
	Ok(config)
}

async fn serve(args: ServeArgs) -> Result<()> {
	let config = effective_config(&args, true)?;
	info!(
		target = "chatmux.server",
		driver = %config.driver.program.display(),
		auth_dir = %config.auth_dir.display(),
		max_auth_challenges = config.max_auth_challenges,
		"starting"
	);

	let factory = Arc::new(DriverEngineFactory::new(config.driver_config()));
	let manager = SessionManager::new(factory, config.manager_config());
	server::serve(&config.host, config.port, manager).await
}

fn print_config(args: ConfigArgs) -> Result<()> {
	let config = effective_config(&args.settings, !args.write)?;

	if args.write {
		let path = match args.settings.config.clone() {
			Some(path) => path,
			None => config::default_path().context("No config directory on this platform; pass --config")?,
		};
		config.save(&path)?;
		info!(target = "chatmux.config", path = %path.display(), "config written");
	}

	println!("{}", serde_json::to_string_pretty(&config)?);
	Ok(())
}
