
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

use crate::config::Overrides;

/// chatmux: many messaging sessions behind one HTTP/WebSocket endpoint.
#[derive(Parser, Debug)]
#[command(name = "chatmux")]
#[command(about = "Multi-session messaging automation server")]
#[command(version)]
#[command(styles = help_styles())]
pub struct Cli {
	/// Increase verbosity (-v lifecycle, -vv driver events, -vvv everything)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the session server.
	Serve(ServeArgs),
	/// Print the effective configuration as JSON.
	Config(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Configuration file (default: <config_dir>/chatmux/config.json).
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Address to listen on.
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Driver program started for each session.
	#[arg(long, value_name = "PROGRAM")]
	pub driver: Option<PathBuf>,

	/// Argument passed to the driver (repeatable).
	#[arg(long = "driver-arg", value_name = "ARG", allow_hyphen_values = true)]
	pub driver_args: Vec<String>,

	/// Directory holding per-session credentials.
	#[arg(long, value_name = "DIR")]
	pub auth_dir: Option<PathBuf>,

	/// Auth challenges (QR codes) allowed before a session is dropped.
	#[arg(long, value_name = "N")]
	pub max_auth_challenges: Option<u32>,
}

impl ServeArgs {
	pub fn overrides(&self) -> Overrides {
		Overrides {
			host: self.host.clone(),
			port: self.port,
			driver: self.driver.clone(),
			driver_args: self.driver_args.clone(),
			auth_dir: self.auth_dir.clone(),
			max_auth_challenges: self.max_auth_challenges,
		}
	}
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
	#[command(flatten)]
	pub settings: ServeArgs,

	/// Write the effective configuration back to the config file.
	#[arg(long)]
	pub write: bool,
}

fn help_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}
