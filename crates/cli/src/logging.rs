use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter used when `RUST_LOG` is unset.
///
/// `-v` shows session lifecycle and requests while driver traffic stays at
/// warnings. `-vv` adds lifecycle debug detail and driver process events.
/// `-vvv` opens everything, including stdio lines and hub fan-out.
pub fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn",
		1 => "warn,chatmux=info,chatmux.runtime=warn,chatmux.driver=warn",
		2 => "warn,chatmux=debug,chatmux.runtime=info,chatmux.hub=info",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_level_parses() {
		for verbosity in 0..=4 {
			let filter = default_filter(verbosity);
			assert!(EnvFilter::try_new(filter).is_ok(), "{filter}");
		}
	}

	#[test]
	fn single_v_keeps_driver_traffic_quiet() {
		let filter = default_filter(1);
		assert!(filter.contains("chatmux=info"));
		assert!(filter.contains("chatmux.runtime=warn"));
		assert!(filter.contains("chatmux.driver=warn"));
	}

	#[test]
	fn double_v_shows_driver_lifecycle_but_not_pipe_lines() {
		let filter = default_filter(2);
		assert!(filter.contains("chatmux=debug"));
		assert!(filter.contains("chatmux.runtime=info"));
		assert!(!filter.contains("chatmux.driver"));
	}
}
