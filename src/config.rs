use std::env;
use std::path::PathBuf;

pub const LOG_ENV: &str = "JSH_LOG";
pub const HISTORY_ENV: &str = "JSH_HISTORY";
const HISTORY_FILE: &str = ".jsh_history";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub log_filter: String,
	pub history_path: Option<PathBuf>,
	pub history_capacity: usize,
	pub job_capacity: usize,
	pub max_stages: usize,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			log_filter: "warn".to_string(),
			history_path: dirs::home_dir().map(|h| h.join(HISTORY_FILE)),
			history_capacity: 15,
			job_capacity: 64,
			max_stages: 16,
		}
	}
}

impl Config {
	pub fn from_env() -> Config {
		Config::from_vars(env::var(LOG_ENV).ok(), env::var_os(HISTORY_ENV).map(PathBuf::from))
	}

	fn from_vars(log: Option<String>, history: Option<PathBuf>) -> Config {
		let mut config = Config::default();
		if let Some(filter) = log {
			config.log_filter = filter;
		}
		match history {
			Some(ref p) if p.as_os_str() == "off" => config.history_path = None,
			Some(p) => config.history_path = Some(p),
			None => {},
		}
		config
	}
}
