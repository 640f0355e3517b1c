use std::path::PathBuf;

use crate::config::Config;
use crate::history::History;
use crate::job::JobTable;
use crate::terminal::Terminal;

/// Everything the read loop, the builtins and the reaper share.
pub struct Session {
	pub config: Config,
	pub terminal: Terminal,
	pub job_table: JobTable,
	pub history: History,
	/// Directory the shell started in; `~` for `hop`, `reveal` and the prompt.
	pub home: PathBuf,
	pub previous_dir: Option<PathBuf>,
	pub last_status: i32,
}

impl Session {
	pub fn new(config: Config, terminal: Terminal, home: PathBuf) -> Session {
		let job_table = JobTable::new(config.job_capacity);
		let history = History::load(config.history_capacity, config.history_path.clone());
		Session {
			config: config,
			terminal: terminal,
			job_table: job_table,
			history: history,
			home: home,
			previous_dir: None,
			last_status: 0,
		}
	}

	/// One reaper sweep, printing a notice per finished job.
	pub fn reap(&mut self) {
		for notice in self.job_table.reap() {
			println!("{}", notice);
		}
	}
}
