mod builtin;
mod config;
mod eval;
mod history;
mod job;
mod parser;
mod session;
mod terminal;
mod types;

use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::Context;
use nix::unistd;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;
use history::Recall;
use session::Session;
use terminal::Terminal;

fn init_logging(config: &Config) {
	let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.without_time()
		.with_target(false)
		.init();
}

fn prompt(session: &Session) -> String {
	let user = env::var("USER").unwrap_or_else(|_| "user".to_string());
	let host = unistd::gethostname()
		.map(|h| h.to_string_lossy().into_owned())
		.unwrap_or_else(|_| "system".to_string());
	let cwd = env::current_dir().unwrap_or_default();
	let path = match cwd.strip_prefix(&session.home) {
		Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
		Ok(rest) => format!("~/{}", rest.display()),
		Err(_) => cwd.display().to_string(),
	};
	format!("<{}@{}:{}> ", user, host, path)
}

fn run_checked(session: &mut Session, line: &str) {
	if parser::validate(line) {
		eval::process_line(session, line);
	} else {
		eprintln!("Invalid Syntax!");
		session.last_status = 2;
	}
}

fn accept_line(session: &mut Session, line: &str) {
	session.history.add(line);
	match session.history.recall(line) {
		Some(Recall::Entry(entry)) => {
			println!("{}", entry);
			run_checked(session, &entry);
		},
		Some(Recall::Piped(pipeline)) => run_checked(session, &pipeline),
		Some(Recall::InvalidIndex) => {
			eprintln!("log: invalid index");
			session.last_status = 1;
		},
		None => run_checked(session, line),
	}
}

fn main() -> anyhow::Result<ExitCode> {
	let config = Config::from_env();
	init_logging(&config);

	let terminal = Terminal::acquire().context("failed to take control of the terminal")?;
	let home = env::current_dir().context("failed to read the working directory")?;
	let mut session = Session::new(config, terminal, home);
	debug!(interactive = terminal.interactive, pgid = terminal.shell_pgid.as_raw(), "shell started");

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		session.reap();
		if session.terminal.interactive {
			let _ = stdout.write_all(prompt(&session).as_bytes());
			let _ = stdout.flush();
		}

		let mut line: Vec<u8> = vec![];
		match stdin_locked.read_until(b'\n', &mut line) {
			Ok(0) => break,
			Ok(_) => {},
			Err(e) => {
				debug!(error = %e, "read failed");
				break;
			},
		}
		let line = String::from_utf8_lossy(&line);
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		accept_line(&mut session, line);
	}

	println!("logout");
	session.job_table.kill_all();
	Ok(ExitCode::from(u8::try_from(session.last_status).unwrap_or(1)))
}
