use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::eval;
use crate::job::{JobState, WaitOutcome};
use crate::parser;
use crate::session::Session;

const STOPPED_STATUS: u8 = 128 + Signal::SIGTSTP as u8;

/// Where a builtin is allowed to run.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Placement {
	/// Mutates shell state, so only the shell process itself can run it.
	Shell,
	/// Also works inside a forked pipeline stage.
	Anywhere,
}

pub type BuiltinFn = fn(&mut Session, &[String]) -> u8;

#[derive(Clone, Copy)]
pub struct Builtin {
	pub placement: Placement,
	pub run: BuiltinFn,
}

pub fn lookup(name: &str) -> Option<Builtin> {
	match name {
		"hop" => Some(Builtin { placement: Placement::Shell, run: builtin_hop }),
		"fg" => Some(Builtin { placement: Placement::Shell, run: builtin_fg }),
		"bg" => Some(Builtin { placement: Placement::Shell, run: builtin_bg }),
		"log" => Some(Builtin { placement: Placement::Anywhere, run: builtin_log }),
		"activities" => Some(Builtin { placement: Placement::Anywhere, run: builtin_activities }),
		"ping" => Some(Builtin { placement: Placement::Anywhere, run: builtin_ping }),
		"reveal" => Some(Builtin { placement: Placement::Anywhere, run: builtin_reveal }),
		_ => None,
	}
}

pub fn is_parent_builtin(name: &str) -> bool {
	lookup(name).map_or(false, |b| b.placement == Placement::Shell)
}

/// Whether this invocation has to run in the shell process. Listing the log
/// works from a forked stage; purging or executing it does not.
pub fn needs_shell(name: &str, args: &[String]) -> bool {
	match name {
		"log" => !args.is_empty(),
		_ => is_parent_builtin(name),
	}
}

fn parse_job_id(arg: &str) -> Option<u32> {
	arg.parse().ok()
}

pub fn builtin_fg(session: &mut Session, args: &[String]) -> u8 {
	let job = match args.first() {
		None => session.job_table.latest(),
		Some(arg) => parse_job_id(arg).and_then(|id| session.job_table.find_by_id(id)),
	};
	let job = match job {
		Some(job) => job.clone(),
		None => {
			println!("No such job");
			return 1;
		},
	};

	println!("{}", job.command);
	session.job_table.mark_running(job.pgid);
	let resume = job.state == JobState::Stopped;
	match eval::put_in_foreground(&session.terminal, job.pgid, &job.members, resume) {
		WaitOutcome::Completed { status } => {
			session.job_table.mark_done(job.pgid);
			u8::try_from(status).unwrap_or(1)
		},
		WaitOutcome::Stopped { remaining } => {
			session.job_table.set_members(job.pgid, remaining);
			session.job_table.mark_stopped(job.pgid);
			println!("\n{}", job.stopped_notice());
			STOPPED_STATUS
		},
	}
}

pub fn builtin_bg(session: &mut Session, args: &[String]) -> u8 {
	if args.len() != 1 {
		eprintln!("bg: Invalid syntax");
		return 1;
	}
	let job = match parse_job_id(&args[0]).and_then(|id| session.job_table.find_by_id(id)) {
		Some(job) => job.clone(),
		None => {
			println!("No such job");
			return 1;
		},
	};
	if job.state == JobState::Running {
		println!("Job already running");
		return 0;
	}

	if let Err(e) = killpg(job.pgid, Signal::SIGCONT) {
		eprintln!("bg: {}", e);
		return 1;
	}
	session.job_table.mark_running(job.pgid);
	if job.command.ends_with('&') {
		println!("[{}] {}", job.id, job.command);
	} else {
		println!("[{}] {} &", job.id, job.command);
	}
	0
}

pub fn builtin_activities(session: &mut Session, _: &[String]) -> u8 {
	for line in session.job_table.activities() {
		println!("{}", line);
	}
	0
}

pub fn builtin_ping(_: &mut Session, args: &[String]) -> u8 {
	let (pid, sig) = match args {
		[pid, sig] => match (pid.parse::<i32>(), sig.parse::<i32>()) {
			(Ok(pid), Ok(sig)) => (pid, sig),
			_ => {
				eprintln!("ping: Invalid syntax");
				return 1;
			},
		},
		_ => {
			eprintln!("ping: Invalid syntax");
			return 1;
		},
	};

	let target = Pid::from_raw(pid);
	if pid <= 0 || kill(target, None).is_err() {
		println!("No such process found");
		return 1;
	}

	let signal = match sig.rem_euclid(32) {
		0 => None,
		n => match Signal::try_from(n) {
			Ok(signal) => Some(signal),
			Err(_) => {
				eprintln!("ping: Invalid signal");
				return 1;
			},
		},
	};
	debug!(pid, ?signal, "ping");
	if let Err(e) = kill(target, signal) {
		eprintln!("ping: {}", e);
		return 1;
	}
	println!("Sent signal {} to process with pid {}", sig, pid);
	0
}

fn change_dir(session: &mut Session, target: &Path) -> bool {
	let current = env::current_dir().ok();
	match env::set_current_dir(target) {
		Ok(()) => {
			session.previous_dir = current;
			true
		},
		Err(e) => {
			debug!(path = %target.display(), error = %e, "chdir failed");
			eprintln!("No such directory!");
			false
		},
	}
}

pub fn builtin_hop(session: &mut Session, args: &[String]) -> u8 {
	if args.is_empty() {
		let home = session.home.clone();
		return if change_dir(session, &home) { 0 } else { 1 };
	}

	let mut status = 0;
	for target in args {
		let ok = match target.as_str() {
			"." => true,
			"~" => {
				let home = session.home.clone();
				change_dir(session, &home)
			},
			"-" => match session.previous_dir.clone() {
				Some(previous) => {
					println!("{}", previous.display());
					change_dir(session, &previous)
				},
				None => {
					eprintln!("hop: OLDPWD not set");
					false
				},
			},
			other => change_dir(session, Path::new(other)),
		};
		if !ok {
			status = 1;
		}
	}
	status
}

fn list_dir(path: &Path, show_all: bool) -> Option<Vec<String>> {
	let entries = fs::read_dir(path).ok()?;
	let mut names: Vec<String> = entries
		.filter_map(Result::ok)
		.map(|e| e.file_name().to_string_lossy().into_owned())
		.filter(|name| show_all || !name.starts_with('.'))
		.collect();
	if show_all {
		names.push(".".to_string());
		names.push("..".to_string());
	}
	names.sort();
	Some(names)
}

pub fn builtin_reveal(session: &mut Session, args: &[String]) -> u8 {
	let mut show_all = false;
	let mut line_by_line = false;
	let mut path: Option<&str> = None;
	for arg in args {
		if arg.len() > 1 && arg.starts_with('-') {
			for c in arg[1 ..].chars() {
				match c {
					'a' => show_all = true,
					'l' => line_by_line = true,
					_ => {},
				}
			}
		} else if path.is_some() {
			eprintln!("reveal: Invalid Syntax!");
			return 1;
		} else {
			path = Some(arg.as_str());
		}
	}

	let target: PathBuf = match path {
		None | Some(".") => PathBuf::from("."),
		Some("~") => session.home.clone(),
		Some("-") => match session.previous_dir.clone() {
			Some(previous) => previous,
			None => {
				eprintln!("No such directory!");
				return 1;
			},
		},
		Some(p) => PathBuf::from(p),
	};

	let names = match list_dir(&target, show_all) {
		Some(names) => names,
		None => {
			eprintln!("No such directory!");
			return 1;
		},
	};
	if line_by_line {
		for name in &names {
			println!("{}", name);
		}
	} else if !names.is_empty() {
		println!("{}", names.join("  "));
	}
	0
}

pub fn builtin_log(session: &mut Session, args: &[String]) -> u8 {
	match args {
		[] => {
			for entry in session.history.entries() {
				println!("{}", entry);
			}
			0
		},
		[purge] if purge == "purge" => {
			session.history.purge();
			0
		},
		[execute, index] if execute == "execute" => {
			let entry = index.parse::<usize>().ok().and_then(|i| session.history.get(i)).map(str::to_string);
			match entry {
				Some(line) => {
					println!("{}", line);
					if parser::validate(&line) {
						eval::process_line(session, &line);
						u8::try_from(session.last_status).unwrap_or(1)
					} else {
						eprintln!("Invalid Syntax!");
						1
					}
				},
				None => {
					eprintln!("log: invalid index");
					1
				},
			}
		},
		_ => {
			eprintln!("log: Invalid syntax");
			1
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use crate::terminal::Terminal;
	use nix::unistd;

	fn session() -> Session {
		let config = Config { history_path: None, ..Config::default() };
		let terminal = Terminal { shell_pgid: unistd::getpgrp(), interactive: false };
		Session::new(config, terminal, env::temp_dir())
	}

	fn args(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn placement() {
		assert!(is_parent_builtin("hop"));
		assert!(is_parent_builtin("fg"));
		assert!(is_parent_builtin("bg"));
		assert!(!is_parent_builtin("log"));
		assert!(!needs_shell("log", &[]));
		assert!(needs_shell("log", &args(&["purge"])));
		assert!(needs_shell("log", &args(&["execute", "1"])));
		assert!(needs_shell("hop", &[]));
		assert!(!needs_shell("reveal", &args(&["-l"])));
		assert!(!is_parent_builtin("activities"));
		assert!(!is_parent_builtin("ping"));
		assert!(!is_parent_builtin("ls"));
		assert!(lookup("reveal").is_some());
		assert!(lookup("cat").is_none());
	}

	#[test]
	fn fg_and_bg_without_jobs() {
		let mut s = session();
		assert_eq!(builtin_fg(&mut s, &[]), 1);
		assert_eq!(builtin_fg(&mut s, &args(&["3"])), 1);
		assert_eq!(builtin_bg(&mut s, &[]), 1);
		assert_eq!(builtin_bg(&mut s, &args(&["1"])), 1);
	}

	#[test]
	fn bg_on_running_job_is_a_no_op() {
		let mut s = session();
		let pgid = Pid::from_raw(i32::MAX);
		s.job_table.register(pgid, vec![pgid], "sleep 10 &", JobState::Running).unwrap();
		assert_eq!(builtin_bg(&mut s, &args(&["1"])), 0);
		assert_eq!(s.job_table.find_by_id(1).map(|j| j.state), Some(JobState::Running));
	}

	#[test]
	fn ping_checks_arguments_and_target() {
		let mut s = session();
		let me = unistd::getpid().as_raw().to_string();
		assert_eq!(builtin_ping(&mut s, &args(&["1"])), 1);
		assert_eq!(builtin_ping(&mut s, &args(&["x", "9"])), 1);
		assert_eq!(builtin_ping(&mut s, &args(&["2147483647", "9"])), 1);
		// 0 and negative pids address process groups, including the shell's own.
		assert_eq!(builtin_ping(&mut s, &args(&["-1", "9"])), 1);
		assert_eq!(builtin_ping(&mut s, &args(&["0", "9"])), 1);
		// 32 and 0 both reduce to the existence probe.
		assert_eq!(builtin_ping(&mut s, &args(&[me.as_str(), "32"])), 0);
		assert_eq!(builtin_ping(&mut s, &args(&[me.as_str(), "0"])), 0);
	}

	#[test]
	fn log_rejects_bad_index() {
		let mut s = session();
		s.history.add("echo hi");
		assert_eq!(builtin_log(&mut s, &[]), 0);
		assert_eq!(builtin_log(&mut s, &args(&["execute", "2"])), 1);
		assert_eq!(builtin_log(&mut s, &args(&["bogus"])), 1);
		assert_eq!(builtin_log(&mut s, &args(&["purge"])), 0);
		assert_eq!(s.history.entries().count(), 0);
	}

	#[test]
	fn reveal_lists_and_rejects() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("b.txt"), "").unwrap();
		fs::write(dir.path().join("a.txt"), "").unwrap();
		fs::write(dir.path().join(".hidden"), "").unwrap();
		assert_eq!(list_dir(dir.path(), false), Some(vec!["a.txt".to_string(), "b.txt".to_string()]));
		assert_eq!(list_dir(dir.path(), true).map(|n| n.len()), Some(5));

		let mut s = session();
		let p = dir.path().to_string_lossy().into_owned();
		assert_eq!(builtin_reveal(&mut s, &args(&["-la", p.as_str()])), 0);
		assert_eq!(builtin_reveal(&mut s, &args(&[p.as_str(), p.as_str()])), 1);
		assert_eq!(builtin_reveal(&mut s, &args(&["/no/such/dir/anywhere"])), 1);
	}
}
