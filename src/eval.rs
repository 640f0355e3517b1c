use std::ffi::{self, CString};
use std::fs;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::builtin;
use crate::job::{self, JobState, WaitOutcome};
use crate::parser;
use crate::session::Session;
use crate::terminal::{self, Terminal};
use crate::types::*;

const STOPPED_STATUS: i32 = 128 + Signal::SIGTSTP as i32;

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("pipe: {0}")]
	Pipe(#[source] nix::Error),
	#[error("fork: {0}")]
	Fork(#[source] nix::Error),
}

#[derive(Debug, Error)]
enum ExecError {
	#[error("{0}")]
	Nix(#[from] nix::Error),
	#[error("nul character in argument: {0}")]
	Nul(#[from] ffi::NulError),
}

struct Pipe {
	read: OwnedFd,
	write: OwnedFd,
}

/// Forks the stages of one pipeline into a shared process group.
#[derive(Debug)]
struct JobBuilder {
	gid: Option<Pid>,
	pids: Vec<Pid>,
}

impl JobBuilder {
	fn new(size_hint: usize) -> JobBuilder {
		JobBuilder { gid: None, pids: Vec::with_capacity(size_hint) }
	}

	fn push_fork(&mut self, terminal: &Terminal, foreground: bool) -> nix::Result<ForkResult> {
		let r = unsafe { unistd::fork() }?;
		match r {
			ForkResult::Parent { child } => {
				let gid = *self.gid.get_or_insert(child);
				// The child joins on its own too; whichever runs first wins.
				let _ = unistd::setpgid(child, gid);
				self.pids.push(child);
				debug!(pid = child.as_raw(), pgid = gid.as_raw(), "forked stage");
			},
			ForkResult::Child => terminal::enter_child(terminal, self.gid, foreground),
		}
		Ok(r)
	}

	fn build(self) -> Option<(Pid, Vec<Pid>)> {
		self.gid.map(|gid| (gid, self.pids))
	}
}

/// Opens every redirection in order. Only the last of each direction is
/// installed, and any failure fails the stage after all were attempted.
fn apply_redirects(redirects: &[Redirect]) -> nix::Result<bool> {
	let mut input: Option<fs::File> = None;
	let mut output: Option<fs::File> = None;
	let mut failed = false;

	for redirect in redirects {
		match redirect.typ {
			RedirectType::Input => {
				input = None;
				match fs::File::open(&redirect.target) {
					Ok(file) => input = Some(file),
					Err(e) => {
						debug!(path = %redirect.target, error = %e, "input redirection failed");
						eprintln!("No such file or directory");
						failed = true;
					},
				}
			},
			RedirectType::Output | RedirectType::Append => {
				output = None;
				let mut oopt = fs::OpenOptions::new();
				oopt.write(true).create(true).mode(0o644);
				if redirect.typ == RedirectType::Append {
					oopt.append(true);
				} else {
					oopt.truncate(true);
				}
				match oopt.open(&redirect.target) {
					Ok(file) => output = Some(file),
					Err(e) => {
						debug!(path = %redirect.target, error = %e, "output redirection failed");
						eprintln!("Unable to create file for writing");
						failed = true;
					},
				}
			},
		}
	}

	if failed {
		return Ok(false);
	}
	if let Some(file) = input {
		unistd::dup2(file.as_raw_fd(), libc::STDIN_FILENO)?;
	}
	if let Some(file) = output {
		unistd::dup2(file.as_raw_fd(), libc::STDOUT_FILENO)?;
	}
	Ok(true)
}

fn do_exec_command(session: &mut Session, command: &Command, index: usize, pipes: &mut Vec<Pipe>) -> Result<i32, ExecError> {
	if index > 0 {
		unistd::dup2(pipes[index - 1].read.as_raw_fd(), libc::STDIN_FILENO)?;
	}
	if index < pipes.len() {
		unistd::dup2(pipes[index].write.as_raw_fd(), libc::STDOUT_FILENO)?;
	}
	if !apply_redirects(&command.redirects)? {
		return Ok(1);
	}
	pipes.clear();

	if let Some(builtin) = builtin::lookup(&command.name) {
		if builtin::needs_shell(&command.name, &command.arguments) {
			eprintln!("{}: cannot be used in a pipeline", command.name);
			return Ok(1);
		}
		return Ok(i32::from((builtin.run)(session, &command.arguments)));
	}

	let argv: Vec<CString> = command.argv().map(CString::new).collect::<Result<_, _>>()?;
	match unistd::execvp(&argv[0], &argv) {
		Ok(never) => match never {},
		Err(e) => {
			debug!(name = %command.name, error = %e, "execvp failed");
			eprintln!("{}: Command not found!", command.name);
			Ok(127)
		},
	}
}

fn exec_command(session: &mut Session, command: &Command, index: usize, pipes: &mut Vec<Pipe>) -> ! {
	let s = do_exec_command(session, command, index, pipes).unwrap_or_else(|e| {
		eprintln!("{}: {}", command.name, e);
		1
	});
	let _ = io::stdout().flush();
	unsafe { libc::_exit(s) }
}

fn spawn_commands(session: &mut Session, pipeline: &Pipeline, foreground: bool,
                  job_builder: &mut JobBuilder) -> Result<(), LaunchError> {
	let mut pipes: Vec<Pipe> = Vec::with_capacity(pipeline.commands.len());
	for _ in 1 .. pipeline.commands.len() {
		let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;
		pipes.push(Pipe { read: read, write: write });
	}

	let _ = io::stdout().flush();
	let terminal = session.terminal;
	for (i, command) in pipeline.commands.iter().enumerate() {
		match job_builder.push_fork(&terminal, foreground).map_err(LaunchError::Fork)? {
			ForkResult::Parent { .. } => {},
			ForkResult::Child => exec_command(session, command, i, &mut pipes),
		}
	}
	// Readers only see EOF once the shell's copies of the write ends are gone.
	drop(pipes);
	Ok(())
}

/// Gives the terminal to `pgid`, optionally continues it, and waits until it
/// completes or stops. The terminal returns to the shell on every path.
pub fn put_in_foreground(terminal: &Terminal, pgid: Pid, members: &[Pid], resume: bool) -> WaitOutcome {
	let _terminal = terminal.hand_over(pgid);
	if resume {
		if let Err(e) = killpg(pgid, Signal::SIGCONT) {
			warn!(pgid = pgid.as_raw(), error = %e, "failed to continue job");
		}
	}
	job::wait_foreground(pgid, members)
}

fn launch(session: &mut Session, pipeline: &Pipeline, is_background: bool) {
	let mut job_builder = JobBuilder::new(pipeline.commands.len());
	if let Err(e) = spawn_commands(session, pipeline, !is_background, &mut job_builder) {
		eprintln!("{}", e);
	}
	let (pgid, members) = match job_builder.build() {
		Some(job) => job,
		None => {
			session.last_status = 1;
			return;
		},
	};

	if is_background {
		let command = format!("{} &", pipeline.source());
		match session.job_table.register(pgid, members, &command, JobState::Running) {
			Ok(id) => println!("[{}] {}", id, pgid),
			Err(e) => eprintln!("shell: Error: {}", e),
		}
		session.last_status = 0;
		return;
	}

	match put_in_foreground(&session.terminal, pgid, &members, false) {
		WaitOutcome::Completed { status } => session.last_status = status,
		WaitOutcome::Stopped { remaining } => {
			let command = pipeline.source();
			match session.job_table.register(pgid, remaining, command, JobState::Stopped) {
				Ok(id) => {
					if let Some(job) = session.job_table.find_by_id(id) {
						println!("{}", job.stopped_notice());
					}
				},
				Err(e) => eprintln!("shell: Error: {}", e),
			}
			session.last_status = STOPPED_STATUS;
		},
	}
}

/// Runs one clause: builtins that need the shell, or simple foreground
/// builtin invocations, run in-process; everything else is forked.
pub fn eval(session: &mut Session, clause: &Clause) {
	let pipeline = match parser::parse_pipeline(&clause.text, session.config.max_stages) {
		Ok(p) => p,
		Err(e) => {
			eprintln!("jsh: {}", e);
			session.last_status = 2;
			return;
		},
	};

	if pipeline.commands.len() == 1 {
		let command = &pipeline.commands[0];
		if let Some(builtin) = builtin::lookup(&command.name) {
			let in_shell = builtin::needs_shell(&command.name, &command.arguments);
			if in_shell && !command.redirects.is_empty() {
				eprintln!("{}: redirection is not supported", command.name);
				session.last_status = 1;
				return;
			}
			// A background clause forks and gets a job.
			if in_shell || (pipeline.is_simple() && !clause.is_background) {
				let s = (builtin.run)(session, &command.arguments);
				session.last_status = i32::from(s);
				return;
			}
		}
	}

	launch(session, &pipeline, clause.is_background);
}

/// Entry point for one or more `;`/`&`-joined clauses.
pub fn process_line(session: &mut Session, line: &str) {
	for clause in parser::split_clauses(line) {
		eval(session, &clause);
	}
}
