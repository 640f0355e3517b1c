use std::io::{self, IsTerminal};

use nix::sys::signal::{self, killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

const JOB_CONTROL_SIGNALS: [Signal; 4] = [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

extern "C" fn interrupt_waits(_: libc::c_int) {}

/// The controlling terminal as seen by the shell. In non-interactive mode no
/// ownership is ever transferred.
#[derive(Debug, Clone, Copy)]
pub struct Terminal {
	pub shell_pgid: Pid,
	pub interactive: bool,
}

impl Terminal {
	/// Takes the terminal for the shell's process group if stdin is one.
	pub fn acquire() -> nix::Result<Terminal> {
		let shell_pgid = unistd::getpgrp();
		if !io::stdin().is_terminal() {
			return Ok(Terminal { shell_pgid: shell_pgid, interactive: false });
		}

		while unistd::tcgetpgrp(io::stdin())? != shell_pgid {
			killpg(shell_pgid, Signal::SIGTTIN)?;
		}

		let handler = SigAction::new(SigHandler::Handler(interrupt_waits), SaFlags::empty(), SigSet::empty());
		let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
		unsafe {
			sigaction(Signal::SIGINT, &handler)?;
			sigaction(Signal::SIGTSTP, &handler)?;
			sigaction(Signal::SIGTTIN, &ignore)?;
			sigaction(Signal::SIGTTOU, &ignore)?;
		}

		unistd::tcsetpgrp(io::stdin(), shell_pgid)?;
		debug!(pgid = shell_pgid.as_raw(), "shell owns the terminal");
		Ok(Terminal { shell_pgid: shell_pgid, interactive: true })
	}

	/// Gives the terminal to `pgid` until the returned guard is dropped.
	pub fn hand_over(&self, pgid: Pid) -> TerminalGuard {
		if self.interactive {
			give(pgid);
		}
		TerminalGuard { terminal: *self }
	}
}

fn give(pgid: Pid) {
	debug!(pgid = pgid.as_raw(), "tcsetpgrp");
	if let Err(e) = unistd::tcsetpgrp(io::stdin(), pgid) {
		warn!(pgid = pgid.as_raw(), error = %e, "tcsetpgrp failed");
	}
}

#[must_use]
pub struct TerminalGuard {
	terminal: Terminal,
}

impl Drop for TerminalGuard {
	fn drop(&mut self) {
		if self.terminal.interactive {
			give(self.terminal.shell_pgid);
		}
	}
}

/// Runs in a freshly forked stage: joins the job's process group, takes the
/// terminal if the job runs in the foreground, then restores the default
/// job-control signal dispositions.
pub fn enter_child(terminal: &Terminal, pgid: Option<Pid>, foreground: bool) {
	let pid = unistd::getpid();
	let pgid = pgid.unwrap_or(pid);
	let _ = unistd::setpgid(pid, pgid);
	if terminal.interactive && foreground {
		let _ = unistd::tcsetpgrp(io::stdin(), pgid);
	}
	for &sig in JOB_CONTROL_SIGNALS.iter() {
		unsafe {
			let _ = signal::signal(sig, SigHandler::SigDfl);
		}
	}
}
