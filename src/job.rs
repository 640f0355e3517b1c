use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum JobState { Running, Stopped }

impl JobState {
	pub fn label(self) -> &'static str {
		match self {
			JobState::Running => "Running",
			JobState::Stopped => "Stopped",
		}
	}
}

/// What a wait status means for the process it was collected from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessState { Active, Stopped, Terminated }

pub trait WaitStatusExt {
	fn state(self) -> ProcessState;
	fn code(self) -> i32;
}

impl WaitStatusExt for WaitStatus {
	fn state(self) -> ProcessState {
		match self {
			WaitStatus::Exited(..) => ProcessState::Terminated,
			WaitStatus::Signaled(..) => ProcessState::Terminated,
			WaitStatus::Stopped(..) => ProcessState::Stopped,
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceEvent(..) => ProcessState::Stopped,
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceSyscall(..) => ProcessState::Stopped,
			WaitStatus::Continued(..) => ProcessState::Active,
			WaitStatus::StillAlive => ProcessState::Active,
		}
	}

	fn code(self) -> i32 {
		match self {
			WaitStatus::Exited(_, code) => code,
			WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
			_ => 0,
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
	#[error("too many background jobs")]
	TableFull,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Job {
	pub id: u32,
	pub pgid: Pid,
	/// Member processes that have not exited yet.
	pub members: Vec<Pid>,
	pub command: String,
	pub state: JobState,
}

impl Job {
	pub fn done_notice(&self) -> String {
		format!("[{}]+ Done\t\t{}", self.id, self.command)
	}

	pub fn stopped_notice(&self) -> String {
		format!("[{}]+ Stopped\t\t{}", self.id, self.command)
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobEvent {
	Done(Job),
	Stopped(u32),
	Continued(u32),
}

/// Fixed-capacity registry of live jobs. Job ids grow for the whole session
/// and are never handed out twice.
#[derive(Debug)]
pub struct JobTable {
	slots: Vec<Option<Job>>,
	next_id: u32,
}

impl JobTable {
	pub fn new(capacity: usize) -> JobTable {
		JobTable { slots: vec![None; capacity], next_id: 1 }
	}

	pub fn register(&mut self, pgid: Pid, members: Vec<Pid>, command: &str, state: JobState) -> Result<u32, JobError> {
		let space = self.slots.iter_mut().find(|s| s.is_none()).ok_or(JobError::TableFull)?;
		let id = self.next_id;
		self.next_id += 1;
		*space = Some(Job { id: id, pgid: pgid, members: members, command: command.to_string(), state: state });
		debug!(id, pgid = pgid.as_raw(), ?state, "registered job");
		Ok(id)
	}

	pub fn live(&self) -> impl Iterator<Item = &Job> {
		self.slots.iter().flatten()
	}

	pub fn is_empty(&self) -> bool {
		self.live().next().is_none()
	}

	pub fn find_by_pgid(&self, pgid: Pid) -> Option<&Job> {
		self.live().find(|j| j.pgid == pgid)
	}

	pub fn find_by_id(&self, id: u32) -> Option<&Job> {
		self.live().find(|j| j.id == id)
	}

	/// The live job with the highest id.
	pub fn latest(&self) -> Option<&Job> {
		self.live().max_by_key(|j| j.id)
	}

	fn slot_mut(&mut self, pgid: Pid) -> Option<&mut Option<Job>> {
		self.slots.iter_mut().find(|s| matches!(s, Some(j) if j.pgid == pgid))
	}

	pub fn mark_done(&mut self, pgid: Pid) -> Option<Job> {
		self.slot_mut(pgid).and_then(Option::take)
	}

	pub fn mark_stopped(&mut self, pgid: Pid) {
		self.set_state(pgid, JobState::Stopped);
	}

	pub fn mark_running(&mut self, pgid: Pid) {
		self.set_state(pgid, JobState::Running);
	}

	fn set_state(&mut self, pgid: Pid, state: JobState) {
		if let Some(Some(job)) = self.slot_mut(pgid) {
			job.state = state;
		}
	}

	pub fn set_members(&mut self, pgid: Pid, members: Vec<Pid>) {
		if let Some(Some(job)) = self.slot_mut(pgid) {
			job.members = members;
		}
	}

	/// Applies one collected wait status. Statuses of processes that belong to
	/// no job are ignored.
	pub fn record(&mut self, status: WaitStatus) -> Option<JobEvent> {
		let pid = status.pid()?;
		let slot = self.slots.iter_mut().find(|s| matches!(s, Some(j) if j.members.contains(&pid)))?;
		let job = slot.as_mut()?;
		match status.state() {
			ProcessState::Terminated => {
				job.members.retain(|&m| m != pid);
				if job.members.is_empty() {
					slot.take().map(JobEvent::Done)
				} else {
					None
				}
			},
			ProcessState::Stopped => {
				job.state = JobState::Stopped;
				Some(JobEvent::Stopped(job.id))
			},
			ProcessState::Active => {
				job.state = JobState::Running;
				Some(JobEvent::Continued(job.id))
			},
		}
	}

	/// `activities` lines, sorted by command text.
	pub fn activities(&self) -> Vec<String> {
		let mut jobs: Vec<&Job> = self.live().collect();
		jobs.sort_by(|a, b| a.command.cmp(&b.command));
		jobs.iter().map(|j| format!("[{}] : {} - {}", j.pgid, j.command, j.state.label())).collect()
	}

	/// Hard-kills every live job's process group.
	pub fn kill_all(&mut self) {
		for job in self.live() {
			if let Err(e) = killpg(job.pgid, Signal::SIGKILL) {
				warn!(pgid = job.pgid.as_raw(), error = %e, "failed to kill job");
			}
		}
	}

	/// Non-blocking sweep over every child of the shell. Returns the notices
	/// to print.
	pub fn reap(&mut self) -> Vec<String> {
		let mut notices = vec![];
		loop {
			let status = match waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
				Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
				Err(Errno::EINTR) => continue,
				Err(e) => {
					warn!(error = %e, "reaper waitpid failed");
					break;
				},
				Ok(status) => status,
			};
			debug!(?status, "reaped");
			match self.record(status) {
				Some(JobEvent::Done(job)) => notices.push(job.done_notice()),
				Some(_) | None => {},
			}
		}
		notices
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
	/// Every member exited or was signaled. `status` belongs to the last stage.
	Completed { status: i32 },
	/// A member stopped; `remaining` are the members that had not exited.
	Stopped { remaining: Vec<Pid> },
}

/// Waits on the process group until all `members` are gone or one of them
/// stops. Terminal ownership is the caller's business.
pub fn wait_foreground(pgid: Pid, members: &[Pid]) -> WaitOutcome {
	let last = members.last().copied();
	let mut remaining = members.to_vec();
	let mut status_code = 0;
	let group = Pid::from_raw(-pgid.as_raw());
	while !remaining.is_empty() {
		let status = match waitpid(group, Some(WaitPidFlag::WUNTRACED)) {
			Ok(status) => status,
			Err(Errno::EINTR) => continue,
			Err(Errno::ECHILD) => break,
			Err(e) => {
				eprintln!("waitpid: {}", e);
				break;
			},
		};
		debug!(pgid = pgid.as_raw(), ?status, "foreground wait");
		match status.state() {
			ProcessState::Stopped => return WaitOutcome::Stopped { remaining: remaining },
			ProcessState::Terminated => {
				let pid = status.pid();
				remaining.retain(|&m| Some(m) != pid);
				if pid.is_some() && pid == last {
					status_code = status.code();
				}
			},
			ProcessState::Active => {},
		}
	}
	WaitOutcome::Completed { status: status_code }
}
