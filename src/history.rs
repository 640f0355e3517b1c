use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

/// A `log execute` request found on an input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Recall {
	Entry(String),
	/// `log execute <n> | rest`, already joined into one line.
	Piped(String),
	InvalidIndex,
}

/// Bounded log of accepted input lines, oldest first, mirrored to a file.
#[derive(Debug)]
pub struct History {
	entries: VecDeque<String>,
	capacity: usize,
	path: Option<PathBuf>,
}

impl History {
	pub fn new(capacity: usize, path: Option<PathBuf>) -> History {
		History { entries: VecDeque::with_capacity(capacity), capacity: capacity, path: path }
	}

	/// Loads the history file if there is one.
	pub fn load(capacity: usize, path: Option<PathBuf>) -> History {
		let mut history = History::new(capacity, None);
		if let Some(ref p) = path {
			if let Ok(text) = fs::read_to_string(p) {
				for line in text.lines() {
					history.push(line);
				}
			}
		}
		history.path = path;
		history
	}

	fn push(&mut self, line: &str) -> bool {
		if line.split_whitespace().next() == Some("log") {
			return false;
		}
		if self.entries.back().map(String::as_str) == Some(line) {
			return false;
		}
		if self.entries.len() == self.capacity {
			self.entries.pop_front();
		}
		self.entries.push_back(line.to_string());
		true
	}

	/// Records one input line. `log` invocations and repeats of the latest
	/// entry are skipped.
	pub fn add(&mut self, line: &str) {
		if self.push(line) {
			self.save();
		}
	}

	/// 1 is the most recent entry.
	pub fn get(&self, index: usize) -> Option<&str> {
		if index == 0 || index > self.entries.len() {
			return None;
		}
		self.entries.get(self.entries.len() - index).map(String::as_str)
	}

	/// Expands `log execute <n>` and `log execute <n> | rest`. Any other line
	/// yields `None`.
	pub fn recall(&self, line: &str) -> Option<Recall> {
		let mut parts = line.splitn(2, '|');
		let head: Vec<&str> = parts.next().unwrap_or("").split_whitespace().collect();
		let rest = parts.next().map(str::trim);
		if head.len() != 3 || head[0] != "log" || head[1] != "execute" {
			return None;
		}
		let entry = match head[2].parse::<usize>().ok().and_then(|i| self.get(i)) {
			Some(entry) => entry,
			None => return Some(Recall::InvalidIndex),
		};
		match rest {
			Some(rest) => Some(Recall::Piped(format!("{} | {}", entry, rest))),
			None => Some(Recall::Entry(entry.to_string())),
		}
	}

	pub fn entries(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(String::as_str)
	}

	pub fn purge(&mut self) {
		self.entries.clear();
		self.save();
	}

	fn save(&self) {
		if let Some(ref p) = self.path {
			let mut text = String::new();
			for entry in &self.entries {
				text.push_str(entry);
				text.push('\n');
			}
			if let Err(e) = fs::write(p, text) {
				if e.kind() != io::ErrorKind::NotFound {
					warn!(path = %p.display(), error = %e, "failed to write history");
				}
			}
		}
	}
}
