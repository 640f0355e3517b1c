#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RedirectType { Input, Output, Append }

impl RedirectType {
	pub fn from_operator(token: &str) -> Option<RedirectType> {
		match token {
			"<" => Some(RedirectType::Input),
			">" => Some(RedirectType::Output),
			">>" => Some(RedirectType::Append),
			_ => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Redirect {
	pub target: String,
	pub typ: RedirectType,
}

/// One pipeline stage. `source` is only set on the first stage and holds the
/// untouched text of the whole pipeline, for job display.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Command {
	pub name: String,
	pub arguments: Vec<String>,
	pub redirects: Vec<Redirect>,
	pub source: Option<String>,
}

impl Command {
	/// Program name followed by its arguments.
	pub fn argv(&self) -> impl Iterator<Item = &str> {
		std::iter::once(self.name.as_str()).chain(self.arguments.iter().map(String::as_str))
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub commands: Vec<Command>,
}

impl Pipeline {
	pub fn source(&self) -> &str {
		self.commands.first().and_then(|c| c.source.as_deref()).unwrap_or("")
	}

	pub fn is_simple(&self) -> bool {
		self.commands.len() == 1 && self.commands[0].redirects.is_empty()
	}
}

/// A `;`/`&`-terminated piece of an input line.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Clause {
	pub text: String,
	pub is_background: bool,
}
