use thiserror::Error;

use crate::types::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty command")]
	Empty,
	#[error("empty command in pipeline")]
	EmptyStage,
	#[error("missing file name after '{0}'")]
	MissingTarget(String),
	#[error("too many commands in pipeline (max {0})")]
	TooManyStages(usize),
}

type ParseResult<T> = Result<T, ParseError>;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Parser<'a> {
	fn new(line: &'a str) -> Parser<'a> {
		Parser { line: line.as_bytes(), i: 0 }
	}

	fn peek(&self) -> Option<u8> {
		self.line.get(self.i).copied()
	}

	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.peek() {
			if !f(c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\r' | b'\n')
	}

	fn is_operator(c: u8) -> bool {
		matches!(c, b'|' | b'&' | b';' | b'<' | b'>')
	}

	fn is_letter(c: u8) -> bool {
		!Parser::is_operator(c) && !Parser::is_whitespace(c)
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	fn read_word(&mut self) {
		self.proceed_while(Parser::is_letter);
	}

	fn validate(&mut self) -> bool {
		let mut expect_command = true;
		let mut last_operator: Option<u8> = None;
		loop {
			self.skip_whitespaces();
			let c = match self.peek() {
				Some(c) => c,
				None => break,
			};
			if Parser::is_operator(c) {
				if last_operator.is_some() {
					return false;
				}
				if expect_command && (c == b'|' || c == b';') {
					return false;
				}
				self.i += 1;
				if c == b'>' && self.peek() == Some(b'>') {
					self.i += 1;
				}
				last_operator = Some(c);
				expect_command = true;
			} else {
				self.read_word();
				last_operator = None;
				expect_command = false;
			}
		}
		matches!(last_operator, None | Some(b'&'))
	}

	fn split_clauses(&mut self) -> Vec<Clause> {
		let mut clauses = vec![];
		let mut start = 0;
		while let Some(c) = self.peek() {
			self.i += 1;
			if c == b';' || c == b'&' {
				push_clause(&mut clauses, &self.line[start .. self.i - 1], c == b'&');
				start = self.i;
			}
		}
		push_clause(&mut clauses, &self.line[start ..], false);
		clauses
	}
}

fn push_clause(clauses: &mut Vec<Clause>, text: &[u8], is_background: bool) {
	let text = String::from_utf8_lossy(text);
	let text = text.trim();
	if !text.is_empty() {
		clauses.push(Clause { text: text.to_string(), is_background: is_background });
	}
}

/// Checks operator placement on a whole input line.
pub fn validate(line: &str) -> bool {
	Parser::new(line).validate()
}

/// Splits a line on `;` and `&`. Empty clauses are dropped.
pub fn split_clauses(line: &str) -> Vec<Clause> {
	Parser::new(line).split_clauses()
}

fn parse_command(segment: &str, source: Option<&str>) -> ParseResult<Command> {
	let mut words: Vec<String> = vec![];
	let mut redirects: Vec<Redirect> = vec![];

	let mut tokens = segment.split_whitespace();
	while let Some(token) = tokens.next() {
		match RedirectType::from_operator(token) {
			Some(typ) => {
				let target = tokens.next().ok_or_else(|| ParseError::MissingTarget(token.to_string()))?;
				redirects.push(Redirect { target: target.to_string(), typ: typ });
			},
			None => words.push(token.to_string()),
		}
	}

	if words.is_empty() {
		return Err(ParseError::EmptyStage);
	}
	let name = words.remove(0);
	Ok(Command { name: name, arguments: words, redirects: redirects, source: source.map(str::to_string) })
}

/// Builds the pipeline for one clause. `<`, `>`, `>>` and `|` are always
/// operators; there is no quoting.
pub fn parse_pipeline(text: &str, max_stages: usize) -> ParseResult<Pipeline> {
	let source = text.trim();
	if source.is_empty() {
		return Err(ParseError::Empty);
	}

	let segments: Vec<&str> = source.split('|').collect();
	if segments.len() > max_stages {
		return Err(ParseError::TooManyStages(max_stages));
	}

	let mut commands = Vec::with_capacity(segments.len());
	for (i, segment) in segments.iter().enumerate() {
		let source = if i == 0 { Some(source) } else { None };
		commands.push(parse_command(segment, source)?);
	}
	Ok(Pipeline { commands: commands })
}
