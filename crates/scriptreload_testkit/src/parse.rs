//! Declaration language understood by the sandbox compiler.
//!
//! ```text
//! namespace ai { class Target { float weight = 1.5; } }
//! class Foo { int value; Foo@ next; }
//! enum Mood { Calm, Angry = 4 }
//! int global_counter = 5;
//! const int LIMIT = 3;
//! array<Foo@> nodes;
//! #warn message emitted as a compiler warning
//! ```

use std::fmt;

/// One compiler message with a 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
	pub line: u32,
	pub col: u32,
	pub severity: &'static str,
	pub text: String,
}

impl Message {
	pub(crate) fn error(line: u32, col: u32, text: impl Into<String>) -> Self {
		Self {
			line,
			col,
			severity: "ERR ",
			text: text.into(),
		}
	}

	fn warning(line: u32, col: u32, text: impl Into<String>) -> Self {
		Self {
			line,
			col,
			severity: "WARN",
			text: text.into(),
		}
	}

	pub(crate) fn is_error(&self) -> bool {
		self.severity.trim() == "ERR"
	}

	pub(crate) fn render(&self, section: &str) -> String {
		format!("{section} ({}, {}) : {} : {}", self.line, self.col, self.severity, self.text)
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Ident(String),
	Number(String),
	Str(String),
	Punct(char),
	Scope,
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ident(text) | Self::Number(text) => f.write_str(text),
			Self::Str(text) => write!(f, "\"{text}\""),
			Self::Punct(ch) => write!(f, "{ch}"),
			Self::Scope => f.write_str("::"),
		}
	}
}

#[derive(Debug, Clone)]
struct Spanned {
	token: Token,
	line: u32,
	col: u32,
}

/// Initializer literal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
	Int(i64),
	Float(f64),
	Bool(bool),
	Str(String),
	Ident(String),
}

/// Unresolved type expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TypeExpr {
	pub name: String,
	pub arg: Option<Box<TypeExpr>>,
	pub handle: bool,
	pub line: u32,
	pub col: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct VarDef {
	pub name: String,
	pub ty: TypeExpr,
	pub is_const: bool,
	pub init: Option<Literal>,
}

#[derive(Debug, Clone)]
pub(crate) struct ClassDef {
	pub name: String,
	pub namespace: Option<String>,
	pub fields: Vec<VarDef>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnumDef {
	pub name: String,
	pub namespace: Option<String>,
	pub members: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Program {
	pub classes: Vec<ClassDef>,
	pub enums: Vec<EnumDef>,
	pub globals: Vec<VarDef>,
}

/// Parse `text`, appending warnings and errors to `messages`.
pub(crate) fn parse_program(text: &str, messages: &mut Vec<Message>) -> Option<Program> {
	let tokens = match Lexer::new(text).run(messages) {
		Ok(tokens) => tokens,
		Err(message) => {
			messages.push(message);
			return None;
		}
	};

	let mut parser = Parser { tokens, pos: 0 };
	let mut program = Program::default();
	match parser.items(&mut program, None) {
		Ok(()) => Some(program),
		Err(message) => {
			messages.push(message);
			None
		}
	}
}

struct Lexer {
	chars: Vec<char>,
	pos: usize,
	line: u32,
	col: u32,
}

impl Lexer {
	fn new(text: &str) -> Self {
		Self {
			chars: text.chars().collect(),
			pos: 0,
			line: 1,
			col: 1,
		}
	}

	fn peek(&self, ahead: usize) -> Option<char> {
		self.chars.get(self.pos + ahead).copied()
	}

	fn bump(&mut self) -> Option<char> {
		let ch = self.peek(0)?;
		self.pos += 1;
		if ch == '\n' {
			self.line += 1;
			self.col = 1;
		} else {
			self.col += 1;
		}
		Some(ch)
	}

	fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
		let mut out = String::new();
		while let Some(ch) = self.peek(0) {
			if !keep(ch) {
				break;
			}
			out.push(ch);
			self.bump();
		}
		out
	}

	fn run(mut self, messages: &mut Vec<Message>) -> Result<Vec<Spanned>, Message> {
		let mut tokens = Vec::new();
		let mut line_start = true;

		while let Some(ch) = self.peek(0) {
			let (line, col) = (self.line, self.col);

			if ch == '\n' {
				self.bump();
				line_start = true;
				continue;
			}
			if ch.is_whitespace() {
				self.bump();
				continue;
			}
			if ch == '#' && line_start {
				let directive = self.take_while(|c| c != '\n');
				if let Some(text) = directive.strip_prefix("#warn") {
					messages.push(Message::warning(line, col, text.trim()));
				}
				continue;
			}
			line_start = false;

			if ch == '/' && self.peek(1) == Some('/') {
				self.take_while(|c| c != '\n');
				continue;
			}
			if ch == '/' && self.peek(1) == Some('*') {
				self.bump();
				self.bump();
				loop {
					match self.bump() {
						Some('*') if self.peek(0) == Some('/') => {
							self.bump();
							break;
						}
						Some(_) => {}
						None => return Err(Message::error(line, col, "Unterminated comment")),
					}
				}
				continue;
			}

			let token = if ch == '"' {
				self.bump();
				let text = self.take_while(|c| c != '"' && c != '\n');
				if self.bump() != Some('"') {
					return Err(Message::error(line, col, "Unterminated string constant"));
				}
				Token::Str(text)
			} else if ch.is_ascii_alphabetic() || ch == '_' {
				Token::Ident(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
			} else if ch.is_ascii_digit() || (ch == '-' && self.peek(1).is_some_and(|c| c.is_ascii_digit())) {
				let mut text = String::new();
				if ch == '-' {
					self.bump();
					text.push('-');
				}
				text.push_str(&self.take_while(|c| c.is_ascii_digit() || c == '.'));
				if self.peek(0) == Some('f') {
					self.bump();
				}
				Token::Number(text)
			} else if ch == ':' && self.peek(1) == Some(':') {
				self.bump();
				self.bump();
				Token::Scope
			} else if "{}();=<>@,".contains(ch) {
				self.bump();
				Token::Punct(ch)
			} else {
				return Err(Message::error(line, col, format!("Unexpected character '{ch}'")));
			};

			tokens.push(Spanned { token, line, col });
		}

		Ok(tokens)
	}
}

struct Parser {
	tokens: Vec<Spanned>,
	pos: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Spanned> {
		self.tokens.get(self.pos)
	}

	fn next(&mut self) -> Result<Spanned, Message> {
		let token = self.tokens.get(self.pos).cloned().ok_or_else(|| self.eof())?;
		self.pos += 1;
		Ok(token)
	}

	fn eof(&self) -> Message {
		let (line, col) = self.tokens.last().map_or((1, 1), |last| (last.line, last.col));
		Message::error(line, col, "Unexpected end of file")
	}

	fn is_punct(&self, ch: char) -> bool {
		matches!(self.peek(), Some(Spanned { token: Token::Punct(found), .. }) if *found == ch)
	}

	fn is_ident(&self, word: &str) -> bool {
		matches!(self.peek(), Some(Spanned { token: Token::Ident(found), .. }) if found == word)
	}

	fn expect_punct(&mut self, ch: char) -> Result<(), Message> {
		let token = self.next()?;
		match token.token {
			Token::Punct(found) if found == ch => Ok(()),
			other => Err(Message::error(token.line, token.col, format!("Expected '{ch}' instead of '{other}'"))),
		}
	}

	fn expect_ident(&mut self) -> Result<String, Message> {
		let token = self.next()?;
		match token.token {
			Token::Ident(name) => Ok(name),
			other => Err(Message::error(token.line, token.col, format!("Expected identifier instead of '{other}'"))),
		}
	}

	fn eat_punct(&mut self, ch: char) -> bool {
		if self.is_punct(ch) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	fn items(&mut self, program: &mut Program, namespace: Option<&str>) -> Result<(), Message> {
		while let Some(token) = self.peek() {
			if matches!(token.token, Token::Punct('}')) && namespace.is_some() {
				return Ok(());
			}

			if self.is_ident("namespace") {
				self.pos += 1;
				let name = self.expect_ident()?;
				let nested = match namespace {
					Some(outer) => format!("{outer}::{name}"),
					None => name,
				};
				self.expect_punct('{')?;
				self.items(program, Some(&nested))?;
				self.expect_punct('}')?;
			} else if self.is_ident("class") {
				self.pos += 1;
				let class = self.class(namespace)?;
				program.classes.push(class);
			} else if self.is_ident("enum") {
				self.pos += 1;
				let def = self.enum_def(namespace)?;
				program.enums.push(def);
			} else {
				let var = self.var()?;
				program.globals.push(var);
			}
		}

		match namespace {
			Some(_) => Err(self.eof()),
			None => Ok(()),
		}
	}

	fn class(&mut self, namespace: Option<&str>) -> Result<ClassDef, Message> {
		let name = self.expect_ident()?;
		self.expect_punct('{')?;
		let mut fields = Vec::new();
		while !self.eat_punct('}') {
			fields.push(self.var()?);
		}
		self.eat_punct(';');

		Ok(ClassDef {
			name,
			namespace: namespace.map(str::to_owned),
			fields,
		})
	}

	fn enum_def(&mut self, namespace: Option<&str>) -> Result<EnumDef, Message> {
		let name = self.expect_ident()?;
		self.expect_punct('{')?;
		let mut members = Vec::new();
		let mut next_value = 0;
		while !self.eat_punct('}') {
			let member = self.expect_ident()?;
			if self.eat_punct('=') {
				match self.literal()? {
					Literal::Int(value) => next_value = value,
					other => {
						let (line, col) = self.position();
						return Err(Message::error(line, col, format!("Enum value must be an integer, found {other:?}")));
					}
				}
			}
			members.push((member, next_value));
			next_value += 1;
			if !self.eat_punct(',') {
				self.expect_punct('}')?;
				break;
			}
		}
		self.eat_punct(';');

		Ok(EnumDef {
			name,
			namespace: namespace.map(str::to_owned),
			members,
		})
	}

	fn var(&mut self) -> Result<VarDef, Message> {
		let is_const = self.is_ident("const");
		if is_const {
			self.pos += 1;
		}
		let ty = self.type_expr()?;
		let name = self.expect_ident()?;
		let init = if self.eat_punct('=') { Some(self.literal()?) } else { None };
		self.expect_punct(';')?;

		Ok(VarDef { name, ty, is_const, init })
	}

	fn type_expr(&mut self) -> Result<TypeExpr, Message> {
		let (line, col) = self.position();
		let mut name = self.expect_ident()?;
		while matches!(self.peek(), Some(Spanned { token: Token::Scope, .. })) {
			self.pos += 1;
			name.push_str("::");
			name.push_str(&self.expect_ident()?);
		}

		let arg = if self.eat_punct('<') {
			let inner = self.type_expr()?;
			self.expect_punct('>')?;
			Some(Box::new(inner))
		} else {
			None
		};
		let handle = self.eat_punct('@');

		Ok(TypeExpr { name, arg, handle, line, col })
	}

	fn literal(&mut self) -> Result<Literal, Message> {
		let token = self.next()?;
		let literal = match token.token {
			Token::Number(text) if text.contains('.') => text.parse().ok().map(Literal::Float),
			Token::Number(text) => text.parse().ok().map(Literal::Int),
			Token::Str(text) => Some(Literal::Str(text)),
			Token::Ident(word) if word == "true" => Some(Literal::Bool(true)),
			Token::Ident(word) if word == "false" => Some(Literal::Bool(false)),
			Token::Ident(word) => Some(Literal::Ident(word)),
			_ => None,
		};
		literal.ok_or_else(|| Message::error(token.line, token.col, "Expected a constant expression"))
	}

	fn position(&self) -> (u32, u32) {
		self.peek().map_or_else(|| self.tokens.last().map_or((1, 1), |last| (last.line, last.col)), |token| (token.line, token.col))
	}
}
