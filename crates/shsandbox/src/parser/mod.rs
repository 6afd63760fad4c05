//! Parser module for shsandbox
//!
//! Implements a recursive descent parser for the supported shell subset.
//! The lexer hands over raw words; [`parse_word`] splits them into literal
//! and expansion parts, recursing into command substitutions and arithmetic.

mod arith;
mod ast;
mod lexer;
mod tokens;
pub mod visit;

pub use arith::parse_arithmetic;
pub use ast::*;
pub use visit::Visitor;

use std::cell::Cell;

use crate::error::{Error, Result};
use lexer::Lexer;
use tokens::Token;

/// Nesting accepted across compound commands, substitutions and arithmetic
/// before parsing fails. Keeps hostile input from exhausting the stack.
pub const MAX_PARSE_DEPTH: usize = 256;

thread_local! {
    /// Live recursion of the parsers on this thread. Parsing never awaits,
    /// so nested shell, word and arithmetic parsers share one count.
    static PARSE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of parser recursion, released when dropped.
pub(crate) struct DepthGuard(());

impl DepthGuard {
    pub(crate) fn enter() -> Result<Self> {
        PARSE_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > MAX_PARSE_DEPTH {
                return Err(Error::Parse(format!(
                    "nesting too deep (max {} levels)",
                    MAX_PARSE_DEPTH
                )));
            }
            depth.set(next);
            Ok(DepthGuard(()))
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        PARSE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Words that close a compound list when they appear in command position.
const CLOSERS: &[&str] = &["then", "elif", "else", "fi", "do", "done", "}"];

/// Builtins whose arguments are parsed as declarations.
const DECLARATION_BUILTINS: &[&str] = &["declare", "typeset", "export", "local"];

/// Parse a complete script.
pub fn parse(input: &str) -> Result<Script> {
    Parser::new(input).parse()
}

/// Parser for shell scripts.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Option<Token>,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            lexer: Lexer::new(input),
            current_token: None,
        }
    }

    /// Parse the input and return the AST.
    pub fn parse(mut self) -> Result<Script> {
        self.advance()?;
        let commands = self.parse_compound_list()?;
        match &self.current_token {
            None => Ok(Script { commands }),
            Some(token) => Err(self.error(format!("unexpected {}", describe(token)))),
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let pos = self.lexer.position();
        Error::parse_at(message, pos.line, pos.column)
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while matches!(self.current_token, Some(Token::Newline)) {
            self.advance()?;
        }
        Ok(())
    }

    fn current_word(&self) -> Option<&str> {
        match &self.current_token {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn at_reserved(&self, word: &str) -> bool {
        self.current_word() == Some(word)
    }

    /// True when the current token ends the enclosing compound list.
    fn at_list_end(&self) -> bool {
        match &self.current_token {
            None | Some(Token::RightParen) => true,
            Some(Token::Word(w)) => CLOSERS.contains(&w.as_str()),
            _ => false,
        }
    }

    fn expect_reserved(&mut self, word: &str) -> Result<()> {
        if self.at_reserved(word) {
            self.advance()
        } else {
            let found = self
                .current_token
                .as_ref()
                .map(describe)
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(format!("expected '{}', found {}", word, found)))
        }
    }

    /// Commands up to a closer, `)` or end of input.
    fn parse_compound_list(&mut self) -> Result<Vec<Command>> {
        let _depth = DepthGuard::enter()?;
        let mut commands = Vec::new();
        loop {
            while matches!(
                self.current_token,
                Some(Token::Newline) | Some(Token::Semicolon)
            ) {
                self.advance()?;
            }
            if self.at_list_end() {
                break;
            }
            match self.parse_command_list()? {
                Some(cmd) => commands.push(cmd),
                None => {
                    let found = self
                        .current_token
                        .as_ref()
                        .map(describe)
                        .unwrap_or_default();
                    return Err(self.error(format!("unexpected {}", found)));
                }
            }
        }
        Ok(commands)
    }

    /// Parse a command list (commands connected by &&, || or ;)
    fn parse_command_list(&mut self) -> Result<Option<Command>> {
        let first = match self.parse_pipeline()? {
            Some(cmd) => cmd,
            None => return Ok(None),
        };

        let mut rest = Vec::new();

        loop {
            let op = match &self.current_token {
                Some(Token::And) => {
                    self.advance()?;
                    ListOperator::And
                }
                Some(Token::Or) => {
                    self.advance()?;
                    ListOperator::Or
                }
                Some(Token::Semicolon) => {
                    self.advance()?;
                    // A trailing ; ends the statement
                    if self.at_list_end() || matches!(self.current_token, Some(Token::Newline)) {
                        break;
                    }
                    ListOperator::Semicolon
                }
                Some(Token::Background) => {
                    return Err(self.error("background jobs are not supported"));
                }
                _ => break,
            };

            self.skip_newlines()?;

            match self.parse_pipeline()? {
                Some(cmd) => rest.push((op, cmd)),
                None => return Err(self.error("expected command after list operator")),
            }
        }

        if rest.is_empty() {
            Ok(Some(first))
        } else {
            Ok(Some(Command::List(CommandList {
                first: Box::new(first),
                rest,
            })))
        }
    }

    /// Parse a pipeline (commands connected by |)
    fn parse_pipeline(&mut self) -> Result<Option<Command>> {
        let negated = self.at_reserved("!");
        if negated {
            self.advance()?;
        }

        let first = match self.parse_command()? {
            Some(cmd) => cmd,
            None if negated => return Err(self.error("expected command after !")),
            None => return Ok(None),
        };

        let mut commands = vec![first];

        while matches!(self.current_token, Some(Token::Pipe)) {
            self.advance()?;
            self.skip_newlines()?;

            match self.parse_command()? {
                Some(cmd) => commands.push(cmd),
                None => return Err(self.error("expected command after |")),
            }
        }

        if commands.len() == 1 && !negated {
            Ok(Some(commands.remove(0)))
        } else {
            Ok(Some(Command::Pipeline(Pipeline { negated, commands })))
        }
    }

    fn parse_command(&mut self) -> Result<Option<Command>> {
        if self.at_list_end() {
            return Ok(None);
        }
        match &self.current_token {
            Some(Token::LeftParen) => {
                self.advance()?;
                let body = self.parse_compound_list()?;
                if !matches!(self.current_token, Some(Token::RightParen)) {
                    return Err(self.error("expected ')' to close subshell"));
                }
                self.advance()?;
                self.finish_compound(CompoundCommand::Subshell(body))
            }
            Some(Token::Arithmetic(body)) => {
                let expr = parse_arithmetic(body)?;
                self.advance()?;
                Ok(Some(Command::Arithmetic(expr)))
            }
            Some(Token::Word(w)) => match w.as_str() {
                "if" => {
                    let cmd = self.parse_if()?;
                    self.finish_compound(cmd)
                }
                "while" | "until" => {
                    let cmd = self.parse_while()?;
                    self.finish_compound(cmd)
                }
                "for" => {
                    let cmd = self.parse_for()?;
                    self.finish_compound(cmd)
                }
                "{" => {
                    self.advance()?;
                    let body = self.parse_compound_list()?;
                    self.expect_reserved("}")?;
                    self.finish_compound(CompoundCommand::BraceGroup(body))
                }
                "case" | "select" | "function" => {
                    Err(self.error(format!("'{}' is not supported", w)))
                }
                name if DECLARATION_BUILTINS.contains(&name) => self.parse_declaration(),
                _ => Ok(self.parse_simple_command()?.map(Command::Simple)),
            },
            _ => Ok(self.parse_simple_command()?.map(Command::Simple)),
        }
    }

    /// Collect trailing redirections of a compound command.
    fn finish_compound(&mut self, compound: CompoundCommand) -> Result<Option<Command>> {
        let mut redirects = Vec::new();
        while let Some(redirect) = self.parse_redirect()? {
            redirects.push(redirect);
        }
        Ok(Some(Command::Compound(compound, redirects)))
    }

    fn parse_if(&mut self) -> Result<CompoundCommand> {
        self.expect_reserved("if")?;
        let condition = self.parse_compound_list()?;
        self.expect_reserved("then")?;
        let then_branch = self.parse_compound_list()?;

        let mut elif_branches = Vec::new();
        let mut else_branch = None;
        loop {
            if self.at_reserved("elif") {
                self.advance()?;
                let cond = self.parse_compound_list()?;
                self.expect_reserved("then")?;
                let body = self.parse_compound_list()?;
                elif_branches.push((cond, body));
            } else if self.at_reserved("else") {
                self.advance()?;
                else_branch = Some(self.parse_compound_list()?);
            } else {
                break;
            }
        }
        self.expect_reserved("fi")?;

        if condition.is_empty() {
            return Err(self.error("empty if condition"));
        }

        Ok(CompoundCommand::If(IfCommand {
            condition,
            then_branch,
            elif_branches,
            else_branch,
        }))
    }

    fn parse_while(&mut self) -> Result<CompoundCommand> {
        let until = self.at_reserved("until");
        self.advance()?;
        let condition = self.parse_compound_list()?;
        let body = self.parse_do_group()?;
        let cmd = WhileCommand { condition, body };
        Ok(if until {
            CompoundCommand::Until(cmd)
        } else {
            CompoundCommand::While(cmd)
        })
    }

    fn parse_do_group(&mut self) -> Result<Vec<Command>> {
        self.skip_separators()?;
        self.expect_reserved("do")?;
        let body = self.parse_compound_list()?;
        self.expect_reserved("done")?;
        Ok(body)
    }

    fn skip_separators(&mut self) -> Result<()> {
        while matches!(
            self.current_token,
            Some(Token::Newline) | Some(Token::Semicolon)
        ) {
            self.advance()?;
        }
        Ok(())
    }

    fn parse_for(&mut self) -> Result<CompoundCommand> {
        self.expect_reserved("for")?;

        if let Some(Token::Arithmetic(body)) = &self.current_token {
            let (init, condition, step) = split_arith_for(body)?;
            self.advance()?;
            let body = self.parse_do_group()?;
            return Ok(CompoundCommand::ArithFor(ArithForCommand {
                init,
                condition,
                step,
                body,
            }));
        }

        let variable = match self.current_word() {
            Some(name) if is_valid_name(name) => name.to_string(),
            _ => return Err(self.error("expected variable name after 'for'")),
        };
        self.advance()?;
        self.skip_newlines()?;

        let mut words = Vec::new();
        if self.at_reserved("in") {
            self.advance()?;
            while let Some(Token::Word(w)) = &self.current_token {
                words.push(parse_word(w)?);
                self.advance()?;
            }
        }

        let body = self.parse_do_group()?;
        Ok(CompoundCommand::For(ForCommand {
            variable,
            words,
            body,
        }))
    }

    fn parse_declaration(&mut self) -> Result<Option<Command>> {
        let builtin = self.current_word().unwrap_or_default().to_string();
        self.advance()?;

        let mut args = Vec::new();
        while let Some(Token::Word(raw)) = &self.current_token {
            let arg = if raw.starts_with('-') || raw.starts_with('+') {
                DeclArg::Flag(parse_word(raw)?)
            } else if let Some(assignment) = parse_assignment(raw)? {
                DeclArg::Assign(assignment)
            } else if is_valid_name(raw) {
                DeclArg::Name(raw.clone())
            } else {
                return Err(self.error(format!("{}: '{}': not a valid identifier", builtin, raw)));
            };
            args.push(arg);
            self.advance()?;
        }

        Ok(Some(Command::Declaration(DeclCommand { builtin, args })))
    }

    /// Parse a simple command with redirections
    fn parse_simple_command(&mut self) -> Result<Option<SimpleCommand>> {
        let mut cmd = SimpleCommand::default();

        loop {
            if let Some(Token::Word(w)) = &self.current_token {
                if cmd.name.is_none() && cmd.args.is_empty() {
                    if let Some(assignment) = parse_assignment(w)? {
                        cmd.assignments.push(assignment);
                        self.advance()?;
                        continue;
                    }
                }
                let word = parse_word(w)?;
                if cmd.name.is_none() {
                    cmd.name = Some(word);
                } else {
                    cmd.args.push(word);
                }
                self.advance()?;
                continue;
            }

            match self.parse_redirect()? {
                Some(redirect) => cmd.redirects.push(redirect),
                None => break,
            }
        }

        if matches!(self.current_token, Some(Token::LeftParen))
            && cmd.name.is_some()
            && cmd.args.is_empty()
        {
            return Err(self.error("function definitions are not supported"));
        }

        if cmd.name.is_none() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return Ok(None);
        }

        Ok(Some(cmd))
    }

    /// Parse one redirection if the current token starts one.
    fn parse_redirect(&mut self) -> Result<Option<Redirect>> {
        let (fd, kind) = match &self.current_token {
            Some(Token::RedirectOut) => (None, RedirectKind::Output),
            Some(Token::RedirectAppend) => (None, RedirectKind::Append),
            Some(Token::RedirectIn) => (None, RedirectKind::Input),
            Some(Token::HereString) => (None, RedirectKind::HereString),
            Some(Token::RedirectBoth) => (None, RedirectKind::OutputBoth),
            Some(Token::RedirectFd(fd)) => (Some(*fd), RedirectKind::Output),
            Some(Token::RedirectFdAppend(fd)) => (Some(*fd), RedirectKind::Append),
            Some(Token::DupFd(from, to)) => {
                let redirect = Redirect {
                    fd: Some(*from),
                    kind: RedirectKind::DupOutput,
                    target: Word::literal(to.to_string()),
                };
                self.advance()?;
                return Ok(Some(redirect));
            }
            _ => return Ok(None),
        };
        self.advance()?;
        let target = self.expect_word()?;
        Ok(Some(Redirect { fd, kind, target }))
    }

    /// Expect a word token and return it as a Word
    fn expect_word(&mut self) -> Result<Word> {
        match &self.current_token {
            Some(Token::Word(w)) => {
                let word = parse_word(w)?;
                self.advance()?;
                Ok(word)
            }
            _ => Err(self.error("expected word")),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{}'", w),
        Token::RightParen => "')'".to_string(),
        Token::LeftParen => "'('".to_string(),
        Token::Newline => "newline".to_string(),
        other => format!("{:?}", other),
    }
}

/// Split the body of `for ((init; cond; step))` into its three clauses.
fn split_arith_for(body: &str) -> Result<(Option<ArithExpr>, Option<ArithExpr>, Option<ArithExpr>)> {
    let clauses: Vec<&str> = body.split(';').collect();
    if clauses.len() != 3 {
        return Err(Error::Parse(
            "arithmetic for needs three ';'-separated clauses".to_string(),
        ));
    }
    let clause = |s: &str| -> Result<Option<ArithExpr>> {
        if s.trim().is_empty() {
            Ok(None)
        } else {
            parse_arithmetic(s).map(Some)
        }
    };
    Ok((clause(clauses[0])?, clause(clauses[1])?, clause(clauses[2])?))
}

/// Recognize `name=value`, `name+=value`, `name[idx]=value` and the
/// compound forms `name=(...)`. Returns `None` for ordinary words.
pub(crate) fn parse_assignment(raw: &str) -> Result<Option<Assignment>> {
    let Some(eq) = assignment_split(raw) else {
        return Ok(None);
    };
    let head = &raw[..eq];
    if !lexer::is_assignment_prefix(&raw[..=eq]) {
        return Ok(None);
    }

    let (head, append) = match head.strip_suffix('+') {
        Some(h) => (h, true),
        None => (head, false),
    };
    let (name, index) = match head.find('[') {
        Some(open) => {
            let idx = &head[open + 1..head.len() - 1];
            (head[..open].to_string(), Some(parse_word(idx)?))
        }
        None => (head.to_string(), None),
    };

    let rhs = &raw[eq + 1..];
    let value = if index.is_none() && rhs.starts_with('(') && rhs.ends_with(')') {
        AssignmentValue::Array(parse_array_elements(&rhs[1..rhs.len() - 1])?)
    } else {
        AssignmentValue::Scalar(parse_word(rhs)?)
    };

    Ok(Some(Assignment {
        name,
        index,
        value,
        append,
    }))
}

/// Byte index of the `=` that ends an assignment prefix, skipping `[...]`.
fn assignment_split(raw: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in raw.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some(i),
            '\'' | '"' | '$' | '`' | '\\' if depth == 0 => return None,
            _ => {}
        }
    }
    None
}

fn parse_array_elements(inner: &str) -> Result<Vec<ArrayElement>> {
    let mut lexer = Lexer::new(inner);
    let mut elements = Vec::new();
    while let Some(token) = lexer.next_token()? {
        match token {
            Token::Newline => {}
            Token::Word(raw) => elements.push(parse_array_element(&raw)?),
            other => {
                return Err(Error::Parse(format!(
                    "unexpected {} in array assignment",
                    describe(&other)
                )));
            }
        }
    }
    Ok(elements)
}

fn parse_array_element(raw: &str) -> Result<ArrayElement> {
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some(close) = rest.find("]=") {
            return Ok(ArrayElement {
                key: Some(parse_word(&rest[..close])?),
                value: parse_word(&rest[close + 2..])?,
            });
        }
    }
    Ok(ArrayElement {
        key: None,
        value: parse_word(raw)?,
    })
}

/// Parse a raw word into literal and expansion parts, removing quotes.
pub fn parse_word(raw: &str) -> Result<Word> {
    WordParser::new(raw).parse()
}

struct WordParser {
    chars: Vec<char>,
    pos: usize,
    parts: Vec<WordPart>,
    current: String,
}

impl WordParser {
    fn new(raw: &str) -> Self {
        Self {
            chars: raw.chars().collect(),
            pos: 0,
            parts: Vec::new(),
            current: String::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.parts
                .push(WordPart::Literal(std::mem::take(&mut self.current)));
        }
    }

    fn push_part(&mut self, part: WordPart) {
        self.flush();
        self.parts.push(part);
    }

    fn parse(mut self) -> Result<Word> {
        let _depth = DepthGuard::enter()?;
        let mut in_double = false;

        while let Some(ch) = self.next() {
            match ch {
                '\'' if !in_double => loop {
                    match self.next() {
                        Some('\'') => break,
                        Some(c) => self.current.push(c),
                        None => return Err(Error::Parse("unterminated single quote".into())),
                    }
                },
                '"' => in_double = !in_double,
                '\\' => match self.next() {
                    Some(c) if !in_double || matches!(c, '$' | '`' | '"' | '\\') => {
                        self.current.push(c)
                    }
                    Some('\n') => {}
                    Some(c) => {
                        self.current.push('\\');
                        self.current.push(c);
                    }
                    None => self.current.push('\\'),
                },
                '$' => self.parse_dollar()?,
                '`' => self.parse_backquote()?,
                _ => self.current.push(ch),
            }
        }

        if in_double {
            return Err(Error::Parse("unterminated double quote".into()));
        }

        self.flush();
        if self.parts.is_empty() {
            self.parts.push(WordPart::Literal(String::new()));
        }
        Ok(Word { parts: self.parts })
    }

    fn parse_dollar(&mut self) -> Result<()> {
        match self.peek() {
            Some('(') => {
                let open = self.pos;
                let close = find_closing(&self.chars, open)?;
                // $(( ... )) when the inner group spans the whole body
                if self.chars.get(open + 1) == Some(&'(')
                    && find_closing(&self.chars, open + 1).ok() == Some(close - 1)
                {
                    let body: String = self.chars[open + 2..close - 1].iter().collect();
                    self.push_part(WordPart::ArithmeticExpansion(parse_arithmetic(&body)?));
                } else {
                    let body: String = self.chars[open + 1..close].iter().collect();
                    self.push_part(WordPart::CommandSubstitution(parse(&body)?));
                }
                self.pos = close + 1;
            }
            Some('{') => {
                self.pos += 1;
                let mut inner = String::new();
                loop {
                    match self.next() {
                        Some('}') => break,
                        Some(c) => inner.push(c),
                        None => {
                            return Err(Error::Parse("unterminated parameter expansion".into()));
                        }
                    }
                }
                let part = parse_braced(&inner)?;
                self.push_part(part);
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.push_part(WordPart::Variable(name));
            }
            Some(c) if c == '?' || c == '#' || c == '@' || c == '*' || c.is_ascii_digit() => {
                self.pos += 1;
                self.push_part(WordPart::Variable(c.to_string()));
            }
            _ => self.current.push('$'),
        }
        Ok(())
    }

    fn parse_backquote(&mut self) -> Result<()> {
        let mut body = String::new();
        loop {
            match self.next() {
                Some('`') => break,
                Some('\\') => match self.next() {
                    Some(c @ ('`' | '\\' | '$')) => body.push(c),
                    Some(c) => {
                        body.push('\\');
                        body.push(c);
                    }
                    None => body.push('\\'),
                },
                Some(c) => body.push(c),
                None => return Err(Error::Parse("unterminated backquote".into())),
            }
        }
        self.push_part(WordPart::CommandSubstitution(parse(&body)?));
        Ok(())
    }
}

/// Interpret the inside of `${...}`.
fn parse_braced(inner: &str) -> Result<WordPart> {
    if let Some(rest) = inner.strip_prefix('#') {
        if !rest.is_empty() {
            let name = rest
                .strip_suffix("[@]")
                .or_else(|| rest.strip_suffix("[*]"))
                .unwrap_or(rest);
            if is_valid_name(name) {
                return Ok(WordPart::Length(name.to_string()));
            }
        }
    }
    if let Some(open) = inner.find('[') {
        if inner.ends_with(']') && is_valid_name(&inner[..open]) {
            return Ok(WordPart::ArrayAccess {
                name: inner[..open].to_string(),
                index: parse_word(&inner[open + 1..inner.len() - 1])?,
            });
        }
    }
    if is_valid_name(inner) || matches!(inner, "?" | "#" | "@" | "*") {
        return Ok(WordPart::Variable(inner.to_string()));
    }
    if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
        return Ok(WordPart::Variable(inner.to_string()));
    }
    Err(Error::Parse(format!(
        "unsupported parameter expansion: ${{{}}}",
        inner
    )))
}

/// Index of the `)` matching the `(` at `open`, skipping quoted text.
fn find_closing(chars: &[char], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            '\\' => i += 1,
            '\'' => {
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    i += 1;
                }
            }
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::Parse("unterminated '(' in word".into()))
}
