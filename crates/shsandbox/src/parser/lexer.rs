//! Lexer for shell scripts
//!
//! Tokenizes input into operators and raw words. Words keep their quotes and
//! expansion syntax verbatim; the parser splits them into [`WordPart`]s.
//!
//! [`WordPart`]: super::WordPart

use super::tokens::Token;
use crate::error::{Error, Result};

/// Line and column (both 1-based) of the next unread character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    fn start() -> Self {
        Self { line: 1, column: 1 }
    }

    fn step(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

/// Lexer for shell scripts.
pub(crate) struct Lexer<'a> {
    position: Position,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            position: Position::start(),
            chars: input.chars().peekable(),
        }
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    /// Get the next token from the input.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace();
        self.next_token_inner()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Look `n` characters past the next one without consuming.
    fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.clone().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next();
        if let Some(c) = ch {
            self.position.step(c);
        }
        ch
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse_at(message, self.position.line, self.position.column)
    }

    fn next_token_inner(&mut self) -> Result<Option<Token>> {
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };

        let token = match ch {
            '\n' => {
                self.advance();
                Token::Newline
            }
            ';' => {
                self.advance();
                if self.peek_char() == Some(';') {
                    return Err(self.error("case statements are not supported"));
                }
                Token::Semicolon
            }
            '|' => {
                self.advance();
                if self.peek_char() == Some('|') {
                    self.advance();
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            '&' => {
                self.advance();
                match self.peek_char() {
                    Some('&') => {
                        self.advance();
                        Token::And
                    }
                    Some('>') => {
                        self.advance();
                        Token::RedirectBoth
                    }
                    _ => Token::Background,
                }
            }
            '>' => {
                self.advance();
                match self.peek_char() {
                    Some('>') => {
                        self.advance();
                        Token::RedirectAppend
                    }
                    Some('&') => {
                        self.advance();
                        let target = self.read_fd_number().unwrap_or(1);
                        Token::DupFd(1, target)
                    }
                    _ => Token::RedirectOut,
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('<') {
                    self.advance();
                    if self.peek_char() == Some('<') {
                        self.advance();
                        Token::HereString
                    } else {
                        return Err(self.error("here documents are not supported"));
                    }
                } else {
                    Token::RedirectIn
                }
            }
            '(' => {
                self.advance();
                if self.peek_char() == Some('(') {
                    self.advance();
                    Token::Arithmetic(self.read_arithmetic_body()?)
                } else {
                    Token::LeftParen
                }
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            '#' => {
                // Comment - skip to end of line
                self.skip_comment();
                return self.next_token_inner();
            }
            '0'..='9' => match self.read_fd_redirect() {
                Some(token) => token,
                None => Token::Word(self.read_word()?),
            },
            _ => Token::Word(self.read_word()?),
        };
        Ok(Some(token))
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == ' ' || ch == '\t' {
                self.advance();
            } else if ch == '\\' && self.peek_nth(1) == Some('\n') {
                // Line continuation
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_fd_number(&mut self) -> Option<i32> {
        let mut digits = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        digits.parse().ok()
    }

    /// Single digit immediately followed by `>`, `>>`, `>&N` or `<`.
    fn read_fd_redirect(&mut self) -> Option<Token> {
        let fd = self.peek_char()?.to_digit(10)? as i32;
        match (self.peek_nth(1), self.peek_nth(2)) {
            (Some('>'), Some('>')) => {
                self.advance();
                self.advance();
                self.advance();
                Some(Token::RedirectFdAppend(fd))
            }
            (Some('>'), Some('&')) => {
                self.advance();
                self.advance();
                self.advance();
                let target = self.read_fd_number().unwrap_or(1);
                Some(Token::DupFd(fd, target))
            }
            (Some('>'), _) => {
                self.advance();
                self.advance();
                Some(Token::RedirectFd(fd))
            }
            (Some('<'), _) if fd == 0 => {
                self.advance();
                self.advance();
                Some(Token::RedirectIn)
            }
            _ => None,
        }
    }

    /// Read the body of `(( ... ))` after the opening parens were consumed.
    fn read_arithmetic_body(&mut self) -> Result<String> {
        let mut body = String::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.advance() else {
                return Err(self.error("unterminated arithmetic command"));
            };
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    if self.peek_char() == Some(')') {
                        self.advance();
                        return Ok(body);
                    }
                    return Err(self.error("expected '))' to close arithmetic command"));
                }
                ')' => depth -= 1,
                _ => {}
            }
            body.push(c);
        }
    }

    fn read_word(&mut self) -> Result<String> {
        let mut word = String::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' | '\n' | ';' | '|' | '&' | '<' | '>' | ')' => break,
                '(' => {
                    // Compound assignment: name=( ... )
                    if is_assignment_prefix(&word) {
                        self.advance();
                        word.push('(');
                        self.read_balanced(&mut word)?;
                        continue;
                    }
                    break;
                }
                '\'' => {
                    self.advance();
                    word.push('\'');
                    self.read_single_quoted(&mut word)?;
                }
                '"' => {
                    self.advance();
                    word.push('"');
                    self.read_double_quoted(&mut word)?;
                }
                '\\' => {
                    self.advance();
                    match self.advance() {
                        // \<newline> is line continuation: discard both
                        Some('\n') => {}
                        Some(next) => {
                            word.push('\\');
                            word.push(next);
                        }
                        None => word.push('\\'),
                    }
                }
                '$' => {
                    self.advance();
                    word.push('$');
                    self.read_dollar(&mut word)?;
                }
                '`' => {
                    self.advance();
                    word.push('`');
                    self.read_backquoted(&mut word)?;
                }
                _ => {
                    word.push(ch);
                    self.advance();
                }
            }
        }

        Ok(word)
    }

    fn read_single_quoted(&mut self, word: &mut String) -> Result<()> {
        loop {
            match self.advance() {
                Some('\'') => {
                    word.push('\'');
                    return Ok(());
                }
                Some(c) => word.push(c),
                None => return Err(self.error("unterminated single quote")),
            }
        }
    }

    fn read_double_quoted(&mut self, word: &mut String) -> Result<()> {
        loop {
            match self.advance() {
                Some('"') => {
                    word.push('"');
                    return Ok(());
                }
                Some('\\') => {
                    word.push('\\');
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                Some('$') => {
                    word.push('$');
                    self.read_dollar(word)?;
                }
                Some('`') => {
                    word.push('`');
                    self.read_backquoted(word)?;
                }
                Some(c) => word.push(c),
                None => return Err(self.error("unterminated double quote")),
            }
        }
    }

    fn read_backquoted(&mut self, word: &mut String) -> Result<()> {
        loop {
            match self.advance() {
                Some('`') => {
                    word.push('`');
                    return Ok(());
                }
                Some('\\') => {
                    word.push('\\');
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                Some(c) => word.push(c),
                None => return Err(self.error("unterminated backquote")),
            }
        }
    }

    /// Continue after a `$`: `$(...)`, `$((...))`, `${...}` are copied whole.
    fn read_dollar(&mut self, word: &mut String) -> Result<()> {
        match self.peek_char() {
            Some('(') => {
                self.advance();
                word.push('(');
                self.read_balanced(word)
            }
            Some('{') => {
                self.advance();
                word.push('{');
                loop {
                    match self.advance() {
                        Some('}') => {
                            word.push('}');
                            return Ok(());
                        }
                        Some(c) => word.push(c),
                        None => return Err(self.error("unterminated parameter expansion")),
                    }
                }
            }
            _ => Ok(()),
        }
    }

    /// Copy up to the `)` matching an already-consumed `(`, honoring quotes.
    fn read_balanced(&mut self, word: &mut String) -> Result<()> {
        let mut depth = 1usize;
        loop {
            let Some(c) = self.advance() else {
                return Err(self.error("unterminated parenthesis"));
            };
            word.push(c);
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                '\'' => self.read_single_quoted(word)?,
                '"' => self.read_double_quoted(word)?,
                '`' => self.read_backquoted(word)?,
                '\\' => {
                    if let Some(next) = self.advance() {
                        word.push(next);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Whether `word` is `name=`, `name+=` or `name[index]=` (with `=` last).
pub(super) fn is_assignment_prefix(word: &str) -> bool {
    let Some(head) = word.strip_suffix('=') else {
        return false;
    };
    let head = head.strip_suffix('+').unwrap_or(head);
    let name = match head.find('[') {
        Some(open) if head.ends_with(']') => &head[..open],
        Some(_) => return false,
        None => head,
    };
    super::ast::is_valid_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(token) = lexer.next_token().unwrap() {
            out.push(token);
        }
        out
    }

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_simple_words() {
        assert_eq!(tokens("echo hello world"), vec![word("echo"), word("hello"), word("world")]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a && b || c | d; e"),
            vec![
                word("a"),
                Token::And,
                word("b"),
                Token::Or,
                word("c"),
                Token::Pipe,
                word("d"),
                Token::Semicolon,
                word("e"),
            ]
        );
    }

    #[test]
    fn test_redirects() {
        assert_eq!(
            tokens("cat <in >out 2>>err >&2 2>&1 &>both"),
            vec![
                word("cat"),
                Token::RedirectIn,
                word("in"),
                Token::RedirectOut,
                word("out"),
                Token::RedirectFdAppend(2),
                word("err"),
                Token::DupFd(1, 2),
                Token::DupFd(2, 1),
                Token::RedirectBoth,
                word("both"),
            ]
        );
    }

    #[test]
    fn test_command_substitution_kept_whole() {
        assert_eq!(
            tokens("a=$(echo foo | sed 's/o/a/g')"),
            vec![word("a=$(echo foo | sed 's/o/a/g')")]
        );
    }

    #[test]
    fn test_quoted_parens_do_not_close_substitution() {
        assert_eq!(tokens("x=$(echo ')')"), vec![word("x=$(echo ')')")]);
    }

    #[test]
    fn test_array_assignment_word() {
        assert_eq!(tokens("X=(a b c)"), vec![word("X=(a b c)")]);
        assert_eq!(tokens("X+=(d)"), vec![word("X+=(d)")]);
    }

    #[test]
    fn test_arithmetic_command() {
        assert_eq!(
            tokens("((i += (2 * 3)))"),
            vec![Token::Arithmetic("i += (2 * 3)".to_string())]
        );
    }

    #[test]
    fn test_comments_and_continuation() {
        assert_eq!(
            tokens("echo a \\\n b # trailing\n"),
            vec![word("echo"), word("a"), word("b"), Token::Newline]
        );
    }

    #[test]
    fn test_unterminated_quote_is_error() {
        let mut lexer = Lexer::new("echo 'oops");
        lexer.next_token().unwrap();
        assert!(matches!(lexer.next_token(), Err(Error::ParseAt { .. })));
    }

    #[test]
    fn test_position_tracks_lines() {
        let mut lexer = Lexer::new("a=1\n  b");
        assert_eq!(lexer.position(), Position { line: 1, column: 1 });
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert_eq!(lexer.position(), Position { line: 2, column: 4 });
    }

    #[test]
    fn test_heredoc_rejected() {
        let mut lexer = Lexer::new("cat <<EOF");
        lexer.next_token().unwrap();
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_assignment_prefix() {
        assert!(is_assignment_prefix("a="));
        assert!(is_assignment_prefix("a+="));
        assert!(is_assignment_prefix("m[key]="));
        assert!(!is_assignment_prefix("1a="));
        assert!(!is_assignment_prefix("echo"));
    }
}
