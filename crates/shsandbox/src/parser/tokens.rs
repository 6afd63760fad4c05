//! Lexer output

/// One lexical unit of the supported shell subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Raw word text, quotes and `$...` syntax still in place
    Word(String),
    /// Inside of `(( ... ))`
    Arithmetic(String),

    // Separators
    Newline,
    Semicolon,
    Pipe,
    And,
    Or,
    /// `&`, recognized only so it can be rejected
    Background,
    LeftParen,
    RightParen,

    // Redirections; a leading fd number is carried where one was written
    RedirectIn,
    RedirectOut,
    RedirectAppend,
    /// `&>`
    RedirectBoth,
    /// `<<<`
    HereString,
    /// `N>`
    RedirectFd(i32),
    /// `N>>`
    RedirectFdAppend(i32),
    /// `N>&M`
    DupFd(i32, i32),
}
