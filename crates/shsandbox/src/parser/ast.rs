//! AST types for parsed shell scripts
//!
//! Every node is a closed enum or a plain struct with public fields, so
//! tooling can walk a tree field by field (see [`super::visit`]) without any
//! runtime introspection.

use std::fmt;

/// A complete shell script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub commands: Vec<Command>,
}

/// One statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `name args...`, `a=1`, or both (`A=1 cmd`)
    Simple(SimpleCommand),

    /// `a | b`, or `! a`
    Pipeline(Pipeline),

    /// `a && b || c; d`
    List(CommandList),

    /// Control structure plus the redirections written after it
    Compound(CompoundCommand, Vec<Redirect>),

    /// `declare`, `typeset`, `export` or `local`
    Declaration(DeclCommand),

    /// `(( expr ))`
    Arithmetic(ArithExpr),
}

/// Command word, arguments, prefix assignments and redirections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    /// Command name; `None` for assignment-only statements like `a=1`
    pub name: Option<Word>,
    pub args: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// `NAME=value` words in front of the name
    pub assignments: Vec<Assignment>,
}

/// Stages joined by `|`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Leading `!`
    pub negated: bool,
    pub commands: Vec<Command>,
}

/// Commands chained by `;`, `&&` and `||`, evaluated left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandList {
    pub first: Box<Command>,
    pub rest: Vec<(ListOperator, Command)>,
}

/// Connector before the next command of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOperator {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `;` or newline
    Semicolon,
}

/// Control structures.
#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    If(IfCommand),
    While(WhileCommand),
    /// Same shape as `while`, condition inverted
    Until(WhileCommand),
    For(ForCommand),
    ArithFor(ArithForCommand),
    /// `{ ...; }`, runs in the current store
    BraceGroup(Vec<Command>),
    /// `( ... )`, runs on a discarded copy of the store
    Subshell(Vec<Command>),
}

/// `if ...; then ...; elif ...; else ...; fi`
#[derive(Debug, Clone, PartialEq)]
pub struct IfCommand {
    pub condition: Vec<Command>,
    pub then_branch: Vec<Command>,
    pub elif_branches: Vec<(Vec<Command>, Vec<Command>)>,
    pub else_branch: Option<Vec<Command>>,
}

/// While or until loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileCommand {
    pub condition: Vec<Command>,
    pub body: Vec<Command>,
}

/// `for variable in words; do body; done`
#[derive(Debug, Clone, PartialEq)]
pub struct ForCommand {
    pub variable: String,
    pub words: Vec<Word>,
    pub body: Vec<Command>,
}

/// `for ((init; condition; step))` loop. A missing condition is true.
#[derive(Debug, Clone, PartialEq)]
pub struct ArithForCommand {
    pub init: Option<ArithExpr>,
    pub condition: Option<ArithExpr>,
    pub step: Option<ArithExpr>,
    pub body: Vec<Command>,
}

/// Declaration builtin invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclCommand {
    /// `declare`, `typeset`, `export` or `local`
    pub builtin: String,
    pub args: Vec<DeclArg>,
}

/// One argument of a declaration builtin.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclArg {
    /// Option word such as `-a` or `-A`
    Flag(Word),
    /// Bare name, declared without a value
    Name(String),
    /// `name=value` or `name=(...)`
    Assign(Assignment),
}

/// A shell word as a sequence of literal and expansion parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    /// A word with no expansions.
    pub fn literal(s: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Literal(s.into())],
        }
    }

    /// The word's text when it is made of literal parts only.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal(s) => out.push_str(s),
                _ => return None,
            }
        }
        Some(out)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                WordPart::Literal(s) => write!(f, "{}", s)?,
                WordPart::Variable(name) => write!(f, "${{{}}}", name)?,
                WordPart::CommandSubstitution(script) => {
                    write!(f, "$(<{} commands>)", script.commands.len())?
                }
                WordPart::ArithmeticExpansion(expr) => write!(f, "$(({}))", expr)?,
                WordPart::Length(name) => write!(f, "${{#{}}}", name)?,
                WordPart::ArrayAccess { name, index } => write!(f, "${{{}[{}]}}", name, index)?,
            }
        }
        Ok(())
    }
}

/// One piece of a [`Word`].
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Text with quoting already resolved
    Literal(String),
    /// `$name`, `${name}` and the special `$?`
    Variable(String),
    /// `$(...)` or backquotes, parsed eagerly
    CommandSubstitution(Script),
    /// `$(( ... ))`
    ArithmeticExpansion(ArithExpr),
    /// `${#name}`: string length, or element count for arrays
    Length(String),
    /// Array element access ${arr[index]}, or every element with `@`/`*`
    ArrayAccess { name: String, index: Word },
}

/// A redirection attached to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// Explicit fd as written (`2>`); `None` means the kind's default
    pub fd: Option<i32>,
    pub kind: RedirectKind,
    /// Path, fd number for [`RedirectKind::DupOutput`], or here-string text
    pub target: Word,
}

/// Supported redirection operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>`
    Output,
    /// `>>`
    Append,
    /// `<`
    Input,
    /// `<<<`
    HereString,
    /// `N>&M`
    DupOutput,
    /// `&>`
    OutputBoth,
}

/// `name=value`, `name+=value`, `name[i]=value` or `name=(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    /// Subscript of an element assignment
    pub index: Option<Word>,
    pub value: AssignmentValue,
    /// `+=`
    pub append: bool,
}

/// Right-hand side of an [`Assignment`].
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentValue {
    Scalar(Word),
    /// `(a b c)` or `([k]=v ...)`
    Array(Vec<ArrayElement>),
}

/// One element of a compound array assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    /// Explicit `[key]=` prefix, if any
    pub key: Option<Word>,
    pub value: Word,
}

/// Arithmetic expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ArithExpr {
    /// Operand word: number, bare name, or parameter expansion
    Word(Word),
    /// `( expr )`
    Paren(Box<ArithExpr>),
    /// Unary operator; `post` marks postfix `x++`/`x--`
    Unary {
        op: UnaryOp,
        post: bool,
        operand: Box<ArithExpr>,
    },
    /// Binary operator. `a ? b : c` is `Quest(a, Colon(b, c))`.
    Binary {
        op: BinaryOp,
        left: Box<ArithExpr>,
        right: Box<ArithExpr>,
    },
}

impl ArithExpr {
    /// Operand naming a variable directly.
    pub fn name(name: impl Into<String>) -> Self {
        ArithExpr::Word(Word::literal(name))
    }

    /// Integer literal operand.
    pub fn number(n: i64) -> Self {
        ArithExpr::Word(Word::literal(n.to_string()))
    }

    pub fn unary(op: UnaryOp, post: bool, operand: ArithExpr) -> Self {
        ArithExpr::Unary {
            op,
            post,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: ArithExpr, right: ArithExpr) -> Self {
        ArithExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The variable name if this node is a bare variable reference.
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            ArithExpr::Word(word) => match word.parts.as_slice() {
                [WordPart::Literal(s)] if is_valid_name(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ArithExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithExpr::Word(w) => write!(f, "{}", w),
            ArithExpr::Paren(inner) => write!(f, "({})", inner),
            ArithExpr::Unary { op, post, operand } => {
                if *post {
                    write!(f, "{}{}", operand, op)
                } else {
                    write!(f, "{}{}", op, operand)
                }
            }
            ArithExpr::Binary { op, left, right } => match op {
                BinaryOp::Comma => write!(f, "{}, {}", left, right),
                _ => write!(f, "{} {} {}", left, op, right),
            },
        }
    }
}

/// Unary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Plus,
    Minus,
    Inc,
    Dec,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "!",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Inc => "++",
            UnaryOp::Dec => "--",
        })
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    Pow,
    Eql,
    Neq,
    Lss,
    Gtr,
    Leq,
    Geq,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndArit,
    OrArit,
    Comma,
    Quest,
    Colon,
    Assgn,
    AddAssgn,
    SubAssgn,
    MulAssgn,
    QuoAssgn,
    RemAssgn,
    AndAssgn,
    OrAssgn,
    XorAssgn,
    ShlAssgn,
    ShrAssgn,
}

impl BinaryOp {
    /// Whether this operator belongs to the assignment family.
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            BinaryOp::Assgn
                | BinaryOp::AddAssgn
                | BinaryOp::SubAssgn
                | BinaryOp::MulAssgn
                | BinaryOp::QuoAssgn
                | BinaryOp::RemAssgn
                | BinaryOp::AndAssgn
                | BinaryOp::OrAssgn
                | BinaryOp::XorAssgn
                | BinaryOp::ShlAssgn
                | BinaryOp::ShrAssgn
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Quo => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eql => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lss => "<",
            BinaryOp::Gtr => ">",
            BinaryOp::Leq => "<=",
            BinaryOp::Geq => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::AndArit => "&&",
            BinaryOp::OrArit => "||",
            BinaryOp::Comma => ",",
            BinaryOp::Quest => "?",
            BinaryOp::Colon => ":",
            BinaryOp::Assgn => "=",
            BinaryOp::AddAssgn => "+=",
            BinaryOp::SubAssgn => "-=",
            BinaryOp::MulAssgn => "*=",
            BinaryOp::QuoAssgn => "/=",
            BinaryOp::RemAssgn => "%=",
            BinaryOp::AndAssgn => "&=",
            BinaryOp::OrAssgn => "|=",
            BinaryOp::XorAssgn => "^=",
            BinaryOp::ShlAssgn => "<<=",
            BinaryOp::ShrAssgn => ">>=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `s` is a valid shell variable name.
pub fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("_x1"));
        assert!(!is_valid_name("1a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a-b"));
    }

    #[test]
    fn test_variable_name_only_for_bare_literals() {
        assert_eq!(ArithExpr::name("i").variable_name(), Some("i"));
        assert_eq!(ArithExpr::number(5).variable_name(), None);
        let expanded = ArithExpr::Word(Word {
            parts: vec![WordPart::Variable("i".into())],
        });
        assert_eq!(expanded.variable_name(), None);
    }

    #[test]
    fn test_arith_display() {
        let expr = ArithExpr::binary(
            BinaryOp::Add,
            ArithExpr::number(2),
            ArithExpr::binary(BinaryOp::Mul, ArithExpr::number(3), ArithExpr::name("x")),
        );
        assert_eq!(expr.to_string(), "2 + 3 * x");
        let post = ArithExpr::unary(UnaryOp::Inc, true, ArithExpr::name("i"));
        assert_eq!(post.to_string(), "i++");
    }

    #[test]
    fn test_word_literal_text() {
        assert_eq!(Word::literal("abc").as_literal().as_deref(), Some("abc"));
        let mixed = Word {
            parts: vec![
                WordPart::Literal("a".into()),
                WordPart::Variable("b".into()),
            ],
        };
        assert_eq!(mixed.as_literal(), None);
        assert_eq!(mixed.to_string(), "a${b}");
    }
}
