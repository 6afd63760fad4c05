//! echo: the one output builtin that formats its own arguments

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// `echo [-neE] [text...]`
pub struct Echo;

#[async_trait]
impl Builtin for Echo {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut newline = true;
        let mut escapes = false;

        // Leading option words; anything else starts the text
        let text_start = ctx
            .args
            .iter()
            .position(|arg| match arg.as_str() {
                "-n" => {
                    newline = false;
                    false
                }
                "-e" => {
                    escapes = true;
                    false
                }
                "-E" => {
                    escapes = false;
                    false
                }
                _ => true,
            })
            .unwrap_or(ctx.args.len());

        let mut output = String::new();
        for (i, arg) in ctx.args[text_start..].iter().enumerate() {
            if i > 0 {
                output.push(' ');
            }
            if !escapes {
                output.push_str(arg);
                continue;
            }
            let (text, stop) = interpret_escape_sequences(arg);
            output.push_str(&text);
            if stop {
                return Ok(ExecResult::ok(output));
            }
        }

        if newline {
            output.push('\n');
        }
        Ok(ExecResult::ok(output))
    }
}

/// Expand `echo -e` escapes. The flag is set when `\c` asked to stop all
/// further output.
fn interpret_escape_sequences(s: &str) -> (String, bool) {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            result.push('\\');
            break;
        };
        match next {
            'c' => return (result, true),
            '0' => result.extend(char::from_u32(read_digits(&mut chars, 8, 3))),
            'x' => result.extend(char::from_u32(read_digits(&mut chars, 16, 2))),
            other => match control_char(other) {
                Some(c) => result.push(c),
                None => {
                    result.push('\\');
                    result.push(other);
                }
            },
        }
    }

    (result, false)
}

fn control_char(letter: char) -> Option<char> {
    Some(match letter {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '\\' => '\\',
        'a' => '\x07',
        'b' => '\x08',
        'f' => '\x0c',
        'v' => '\x0b',
        _ => return None,
    })
}

/// Consume up to `max` digits in `radix`, as in `\0101` or `\x41`.
fn read_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, radix: u32, max: usize) -> u32 {
    let mut value = 0;
    for _ in 0..max {
        match chars.peek().and_then(|d| d.to_digit(radix)) {
            Some(digit) => {
                value = value * radix + digit;
                chars.next();
            }
            None => break,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::Harness;
    use crate::policy::Policy;

    #[test]
    fn test_escape_sequences() {
        assert_eq!(interpret_escape_sequences("hello\\nworld").0, "hello\nworld");
        assert_eq!(interpret_escape_sequences("tab\\there").0, "tab\there");
        assert_eq!(interpret_escape_sequences("\\\\backslash").0, "\\backslash");
        assert_eq!(interpret_escape_sequences("\\x41\\0102").0, "AB");
        assert_eq!(interpret_escape_sequences("a\\cb"), ("a".to_string(), true));
    }

    #[tokio::test]
    async fn test_echo_options() {
        let mut h = Harness::new(Policy::new());
        assert_eq!(h.run(&Echo, &["a", "b"]).await.unwrap().stdout, "a b\n");
        assert_eq!(h.run(&Echo, &["-n", "a"]).await.unwrap().stdout, "a");
        assert_eq!(h.run(&Echo, &["-e", "x\\ty"]).await.unwrap().stdout, "x\ty\n");
        assert_eq!(h.run(&Echo, &["-e", "x\\cy", "z"]).await.unwrap().stdout, "x");
        assert_eq!(h.run(&Echo, &[]).await.unwrap().stdout, "\n");
    }
}
