//! Side effects hidden in the arguments of whitelisted utilities
//!
//! A few text utilities write files or start programs when given the right
//! options: `sort -o`, `sed -i`, the `w` and `e` commands of a sed script,
//! the output operand of `uniq`. The engine runs them as real processes, so
//! those targets are pulled out here and held to the same policy as a
//! redirection or a command name.

use std::path::Path;

/// Something an invocation would do besides reading its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Create or overwrite this path
    Write(String),
    /// Start this program
    Exec(String),
    /// Follow instructions that cannot be inspected up front (`sed -f FILE`)
    Opaque(String),
}

/// Effects of running `program` with `args`. Programs are matched by file
/// name, so `/usr/bin/sed` is read like `sed`.
pub(crate) fn effects(program: &str, args: &[String]) -> Vec<Effect> {
    let name = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    match name {
        "sed" => sed_effects(args),
        "sort" => sort_effects(args),
        "uniq" => uniq_effects(args),
        _ => Vec::new(),
    }
}

/// Option table for a getopt_long style command line.
struct Options {
    /// Short options that take a value (`-o FILE`, `-oFILE`)
    short_values: &'static str,
    /// Short options whose value can only be attached (`-i.bak`)
    short_optional: &'static str,
    /// Long options that take a value (`--output FILE`, `--output=FILE`)
    long_values: &'static [&'static str],
    /// Long options whose value can only be attached (`--in-place=.bak`)
    long_optional: &'static [&'static str],
}

/// A command line split into options and operands. Short options are
/// stored as `-x`, long ones under their full name as `--name`.
#[derive(Debug, Default)]
struct CommandLine<'a> {
    options: Vec<(String, Option<&'a str>)>,
    operands: Vec<&'a str>,
}

impl<'a> CommandLine<'a> {
    fn values(&self, names: &[&str]) -> Vec<&'a str> {
        self.options
            .iter()
            .filter(|(opt, _)| names.contains(&opt.as_str()))
            .filter_map(|(_, value)| *value)
            .collect()
    }

    fn has(&self, names: &[&str]) -> bool {
        self.options
            .iter()
            .any(|(opt, _)| names.contains(&opt.as_str()))
    }
}

/// GNU tools accept any unambiguous prefix of a long option; a prefix of a
/// listed name is taken to mean that name.
fn expand_long(given: &str, table: &[&'static str]) -> Option<&'static str> {
    if given.is_empty() {
        return None;
    }
    table
        .iter()
        .find(|name| **name == given)
        .or_else(|| table.iter().find(|name| name.starts_with(given)))
        .copied()
}

/// Split `args` the way getopt_long does, options and operands interleaved
/// until `--`.
fn split<'a>(args: &'a [String], spec: &Options) -> CommandLine<'a> {
    let mut line = CommandLine::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--" {
            line.operands.extend(iter.by_ref().map(String::as_str));
            break;
        }
        if let Some(long) = arg.strip_prefix("--") {
            let (given, attached) = match long.split_once('=') {
                Some((given, value)) => (given, Some(value)),
                None => (long, None),
            };
            if let Some(name) = expand_long(given, spec.long_values) {
                let value = attached.or_else(|| iter.next().map(String::as_str));
                line.options.push((format!("--{}", name), value));
            } else if let Some(name) = expand_long(given, spec.long_optional) {
                line.options.push((format!("--{}", name), attached));
            } else {
                line.options.push((format!("--{}", given), attached));
            }
            continue;
        }
        match arg.strip_prefix('-') {
            Some(cluster) if !cluster.is_empty() => {
                for (at, flag) in cluster.char_indices() {
                    let rest = &cluster[at + flag.len_utf8()..];
                    if spec.short_values.contains(flag) {
                        let value = if rest.is_empty() {
                            iter.next().map(String::as_str)
                        } else {
                            Some(rest)
                        };
                        line.options.push((format!("-{}", flag), value));
                        break;
                    }
                    if spec.short_optional.contains(flag) {
                        let value = (!rest.is_empty()).then_some(rest);
                        line.options.push((format!("-{}", flag), value));
                        break;
                    }
                    line.options.push((format!("-{}", flag), None));
                }
            }
            _ => line.operands.push(arg),
        }
    }

    line
}

fn sort_effects(args: &[String]) -> Vec<Effect> {
    const SORT: Options = Options {
        short_values: "koTSt",
        short_optional: "",
        long_values: &[
            "key",
            "output",
            "temporary-directory",
            "buffer-size",
            "field-separator",
            "compress-program",
            "batch-size",
            "files0-from",
            "random-source",
            "parallel",
            "sort",
        ],
        long_optional: &["check"],
    };
    let line = split(args, &SORT);

    let mut out = Vec::new();
    for path in line.values(&["-o", "--output"]) {
        out.push(Effect::Write(path.to_string()));
    }
    // Spill files land in the temporary directory
    for dir in line.values(&["-T", "--temporary-directory"]) {
        out.push(Effect::Write(dir.to_string()));
    }
    for program in line.values(&["--compress-program"]) {
        out.push(Effect::Exec(program.to_string()));
    }
    out
}

fn uniq_effects(args: &[String]) -> Vec<Effect> {
    const UNIQ: Options = Options {
        short_values: "fsw",
        short_optional: "",
        long_values: &["skip-fields", "skip-chars", "check-chars"],
        long_optional: &["all-repeated", "group"],
    };
    let line = split(args, &UNIQ);
    // uniq [INPUT [OUTPUT]]
    line.operands
        .get(1)
        .map(|path| vec![Effect::Write(path.to_string())])
        .unwrap_or_default()
}

fn sed_effects(args: &[String]) -> Vec<Effect> {
    const SED: Options = Options {
        short_values: "efl",
        short_optional: "i",
        long_values: &["expression", "file", "line-length"],
        long_optional: &["in-place"],
    };
    let line = split(args, &SED);

    let mut out = Vec::new();
    if line.has(&["-f", "--file"]) {
        out.push(Effect::Opaque("sed -f".to_string()));
    }

    let mut scripts = line.values(&["-e", "--expression"]);
    let mut files = line.operands.as_slice();
    if scripts.is_empty() && !line.has(&["-f", "--file"]) {
        if let Some((script, rest)) = files.split_first() {
            scripts.push(*script);
            files = rest;
        }
    }
    for script in scripts {
        scan_sed_script(script, &mut out);
    }

    if line.has(&["-i", "--in-place"]) {
        out.extend(files.iter().map(|f| Effect::Write(f.to_string())));
    }
    out
}

/// Walk a sed script far enough to find the commands that write (`w`, `W`,
/// the `w` flag of `s`) or execute (`e`, the `e` flag of `s`).
fn scan_sed_script(script: &str, out: &mut Vec<Effect>) {
    let chars: Vec<char> = script.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | ';' | '{' | '}' | '!' => {
                i += 1;
                continue;
            }
            '#' => {
                i = line_end(&chars, i);
                continue;
            }
            _ => {}
        }

        i = skip_address(&chars, i);
        while matches!(chars.get(i), Some(' ' | '\t' | '!')) {
            i += 1;
        }
        let Some(&command) = chars.get(i) else {
            break;
        };
        i += 1;

        match command {
            's' => {
                let Some(&delim) = chars.get(i) else {
                    break;
                };
                i = skip_delimited(&chars, i + 1, delim);
                i = skip_delimited(&chars, i, delim);
                while let Some(&flag) = chars.get(i) {
                    match flag {
                        ';' | '\n' | '}' => break,
                        'e' => out.push(Effect::Exec("sh".to_string())),
                        'w' => {
                            let end = line_end(&chars, i);
                            out.push(Effect::Write(argument(&chars[i + 1..end])));
                            i = end;
                            break;
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            'y' => {
                let Some(&delim) = chars.get(i) else {
                    break;
                };
                i = skip_delimited(&chars, i + 1, delim);
                i = skip_delimited(&chars, i, delim);
            }
            'w' | 'W' => {
                let end = line_end(&chars, i);
                out.push(Effect::Write(argument(&chars[i..end])));
                i = end;
            }
            'e' => {
                out.push(Effect::Exec("sh".to_string()));
                i = line_end(&chars, i);
            }
            // Text and file names run to the end of the line, `;` included
            'a' | 'i' | 'c' | 'r' | 'R' => i = line_end(&chars, i),
            // Labels stop at `;` as well
            ':' | 'b' | 't' | 'T' => {
                while !matches!(chars.get(i), None | Some(';' | '\n')) {
                    i += 1;
                }
            }
            _ => {}
        }
    }
}

/// Skip `N`, `$`, `/re/`, `\cREc`, ranges and steps in front of a command.
fn skip_address(chars: &[char], mut i: usize) -> usize {
    loop {
        match chars.get(i) {
            Some(c) if c.is_ascii_digit() => i += 1,
            Some('$' | ',' | '~' | '+') => i += 1,
            Some('/') => i = skip_delimited(chars, i + 1, '/'),
            Some('\\') => match chars.get(i + 1) {
                Some(&delim) => i = skip_delimited(chars, i + 2, delim),
                None => return i + 1,
            },
            // Regex address modifiers
            Some('I' | 'M') if i > 0 && matches!(chars[i - 1], '/' | 'I' | 'M') => i += 1,
            _ => return i,
        }
    }
}

/// Index just past the next unescaped `delim`.
fn skip_delimited(chars: &[char], mut i: usize, delim: char) -> usize {
    while let Some(&c) = chars.get(i) {
        if c == '\\' {
            i += 2;
            continue;
        }
        i += 1;
        if c == delim {
            break;
        }
    }
    i.min(chars.len())
}

fn line_end(chars: &[char], from: usize) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .position(|&c| c == '\n')
        .map_or(chars.len(), |p| from + p)
}

fn argument(chars: &[char]) -> String {
    chars.iter().collect::<String>().trim().to_string()
}
