//! Logical-line scanner for Python source.
//!
//! Splits source into logical lines the way the Python tokenizer does:
//! physical lines joined inside brackets or after a trailing backslash,
//! comments dropped, string literals kept verbatim. Bracket balance and
//! string termination are checked along the way, and indentation is checked
//! afterwards by [`check_indentation`].

use crate::error::SourceError;

/// Tab stops used when measuring indentation.
const TAB_SIZE: usize = 8;

/// One logical line of Python code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based physical line the logical line starts on.
    pub line: usize,
    /// Indentation width of the first physical line.
    pub indent: usize,
    /// Code with comments removed and line joins collapsed to spaces.
    pub text: String,
    /// Whether the line ends with ':' and so introduces an indented block.
    pub opens_block: bool,
}

/// Converts CRLF and lone CR line endings to LF.
pub fn normalize_newlines(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn finish(lines: &mut Vec<LogicalLine>, mut current: LogicalLine) {
    let trimmed = current.text.trim_end();
    current.opens_block = trimmed.ends_with(':');
    current.text = trimmed.to_string();
    lines.push(current);
}

/// Scans `source` into logical lines.
pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, SourceError> {
    let normalized = normalize_newlines(source);
    let chars: Vec<char> = normalized.chars().collect();
    let len = chars.len();

    let mut lines = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut current: Option<LogicalLine> = None;
    let mut at_line_start = true;
    let mut line = 1usize;
    let mut i = 0usize;

    while i < len {
        if at_line_start && current.is_none() {
            let mut indent = 0usize;
            while i < len && matches!(chars[i], ' ' | '\t' | '\x0c') {
                indent = match chars[i] {
                    '\t' => (indent / TAB_SIZE + 1) * TAB_SIZE,
                    '\x0c' => 0,
                    _ => indent + 1,
                };
                i += 1;
            }
            at_line_start = false;
            if i >= len {
                break;
            }
            if chars[i] != '\n' && chars[i] != '#' {
                current = Some(LogicalLine {
                    line,
                    indent,
                    text: String::new(),
                    opens_block: false,
                });
            }
        }

        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
                if brackets.is_empty() {
                    if let Some(done) = current.take() {
                        finish(&mut lines, done);
                    }
                    at_line_start = true;
                } else if let Some(ref mut cur) = current {
                    cur.text.push(' ');
                }
            }
            '#' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let start_line = line;
                let triple = i + 2 < len && chars[i + 1] == c && chars[i + 2] == c;
                let delimiter_len = if triple { 3 } else { 1 };
                let mut literal: String = chars[i..i + delimiter_len].iter().collect();
                i += delimiter_len;

                let mut closed = false;
                while i < len {
                    let ch = chars[i];
                    if ch == '\\' && i + 1 < len {
                        if chars[i + 1] == '\n' {
                            line += 1;
                        }
                        literal.push(ch);
                        literal.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        if !triple {
                            return Err(SourceError::UnterminatedString { line: start_line });
                        }
                        line += 1;
                    }
                    if ch == c
                        && (!triple || (i + 2 < len && chars[i + 1] == c && chars[i + 2] == c))
                    {
                        literal.extend(std::iter::repeat(c).take(delimiter_len));
                        i += delimiter_len;
                        closed = true;
                        break;
                    }
                    literal.push(ch);
                    i += 1;
                }

                if !closed {
                    return Err(SourceError::UnterminatedString { line: start_line });
                }
                if let Some(ref mut cur) = current {
                    cur.text.push_str(&literal);
                }
            }
            '\\' => {
                if i + 1 < len && chars[i + 1] == '\n' {
                    line += 1;
                    i += 2;
                    if let Some(ref mut cur) = current {
                        cur.text.push(' ');
                    }
                } else {
                    return Err(SourceError::BadContinuation { line });
                }
            }
            '(' | '[' | '{' => {
                brackets.push((c, line));
                if let Some(ref mut cur) = current {
                    cur.text.push(c);
                }
                i += 1;
            }
            ')' | ']' | '}' => {
                match brackets.pop() {
                    Some((open, _)) if closing_for(open) == c => {}
                    _ => return Err(SourceError::UnmatchedBracket { line, close: c }),
                }
                if let Some(ref mut cur) = current {
                    cur.text.push(c);
                }
                i += 1;
            }
            _ => {
                if let Some(ref mut cur) = current {
                    cur.text.push(c);
                }
                i += 1;
            }
        }
    }

    if let Some(&(open, open_line)) = brackets.last() {
        return Err(SourceError::UnclosedBracket {
            line: open_line,
            open,
        });
    }
    if let Some(done) = current.take() {
        finish(&mut lines, done);
    }

    Ok(lines)
}

/// Applies Python's block indentation rules to scanned lines.
pub fn check_indentation(lines: &[LogicalLine]) -> Result<(), SourceError> {
    let mut stack = vec![0usize];
    let mut expect_indent = false;

    for logical in lines {
        let top = stack.last().copied().unwrap_or(0);

        if expect_indent {
            if logical.indent <= top {
                return Err(SourceError::ExpectedIndent { line: logical.line });
            }
            stack.push(logical.indent);
        } else if logical.indent > top {
            return Err(SourceError::UnexpectedIndent { line: logical.line });
        } else if logical.indent < top {
            while stack.last().is_some_and(|&level| level > logical.indent) {
                stack.pop();
            }
            if stack.last().copied().unwrap_or(0) != logical.indent {
                return Err(SourceError::UnindentMismatch { line: logical.line });
            }
        }

        expect_indent = logical.opens_block;
    }

    if expect_indent {
        let line = lines.last().map_or(1, |l| l.line + 1);
        return Err(SourceError::ExpectedIndent { line });
    }
    Ok(())
}
