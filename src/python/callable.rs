//! Extraction of the single top-level function from generated source.

use std::sync::OnceLock;

use regex::Regex;
use rustpython_parser::{ast, Parse};

use super::lexer::{check_indentation, logical_lines, LogicalLine};
use crate::error::SourceError;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex")
    })
}

fn flow_decorator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@\s*(prefect\s*\.\s*)?flow\s*(\(.*\))?$").expect("valid regex")
    })
}

fn flow_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^from\s+prefect\s+import\s+(.*[\s(,])?flow(\s*[,)].*)?\s*$")
            .expect("valid regex")
    })
}

fn flow_name_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bname\s*=[^=]").expect("valid regex"))
}

fn flow_name_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bname\s*=\s*(?:"([^"\\]*)"|'([^'\\]*)')"#).expect("valid regex")
    })
}

/// Characters Prefect does not allow in flow names.
const FORBIDDEN_FLOW_NAME_CHARS: &[char] = &['/', '%', '&', '>', '<'];

fn prefect_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^import\s+(.*,\s*)?prefect(\s*,.*)?\s*$").expect("valid regex"))
}

/// How an existing flow decorator refers to `flow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecorator {
    /// `@flow` or `@flow(...)`
    Bare,
    /// `@prefect.flow` or `@prefect.flow(...)`
    Qualified,
}

/// A decorator line attached to the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decorator {
    pub line: usize,
    pub text: String,
}

/// Structure of a source text holding exactly one top-level function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableDef {
    /// Declared function name.
    pub name: String,
    pub is_async: bool,
    /// Raw parameter list between the parentheses.
    pub parameters: String,
    pub decorators: Vec<Decorator>,
    /// Top-level import statements, in order.
    pub imports: Vec<String>,
    /// 1-based line of the `def` keyword.
    pub def_line: usize,
    /// Flow name set with `@flow(name="...")`.
    pub flow_name: Option<String>,
}

impl CallableDef {
    /// 1-based line where the definition starts, including decorators.
    pub fn start_line(&self) -> usize {
        self.decorators
            .first()
            .map_or(self.def_line, |decorator| decorator.line)
    }

    /// The flow decorator already applied to the function, if any.
    pub fn flow_decorator(&self) -> Option<FlowDecorator> {
        self.decorators.iter().find_map(|decorator| {
            flow_decorator_re().captures(&decorator.text).map(|caps| {
                if caps.get(1).is_some() {
                    FlowDecorator::Qualified
                } else {
                    FlowDecorator::Bare
                }
            })
        })
    }

    /// True when the source already imports `flow` from `prefect`.
    pub fn imports_flow(&self) -> bool {
        self.imports.iter().any(|stmt| flow_import_re().is_match(stmt))
    }

    /// True when the source already has `import prefect`.
    pub fn imports_prefect(&self) -> bool {
        self.imports.iter().any(|stmt| prefect_import_re().is_match(stmt))
    }
}

struct DefHeader {
    is_async: bool,
    name: String,
    parameters: String,
}

/// Index of the ')' closing the '(' just before `s`, skipping string literals.
fn find_closing_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match quote {
            Some(q) => match c {
                '\\' => escape_next = true,
                c if c == q => quote = None,
                _ => {}
            },
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return if c == ')' { Some(i) } else { None };
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Index of the first ':' outside brackets and strings.
fn find_header_colon(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match quote {
            Some(q) => match c {
                '\\' => escape_next = true,
                c if c == q => quote = None,
                _ => {}
            },
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn parse_def_header(logical: &LogicalLine) -> Result<DefHeader, SourceError> {
    let invalid = |reason: &str| SourceError::InvalidDefinition {
        line: logical.line,
        reason: reason.to_string(),
    };

    let caps = def_re()
        .captures(&logical.text)
        .ok_or_else(|| invalid("expected a function name followed by '('"))?;
    let name = caps[2].to_string();
    if KEYWORDS.contains(&name.as_str()) {
        return Err(invalid(&format!("'{}' is a reserved keyword", name)));
    }

    let after_open = caps.get(0).map_or(0, |m| m.end());
    let rest = &logical.text[after_open..];
    let close = find_closing_paren(rest).ok_or_else(|| invalid("unbalanced parameter list"))?;
    let parameters = rest[..close].trim().to_string();

    let tail = rest[close + 1..].trim_start();
    let colon = find_header_colon(tail).ok_or_else(|| invalid("expected ':'"))?;
    let between = tail[..colon].trim();
    if !between.is_empty() {
        let annotation = between
            .strip_prefix("->")
            .ok_or_else(|| invalid("unexpected text before ':'"))?;
        if annotation.trim().is_empty() {
            return Err(invalid("empty return annotation"));
        }
    }

    Ok(DefHeader {
        is_async: caps.get(1).is_some(),
        name,
        parameters,
    })
}

fn is_import(text: &str) -> bool {
    text.starts_with("import ") || text.starts_with("from ")
}

fn is_def(text: &str) -> bool {
    text.starts_with("def ")
        || text.starts_with("def\t")
        || (text.starts_with("async") && text["async".len()..].trim_start().starts_with("def "))
}

/// Reads `name="..."` from the flow decorator, if one is given.
fn declared_flow_name(decorators: &[Decorator]) -> Result<Option<String>, SourceError> {
    let decorator = match decorators
        .iter()
        .find(|decorator| flow_decorator_re().is_match(&decorator.text))
    {
        Some(decorator) if flow_name_arg_re().is_match(&decorator.text) => decorator,
        _ => return Ok(None),
    };

    let invalid = |reason: &str| SourceError::InvalidDefinition {
        line: decorator.line,
        reason: reason.to_string(),
    };
    let caps = flow_name_literal_re()
        .captures(&decorator.text)
        .ok_or_else(|| invalid("flow name must be a plain string literal"))?;
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str())
        .trim();

    if name.is_empty() {
        return Err(invalid("flow name is empty"));
    }
    if name.contains(FORBIDDEN_FLOW_NAME_CHARS) {
        return Err(invalid(&format!("flow name '{}' contains a reserved character", name)));
    }
    Ok(Some(name.to_string()))
}

/// Parses `source` with the full Python grammar. Nothing is evaluated.
fn check_syntax(source: &str) -> Result<(), SourceError> {
    ast::Suite::parse(source, "<flow>").map(|_| ()).map_err(|err| {
        let offset = (u32::from(err.offset) as usize).min(source.len());
        SourceError::Syntax {
            line: source.as_bytes()[..offset]
                .iter()
                .filter(|byte| **byte == b'\n')
                .count()
                + 1,
            message: err.error.to_string(),
        }
    })
}

fn statement_preview(text: &str) -> String {
    let mut preview: String = text.chars().take(40).collect();
    if text.chars().count() > 40 {
        preview.push_str("...");
    }
    preview
}

/// Parses `source` as a single top-level function definition.
///
/// Top level may only hold imports, decorators, and one `def`/`async def`.
/// The structure is checked first so errors name the offending line, then
/// the whole text goes through the Python grammar. Nothing is executed.
pub fn parse_callable(source: &str) -> Result<CallableDef, SourceError> {
    let lines = logical_lines(source)?;

    let mut imports = Vec::new();
    let mut pending: Vec<Decorator> = Vec::new();
    let mut defs: Vec<(DefHeader, Vec<Decorator>, usize)> = Vec::new();

    for logical in lines.iter().filter(|l| l.indent == 0) {
        let text = logical.text.as_str();

        if text.starts_with('@') {
            pending.push(Decorator {
                line: logical.line,
                text: text.to_string(),
            });
            continue;
        }

        if let Some(first) = pending.first() {
            if !is_def(text) {
                return Err(SourceError::DanglingDecorator { line: first.line });
            }
        }

        if is_import(text) {
            imports.push(text.to_string());
        } else if is_def(text) {
            let header = parse_def_header(logical)?;
            defs.push((header, std::mem::take(&mut pending), logical.line));
        } else {
            return Err(SourceError::UnexpectedStatement {
                line: logical.line,
                statement: statement_preview(text),
            });
        }
    }

    if let Some(first) = pending.first() {
        return Err(SourceError::DanglingDecorator { line: first.line });
    }

    check_indentation(&lines)?;
    check_syntax(source)?;

    match defs.len() {
        0 => Err(SourceError::NoDefinition),
        1 => {
            let (header, decorators, def_line) = defs.remove(0);
            let flow_name = declared_flow_name(&decorators)?;
            Ok(CallableDef {
                name: header.name,
                is_async: header.is_async,
                parameters: header.parameters,
                decorators,
                imports,
                def_line,
                flow_name,
            })
        }
        count => Err(SourceError::MultipleDefinitions {
            count,
            names: defs
                .iter()
                .map(|(header, _, _)| header.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_PRICE: &str = "def get_eth_price():\n    import httpx\n    response = httpx.get('https://api.coinbase.com/v2/prices/ETH-USD/spot')\n    price = response.json()['data']['amount']\n    print(f'ETH price in USD: {price}')\n";

    #[test]
    fn test_parses_plain_function() {
        let def = parse_callable(ETH_PRICE).expect("should parse");
        assert_eq!(def.name, "get_eth_price");
        assert!(!def.is_async);
        assert_eq!(def.parameters, "");
        assert_eq!(def.def_line, 1);
        assert_eq!(def.start_line(), 1);
        assert!(def.flow_decorator().is_none());
    }

    #[test]
    fn test_parses_async_function_with_annotations() {
        let src = "import asyncio\n\nasync def heaviest_pokemon(n: int = 5, limit: int = 100) -> list[dict]:\n    await asyncio.sleep(0)\n    return []\n";
        let def = parse_callable(src).expect("should parse");
        assert_eq!(def.name, "heaviest_pokemon");
        assert!(def.is_async);
        assert_eq!(def.parameters, "n: int = 5, limit: int = 100");
        assert_eq!(def.imports, vec!["import asyncio".to_string()]);
        assert_eq!(def.def_line, 3);
    }

    #[test]
    fn test_one_line_body() {
        let def = parse_callable("def answer(): return 42\n").expect("should parse");
        assert_eq!(def.name, "answer");
    }

    #[test]
    fn test_detects_flow_decorators() {
        let src = "from prefect import flow, task\n\n@flow(log_prints=True)\ndef f():\n    pass\n";
        let def = parse_callable(src).expect("should parse");
        assert_eq!(def.flow_decorator(), Some(FlowDecorator::Bare));
        assert_eq!(def.start_line(), 3);
        assert!(def.imports_flow());

        let src = "import prefect\n@prefect.flow\ndef f():\n    pass\n";
        let def = parse_callable(src).expect("should parse");
        assert_eq!(def.flow_decorator(), Some(FlowDecorator::Qualified));
        assert!(def.imports_prefect());
        assert!(!def.imports_flow());

        let src = "from prefect import flow_run\n@flowery\ndef f():\n    pass\n";
        let def = parse_callable(src).expect("should parse");
        assert_eq!(def.flow_decorator(), None);
        assert!(!def.imports_flow());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(
            parse_callable("def ("),
            Err(SourceError::UnclosedBracket { .. })
        ));
        assert!(matches!(
            parse_callable("def f()\n    pass\n"),
            Err(SourceError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            parse_callable("def class():\n    pass\n"),
            Err(SourceError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            parse_callable("def f() junk:\n    pass\n"),
            Err(SourceError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_rejects_body_syntax_errors() {
        let err = parse_callable("def eth_price():\n    x = = 1\n    print(x +)\n").unwrap_err();
        assert!(matches!(err, SourceError::Syntax { line: 2, .. }), "got {:?}", err);

        let err = parse_callable("def eth_price():\n    print(1)\n    return return\n").unwrap_err();
        assert!(matches!(err, SourceError::Syntax { line: 3, .. }), "got {:?}", err);

        let err = parse_callable("def eth_price():\n    for x in:\n        pass\n").unwrap_err();
        assert!(matches!(err, SourceError::Syntax { .. }), "got {:?}", err);
    }

    #[test]
    fn test_reads_declared_flow_name() {
        let def = parse_callable("@flow(name=\"ETH price\", log_prints=True)\ndef eth_price():\n    pass\n")
            .expect("should parse");
        assert_eq!(def.flow_name.as_deref(), Some("ETH price"));

        let def = parse_callable("@prefect.flow(retries=2, name='eth-spot')\ndef eth_price():\n    pass\n")
            .expect("should parse");
        assert_eq!(def.flow_name.as_deref(), Some("eth-spot"));

        let def = parse_callable("@flow(flow_run_name=\"run-{x}\")\ndef eth_price(x):\n    pass\n")
            .expect("should parse");
        assert_eq!(def.flow_name, None);

        assert!(matches!(
            parse_callable("@flow(name=NAME)\ndef eth_price():\n    pass\n"),
            Err(SourceError::InvalidDefinition { line: 1, .. })
        ));
        assert!(matches!(
            parse_callable("@flow(name=\"eth/price\")\ndef eth_price():\n    pass\n"),
            Err(SourceError::InvalidDefinition { line: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_shape() {
        assert_eq!(parse_callable("# nothing here\n"), Err(SourceError::NoDefinition));
        assert_eq!(parse_callable(""), Err(SourceError::NoDefinition));

        let two = "def a():\n    pass\n\ndef b():\n    pass\n";
        assert_eq!(
            parse_callable(two),
            Err(SourceError::MultipleDefinitions {
                count: 2,
                names: "a, b".to_string()
            })
        );

        let guard = "def a():\n    pass\n\nif __name__ == '__main__':\n    a()\n";
        assert!(matches!(
            parse_callable(guard),
            Err(SourceError::UnexpectedStatement { line: 4, .. })
        ));

        let dangling = "@flow\nimport os\ndef a():\n    pass\n";
        assert_eq!(
            parse_callable(dangling),
            Err(SourceError::DanglingDecorator { line: 1 })
        );

        let class = "class A:\n    pass\n";
        assert!(matches!(
            parse_callable(class),
            Err(SourceError::UnexpectedStatement { line: 1, .. })
        ));
    }
}
