//! Validation and normalization of generated artifacts.
//!
//! Turns a raw [`Artifact`] into the exact contents of its flow file:
//! import preamble, the source with `@flow` applied once, and a run guard
//! so the file works on its own. `from __future__` imports stay first.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tera::{Context, Tera};

use crate::artifact::{function_identifier_for, is_valid_slug, slug_for, Artifact};
use crate::error::{DeployError, DeployResult};
use crate::python::{normalize_newlines, parse_callable, CallableDef, FlowDecorator};

const FLOW_FILE_TEMPLATE: &str = r#"{% if future_imports %}{{ future_imports }}
{% endif %}{% if preamble %}{{ preamble }}


{% endif %}{{ source }}


if __name__ == "__main__":
{% if is_async %}    import asyncio

    asyncio.run({{ function }}())
{% else %}    {{ function }}()
{% endif %}"#;

const FLOW_IMPORT: &str = "from prefect import flow";
const PREFECT_IMPORT: &str = "import prefect";
const FLOW_DECORATOR: &str = "@flow";

fn main_guard_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^if\s+__name__\s*==\s*["']__main__["']\s*:"#).expect("valid regex")
    })
}

/// A deployment-ready artifact and the file contents to write for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedArtifact {
    /// Artifact with a reconciled identifier and decorated source.
    pub artifact: Artifact,
    /// Complete flow file contents.
    pub contents: String,
    /// Hex SHA-256 of `contents`.
    pub checksum: String,
    pub is_async: bool,
    /// Name Prefect registers the flow under.
    pub flow_name: String,
}

/// Hex SHA-256 of flow file contents.
pub fn content_checksum(contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    hex::encode(hasher.finalize())
}

/// Removes top-level `if __name__ == "__main__":` blocks.
///
/// A block ends at the next non-blank, non-comment line at column 0; that
/// line and everything after it is kept.
pub fn strip_main_guard(source: &str) -> String {
    let mut kept = String::with_capacity(source.len());
    let mut in_guard = false;

    for line in source.split_inclusive('\n') {
        if main_guard_re().is_match(line) {
            in_guard = true;
            continue;
        }
        if in_guard {
            let trimmed = line.trim();
            let top_level = !line.starts_with([' ', '\t']) && !trimmed.is_empty();
            if !top_level || trimmed.starts_with('#') {
                continue;
            }
            in_guard = false;
        }
        kept.push_str(line);
    }

    if kept.len() != source.len() {
        tracing::debug!("Removed existing run guard");
    }
    kept
}

/// Splits leading `from __future__` imports off the rest of the source.
fn split_future_imports(source: &str) -> (&str, &str) {
    let mut end = 0usize;
    let mut offset = 0usize;
    let mut open_paren = false;
    let mut backslash = false;

    for line in source.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();
        if open_paren || backslash {
            open_paren = open_paren && !trimmed.contains(')');
            backslash = trimmed.ends_with('\\');
            end = offset;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with("from __future__ import") {
            open_paren = trimmed.contains('(') && !trimmed.contains(')');
            backslash = trimmed.ends_with('\\');
            end = offset;
            continue;
        }
        break;
    }

    (
        source[..end].trim_end(),
        source[end..].trim_start_matches('\n'),
    )
}

/// Inserts `@flow` above the definition unless a flow decorator is present.
fn decorate(source: &str, callable: &CallableDef) -> String {
    if callable.flow_decorator().is_some() {
        return source.to_string();
    }

    let insert_at = callable.start_line() - 1;
    let mut lines: Vec<&str> = source.lines().collect();
    lines.insert(insert_at.min(lines.len()), FLOW_DECORATOR);
    lines.join("\n")
}

/// Import needed for the decorator in use, if the source lacks it.
fn preamble_for(callable: &CallableDef) -> Option<&'static str> {
    match callable.flow_decorator() {
        Some(FlowDecorator::Qualified) if !callable.imports_prefect() => Some(PREFECT_IMPORT),
        Some(FlowDecorator::Qualified) => None,
        Some(FlowDecorator::Bare) | None if !callable.imports_flow() => Some(FLOW_IMPORT),
        _ => None,
    }
}

fn render(preamble: Option<&str>, source: &str, function: &str, is_async: bool) -> DeployResult<String> {
    let (future_imports, body) = split_future_imports(source);
    let mut context = Context::new();
    context.insert("future_imports", future_imports);
    context.insert("preamble", &preamble.unwrap_or_default());
    context.insert("source", body);
    context.insert("function", function);
    context.insert("is_async", &is_async);

    let rendered = Tera::one_off(FLOW_FILE_TEMPLATE, &context, false)
        .map_err(|e| DeployError::InvalidGeneration(format!("failed to render flow file: {}", e)))?;

    Ok(format!("{}\n", rendered.trim_end()))
}

/// Validates `artifact` and produces its flow file.
///
/// Fails with `NamingMismatch` when the declared function differs from the
/// identifier derived from the slug, and with `MalformedSource` when the
/// source is not exactly one well-formed top-level function.
pub fn normalize(mut artifact: Artifact) -> DeployResult<NormalizedArtifact> {
    if !is_valid_slug(&artifact.name) {
        return Err(DeployError::InvalidGeneration(format!(
            "name '{}' is not a lowercase, dash-separated slug",
            artifact.name
        )));
    }
    if let Some(ref schedule) = artifact.schedule {
        schedule
            .validate()
            .map_err(|e| DeployError::InvalidGeneration(format!("schedule: {}", e)))?;
    }

    let expected = function_identifier_for(&artifact.name);
    if artifact.function_identifier != expected {
        tracing::debug!(
            name = %artifact.name,
            given = %artifact.function_identifier,
            derived = %expected,
            "Reconciling function identifier with name"
        );
        artifact.function_identifier = expected.clone();
    }

    let source = strip_main_guard(&normalize_newlines(&artifact.source_text));
    let source = source.trim_matches('\n').trim_end();
    let callable = parse_callable(source)?;

    if callable.name != expected {
        return Err(DeployError::NamingMismatch {
            expected,
            found: callable.name,
        });
    }

    let decorated = decorate(source, &callable);
    let contents = render(
        preamble_for(&callable),
        &decorated,
        &artifact.function_identifier,
        callable.is_async,
    )?;

    let flow_name = callable
        .flow_name
        .unwrap_or_else(|| slug_for(&artifact.function_identifier));
    artifact.source_text = decorated;
    let checksum = content_checksum(&contents);

    Ok(NormalizedArtifact {
        artifact,
        contents,
        checksum,
        is_async: callable.is_async,
        flow_name,
    })
}

/// Statically checks an existing flow file for the deployment `name`.
///
/// The run guard is ignored. The file must hold one top-level function
/// named after `name`.
pub fn check_flow_source(name: &str, contents: &str) -> DeployResult<CallableDef> {
    let expected = function_identifier_for(name);
    let source = strip_main_guard(&normalize_newlines(contents));
    let callable = parse_callable(source.trim_end())?;

    if callable.name != expected {
        return Err(DeployError::NamingMismatch {
            expected,
            found: callable.name,
        });
    }
    Ok(callable)
}
