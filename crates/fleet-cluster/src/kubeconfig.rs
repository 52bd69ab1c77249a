//! Credential bundle preparation.
//!
//! Bundles arrive escaped for transport inside a JSON string. They are
//! unescaped, parsed as a multi-document YAML stream, and the system
//! namespace is taken from the first document exposing
//! `contexts[0].context.namespace`.

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{ControlError, ControlResult};

/// A credential bundle ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedConfig {
    pub config: String,
    pub system_namespace: String,
}

/// Unescape and inspect a raw credential bundle.
pub fn prepare(raw: &str) -> ControlResult<PreparedConfig> {
    let config = unescape(raw);
    let system_namespace = system_namespace(&config)?.ok_or_else(|| {
        ControlError::Validation(
            "Unable to determine kubernetes namespace from kubeconfig".to_string(),
        )
    })?;
    Ok(PreparedConfig {
        config,
        system_namespace,
    })
}

/// Reverse `\n`, `\t`, `\r`, `\"` and `\\` escapes. Any other backslash
/// sequence is kept as written.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// The namespace of the first document's first context, if any document has one.
///
/// The whole stream must parse; a syntax error in any document is a
/// validation failure.
pub fn system_namespace(config: &str) -> ControlResult<Option<String>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(config) {
        let value = Value::deserialize(document).map_err(|_| {
            ControlError::Validation("Unable to parse kubeconfig as YAML".to_string())
        })?;
        documents.push(value);
    }
    Ok(documents.iter().find_map(context_namespace))
}

fn context_namespace(document: &Value) -> Option<String> {
    let namespace = document
        .get("contexts")?
        .as_sequence()?
        .first()?
        .get("context")?
        .get("namespace")?;
    let rendered = match namespace {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!rendered.is_empty()).then_some(rendered)
}
