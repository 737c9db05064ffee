// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction errors into miette diagnostics.
//!
//! An unknown key is matched against the keys of its own table first. When
//! nothing there is close, the other tables are searched, so `batch_size`
//! written under `[sender]` points at `[dispatch]`. Keys that came from
//! `DRIPLINE_*` variables are reported by variable name.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a candidate needs before it is offered as a fix.
const SIMILARITY_FLOOR: f64 = 0.8;

/// Keys accepted in each table of `dripline.toml`.
pub const SECTION_KEYS: &[(&str, &[&str])] = &[
    ("service", &["name", "log_level"]),
    ("storage", &["database_path", "wal_mode", "busy_timeout_ms"]),
    (
        "dispatch",
        &[
            "poll_interval_secs",
            "batch_size",
            "claim_grace_secs",
            "claim_lookahead_secs",
            "processing_timeout_secs",
            "default_min_delay_secs",
            "default_max_delay_secs",
            "device_refresh_secs",
            "messages_per_hour",
        ],
    ),
    (
        "materializer",
        &["interval_secs", "sequence_batch_size", "campaign_utc_offset_minutes"],
    ),
    (
        "enrollment",
        &[
            "interval_secs",
            "default_step_delay_hours",
            "remove_trigger_on_complete",
            "single_active_sequence",
        ],
    ),
    ("sweeper", &["interval_secs"]),
    (
        "template",
        &["fallback_name", "greeting", "greeting_utc_offset_minutes", "randomize"],
    ),
    ("sender", &["endpoint", "timeout_secs", "api_key"]),
];

/// A configuration error with rich diagnostic information.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key that its table does not accept.
    #[error("unknown key `{key}` in {origin}")]
    #[diagnostic(
        code(dripline::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), other_section.as_deref(), key, valid_keys))
    )]
    UnknownKey {
        /// Table the key was found in.
        section: String,
        key: String,
        /// `[section]` for files, the variable name for the environment.
        origin: String,
        /// Closest key of the same table.
        suggestion: Option<String>,
        /// Another table that has this key, or one close to it.
        other_section: Option<String>,
        valid_keys: String,
        #[label("not recognized here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A top-level table that does not exist.
    #[error("unknown section `{section}` in {origin}")]
    #[diagnostic(
        code(dripline::config::unknown_section),
        help("{}", unknown_section_help(suggestion.as_deref()))
    )]
    UnknownSection {
        section: String,
        origin: String,
        suggestion: Option<String>,
        #[label("no such section")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type.
    #[error("invalid value for `{key}`: {detail}")]
    #[diagnostic(code(dripline::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path, e.g. `sweeper.interval_secs`.
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but is out of range or inconsistent.
    #[error("validation error: {message}")]
    #[diagnostic(code(dripline::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(dripline::config::other))]
    Other(String),
}

fn unknown_key_help(
    suggestion: Option<&str>,
    other_section: Option<&str>,
    key: &str,
    valid_keys: &str,
) -> String {
    match (suggestion, other_section) {
        (Some(s), _) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        (None, Some(section)) => {
            format!("`{key}` looks like a [{section}] key. Valid keys here: {valid_keys}")
        }
        (None, None) => format!("valid keys: {valid_keys}"),
    }
}

fn unknown_section_help(suggestion: Option<&str>) -> String {
    let sections = section_names().join("], [");
    match suggestion {
        Some(s) => format!("did you mean [{s}]? Sections: [{sections}]"),
        None => format!("sections: [{sections}]"),
    }
}

fn section_names() -> Vec<&'static str> {
    SECTION_KEYS.iter().map(|(name, _)| *name).collect()
}

/// Where a rejected value came from.
enum Origin<'a> {
    /// A TOML source, with the byte offset of the offending name.
    Source(&'a str, &'a str, usize),
    /// A `DRIPLINE_*` variable.
    Env(String),
    Unknown,
}

/// Convert a `figment::Error` into one diagnostic per contained error.
///
/// `toml_sources` pairs a file path (or `<inline>`) with its content and is
/// used to attach source spans.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| convert(&error, toml_sources))
        .collect()
}

fn convert(error: &figment::Error, toml_sources: &[(String, String)]) -> ConfigError {
    let path: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();

    match &error.kind {
        Kind::UnknownField(field, expected) => {
            let section = path
                .iter()
                .find(|p| section_names().contains(&p.as_str()))
                .cloned();
            match section {
                Some(section) => unknown_key(&section, field, expected, toml_sources),
                None => unknown_section(field, toml_sources),
            }
        }
        Kind::InvalidType(actual, expected) => {
            let (span, src) = match path.split_last() {
                Some((key, table)) => {
                    let section = table.first().map(String::as_str);
                    let origin = locate(toml_sources, |content| {
                        find_key_offset(content, section, key)
                    });
                    origin.span(key.len())
                }
                None => (None, None),
            };
            ConfigError::InvalidType {
                key: path.join("."),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.to_string(),
                span,
                src,
            }
        }
        _ => ConfigError::Other(error.to_string()),
    }
}

fn unknown_key(
    section: &str,
    field: &str,
    expected: &[&str],
    toml_sources: &[(String, String)],
) -> ConfigError {
    let suggestion = suggest_key(field, expected);
    let other_section = if suggestion.is_none() {
        suggest_section_for_key(field, section)
    } else {
        None
    };
    let var = env_var(section, field);
    let origin = match locate(toml_sources, |content| {
        find_key_offset(content, Some(section), field)
    }) {
        Origin::Unknown if std::env::var_os(&var).is_some() => Origin::Env(var),
        origin => origin,
    };
    let origin_label = match &origin {
        Origin::Env(var) => var.clone(),
        _ => format!("[{section}]"),
    };
    let (span, src) = origin.span(field.len());
    ConfigError::UnknownKey {
        section: section.to_string(),
        key: field.to_string(),
        origin: origin_label,
        suggestion,
        other_section,
        valid_keys: expected.join(", "),
        span,
        src,
    }
}

fn unknown_section(name: &str, toml_sources: &[(String, String)]) -> ConfigError {
    let suggestion = suggest_key(name, &section_names());
    let var = format!("DRIPLINE_{}", name.to_ascii_uppercase());
    let origin = match locate(toml_sources, |content| {
        find_header_offset(content, name)
    }) {
        Origin::Unknown if std::env::var_os(&var).is_some() => Origin::Env(var),
        origin => origin,
    };
    let origin_label = match &origin {
        Origin::Source(path, _, _) => path.to_string(),
        Origin::Env(var) => var.clone(),
        Origin::Unknown => "configuration".to_string(),
    };
    let (span, src) = origin.span(name.len());
    ConfigError::UnknownSection {
        section: name.to_string(),
        origin: origin_label,
        suggestion,
        span,
        src,
    }
}

/// First source in which `find` locates the offending name.
fn locate<'a>(
    toml_sources: &'a [(String, String)],
    find: impl Fn(&str) -> Option<usize>,
) -> Origin<'a> {
    toml_sources
        .iter()
        .find_map(|(path, content)| {
            find(content).map(|offset| Origin::Source(path.as_str(), content.as_str(), offset))
        })
        .unwrap_or(Origin::Unknown)
}

impl Origin<'_> {
    fn span(&self, len: usize) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
        match self {
            Origin::Source(path, content, offset) => (
                Some(SourceSpan::new((*offset).into(), len)),
                Some(NamedSource::new(*path, content.to_string())),
            ),
            _ => (None, None),
        }
    }
}

/// The variable that sets `section.key`.
pub fn env_var(section: &str, key: &str) -> String {
    format!(
        "DRIPLINE_{}_{}",
        section.to_ascii_uppercase(),
        key.to_ascii_uppercase()
    )
}

/// Byte offset of `key = ...` inside `[section]`, or before the first table
/// header when `section` is `None`. Keys of other tables are never matched.
pub fn find_key_offset(content: &str, section: Option<&str>, key: &str) -> Option<usize> {
    let mut offset = 0;
    let mut current: Option<&str> = None;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(header) = table_header(trimmed) {
            current = Some(header);
        } else if current == section
            && trimmed
                .strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with('='))
        {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    None
}

/// Byte offset of the table name in its `[section]` header.
fn find_header_offset(content: &str, section: &str) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if table_header(line.trim_start()) == Some(section) {
            return line.find(section).map(|pos| offset + pos);
        }
        offset += line.len();
    }
    None
}

fn table_header(line: &str) -> Option<&str> {
    let code = line.split('#').next().unwrap_or_default().trim_end();
    let name = code.strip_prefix('[')?.strip_suffix(']')?;
    Some(name.trim())
}

/// Closest candidate above the similarity floor.
pub fn suggest_key(unknown: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|candidate| (strsim::jaro_winkler(unknown, candidate), *candidate))
        .filter(|(score, _)| *score > SIMILARITY_FLOOR)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string())
}

/// A table other than `current` that has `key` or something close to it.
pub fn suggest_section_for_key(key: &str, current: &str) -> Option<String> {
    SECTION_KEYS
        .iter()
        .filter(|(section, _)| *section != current)
        .flat_map(|(section, keys)| {
            keys.iter()
                .map(move |candidate| (strsim::jaro_winkler(key, candidate), *section))
        })
        .filter(|(score, _)| *score > SIMILARITY_FLOOR)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, section)| section.to_string())
}

/// Render a list of `ConfigError`s to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}
