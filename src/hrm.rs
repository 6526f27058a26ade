use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::HrmOmeroError;

pub type HrmConfig = BTreeMap<String, String>;

const REQUIRED_ENTRIES: &[&str] = &["OMERO_PKG", "OMERO_HOSTNAME"];

static JOB_ID_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(_[0-9a-f]{13}_hrm)\..*$").unwrap());
static TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*\bid\s*=\s*"([^"]*)"[^>]*>(.*?)</table>"#).unwrap()
});
static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td([^>]*)>(.*?)</td>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Reads an HRM config file. The file is shell syntax since it gets sourced by
/// the HRM's shell tooling: `KEY="value"` assignments, optionally joined by `;`.
pub fn parse_config(path: &Path) -> Result<HrmConfig, HrmOmeroError> {
    let body =
        fs::read_to_string(path).map_err(|_| HrmOmeroError::ConfigRead(path.to_path_buf()))?;
    let config = parse_config_str(&body, path)?;
    tracing::debug!("Successfully parsed [{}].", path.display());
    Ok(config)
}

pub fn parse_config_str(body: &str, path: &Path) -> Result<HrmConfig, HrmOmeroError> {
    let tokens = tokenize(body);
    let mut config = HrmConfig::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        if token.kind == TokenKind::Semicolon {
            continue;
        }
        let key = token.text;
        match iter.next() {
            Some(Token {
                kind: TokenKind::Equals,
                line,
                ..
            }) => {
                let has_value = matches!(
                    iter.peek(),
                    Some(next) if next.line == line && next.is_value()
                );
                let value = if has_value {
                    iter.next().map(|tok| tok.text).unwrap_or_default()
                } else {
                    String::new()
                };
                config.insert(key, value);
            }
            other => {
                let (line, found) = other
                    .map(|tok| (tok.line, tok.text))
                    .unwrap_or((token.line, String::new()));
                return Err(HrmOmeroError::ConfigSyntax {
                    path: path.to_path_buf(),
                    line,
                    message: format!("expected '=', found '{found}'"),
                });
            }
        }
    }

    Ok(config)
}

pub fn check_config(config: &HrmConfig) -> Result<(), HrmOmeroError> {
    for entry in REQUIRED_ENTRIES {
        if !config.contains_key(*entry) {
            return Err(HrmOmeroError::MissingConfigEntry(entry.to_string()));
        }
    }
    tracing::debug!("HRM config file passed all checks.");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Equals,
    Semicolon,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: usize,
}

impl Token {
    fn is_value(&self) -> bool {
        self.kind == TokenKind::Word
    }
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    let mut line = 1usize;

    while let Some(&ch) = chars.peek() {
        match ch {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '=' | ';' => {
                chars.next();
                tokens.push(Token {
                    kind: if ch == '=' {
                        TokenKind::Equals
                    } else {
                        TokenKind::Semicolon
                    },
                    text: ch.to_string(),
                    line,
                });
            }
            _ => {
                let start_line = line;
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    match c {
                        '"' | '\'' => {
                            chars.next();
                            for quoted in chars.by_ref() {
                                if quoted == c {
                                    break;
                                }
                                if quoted == '\n' {
                                    line += 1;
                                }
                                text.push(quoted);
                            }
                        }
                        c if c.is_whitespace() || c == '=' || c == ';' || c == '#' => break,
                        _ => {
                            text.push(c);
                            chars.next();
                        }
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text,
                    line: start_line,
                });
            }
        }
    }

    tokens
}

/// Strips the suffix after an HRM job id, `x_0123456789abc_hrm.ics` becomes
/// `x_0123456789abc_hrm`. Names without a job id are returned unchanged.
pub fn parse_job_basename(name: &str) -> String {
    JOB_ID_SUFFIX.replace(name, "$1").into_owned()
}

/// Location of the HRM parameter summary belonging to a result image.
pub fn parameter_file_for(image_file: &Path) -> PathBuf {
    let basename = parse_job_basename(&image_file.to_string_lossy());
    PathBuf::from(format!("{basename}.parameters.txt"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummarySection {
    pub title: String,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterSummary {
    pub sections: Vec<SummarySection>,
}

impl ParameterSummary {
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.title == section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.sections
            .iter()
            .flat_map(|section| section.entries.iter().cloned())
            .collect()
    }

    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for section in &self.sections {
            lines.push(format!("# {}", section.title));
            for (key, value) in &section.entries {
                lines.push(format!("{key}: {value}"));
            }
        }
        lines.join("\n")
    }
}

/// Parses the HTML parameter summary the HRM writes next to each result.
///
/// Returns `Ok(None)` if the file can't be read.
pub fn parse_summary(path: &Path) -> Result<Option<ParameterSummary>, HrmOmeroError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!("No parameter summary found at [{}].", path.display());
            return Ok(None);
        }
        Err(err) => {
            tracing::error!("Unable to open parameter summary file: {err}");
            return Ok(None);
        }
    };
    parse_summary_str(&content).map(Some)
}

pub fn parse_summary_str(content: &str) -> Result<ParameterSummary, HrmOmeroError> {
    let mut summary = ParameterSummary::default();

    for table in TABLE.captures_iter(content) {
        let table_id = &table[1];
        let mut title = table_id.replace("ParameterTable", "").trim().to_string();
        let mut entries: Vec<(String, String)> = Vec::new();

        for row in ROW.captures_iter(&table[2]) {
            let cells = CELL.captures_iter(&row[1]).collect::<Vec<_>>();
            if let Some(first) = cells.first() {
                if first[1].contains("header") {
                    let header = cell_text(&first[2]);
                    if !header.is_empty() {
                        title = header;
                    }
                    continue;
                }
            }
            if cells.len() != 3 {
                continue;
            }
            let mut key = cell_text(&cells[0][2]);
            let channel = cell_text(&cells[1][2]);
            if !channel.is_empty() && channel != "All" {
                key = format!("{key} [ch:{channel}]");
            }
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(HrmOmeroError::Summary(format!(
                    "duplicate parameter '{key}' in section '{title}'"
                )));
            }
            entries.push((key, cell_text(&cells[2][2])));
        }

        tracing::trace!("Parsed parameter table [{table_id}] as section [{title}].");
        if summary.sections.iter().any(|s| s.title == title) {
            return Err(HrmOmeroError::Summary(format!(
                "duplicate section '{title}'"
            )));
        }
        summary.sections.push(SummarySection { title, entries });
    }

    Ok(summary)
}

/// Plain-text rendering of a parameter summary, `None` if the file is missing.
pub fn job_parameter_summary(path: &Path) -> Result<Option<String>, HrmOmeroError> {
    Ok(parse_summary(path)?.map(|summary| summary.to_text()))
}

fn cell_text(raw: &str) -> String {
    let stripped = TAG.replace_all(raw, "");
    decode_entities(stripped.trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&mu;", "μ")
        .replace("&micro;", "μ")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
