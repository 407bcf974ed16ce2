//! Best-effort CLI output parsing.
//!
//! The registry maps a `(platform, normalized command)` pair to a parsing
//! function producing a structured JSON record. No match, or a parser that
//! fails on malformed output, is never an error: the caller keeps the raw
//! text and the request outcome becomes `ParseWarning`. Best-effort semantics
//! are a first-class design decision, not a fallback path.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use crate::inventory::Platform;

/// A registered parser: raw CLI text in, structured record out.
///
/// Returning `Err` means the output did not look like what the parser
/// expects; the registry treats that the same as having no parser at all.
pub type ParserFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\s+") {
    Ok(re) => re,
    Err(err) => panic!("invalid whitespace regex: {err}"),
});

/// Lowercases and collapses internal whitespace so lookups are insensitive
/// to incidental spacing.
pub fn normalize_command(command: &str) -> String {
    WHITESPACE
        .replace_all(command.trim(), " ")
        .to_ascii_lowercase()
}

/// Registry of `(platform, command)` → parser.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<(Platform, String), Arc<ParserFn>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in parsers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for platform in [Platform::Ios, Platform::IosXe, Platform::Nxos] {
            registry.register(platform, "show ip int brief", parse_show_ip_int_brief);
        }
        registry
    }

    /// Registers a parser for an exact `(platform, normalized command)` pair.
    /// A later registration for the same pair replaces the earlier one.
    pub fn register<F>(&mut self, platform: Platform, command: &str, parser: F)
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.parsers
            .insert((platform, normalize_command(command)), Arc::new(parser));
    }

    /// Returns a structured record when a parser matches and succeeds,
    /// `None` otherwise. Parser panics are contained.
    pub fn try_parse(&self, platform: Platform, command: &str, raw: &str) -> Option<Value> {
        let key = (platform, normalize_command(command));
        let parser = match self.parsers.get(&key) {
            Some(parser) => parser.clone(),
            None => {
                debug!(
                    "No parser for command '{}' on platform {}",
                    key.1,
                    platform.as_str()
                );
                return None;
            }
        };

        match catch_unwind(AssertUnwindSafe(|| parser(raw))) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(reason)) => {
                debug!(
                    "Parser for '{}' on {} could not handle output: {}",
                    key.1,
                    platform.as_str(),
                    reason
                );
                None
            }
            Err(_) => {
                debug!(
                    "Parser for '{}' on {} panicked; treating as unparsed",
                    key.1,
                    platform.as_str()
                );
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

static INT_BRIEF_HEADER: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)^Interface +IP-Address +OK\? +Method +Status +Protocol") {
        Ok(re) => re,
        Err(err) => panic!("invalid int brief header regex: {err}"),
    }
});

/// Parses Cisco `show ip int brief` into `{"interfaces": [...]}`.
fn parse_show_ip_int_brief(raw: &str) -> Result<Value, String> {
    let lines: Vec<&str> = raw.lines().collect();
    let header_idx = lines
        .iter()
        .position(|line| INT_BRIEF_HEADER.is_match(line))
        .ok_or_else(|| "header line not found".to_string())?;

    let mut entries = Vec::new();
    for line in &lines[header_idx + 1..] {
        if line.trim().is_empty() {
            continue;
        }
        // Six fields from the left; a multi-word status such as
        // "administratively down" carries its tail into the protocol field.
        let parts: Vec<&str> = WHITESPACE.splitn(line.trim(), 6).collect();
        if parts.len() < 6 {
            continue;
        }
        entries.push(json!({
            "interface": parts[0],
            "ip_address": parts[1],
            "ok": parts[2],
            "method": parts[3],
            "status": parts[4],
            "protocol": parts[5],
        }));
    }

    Ok(json!({ "interfaces": entries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT_BRIEF_OUTPUT: &str = "\
show ip int brief
Interface              IP-Address      OK? Method Status                Protocol
GigabitEthernet0/0     10.0.0.1        YES NVRAM  up                    up
GigabitEthernet0/1     unassigned      YES NVRAM  administratively down down
r1#";

    #[test]
    fn normalization_lowercases_and_collapses_whitespace() {
        assert_eq!(
            normalize_command("  Show   IP    Int   Brief "),
            "show ip int brief"
        );
    }

    #[test]
    fn builtin_parser_extracts_interfaces() {
        let registry = ParserRegistry::with_builtins();
        let value = registry
            .try_parse(Platform::Ios, "show ip int brief", INT_BRIEF_OUTPUT)
            .expect("builtin parser should match");

        let interfaces = value["interfaces"].as_array().expect("interfaces array");
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["interface"], "GigabitEthernet0/0");
        assert_eq!(interfaces[0]["ip_address"], "10.0.0.1");
        assert_eq!(interfaces[0]["protocol"], "up");
        assert_eq!(interfaces[1]["ip_address"], "unassigned");
    }

    #[test]
    fn lookup_is_insensitive_to_spacing_and_case() {
        let registry = ParserRegistry::with_builtins();
        assert!(
            registry
                .try_parse(Platform::Ios, "SHOW  ip   INT brief", INT_BRIEF_OUTPUT)
                .is_some()
        );
    }

    #[test]
    fn unknown_command_returns_none() {
        let registry = ParserRegistry::with_builtins();
        assert!(
            registry
                .try_parse(Platform::Ios, "show version", "IOS XE 17.3")
                .is_none()
        );
    }

    #[test]
    fn platform_namespaces_registrations() {
        let registry = ParserRegistry::with_builtins();
        // Only IOS-family platforms carry the built-in parser.
        assert!(
            registry
                .try_parse(Platform::Junos, "show ip int brief", INT_BRIEF_OUTPUT)
                .is_none()
        );
    }

    #[test]
    fn malformed_output_is_treated_as_unparsed() {
        let registry = ParserRegistry::with_builtins();
        assert!(
            registry
                .try_parse(Platform::Ios, "show ip int brief", "% Invalid input")
                .is_none()
        );
    }

    #[test]
    fn panicking_parser_is_contained() {
        let mut registry = ParserRegistry::new();
        registry.register(Platform::Eos, "show hostname", |_raw| {
            panic!("parser bug");
        });
        assert!(
            registry
                .try_parse(Platform::Eos, "show hostname", "sw1")
                .is_none()
        );
    }

    #[test]
    fn external_parser_can_be_registered() {
        let mut registry = ParserRegistry::new();
        registry.register(Platform::Junos, "show system uptime", |raw| {
            Ok(json!({ "first_line": raw.lines().next().unwrap_or("") }))
        });

        let value = registry
            .try_parse(Platform::Junos, "show system uptime", "Current time: now")
            .expect("registered parser should run");
        assert_eq!(value["first_line"], "Current time: now");
    }
}
