//! Operator console.
//!
//! Provides:
//! - Console variables (cvars) with typed values and flags
//! - Built-in commands (`echo`, `help`, `cvarlist`, `set`)
//! - Change tracking so the server can push edited cvars into live config
//! - Quote-aware line parsing
//!
//! Server-specific commands (`status`, `kick`, `reset`, `quit`) are handled
//! by the server before falling through to [`Console::exec`].

use std::collections::{BTreeMap, BTreeSet};

use anyhow::bail;

/// Console variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CvarValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl CvarValue {
    /// Parses operator input, preferring the variant of `like`.
    fn parse_like(like: &CvarValue, text: &str) -> Option<CvarValue> {
        let text = text.trim().trim_matches('"');
        match like {
            CvarValue::Int(_) => text.parse().ok().map(CvarValue::Int),
            CvarValue::Float(_) => text.parse().ok().map(CvarValue::Float),
            CvarValue::Bool(_) => match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => Some(CvarValue::Bool(true)),
                "0" | "false" | "off" => Some(CvarValue::Bool(false)),
                _ => None,
            },
            CvarValue::String(_) => Some(CvarValue::String(text.to_string())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CvarValue::Int(v) => Some(*v),
            CvarValue::Float(v) => Some(*v as i64),
            CvarValue::Bool(v) => Some(i64::from(*v)),
            CvarValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CvarValue::Float(v) => Some(*v),
            CvarValue::Int(v) => Some(*v as f64),
            CvarValue::String(s) => s.parse().ok(),
            CvarValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            CvarValue::Bool(v) => *v,
            CvarValue::Int(v) => *v != 0,
            CvarValue::Float(v) => *v != 0.0,
            CvarValue::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        }
    }
}

impl std::fmt::Display for CvarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvarValue::Int(v) => write!(f, "{v}"),
            CvarValue::Float(v) => write!(f, "{v}"),
            CvarValue::String(v) => write!(f, "\"{v}\""),
            CvarValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

bitflags::bitflags! {
    /// Cvar flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CvarFlags: u32 {
        const NONE = 0;
        const CHEAT = 1 << 0;        // Gates debug behaviour
        const GAMEPLAY = 1 << 1;     // Synced into live gameplay config
        const READ_ONLY = 1 << 2;    // Shown but not settable at runtime
    }
}

/// Console variable metadata.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub value: CvarValue,
    pub default: CvarValue,
    pub description: String,
    pub flags: CvarFlags,
}

/// Cvar registry plus command dispatch.
#[derive(Debug, Default)]
pub struct Console {
    cvars: BTreeMap<String, Cvar>,
    changed: BTreeSet<String>,
    history: Vec<String>,
}

const MAX_HISTORY: usize = 100;

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a console variable.
    pub fn register_cvar(&mut self, name: &str, default: CvarValue, description: &str, flags: CvarFlags) {
        self.cvars.insert(
            name.to_string(),
            Cvar {
                value: default.clone(),
                default,
                description: description.to_string(),
                flags,
            },
        );
    }

    pub fn get_cvar(&self, name: &str) -> Option<&CvarValue> {
        self.cvars.get(name).map(|c| &c.value)
    }

    /// Sets a cvar from operator text, coercing to the registered type.
    pub fn set_cvar(&mut self, name: &str, text: &str) -> anyhow::Result<CvarValue> {
        let Some(cvar) = self.cvars.get_mut(name) else {
            bail!("unknown cvar: {name}");
        };
        if cvar.flags.contains(CvarFlags::READ_ONLY) {
            bail!("{name} is read-only");
        }
        let Some(value) = CvarValue::parse_like(&cvar.default, text) else {
            bail!("invalid value for {name}: {text}");
        };
        if cvar.value != value {
            cvar.value = value.clone();
            self.changed.insert(name.to_string());
        }
        Ok(value)
    }

    /// Cvars edited since the last call, with their flags.
    pub fn take_changed(&mut self) -> Vec<(String, CvarValue, CvarFlags)> {
        std::mem::take(&mut self.changed)
            .into_iter()
            .filter_map(|name| {
                self.cvars
                    .get(&name)
                    .map(|c| (name.clone(), c.value.clone(), c.flags))
            })
            .collect()
    }

    /// Gets command history.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Executes a console line and returns the lines to print.
    pub fn exec(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        self.history.push(line.to_string());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        let tokens = parse_command_line(line);
        let Some((cmd, args)) = tokens.split_first() else {
            return Ok(Vec::new());
        };

        match cmd.as_str() {
            "echo" => Ok(vec![args.join(" ")]),
            "help" => Ok(vec![
                "Commands: status, kick <connection>, reset, quit, echo, help, cvarlist, set <cvar> <value>"
                    .to_string(),
            ]),
            "cvarlist" => Ok(self
                .cvars
                .iter()
                .map(|(name, c)| {
                    format!("  {name} = {} (default: {}) - {}", c.value, c.default, c.description)
                })
                .collect()),
            "set" => {
                let [name, rest @ ..] = args else {
                    bail!("usage: set <cvar> <value>");
                };
                if rest.is_empty() {
                    bail!("usage: set <cvar> <value>");
                }
                let value = self.set_cvar(name, &rest.join(" "))?;
                Ok(vec![format!("{name} = {value}")])
            }
            name if self.cvars.contains_key(name) => {
                if args.is_empty() {
                    let c = &self.cvars[name];
                    Ok(vec![format!("{name} = {} (default: {})", c.value, c.default)])
                } else {
                    let value = self.set_cvar(name, &args.join(" "))?;
                    Ok(vec![format!("{name} = {value}")])
                }
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}

/// Parses a command line into tokens, respecting quotes.
pub fn parse_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console() -> Console {
        let mut console = Console::new();
        console.register_cvar("sv_cheats", CvarValue::Bool(false), "Allow debug RPCs", CvarFlags::CHEAT);
        console.register_cvar("sv_max_enemies", CvarValue::Int(150), "Enemy cap", CvarFlags::GAMEPLAY);
        console.register_cvar("sv_tickrate", CvarValue::Int(20), "Tick rate", CvarFlags::READ_ONLY);
        console
    }

    #[test]
    fn set_coerces_and_tracks_changes() {
        let mut console = console();
        console.exec("set sv_max_enemies 40").unwrap();
        assert_eq!(console.get_cvar("sv_max_enemies"), Some(&CvarValue::Int(40)));
        console.exec("sv_cheats on").unwrap();
        assert!(console.get_cvar("sv_cheats").unwrap().as_bool());

        let changed = console.take_changed();
        let names: Vec<_> = changed.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["sv_cheats", "sv_max_enemies"]);
        assert!(console.take_changed().is_empty());
    }

    #[test]
    fn rejects_bad_values_and_read_only() {
        let mut console = console();
        assert!(console.exec("set sv_max_enemies lots").is_err());
        assert!(console.exec("set sv_tickrate 60").is_err());
        assert!(console.take_changed().is_empty());
    }

    #[test]
    fn unknown_command_is_reported_not_fatal() {
        let mut console = console();
        let out = console.exec("frobnicate").unwrap();
        assert_eq!(out, vec!["Unknown command: frobnicate".to_string()]);
        assert_eq!(console.history().len(), 1);
    }

    #[test]
    fn parse_quoted_args() {
        let tokens = parse_command_line(r#"echo "hello world" test"#);
        assert_eq!(tokens, vec!["echo", "hello world", "test"]);
    }
}
