//! Capability ingestion from the uplink's `CAPAB` exchange.
//!
//! The 1202 dialect announces its whole mode vocabulary at handshake:
//!
//! - `CAPAB CHANMODES` / `CAPAB USERMODES` carry `name=char` pairs
//!   (`ban=b`, `op=@o`), letter last so prefix symbols strip off.
//! - `CAPAB CAPABILITIES` carries `KEY=VALUE` tokens, among them the
//!   four-way `CHANMODES=A,B,C,D` and `USERMODES=A,B,C,D` class splits,
//!   `PREFIX=(modes)symbols`, and the `NICKMAX`/`CHANMAX` limits.
//!
//! Nothing here is hard-coded per mode letter; the engine follows whatever
//! vocabulary the peer announces.

use std::collections::HashMap;

use tracing::debug;

/// Argument class of a mode letter, per the RFC-005 convention plus the
/// prefix-mode category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeClass {
    /// Class A: list-valued, argument on both set and unset (bans).
    List,
    /// Class B: argument on both set and unset (key).
    AlwaysArg,
    /// Class C: argument on set only (limit).
    SetArg,
    /// Class D: never takes an argument.
    Flag,
    /// Status mode (op, voice, ...); the argument is always a member.
    Prefix,
}

/// One `A,B,C,D` class split, as announced in `CAPAB CAPABILITIES`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSplit {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

impl ClassSplit {
    /// Parse a `A,B,C,D` split. Returns `None` unless all four groups are
    /// present (groups may be empty).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (a, b, c, d) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        Some(ClassSplit {
            a: a.to_string(),
            b: b.to_string(),
            c: c.to_string(),
            d: d.to_string(),
        })
    }

    fn classify(&self, letter: char) -> Option<ModeClass> {
        if self.a.contains(letter) {
            Some(ModeClass::List)
        } else if self.b.contains(letter) {
            Some(ModeClass::AlwaysArg)
        } else if self.c.contains(letter) {
            Some(ModeClass::SetArg)
        } else if self.d.contains(letter) {
            Some(ModeClass::Flag)
        } else {
            None
        }
    }
}

/// The `PREFIX=(modes)symbols` capability value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSpec {
    /// Mode letters, most privileged first (e.g. `ov`).
    pub modes: String,
    /// Display symbols in the same order (e.g. `@+`).
    pub symbols: String,
}

impl PrefixSpec {
    /// Parse the `(modes)symbols` form.
    pub fn parse(s: &str) -> Option<Self> {
        let open = s.find('(')?;
        let close = open + 1 + s[open + 1..].find(')')?;
        let modes = &s[open + 1..close];
        let symbols = &s[close + 1..];
        if modes.is_empty() {
            return None;
        }
        Some(PrefixSpec {
            modes: modes.to_string(),
            symbols: symbols.to_string(),
        })
    }
}

/// Mode vocabulary learned from the uplink, consulted by the mode engine.
#[derive(Debug, Clone, Default)]
pub struct ModeTable {
    /// Named channel modes (`ban` -> `b`).
    pub chan_names: HashMap<String, char>,
    /// Named user modes (`invisible` -> `i`).
    pub user_names: HashMap<String, char>,
    chan_classes: ClassSplit,
    user_classes: ClassSplit,
    prefix: PrefixSpec,
    /// `NICKMAX` limit, if announced.
    pub nick_max: Option<usize>,
    /// `CHANMAX` limit, if announced.
    pub chan_max: Option<usize>,
}

impl ModeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one `CAPAB` subcommand with its (whitespace-split) tokens.
    pub fn ingest_capab(&mut self, subcommand: &str, tokens: &[&str]) {
        match subcommand {
            "CHANMODES" => ingest_named(&mut self.chan_names, tokens),
            "USERMODES" => ingest_named(&mut self.user_names, tokens),
            "CAPABILITIES" => self.ingest_capabilities(tokens),
            other => debug!(subcommand = other, "ignoring unknown CAPAB subcommand"),
        }
    }

    fn ingest_capabilities(&mut self, tokens: &[&str]) {
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "CHANMODES" => {
                    if let Some(split) = ClassSplit::parse(value) {
                        self.chan_classes = split;
                    }
                }
                "USERMODES" => {
                    if let Some(split) = ClassSplit::parse(value) {
                        self.user_classes = split;
                    }
                }
                "PREFIX" => {
                    if let Some(spec) = PrefixSpec::parse(value) {
                        self.prefix = spec;
                    }
                }
                "NICKMAX" => self.nick_max = value.parse().ok(),
                "CHANMAX" => self.chan_max = value.parse().ok(),
                _ => {}
            }
        }
    }

    /// Whether `letter` is a status mode (op, voice, ...).
    pub fn is_prefix_mode(&self, letter: char) -> bool {
        self.prefix.modes.contains(letter)
    }

    /// Announced prefix-mode letters, most privileged first.
    pub fn prefix_modes(&self) -> &str {
        &self.prefix.modes
    }

    /// Resolve the argument class of a mode letter for the given target
    /// kind. Prefix modes only exist on channels. Letters outside the
    /// announced vocabulary degrade to [`ModeClass::Flag`].
    pub fn classify(&self, channel_target: bool, letter: char) -> ModeClass {
        if channel_target && self.is_prefix_mode(letter) {
            return ModeClass::Prefix;
        }
        let class = if channel_target {
            self.chan_classes.classify(letter)
        } else {
            self.user_classes.classify(letter)
        };
        class.unwrap_or_else(|| {
            debug!(%letter, channel_target, "mode letter outside announced vocabulary");
            ModeClass::Flag
        })
    }
}

/// Ingest `name=char` pairs; the letter is the last character of the value
/// so display symbols (`op=@o`) fall away.
fn ingest_named(map: &mut HashMap<String, char>, tokens: &[&str]) {
    for token in tokens {
        let Some((name, value)) = token.split_once('=') else {
            continue;
        };
        if let Some(letter) = value.chars().last() {
            map.insert(name.to_string(), letter);
        }
    }
}
