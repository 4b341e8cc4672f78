//! Field annotation parsing and name-ignore globs.
//!
//! An annotation is a comma-separated token list attached to a field under a
//! configurable tag key (default `copy`):
//!
//! ```text
//! copy:"-"                      ignore this field
//! copy:"A1"                     pair under the name A1 (alias)
//! copy:"src=Old"                read from source field Old
//! copy:"dst=New"                write to target field New
//! copy:"Old=New"                explicit source-to-target pair
//! copy:",omitempty,slicemerge"  no rename, two policy flags
//! ```
//!
//! The first token is the optional name rule; every following token is a
//! policy flag name. Unknown flag tokens are skipped so annotation schemes
//! can grow without breaking older readers. Tag text is authoritative: it is
//! re-parsed on every visit rather than cached.

use crate::engine::flags::{Policy, PolicySet};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

/// Tag key annotations are looked up under when no other key is configured.
pub const DEFAULT_TAG_KEY: &str = "copy";

/// How a field's pairing name is remapped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NameRule {
    /// No remapping; the declared field name is used.
    #[default]
    None,
    /// The field pairs under this name on whichever side carries the tag.
    Alias(String),
    /// Read from this source field name.
    FromSource(String),
    /// Write to this target field name.
    ToTarget(String),
    /// Explicit source-to-target pair.
    Pair { source: String, target: String },
}

/// A parsed field annotation: policy flags plus an optional name rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldTag {
    pub policy: PolicySet,
    pub rename: NameRule,
}

impl FieldTag {
    /// Parse an annotation string. Never fails: malformed pieces degrade to
    /// no-ops rather than poisoning the whole field.
    pub fn parse(text: &str) -> FieldTag {
        let mut tag = FieldTag::default();
        for (idx, raw) in text.split(',').enumerate() {
            let token = raw.trim();
            if idx == 0 {
                match token {
                    "" => continue,
                    "-" => {
                        tag.policy.set(Policy::IGNORE);
                        continue;
                    }
                    _ => {}
                }
                // A leading token that happens to be a flag name is a flag,
                // not a rename.
                if let Some(flag) = PolicySet::parse_token(token) {
                    tag.policy.set(flag);
                } else {
                    tag.rename = parse_name_rule(token);
                }
                continue;
            }
            if let Some(flag) = PolicySet::parse_token(token) {
                tag.policy.set(flag);
            }
        }
        tag
    }

    /// True when the annotation drops the field entirely.
    pub fn ignored(&self) -> bool {
        self.policy.has(Policy::IGNORE)
    }

    /// The name to look the field up under on the source side.
    pub fn source_name<'a>(&'a self, declared: &'a str) -> &'a str {
        match &self.rename {
            NameRule::Alias(n) | NameRule::FromSource(n) => n,
            NameRule::Pair { source, .. } => source,
            _ => declared,
        }
    }

    /// The name to write the field under on the target side.
    pub fn target_name<'a>(&'a self, declared: &'a str) -> &'a str {
        match &self.rename {
            NameRule::Alias(n) | NameRule::ToTarget(n) => n,
            NameRule::Pair { target, .. } => target,
            _ => declared,
        }
    }
}

fn parse_name_rule(token: &str) -> NameRule {
    if let Some(rest) = token.strip_prefix("src=") {
        if rest.is_empty() {
            return NameRule::None;
        }
        return NameRule::FromSource(rest.to_string());
    }
    if let Some(rest) = token.strip_prefix("dst=") {
        if rest.is_empty() {
            return NameRule::None;
        }
        return NameRule::ToTarget(rest.to_string());
    }
    if let Some((src, dst)) = token.split_once('=') {
        if src.is_empty() || dst.is_empty() {
            return NameRule::None;
        }
        return NameRule::Pair { source: src.to_string(), target: dst.to_string() };
    }
    NameRule::Alias(token.to_string())
}

// --- Name-ignore globs -------------------------------------------------------

// Compiled ignore patterns are shared process-wide; patterns are few and
// stable so the map only ever grows.
static GLOB_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Glob matching for ignore patterns: `*` matches any run of characters,
/// `?` matches exactly one.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    if let Some(re) = GLOB_CACHE.read().expect("glob cache poisoned").get(pattern) {
        return re.is_match(name);
    }
    let re = compile_glob(pattern);
    let matched = re.is_match(name);
    GLOB_CACHE.write().expect("glob cache poisoned").insert(pattern.to_string(), re);
    matched
}

fn compile_glob(pattern: &str) -> Regex {
    let mut src = String::with_capacity(pattern.len() + 4);
    src.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => src.push_str(".*"),
            '?' => src.push('.'),
            other => src.push_str(&regex::escape(&other.to_string())),
        }
    }
    src.push('$');
    // The translation above only emits valid regex syntax.
    Regex::new(&src).expect("glob translation produced invalid regex")
}
