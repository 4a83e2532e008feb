//! Per-format rendering policy.
//!
//! A [`Profile`] is an immutable bag of quoting/escaping/typing rules for
//! one templated file format (JSON, YAML, TOML, INI/.properties/.env, XML).
//! Built-ins are created lazily on first access; custom profiles are
//! registered by cloning a base and applying overrides.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

use crate::errors::{Error, Result};
use crate::placeholder::model::{is_identifier, QuoteStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// json, yaml, toml: scalars keep their types when unquoted.
    Typed,
    /// ini, properties, dotenv: everything renders as a string.
    Stringly,
    /// xml: attribute vs text resolved at render time.
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapePolicy {
    Json,
    Yaml,
    Toml,
    Properties,
    Dotenv,
    Xml,
}

pub type YamlNeedsQuotesFn = fn(&str) -> bool;

/// Immutable per-format policy record.
#[derive(Debug, Clone)]
pub struct Profile {
    // identity
    pub id: String,
    pub kind: ProfileKind,

    // string quoting & escaping
    pub strings_must_be_quoted: bool,
    pub allowed_string_quote_styles: Vec<QuoteStyle>,
    pub preferred_string_quote_style: QuoteStyle,
    pub escape_policy: EscapePolicy,
    pub auto_quote_unquoted_strings: bool,

    // typed scalar policy
    pub typed_scalars_supported: bool,
    pub warn_on_quoted_nonstring: bool,
    pub coerce_nonstring_when_quoted_to_string: bool,

    // boolean spelling
    pub bool_true: String,
    pub bool_false: String,

    // numeric formatting (general/`%g` style)
    /// Significant digits for floats; `None` means the `%g` default of 6.
    pub float_precision: Option<usize>,
    pub strip_trailing_zeros: bool,

    // YAML heuristics
    pub yaml_string_needs_quotes: Option<YamlNeedsQuotesFn>,

    // XML rules
    pub xml_attributes_must_remain_quoted: bool,

    // INI / .properties / .env
    pub keep_quotes_verbatim: bool,
    pub properties_escape_set: Vec<char>,
    pub comment_prefixes: Vec<&'static str>,

    // JSON-style escaping knob
    pub ensure_ascii: bool,
}

// ---------------------------------------------------------------------------
// Escape helpers (content only; no surrounding quotes)
// ---------------------------------------------------------------------------

pub fn escape_json(s: &str, ensure_ascii: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\u{0008}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{000C}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if ensure_ascii && (c as u32) > 0x7F => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// YAML double-quoted style has JSON-like escapes.
pub fn escape_yaml_double(s: &str) -> String {
    escape_json(s, false)
}

/// YAML single-quoted style: duplicate single quotes.
pub fn escape_yaml_single(s: &str) -> String {
    s.replace('\'', "''")
}

/// TOML basic strings use JSON-like escapes.
pub fn escape_toml_basic(s: &str) -> String {
    escape_json(s, false)
}

/// Backslash-escape for .ini/.properties/.env values, plus profile extras.
pub fn escape_properties_like(s: &str, extra_escapes: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if extra_escapes.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// XML attribute value content; escapes the quote the attribute uses.
pub fn escape_xml_attr(s: &str, prefer_apos: bool) -> String {
    let s = s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    if prefer_apos {
        s.replace('\'', "&apos;")
    } else {
        s.replace('"', "&quot;")
    }
}

/// XML text node content.
pub fn escape_xml_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// YAML risky-bareword heuristic (kept conservative)
// ---------------------------------------------------------------------------

const RISKY_YAML: &[&str] = &[
    "y", "n", "yes", "no", "on", "off", "true", "false", "null", "~", "nan", "inf",
];

const RISKY_YAML_CHARS: &[char] = &[
    ':', '{', '}', '[', ']', ',', '#', '&', '*', '?', '|', '>', '<',
];

/// Decide if an unquoted YAML scalar is risky and should be quoted.
pub fn default_yaml_needs_quotes(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.trim() != s {
        return true;
    }
    if RISKY_YAML.contains(&s.to_ascii_lowercase().as_str()) {
        return true;
    }
    if s.chars().any(|c| RISKY_YAML_CHARS.contains(&c)) {
        return true;
    }
    if s.starts_with(['-', ':', '?', '@', '`']) {
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// Built-in factories
// ---------------------------------------------------------------------------

pub fn make_json_profile() -> Profile {
    Profile {
        id: "json".into(),
        kind: ProfileKind::Typed,
        strings_must_be_quoted: true,
        allowed_string_quote_styles: vec![QuoteStyle::Double],
        preferred_string_quote_style: QuoteStyle::Double,
        escape_policy: EscapePolicy::Json,
        auto_quote_unquoted_strings: true,
        typed_scalars_supported: true,
        warn_on_quoted_nonstring: true,
        coerce_nonstring_when_quoted_to_string: true,
        bool_true: "true".into(),
        bool_false: "false".into(),
        float_precision: None,
        strip_trailing_zeros: false,
        yaml_string_needs_quotes: None,
        xml_attributes_must_remain_quoted: false,
        keep_quotes_verbatim: false,
        properties_escape_set: vec![],
        comment_prefixes: vec!["#"],
        ensure_ascii: false,
    }
}

pub fn make_yaml_profile() -> Profile {
    Profile {
        id: "yaml".into(),
        kind: ProfileKind::Typed,
        strings_must_be_quoted: false,
        allowed_string_quote_styles: vec![QuoteStyle::Single, QuoteStyle::Double],
        preferred_string_quote_style: QuoteStyle::Double,
        escape_policy: EscapePolicy::Yaml,
        auto_quote_unquoted_strings: true,
        typed_scalars_supported: true,
        warn_on_quoted_nonstring: false,
        coerce_nonstring_when_quoted_to_string: true,
        bool_true: "true".into(),
        bool_false: "false".into(),
        float_precision: None,
        strip_trailing_zeros: false,
        yaml_string_needs_quotes: Some(default_yaml_needs_quotes),
        xml_attributes_must_remain_quoted: false,
        keep_quotes_verbatim: false,
        properties_escape_set: vec![],
        comment_prefixes: vec!["#"],
        ensure_ascii: false,
    }
}

pub fn make_toml_profile() -> Profile {
    Profile {
        id: "toml".into(),
        kind: ProfileKind::Typed,
        strings_must_be_quoted: true,
        allowed_string_quote_styles: vec![QuoteStyle::Single, QuoteStyle::Double],
        preferred_string_quote_style: QuoteStyle::Double,
        escape_policy: EscapePolicy::Toml,
        auto_quote_unquoted_strings: true,
        typed_scalars_supported: true,
        warn_on_quoted_nonstring: true,
        coerce_nonstring_when_quoted_to_string: true,
        bool_true: "true".into(),
        bool_false: "false".into(),
        float_precision: None,
        strip_trailing_zeros: false,
        yaml_string_needs_quotes: None,
        xml_attributes_must_remain_quoted: false,
        keep_quotes_verbatim: false,
        properties_escape_set: vec![],
        comment_prefixes: vec!["#"],
        ensure_ascii: false,
    }
}

pub fn make_ini_profile() -> Profile {
    Profile {
        id: "ini".into(),
        kind: ProfileKind::Stringly,
        strings_must_be_quoted: false,
        allowed_string_quote_styles: vec![QuoteStyle::Single, QuoteStyle::Double],
        preferred_string_quote_style: QuoteStyle::Double,
        escape_policy: EscapePolicy::Properties,
        auto_quote_unquoted_strings: false,
        typed_scalars_supported: false,
        warn_on_quoted_nonstring: false,
        coerce_nonstring_when_quoted_to_string: true,
        bool_true: "true".into(),
        bool_false: "false".into(),
        float_precision: None,
        strip_trailing_zeros: false,
        yaml_string_needs_quotes: None,
        xml_attributes_must_remain_quoted: false,
        keep_quotes_verbatim: true,
        properties_escape_set: vec![],
        comment_prefixes: vec!["#", ";"],
        ensure_ascii: false,
    }
}

pub fn make_properties_profile() -> Profile {
    let mut p = make_ini_profile();
    p.id = "properties".into();
    p
}

pub fn make_dotenv_profile() -> Profile {
    let mut p = make_ini_profile();
    p.id = "dotenv".into();
    p.escape_policy = EscapePolicy::Dotenv;
    p
}

pub fn make_xml_profile() -> Profile {
    Profile {
        id: "xml".into(),
        kind: ProfileKind::Xml,
        // text may stay bare; attributes must remain quoted
        strings_must_be_quoted: false,
        allowed_string_quote_styles: vec![QuoteStyle::Single, QuoteStyle::Double],
        preferred_string_quote_style: QuoteStyle::Double,
        escape_policy: EscapePolicy::Xml,
        auto_quote_unquoted_strings: false,
        typed_scalars_supported: false,
        warn_on_quoted_nonstring: false,
        coerce_nonstring_when_quoted_to_string: true,
        bool_true: "true".into(),
        bool_false: "false".into(),
        float_precision: None,
        strip_trailing_zeros: false,
        yaml_string_needs_quotes: None,
        xml_attributes_must_remain_quoted: true,
        keep_quotes_verbatim: true,
        properties_escape_set: vec![],
        comment_prefixes: vec!["<!--"],
        ensure_ascii: false,
    }
}

// ---------------------------------------------------------------------------
// Registry (lazy built-ins, additive customs)
// ---------------------------------------------------------------------------

const BUILTIN_IDS: &[&str] = &["json", "yaml", "toml", "ini", "properties", "dotenv", "xml"];

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<String, Arc<Profile>>> = RwLock::new(HashMap::new());
}

fn builtin_factory(id: &str) -> Option<fn() -> Profile> {
    match id {
        "json" => Some(make_json_profile),
        "yaml" => Some(make_yaml_profile),
        "toml" => Some(make_toml_profile),
        "ini" => Some(make_ini_profile),
        "properties" => Some(make_properties_profile),
        "dotenv" => Some(make_dotenv_profile),
        "xml" => Some(make_xml_profile),
        _ => None,
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Fetch a profile by built-in id or previously registered custom name.
/// Built-ins are constructed lazily on first access and then cached.
pub fn get_profile(name: &str) -> Result<Arc<Profile>> {
    let key = normalize_name(name);

    if let Some(prof) = REGISTRY.read().expect("profile registry poisoned").get(&key) {
        return Ok(Arc::clone(prof));
    }

    let factory = builtin_factory(&key)
        .ok_or_else(|| Error::Profile(format!("unknown profile: {name:?}")))?;

    let mut reg = REGISTRY.write().expect("profile registry poisoned");
    let prof = reg
        .entry(key)
        .or_insert_with(|| Arc::new(factory()));
    Ok(Arc::clone(prof))
}

/// Create and register a custom profile by cloning an existing one and
/// applying overrides. Names follow C identifier rules, are stored
/// lowercase, and may not shadow built-ins or existing customs.
pub fn clone_profile(
    new_name: &str,
    base: &str,
    overrides: impl FnOnce(&mut Profile),
) -> Result<Arc<Profile>> {
    let name = normalize_name(new_name);
    if BUILTIN_IDS.contains(&name.as_str()) {
        return Err(Error::Profile(format!(
            "profile name {name:?} is reserved for built-ins; choose a different name"
        )));
    }
    if !is_identifier(&name) {
        return Err(Error::Profile(
            "profile names must follow C identifier rules: start with a letter or underscore, \
             then letters/digits/underscores only"
                .into(),
        ));
    }

    let base_prof = get_profile(base)?;

    let mut reg = REGISTRY.write().expect("profile registry poisoned");
    if reg.contains_key(&name) {
        return Err(Error::Profile(format!(
            "a profile named {name:?} already exists; choose a different name"
        )));
    }

    let mut prof = (*base_prof).clone();
    prof.id = name.clone();
    overrides(&mut prof);
    let prof = Arc::new(prof);
    reg.insert(name, Arc::clone(&prof));
    Ok(prof)
}

/// All names currently in the registry (customs plus accessed built-ins).
pub fn list_profiles() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .expect("profile registry poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

/// Map a file extension to its profile; unknown suffixes default to YAML.
pub fn infer_profile(path: &Path) -> Arc<Profile> {
    let id = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("ini" | "cfg") => "ini",
        Some("properties") => "properties",
        Some("env") => "dotenv",
        Some("xml") => "xml",
        _ => "yaml",
    };
    get_profile(id).expect("built-in profile must exist")
}

pub fn default_profile(path: Option<&Path>) -> Arc<Profile> {
    match path {
        Some(p) => infer_profile(p),
        None => get_profile("yaml").expect("built-in profile must exist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_lazily_and_cache() {
        let a = get_profile("json").unwrap();
        let b = get_profile("JSON").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.kind, ProfileKind::Typed);
        assert!(a.strings_must_be_quoted);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        assert!(get_profile("jsonc").is_err());
    }

    #[test]
    fn clone_profile_registers_custom_overrides() {
        let p = clone_profile("yaml_caps_bools", "yaml", |p| {
            p.bool_true = "True".into();
            p.bool_false = "False".into();
        })
        .unwrap();
        assert_eq!(p.bool_true, "True");
        let fetched = get_profile("yaml_caps_bools").unwrap();
        assert!(Arc::ptr_eq(&p, &fetched));
    }

    #[test]
    fn clone_profile_rejects_reserved_and_bad_names() {
        assert!(clone_profile("json", "yaml", |_| {}).is_err());
        assert!(clone_profile("1bad", "yaml", |_| {}).is_err());
        assert!(clone_profile("has-dash", "yaml", |_| {}).is_err());
    }

    #[test]
    fn clone_profile_rejects_duplicates() {
        clone_profile("dup_check", "ini", |_| {}).unwrap();
        assert!(clone_profile("dup_check", "ini", |_| {}).is_err());
    }

    #[test]
    fn extension_inference() {
        assert_eq!(infer_profile(Path::new("a/b/config.json")).id, "json");
        assert_eq!(infer_profile(Path::new("x.yml")).id, "yaml");
        assert_eq!(infer_profile(Path::new("x.cfg")).id, "ini");
        assert_eq!(infer_profile(Path::new("x.env")).id, "dotenv");
        assert_eq!(infer_profile(Path::new("no_ext")).id, "yaml");
    }

    #[test]
    fn json_escaping() {
        assert_eq!(escape_json("a\"b\\c\n", false), "a\\\"b\\\\c\\n");
        assert_eq!(escape_json("\u{0001}", false), "\\u0001");
        assert_eq!(escape_json("é", true), "\\u00e9");
        assert_eq!(escape_json("é", false), "é");
    }

    #[test]
    fn yaml_single_doubles_apostrophes() {
        assert_eq!(escape_yaml_single("it's"), "it''s");
    }

    #[test]
    fn properties_escapes_include_extras() {
        assert_eq!(escape_properties_like("a=b\n", &['=']), "a\\=b\\n");
    }

    #[test]
    fn xml_escapers() {
        assert_eq!(escape_xml_text("a<b&c>d"), "a&lt;b&amp;c&gt;d");
        assert_eq!(escape_xml_attr("say \"hi\"", false), "say &quot;hi&quot;");
        assert_eq!(escape_xml_attr("it's", true), "it&apos;s");
    }

    #[test]
    fn yaml_risk_predicate() {
        for risky in ["", " padded", "yes", "NO", "~", "a:b", "x{y", "-lead", "@at"] {
            assert!(default_yaml_needs_quotes(risky), "{risky:?} should be risky");
        }
        for safe in ["plain", "v1.2.3", "hello world", "snake_case"] {
            assert!(!default_yaml_needs_quotes(safe), "{safe:?} should be safe");
        }
    }
}
