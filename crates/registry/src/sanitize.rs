//! Schema-driven sanitization of the untrusted input surface. Payloads
//! arrive as JSON; every field is coerced through the sanitizer for its
//! declared kind or rejected. Sanitizers return `None` for values they
//! cannot make safe, and [`sanitize_validate`] turns that into the
//! missing/invalid error split.

use {
    crate::error::Error,
    regex::Regex,
    serde_json::{Map, Value},
    std::sync::LazyLock,
    unicode_normalization::UnicodeNormalization,
};

static INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("valid regex"));

static FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+(\.\d+)?|\.\d+)$").expect("valid regex"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid regex")
});

/// Keys that must never be copied out of caller-supplied mappings.
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "prototype", "constructor"];

const URL_MAX_LEN: usize = 2048;
const EMAIL_LOCAL_MAX_LEN: usize = 64;
const EMAIL_DOMAIN_MAX_LEN: usize = 255;

/// The kinds a schema field can declare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Int,
    Float,
    Bool,
    Text,
    /// Text that is additionally HTML-escaped.
    Html,
    Array,
    Email,
    Url,
    Object,
}

impl Kind {
    fn expected(self) -> &'static str {
        match self {
            Self::Int => "an integer",
            Self::Float => "a finite number",
            Self::Bool => "a boolean",
            Self::Text => "text",
            Self::Html => "text",
            Self::Array => "an array",
            Self::Email => "an email address",
            Self::Url => "an http(s) url",
            Self::Object => "an object",
        }
    }
}

/// One field of a sanitization schema.
pub struct Field<'a> {
    pub value: Option<&'a Value>,
    pub kind: Kind,
    pub required: bool,
    pub default: Option<Value>,
}

impl<'a> Field<'a> {
    pub fn required(value: Option<&'a Value>, kind: Kind) -> Self {
        Self {
            value,
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(value: Option<&'a Value>, kind: Kind) -> Self {
        Self {
            value,
            kind,
            required: false,
            default: None,
        }
    }

    pub fn optional_or(value: Option<&'a Value>, kind: Kind, default: Value) -> Self {
        Self {
            value,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// The absence predicate: `null`, empty strings, empty arrays and empty
/// objects are absent; `0` and `false` are present.
pub fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(entries) => !entries.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Runs a whole schema: present values are sanitized, absent ones fall back
/// to the default or `null`, and required fields produce errors when absent
/// (`MissingRequired`) or unsalvageable (`InvalidValue`).
pub fn sanitize_validate(schema: &[(&'static str, Field)]) -> Result<Map<String, Value>, Error> {
    let mut sanitized = Map::new();
    for (name, field) in schema {
        let Some(value) = field.value.filter(|value| has_value(value)) else {
            if let Some(default) = &field.default {
                sanitized.insert((*name).to_string(), default.clone());
            } else if field.required {
                return Err(Error::MissingRequired(name));
            } else {
                sanitized.insert((*name).to_string(), Value::Null);
            }
            continue;
        };
        match sanitize(field.kind, value) {
            Some(clean) => {
                sanitized.insert((*name).to_string(), clean);
            }
            None if field.required => {
                return Err(Error::invalid_value(*name, field.kind.expected()));
            }
            None => {
                sanitized.insert((*name).to_string(), Value::Null);
            }
        }
    }
    Ok(sanitized)
}

/// Dispatches to the sanitizer for one kind.
pub fn sanitize(kind: Kind, value: &Value) -> Option<Value> {
    match kind {
        Kind::Int => sanitize_int(value).map(Value::from),
        Kind::Float => {
            sanitize_float(value).and_then(|number| serde_json::Number::from_f64(number).map(Value::Number))
        }
        Kind::Bool => sanitize_bool(value).map(Value::Bool),
        Kind::Text => sanitize_text(value).map(Value::String),
        Kind::Html => sanitize_html(value).map(Value::String),
        Kind::Array => sanitize_array(value).map(Value::Array),
        Kind::Email => sanitize_email(value).map(Value::String),
        Kind::Url => sanitize_url(value).map(Value::String),
        Kind::Object => sanitize_object(value).map(Value::Object),
    }
}

/// Integers: native integral numbers, or strictly-digit strings. Fractional
/// and non-finite numbers are rejected, not rounded.
pub fn sanitize_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int);
            }
            let float = number.as_f64()?;
            if !float.is_finite() || float.fract() != 0.0 {
                return None;
            }
            if float < i64::MIN as f64 || float > i64::MAX as f64 {
                return None;
            }
            Some(float as i64)
        }
        Value::String(text) => {
            let text = text.trim();
            if !INT.is_match(text) {
                return None;
            }
            text.parse().ok()
        }
        _ => None,
    }
}

/// Floats: finite numbers, or strict decimal strings. Thousands separators
/// mean the string is ambiguous and it is rejected outright.
pub fn sanitize_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|float| float.is_finite()),
        Value::String(text) => {
            let text = text.trim();
            if !FLOAT.is_match(text) {
                return None;
            }
            text.parse().ok().filter(|float: &f64| float.is_finite())
        }
        _ => None,
    }
}

/// Booleans: native, 0/1, or the usual yes/no tokens.
pub fn sanitize_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_f64() {
            Some(f) if f == 0.0 => Some(false),
            Some(f) if f == 1.0 => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Text cleanup: tag strip, zero-width/format and control removal (keeping
/// `\n` and `\t`), NFC normalization, trim. Empty results count as absent.
pub fn sanitize_text(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    let stripped = TAGS.replace_all(&raw, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| !is_format_char(*c) && (!c.is_control() || *c == '\n' || *c == '\t'))
        .nfc()
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// [`sanitize_text`] plus HTML escaping, for values that end up in markup.
pub fn sanitize_html(value: &Value) -> Option<String> {
    let text = sanitize_text(value)?;
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    Some(escaped)
}

/// Arrays: singletons are wrapped, absent entries are dropped.
pub fn sanitize_array(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Null => None,
        Value::Array(entries) => Some(entries.iter().filter(|e| has_value(e)).cloned().collect()),
        other => has_value(other).then(|| vec![other.clone()]),
    }
}

/// Emails: single `@`, bounded ASCII local/domain parts, sane labels,
/// lowercased.
pub fn sanitize_email(value: &Value) -> Option<String> {
    let raw = value.as_str()?.trim();
    if !raw.is_ascii() {
        return None;
    }
    let (local, domain) = raw.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    if local.len() > EMAIL_LOCAL_MAX_LEN || domain.len() > EMAIL_DOMAIN_MAX_LEN {
        return None;
    }
    if !domain.split('.').all(|label| (1..=63).contains(&label.len())) {
        return None;
    }
    if !EMAIL.is_match(raw) {
        return None;
    }
    Some(raw.to_ascii_lowercase())
}

/// URLs: http(s) only, bounded length, ASCII host without a trailing dot,
/// credentials stripped.
pub fn sanitize_url(value: &Value) -> Option<String> {
    let raw = value.as_str()?.trim();
    if raw.len() > URL_MAX_LEN || raw.chars().any(char::is_control) {
        return None;
    }
    let mut url = url::Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if !host.is_ascii() || host.ends_with('.') {
        return None;
    }
    if !url.username().is_empty() || url.password().is_some() {
        url.set_username("").ok()?;
        url.set_password(None).ok()?;
    }
    Some(url.to_string())
}

/// Mappings: a fresh map built from the caller's keys, minus the ones that
/// carry prototype-pollution payloads in the wild.
pub fn sanitize_object(value: &Value) -> Option<Map<String, Value>> {
    let map = value.as_object()?;
    Some(
        map.iter()
            .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{061C}'
            | '\u{180B}'..='\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{206A}'..='\u{206F}'
            | '\u{FE00}'..='\u{FE0F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}
