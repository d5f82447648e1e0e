// src/models/selector.rs
use crate::error::EngineError;
use regex::Regex;

/// Sentinel selector id mapping to the primary field of the same name.
pub const META_DEFAULT: &str = "*default";

/// Capture-all template used when matching filters; regex groups beyond
/// the ones present in the pattern expand to the empty string.
const FILTER_REGEXP_TPL: &str = "$1$2$3$4$5";

/// Search-and-replace rule applied to a raw field value.
#[derive(Debug, Clone)]
pub struct SearchReplace {
    pub regex: Regex,
    pub template: String,
}

impl SearchReplace {
    pub fn new(pattern: &str, template: &str) -> Result<Self, EngineError> {
        let regex = Regex::new(pattern)
            .map_err(|e| EngineError::Decode(format!("invalid selector regex: {}", e)))?;
        Ok(Self {
            regex,
            template: template.to_string(),
        })
    }

    /// Returns None when the regex does not match at all.
    pub fn apply(&self, raw: &str) -> Option<String> {
        if !self.regex.is_match(raw) {
            return None;
        }
        Some(self.regex.replace_all(raw, self.template.as_str()).to_string())
    }

    fn with_template(&self, template: &str) -> Self {
        Self {
            regex: self.regex.clone(),
            template: template.to_string(),
        }
    }
}

/// Reference to a CDR field, either a well-known name or an extension
/// key, optionally transformed through a regex rule.
///
/// Textual form: `field` or `~field:s/pattern/template/`.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub id: String,
    pub rule: Option<SearchReplace>,
}

impl FieldSelector {
    pub fn plain(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rule: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EngineError::Decode("empty field selector".to_string()));
        }
        if !raw.starts_with('~') {
            return Ok(Self::plain(raw));
        }
        let body = &raw[1..];
        let (id, rule_str) = body
            .split_once(':')
            .ok_or_else(|| EngineError::Decode(format!("malformed selector: {}", raw)))?;
        if !rule_str.starts_with("s/") || !rule_str.ends_with('/') {
            return Err(EngineError::Decode(format!("malformed selector rule: {}", raw)));
        }
        let inner = &rule_str[2..rule_str.len() - 1];
        let (pattern, template) = split_unescaped(inner)
            .ok_or_else(|| EngineError::Decode(format!("malformed selector rule: {}", raw)))?;
        Ok(Self {
            id: id.to_string(),
            rule: Some(SearchReplace::new(&pattern, &template)?),
        })
    }

    /// Renders a raw field value through the rule, if any. A non-matching
    /// rule yields the empty string, mirroring the filter semantics.
    pub fn parse_value(&self, raw: &str) -> String {
        match &self.rule {
            Some(rule) => rule.apply(raw).unwrap_or_default(),
            None => raw.to_string(),
        }
    }
}

/// Field filter: the regex variant matches and compares capture groups,
/// the value variant is a literal equality check, a bare field accepts
/// anything.
///
/// Textual form: `field`, `field(value)` or `~field:s/pattern/template/`.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub id: String,
    pub value: Option<String>,
    pub rule: Option<SearchReplace>,
}

impl FieldFilter {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.starts_with('~') {
            let sel = FieldSelector::parse(raw)?;
            return Ok(Self {
                id: sel.id,
                value: None,
                rule: sel.rule,
            });
        }
        if let Some(open) = raw.find('(') {
            if !raw.ends_with(')') {
                return Err(EngineError::Decode(format!("malformed filter: {}", raw)));
            }
            return Ok(Self {
                id: raw[..open].to_string(),
                value: Some(raw[open + 1..raw.len() - 1].to_string()),
                rule: None,
            });
        }
        Ok(Self {
            id: raw.to_string(),
            value: None,
            rule: None,
        })
    }

    /// Evaluates the filter against a raw field value, returning the
    /// matched rendition on success.
    pub fn matches(&self, raw: &str) -> (bool, String) {
        match (&self.rule, &self.value) {
            (Some(rule), _) => {
                let captured = match rule.with_template(FILTER_REGEXP_TPL).apply(raw) {
                    Some(c) => c,
                    None => return (false, String::new()),
                };
                let rendered = rule.apply(raw).unwrap_or_default();
                if captured.is_empty() || captured == rendered {
                    (true, rendered)
                } else {
                    (false, String::new())
                }
            }
            (None, Some(value)) => {
                if raw == value {
                    (true, raw.to_string())
                } else {
                    (false, String::new())
                }
            }
            (None, None) => (true, raw.to_string()),
        }
    }
}

// Splits "pattern/template" at the first slash not preceded by a
// backslash, unescaping "\/" in both halves.
fn split_unescaped(inner: &str) -> Option<(String, String)> {
    let mut pattern = String::new();
    let mut escaped = false;
    let mut chars = inner.char_indices();
    for (idx, c) in &mut chars {
        if escaped {
            if c != '/' {
                pattern.push('\\');
            }
            pattern.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '/' {
            let template = inner[idx + 1..].replace("\\/", "/");
            return Some((pattern, template));
        } else {
            pattern.push(c);
        }
    }
    None
}
