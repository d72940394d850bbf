//! A single manifest action: `actiontype [payload] key=value ...`.
//!
//! Attributes keep declaration order and may carry multiple values
//! (`value=i386 value=sparc`); `Display` reproduces the canonical rendering,
//! quoting values that contain whitespace or quotes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("malformed action line '{0}'")]
    Malformed(String),
}

type Result<T, E = ActionError> = std::result::Result<T, E>;

/// One attribute of an action. Repeated `key=value` tokens for the same key
/// accumulate into `values`, keeping the key's first position in the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    kind: String,
    payload: Option<String>,
    attrs: Vec<Attr>,
}

impl Action {
    /// The action type, e.g. `set` or `depend`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The positional payload token of payload-bearing actions (`file`,
    /// `license`), when present.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    /// First value of the named attribute.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attr_values(key).map(|vs| vs[0].as_str())
    }

    /// All values of the named attribute, in declaration order.
    pub fn attr_values(&self, key: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.values.as_slice())
    }

    /// The `name` attribute, carried by `set` actions.
    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    /// The `name` attribute with any `:locale` suffix removed.
    pub fn base_name(&self) -> Option<&str> {
        self.name().map(|n| match n.split_once(':') {
            Some((base, _)) => base,
            None => n,
        })
    }

    /// The locale a localized attribute name is tagged with
    /// (`pkg.summary:th` is tagged `th`); untagged names yield `None` and
    /// are the `C` locale.
    pub fn locale(&self) -> Option<&str> {
        self.name().and_then(|n| n.split_once(':')).map(|(_, l)| l)
    }

    /// The `variant.*` attributes tagging this action, in declaration
    /// order.
    pub fn variant_tags(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs
            .iter()
            .filter(|a| a.key.starts_with("variant."))
            .map(|a| (a.key.as_str(), a.values.as_slice()))
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let mut tokens = tokens.into_iter();
        let kind = tokens.next().ok_or_else(|| malformed(line))?;
        if kind.contains('=') {
            return Err(malformed(line));
        }

        let mut payload = None;
        let mut attrs: Vec<Attr> = Vec::new();
        for (i, token) in tokens.enumerate() {
            let split = token
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()));
            match split {
                Some((key, value)) => {
                    if key.is_empty() {
                        return Err(malformed(line));
                    }
                    match attrs.iter_mut().find(|a| a.key == key) {
                        Some(attr) => attr.values.push(value),
                        None => attrs.push(Attr {
                            key,
                            values: vec![value],
                        }),
                    }
                }
                None if i == 0 && payload.is_none() => payload = Some(token),
                None => return Err(malformed(line)),
            }
        }

        Ok(Self {
            kind,
            payload,
            attrs,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(payload) = &self.payload {
            write!(f, " {payload}")?;
        }
        for attr in &self.attrs {
            for value in &attr.values {
                write!(f, " {}={}", attr.key, quote(value))?;
            }
        }
        Ok(())
    }
}

fn malformed(line: &str) -> ActionError {
    ActionError::Malformed(line.to_string())
}

/// Split a line into tokens on unquoted whitespace, resolving double quotes
/// and backslash escapes within them.
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(malformed(line)),
            },
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_quotes {
        return Err(malformed(line));
    }
    if in_token {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err(malformed(line));
    }
    Ok(tokens)
}

fn quote(value: &str) -> String {
    let needs_quoting =
        value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"');
    if !needs_quoting {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
