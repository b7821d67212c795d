//! Search filter templates and RFC 4515 value escaping.

use authd_core::DirectoryError;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use thiserror::Error;

/// Placeholder substituted with the escaped login name.
pub const LOGIN_PLACEHOLDER: &str = "%s";

/// Errors raised while parsing a filter template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterTemplateError {
    /// The template was empty.
    #[error("filter template cannot be empty")]
    Empty,
    /// The placeholder did not appear exactly once.
    #[error("filter template must contain `%s` exactly once, found {0}")]
    PlaceholderCount(usize),
    /// Parentheses did not pair up.
    #[error("filter template has unbalanced parentheses: {0}")]
    Unbalanced(String),
}

impl From<FilterTemplateError> for DirectoryError {
    fn from(err: FilterTemplateError) -> Self {
        DirectoryError::invalid_config(err.to_string())
    }
}

/// Validated filter template such as `(uid=%s)`.
///
/// The template is split around its single placeholder at parse time so rendering cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTemplate {
    prefix: String,
    suffix: String,
}

impl FilterTemplate {
    /// Parses and validates a filter template.
    ///
    /// # Errors
    ///
    /// Returns [`FilterTemplateError`] when the template is empty, does not contain the
    /// placeholder exactly once, or has unbalanced parentheses.
    pub fn parse(template: impl AsRef<str>) -> Result<Self, FilterTemplateError> {
        let raw = template.as_ref().trim();
        if raw.is_empty() {
            return Err(FilterTemplateError::Empty);
        }

        let count = raw.matches(LOGIN_PLACEHOLDER).count();
        if count != 1 {
            return Err(FilterTemplateError::PlaceholderCount(count));
        }

        let mut depth = 0_usize;
        for ch in raw.chars() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| FilterTemplateError::Unbalanced(raw.to_string()))?;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(FilterTemplateError::Unbalanced(raw.to_string()));
        }

        let (prefix, suffix) = raw
            .split_once(LOGIN_PLACEHOLDER)
            .ok_or(FilterTemplateError::PlaceholderCount(0))?;

        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Substitutes the escaped login into the template.
    #[must_use]
    pub fn render(&self, login: &str) -> String {
        let escaped = escape_filter_value(login);
        let mut filter =
            String::with_capacity(self.prefix.len() + escaped.len() + self.suffix.len());
        filter.push_str(&self.prefix);
        filter.push_str(&escaped);
        filter.push_str(&self.suffix);
        filter
    }
}

impl Default for FilterTemplate {
    /// `(uid=%s)`
    fn default() -> Self {
        Self {
            prefix: "(uid=".to_string(),
            suffix: ")".to_string(),
        }
    }
}

impl fmt::Display for FilterTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{LOGIN_PLACEHOLDER}{}", self.prefix, self.suffix)
    }
}

impl FromStr for FilterTemplate {
    type Err = FilterTemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Escapes a value for use inside an LDAP search filter.
///
/// `*`, `(`, `)`, `\`, NUL and every non-ASCII byte become `\xx` with lowercase hex digits.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if must_escape(byte) {
            let _ = write!(escaped, "\\{byte:02x}");
        } else {
            escaped.push(char::from(byte));
        }
    }
    escaped
}

const fn must_escape(byte: u8) -> bool {
    byte > 0x7f || matches!(byte, b'*' | b'(' | b')' | b'\\' | 0)
}
