//! Response specifications.
//!
//! A [`ResponseSpec`] describes how to answer one matching request: the
//! method and path patterns it answers, and the status, headers and content
//! it returns.

use bytes::Bytes;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fmt;

/// Method pattern used when none is given.
pub const DEFAULT_METHOD_PATTERN: &str = ".*";

/// Path pattern used when none is given.
pub const DEFAULT_PATH_PATTERN: &str = "^/.*";

/// Content type used when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A compiled regular expression that always matches the whole input.
///
/// The source text is kept as written so it can be displayed and serialized
/// back out; matching wraps it as `^(?:source)$`.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    regex: Regex,
}

impl Pattern {
    /// Compile a case-sensitive pattern.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Self::compile(source, false)
    }

    /// Compile a case-insensitive pattern.
    pub fn case_insensitive(source: &str) -> Result<Self, regex::Error> {
        Self::compile(source, true)
    }

    fn compile(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&format!("^(?:{})$", source))
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            source: source.to_string(),
            case_insensitive,
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern ignores case.
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Whole-string match.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A single-use rule describing how to answer a matching request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    /// Method pattern (case-insensitive)
    pub method: Pattern,
    /// Path pattern (case-sensitive)
    pub path: Pattern,
    /// HTTP status code
    pub status: u16,
    /// Response headers, names in lower case
    pub headers: BTreeMap<String, String>,
    /// Response content
    pub content: Bytes,
}

impl ResponseSpec {
    /// Set a header, normalizing the name to lower case.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    /// The configured content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Whether this response answers the given method and path.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method.matches(method) && self.path.matches(path)
    }
}

impl Default for ResponseSpec {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string());

        Self {
            method: Pattern::case_insensitive(DEFAULT_METHOD_PATTERN)
                .expect("default method pattern compiles"),
            path: Pattern::new(DEFAULT_PATH_PATTERN).expect("default path pattern compiles"),
            status: 200,
            headers,
            content: Bytes::new(),
        }
    }
}

impl fmt::Display for ResponseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Response [Method {}] [Path {}]]", self.method, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches_whole_string() {
        let pattern = Pattern::new("/xyz").unwrap();
        assert!(pattern.matches("/xyz"));
        assert!(!pattern.matches("/xyz/extra"));
        assert!(!pattern.matches("/abc/xyz"));
    }

    #[test]
    fn test_pattern_anchor_is_harmless() {
        let pattern = Pattern::new("^/xyz").unwrap();
        assert!(pattern.matches("/xyz"));
        assert!(!pattern.matches("/xyz/extra"));
        assert_eq!(pattern.as_str(), "^/xyz");
    }

    #[test]
    fn test_pattern_case_sensitivity() {
        let method = Pattern::case_insensitive("GET").unwrap();
        assert!(method.matches("get"));
        assert!(method.matches("GET"));

        let path = Pattern::new("/Xyz").unwrap();
        assert!(!path.matches("/xyz"));
    }

    #[test]
    fn test_pattern_alternation_is_grouped() {
        let pattern = Pattern::new("/a|/b").unwrap();
        assert!(pattern.matches("/a"));
        assert!(pattern.matches("/b"));
        assert!(!pattern.matches("/a/b/c"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Pattern::new("(unclosed").is_err());
    }

    #[test]
    fn test_default_spec() {
        let spec = ResponseSpec::default();
        assert_eq!(spec.status, 200);
        assert_eq!(spec.content_type(), Some(DEFAULT_CONTENT_TYPE));
        assert!(spec.content.is_empty());
        assert!(spec.matches("DELETE", "/anything/at/all"));
        assert!(!spec.matches("GET", "no-leading-slash"));
    }

    #[test]
    fn test_header_names_lower_cased() {
        let mut spec = ResponseSpec::default();
        spec.set_header("Header-0", "XYZ");
        assert_eq!(spec.headers.get("header-0"), Some(&"XYZ".to_string()));
        assert!(!spec.headers.contains_key("Header-0"));
    }

    #[test]
    fn test_display() {
        let mut spec = ResponseSpec::default();
        spec.method = Pattern::case_insensitive("GET").unwrap();
        spec.path = Pattern::new("^/xyz").unwrap();
        assert_eq!(spec.to_string(), "[Response [Method GET] [Path ^/xyz]]");
    }
}
