//! Name and MIME type filters applied to every listed child

use regex::{Regex, RegexBuilder};

/// Pair of search patterns a child must both match to be recorded.
///
/// Patterns match anywhere in the text (unanchored) and `.` also matches
/// newlines. The name pattern honours `case_sensitive`; the type pattern is
/// always case-sensitive.
#[derive(Debug, Clone)]
pub struct Filters {
    name: Regex,
    mime_type: Regex,
}

impl Default for Filters {
    fn default() -> Self {
        Self::match_all()
    }
}

impl Filters {
    pub fn new(
        name_pattern: &str,
        type_pattern: &str,
        case_sensitive: bool,
    ) -> Result<Self, regex::Error> {
        let name = RegexBuilder::new(name_pattern)
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()?;
        let mime_type = RegexBuilder::new(type_pattern)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Self { name, mime_type })
    }

    /// Filters that accept every child
    pub fn match_all() -> Self {
        Self::new(".*", ".*", true).expect("invalid match-all pattern")
    }

    /// `name` is the leaf name, not the accumulated path
    pub fn matches(&self, name: &str, mime_type: &str) -> bool {
        self.name.is_match(name) && self.mime_type.is_match(mime_type)
    }

    pub fn name_pattern(&self) -> &str {
        self.name.as_str()
    }

    pub fn type_pattern(&self) -> &str {
        self.mime_type.as_str()
    }
}
