//! Comma-separated wildcard name patterns
//!
//! `*` matches any run of characters and `?` a single one. A pattern starting
//! with `-` excludes names matched by the rest of it.

use regex::Regex;

/// Compiled set of include and exclude patterns
#[derive(Debug, Clone)]
pub struct NamePattern {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl NamePattern {
    pub fn parse(patterns: &str) -> Self {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for raw in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match raw.strip_prefix('-') {
                Some(rest) => exclude.extend(wildcard_regex(rest)),
                None => include.extend(wildcard_regex(raw)),
            }
        }

        Self { include, exclude }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.include.iter().any(|re| re.is_match(name))
            && !self.exclude.iter().any(|re| re.is_match(name))
    }

    /// Matching names, sorted and deduplicated
    pub fn filter<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: Vec<String> = names
            .into_iter()
            .filter(|name| self.matches(name))
            .map(str::to_string)
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Anchored regex for one wildcard pattern
fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    // Literal characters are escaped above, so this only fails on size limits
    Regex::new(&re).ok()
}
