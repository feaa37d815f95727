//! URL priority classification
//!
//! An explicit ordered list of (predicate, priority) pairs evaluated in
//! order, first match wins. High-value domain classes (news, technology,
//! video) outrank generic URLs; short paths tend to be landing pages and get
//! a mild boost. Priorities are clamped to 1..=10.

use serde::{Deserialize, Serialize};
use url::Url;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Predicate over a normalized URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UrlPredicate {
    /// Host contains any of the given fragments (case-insensitive)
    HostContainsAny(Vec<String>),
    /// Path is shorter than this many characters
    PathShorterThan(usize),
}

impl UrlPredicate {
    fn matches(&self, url: &Url) -> bool {
        match self {
            Self::HostContainsAny(fragments) => {
                let Some(host) = url.host_str() else {
                    return false;
                };
                let host = host.to_ascii_lowercase();
                fragments
                    .iter()
                    .any(|f| !f.is_empty() && host.contains(&f.to_ascii_lowercase()))
            }
            Self::PathShorterThan(len) => url.path().len() < *len,
        }
    }
}

/// One classification rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRule {
    /// Label for logs and config review
    pub name: String,
    pub predicate: UrlPredicate,
    pub priority: u8,
}

/// Ordered rule list; precedence is the list order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRules {
    pub rules: Vec<PriorityRule>,
    pub default_priority: u8,
}

impl Default for PriorityRules {
    fn default() -> Self {
        let host_rule = |name: &str, fragments: &[&str], priority: u8| PriorityRule {
            name: name.to_string(),
            predicate: UrlPredicate::HostContainsAny(
                fragments.iter().map(|f| (*f).to_string()).collect(),
            ),
            priority,
        };
        Self {
            rules: vec![
                host_rule(
                    "news",
                    &[
                        "news.", "cnn.", "bbc.", "nytimes.", "reuters.", "xinhua.", "sina.",
                        "sohu.",
                    ],
                    8,
                ),
                host_rule(
                    "technology",
                    &["github.", "stackoverflow.", "medium.", "dev.to"],
                    7,
                ),
                host_rule(
                    "video",
                    &["youtube.", "bilibili.", "tiktok.", "youku."],
                    6,
                ),
                PriorityRule {
                    name: "short-path".to_string(),
                    predicate: UrlPredicate::PathShorterThan(20),
                    priority: 6,
                },
            ],
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl PriorityRules {
    /// Base priority for a normalized URL key: first matching rule wins.
    #[must_use]
    pub fn classify(&self, key: &str) -> u8 {
        let priority = match Url::parse(key) {
            Ok(url) => self
                .rules
                .iter()
                .find(|rule| rule.predicate.matches(&url))
                .map_or(self.default_priority, |rule| rule.priority),
            Err(_) => self.default_priority,
        };
        priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let rules = PriorityRules::default();
        // news.youtube-ish host matches the news rule before video
        assert_eq!(rules.classify("https://news.example.com/some/long/story/path"), 8);
        assert_eq!(rules.classify("https://github.com/owner/repo/blob/main/file"), 7);
        assert_eq!(
            rules.classify("https://youtube.com/watch/something/longer/here"),
            6
        );
    }

    #[test]
    fn test_short_path_boost() {
        let rules = PriorityRules::default();
        assert_eq!(rules.classify("https://example.com/about"), 6);
    }

    #[test]
    fn test_default_priority() {
        let rules = PriorityRules::default();
        assert_eq!(
            rules.classify("https://example.com/a/rather/long/article/path"),
            DEFAULT_PRIORITY
        );
    }

    #[test]
    fn test_priority_clamped() {
        let rules = PriorityRules {
            rules: vec![PriorityRule {
                name: "over".to_string(),
                predicate: UrlPredicate::PathShorterThan(usize::MAX),
                priority: 200,
            }],
            default_priority: 0,
        };
        assert_eq!(rules.classify("https://example.com/x"), MAX_PRIORITY);
        let empty = PriorityRules {
            rules: Vec::new(),
            default_priority: 0,
        };
        assert_eq!(empty.classify("https://example.com/x"), MIN_PRIORITY);
    }
}
