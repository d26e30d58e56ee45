//! Command-line argument parsing.
//!
//! Arguments come in `key` and `key:value` forms. Keys are
//! case-insensitive and repeatable; retrieval returns the last value, and
//! missing keys return a caller-provided default.

/// Parsed command line.
#[derive(Debug, Default)]
pub struct CommandLine {
    entries: Vec<(String, String)>,
    /// Original spellings of value-less arguments (script paths keep
    /// their case).
    bare: Vec<String>,
}

impl CommandLine {
    /// Parse an argument list.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut entries = Vec::new();
        let mut bare = Vec::new();
        for raw in args {
            let stripped = raw.trim_start_matches('-');
            let (key, value) = match stripped.split_once(':') {
                Some((key, value)) => (key, value),
                None => {
                    bare.push(stripped.to_string());
                    (stripped, "")
                }
            };
            entries.push((key.to_ascii_lowercase(), value.to_string()));
        }
        Self { entries, bare }
    }

    /// The last value given for a key, or the caller's default.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or(default)
    }

    /// Every value given for a key, in order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether the key was given at all.
    pub fn contains(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Arguments given without a value, original spelling, in order
    /// (candidate script paths).
    pub fn bare_keys(&self) -> Vec<&str> {
        self.bare.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CommandLine {
        CommandLine::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_key_value_forms() {
        let cli = parse(&["strict", "out:a.txt"]);
        assert!(cli.contains("strict"));
        assert_eq!(cli.get("out", ""), "a.txt");
    }

    #[test]
    fn test_case_insensitive() {
        let cli = parse(&["Out:a.txt"]);
        assert_eq!(cli.get("OUT", ""), "a.txt");
        assert!(cli.contains("out"));
    }

    #[test]
    fn test_repeated_keys_last_wins() {
        let cli = parse(&["out:a", "out:b"]);
        assert_eq!(cli.get("out", ""), "b");
        assert_eq!(cli.get_all("out"), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_key_returns_default() {
        let cli = parse(&[]);
        assert_eq!(cli.get("out", "fallback"), "fallback");
    }

    #[test]
    fn test_value_may_contain_colons() {
        let cli = parse(&["url:http://example.com"]);
        assert_eq!(cli.get("url", ""), "http://example.com");
    }
}
