//! Ordered string-matching rule tables.
//!
//! A table is evaluated top to bottom against the lower-cased combined output
//! of a process; the first matching rule wins. Tables are plain data so each
//! executor keeps its own, and the ordering is visible in one place.

/// One entry of a rule table.
///
/// `when` is a disjunction of conjunctions: the rule matches if every term of
/// at least one group occurs in the text.
#[derive(Debug)]
pub struct Rule<K> {
    pub kind: K,
    pub when: &'static [&'static [&'static str]],
    pub message: &'static str,
}

impl<K> Rule<K> {
    pub fn matches(&self, haystack: &str) -> bool {
        self.when
            .iter()
            .any(|group| group.iter().all(|term| haystack.contains(term)))
    }
}

/// Result of running a table over captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<K> {
    /// `None` when no rule matched and the fallback was used.
    pub kind: Option<K>,
    pub message: String,
}

/// First rule in `rules` matching `stderr` or `stdout`.
pub fn first_match<'a, K>(rules: &'a [Rule<K>], stderr: &str, stdout: &str) -> Option<&'a Rule<K>> {
    let haystack = format!("{}\n{}", stderr, stdout).to_lowercase();
    rules.iter().find(|rule| rule.matches(&haystack))
}

/// Last line of `text` that looks like a real diagnostic: non-empty, not a
/// task header (`> Task ...`), and longer than `min_len`.
pub fn last_meaningful_line(text: &str, min_len: usize) -> Option<&str> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('>') && line.len() > min_len)
}

/// First line of `text` mentioning one of `keywords` (case-insensitive).
pub fn first_line_with<'a>(text: &'a str, keywords: &[&str]) -> Option<&'a str> {
    text.lines().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        keywords.iter().any(|k| lower.contains(k))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Broad,
        Narrow,
    }

    const RULES: &[Rule<Kind>] = &[
        Rule {
            kind: Kind::Narrow,
            when: &[&["disk", "full"]],
            message: "disk full",
        },
        Rule {
            kind: Kind::Broad,
            when: &[&["disk"], &["volume"]],
            message: "disk problem",
        },
    ];

    #[test]
    fn earlier_rule_wins() {
        let rule = first_match(RULES, "Disk is FULL", "").unwrap();
        assert_eq!(rule.kind, Kind::Narrow);
        let rule = first_match(RULES, "", "disk unplugged").unwrap();
        assert_eq!(rule.kind, Kind::Broad);
        let rule = first_match(RULES, "volume missing", "").unwrap();
        assert_eq!(rule.kind, Kind::Broad);
        assert!(first_match(RULES, "all good", "fine").is_none());
    }

    #[test]
    fn conjunction_needs_every_term() {
        let rule = &RULES[0];
        assert!(rule.matches("the disk is full"));
        assert!(!rule.matches("the disk is empty"));
    }

    #[test]
    fn streams_do_not_bleed_into_each_other() {
        let rules: &[Rule<Kind>] = &[Rule {
            kind: Kind::Narrow,
            when: &[&["ab"]],
            message: "",
        }];
        assert!(first_match(rules, "a", "b").is_none());
    }

    #[test]
    fn last_meaningful_line_skips_noise() {
        let text = "error: something real went wrong\n> Task :app:compile\nok\n\n";
        assert_eq!(
            last_meaningful_line(text, 10),
            Some("error: something real went wrong")
        );
        assert_eq!(last_meaningful_line("tiny\n", 10), None);
    }

    #[test]
    fn first_line_with_keyword() {
        let text = "Performing Streamed Install\nadb: failed to install: Failure [X]\n";
        assert_eq!(
            first_line_with(text, &["failure", "error"]),
            Some("adb: failed to install: Failure [X]")
        );
    }
}
