//! Topic filter matching
//!
//! Filters are split on `/` into levels. `+` stands for exactly one level, which may be
//! empty. `#` must be the last level and stands for one or more remaining levels, so
//! `a/#` covers `a/` and `a/b/c` but not `a` itself.

const SEPARATOR: char = '/';
const SINGLE_WILDCARD: &str = "+";
const MULTI_WILDCARD: &str = "#";

/// Returns true when `topic` is covered by `filter`.
///
/// A filter that is not well formed (see [`is_valid_filter`]) never matches.
///
/// ```
/// use hubmq::topic::matches;
///
/// assert!(matches("a/+/c", "a/b/c"));
/// assert!(!matches("a/+/c", "a/b/b/c"));
/// assert!(matches("a/#", "a/b/c"));
/// assert!(!matches("a/#", "a"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    if !is_valid_filter(filter) {
        return false;
    }
    let mut topic_levels = topic.split(SEPARATOR);
    for level in filter.split(SEPARATOR) {
        match (level, topic_levels.next()) {
            (MULTI_WILDCARD, Some(_)) => return true,
            (_, None) => return false,
            (SINGLE_WILDCARD, Some(_)) => {}
            (l, Some(t)) if l == t => {}
            _ => return false,
        }
    }
    topic_levels.next().is_none()
}

/// A filter is valid when it is non-empty, wildcards fill whole levels and `#` comes last.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let mut levels = filter.split(SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        match level {
            MULTI_WILDCARD if levels.peek().is_some() => return false,
            MULTI_WILDCARD | SINGLE_WILDCARD => {}
            l if l.contains(['+', '#']) => return false,
            _ => {}
        }
    }
    true
}

/// Topic names carried by PUBLISH must be concrete.
#[inline]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/b/c"));
        assert!(matches("a/+/c", "a//c"));
        assert!(matches("+", "x"));
        assert!(!matches("+", "x/y"));
        assert!(matches("+/+", "/x"));
        assert!(matches("a/+", "a/"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(matches("a/#", "a/b/c"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/"));
        assert!(!matches("a/#", "a"));
        assert!(!matches("a/#", "b/c"));
        assert!(matches("#", "anything/at/all"));
        assert!(matches("web/#", "web/cmd"));
    }

    #[test]
    fn exact() {
        assert!(matches("sys/health", "sys/health"));
        assert!(!matches("sys/health", "sys/health/x"));
        assert!(!matches("sys/health/x", "sys/health"));
        assert!(!matches("sys/healt", "sys/health"));
    }

    #[test]
    fn malformed_filters_never_match() {
        for f in ["", "a/#/b", "a+/b", "a/b#", "#/x", "a/++"] {
            assert!(!is_valid_filter(f), "{f}");
            assert!(!matches(f, "a/b"), "{f}");
        }
        assert!(is_valid_filter("a/+/#"));
        assert!(is_valid_filter("/"));
    }

    #[test]
    fn concrete_topics() {
        assert!(is_valid_topic("relay/x"));
        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic("a/+"));
    }
}
