//! Ordered, case-insensitive, multi-valued header map.
//!
//! Header names compare case-insensitively but the first-seen spelling is
//! preserved for the wire. Insertion order is stable, and a name may carry
//! several values; [`HeaderMap::joined_value`] exposes the comma-joined
//! single-line form for consumers that expect it.

use indexmap::IndexMap;

#[derive(Clone, Debug, Default)]
struct HeaderEntry {
    /// First-seen spelling of the header name.
    name: String,
    values: Vec<String>,
}

/// Per-invocation header collection.
#[derive(Clone, Debug, Default)]
pub struct HeaderMap {
    entries: IndexMap<String, HeaderEntry>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let entry = self.entries.entry(key).or_insert_with(|| HeaderEntry {
            name,
            values: Vec::new(),
        });
        entry.values.clear();
        entry.values.push(value.into());
    }

    /// Append a value for `name`, keeping existing values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let entry = self.entries.entry(key).or_insert_with(|| HeaderEntry {
            name,
            values: Vec::new(),
        });
        entry.values.push(value.into());
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|entry| entry.values.first())
            .map(String::as_str)
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.values.as_slice())
            .unwrap_or(&[])
    }

    /// Comma-joined single-line form of all values for `name`.
    pub fn joined_value(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            return None;
        }
        Some(values.join(","))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove every value for `name`; returns true when something was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.shift_remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Iterate `(wire-spelling, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .values()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_keeps_first_spelling() {
        let mut headers = HeaderMap::new();
        headers.append("X-Trace-Id", "abc");
        headers.append("x-trace-id", "def");

        assert_eq!(headers.get("X-TRACE-ID"), Some("abc"));
        assert_eq!(headers.get_all("x-trace-id"), ["abc", "def"]);

        let spellings: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(spellings, ["X-Trace-Id"], "first spelling wins on the wire");
    }

    #[test]
    fn set_replaces_while_append_accumulates() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "application/json");
        headers.append("Accept", "text/plain");
        headers.set("Accept", "application/xml");

        assert_eq!(headers.get_all("accept"), ["application/xml"]);
    }

    #[test]
    fn joined_value_comma_joins_multiple_values() {
        let mut headers = HeaderMap::new();
        headers.append("X-Tag", "foo");
        headers.append("X-Tag", "bar");

        assert_eq!(headers.joined_value("x-tag").as_deref(), Some("foo,bar"));
        assert_eq!(headers.joined_value("missing"), None);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let headers: HeaderMap = [("B", "2"), ("A", "1"), ("C", "3")].into_iter().collect();
        let names: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["B", "A", "C"]);
    }
}
