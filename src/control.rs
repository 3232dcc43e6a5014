//! Lenient parser for RFC822-style control files (`Release`, `Packages`).
//!
//! Repositories in the wild ship control files with stray lines, CRLF line endings and
//! missing trailing newlines, so the parser drops what it can't interpret instead of failing.

/// One blank-line delimited block of `Key: value` lines, in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    pub fn new() -> Self {
        Default::default()
    }

    /// Value of `key`, continuation values joined by `\n`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, appending to an existing value on the next line.
    pub fn append(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parse `text` into stanzas.
///
/// Lines without a colon are dropped. A key repeated within one stanza continues the previous
/// value. Duplicate stanzas are kept, it's up to the caller to deal with them.
pub fn parse_control(text: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            continue;
        }

        let (key, value) = match line.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => continue,
        };
        if key.is_empty() {
            continue;
        }

        current.append(key, value);
    }

    if !current.is_empty() {
        stanzas.push(current);
    }

    stanzas
}
