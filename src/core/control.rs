//! Debian control-file parsing.
//!
//! Release, Packages and Sources files are all made of stanzas in the same
//! `Tag: value` syntax with indented continuation lines.

use tracing::warn;

/// One control-file record: tags in order of first appearance, each with its value lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: Vec<(String, Vec<String>)>,
}

impl Stanza {
    /// All value lines recorded for `tag`.
    pub fn get(&self, tag: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, values)| values.as_slice())
    }

    /// First value line for `tag`, or `""` when the tag is absent or has no values.
    pub fn first(&self, tag: &str) -> &str {
        self.get(tag)
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Starts (or restarts) `tag`; a repeated tag discards its earlier values.
    fn begin(&mut self, tag: &str) -> usize {
        if let Some(idx) = self.fields.iter().position(|(name, _)| name == tag) {
            self.fields[idx].1.clear();
            idx
        } else {
            self.fields.push((tag.to_string(), Vec::new()));
            self.fields.len() - 1
        }
    }
}

/// Returns the tag when `line` starts with `[A-Za-z0-9_-]+:`.
fn field_tag(line: &str) -> Option<&str> {
    let colon = line.find(':')?;
    let tag = &line[..colon];
    let valid = !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    valid.then_some(tag)
}

/// Parses control-file text into a [`Stanza`].
///
/// Never fails: continuation lines that appear before any tag are logged and
/// dropped. Blank lines are skipped; splitting a file into stanzas is up to the
/// caller.
pub fn parse_control_file(data: &str) -> Stanza {
    let mut stanza = Stanza::default();
    let mut current: Option<usize> = None;

    for (idx, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match field_tag(line) {
            Some(tag) => {
                let slot = stanza.begin(tag);
                let rest = line[tag.len() + 1..].trim();
                if !rest.is_empty() {
                    stanza.fields[slot].1.push(rest.to_string());
                }
                current = Some(slot);
            }
            None => match current {
                Some(slot) => stanza.fields[slot].1.push(line.trim().to_string()),
                None => warn!("Ignoring format error at line#{}: {:?}", idx + 1, line),
            },
        }
    }

    stanza
}
