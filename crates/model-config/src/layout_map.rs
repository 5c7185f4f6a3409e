//! Per-input layout overrides
//!
//! The configuration carries layouts as a single string, either a bare layout
//! applied to every input (`"NCHW"`) or a list of named entries
//! (`"image:NHWC,info:NC"`). Bracketed layouts may contain commas
//! (`"image:[N,H,W,C]"`), so entries are split on top-level commas only.

use std::collections::BTreeMap;

use common::error::{Error, Result};
use common::Layout;

/// Mapping from input name to configured layout.
///
/// A bare layout is stored under the empty name and is the map's only entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutMap {
    entries: BTreeMap<String, Layout>,
}

impl LayoutMap {
    /// Parses a layout string.
    ///
    /// ```
    /// use model_config::LayoutMap;
    ///
    /// let map = LayoutMap::parse("image:NHWC,info:NC").unwrap();
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(map.get("info").unwrap().to_string(), "NC");
    ///
    /// let global = LayoutMap::parse("NCHW").unwrap();
    /// assert_eq!(global.single().unwrap().to_string(), "NCHW");
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let mut entries = BTreeMap::new();
        if text.is_empty() {
            return Ok(Self { entries });
        }

        let parts = split_top_level(text)?;
        let named = parts.iter().filter(|part| has_name(part)).count();

        if named == 0 {
            if parts.len() != 1 {
                return Err(Error::Configuration(format!(
                    "Layout '{}' lists several unnamed layouts",
                    text
                )));
            }
            entries.insert(String::new(), parse_layout(parts[0], text)?);
            return Ok(Self { entries });
        }

        if named != parts.len() {
            return Err(Error::Configuration(format!(
                "Layout '{}' mixes named and unnamed entries",
                text
            )));
        }

        for part in parts {
            let (name, layout) = part
                .split_once(':')
                .ok_or_else(|| Error::Configuration(format!("Malformed layout entry '{}'", part)))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Configuration(format!(
                    "Layout entry '{}' has an empty input name",
                    part
                )));
            }
            let layout = parse_layout(layout, text)?;
            if entries.insert(name.to_string(), layout).is_some() {
                return Err(Error::Configuration(format!(
                    "Input '{}' has more than one layout in '{}'",
                    name, text
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Layout configured for the given input name
    pub fn get(&self, name: &str) -> Option<&Layout> {
        self.entries.get(name)
    }

    /// The only entry, when the map has exactly one
    pub fn single(&self) -> Option<&Layout> {
        if self.entries.len() == 1 {
            self.entries.values().next()
        } else {
            None
        }
    }

    /// Names the map refers to, in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn has_name(part: &str) -> bool {
    part.contains(':')
}

fn parse_layout(layout: &str, text: &str) -> Result<Layout> {
    let layout = layout.trim();
    if layout.is_empty() {
        return Err(Error::Configuration(format!("Empty layout in '{}'", text)));
    }
    Layout::parse(layout)
}

fn split_top_level(text: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::Configuration(format!("Unbalanced brackets in layout '{}'", text))
                })?;
            }
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::Configuration(format!("Unbalanced brackets in layout '{}'", text)));
    }
    parts.push(text[start..].trim());

    if parts.iter().any(|part| part.is_empty()) {
        return Err(Error::Configuration(format!("Empty entry in layout '{}'", text)));
    }
    Ok(parts)
}
