//! Course content types

use std::collections::BTreeMap;

use crate::course::Location;

/// A single block of course content (course root, chapter, vertical, problem...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub location: Location,
    pub display_name: Option<String>,

    /// Remaining XML attributes, kept verbatim
    pub fields: BTreeMap<String, String>,

    /// Child block locations, in document order
    pub children: Vec<Location>,

    /// Text body for leaf blocks (html, problem markup)
    pub data: Option<String>,
}

impl Block {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            display_name: None,
            fields: BTreeMap::new(),
            children: Vec::new(),
            data: None,
        }
    }

    /// Name used for the exported directory and archive
    pub fn url_name(&self) -> &str {
        &self.location.name
    }

    pub fn category(&self) -> &str {
        &self.location.category
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_child(mut self, child: Location) -> Self {
        self.children.push(child);
        self
    }
}
