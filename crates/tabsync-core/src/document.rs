//! Spreadsheet document identifiers.
//!
//! Sources and destinations are configured as document URLs. The document ID
//! is the path segment following `/d/`, up to the next `/`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Identifier of a spreadsheet document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document ID from a bare identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLink`] if the identifier is empty or contains
    /// characters that never appear in document IDs.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(is_id_char) {
            return Err(Error::invalid_link(id, "not a document identifier"));
        }
        Ok(Self(id))
    }

    /// Extracts the document ID from a document URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLink`] if the link has no `/d/<id>` segment.
    pub fn from_link(link: &str) -> Result<Self> {
        let link = link.trim();
        let Some((_, rest)) = link.split_once("/d/") else {
            return Err(Error::invalid_link(link, "missing '/d/' segment"));
        };
        let id: String = rest.chars().take_while(|c| is_id_char(*c)).collect();
        if id.is_empty() {
            return Err(Error::invalid_link(link, "empty document id after '/d/'"));
        }
        Ok(Self(id))
    }

    /// Accepts either a document URL or a bare document ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLink`] if neither form parses.
    pub fn from_link_or_id(value: &str) -> Result<Self> {
        if value.contains("/d/") {
            Self::from_link(value)
        } else {
            Self::new(value.trim())
        }
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the canonical edit URL for this document.
    #[must_use]
    pub fn to_link(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}/edit", self.0)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
