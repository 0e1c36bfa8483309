//! The note record and its invariants.
//!
//! # Invariants
//! - `updated_at >= created_at`.
//! - `id` never changes after creation.
//! - Tags are trimmed, lowercased, non-empty and unique, in first-seen order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RecordId;
use crate::{Error, Result};

/// A user note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    id: RecordId,
    title: String,
    body: String,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a new record with a generated id, stamped now.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::generate(),
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a record from stored or remote parts.
    ///
    /// Tags are normalized; the result is validated.
    pub fn from_parts(
        id: RecordId,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: impl IntoIterator<Item = impl AsRef<str>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let record = Self {
            id,
            title: title.into(),
            body: body.into(),
            tags: normalize_tags(tags),
            created_at,
            updated_at,
        };
        record.validate()?;
        Ok(record)
    }

    /// Builder-style tag assignment for freshly created records.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
        self.touch();
    }

    pub fn set_tags(&mut self, tags: impl IntoIterator<Item = impl AsRef<str>>) {
        self.tags = normalize_tags(tags);
        self.touch();
    }

    /// Add a single tag; returns false if it was already present.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        self.touch();
        true
    }

    /// Bump `updated_at` to now, never backwards.
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }

    /// Field-by-field equality, ignoring timestamps.
    pub fn content_eq(&self, other: &Record) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.body == other.body
            && self.tags == other.tags
    }

    /// Check all record invariants.
    ///
    /// # Errors
    /// - `Validation` naming the offending field
    pub fn validate(&self) -> Result<()> {
        if !self.id.is_valid() {
            return Err(Error::validation("id", "identifier is empty or malformed"));
        }
        if self.updated_at < self.created_at {
            return Err(Error::validation(
                "updatedAt",
                "updatedAt precedes createdAt",
            ));
        }
        for (index, tag) in self.tags.iter().enumerate() {
            if normalize_tag(tag).as_deref() != Some(tag.as_str()) {
                return Err(Error::validation(
                    "tags",
                    format!("tag '{}' is empty or not normalized", tag),
                ));
            }
            if self.tags[..index].contains(tag) {
                return Err(Error::validation(
                    "tags",
                    format!("duplicate tag '{}'", tag),
                ));
            }
        }
        Ok(())
    }

    /// Re-normalize tags in place. Returns true if anything changed.
    ///
    /// Deliberately leaves `updated_at` alone.
    pub fn renormalize_tags(&mut self) -> bool {
        let normalized = normalize_tags(&self.tags);
        if normalized == self.tags {
            return false;
        }
        self.tags = normalized;
        true
    }
}

/// Trim and lowercase a tag; `None` if nothing remains.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalize a tag list, keeping first occurrences in order.
pub fn normalize_tags(tags: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        if let Some(tag) = normalize_tag(tag.as_ref()) {
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
    }
    out
}
