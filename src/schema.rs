//! Extraction schema: the user-defined list of fields to pull from a drawing.
//!
//! A schema is pure data — an ordered list of [`ExtractionItem`]s, each a
//! field name plus an optional hint about where on the drawing to look
//! ("title block, lower right", "revision table"). Order matters: it is
//! preserved into the generated prompt and into output column order, so a
//! reviewer sees columns in the order they defined them.
//!
//! The schema is an explicit value owned by the caller and passed into the
//! core on every run. The library keeps no ambient form state between runs.

use serde::{Deserialize, Serialize};

/// One field the user wants extracted, with an optional location hint.
///
/// An item is *active* when its name is non-empty after trimming. Inactive
/// items are skipped by the prompt builder and the output tabulation, so an
/// interactively-edited list with blank rows works without pre-filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionItem {
    /// Field name, e.g. "Part Number". Empty ⇒ inactive.
    pub name: String,
    /// Where on the drawing to look, e.g. "title block". May be empty.
    #[serde(default)]
    pub location_hint: String,
}

impl ExtractionItem {
    /// Create an item with a location hint.
    pub fn new(name: impl Into<String>, location_hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location_hint: location_hint.into(),
        }
    }

    /// Create an item with no location hint.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    /// Whether this item participates in extraction.
    pub fn is_active(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// An ordered list of extraction items.
///
/// # Example
/// ```rust
/// use draw2struct::{ExtractionItem, ExtractionSchema};
///
/// let schema = ExtractionSchema::new(vec![
///     ExtractionItem::new("Part Number", "title block"),
///     ExtractionItem::named("Material"),
/// ]);
/// assert_eq!(schema.active_items().count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub items: Vec<ExtractionItem>,
}

impl ExtractionSchema {
    pub fn new(items: Vec<ExtractionItem>) -> Self {
        Self { items }
    }

    /// Build a schema from bare field names (no location hints).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(ExtractionItem::named).collect())
    }

    /// Active items in declaration order.
    pub fn active_items(&self) -> impl Iterator<Item = &ExtractionItem> {
        self.items.iter().filter(|i| i.is_active())
    }

    /// Names of active items in declaration order — the output column order.
    pub fn column_names(&self) -> Vec<String> {
        self.active_items()
            .map(|i| i.name.trim().to_string())
            .collect()
    }

    /// An empty schema is valid: the model is simply free to extract nothing.
    pub fn is_empty(&self) -> bool {
        self.active_items().next().is_none()
    }
}
