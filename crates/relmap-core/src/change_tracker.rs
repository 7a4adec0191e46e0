//! Per-entity change log.
//!
//! Every mutation of a tracked entity appends an entry. Intelligent flushing
//! writes only entities whose log is non-empty; a successful flush accepts
//! (clears) the log.

use crate::value::Value;

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Ordered log of field changes since the last flush.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    entries: Vec<FieldChange>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. Assignments that leave the value unchanged are ignored.
    pub fn record(&mut self, field: &str, old: Value, new: Value) {
        if old == new {
            return;
        }
        tracing::trace!(field, %old, %new, "Recorded field change");
        self.entries.push(FieldChange {
            field: field.to_string(),
            old,
            new,
        });
    }

    /// Append an entry unconditionally.
    pub fn push(&mut self, change: FieldChange) {
        tracing::trace!(field = %change.field, "Recorded reference change");
        self.entries.push(change);
    }

    /// Whether any change has been recorded since the last accept.
    pub fn has_changes(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FieldChange] {
        &self.entries
    }

    /// Distinct changed field names, in first-change order.
    pub fn changed_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !fields.contains(&entry.field.as_str()) {
                fields.push(&entry.field);
            }
        }
        fields
    }

    /// Clear the log after a successful flush.
    pub fn accept(&mut self) {
        self.entries.clear();
    }
}
