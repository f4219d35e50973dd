use std::collections::BTreeSet;

use crate::safety::SafetyClassification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfirmationKind {
    MultipleStatements,
    DataModification,
}

impl ConfirmationKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MultipleStatements => "I understand this executes multiple statements",
            Self::DataModification => "I understand this may modify/delete data",
        }
    }
}

#[must_use]
pub fn required_confirmations(classification: &SafetyClassification) -> BTreeSet<ConfirmationKind> {
    let mut required = BTreeSet::new();
    if classification.is_multi_statement {
        required.insert(ConfirmationKind::MultipleStatements);
    }
    if classification.is_dangerous {
        required.insert(ConfirmationKind::DataModification);
    }
    required
}

/// A submission paused until the user ticks every required checkbox.
/// The SQL is captured at submission time; later draft edits do not change
/// what a confirmed proceed will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    sql: String,
    classification: SafetyClassification,
    required: BTreeSet<ConfirmationKind>,
    granted: BTreeSet<ConfirmationKind>,
}

impl PendingConfirmation {
    #[must_use]
    pub fn new(sql: impl Into<String>, classification: SafetyClassification) -> Self {
        let required = required_confirmations(&classification);
        Self {
            sql: sql.into(),
            classification,
            required,
            granted: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn classification(&self) -> &SafetyClassification {
        &self.classification
    }

    #[must_use]
    pub fn required(&self) -> &BTreeSet<ConfirmationKind> {
        &self.required
    }

    #[must_use]
    pub fn is_checked(&self, kind: ConfirmationKind) -> bool {
        self.granted.contains(&kind)
    }

    /// Ticks or clears one checkbox. Returns `false` when the checkbox is not
    /// shown for this submission, in which case nothing changes.
    pub fn set_checked(&mut self, kind: ConfirmationKind, checked: bool) -> bool {
        if !self.required.contains(&kind) {
            return false;
        }
        if checked {
            self.granted.insert(kind);
        } else {
            self.granted.remove(&kind);
        }
        true
    }

    #[must_use]
    pub fn can_proceed(&self) -> bool {
        self.required.is_subset(&self.granted)
    }

    #[must_use]
    pub fn missing(&self) -> Vec<ConfirmationKind> {
        self.required.difference(&self.granted).copied().collect()
    }

    #[must_use]
    pub fn prompt(&self) -> ConfirmationPrompt {
        ConfirmationPrompt {
            sql: self.sql.clone(),
            warnings: self
                .classification
                .all_warnings()
                .map(str::to_string)
                .collect(),
            checkboxes: self
                .required
                .iter()
                .map(|kind| ConfirmationCheckbox {
                    kind: *kind,
                    label: kind.label(),
                    checked: self.is_checked(*kind),
                })
                .collect(),
            can_proceed: self.can_proceed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationCheckbox {
    pub kind: ConfirmationKind,
    pub label: &'static str,
    pub checked: bool,
}

/// What a confirmation dialog shows: the literal SQL, the reasons, and only
/// the checkboxes that apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub sql: String,
    pub warnings: Vec<String>,
    pub checkboxes: Vec<ConfirmationCheckbox>,
    pub can_proceed: bool,
}
