// ==========================================
// Molecular data portal - annotation reconciliation facts
// ==========================================
// Status lifecycle: valid → superseded (history is never deleted)
// Only one valid annotation per (entity, annotation target)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// AnnotationStatus
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    Valid,
    Superseded,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationStatus::Valid => "valid",
            AnnotationStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for AnnotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// AnnotationFacts - the compared part of an annotation
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationFacts {
    pub target: String,
    pub prediction: bool,
}

impl fmt::Display for AnnotationFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target={} prediction={}", self.target, self.prediction)
    }
}

/// A valid annotation already held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnnotation {
    pub id: i64,
    pub entity_id: i64,
    pub facts: AnnotationFacts,
    /// Remaining compared columns as (column, canonical value) pairs
    pub record: Vec<(String, Option<String>)>,
}

// ==========================================
// ReconcileOutcome - state per (old, new) pair
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Entity has no valid annotation: insert directly
    NoExistingAnnotation,
    /// Same target and prediction: nothing to do
    Consistent,
    /// Same target, predictions disagree
    PredictionConflict,
    /// Different target, not an upgrade
    TargetConflict,
    /// Different target, old negative and new positive: supersede
    TargetUpgrade,
}

impl ReconcileOutcome {
    /// Classifies one (stored, submitted) annotation pair.
    ///
    /// Full-record equality is reported alongside but is not an input.
    pub fn classify(same_target: bool, old_prediction: bool, new_prediction: bool) -> Self {
        match (same_target, old_prediction, new_prediction) {
            (true, old, new) if old == new => ReconcileOutcome::Consistent,
            (true, _, _) => ReconcileOutcome::PredictionConflict,
            (false, false, true) => ReconcileOutcome::TargetUpgrade,
            (false, _, _) => ReconcileOutcome::TargetConflict,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::PredictionConflict | ReconcileOutcome::TargetConflict
        )
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileOutcome::NoExistingAnnotation => "no-existing-annotation",
            ReconcileOutcome::Consistent => "consistent",
            ReconcileOutcome::PredictionConflict => "prediction-conflict",
            ReconcileOutcome::TargetConflict => "target-conflict",
            ReconcileOutcome::TargetUpgrade => "target-upgrade",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// AnnotationConflict - one reported disagreement
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSource {
    /// Submitted annotation disagrees with a stored valid annotation
    Stored,
    /// Two submitted rows for the same entity disagree
    SameImport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationConflict {
    pub entity_id: i64,
    pub entity_key: String,
    pub outcome: ReconcileOutcome,
    pub source: ConflictSource,
    pub old: AnnotationFacts,
    pub new: AnnotationFacts,
    pub records_equal: bool,
}

impl fmt::Display for AnnotationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.source {
            ConflictSource::Stored => "stored",
            ConflictSource::SameImport => "submitted",
        };
        write!(
            f,
            "{} for entity {} (id {}): {} [{}] vs submitted [{}]",
            self.outcome, self.entity_key, self.entity_id, origin, self.old, self.new
        )
    }
}
