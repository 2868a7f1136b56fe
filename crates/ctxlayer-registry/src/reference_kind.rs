use serde::{Deserialize, Serialize};

/// The three kinds of ambiguous reference the Assumption Resolver can
/// detect in an utterance. A closed enum in place of runtime tags, per the
/// redesign note replacing dynamic dispatch on reference kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Temporal,
    Spatial,
    Entity,
}
