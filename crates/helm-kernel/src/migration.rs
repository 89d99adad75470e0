//! MigrationExecutor: plans, the persistent data store, and atomic application.
//!
//! A [`MigrationPlan`] is an ordered list of pure data transformations over
//! the implementation's [`DataStore`]. Plans are registered once, keyed by
//! their `(from, to)` version pair, and never change afterwards.
//!
//! [`apply`] is all-or-nothing: steps run against a staged copy of the store
//! and the copy replaces the live store only after the last step succeeds.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use helm_types::{Value, Version};
use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

// ============================================================================
// DataStore
// ============================================================================

/// The implementation's persistent key/value state.
///
/// Survives every implementation swap; only migrations and committed
/// forwarded calls change it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStore(BTreeMap<String, Value>);

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ============================================================================
// Steps
// ============================================================================

/// A single data transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Adds a key that must not exist yet.
    Insert { key: String, value: Value },
    /// Removes a key that must currently hold exactly `value`.
    Delete { key: String, value: Value },
    /// Removes a key whatever it holds. Cannot be inverted.
    Remove { key: String },
    /// Moves a value to a new key that must not exist yet.
    Rename { from: String, to: String },
    /// Replaces `from` with `to`; fails if the key holds anything else.
    Rewrite { key: String, from: Value, to: Value },
    /// Adds `delta` to an integer value with overflow checking.
    Increment { key: String, delta: i64 },
}

/// Why a single step could not be applied.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepError {
    #[error("key '{0}' does not exist")]
    MissingKey(String),

    #[error("key '{0}' already exists")]
    KeyExists(String),

    #[error("key '{key}' holds {actual}, expected {expected}")]
    ValueMismatch {
        key: String,
        expected: Value,
        actual: Value,
    },

    #[error("key '{key}' holds a {actual} value, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("integer overflow on key '{0}'")]
    Overflow(String),
}

impl MigrationStep {
    /// Returns the step that undoes this one, or `None` if information is lost.
    pub fn inverse(&self) -> Option<MigrationStep> {
        match self {
            MigrationStep::Insert { key, value } => Some(MigrationStep::Delete {
                key: key.clone(),
                value: value.clone(),
            }),
            MigrationStep::Delete { key, value } => Some(MigrationStep::Insert {
                key: key.clone(),
                value: value.clone(),
            }),
            MigrationStep::Remove { .. } => None,
            MigrationStep::Rename { from, to } => Some(MigrationStep::Rename {
                from: to.clone(),
                to: from.clone(),
            }),
            MigrationStep::Rewrite { key, from, to } => Some(MigrationStep::Rewrite {
                key: key.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            MigrationStep::Increment { key, delta } => {
                delta.checked_neg().map(|delta| MigrationStep::Increment {
                    key: key.clone(),
                    delta,
                })
            }
        }
    }

    fn apply(&self, store: &mut DataStore) -> Result<(), StepError> {
        match self {
            MigrationStep::Insert { key, value } => {
                if store.contains_key(key) {
                    return Err(StepError::KeyExists(key.clone()));
                }
                store.insert(key.clone(), value.clone());
            }
            MigrationStep::Delete { key, value } => {
                let actual = store
                    .get(key)
                    .ok_or_else(|| StepError::MissingKey(key.clone()))?;
                if actual != value {
                    return Err(StepError::ValueMismatch {
                        key: key.clone(),
                        expected: value.clone(),
                        actual: actual.clone(),
                    });
                }
                store.remove(key);
            }
            MigrationStep::Remove { key } => {
                store
                    .remove(key)
                    .ok_or_else(|| StepError::MissingKey(key.clone()))?;
            }
            MigrationStep::Rename { from, to } => {
                if store.contains_key(to) {
                    return Err(StepError::KeyExists(to.clone()));
                }
                let value = store
                    .remove(from)
                    .ok_or_else(|| StepError::MissingKey(from.clone()))?;
                store.insert(to.clone(), value);
            }
            MigrationStep::Rewrite { key, from, to } => {
                let actual = store
                    .get(key)
                    .ok_or_else(|| StepError::MissingKey(key.clone()))?;
                if actual != from {
                    return Err(StepError::ValueMismatch {
                        key: key.clone(),
                        expected: from.clone(),
                        actual: actual.clone(),
                    });
                }
                store.insert(key.clone(), to.clone());
            }
            MigrationStep::Increment { key, delta } => {
                let actual = store
                    .get(key)
                    .ok_or_else(|| StepError::MissingKey(key.clone()))?;
                let current = actual.as_int().ok_or_else(|| StepError::TypeMismatch {
                    key: key.clone(),
                    expected: "int".to_string(),
                    actual: actual.kind().to_string(),
                })?;
                let next = current
                    .checked_add(*delta)
                    .ok_or_else(|| StepError::Overflow(key.clone()))?;
                store.insert(key.clone(), next);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Plans
// ============================================================================

/// Identifies a plan by the version transition it performs.
///
/// Serializes as `"FROM->TO"` so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlanKey {
    pub from: Version,
    pub to: Version,
}

impl PlanKey {
    pub fn new(from: Version, to: Version) -> Self {
        Self { from, to }
    }
}

impl Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

impl FromStr for PlanKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once("->")
            .ok_or_else(|| format!("invalid plan key '{s}': expected FROM->TO"))?;
        let from = from.parse().map_err(|e| format!("{e}"))?;
        let to = to.parse().map_err(|e| format!("{e}"))?;
        Ok(Self { from, to })
    }
}

impl Serialize for PlanKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlanKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An ordered set of steps transforming data from one version's shape to another's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub from_version: Version,
    pub to_version: Version,
    pub steps: Vec<MigrationStep>,
    #[serde(default)]
    pub reversible: bool,
}

impl MigrationPlan {
    pub fn new(from_version: Version, to_version: Version, steps: Vec<MigrationStep>) -> Self {
        Self {
            from_version,
            to_version,
            steps,
            reversible: false,
        }
    }

    /// Marks the plan as reversible. Validation checks every step has an inverse.
    pub fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }

    pub fn key(&self) -> PlanKey {
        PlanKey::new(self.from_version, self.to_version)
    }

    /// Checks the plan is well formed before registration.
    pub fn validate(&self) -> Result<(), KernelError> {
        let invalid = |reason: &str| KernelError::InvalidPlan {
            key: self.key(),
            reason: reason.to_string(),
        };

        if self.steps.is_empty() && self.from_version != self.to_version {
            return Err(invalid("plan has no steps"));
        }
        if self.to_version < self.from_version {
            return Err(invalid("plan must move to a newer version"));
        }
        if self.reversible && self.steps.iter().any(|s| s.inverse().is_none()) {
            return Err(invalid("plan marked reversible contains an irreversible step"));
        }

        Ok(())
    }

    /// Builds the plan that undoes this one: inverted steps in reverse order,
    /// moving from `to_version` back to `from_version`.
    ///
    /// Returns `None` if the plan is not marked reversible or any step has no inverse.
    pub fn inverse(&self) -> Option<MigrationPlan> {
        if !self.reversible {
            return None;
        }

        let steps = self
            .steps
            .iter()
            .rev()
            .map(MigrationStep::inverse)
            .collect::<Option<Vec<_>>>()?;

        Some(MigrationPlan {
            from_version: self.to_version,
            to_version: self.from_version,
            steps,
            reversible: true,
        })
    }
}

/// A step failed; nothing was written.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("migration {key} failed at step {step}: {reason}")]
pub struct MigrationError {
    pub key: PlanKey,
    pub step: usize,
    pub reason: StepError,
}

/// Applies `plan` to `store` atomically.
///
/// On error `store` is untouched.
pub fn apply(plan: &MigrationPlan, store: &mut DataStore) -> Result<(), MigrationError> {
    let mut staged = store.clone();

    for (step, op) in plan.steps.iter().enumerate() {
        op.apply(&mut staged).map_err(|reason| MigrationError {
            key: plan.key(),
            step,
            reason,
        })?;
    }

    *store = staged;
    Ok(())
}

// ============================================================================
// Registry
// ============================================================================

/// Registered plans keyed by `(from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRegistry {
    plans: BTreeMap<PlanKey, MigrationPlan>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PlanKey) -> Option<&MigrationPlan> {
        self.plans.get(key)
    }

    pub fn contains(&self, key: &PlanKey) -> bool {
        self.plans.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlanKey, &MigrationPlan)> {
        self.plans.iter()
    }

    /// Validates and stores a plan. Registered plans are immutable.
    pub(crate) fn register(mut self, plan: MigrationPlan) -> Result<Self, KernelError> {
        let key = plan.key();

        // Precondition: no plan for this transition yet
        if self.plans.contains_key(&key) {
            return Err(KernelError::DuplicatePlan(key));
        }
        plan.validate()?;

        self.plans.insert(key, plan);

        // Postcondition: plan is retrievable by its key
        debug_assert!(self.plans.contains_key(&key));
        Ok(self)
    }
}
