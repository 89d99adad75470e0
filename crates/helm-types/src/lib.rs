//! # helm-types: Core types for `Helm`
//!
//! This crate contains shared types used across the `Helm` system:
//! - Semantic versions ([`Version`])
//! - Entity IDs ([`ProposalId`], [`TransactionId`])
//! - Identities and code handles ([`Identity`], [`ImplementationRef`])
//! - Temporal types ([`Timestamp`])
//! - Proposal lifecycle ([`UpgradeStatus`])
//! - Audit classification ([`UpgradeSource`], [`UpgradeOutcome`])
//! - Persistent data values ([`Value`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Version - Copy (three u32 components)
// ============================================================================

/// A semantic version bound to a deployed implementation.
///
/// Ordering is lexicographic over `(major, minor, patch)`, which is exactly
/// the derived ordering given the field declaration order.
///
/// Serializes as the string `MAJOR.MINOR.PATCH` so versions can key maps in
/// JSON and TOML documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true if both versions belong to the same major series.
    pub fn same_major(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error returned when a version string is not `MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}': expected MAJOR.MINOR.PATCH")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    /// Parses `1.2.3` or `v1.2.3`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use helm_types::Version;
    /// let v: Version = "v2.0.1".parse().unwrap();
    /// assert_eq!(v, Version::new(2, 0, 1));
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = body.split('.');

        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };

        let version = Version::new(next()?, next()?, next()?);

        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }

        Ok(version)
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Unique, monotonically allocated identifier for an upgrade proposal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ProposalId(u64);

impl ProposalId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the ID that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProposalId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ProposalId> for u64 {
    fn from(id: ProposalId) -> Self {
        id.0
    }
}

/// Position of an entry in the upgrade audit log.
///
/// Transaction IDs are zero-indexed and sequential; they double as the
/// index into the append-only log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the ID as a `usize` for indexing into the log.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TransactionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TransactionId> for u64 {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

// ============================================================================
// Identities and Handles - Clone (heap-allocated strings)
// ============================================================================

/// An authenticated caller identity (account, key fingerprint, service name).
///
/// Authentication happens outside `Helm`; by the time an `Identity` reaches
/// the kernel it is trusted to be the real caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque handle naming a deployed implementation.
///
/// The kernel never interprets the handle; the shell resolves it through
/// its implementation table once per forwarded call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImplementationRef(String);

impl ImplementationRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImplementationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImplementationRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ImplementationRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value with monotonic guarantee)
// ============================================================================

/// Wall-clock timestamp, stored as nanoseconds since Unix epoch.
///
/// The kernel only ever receives timestamps from the shell; it never reads
/// a clock itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from whole seconds since Unix epoch.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch (truncates nanoseconds).
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Returns this timestamp shifted forward by `duration`, saturating at
    /// the end of the representable range.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Creates a timestamp for the current time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is before Unix epoch (should never happen).
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch");
        Self(duration.as_nanos() as u64)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(prev) if now.0 <= prev.0 => Timestamp(prev.0.saturating_add(1)),
            _ => now,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Proposal Lifecycle - Copy (simple enum)
// ============================================================================

/// Lifecycle state of an upgrade proposal.
///
/// ```text
/// Pending ──► Approved ──► Executed
///    │           │  └────► Failed     (migration aborted)
///    │           └───────► Cancelled
///    ├───────────────────► Rejected
///    └───────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpgradeStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Cancelled,
    Failed,
}

impl UpgradeStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Executed
                | UpgradeStatus::Rejected
                | UpgradeStatus::Cancelled
                | UpgradeStatus::Failed
        )
    }

    /// Returns true if the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: UpgradeStatus) -> bool {
        use UpgradeStatus::{Approved, Cancelled, Executed, Failed, Pending, Rejected};
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled) | (Approved, Executed | Failed | Cancelled)
        )
    }
}

impl Display for UpgradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradeStatus::Pending => "pending",
            UpgradeStatus::Approved => "approved",
            UpgradeStatus::Executed => "executed",
            UpgradeStatus::Rejected => "rejected",
            UpgradeStatus::Cancelled => "cancelled",
            UpgradeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Audit Classification
// ============================================================================

/// Which execution path produced an upgrade transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpgradeSource {
    /// A voted proposal executed through `execute_upgrade`.
    Governance,
    /// An admin bypass while emergency mode was active.
    Emergency,
    /// A reversion to an earlier version.
    Rollback,
}

impl Display for UpgradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradeSource::Governance => "governance",
            UpgradeSource::Emergency => "emergency",
            UpgradeSource::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Result recorded for an upgrade transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeOutcome {
    Success,
    Failed { reason: String },
}

impl UpgradeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpgradeOutcome::Success)
    }
}

// ============================================================================
// Persistent Data Values
// ============================================================================

/// A value held in the implementation's persistent data store.
///
/// Migrations transform these values; forwarded calls read and write them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Bytes),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in migration error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}
