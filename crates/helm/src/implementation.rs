//! Implementation indirection table and the forwarded-call convention.
//!
//! The proxy never holds code directly. It holds an [`ImplementationRef`]
//! that is resolved against this table once at the top of every forwarded
//! call. Swapping the live implementation is therefore a single pointer
//! write in the kernel, and every implementation sees the same calling
//! convention: the original caller, the call, and a staged copy of the
//! persistent data store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use helm_kernel::DataStore;
use helm_types::{Identity, ImplementationRef, Version};
use thiserror::Error;

use crate::error::{HelmError, Result};

/// An opaque call forwarded to the live implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: String,
    pub args: Bytes,
}

impl Call {
    pub fn new(method: impl Into<String>, args: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            args: args.into(),
        }
    }

    /// A call with no arguments.
    pub fn method(method: impl Into<String>) -> Self {
        Self::new(method, Bytes::new())
    }
}

/// What an implementation knows about the call it is serving.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// The identity that made the call, preserved across the proxy.
    pub caller: &'a Identity,
    /// The handle the proxy resolved for this call.
    pub implementation: &'a ImplementationRef,
    /// The version that handle is bound to.
    pub version: Version,
}

/// Failure reported by an implementation. Its writes are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Rejected(String),
}

/// Code that can serve forwarded calls.
///
/// `store` is a staged copy of the persistent data. It is committed only if
/// the call returns `Ok` and the proxy still points at the same handle.
pub trait Implementation: Send + Sync {
    fn call(
        &self,
        ctx: &CallContext<'_>,
        call: &Call,
        store: &mut DataStore,
    ) -> std::result::Result<Bytes, CallError>;
}

/// Deployed code, keyed by handle.
///
/// Deploying is a code upload, not an upgrade: the proxy keeps pointing at
/// its current handle until a governed, emergency or rollback path swaps it.
#[derive(Clone, Default)]
pub struct ImplementationTable {
    entries: BTreeMap<ImplementationRef, Arc<dyn Implementation>>,
}

impl ImplementationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds code under `handle`. Deployed code is never replaced.
    pub fn deploy(
        &mut self,
        handle: ImplementationRef,
        code: Arc<dyn Implementation>,
    ) -> Result<()> {
        if self.entries.contains_key(&handle) {
            return Err(HelmError::AlreadyDeployed(handle));
        }
        self.entries.insert(handle, code);
        Ok(())
    }

    /// Looks up the code behind `handle`, failing with `UnknownImplementation`.
    pub fn resolve(&self, handle: &ImplementationRef) -> Result<Arc<dyn Implementation>> {
        self.entries
            .get(handle)
            .cloned()
            .ok_or_else(|| HelmError::UnknownImplementation(handle.clone()))
    }

    pub fn contains(&self, handle: &ImplementationRef) -> bool {
        self.entries.contains_key(handle)
    }

    /// Deployed handles in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = &ImplementationRef> {
        self.entries.keys()
    }
}

impl fmt::Debug for ImplementationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Implementation for Echo {
        fn call(
            &self,
            _ctx: &CallContext<'_>,
            call: &Call,
            _store: &mut DataStore,
        ) -> std::result::Result<Bytes, CallError> {
            Ok(call.args.clone())
        }
    }

    #[test]
    fn handles_deploy_once() {
        let mut table = ImplementationTable::new();
        let handle = ImplementationRef::new("echo-1");

        table.deploy(handle.clone(), Arc::new(Echo)).unwrap();
        assert!(table.contains(&handle));

        let err = table.deploy(handle.clone(), Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, HelmError::AlreadyDeployed(h) if h == handle));
        assert_eq!(table.handles().collect::<Vec<_>>(), vec![&handle]);
    }

    #[test]
    fn resolve_reports_missing_handles() {
        let table = ImplementationTable::new();
        let err = table
            .resolve(&ImplementationRef::new("missing"))
            .err()
            .unwrap();
        assert!(matches!(err, HelmError::UnknownImplementation(_)));
    }

    #[test]
    fn resolved_code_serves_calls() {
        let mut table = ImplementationTable::new();
        let handle = ImplementationRef::new("echo-1");
        table.deploy(handle.clone(), Arc::new(Echo)).unwrap();

        let caller = Identity::new("alice");
        let ctx = CallContext {
            caller: &caller,
            implementation: &handle,
            version: Version::new(1, 0, 0),
        };
        let mut store = DataStore::new();
        let out = table
            .resolve(&handle)
            .unwrap()
            .call(&ctx, &Call::new("ping", "hello"), &mut store)
            .unwrap();

        assert_eq!(out, Bytes::from("hello"));
    }
}
