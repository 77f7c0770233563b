/*
Copyright 2025 The gatewaylb-controller Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Two error kinds, per the failure model: [`ReconcileError`] is the generic,
//! retriable-or-not infrastructure failure that propagates to the informer;
//! [`ResourceStatusError`] is a signal that belongs on the reconciled object's
//! `status`. Each controller's `Err(Error::Status(_))` arm is the
//! `processResourceError` wrapper from the spec's failure model: it writes the
//! condition as `False` with the error's reason/message via
//! [`crate::resources::set_condition`] and returns `Ok` from the reconcile,
//! suppressing a retry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfigError(String),
    #[error("cloud load balancer error: {0}")]
    LoadBalancerError(String),
    #[error("error querying Gateway API CRDs: {0}; are the CRDs installed?")]
    CrdNotFoundError(#[source] kube::Error),
    #[error("missing resource namespace")]
    MissingResourceNamespace,
    #[error("missing resource name")]
    MissingResourceName,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Status(#[from] ResourceStatusError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the informer should re-queue this reconcile on a short timer.
    /// A [`ReconcileError`] carries its own verdict; every other variant
    /// (I/O errors, missing-name/namespace bugs) is treated as retriable,
    /// matching `kube::Error`'s own default re-queue behaviour.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Reconcile(err) => err.is_retriable,
            _ => true,
        }
    }
}

/// Infrastructure failure: transient cloud errors, Kubernetes I/O, cancellation.
/// Propagated to the informer, which re-queues with backoff.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ReconcileError {
    pub message: String,
    pub is_retriable: bool,
}

impl ReconcileError {
    pub fn retriable(message: impl Into<String>) -> Self {
        Self { message: message.into(), is_retriable: true }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), is_retriable: false }
    }
}

/// A signal that the reconciled object is in a state that should be reported on
/// its `status` rather than retried by the informer: missing parameters,
/// validation failure, a cloud rejection with business meaning.
#[derive(Error, Debug, Clone)]
#[error("{reason}: {message}")]
pub struct ResourceStatusError {
    pub condition_type: String,
    pub reason: String,
    pub message: String,
}

impl ResourceStatusError {
    pub fn new(condition_type: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_retriable_reflects_the_wrapped_reconcile_error() {
        assert!(Error::from(ReconcileError::retriable("transient")).is_retriable());
        assert!(!Error::from(ReconcileError::permanent("permanent")).is_retriable());
    }

    #[test]
    fn is_retriable_defaults_true_for_non_reconcile_variants() {
        assert!(Error::MissingResourceNamespace.is_retriable());
        assert!(Error::from(ResourceStatusError::new("Programmed", "InvalidParameters", "bad config")).is_retriable());
    }
}
