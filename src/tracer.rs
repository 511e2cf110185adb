//! Tracer trait for observing the runtime.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! computation, scheduling and reconciliation. The default [`NoopTracer`]
//! discards everything; [`TracingTracer`] forwards events to the `tracing` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use render_flow::{EvaluationResult, Keypath, Runtime, Tracer};
//!
//! #[derive(Default)]
//! struct CountRecomputes(AtomicUsize);
//!
//! impl Tracer for CountRecomputes {
//!     fn on_computation_end(&self, _keypath: &Keypath, result: &EvaluationResult) {
//!         if *result == EvaluationResult::Recomputed {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//!
//! let tracer = Arc::new(CountRecomputes::default());
//! let runtime = Runtime::builder().tracer(tracer.clone()).build();
//! ```

use std::sync::Arc;

use crate::keypath::{Key, Keypath};
use crate::scheduler::FlushReport;
use crate::section::SectionId;

/// Classification of a single `get()` on a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationResult {
    /// The getter ran and produced a value.
    Recomputed,
    /// The computation was dirty but every dependency still equals its snapshot.
    Unchanged,
    /// The cached value was clean.
    CacheHit,
    /// The computation was already evaluating; the nested read saw an absent value.
    Reentrant,
    /// The getter raised a fault; the cached value is now absent.
    Fault {
        /// Rendered fault message.
        message: String,
    },
}

/// Why a computation was marked dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    /// A keypath the computation depends on changed.
    DependencyChanged {
        /// The changed keypath.
        dependency: Keypath,
    },
    /// A previously unresolved dependency now resolves.
    DependencyResolved {
        /// The resolved keypath.
        dependency: Keypath,
    },
    /// `invalidate()` was called directly.
    Manual,
}

/// Tracer trait for observing the runtime.
///
/// All methods have default empty implementations, so you only need to
/// override the events you're interested in.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` because the runtime handle is.
/// Hooks may run while the runtime's tables are locked, so they must not
/// call back into the [`Runtime`](crate::Runtime).
pub trait Tracer: Send + Sync + 'static {
    /// Called before a dirty computation decides whether to recompute.
    #[inline]
    fn on_computation_start(&self, _keypath: &Keypath) {}

    /// Called when `get()` on a computation returns.
    #[inline]
    fn on_computation_end(&self, _keypath: &Keypath, _result: &EvaluationResult) {}

    /// Called when a computation is marked dirty.
    #[inline]
    fn on_computation_invalidated(&self, _keypath: &Keypath, _reason: &InvalidationReason) {}

    /// Called when a soft dependency is registered.
    #[inline]
    fn on_dependency_registered(&self, _owner: &Keypath, _dependency: &Keypath) {}

    /// Called when a soft dependency is released.
    #[inline]
    fn on_dependency_unregistered(&self, _owner: &Keypath, _dependency: &Keypath) {}

    /// Called when a dependency does not resolve and is queued for retry.
    #[inline]
    fn on_dependency_unresolved(&self, _owner: &Keypath, _dependency: &Keypath) {}

    /// Called when the outermost batch finishes flushing.
    #[inline]
    fn on_batch_flushed(&self, _report: &FlushReport) {}

    /// Called when a section creates an iteration.
    #[inline]
    fn on_iteration_created(&self, _section: SectionId, _key: &Key, _index: usize) {}

    /// Called when a section tears an iteration down.
    #[inline]
    fn on_iteration_destroyed(&self, _section: SectionId, _key: &Key) {}

    /// Called when a section relocates an iteration's rendered output.
    #[inline]
    fn on_iteration_moved(&self, _section: SectionId, _from: usize, _to: usize) {}
}

impl<T: Tracer> Tracer for Arc<T> {
    fn on_computation_start(&self, keypath: &Keypath) {
        (**self).on_computation_start(keypath)
    }

    fn on_computation_end(&self, keypath: &Keypath, result: &EvaluationResult) {
        (**self).on_computation_end(keypath, result)
    }

    fn on_computation_invalidated(&self, keypath: &Keypath, reason: &InvalidationReason) {
        (**self).on_computation_invalidated(keypath, reason)
    }

    fn on_dependency_registered(&self, owner: &Keypath, dependency: &Keypath) {
        (**self).on_dependency_registered(owner, dependency)
    }

    fn on_dependency_unregistered(&self, owner: &Keypath, dependency: &Keypath) {
        (**self).on_dependency_unregistered(owner, dependency)
    }

    fn on_dependency_unresolved(&self, owner: &Keypath, dependency: &Keypath) {
        (**self).on_dependency_unresolved(owner, dependency)
    }

    fn on_batch_flushed(&self, report: &FlushReport) {
        (**self).on_batch_flushed(report)
    }

    fn on_iteration_created(&self, section: SectionId, key: &Key, index: usize) {
        (**self).on_iteration_created(section, key, index)
    }

    fn on_iteration_destroyed(&self, section: SectionId, key: &Key) {
        (**self).on_iteration_destroyed(section, key)
    }

    fn on_iteration_moved(&self, section: SectionId, from: usize, to: usize) {
        (**self).on_iteration_moved(section, from, to)
    }
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`Runtime`](crate::Runtime).
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Tracer that forwards every event to the `tracing` crate at `trace` level.
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn on_computation_start(&self, keypath: &Keypath) {
        tracing::trace!(%keypath, "computation start");
    }

    fn on_computation_end(&self, keypath: &Keypath, result: &EvaluationResult) {
        tracing::trace!(%keypath, ?result, "computation end");
    }

    fn on_computation_invalidated(&self, keypath: &Keypath, reason: &InvalidationReason) {
        tracing::trace!(%keypath, ?reason, "computation invalidated");
    }

    fn on_dependency_registered(&self, owner: &Keypath, dependency: &Keypath) {
        tracing::trace!(%owner, %dependency, "dependency registered");
    }

    fn on_dependency_unregistered(&self, owner: &Keypath, dependency: &Keypath) {
        tracing::trace!(%owner, %dependency, "dependency unregistered");
    }

    fn on_dependency_unresolved(&self, owner: &Keypath, dependency: &Keypath) {
        tracing::trace!(%owner, %dependency, "dependency unresolved");
    }

    fn on_batch_flushed(&self, report: &FlushReport) {
        tracing::trace!(?report, "batch flushed");
    }

    fn on_iteration_created(&self, section: SectionId, key: &Key, index: usize) {
        tracing::trace!(?section, %key, index, "iteration created");
    }

    fn on_iteration_destroyed(&self, section: SectionId, key: &Key) {
        tracing::trace!(?section, %key, "iteration destroyed");
    }

    fn on_iteration_moved(&self, section: SectionId, from: usize, to: usize) {
        tracing::trace!(?section, from, to, "iteration moved");
    }
}
