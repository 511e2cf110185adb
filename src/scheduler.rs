//! Batching scheduler: groups mutations into one unit of work.
//!
//! Writes apply to the value graph immediately and dirty dependent
//! computations on the spot. Everything else is queued here and flushed once
//! when the outermost batch ends:
//!
//! 1. unresolved dependencies are retried if any write changed graph structure,
//! 2. queued shuffles are handed to the sections bound at the mutated keypath,
//! 3. dirty sections run their update pass in registration order.
//!
//! A flush repeats while the previous pass queued more work, up to
//! [`RuntimeBuilder::max_flush_passes`](crate::RuntimeBuilder::max_flush_passes).

use indexmap::IndexMap;

use crate::computation::ComputationId;
use crate::keypath::{Key, Keypath};
use crate::runtime::Runtime;
use crate::section::{SectionId, ShuffleMapping};

/// A dependency that could not be registered because its keypath does not resolve yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnresolvedDependency {
    /// The computation waiting on the dependency.
    pub computation: ComputationId,
    /// The keypath that did not resolve.
    pub keypath: Keypath,
}

/// Pending update work for one section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SectionDirt {
    /// The bound value was replaced, so every iteration needs refreshing.
    pub full: bool,
    /// Positions touched by nested writes since the last pass.
    pub touched: Vec<usize>,
}

impl SectionDirt {
    fn note(&mut self, touched: Option<&Key>) {
        match touched.and_then(Key::as_index) {
            Some(position) if !self.full => {
                if !self.touched.contains(&position) {
                    self.touched.push(position);
                }
            }
            Some(_) => {}
            None if touched.is_some() => {
                // keyed member changed; keyed sections always refresh every survivor
                self.full = true;
            }
            None => self.full = true,
        }
        if self.full {
            self.touched.clear();
        }
    }
}

/// Summary of a flush, returned by the outermost [`BatchHandle::end`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of flush passes run.
    pub passes: usize,
    /// Computations dirtied during the batch.
    pub invalidated: usize,
    /// Section update passes run.
    pub sections_updated: usize,
    /// Unresolved dependencies that resolved and were registered.
    pub unresolved_resolved: usize,
}

/// Scheduler state, owned by the runtime and guarded by its lock.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    depth: usize,
    flushing: bool,
    structural: bool,
    invalidated: usize,
    unresolved: Vec<UnresolvedDependency>,
    shuffles: Vec<QueuedShuffle>,
    sections: IndexMap<SectionId, SectionDirt>,
}

/// A shuffle produced by an array mutation, addressed to sections bound at `keypath`.
#[derive(Debug, Clone)]
pub(crate) struct QueuedShuffle {
    pub keypath: Keypath,
    pub mapping: ShuffleMapping,
    pub merge: bool,
}

/// Work taken out of the scheduler for one flush pass.
#[derive(Debug, Default)]
pub(crate) struct FlushWork {
    pub structural: bool,
    pub shuffles: Vec<QueuedShuffle>,
    pub sections: Vec<(SectionId, SectionDirt)>,
}

impl FlushWork {
    pub fn is_empty(&self) -> bool {
        !self.structural && self.shuffles.is_empty() && self.sections.is_empty()
    }
}

impl Scheduler {
    pub fn start(&mut self) {
        self.depth += 1;
    }

    /// Leave one batch level. Returns true if the caller must flush.
    pub fn end(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 && !self.flushing {
            self.flushing = true;
            true
        } else {
            false
        }
    }

    pub fn finish_flush(&mut self) -> usize {
        self.flushing = false;
        std::mem::take(&mut self.invalidated)
    }

    /// Leave a flush that unwound before finishing. Pending work is dropped.
    pub fn abort_flush(&mut self) {
        self.flushing = false;
        self.invalidated = 0;
        self.discard_work();
    }

    /// Leave one batch level without flushing.
    pub fn abandon(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn in_batch(&self) -> bool {
        self.depth > 0 || self.flushing
    }

    pub fn note_structural(&mut self) {
        self.structural = true;
    }

    pub fn note_invalidated(&mut self) {
        self.invalidated += 1;
    }

    pub fn mark_section(&mut self, section: SectionId, touched: Option<&Key>) {
        self.sections.entry(section).or_default().note(touched);
    }

    pub fn queue_shuffle(&mut self, keypath: Keypath, mapping: ShuffleMapping, merge: bool) {
        self.shuffles.push(QueuedShuffle {
            keypath,
            mapping,
            merge,
        });
    }

    pub fn add_unresolved(&mut self, dependency: UnresolvedDependency) -> bool {
        if self.unresolved.contains(&dependency) {
            return false;
        }
        self.unresolved.push(dependency);
        true
    }

    pub fn remove_unresolved(&mut self, computation: ComputationId, keypath: &Keypath) {
        self.unresolved
            .retain(|d| !(d.computation == computation && &d.keypath == keypath));
    }

    pub fn remove_unresolved_for(&mut self, computation: ComputationId) {
        self.unresolved.retain(|d| d.computation != computation);
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    /// Take out the entries `resolves` accepts, keeping the rest queued.
    pub fn drain_resolved(
        &mut self,
        mut resolves: impl FnMut(&UnresolvedDependency) -> bool,
    ) -> Vec<UnresolvedDependency> {
        let (resolved, pending) = std::mem::take(&mut self.unresolved)
            .into_iter()
            .partition(|d| resolves(d));
        self.unresolved = pending;
        resolved
    }

    pub fn forget_section(&mut self, section: SectionId) {
        self.sections.shift_remove(&section);
    }

    pub fn take_work(&mut self) -> FlushWork {
        let mut sections: Vec<_> = self.sections.drain(..).collect();
        sections.sort_by_key(|(id, _)| *id);
        FlushWork {
            structural: std::mem::take(&mut self.structural),
            shuffles: std::mem::take(&mut self.shuffles),
            sections,
        }
    }

    pub fn discard_work(&mut self) {
        self.structural = false;
        self.shuffles.clear();
        self.sections.clear();
    }
}

/// Handle to an open batch.
///
/// Ending the outermost batch flushes pending work. Dropping a handle without
/// calling [`end`](BatchHandle::end) ends it as well.
#[must_use = "a batch flushes when its handle is ended or dropped"]
pub struct BatchHandle {
    runtime: Runtime,
    ended: bool,
}

impl BatchHandle {
    pub(crate) fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            ended: false,
        }
    }

    /// End the batch. Returns the flush report if this was the outermost batch.
    pub fn end(mut self) -> Option<FlushReport> {
        self.ended = true;
        self.runtime.end_batch()
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if !self.ended {
            self.ended = true;
            if std::thread::panicking() {
                self.runtime.abandon_batch();
            } else {
                let _ = self.runtime.end_batch();
            }
        }
    }
}
