use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use slab::Slab;

use crate::computation::{Computation, ComputationId, ComputationState, ComputedSignature};
use crate::error::{FlowError, Result};
use crate::graph::{Dependent, ValueGraph};
use crate::keypath::Keypath;
use crate::scheduler::{
    BatchHandle, FlushReport, FlushWork, QueuedShuffle, Scheduler, SectionDirt,
    UnresolvedDependency,
};
use crate::section::{RepeatedSection, SectionHandle, SectionId, ShuffleMapping, Template};
use crate::tracer::{NoopTracer, Tracer};
use crate::value::Value;

/// Default bound on cascading flush passes.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 16;

/// The runtime owns the value graph, every computation and section, and the scheduler.
///
/// This is cheap to clone - all data is behind `Arc`.
///
/// # Example
///
/// ```
/// use render_flow::{Runtime, Value};
///
/// let runtime = Runtime::new();
/// runtime.set("user.name", Value::from("ada")).unwrap();
/// assert_eq!(runtime.get("user.name"), Some(Value::from("ada")));
///
/// // Writes inside a batch are flushed once, when the batch ends.
/// let report = runtime.batch(|rt| {
///     rt.set("a", Value::from(1)).unwrap();
///     rt.set("b", Value::from(2)).unwrap();
/// });
/// assert_eq!(runtime.get("b"), Some(Value::from(2)));
/// # let _ = report;
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    tracer: Box<dyn Tracer>,
    config: Config,
}

#[derive(Debug, Clone)]
struct Config {
    debug: bool,
    max_flush_passes: usize,
}

pub(crate) struct State {
    pub graph: ValueGraph,
    pub computations: Slab<Computation>,
    pub computed: HashMap<Keypath, ComputationId>,
    /// Declared computations not yet accessed.
    pub signatures: HashMap<Keypath, ComputedSignature>,
    pub scheduler: Scheduler,
    pub sections: Slab<Weak<Mutex<RepeatedSection>>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Runtime")
            .field("computations", &state.computations.len())
            .field("sections", &state.sections.len())
            .field("debug", &self.inner.config.debug)
            .finish()
    }
}

impl Runtime {
    /// Create a new runtime with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use render_flow::{Runtime, TracingTracer};
    ///
    /// let runtime = Runtime::builder()
    ///     .debug(true)
    ///     .tracer(TracingTracer)
    ///     .max_flush_passes(4)
    ///     .build();
    /// # let _ = runtime;
    /// ```
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    pub(crate) fn tracer(&self) -> &dyn Tracer {
        &*self.inner.tracer
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.inner.config.debug
    }
}

// ============================================================================
// Values
// ============================================================================

impl Runtime {
    /// Read the value at `keypath`.
    ///
    /// Computed keypaths, and keypaths below one, read through the computation.
    pub fn get(&self, keypath: impl Into<Keypath>) -> Option<Value> {
        let keypath = keypath.into();
        if let Some((id, owner, initial)) = self.locate_computation(&keypath) {
            if let Some(initial) = initial {
                self.apply_initial(id, &owner, initial);
            }
            let value = self.evaluate(id)?;
            if owner == keypath {
                return Some(value);
            }
            let mut current = &value;
            for key in keypath.keys().skip(owner.depth()) {
                current = current.child(&key)?;
            }
            return Some(current.clone());
        }
        self.lock().graph.get(&keypath).cloned()
    }

    /// Write `value` at `keypath`.
    ///
    /// Writing a computed keypath calls its setter. Outside a batch the write
    /// opens and ends one of its own, so dependent sections update before this returns.
    /// A [`WILDCARD`](crate::WILDCARD) segment writes every existing child in one batch.
    pub fn set(&self, keypath: impl Into<Keypath>, value: Value) -> Result<()> {
        let keypath = keypath.into();
        if keypath.is_pattern() {
            let targets = self.lock().graph.matching_keypaths(&keypath);
            let _batch = self.start_batch();
            for target in targets {
                self.set(target, value.clone())?;
            }
            return Ok(());
        }
        let computed = self.lock().ensure_computation(&keypath);
        if let Some((id, initial)) = computed {
            if let Some(initial) = initial {
                self.apply_initial(id, &keypath, initial);
            }
            return self.assign(id, value);
        }

        let batch = self.start_batch();
        {
            let mut state = self.lock();
            let outcome = state.graph.set(&keypath, value)?;
            if outcome.structural {
                state.scheduler.note_structural();
            }
            if outcome.changed {
                state.propagate(&keypath, self);
            }
        }
        drop(batch);
        Ok(())
    }

    /// Write several keypaths in one batch.
    pub fn set_many<I, K>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Keypath>,
    {
        let batch = self.start_batch();
        for (keypath, value) in pairs {
            self.set(keypath, value)?;
        }
        drop(batch);
        Ok(())
    }

    /// Mark `keypath` as changed.
    ///
    /// For a computed keypath this dirties the computation without recomputing
    /// it; otherwise every dependent is notified as if the value had been replaced.
    pub fn invalidate(&self, keypath: impl Into<Keypath>) {
        let keypath = keypath.into();
        let id = self.lock().computed.get(&keypath).copied();
        match id {
            Some(id) => self.mark_computation_dirty(id),
            None => {
                let batch = self.start_batch();
                self.lock().propagate(&keypath, self);
                drop(batch);
            }
        }
    }

    fn locate_computation(&self, keypath: &Keypath) -> Option<(ComputationId, Keypath, Option<Value>)> {
        let mut state = self.lock();
        if state.computed.is_empty() && state.signatures.is_empty() {
            return None;
        }
        for candidate in std::iter::once(keypath.clone()).chain(keypath.ancestors()) {
            if candidate.is_root() {
                break;
            }
            if let Some((id, initial)) = state.ensure_computation(&candidate) {
                return Some((id, candidate, initial));
            }
        }
        None
    }

    fn apply_initial(&self, id: ComputationId, keypath: &Keypath, initial: Value) {
        if let Err(error) = self.assign(id, initial) {
            tracing::warn!(%keypath, %error, "failed to apply initial computed value");
        }
    }
}

// ============================================================================
// Computations
// ============================================================================

impl Runtime {
    /// Declare a computed keypath. The computation is created on first access.
    pub fn declare_computed(
        &self,
        keypath: impl Into<Keypath>,
        signature: ComputedSignature,
    ) -> Result<()> {
        let keypath = keypath.into();
        if keypath.is_root() {
            return Err(FlowError::InvalidRoot);
        }
        let batch = self.start_batch();
        {
            let mut state = self.lock();
            if state.computed.contains_key(&keypath) || state.signatures.contains_key(&keypath) {
                return Err(FlowError::AlreadyComputed { keypath });
            }
            state.signatures.insert(keypath.clone(), signature);
            // dependencies waiting on this keypath can register now
            state.scheduler.note_structural();
            state.propagate(&keypath, self);
        }
        drop(batch);
        Ok(())
    }

    /// Destroy the computation on `keypath`, releasing all of its registrations.
    ///
    /// Returns false if `keypath` was not computed.
    pub fn teardown(&self, keypath: impl Into<Keypath>) -> bool {
        let keypath = keypath.into();
        let batch = self.start_batch();
        let removed = {
            let mut state = self.lock();
            let removed = state.teardown_computation(&keypath);
            if removed {
                state.propagate(&keypath, self);
            }
            removed
        };
        drop(batch);
        removed
    }

    /// State of the computation on `keypath`, if it has been created.
    pub fn computation_state(&self, keypath: impl Into<Keypath>) -> Option<ComputationState> {
        let keypath = keypath.into();
        let state = self.lock();
        let id = state.computed.get(&keypath)?;
        state.computations.get(id.0).map(|c| c.state)
    }

    /// Soft dependencies recorded by the last evaluation of `keypath`.
    pub fn soft_dependencies(&self, keypath: impl Into<Keypath>) -> Option<Vec<Keypath>> {
        let keypath = keypath.into();
        let state = self.lock();
        let id = state.computed.get(&keypath)?;
        state.computations.get(id.0).map(|c| c.soft.clone())
    }

    /// Hard dependencies declared for `keypath`.
    pub fn hard_dependencies(&self, keypath: impl Into<Keypath>) -> Option<Vec<Keypath>> {
        let keypath = keypath.into();
        let state = self.lock();
        if let Some(signature) = state.signatures.get(&keypath) {
            return Some(signature.deps.clone());
        }
        let id = state.computed.get(&keypath)?;
        state.computations.get(id.0).map(|c| c.hard.clone())
    }

    /// Dependencies waiting for their keypath to resolve.
    pub fn unresolved_dependencies(&self) -> Vec<UnresolvedDependency> {
        self.lock().scheduler.unresolved().to_vec()
    }
}

// ============================================================================
// Array mutations
// ============================================================================

impl Runtime {
    /// Remove `delete_count` members at `start` and insert `items` there.
    ///
    /// Sections bound to `keypath` receive the matching shuffle and move their
    /// iterations instead of rebuilding them. Returns the removed members.
    pub fn splice(
        &self,
        keypath: impl Into<Keypath>,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let keypath = keypath.into();
        let mut list = self.read_list(&keypath)?;
        let mapping = ShuffleMapping::splice(list.len(), start, delete_count, items.len());
        let start = start.min(list.len());
        let end = start.saturating_add(delete_count).min(list.len());
        let removed: Vec<Value> = list.splice(start..end, items).collect();
        self.set_shuffled(keypath, Value::List(list), mapping, false)?;
        Ok(removed)
    }

    /// Append `items`. Returns the new length.
    pub fn push(&self, keypath: impl Into<Keypath>, items: Vec<Value>) -> Result<usize> {
        let keypath = keypath.into();
        let len = self.read_list(&keypath)?.len();
        let added = items.len();
        self.splice(keypath, len, 0, items)?;
        Ok(len + added)
    }

    /// Remove and return the last member.
    pub fn pop(&self, keypath: impl Into<Keypath>) -> Result<Option<Value>> {
        let keypath = keypath.into();
        let len = self.read_list(&keypath)?.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(self.splice(keypath, len - 1, 1, Vec::new())?.pop())
    }

    /// Insert `items` at the front. Returns the new length.
    pub fn unshift(&self, keypath: impl Into<Keypath>, items: Vec<Value>) -> Result<usize> {
        let keypath = keypath.into();
        let len = self.read_list(&keypath)?.len();
        let added = items.len();
        self.splice(keypath, 0, 0, items)?;
        Ok(len + added)
    }

    /// Remove and return the first member.
    pub fn shift(&self, keypath: impl Into<Keypath>) -> Result<Option<Value>> {
        let keypath = keypath.into();
        if self.read_list(&keypath)?.is_empty() {
            return Ok(None);
        }
        Ok(self.splice(keypath, 0, 1, Vec::new())?.into_iter().next())
    }

    /// Reorder the list at `keypath` by `mapping`.
    ///
    /// Removed members are dropped; new positions without a source hold `Null`.
    pub fn permute(&self, keypath: impl Into<Keypath>, mapping: ShuffleMapping) -> Result<()> {
        let keypath = keypath.into();
        let list = self.read_list(&keypath)?;
        if mapping.old_len() != list.len() {
            return Err(FlowError::MalformedShuffle {
                reason: format!(
                    "mapping covers {} positions but `{}` holds {}",
                    mapping.old_len(),
                    keypath,
                    list.len()
                ),
            });
        }
        let mut slots: Vec<Option<Value>> = list.into_iter().map(Some).collect();
        let next: Vec<Value> = mapping
            .inverse()
            .into_iter()
            .map(|source| {
                source
                    .and_then(|old| slots.get_mut(old).and_then(Option::take))
                    .unwrap_or_default()
            })
            .collect();
        self.set_shuffled(keypath, Value::List(next), mapping, false)
    }

    /// Replace the list at `keypath` with `items`, keeping iterations of equal members.
    ///
    /// Each old member is matched to the first unmatched equal new member.
    /// Surviving iterations are rebound even when their position is unchanged.
    pub fn merge(&self, keypath: impl Into<Keypath>, items: Vec<Value>) -> Result<()> {
        let keypath = keypath.into();
        let old = self.read_list(&keypath)?;
        let mut matched = vec![false; items.len()];
        let entries = old
            .iter()
            .map(|member| {
                let found = (0..items.len()).find(|&i| !matched[i] && items[i] == *member);
                if let Some(i) = found {
                    matched[i] = true;
                }
                found
            })
            .collect();
        let mapping = ShuffleMapping::new(entries, items.len())?;
        self.set_shuffled(keypath, Value::List(items), mapping, true)
    }

    fn read_list(&self, keypath: &Keypath) -> Result<Vec<Value>> {
        match self.get(keypath) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(items),
            Some(_) => Err(FlowError::NotOrdered {
                keypath: keypath.clone(),
            }),
        }
    }

    fn set_shuffled(
        &self,
        keypath: Keypath,
        value: Value,
        mapping: ShuffleMapping,
        merge: bool,
    ) -> Result<()> {
        let batch = self.start_batch();
        self.set(&keypath, value)?;
        self.lock().scheduler.queue_shuffle(keypath, mapping, merge);
        drop(batch);
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

impl Runtime {
    /// Bind a repeated section to `context`.
    ///
    /// Iterations are created immediately; call
    /// [`SectionHandle::render`] to produce output. The section updates at the
    /// end of every batch that changes its value.
    pub fn repeated_section(
        &self,
        context: impl Into<Keypath>,
        template: impl Template + 'static,
    ) -> SectionHandle {
        let context = context.into();
        let template: Arc<dyn Template> = Arc::new(template);
        let (id, section) = {
            let mut state = self.lock();
            let entry = state.sections.vacant_entry();
            let id = SectionId(entry.key());
            let section = Arc::new(Mutex::new(RepeatedSection::new(
                id,
                self.clone(),
                context.clone(),
                template,
            )));
            entry.insert(Arc::downgrade(&section));
            state.graph.register(&context, Dependent::Section(id));
            (id, section)
        };
        let batch = self.start_batch();
        section.lock().bind();
        drop(batch);
        SectionHandle::new(id, self.clone(), section)
    }

    fn section(&self, id: SectionId) -> Option<Arc<Mutex<RepeatedSection>>> {
        self.lock().sections.get(id.0).and_then(Weak::upgrade)
    }

    fn sections_at(&self, keypath: &Keypath) -> Vec<SectionId> {
        self.lock()
            .graph
            .dependents_of(keypath)
            .into_iter()
            .filter_map(|dependent| match dependent {
                Dependent::Section(id) => Some(id),
                Dependent::Computation(_) => None,
            })
            .collect()
    }
}

// ============================================================================
// Batches
// ============================================================================

impl Runtime {
    /// Open a batch. Work is flushed when the outermost batch ends.
    pub fn start_batch(&self) -> BatchHandle {
        self.lock().scheduler.start();
        BatchHandle::new(self.clone())
    }

    /// Run `f` inside a batch and return the flush report if it was the outermost one.
    pub fn batch<F>(&self, f: F) -> Option<FlushReport>
    where
        F: FnOnce(&Runtime),
    {
        let batch = self.start_batch();
        f(self);
        batch.end()
    }

    /// Returns true while a batch is open or being flushed.
    pub fn in_batch(&self) -> bool {
        self.lock().scheduler.in_batch()
    }

    pub(crate) fn end_batch(&self) -> Option<FlushReport> {
        let must_flush = self.lock().scheduler.end();
        must_flush.then(|| self.flush())
    }

    pub(crate) fn abandon_batch(&self) {
        self.lock().scheduler.abandon();
    }

    fn flush(&self) -> FlushReport {
        let max_passes = self.inner.config.max_flush_passes;
        let mut report = FlushReport::default();
        let mut guard = FlushGuard {
            runtime: self,
            finished: false,
        };
        loop {
            let work = self.lock().scheduler.take_work();
            if work.is_empty() {
                break;
            }
            if report.passes >= max_passes {
                tracing::warn!(passes = report.passes, "flush did not settle, dropping pending work");
                self.lock().scheduler.discard_work();
                break;
            }
            report.passes += 1;
            let FlushWork {
                structural,
                shuffles,
                mut sections,
            } = work;

            if structural {
                report.unresolved_resolved += self.lock().retry_unresolved(self);
            }

            for QueuedShuffle {
                keypath,
                mapping,
                merge,
            } in shuffles
            {
                for id in self.sections_at(&keypath) {
                    let Some(section) = self.section(id) else {
                        continue;
                    };
                    if let Err(error) = section.lock().queue_shuffle(mapping.clone(), merge) {
                        tracing::warn!(%keypath, %error, "discarding shuffle");
                    }
                    if !sections.iter().any(|(queued, _)| *queued == id) {
                        sections.push((id, SectionDirt::default()));
                    }
                }
            }
            sections.sort_by_key(|(id, _)| *id);

            for (id, dirt) in sections {
                let Some(section) = self.section(id) else {
                    continue;
                };
                let touched = (!dirt.full && !dirt.touched.is_empty()).then_some(dirt.touched.as_slice());
                section.lock().update(touched);
                report.sections_updated += 1;
            }
        }
        guard.finished = true;
        report.invalidated = self.lock().scheduler.finish_flush();
        tracing::debug!(?report, "batch flushed");
        self.tracer().on_batch_flushed(&report);
        report
    }
}

/// Reopens the scheduler if a render unit panics mid-flush.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
    finished: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("flush unwound, dropping pending work");
            self.runtime.lock().scheduler.abort_flush();
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Runtime`] with customizable settings.
pub struct RuntimeBuilder {
    debug: bool,
    tracer: Box<dyn Tracer>,
    max_flush_passes: usize,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            debug: false,
            tracer: Box::new(NoopTracer),
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
        }
    }

    /// Log getter faults with `tracing::warn!`. Off by default.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the tracer receiving runtime events.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Bound the number of passes a single flush may run.
    ///
    /// Render units that keep writing during updates would otherwise cascade
    /// forever. Values below one are raised to one.
    pub fn max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    /// Build the runtime with the configured settings.
    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    graph: ValueGraph::new(),
                    computations: Slab::new(),
                    computed: HashMap::new(),
                    signatures: HashMap::new(),
                    scheduler: Scheduler::default(),
                    sections: Slab::new(),
                }),
                tracer: self.tracer,
                config: Config {
                    debug: self.debug,
                    max_flush_passes: self.max_flush_passes,
                },
            }),
        }
    }
}
