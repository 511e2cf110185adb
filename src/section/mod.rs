//! Repeated sections: one render unit per member of a collection.
//!
//! A section is bound to a keypath whose value is an ordered list, a keyed
//! mapping or anything else (which renders nothing). It keeps one
//! [`Iteration`](iteration) per member and reconciles that list on every update,
//! either by generic diffing or, when the mutation supplied a
//! [`ShuffleMapping`], by moving existing iterations into their new positions.

mod iteration;
mod reconcile;
mod shuffle;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::{IndexCell, KeyCell, ReactiveCell};
use crate::error::Result;
use crate::graph::Dependent;
use crate::keypath::{Key, Keypath};
use crate::output::{NodeId, Output, OutputNode, SharedOutput};
use crate::runtime::Runtime;
use crate::value::{Shape, Value};

pub use iteration::IterationId;
pub use shuffle::ShuffleMapping;

use iteration::Iteration;

/// Identifier of a repeated section inside one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub(crate) usize);

/// What an iteration's render unit is bound to.
#[derive(Clone)]
pub struct IterationContext {
    runtime: Runtime,
    keypath: Keypath,
    index: IndexCell,
    key: KeyCell,
}

impl IterationContext {
    /// The member's own keypath.
    pub fn keypath(&self) -> &Keypath {
        &self.keypath
    }

    /// Current key of the member.
    pub fn key(&self) -> Key {
        self.key.get()
    }

    /// Current position of the member.
    pub fn index(&self) -> usize {
        self.index.get()
    }

    /// Cell holding the current position.
    pub fn index_cell(&self) -> &IndexCell {
        &self.index
    }

    /// Cell holding the current key.
    pub fn key_cell(&self) -> &KeyCell {
        &self.key
    }

    /// Read the member's current value.
    pub fn value(&self) -> Option<Value> {
        self.runtime.get(&self.keypath)
    }

    /// The runtime the section lives in.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl fmt::Debug for IterationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationContext")
            .field("keypath", &self.keypath)
            .field("key", &self.key.get())
            .field("index", &self.index.get())
            .finish()
    }
}

/// An opaque output producer bound to one member.
///
/// The section drives units only through this trait and never inspects the
/// nodes they produce.
pub trait RenderUnit: Send {
    /// Bind, or rebind, to `context`.
    fn bind(&mut self, context: &IterationContext);

    /// Release everything acquired in `bind`.
    fn unbind(&mut self);

    /// Insert this unit's nodes into `output` before `anchor`.
    fn render(&mut self, output: &mut dyn Output, anchor: Option<NodeId>);

    /// Remove this unit's nodes from `output`. `destroy` means the unit will not render again.
    fn unrender(&mut self, output: &mut dyn Output, destroy: bool);

    /// Refresh from the bound member.
    fn update(&mut self);

    /// First node matching `selector`.
    fn find(&self, _selector: &str) -> Option<NodeId> {
        None
    }

    /// Push every node matching `selector` onto `found`.
    fn find_all(&self, _selector: &str, _found: &mut Vec<NodeId>) {}

    /// First node this unit has in the output.
    fn first_node(&self, skip_owner: bool) -> Option<NodeId>;

    /// Take this unit's nodes out of `output` so they can be reinserted elsewhere.
    fn detach(&mut self, output: &mut dyn Output) -> Vec<OutputNode>;

    /// Serialize this unit's output.
    fn to_string(&self, escape: bool) -> String;
}

/// Instantiates render units for a section.
///
/// Any `Fn(&IterationContext) -> Box<dyn RenderUnit>` is a template.
pub trait Template: Send + Sync {
    /// Create an unbound unit for the member described by `context`.
    fn instantiate(&self, context: &IterationContext) -> Box<dyn RenderUnit>;
}

impl<F> Template for F
where
    F: Fn(&IterationContext) -> Box<dyn RenderUnit> + Send + Sync,
{
    fn instantiate(&self, context: &IterationContext) -> Box<dyn RenderUnit> {
        self(context)
    }
}

/// Snapshot of one iteration, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationInfo {
    /// Identity of the iteration, stable across moves.
    pub id: IterationId,
    /// Current key.
    pub key: Key,
    /// Current position.
    pub index: usize,
    /// Bound keypath.
    pub keypath: Keypath,
}

#[derive(Debug, Clone)]
struct PendingShuffle {
    mapping: ShuffleMapping,
    merge: bool,
}

pub(crate) struct RepeatedSection {
    id: SectionId,
    runtime: Runtime,
    context: Keypath,
    template: Arc<dyn Template>,
    iterations: Vec<Iteration>,
    shape: Shape,
    bound: bool,
    output: Option<SharedOutput>,
    anchor: Option<NodeId>,
    pending: Option<PendingShuffle>,
    last: ReactiveCell<Option<usize>>,
}

impl RepeatedSection {
    pub fn new(id: SectionId, runtime: Runtime, context: Keypath, template: Arc<dyn Template>) -> Self {
        Self {
            id,
            runtime,
            context,
            template,
            iterations: Vec::new(),
            shape: Shape::Scalar,
            bound: false,
            output: None,
            anchor: None,
            pending: None,
            last: ReactiveCell::new(None),
        }
    }

    pub fn context(&self) -> &Keypath {
        &self.context
    }

    /// Create one iteration per member of the current value.
    pub fn bind(&mut self) {
        let value = self.runtime.get(&self.context);
        self.shape = Shape::of(value.as_ref());
        self.bound = true;
        self.iterations = match &self.shape {
            Shape::Ordered(len) => (0..*len)
                .map(|i| self.create_iteration(Key::Index(i), i))
                .collect(),
            Shape::Keyed(keys) => keys
                .iter()
                .enumerate()
                .map(|(i, name)| self.create_iteration(Key::Name(name.clone()), i))
                .collect(),
            Shape::Scalar => Vec::new(),
        };
        self.update_last();
    }

    pub fn unbind(&mut self) {
        if !self.bound {
            return;
        }
        for iteration in &mut self.iterations {
            iteration.unbind();
        }
        self.bound = false;
    }

    /// Queue a shuffle for the next update, chaining it after any queued one.
    pub fn queue_shuffle(&mut self, mapping: ShuffleMapping, merge: bool) -> Result<()> {
        let next = match &self.pending {
            Some(pending) => PendingShuffle {
                mapping: pending.mapping.compose(&mapping)?,
                merge: pending.merge || merge,
            },
            None => PendingShuffle { mapping, merge },
        };
        self.pending = Some(next);
        Ok(())
    }

    pub fn render(&mut self, output: SharedOutput, anchor: Option<NodeId>) {
        if self.output.is_some() {
            self.unrender(false);
        }
        {
            let mut target = output.lock();
            for iteration in &mut self.iterations {
                iteration.render(&mut *target, anchor);
            }
        }
        self.output = Some(output);
        self.anchor = anchor;
    }

    pub fn unrender(&mut self, destroy: bool) {
        let Some(output) = self.output.take() else {
            return;
        };
        let mut target = output.lock();
        for iteration in &mut self.iterations {
            iteration.unrender(&mut *target, destroy);
        }
        self.anchor = None;
    }

    /// Point the section at `context`. A different keypath replaces every iteration.
    pub fn rebind(&mut self, context: Keypath) {
        if context == self.context {
            for iteration in &mut self.iterations {
                iteration.rebind();
            }
            self.bound = true;
            return;
        }
        self.teardown_iterations();
        self.pending = None;
        self.context = context;
        self.bind();
        if let Some(output) = self.output.clone() {
            let mut target = output.lock();
            for iteration in &mut self.iterations {
                iteration.render(&mut *target, self.anchor);
            }
        }
    }

    /// Unbind and unrender every iteration.
    pub fn teardown_iterations(&mut self) {
        let output = self.output.clone();
        let mut target = output.as_ref().map(|o| o.lock());
        for mut iteration in std::mem::take(&mut self.iterations) {
            self.runtime
                .tracer()
                .on_iteration_destroyed(self.id, &iteration.key);
            iteration.teardown(target.as_deref_mut());
        }
        self.shape = Shape::Scalar;
    }

    pub fn find(&self, selector: &str) -> Option<NodeId> {
        self.iterations.iter().find_map(|i| i.unit.find(selector))
    }

    pub fn find_all(&self, selector: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        for iteration in &self.iterations {
            iteration.unit.find_all(selector, &mut found);
        }
        found
    }

    pub fn first_node(&self, skip_owner: bool) -> Option<NodeId> {
        if self.output.is_none() {
            return None;
        }
        self.iterations
            .iter()
            .find_map(|i| i.unit.first_node(skip_owner))
    }

    /// First node after the iteration at `position`, falling back to the section's anchor.
    pub fn find_next_node(&self, position: usize) -> Option<NodeId> {
        self.iterations
            .iter()
            .skip(position + 1)
            .find_map(|i| i.unit.first_node(true))
            .or(self.anchor)
    }

    pub fn detach(&mut self) -> Vec<OutputNode> {
        let Some(output) = self.output.clone() else {
            return Vec::new();
        };
        let mut target = output.lock();
        self.iterations
            .iter_mut()
            .flat_map(|i| i.unit.detach(&mut *target))
            .collect()
    }

    pub fn to_string(&self, escape: bool) -> String {
        self.iterations
            .iter()
            .map(|i| i.unit.to_string(escape))
            .collect()
    }

    pub fn infos(&self) -> Vec<IterationInfo> {
        self.iterations.iter().map(Iteration::info).collect()
    }

    fn create_iteration(&self, key: Key, index: usize) -> Iteration {
        self.runtime
            .tracer()
            .on_iteration_created(self.id, &key, index);
        Iteration::new(&self.runtime, &self.context, &*self.template, key, index)
    }

    fn update_last(&self) {
        let last = self.iterations.len().checked_sub(1);
        if self.last.get() != last {
            self.last.apply(last);
        }
    }
}

/// Owner handle of a repeated section.
///
/// Dropping the handle tears the section down and releases its registration.
/// Operations that change the section run inside a batch, so writes made by
/// render units are flushed once the operation returns.
pub struct SectionHandle {
    id: SectionId,
    runtime: Runtime,
    section: Arc<Mutex<RepeatedSection>>,
}

impl SectionHandle {
    pub(crate) fn new(id: SectionId, runtime: Runtime, section: Arc<Mutex<RepeatedSection>>) -> Self {
        Self {
            id,
            runtime,
            section,
        }
    }

    fn with_section<R>(&self, f: impl FnOnce(&mut RepeatedSection) -> R) -> R {
        let batch = self.runtime.start_batch();
        let result = f(&mut self.section.lock());
        drop(batch);
        result
    }

    /// Identifier of this section.
    pub fn id(&self) -> SectionId {
        self.id
    }

    /// Keypath the section is bound to.
    pub fn context(&self) -> Keypath {
        self.section.lock().context().clone()
    }

    /// Number of iterations.
    pub fn len(&self) -> usize {
        self.section.lock().iterations.len()
    }

    /// Returns true if the section has no iterations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the iterations in order.
    pub fn iterations(&self) -> Vec<IterationInfo> {
        self.section.lock().infos()
    }

    /// Binding context of the iteration at `position`.
    pub fn iteration_context(&self, position: usize) -> Option<IterationContext> {
        self.section
            .lock()
            .iterations
            .get(position)
            .map(|i| i.context.clone())
    }

    /// Cell holding the position of the last iteration, `None` when empty.
    pub fn last_index(&self) -> ReactiveCell<Option<usize>> {
        self.section.lock().last.clone()
    }

    /// Render every iteration into `output`, before `anchor`.
    pub fn render(&self, output: SharedOutput, anchor: Option<NodeId>) {
        self.with_section(|section| section.render(output, anchor));
    }

    /// Remove every iteration's output.
    pub fn unrender(&self, destroy: bool) {
        self.with_section(|section| section.unrender(destroy));
    }

    /// Unbind every iteration. The section ignores updates until rebound.
    pub fn unbind(&self) {
        self.with_section(RepeatedSection::unbind);
        let mut state = self.runtime.lock();
        state.graph.unregister_all(Dependent::Section(self.id));
        state.scheduler.forget_section(self.id);
    }

    /// Bind to `context`. Rebinding to a different keypath replaces every iteration.
    pub fn rebind(&self, context: impl Into<Keypath>) {
        let context = context.into();
        {
            let mut state = self.runtime.lock();
            state.graph.unregister_all(Dependent::Section(self.id));
            state.graph.register(&context, Dependent::Section(self.id));
        }
        self.with_section(|section| section.rebind(context));
    }

    /// Run an update pass now.
    pub fn update(&self) {
        self.with_section(|section| section.update(None));
    }

    /// Queue a shuffle. It is applied by the update pass that ends the current batch.
    pub fn shuffle(&self, mapping: ShuffleMapping, merge: bool) -> Result<()> {
        let batch = self.runtime.start_batch();
        self.section.lock().queue_shuffle(mapping, merge)?;
        self.runtime.lock().scheduler.mark_section(self.id, None);
        drop(batch);
        Ok(())
    }

    /// First node matching `selector`.
    pub fn find(&self, selector: &str) -> Option<NodeId> {
        self.section.lock().find(selector)
    }

    /// Every node matching `selector`, in iteration order.
    pub fn find_all(&self, selector: &str) -> Vec<NodeId> {
        self.section.lock().find_all(selector)
    }

    /// First rendered node of the section.
    pub fn first_node(&self, skip_owner: bool) -> Option<NodeId> {
        self.section.lock().first_node(skip_owner)
    }

    /// Node that follows the iteration at `position` in the output.
    pub fn find_next_node(&self, position: usize) -> Option<NodeId> {
        self.section.lock().find_next_node(position)
    }

    /// Take every iteration's nodes out of the output, in order.
    pub fn detach(&self) -> Vec<OutputNode> {
        self.with_section(RepeatedSection::detach)
    }

    /// Serialize every iteration's output, in order.
    pub fn to_string(&self, escape: bool) -> String {
        self.section.lock().to_string(escape)
    }
}

impl fmt::Debug for SectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let section = self.section.lock();
        f.debug_struct("SectionHandle")
            .field("id", &self.id)
            .field("context", &section.context)
            .field("iterations", &section.iterations.len())
            .finish()
    }
}

impl Drop for SectionHandle {
    fn drop(&mut self) {
        let batch = self.runtime.start_batch();
        {
            let mut state = self.runtime.lock();
            state.graph.unregister_all(Dependent::Section(self.id));
            state.scheduler.forget_section(self.id);
            state.sections.try_remove(self.id.0);
        }
        {
            let mut section = self.section.lock();
            section.unbind();
            section.teardown_iterations();
            section.output = None;
        }
        drop(batch);
    }
}
