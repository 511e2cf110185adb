use std::sync::atomic::{AtomicU64, Ordering};

use crate::cell::ReactiveCell;
use crate::keypath::{Key, Keypath};
use crate::output::{NodeId, Output};
use crate::runtime::Runtime;

use super::{IterationContext, IterationInfo, RenderUnit, Template};

/// Identity of an iteration. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterationId(u64);

static NEXT_ITERATION_ID: AtomicU64 = AtomicU64::new(1);

/// One render unit bound to one member.
pub(crate) struct Iteration {
    pub id: IterationId,
    pub key: Key,
    pub index: usize,
    pub context: IterationContext,
    pub unit: Box<dyn RenderUnit>,
    pub bound: bool,
    pub rendered: bool,
    /// Rebind on the next reposition even if the keypath is unchanged.
    pub should_rebind: bool,
}

impl Iteration {
    pub fn new(
        runtime: &Runtime,
        parent: &Keypath,
        template: &dyn Template,
        key: Key,
        index: usize,
    ) -> Self {
        let context = IterationContext {
            runtime: runtime.clone(),
            keypath: parent.join(&key),
            index: ReactiveCell::new(index),
            key: ReactiveCell::new(key.clone()),
        };
        let mut unit = template.instantiate(&context);
        unit.bind(&context);
        Self {
            id: IterationId(NEXT_ITERATION_ID.fetch_add(1, Ordering::Relaxed)),
            key,
            index,
            context,
            unit,
            bound: true,
            rendered: false,
            should_rebind: false,
        }
    }

    pub fn info(&self) -> IterationInfo {
        IterationInfo {
            id: self.id,
            key: self.key.clone(),
            index: self.index,
            keypath: self.context.keypath.clone(),
        }
    }

    /// Reassign key and position, force-setting both cells.
    ///
    /// The unit is rebound when its keypath changed or a merge asked for it.
    pub fn swizzle(&mut self, parent: &Keypath, key: Key, index: usize) {
        let keypath = parent.join(&key);
        let rebind = self.should_rebind || keypath != self.context.keypath;
        self.key = key.clone();
        self.index = index;
        self.context.keypath = keypath;
        self.context.key.apply(key);
        self.context.index.apply(index);
        if rebind && self.bound {
            self.unit.bind(&self.context);
        }
        self.should_rebind = false;
    }

    /// Move to a new position without changing the key.
    pub fn reindex(&mut self, index: usize) {
        if self.index != index {
            self.index = index;
            self.context.index.apply(index);
        }
    }

    pub fn rebind(&mut self) {
        self.unit.bind(&self.context);
        self.bound = true;
    }

    pub fn unbind(&mut self) {
        if self.bound {
            self.unit.unbind();
            self.bound = false;
        }
    }

    pub fn update(&mut self) {
        if self.bound {
            self.unit.update();
        }
    }

    pub fn render(&mut self, output: &mut dyn Output, anchor: Option<NodeId>) {
        self.unit.render(output, anchor);
        self.rendered = true;
    }

    pub fn unrender(&mut self, output: &mut dyn Output, destroy: bool) {
        if self.rendered {
            self.unit.unrender(output, destroy);
            self.rendered = false;
        }
    }

    /// Relocate this unit's nodes to sit before `anchor`.
    pub fn move_before(&mut self, output: &mut dyn Output, anchor: Option<NodeId>) {
        if !self.rendered {
            return;
        }
        let nodes = self.unit.detach(output);
        output.insert_before(nodes, anchor);
    }

    pub fn first_node(&self) -> Option<NodeId> {
        if self.rendered {
            self.unit.first_node(false)
        } else {
            None
        }
    }

    /// Unbind and, if rendered into `output`, destroy.
    pub fn teardown(&mut self, output: Option<&mut (dyn Output + 'static)>) {
        self.unbind();
        if let Some(output) = output {
            self.unrender(output, true);
        }
    }
}
