//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use render_flow::{
    IterationContext, Keypath, NodeId, NodeList, Output, OutputNode, RenderUnit, Runtime,
    SectionHandle, Value,
};

/// Everything the tally units did, shared across all units of one template.
#[derive(Default)]
pub struct Tally {
    pub created: Mutex<usize>,
    pub destroyed: Mutex<usize>,
    pub binds: Mutex<Vec<Keypath>>,
    pub updates: Mutex<Vec<Keypath>>,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        *self.created.lock()
    }

    pub fn destroyed(&self) -> usize {
        *self.destroyed.lock()
    }

    pub fn binds(&self) -> usize {
        self.binds.lock().len()
    }

    pub fn take_updates(&self) -> Vec<Keypath> {
        std::mem::take(&mut *self.updates.lock())
    }
}

/// Renders one node whose text is the member's value at render time.
pub struct TallyUnit {
    tally: Arc<Tally>,
    context: Option<IterationContext>,
    node: Option<NodeId>,
    text: String,
}

impl TallyUnit {
    pub fn new(tally: Arc<Tally>) -> Self {
        *tally.created.lock() += 1;
        Self {
            tally,
            context: None,
            node: None,
            text: String::new(),
        }
    }

    fn label(&self) -> String {
        let Some(context) = &self.context else {
            return String::new();
        };
        match context.value() {
            Some(Value::String(text)) => text,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => format!("{:?}", other),
            None => context.keypath().to_string(),
        }
    }
}

impl RenderUnit for TallyUnit {
    fn bind(&mut self, context: &IterationContext) {
        self.tally.binds.lock().push(context.keypath().clone());
        self.context = Some(context.clone());
    }

    fn unbind(&mut self) {}

    fn render(&mut self, output: &mut dyn Output, anchor: Option<NodeId>) {
        self.text = self.label();
        let node = OutputNode::new(self.text.clone());
        self.node = Some(node.id);
        output.insert_before(vec![node], anchor);
    }

    fn unrender(&mut self, output: &mut dyn Output, destroy: bool) {
        if let Some(id) = self.node.take() {
            output.remove(&[id]);
        }
        if destroy {
            *self.tally.destroyed.lock() += 1;
        }
    }

    fn update(&mut self) {
        if let Some(context) = &self.context {
            self.tally.updates.lock().push(context.keypath().clone());
        }
    }

    fn find(&self, selector: &str) -> Option<NodeId> {
        if self.text == selector {
            self.node
        } else {
            None
        }
    }

    fn find_all(&self, selector: &str, found: &mut Vec<NodeId>) {
        if let Some(id) = self.find(selector) {
            found.push(id);
        }
    }

    fn first_node(&self, _skip_owner: bool) -> Option<NodeId> {
        self.node
    }

    fn detach(&mut self, output: &mut dyn Output) -> Vec<OutputNode> {
        match self.node {
            Some(id) => output.remove(&[id]),
            None => Vec::new(),
        }
    }

    fn to_string(&self, escape: bool) -> String {
        if escape {
            self.text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
        } else {
            self.text.clone()
        }
    }
}

/// Bind a tally section at `context` and render it into a fresh node list.
pub fn rendered_section(
    runtime: &Runtime,
    context: &str,
) -> (SectionHandle, Arc<Tally>, Arc<Mutex<NodeList>>) {
    let tally = Tally::new();
    let template_tally = tally.clone();
    let section = runtime.repeated_section(context, move |_: &IterationContext| {
        Box::new(TallyUnit::new(template_tally.clone())) as Box<dyn RenderUnit>
    });
    let output = NodeList::shared();
    section.render(output.clone(), None);
    (section, tally, output)
}

/// Node texts in output order.
pub fn texts(output: &Arc<Mutex<NodeList>>) -> Vec<String> {
    output.lock().texts().into_iter().map(str::to_string).collect()
}

/// A list of string members.
pub fn strings(items: &[&str]) -> Value {
    Value::list(items.iter().copied())
}
