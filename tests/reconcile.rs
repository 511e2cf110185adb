//! Tests for repeated section reconciliation.

mod common;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use common::{rendered_section, strings, texts, Tally, TallyUnit};
use parking_lot::Mutex;
use render_flow::{
    FlowError, IterationContext, Key, Keypath, NodeId, NodeList, Output, OutputNode, RenderUnit,
    Runtime, ShuffleMapping, Value,
};

fn ids(section: &render_flow::SectionHandle) -> Vec<render_flow::IterationId> {
    section.iterations().into_iter().map(|i| i.id).collect()
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_bind_ordered() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    assert_eq!(texts(&output), ["a", "b", "c"]);
    assert_eq!(tally.created(), 3);
    let infos = section.iterations();
    assert_eq!(infos[2].key, Key::Index(2));
    assert_eq!(infos[2].index, 2);
    assert_eq!(infos[2].keypath, Keypath::parse("items.2"));
}

#[test]
fn test_bind_keyed() {
    let runtime = Runtime::new();
    runtime
        .set("users", Value::map([("ada", "Ada"), ("grace", "Grace")]))
        .unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "users");

    assert_eq!(texts(&output), ["Ada", "Grace"]);
    let keys: Vec<Key> = section.iterations().into_iter().map(|i| i.key).collect();
    assert_eq!(keys, [Key::from("ada"), Key::from("grace")]);
}

#[test]
fn test_bind_scalar_renders_nothing() {
    let runtime = Runtime::new();
    runtime.set("items", Value::from(5)).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    assert!(section.is_empty());
    assert!(texts(&output).is_empty());

    runtime.set("items", strings(&["a", "b"])).unwrap();
    assert_eq!(texts(&output), ["a", "b"]);
    assert_eq!(tally.created(), 2);
}

#[test]
fn test_bind_absent_value() {
    let runtime = Runtime::new();
    let (section, _tally, output) = rendered_section(&runtime, "missing");
    assert!(section.is_empty());
    assert_eq!(section.last_index().get(), None);

    runtime.push("missing", vec![Value::from("x")]).unwrap();
    assert_eq!(texts(&output), ["x"]);
}

// ============================================================================
// Generic updates
// ============================================================================

#[test]
fn test_update_is_idempotent() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);
    let (inserted, removed) = {
        let list = output.lock();
        (list.inserted(), list.removed())
    };

    section.update();
    section.update();

    assert_eq!(ids(&section), before);
    assert_eq!(tally.created(), 3);
    assert_eq!(tally.destroyed(), 0);
    let list = output.lock();
    assert_eq!(list.inserted(), inserted);
    assert_eq!(list.removed(), removed);
}

#[test]
fn test_truncation() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c", "d", "e"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let survivors = ids(&section)[..2].to_vec();

    runtime.set("items", strings(&["a", "b"])).unwrap();

    assert_eq!(texts(&output), ["a", "b"]);
    assert_eq!(ids(&section), survivors);
    assert_eq!(tally.created(), 5);
    assert_eq!(tally.destroyed(), 3);
}

#[test]
fn test_growth_appends() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    runtime.set("items", strings(&["a", "b", "c"])).unwrap();

    assert_eq!(texts(&output), ["a", "b", "c"]);
    assert_eq!(tally.created(), 3);
    assert_eq!(section.iterations()[2].keypath, Keypath::parse("items.2"));
}

#[test]
fn test_keyed_add_and_remove() {
    let runtime = Runtime::new();
    runtime.set("items", Value::map([("x", 1), ("y", 2)])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let y = section.iterations()[1].id;

    runtime.set("items", Value::map([("y", 2), ("z", 3)])).unwrap();

    assert_eq!(texts(&output), ["2", "3"]);
    let infos = section.iterations();
    assert_eq!(infos[0].id, y);
    assert_eq!(infos[0].index, 0);
    assert_eq!(infos[1].key, Key::from("z"));
    assert_eq!(infos[1].keypath, Keypath::parse("items.z"));
    assert_eq!(tally.destroyed(), 1);
    assert_eq!(tally.created(), 3);
}

#[test]
fn test_shape_change_resets() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    runtime.set("items", Value::map([("k", "v")])).unwrap();
    assert_eq!(texts(&output), ["v"]);
    assert_eq!(tally.destroyed(), 2);

    runtime.set("items", Value::Null).unwrap();
    assert!(section.is_empty());
    assert!(texts(&output).is_empty());
    assert_eq!(tally.destroyed(), 3);
}

#[test]
fn test_touched_positions_refresh_only() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (_section, tally, _output) = rendered_section(&runtime, "items");
    tally.take_updates();

    runtime.set("items.1", Value::from("B")).unwrap();
    assert_eq!(tally.take_updates(), [Keypath::parse("items.1")]);

    runtime.set("items", strings(&["a", "B", "C"])).unwrap();
    assert_eq!(tally.take_updates().len(), 3);
}

#[test]
fn test_keyed_write_refreshes_every_member() {
    let runtime = Runtime::new();
    runtime.set("items", Value::map([("x", 1), ("y", 2)])).unwrap();
    let (_section, tally, _output) = rendered_section(&runtime, "items");
    tally.take_updates();

    runtime.set("items.x", Value::from(10)).unwrap();
    assert_eq!(tally.take_updates().len(), 2);
}

#[test]
fn test_keyed_numeric_looking_keys_keep_identity() {
    let runtime = Runtime::new();
    runtime
        .set("m", Value::map([("007", "bond"), ("x", "y")]))
        .unwrap();
    let (section, tally, output) = rendered_section(&runtime, "m");
    assert_eq!(texts(&output), ["bond", "y"]);
    let before = ids(&section);
    assert_eq!(section.iterations()[0].key, Key::from("007"));

    runtime.set("m.z", Value::from("w")).unwrap();

    assert_eq!(texts(&output), ["bond", "y", "w"]);
    let infos = section.iterations();
    assert_eq!(&ids(&section)[..2], &before[..]);
    assert_eq!(infos[0].key, Key::from("007"));
    assert_eq!(infos[0].keypath.last_key(), Some(Key::from("007")));
    assert_eq!(tally.destroyed(), 0);
    assert_eq!(tally.created(), 3);
}

#[test]
fn test_keyed_dotted_keys() {
    let runtime = Runtime::new();
    runtime
        .set("m", Value::map([("a.b", "dot"), ("c", "plain")]))
        .unwrap();
    let (section, tally, output) = rendered_section(&runtime, "m");
    assert_eq!(texts(&output), ["dot", "plain"]);

    let dotted = section.iterations()[0].keypath.clone();
    assert_eq!(dotted.last_key(), Some(Key::from("a.b")));
    assert_eq!(runtime.get(&dotted), Some(Value::from("dot")));

    runtime.set("m", Value::map([("a.b", "dot")])).unwrap();
    assert_eq!(texts(&output), ["dot"]);
    assert_eq!(tally.destroyed(), 1);
}

#[test]
fn test_bracket_and_wildcard_writes_reach_sections() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (_section, tally, _output) = rendered_section(&runtime, "items");
    tally.take_updates();

    runtime.set("items[1]", Value::from("B")).unwrap();
    assert_eq!(runtime.get("items.1"), Some(Value::from("B")));
    assert_eq!(tally.take_updates(), vec![Keypath::parse("items.1")]);

    let report = runtime
        .batch(|rt| rt.set("items.*", Value::from("z")).unwrap())
        .unwrap();
    assert_eq!(report.sections_updated, 1);
    assert_eq!(runtime.get("items"), Some(strings(&["z", "z", "z"])));
    assert_eq!(tally.take_updates().len(), 3);
}

#[test]
fn test_growth_renders_before_anchor() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    let footer = OutputNode::new("footer");
    let footer_id = footer.id;
    let output = NodeList::shared();
    output.lock().insert_before(vec![footer], None);

    let tally = Tally::new();
    let template_tally = tally.clone();
    let section = runtime.repeated_section("items", move |_: &IterationContext| {
        Box::new(TallyUnit::new(template_tally.clone())) as Box<dyn RenderUnit>
    });
    section.render(output.clone(), Some(footer_id));
    assert_eq!(texts(&output), ["a", "b", "footer"]);

    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    assert_eq!(texts(&output), ["a", "b", "c", "footer"]);

    runtime.push("items", vec![Value::from("d")]).unwrap();
    assert_eq!(texts(&output), ["a", "b", "c", "d", "footer"]);
    assert_eq!(section.find_next_node(3), Some(footer_id));
    assert_eq!(tally.created(), 4);
}

// ============================================================================
// Shuffles
// ============================================================================

#[test]
fn test_permute_moves_iterations() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);

    let context = section.iteration_context(0).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = context
        .index_cell()
        .subscribe(move |index| sink.lock().push(*index));

    runtime
        .permute(
            "items",
            ShuffleMapping::new(vec![Some(1), Some(2), Some(0)], 3).unwrap(),
        )
        .unwrap();

    assert_eq!(runtime.get("items"), Some(strings(&["c", "a", "b"])));
    assert_eq!(texts(&output), ["c", "a", "b"]);
    assert_eq!(ids(&section), [before[2], before[0], before[1]]);
    assert_eq!(tally.created(), 3);
    assert_eq!(tally.destroyed(), 0);
    assert_eq!(*seen.lock(), [1]);
    assert_eq!(context.index(), 1);
    assert_eq!(section.iterations()[1].keypath, Keypath::parse("items.1"));
}

#[test]
fn test_identity_shuffle_touches_nothing() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "items");
    let inserted = output.lock().inserted();

    runtime.permute("items", ShuffleMapping::identity(3)).unwrap();
    section.shuffle(ShuffleMapping::identity(3), false).unwrap();

    assert_eq!(texts(&output), ["a", "b", "c"]);
    assert_eq!(output.lock().inserted(), inserted);
}

#[test]
fn test_splice_moves_instead_of_rebuilding() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);

    assert_eq!(runtime.shift("items").unwrap(), Some(Value::from("a")));
    assert_eq!(texts(&output), ["b", "c"]);
    assert_eq!(ids(&section), before[1..]);
    assert_eq!(tally.destroyed(), 1);
    assert_eq!(output.lock().inserted(), 3);

    runtime.unshift("items", vec![Value::from("z")]).unwrap();
    assert_eq!(texts(&output), ["z", "b", "c"]);
    assert_eq!(ids(&section)[1..], before[1..]);
    assert_eq!(tally.created(), 4);

    let keypaths: Vec<Keypath> = section.iterations().into_iter().map(|i| i.keypath).collect();
    assert_eq!(
        keypaths,
        [
            Keypath::parse("items.0"),
            Keypath::parse("items.1"),
            Keypath::parse("items.2")
        ]
    );
}

#[test]
fn test_splice_in_the_middle() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c", "d"])).unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);

    let removed = runtime
        .splice("items", 1, 2, vec![Value::from("x"), Value::from("y"), Value::from("z")])
        .unwrap();

    assert_eq!(removed, [Value::from("b"), Value::from("c")]);
    assert_eq!(texts(&output), ["a", "x", "y", "z", "d"]);
    let after = ids(&section);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[4], before[3]);
    assert_eq!(section.iterations()[4].index, 4);
}

#[test]
fn test_composed_shuffles_in_one_batch() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);

    let report = runtime
        .batch(|rt| {
            rt.push("items", vec![Value::from("d")]).unwrap();
            rt.shift("items").unwrap();
        })
        .unwrap();

    assert_eq!(report.sections_updated, 1);
    assert_eq!(texts(&output), ["b", "c", "d"]);
    assert_eq!(ids(&section)[..2], before[1..]);
    assert_eq!(tally.created(), 4);
    assert_eq!(tally.destroyed(), 1);
}

#[test]
fn test_merge_rebinds_survivors() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);
    assert_eq!(tally.binds(), 3);

    runtime
        .merge("items", vec![Value::from("c"), Value::from("a"), Value::from("x")])
        .unwrap();

    assert_eq!(texts(&output), ["c", "a", "x"]);
    let after = ids(&section);
    assert_eq!(after[..2], [before[2], before[0]]);
    assert_eq!(tally.destroyed(), 1);
    // two rebinds plus one new iteration
    assert_eq!(tally.binds(), 6);
}

#[test]
fn test_mismatched_shuffle_falls_back() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    runtime.batch(|rt| {
        rt.set("items", strings(&["a", "b", "c", "d"])).unwrap();
        section.shuffle(ShuffleMapping::identity(2), false).unwrap();
    });

    assert_eq!(texts(&output), ["a", "b", "c", "d"]);
    assert_eq!(tally.destroyed(), 0);
}

#[test]
fn test_shuffle_chain_must_line_up() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "items");

    let batch = runtime.start_batch();
    section.shuffle(ShuffleMapping::identity(3), false).unwrap();
    let err = section
        .shuffle(ShuffleMapping::identity(5), false)
        .unwrap_err();
    assert!(matches!(err, FlowError::MalformedShuffle { .. }));
    drop(batch);

    assert_eq!(texts(&output), ["a", "b", "c"]);
}

#[test]
fn test_shuffle_after_value_moved_on() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "items");
    let before = ids(&section);

    runtime.batch(|rt| {
        rt.set("items", strings(&["b", "c"])).unwrap();
        section
            .shuffle(ShuffleMapping::splice(3, 0, 1, 0), false)
            .unwrap();
        rt.set("items", strings(&["b", "c", "e"])).unwrap();
    });

    assert_eq!(texts(&output), ["b", "c", "e"]);
    assert_eq!(ids(&section)[..2], before[1..]);
}

// ============================================================================
// Binding lifecycle and queries
// ============================================================================

#[test]
fn test_rebind_to_other_context_replaces_all() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    runtime.set("others", strings(&["x", "y", "z"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    section.rebind("others");
    assert_eq!(section.context(), Keypath::parse("others"));
    assert_eq!(texts(&output), ["x", "y", "z"]);
    assert_eq!(tally.destroyed(), 2);
    assert_eq!(tally.created(), 5);

    runtime.set("items", strings(&["q"])).unwrap();
    assert_eq!(texts(&output), ["x", "y", "z"]);
    runtime.push("others", vec![Value::from("w")]).unwrap();
    assert_eq!(texts(&output), ["x", "y", "z", "w"]);
}

#[test]
fn test_unbind_ignores_updates_until_rebound() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    section.unbind();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    assert_eq!(texts(&output), ["a", "b"]);

    section.rebind("items");
    assert_eq!(tally.created(), 2);
    section.update();
    assert_eq!(texts(&output), ["a", "b", "c"]);
}

#[test]
fn test_queries() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "a"])).unwrap();
    let (section, _tally, output) = rendered_section(&runtime, "items");
    let nodes: Vec<NodeId> = output.lock().ids();

    assert_eq!(section.find("b"), Some(nodes[1]));
    assert_eq!(section.find("nope"), None);
    assert_eq!(section.find_all("a"), [nodes[0], nodes[2]]);
    assert_eq!(section.first_node(false), Some(nodes[0]));
    assert_eq!(section.find_next_node(0), Some(nodes[1]));
    assert_eq!(section.find_next_node(2), None);
    assert_eq!(section.to_string(false), "aba");
}

#[test]
fn test_to_string_escapes() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["<b>", "&"])).unwrap();
    let (section, _tally, _output) = rendered_section(&runtime, "items");
    assert_eq!(section.to_string(true), "&lt;b&gt;&amp;");
    assert_eq!(section.to_string(false), "<b>&");
}

#[test]
fn test_detach_and_unrender() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    let detached = section.detach();
    let detached_texts: Vec<&str> = detached.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(detached_texts, ["a", "b"]);
    assert!(output.lock().is_empty());

    output.lock().insert_before(detached, None);
    section.unrender(true);
    assert!(output.lock().is_empty());
    assert_eq!(tally.destroyed(), 2);
    assert_eq!(section.first_node(false), None);
}

#[test]
fn test_last_index_cell() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, _tally, _output) = rendered_section(&runtime, "items");
    let last = section.last_index();
    assert_eq!(last.get(), Some(2));

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let _subscription = last.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    runtime.push("items", vec![Value::from("d")]).unwrap();
    assert_eq!(last.get(), Some(3));
    runtime.set("items.0", Value::from("A")).unwrap();
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    runtime.set("items", Value::list(Vec::<Value>::new())).unwrap();
    assert_eq!(last.get(), None);
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dropping_handle_tears_down() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b", "c"])).unwrap();
    let (section, tally, output) = rendered_section(&runtime, "items");

    drop(section);
    assert!(output.lock().is_empty());
    assert_eq!(tally.destroyed(), 3);

    runtime.set("items", strings(&["a"])).unwrap();
    assert_eq!(tally.created(), 3);
}

#[test]
fn test_two_sections_share_a_list() {
    let runtime = Runtime::new();
    runtime.set("items", strings(&["a", "b"])).unwrap();
    let (_first, _, first_output) = rendered_section(&runtime, "items");
    let (_second, _, second_output) = rendered_section(&runtime, "items");

    runtime.unshift("items", vec![Value::from("z")]).unwrap();
    assert_eq!(texts(&first_output), ["z", "a", "b"]);
    assert_eq!(texts(&second_output), ["z", "a", "b"]);
}

// ============================================================================
// Flush bounds
// ============================================================================

/// Writes its own member on every update.
struct Restless {
    context: Option<IterationContext>,
    ticks: i64,
}

impl RenderUnit for Restless {
    fn bind(&mut self, context: &IterationContext) {
        self.context = Some(context.clone());
    }

    fn unbind(&mut self) {}

    fn render(&mut self, _output: &mut dyn Output, _anchor: Option<NodeId>) {}

    fn unrender(&mut self, _output: &mut dyn Output, _destroy: bool) {}

    fn update(&mut self) {
        if let Some(context) = &self.context {
            self.ticks += 1;
            context
                .runtime()
                .set(context.keypath(), Value::from(self.ticks))
                .unwrap();
        }
    }

    fn first_node(&self, _skip_owner: bool) -> Option<NodeId> {
        None
    }

    fn detach(&mut self, _output: &mut dyn Output) -> Vec<OutputNode> {
        Vec::new()
    }

    fn to_string(&self, _escape: bool) -> String {
        String::new()
    }
}

struct Fragile {
    armed: Arc<AtomicBool>,
}

impl RenderUnit for Fragile {
    fn bind(&mut self, _context: &IterationContext) {}

    fn unbind(&mut self) {}

    fn render(&mut self, _output: &mut dyn Output, _anchor: Option<NodeId>) {}

    fn unrender(&mut self, _output: &mut dyn Output, _destroy: bool) {}

    fn update(&mut self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("unit failed to update");
        }
    }

    fn first_node(&self, _skip_owner: bool) -> Option<NodeId> {
        None
    }

    fn detach(&mut self, _output: &mut dyn Output) -> Vec<OutputNode> {
        Vec::new()
    }

    fn to_string(&self, _escape: bool) -> String {
        String::new()
    }
}

#[test]
fn test_panicking_unit_does_not_wedge_the_scheduler() {
    let runtime = Runtime::new();
    runtime.set("items", Value::list([0])).unwrap();
    runtime.set("others", strings(&["a"])).unwrap();
    let armed = Arc::new(AtomicBool::new(false));
    let template_armed = armed.clone();
    let _fragile = runtime.repeated_section("items", move |_: &IterationContext| {
        Box::new(Fragile {
            armed: template_armed.clone(),
        }) as Box<dyn RenderUnit>
    });
    let (_section, _tally, output) = rendered_section(&runtime, "others");

    armed.store(true, Ordering::SeqCst);
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.set("items.0", Value::from(1)).unwrap();
    }));
    assert!(outcome.is_err());
    assert!(!runtime.in_batch());

    runtime.set("others", strings(&["a", "b"])).unwrap();
    assert_eq!(texts(&output), ["a", "b"]);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let _batch = runtime.start_batch();
        panic!("caller failed mid-batch");
    }));
    assert!(outcome.is_err());
    assert!(!runtime.in_batch());
    runtime.set("others", strings(&["c"])).unwrap();
    assert_eq!(texts(&output), ["c"]);
}

#[test]
fn test_cascading_updates_are_bounded() {
    let runtime = Runtime::builder().max_flush_passes(3).build();
    runtime.set("items", Value::list([0])).unwrap();
    let _section = runtime.repeated_section("items", |_: &IterationContext| {
        Box::new(Restless {
            context: None,
            ticks: 0,
        }) as Box<dyn RenderUnit>
    });

    let report = runtime
        .batch(|rt| rt.set("items.0", Value::from(-1)).unwrap())
        .unwrap();

    assert_eq!(report.passes, 3);
    assert!(!runtime.in_batch());
    // the runtime is still usable afterwards
    runtime.set("other", Value::from(1)).unwrap();
    assert_eq!(runtime.get("other"), Some(Value::from(1)));
}
