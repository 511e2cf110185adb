//! Update passes of a repeated section.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexSet;

use crate::keypath::Key;
use crate::output::NodeId;
use crate::value::Shape;

use super::iteration::Iteration;
use super::{PendingShuffle, RepeatedSection};

impl RepeatedSection {
    /// Reconcile iterations with the current value.
    ///
    /// `touched` narrows the refresh of surviving iterations to the given
    /// positions; `None` refreshes all of them.
    pub fn update(&mut self, touched: Option<&[usize]>) {
        if !self.bound {
            return;
        }
        if let Some(pending) = self.pending.take() {
            if self.update_post_shuffle(pending) {
                return;
            }
        }
        self.update_generic(touched);
    }

    fn update_generic(&mut self, touched: Option<&[usize]>) {
        let value = self.runtime.get(&self.context);
        let next = Shape::of(value.as_ref());

        let mut removed = Vec::new();
        let reset = match (&self.shape, &next) {
            (Shape::Ordered(_), Shape::Ordered(len)) => {
                if self.iterations.len() > *len {
                    removed = self.iterations.split_off(*len);
                }
                false
            }
            (Shape::Keyed(_), Shape::Keyed(keys)) => {
                let wanted: IndexSet<&str> = keys.iter().map(String::as_str).collect();
                let (kept, gone) = std::mem::take(&mut self.iterations)
                    .into_iter()
                    .partition(|i| key_name(&i.key).is_some_and(|name| wanted.contains(name)));
                self.iterations = kept;
                removed = gone;
                false
            }
            _ => true,
        };
        if reset {
            removed = std::mem::take(&mut self.iterations);
        }

        let output = self.output.clone();
        let mut target = output.as_ref().map(|o| o.lock());

        for mut iteration in removed {
            self.runtime
                .tracer()
                .on_iteration_destroyed(self.id, &iteration.key);
            iteration.teardown(target.as_deref_mut());
        }

        for (position, iteration) in self.iterations.iter_mut().enumerate() {
            iteration.reindex(position);
        }

        match touched {
            Some(positions) if !reset && matches!(next, Shape::Ordered(_)) => {
                for position in positions {
                    if let Some(iteration) = self.iterations.get_mut(*position) {
                        iteration.update();
                    }
                }
            }
            _ => self.iterations.iter_mut().for_each(Iteration::update),
        }

        let start = self.iterations.len();
        let mut added = match &next {
            Shape::Ordered(len) => (start..*len)
                .map(|i| self.create_iteration(Key::Index(i), i))
                .collect::<Vec<_>>(),
            Shape::Keyed(keys) => {
                let present: IndexSet<&str> = self
                    .iterations
                    .iter()
                    .filter_map(|i| key_name(&i.key))
                    .collect();
                let fresh: Vec<String> = keys
                    .iter()
                    .filter(|k| !present.contains(k.as_str()))
                    .cloned()
                    .collect();
                fresh
                    .into_iter()
                    .enumerate()
                    .map(|(offset, name)| self.create_iteration(Key::Name(name), start + offset))
                    .collect()
            }
            Shape::Scalar => Vec::new(),
        };
        if let Some(output) = target.as_deref_mut() {
            for iteration in &mut added {
                iteration.render(output, self.anchor);
            }
        }
        self.iterations.append(&mut added);

        tracing::trace!(
            section = ?self.id,
            context = %self.context,
            reset,
            len = self.iterations.len(),
            "section updated"
        );
        self.shape = next;
        self.update_last();
    }

    /// Apply a queued shuffle by moving iterations into their new positions.
    ///
    /// Returns false if the shuffle does not fit the section, in which case
    /// the caller falls back to a generic update.
    fn update_post_shuffle(&mut self, pending: PendingShuffle) -> bool {
        let PendingShuffle { mapping, merge } = pending;
        let value = self.runtime.get(&self.context);
        let next = Shape::of(value.as_ref());
        let Shape::Ordered(actual_len) = next else {
            tracing::debug!(context = %self.context, "dropping shuffle: value is not ordered");
            return false;
        };
        if !matches!(self.shape, Shape::Ordered(_)) || mapping.old_len() != self.iterations.len() {
            tracing::debug!(
                context = %self.context,
                ?mapping,
                iterations = self.iterations.len(),
                "dropping shuffle that does not match the section"
            );
            return false;
        }

        let len = mapping.new_len();
        let inverse = mapping.inverse();
        let output = self.output.clone();
        let mut target = output.as_ref().map(|o| o.lock());

        let mut prev: Vec<Option<Iteration>> = std::mem::take(&mut self.iterations)
            .into_iter()
            .map(Some)
            .collect();
        if merge {
            for iteration in prev.iter_mut().flatten() {
                iteration.should_rebind = true;
            }
        }

        for (old, slot) in prev.iter_mut().enumerate() {
            if mapping.get(old).is_none() {
                if let Some(mut iteration) = slot.take() {
                    self.runtime
                        .tracer()
                        .on_iteration_destroyed(self.id, &iteration.key);
                    iteration.teardown(target.as_deref_mut());
                }
            }
        }

        // Output order is always: placed iterations, then `unplaced` in old order.
        let mut unplaced: BTreeSet<usize> = prev
            .iter()
            .enumerate()
            .filter_map(|(old, slot)| slot.as_ref().map(|_| old))
            .collect();
        let mut stash: HashMap<usize, usize> = HashMap::new();
        let mut stashed = vec![false; prev.len()];
        let mut cursor = 0;
        let mut placed = Vec::with_capacity(len);

        for idx in 0..len {
            // Skip over iterations that belong further right.
            loop {
                while cursor < prev.len() && (prev[cursor].is_none() || stashed[cursor]) {
                    cursor += 1;
                }
                let Some(dest) = prev.get(cursor).and_then(|_| mapping.get(cursor)) else {
                    break;
                };
                if dest <= idx {
                    break;
                }
                let following = (cursor + 1..prev.len())
                    .find(|&old| prev[old].is_some() && !stashed[old])
                    .and_then(|old| mapping.get(old));
                if following.is_some_and(|following| following <= dest) {
                    stash.insert(dest, cursor);
                    stashed[cursor] = true;
                    cursor += 1;
                } else {
                    break;
                }
            }

            let source = stash.remove(&idx).or(inverse[idx]);
            let taken = source.and_then(|old| prev.get_mut(old)?.take().map(|i| (old, i)));

            match taken {
                Some((old, mut iteration)) => {
                    let in_place = unplaced.first() == Some(&old);
                    unplaced.remove(&old);
                    if iteration.index != idx || iteration.should_rebind {
                        iteration.swizzle(&self.context, Key::Index(idx), idx);
                    }
                    if !in_place {
                        if let Some(output) = target.as_deref_mut() {
                            let anchor = self.anchor_before(&prev, &unplaced);
                            iteration.move_before(output, anchor);
                        }
                        self.runtime.tracer().on_iteration_moved(self.id, old, idx);
                    }
                    iteration.update();
                    placed.push(iteration);
                }
                None => {
                    let mut iteration = self.create_iteration(Key::Index(idx), idx);
                    if let Some(output) = target.as_deref_mut() {
                        let anchor = self.anchor_before(&prev, &unplaced);
                        iteration.render(output, anchor);
                    }
                    placed.push(iteration);
                }
            }
        }

        for mut iteration in prev.into_iter().flatten() {
            self.runtime
                .tracer()
                .on_iteration_destroyed(self.id, &iteration.key);
            iteration.teardown(target.as_deref_mut());
        }
        drop(target);

        self.iterations = placed;
        self.shape = Shape::Ordered(len);
        self.update_last();

        if actual_len != len {
            // the value moved on after the shuffle was queued
            self.update_generic(None);
        }
        true
    }

    /// First node of the nearest rendered iteration not yet placed, else the section anchor.
    fn anchor_before(&self, prev: &[Option<Iteration>], unplaced: &BTreeSet<usize>) -> Option<NodeId> {
        unplaced
            .iter()
            .filter_map(|&old| prev.get(old)?.as_ref())
            .find_map(Iteration::first_node)
            .or(self.anchor)
    }
}

fn key_name(key: &Key) -> Option<&str> {
    match key {
        Key::Name(name) => Some(name),
        Key::Index(_) => None,
    }
}
