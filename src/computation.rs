//! Computations: cached derived values with dynamically discovered dependencies.
//!
//! A computation owns a keypath. Its getter runs with a [`Recorder`] that
//! captures every keypath it reads; those reads become the computation's soft
//! dependencies, replaced wholesale after each evaluation. Hard dependencies
//! are declared up front and stay registered for the computation's lifetime.
//!
//! Evaluation is lazy. Invalidation only marks a computation dirty; the next
//! `get()` decides whether the getter has to run at all by comparing every
//! dependency with the value it had at the last evaluation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::graph::Dependent;
use crate::keypath::Keypath;
use crate::recorder::Recorder;
use crate::runtime::{Runtime, State};
use crate::scheduler::UnresolvedDependency;
use crate::tracer::{EvaluationResult, InvalidationReason};
use crate::value::Value;

/// Getter of a computation. Reads through the recorder are tracked as dependencies.
pub type Getter = Arc<dyn Fn(&mut Recorder<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Setter of a computation. Receives the runtime so it can write the computation's inputs.
pub type Setter = Arc<dyn Fn(&Runtime, Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifier of a computation inside one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(pub(crate) usize);

/// Lifecycle state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationState {
    /// The cached value is valid.
    Clean,
    /// An input may have changed; the next read decides whether to recompute.
    Dirty,
    /// The getter is running. Nested reads see an absent value.
    Evaluating,
    /// The setter is running. Nested writes store the raw value.
    Setting,
}

/// Declaration of a computed keypath.
///
/// # Example
///
/// ```
/// use render_flow::{ComputedSignature, Runtime, Value};
///
/// let runtime = Runtime::new();
/// runtime.set("items", Value::list([1, 2, 3])).unwrap();
/// runtime
///     .declare_computed(
///         "count",
///         ComputedSignature::new(|ctx| {
///             let len = ctx
///                 .get("items")
///                 .and_then(|items| items.as_list().map(Vec::len))
///                 .unwrap_or(0);
///             Ok(Value::from(len * 2))
///         }),
///     )
///     .unwrap();
/// assert_eq!(runtime.get("count"), Some(Value::from(6)));
/// ```
#[derive(Clone)]
pub struct ComputedSignature {
    pub(crate) getter: Getter,
    pub(crate) setter: Option<Setter>,
    pub(crate) deps: Vec<Keypath>,
    pub(crate) initial: Option<Value>,
}

impl ComputedSignature {
    /// Create a signature from a getter.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&mut Recorder<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            setter: None,
            deps: Vec::new(),
            initial: None,
        }
    }

    /// Attach a setter, making the computed keypath writable.
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Runtime, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Declare hard dependencies, registered for the computation's whole lifetime.
    pub fn deps<I, K>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Keypath>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Value written through the setter when the computation is created.
    pub fn initial(mut self, value: Value) -> Self {
        self.initial = Some(value);
        self
    }
}

impl fmt::Debug for ComputedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSignature")
            .field("deps", &self.deps)
            .field("has_setter", &self.setter.is_some())
            .field("initial", &self.initial)
            .finish()
    }
}

pub(crate) struct Computation {
    pub keypath: Keypath,
    pub getter: Getter,
    pub setter: Option<Setter>,
    pub hard: Vec<Keypath>,
    pub soft: Vec<Keypath>,
    pub unresolved: Vec<Keypath>,
    pub snapshots: HashMap<Keypath, Option<Value>>,
    pub value: Option<Value>,
    pub state: ComputationState,
    pub first_run: bool,
}

impl Computation {
    pub fn new(keypath: Keypath, signature: ComputedSignature) -> Self {
        Self {
            keypath,
            getter: signature.getter,
            setter: signature.setter,
            hard: signature.deps,
            soft: Vec::new(),
            unresolved: Vec::new(),
            snapshots: HashMap::new(),
            value: None,
            state: ComputationState::Dirty,
            first_run: true,
        }
    }

    /// Move to `Dirty`. Only a clean computation can be dirtied; every other
    /// state already implies a pending or running evaluation.
    pub fn mark_dirty(&mut self) -> bool {
        if self.state == ComputationState::Clean {
            self.state = ComputationState::Dirty;
            true
        } else {
            false
        }
    }

    fn all_deps(&self) -> Vec<Keypath> {
        self.hard.iter().chain(self.soft.iter()).cloned().collect()
    }
}

impl State {
    /// Create the computation for `keypath` if it was declared but not yet accessed.
    ///
    /// Returns the id and, on creation, the initial value to write through the setter.
    pub(crate) fn ensure_computation(
        &mut self,
        keypath: &Keypath,
    ) -> Option<(ComputationId, Option<Value>)> {
        if let Some(id) = self.computed.get(keypath) {
            return Some((*id, None));
        }
        let mut signature = self.signatures.remove(keypath)?;
        let initial = signature.initial.take().filter(|_| signature.setter.is_some());
        let id = ComputationId(
            self.computations
                .insert(Computation::new(keypath.clone(), signature)),
        );
        for dep in &self.computations[id.0].hard {
            self.graph.register(dep, Dependent::Computation(id));
        }
        self.computed.insert(keypath.clone(), id);
        Some((id, initial))
    }

    /// Dirty everything that depends on `changed`, transitively through computed keypaths.
    ///
    /// Sections reached on the way are queued for the next flush.
    pub(crate) fn propagate(&mut self, changed: &Keypath, runtime: &Runtime) {
        let mut worklist = vec![changed.clone()];
        while let Some(keypath) = worklist.pop() {
            for affected in self.graph.dependents_affected_by(&keypath) {
                match affected.dependent {
                    Dependent::Computation(id) => {
                        let Some(computation) = self.computations.get_mut(id.0) else {
                            continue;
                        };
                        if computation.mark_dirty() {
                            runtime.tracer().on_computation_invalidated(
                                &computation.keypath,
                                &InvalidationReason::DependencyChanged {
                                    dependency: keypath.clone(),
                                },
                            );
                            self.scheduler.note_invalidated();
                            worklist.push(computation.keypath.clone());
                        }
                    }
                    Dependent::Section(id) => {
                        self.scheduler.mark_section(id, affected.touched.as_ref());
                    }
                }
            }
        }
    }

    /// Reconcile the soft dependencies of `id` with the keypaths read by its last evaluation.
    ///
    /// Returns true if the soft dependency set changed.
    pub(crate) fn update_dependencies(
        &mut self,
        id: ComputationId,
        new_deps: Vec<Keypath>,
        runtime: &Runtime,
    ) -> bool {
        let Some(computation) = self.computations.get(id.0) else {
            return false;
        };
        let owner = computation.keypath.clone();
        let hard = computation.hard.clone();
        let old_soft = computation.soft.clone();
        let old_unresolved = computation.unresolved.clone();
        let dependent = Dependent::Computation(id);
        let mut changed = false;

        for keypath in &old_soft {
            if !new_deps.contains(keypath) {
                changed = true;
                self.graph.unregister(keypath, dependent);
                runtime.tracer().on_dependency_unregistered(&owner, keypath);
            }
        }
        for keypath in &old_unresolved {
            if !new_deps.contains(keypath) {
                changed = true;
                self.scheduler.remove_unresolved(id, keypath);
            }
        }

        let mut soft = Vec::new();
        let mut unresolved = Vec::new();
        for keypath in new_deps {
            if keypath == owner || hard.contains(&keypath) {
                continue;
            }
            if old_soft.contains(&keypath) {
                soft.push(keypath);
                continue;
            }
            if old_unresolved.contains(&keypath) {
                unresolved.push(keypath);
                continue;
            }
            changed = true;
            if self.is_resolvable(&keypath) {
                self.graph.register(&keypath, dependent);
                runtime.tracer().on_dependency_registered(&owner, &keypath);
                soft.push(keypath);
            } else {
                self.scheduler.add_unresolved(UnresolvedDependency {
                    computation: id,
                    keypath: keypath.clone(),
                });
                runtime.tracer().on_dependency_unresolved(&owner, &keypath);
                unresolved.push(keypath);
            }
        }

        if changed {
            let computation = &mut self.computations[id.0];
            computation.soft = soft;
            computation.unresolved = unresolved;
        }
        changed
    }

    /// Register every queued unresolved dependency that now resolves.
    ///
    /// Returns the number of registrations made.
    pub(crate) fn retry_unresolved(&mut self, runtime: &Runtime) -> usize {
        let resolved = {
            let graph = &self.graph;
            let computed = &self.computed;
            let signatures = &self.signatures;
            self.scheduler.drain_resolved(|d| {
                computed.contains_key(&d.keypath)
                    || signatures.contains_key(&d.keypath)
                    || graph.resolves(&d.keypath)
            })
        };
        let count = resolved.len();
        for UnresolvedDependency {
            computation: id,
            keypath,
        } in resolved
        {
            let Some(computation) = self.computations.get_mut(id.0) else {
                continue;
            };
            computation.unresolved.retain(|k| k != &keypath);
            computation.soft.push(keypath.clone());
            let owner = computation.keypath.clone();
            let dirtied = computation.mark_dirty();
            self.graph.register(&keypath, Dependent::Computation(id));
            runtime.tracer().on_dependency_registered(&owner, &keypath);
            tracing::debug!(%owner, dependency = %keypath, "unresolved dependency resolved");
            if dirtied {
                runtime.tracer().on_computation_invalidated(
                    &owner,
                    &InvalidationReason::DependencyResolved {
                        dependency: keypath.clone(),
                    },
                );
                self.scheduler.note_invalidated();
                self.propagate(&owner, runtime);
            }
        }
        count
    }

    /// Destroy the computation on `keypath`, releasing every registration.
    pub(crate) fn teardown_computation(&mut self, keypath: &Keypath) -> bool {
        self.signatures.remove(keypath);
        let Some(id) = self.computed.remove(keypath) else {
            return false;
        };
        self.graph.unregister_all(Dependent::Computation(id));
        self.scheduler.remove_unresolved_for(id);
        self.computations.remove(id.0);
        true
    }

    fn is_resolvable(&self, keypath: &Keypath) -> bool {
        self.computed.contains_key(keypath)
            || self.signatures.contains_key(keypath)
            || self.graph.resolves(keypath)
    }
}

impl Runtime {
    /// `get()` on a computation.
    pub(crate) fn evaluate(&self, id: ComputationId) -> Option<Value> {
        let (keypath, deps, snapshots, unconditional, getter) = {
            let mut state = self.lock();
            let computation = state.computations.get_mut(id.0)?;
            match computation.state {
                ComputationState::Clean => {
                    self.tracer()
                        .on_computation_end(&computation.keypath, &EvaluationResult::CacheHit);
                    return computation.value.clone();
                }
                ComputationState::Evaluating => {
                    self.tracer()
                        .on_computation_end(&computation.keypath, &EvaluationResult::Reentrant);
                    return None;
                }
                ComputationState::Setting => return computation.value.clone(),
                ComputationState::Dirty => {}
            }
            computation.state = ComputationState::Evaluating;
            let deps = computation.all_deps();
            let unconditional = computation.first_run || deps.is_empty();
            (
                computation.keypath.clone(),
                deps,
                computation.snapshots.clone(),
                unconditional,
                computation.getter.clone(),
            )
        };
        self.tracer().on_computation_start(&keypath);

        // Registration edits below must happen inside a unit of work.
        let batch = self.start_batch();

        let inputs_changed = unconditional
            || deps.iter().any(|dep| {
                let current = self.get(dep);
                snapshots.get(dep).map_or(true, |seen| *seen != current)
            });

        if !inputs_changed {
            let value = {
                let mut state = self.lock();
                let computation = state.computations.get_mut(id.0)?;
                computation.state = ComputationState::Clean;
                computation.value.clone()
            };
            self.tracer()
                .on_computation_end(&keypath, &EvaluationResult::Unchanged);
            drop(batch);
            return value;
        }

        let mut recorder = Recorder::new(self, keypath.clone());
        let outcome = getter(&mut recorder);
        let reads = recorder.into_reads();

        let (value, result) = match outcome {
            Ok(value) => (Some(value), EvaluationResult::Recomputed),
            Err(fault) => {
                if self.is_debug() {
                    tracing::warn!(%keypath, error = %fault, "failed to compute");
                }
                let message = format!("{:#}", fault);
                (None, EvaluationResult::Fault { message })
            }
        };

        let deps = {
            let mut state = self.lock();
            state.update_dependencies(id, reads, self);
            state
                .computations
                .get(id.0)
                .map(Computation::all_deps)
                .unwrap_or_default()
        };

        let snapshots: HashMap<Keypath, Option<Value>> = deps
            .into_iter()
            .map(|dep| {
                let current = self.get(&dep);
                (dep, current)
            })
            .collect();

        {
            let mut state = self.lock();
            if let Some(computation) = state.computations.get_mut(id.0) {
                computation.snapshots = snapshots;
                computation.value = value.clone();
                computation.first_run = false;
                computation.state = ComputationState::Clean;
            }
        }
        self.tracer().on_computation_end(&keypath, &result);
        drop(batch);
        value
    }

    /// `set()` on a computation.
    pub(crate) fn assign(&self, id: ComputationId, value: Value) -> Result<()> {
        let (keypath, setter) = {
            let mut state = self.lock();
            let Some(computation) = state.computations.get_mut(id.0) else {
                return Ok(());
            };
            if computation.state == ComputationState::Setting {
                computation.value = Some(value);
                return Ok(());
            }
            let Some(setter) = computation.setter.clone() else {
                return Err(FlowError::ReadOnlyComputed {
                    keypath: computation.keypath.clone(),
                });
            };
            computation.state = ComputationState::Setting;
            (computation.keypath.clone(), setter)
        };

        let batch = self.start_batch();
        let outcome = setter(self, value);
        {
            let mut state = self.lock();
            if let Some(computation) = state.computations.get_mut(id.0) {
                computation.state = ComputationState::Dirty;
            }
            state.propagate(&keypath, self);
        }
        drop(batch);

        outcome.map_err(|fault| FlowError::Setter {
            keypath,
            fault: Arc::new(fault),
        })
    }

    /// `invalidate()` on a computation. Purely lazy: nothing is recomputed here.
    pub(crate) fn mark_computation_dirty(&self, id: ComputationId) {
        let batch = self.start_batch();
        {
            let mut state = self.lock();
            let Some(computation) = state.computations.get_mut(id.0) else {
                return;
            };
            if computation.mark_dirty() {
                let keypath = computation.keypath.clone();
                self.tracer()
                    .on_computation_invalidated(&keypath, &InvalidationReason::Manual);
                state.scheduler.note_invalidated();
                state.propagate(&keypath, self);
            }
        }
        drop(batch);
    }
}
