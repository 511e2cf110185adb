//! Dependency recording for computation getters.

use crate::keypath::Keypath;
use crate::runtime::Runtime;
use crate::value::Value;

/// Context handed to a computation getter.
///
/// Every keypath read through [`get`](Recorder::get) becomes a soft
/// dependency of the computation being evaluated. Reading another computed
/// keypath evaluates it with its own recorder, so recorders chain instead of
/// sharing ambient state.
pub struct Recorder<'a> {
    runtime: &'a Runtime,
    owner: Keypath,
    reads: Vec<Keypath>,
}

impl<'a> Recorder<'a> {
    pub(crate) fn new(runtime: &'a Runtime, owner: Keypath) -> Self {
        Self {
            runtime,
            owner,
            reads: Vec::new(),
        }
    }

    /// Read `keypath` and record it as a dependency.
    pub fn get(&mut self, keypath: impl Into<Keypath>) -> Option<Value> {
        let keypath = keypath.into();
        let value = self.runtime.get(&keypath);
        if !self.reads.contains(&keypath) {
            self.reads.push(keypath);
        }
        value
    }

    /// Read `keypath` without recording it.
    pub fn peek(&self, keypath: impl Into<Keypath>) -> Option<Value> {
        self.runtime.get(keypath)
    }

    /// Keypath of the computation being evaluated.
    pub fn owner(&self) -> &Keypath {
        &self.owner
    }

    /// The runtime the computation lives in.
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Keypaths recorded so far, in first-read order.
    pub fn reads(&self) -> &[Keypath] {
        &self.reads
    }

    pub(crate) fn into_reads(self) -> Vec<Keypath> {
        self.reads
    }
}
