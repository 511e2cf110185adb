//! Render-Flow: a reactive rendering core.
//!
//! Two engines share one [`Runtime`]:
//!
//! - **Computations** derive cached values from the value graph. Their
//!   dependencies are discovered by recording what the getter reads, they are
//!   re-evaluated lazily, and a dirty computation whose inputs all compare equal
//!   to what it last saw is marked clean without running the getter.
//! - **Repeated sections** keep one render unit per member of a list or mapping.
//!   Generic updates truncate, drop missing keys and append; array mutations
//!   such as [`Runtime::splice`] supply a [`ShuffleMapping`] so existing units
//!   are moved rather than rebuilt.
//!
//! Writes are grouped into batches. Computations are dirtied as soon as a
//! dependency changes; sections update once, when the outermost batch ends.
//!
//! # Example
//!
//! ```
//! use render_flow::{ComputedSignature, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! runtime.set("items", Value::list([1, 2, 3])).unwrap();
//! runtime
//!     .declare_computed(
//!         "double_len",
//!         ComputedSignature::new(|ctx| {
//!             let len = ctx
//!                 .get("items")
//!                 .and_then(|v| v.as_list().map(Vec::len))
//!                 .unwrap_or(0);
//!             Ok(Value::from(len * 2))
//!         }),
//!     )
//!     .unwrap();
//!
//! assert_eq!(runtime.get("double_len"), Some(Value::from(6)));
//! runtime.push("items", vec![Value::from(4)]).unwrap();
//! assert_eq!(runtime.get("double_len"), Some(Value::from(8)));
//! ```
#![deny(missing_docs)]

mod cell;
mod computation;
mod error;
mod graph;
mod keypath;
mod output;
mod recorder;
mod runtime;
mod scheduler;
mod section;
pub mod tracer;
mod value;

pub use cell::{IndexCell, KeyCell, ReactiveCell, Subscription};
pub use computation::{ComputationId, ComputationState, ComputedSignature, Getter, Setter};
pub use error::{FlowError, Result};
pub use graph::{Affected, Dependent, SetOutcome, ValueGraph};
pub use keypath::{Key, Keypath, WILDCARD};
pub use output::{NodeId, NodeList, Output, OutputNode, SharedOutput};
pub use recorder::Recorder;
pub use runtime::{Runtime, RuntimeBuilder, DEFAULT_MAX_FLUSH_PASSES};
pub use scheduler::{BatchHandle, FlushReport, UnresolvedDependency};
pub use section::{
    IterationContext, IterationId, IterationInfo, RenderUnit, SectionHandle, SectionId,
    ShuffleMapping, Template,
};
pub use tracer::{EvaluationResult, InvalidationReason, NoopTracer, Tracer, TracingTracer};
pub use value::{Shape, Value, MAX_LIST_GROWTH};
