//! # Fleet Population
//!
//! Population model engine for synthetic telemetry. From a set of type
//! definitions it builds the members of a simulated fleet (hosts, nodes,
//! pods, disks...), links parents to children, derives attributes across
//! those links and then keeps the fleet changing over time with scheduled
//! ADD / REMOVE / CHURN modifications.
//!
//! ## Features
//!
//! - **Definitions**: JSON-loadable type definitions with up-front validation
//! - **Build pipeline**: member construction, child distribution and
//!   parent-first attribute operations
//! - **Evaluator**: pluggable per-session expression evaluator with a
//!   reference implementation of counters, round-robin and sequences
//! - **Mutator**: lock-free readers, atomically published active windows
//! - **Runtime**: session lifecycle on tokio with Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_population::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> fleet_population::Result<()> {
//!     let runtime = EngineBuilder::new().build::<Entity>()?;
//!
//!     let definitions = Definitions::new(vec![
//!         TypeDefinition::new("node", 25)
//!             .with_attribute("name", "counter('node-')")
//!             .with_children("pod", "4")
//!             .with_modification(RuntimeModification::add(5, 2, 10)),
//!         TypeDefinition::new("pod", 100)
//!             .with_attribute("name", "counter('pod-')")
//!             .with_operation("copyFromParent('node', 'name')"),
//!     ]);
//!
//!     let session = SessionId::generate();
//!     let population = runtime.start_session(session.clone(), definitions).await?;
//!     for node in population.active_members("node") {
//!         println!("{:?}", node.attribute("name"));
//!     }
//!
//!     runtime.end_session(&session).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod definition;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod graph;
pub mod kind;
pub mod logging;
pub mod member;
pub mod metrics;
pub mod mutator;
pub mod operations;
pub mod population;
pub mod population_builder;
pub mod runtime;
pub mod store;
pub mod types;

// Re-exports for ergonomic API
pub use builder::{EngineBuilder, EngineConfig};
pub use definition::{Definitions, ModificationKind, RuntimeModification, TypeDefinition};
pub use engine::build_population;
pub use error::{PopulationError, Result};
pub use evaluator::{
    BasicEvaluator, BasicEvaluatorFactory, BoxedEvaluator, EvalContext, EvalScope, EvaluatorFactory,
    ExpressionEvaluator,
};
pub use kind::{Entity, MemberKind, Resource};
pub use member::{Member, MemberSnapshot};
pub use metrics::PopulationMetrics;
pub use mutator::{MutationReport, PopulationMutator};
pub use operations::AttributeOperation;
pub use population::{Population, TypePopulation};
pub use runtime::{EntityRuntime, PopulationRuntime, PopulationSession, ResourceRuntime, SessionState};
pub use store::PopulationStore;
pub use types::{ActiveWindow, MemberRef, ModificationId, SessionId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::EngineBuilder;
    pub use crate::definition::{Definitions, RuntimeModification, TypeDefinition};
    pub use crate::error::Result;
    pub use crate::evaluator::ExpressionEvaluator;
    pub use crate::kind::{Entity, Resource};
    pub use crate::runtime::{EntityRuntime, ResourceRuntime};
    pub use crate::types::{MemberRef, SessionId};
}
