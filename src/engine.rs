//! Population build pipeline
//!
//! Runs the three build phases in order against one evaluator:
//! member construction, child distribution and attribute operations.

use crate::definition::Definitions;
use crate::distribution::DistributionMapper;
use crate::error::Result;
use crate::evaluator::ExpressionEvaluator;
use crate::kind::MemberKind;
use crate::operations::OperationScheduler;
use crate::population::Population;
use crate::population_builder::PopulationBuilder;
use crate::types::SessionId;
use std::time::Instant;
use tracing::info;

/// Build a complete population for a session
///
/// Definitions are validated before any expression is evaluated. The
/// returned population has every member created, every child distribution
/// linked and every attribute operation applied.
pub fn build_population<K: MemberKind>(
    session: &SessionId,
    definitions: &Definitions,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<Population<K>> {
    let started = Instant::now();

    let mut population = PopulationBuilder::<K>::new(session, evaluator).build(definitions)?;
    DistributionMapper::<K>::new(session, evaluator).map_children(&mut population, definitions)?;
    let updated = OperationScheduler::<K>::new(session, evaluator).apply_operations(&mut population, definitions)?;

    info!(
        session = %session,
        kind = K::LABEL,
        types = definitions.len(),
        members = population.total_members(),
        operation_updates = updated,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Population built"
    );
    Ok(population)
}
