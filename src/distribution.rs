//! Parent → child distribution
//!
//! For each `(child type, count expression)` of a parent type, parents are
//! walked in construction order and each receives the next `count` children
//! from a cursor over the child list. The cursor wraps to 0 once it reaches
//! the end, so later parents may share children already handed out. If the
//! cursor never wrapped, whatever is left after the last parent goes to the
//! last parent.

use crate::definition::Definitions;
use crate::error::{PopulationError, Result};
use crate::evaluator::{EvalContext, EvalScope, ExpressionEvaluator};
use crate::expr::value_as_count;
use crate::kind::MemberKind;
use crate::population::Population;
use crate::types::{MemberRef, SessionId};
use std::marker::PhantomData;
use tracing::debug;

/// Assigns children to parents
pub struct DistributionMapper<'a, K: MemberKind> {
    session: &'a SessionId,
    evaluator: &'a dyn ExpressionEvaluator,
    _kind: PhantomData<K>,
}

impl<'a, K: MemberKind> DistributionMapper<'a, K> {
    /// Create a mapper for one session
    pub fn new(session: &'a SessionId, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            session,
            evaluator,
            _kind: PhantomData,
        }
    }

    /// Link children to parents for every distribution, in place
    pub fn map_children(&self, population: &mut Population<K>, definitions: &Definitions) -> Result<()> {
        for definition in definitions.iter() {
            for (child_type, expression) in &definition.children_distribution {
                let links = self.assign(population, &definition.name, child_type, expression)?;
                self.link(population, &definition.name, child_type, links)?;
            }
        }
        Ok(())
    }

    /// Compute `(parent index, child index)` pairs for one distribution
    fn assign(
        &self,
        population: &mut Population<K>,
        parent_type: &str,
        child_type: &str,
        expression: &str,
    ) -> Result<Vec<(usize, usize)>> {
        population.graph_mut().add_edge(parent_type, child_type);

        let parent_len = population.members(parent_type).len();
        let child_len = population
            .get(child_type)
            .ok_or_else(|| PopulationError::config(format!("unknown child type '{}'", child_type)))?
            .len();
        let ctx = EvalContext::new::<K>(
            self.session,
            parent_type,
            EvalScope::Children(child_type.to_string()),
            expression,
        );

        let mut links = Vec::new();
        let mut cursor: usize = 0;
        let mut wrapped = false;
        for parent in 0..parent_len {
            let count = value_as_count(&self.evaluator.evaluate(&ctx, expression)?, expression)?;
            let end = cursor.saturating_add(count).min(child_len);
            links.extend((cursor..end).map(|child| (parent, child)));

            cursor = cursor.saturating_add(count);
            if cursor >= child_len {
                cursor = 0;
                wrapped = true;
            }
        }

        if !wrapped && parent_len > 0 {
            let last = parent_len - 1;
            links.extend((cursor..child_len).map(|child| (last, child)));
        }

        debug!(
            kind = K::LABEL,
            parent = %parent_type,
            child = %child_type,
            parents = parent_len,
            children = child_len,
            links = links.len(),
            "Mapped children"
        );
        Ok(links)
    }

    fn link(
        &self,
        population: &mut Population<K>,
        parent_type: &str,
        child_type: &str,
        links: Vec<(usize, usize)>,
    ) -> Result<()> {
        let missing = |name: &str| PopulationError::internal(format!("type '{}' missing from population", name));

        let parents = population
            .get_mut(parent_type)
            .ok_or_else(|| missing(parent_type))?
            .members_mut();
        for parent in parents.iter_mut() {
            parent.init_children(child_type);
        }
        for &(parent, child) in &links {
            parents[parent].push_child(MemberRef::new(child_type, child));
        }

        let children = population
            .get_mut(child_type)
            .ok_or_else(|| missing(child_type))?
            .members_mut();
        for &(parent, child) in &links {
            children[child].push_parent(MemberRef::new(parent_type, parent));
        }
        Ok(())
    }
}
