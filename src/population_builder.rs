//! Member construction
//!
//! Creates every member of every type up front, including the inactive
//! capacity reserved for future ADD and CHURN modifications. Attribute
//! expressions are evaluated member by member in construction order because
//! sequence primitives are stateful.

use crate::definition::{Definitions, TypeDefinition};
use crate::error::Result;
use crate::evaluator::{EvalContext, EvalScope, ExpressionEvaluator};
use crate::kind::MemberKind;
use crate::member::Member;
use crate::population::{Population, TypePopulation};
use crate::types::SessionId;
use std::marker::PhantomData;
use tracing::debug;

/// Builds the members of a population
pub struct PopulationBuilder<'a, K: MemberKind> {
    session: &'a SessionId,
    evaluator: &'a dyn ExpressionEvaluator,
    _kind: PhantomData<K>,
}

impl<'a, K: MemberKind> PopulationBuilder<'a, K> {
    /// Create a builder for one session
    pub fn new(session: &'a SessionId, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            session,
            evaluator,
            _kind: PhantomData,
        }
    }

    /// Validate the definitions, then create all members of all types
    pub fn build(&self, definitions: &Definitions) -> Result<Population<K>> {
        definitions.validate()?;

        let mut population = Population::new();
        for definition in definitions.iter() {
            population.insert_type(self.build_type(definition)?);
        }
        Ok(population)
    }

    fn build_type(&self, definition: &TypeDefinition) -> Result<TypePopulation> {
        let capacity = definition.count_with_runtime_modifications();
        let contexts: Vec<(&str, &str, EvalContext)> = definition
            .attributes
            .iter()
            .map(|(name, expression)| {
                let ctx = EvalContext::new::<K>(
                    self.session,
                    &definition.name,
                    EvalScope::Attribute(name.clone()),
                    expression,
                );
                (name.as_str(), expression.as_str(), ctx)
            })
            .collect();

        let mut members = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let mut member = Member::new(&definition.name, index, index < definition.count);
            for (name, expression, ctx) in &contexts {
                let value = self.evaluator.evaluate(ctx, expression)?;
                member.set_attribute(*name, value);
            }
            members.push(member);
        }

        debug!(
            kind = K::LABEL,
            type_name = %definition.name,
            active = definition.count,
            capacity = capacity,
            "Built members"
        );
        Ok(TypePopulation::new(&definition.name, members, definition.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::RuntimeModification;
    use crate::error::PopulationError;
    use crate::evaluator::{BasicEvaluator, MockExpressionEvaluator};
    use crate::kind::Entity;
    use crate::types::ActiveWindow;
    use serde_json::json;

    fn builder<'a>(session: &'a SessionId, evaluator: &'a dyn ExpressionEvaluator) -> PopulationBuilder<'a, Entity> {
        PopulationBuilder::new(session, evaluator)
    }

    #[test]
    fn test_sizes_and_initial_flags() {
        let session = SessionId::new("b1");
        let evaluator = BasicEvaluator::new();
        let definitions = Definitions::new(vec![
            TypeDefinition::new("node", 25)
                .with_attribute("name", "counter('node-')")
                .with_modification(RuntimeModification::add(5, 2, 10)),
            TypeDefinition::new("disk", 3).with_attribute("size", "512"),
        ]);

        let population = builder(&session, &evaluator).build(&definitions).unwrap();
        for definition in definitions.iter() {
            let members = population.members(&definition.name);
            assert_eq!(members.len(), definition.count_with_runtime_modifications());
            for (i, member) in members.iter().enumerate() {
                assert_eq!(member.is_active(), i < definition.count);
                assert_eq!(member.index(), i);
            }
        }
        assert_eq!(population.members("node").len(), 50);
        assert_eq!(population.get("node").unwrap().window(), ActiveWindow::new(0, 25));
    }

    #[test]
    fn test_attributes_follow_construction_order() {
        let session = SessionId::new("b2");
        let evaluator = BasicEvaluator::new();
        let definitions = Definitions::new(vec![TypeDefinition::new("node", 3)
            .with_attribute("name", "counter('node-')")
            .with_attribute("zone", "roundRobin('a', 'b')")]);

        let population = builder(&session, &evaluator).build(&definitions).unwrap();
        let names: Vec<_> = population.members("node").iter().map(|m| m.attribute("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("node-1")), Some(json!("node-2")), Some(json!("node-3"))]);
        assert_eq!(population.members("node")[2].attribute("zone"), Some(&json!("a")));

        let keys: Vec<_> = population.members("node")[0].attributes().keys().cloned().collect();
        assert_eq!(keys, vec!["name", "zone"]);
    }

    #[test]
    fn test_same_expression_on_two_types_is_independent() {
        let session = SessionId::new("b3");
        let evaluator = BasicEvaluator::new();
        let definitions = Definitions::new(vec![
            TypeDefinition::new("node", 2).with_attribute("id", "counter()"),
            TypeDefinition::new("pod", 2).with_attribute("id", "counter()"),
        ]);
        let population = builder(&session, &evaluator).build(&definitions).unwrap();
        assert_eq!(population.members("pod")[0].attribute("id"), Some(&json!(1)));
        assert_eq!(population.members("node")[1].attribute("id"), Some(&json!(2)));
    }

    #[test]
    fn test_config_error_before_any_evaluation() {
        let session = SessionId::new("b4");
        let mut evaluator = MockExpressionEvaluator::new();
        evaluator.expect_evaluate().never();

        let definitions = Definitions::new(vec![
            TypeDefinition::new("node", 2).with_attribute("id", "counter()"),
            TypeDefinition::new("pod", 2),
        ]);
        let result = builder(&session, &evaluator).build(&definitions);
        assert!(matches!(result, Err(PopulationError::Config(_))));
    }

    #[test]
    fn test_evaluator_error_propagates() {
        let session = SessionId::new("b5");
        let evaluator = BasicEvaluator::new();
        let definitions = Definitions::new(vec![TypeDefinition::new("node", 2).with_attribute("id", "nope()")]);
        let result = builder(&session, &evaluator).build(&definitions);
        assert!(matches!(result, Err(PopulationError::Evaluation { .. })));
    }
}
