//! Attribute operations and their scheduler
//!
//! ## Table of Contents
//! - **AttributeOperation**: Parsed `copyFromParent` / `modifyFromParent`
//! - **OperationScheduler**: Runs operations parents-first by type level
//!
//! Operation syntax:
//!
//! ```text
//! copyFromParent('node', 'zone')
//! modifyFromParent('node', 'hostname', 'podHost', concat('-', counter()))
//! ```
//!
//! Both operations read from the member's first parent of the named type and
//! fall back to the empty string when the parent or its attribute is missing.
//! Copy skips members without such a parent; modify still writes
//! `"" + suffix` so that suffix sequences advance once per member.

use crate::definition::Definitions;
use crate::error::{PopulationError, Result};
use crate::evaluator::{EvalContext, EvalScope, ExpressionEvaluator};
use crate::expr::{self, value_as_text, Expr, Node};
use crate::kind::MemberKind;
use crate::population::Population;
use crate::types::SessionId;
use serde_json::Value;
use std::marker::PhantomData;
use tracing::debug;

/// Cross-member attribute derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOperation {
    /// Copy `attribute` from the first parent of `parent_type`
    CopyFromParent {
        /// Parent type to read from
        parent_type: String,
        /// Attribute to copy (same name on both sides)
        attribute: String,
    },
    /// Store `parent.source + suffix` under `target`
    ModifyFromParent {
        /// Parent type to read from
        parent_type: String,
        /// Attribute read from the parent
        source: String,
        /// Attribute written on the member
        target: String,
        /// Expression evaluated per member and appended
        suffix: Option<String>,
    },
}

impl AttributeOperation {
    /// Parse an operation expression
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |msg: &str| {
            PopulationError::config(format!("invalid attribute operation `{}`: {}", expression, msg))
        };
        let node = expr::parse(expression).map_err(|e| invalid(&e.to_string()))?;
        let Expr::Call { name, args, .. } = &node.expr else {
            return Err(invalid("expected an operation call"));
        };

        let text = |i: usize| -> Result<String> {
            args.get(i)
                .and_then(Node::as_str_literal)
                .map(str::to_string)
                .ok_or_else(|| invalid(&format!("argument {} must be a string literal", i + 1)))
        };

        match name.as_str() {
            "copyFromParent" if args.len() == 2 => Ok(Self::CopyFromParent {
                parent_type: text(0)?,
                attribute: text(1)?,
            }),
            "modifyFromParent" if args.len() == 3 || args.len() == 4 => {
                let suffix = args
                    .get(3)
                    .filter(|n| n.as_str_literal() != Some(""))
                    .map(|n| n.source(expression).to_string());
                Ok(Self::ModifyFromParent {
                    parent_type: text(0)?,
                    source: text(1)?,
                    target: text(2)?,
                    suffix,
                })
            }
            "copyFromParent" | "modifyFromParent" => Err(invalid("wrong number of arguments")),
            other => Err(invalid(&format!("unknown operation '{}'", other))),
        }
    }

    /// Parent type the operation reads from
    pub fn parent_type(&self) -> &str {
        match self {
            Self::CopyFromParent { parent_type, .. } | Self::ModifyFromParent { parent_type, .. } => parent_type,
        }
    }
}

/// Executes attribute operations in ascending type level
pub struct OperationScheduler<'a, K: MemberKind> {
    session: &'a SessionId,
    evaluator: &'a dyn ExpressionEvaluator,
    _kind: PhantomData<K>,
}

impl<'a, K: MemberKind> OperationScheduler<'a, K> {
    /// Create a scheduler for one session
    pub fn new(session: &'a SessionId, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            session,
            evaluator,
            _kind: PhantomData,
        }
    }

    /// Apply every declared operation; returns the number of operations run
    pub fn apply_operations(&self, population: &mut Population<K>, definitions: &Definitions) -> Result<usize> {
        let participating = definitions
            .iter()
            .filter(|d| !d.attribute_operations.is_empty())
            .map(|d| d.name.as_str());
        let buckets: Vec<(usize, Vec<String>)> = population
            .graph()
            .buckets(participating)?
            .into_iter()
            .map(|(level, names)| (level, names.into_iter().map(str::to_string).collect()))
            .collect();

        let mut applied = 0;
        for (level, names) in buckets {
            for type_name in names {
                let Some(definition) = definitions.get(&type_name) else {
                    continue;
                };
                debug!(
                    kind = K::LABEL,
                    type_name = %type_name,
                    level = level,
                    operations = definition.attribute_operations.len(),
                    "Applying attribute operations"
                );
                for (position, expression) in definition.attribute_operations.iter().enumerate() {
                    let operation = AttributeOperation::parse(expression)?;
                    self.apply_one(population, &type_name, position, &operation)?;
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    fn apply_one(
        &self,
        population: &mut Population<K>,
        type_name: &str,
        position: usize,
        operation: &AttributeOperation,
    ) -> Result<()> {
        let members = population.members(type_name);
        let mut updates = Vec::with_capacity(members.len());

        match operation {
            AttributeOperation::CopyFromParent { parent_type, attribute } => {
                for member in members {
                    let Some(parent) = member.primary_parent(parent_type) else {
                        continue;
                    };
                    let value = population
                        .member(parent)
                        .and_then(|p| p.attribute(attribute))
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new()));
                    updates.push((member.index(), attribute.clone(), value));
                }
            }
            AttributeOperation::ModifyFromParent {
                parent_type,
                source,
                target,
                suffix,
            } => {
                let suffix = suffix.as_deref().map(|s| {
                    (
                        s,
                        EvalContext::new::<K>(self.session, type_name, EvalScope::Operation(position), s),
                    )
                });
                for member in members {
                    let mut value = member
                        .primary_parent(parent_type)
                        .and_then(|p| population.member(p))
                        .and_then(|p| p.attribute(source))
                        .map(value_as_text)
                        .unwrap_or_default();
                    if let Some((expression, ctx)) = &suffix {
                        value.push_str(&value_as_text(&self.evaluator.evaluate(ctx, expression)?));
                    }
                    updates.push((member.index(), target.clone(), Value::String(value)));
                }
            }
        }

        let target = population
            .get_mut(type_name)
            .ok_or_else(|| PopulationError::internal(format!("type '{}' missing from population", type_name)))?;
        let members = target.members_mut();
        for (index, name, value) in updates {
            members[index].set_attribute(name, value);
        }
        Ok(())
    }
}
