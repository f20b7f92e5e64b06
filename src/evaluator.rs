//! Expression evaluation
//!
//! ## Table of Contents
//! - **EvalContext**: Stable key scoping stateful sequences to one logical sequence
//! - **ExpressionEvaluator**: Pluggable evaluator trait
//! - **EvaluatorFactory**: Creates one evaluator per session
//! - **BasicEvaluator**: Reference evaluator with deterministic sequence primitives
//!
//! Sequence state belongs to an evaluator instance, and the runtime creates
//! one instance per session, so two sessions never share counters.

use crate::error::{PopulationError, Result};
use crate::expr::{self, value_as_text, Expr, Node};
use crate::kind::MemberKind;
use crate::types::SessionId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::trace;

/// What an evaluation is computing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvalScope {
    /// Attribute value of a member
    Attribute(String),
    /// Number of children of the given type for one parent
    Children(String),
    /// Attribute operation at the given position in the type's list
    Operation(usize),
}

impl fmt::Display for EvalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalScope::Attribute(name) => write!(f, "attr:{}", name),
            EvalScope::Children(child) => write!(f, "children:{}", child),
            EvalScope::Operation(index) => write!(f, "op:{}", index),
        }
    }
}

/// Context passed with every evaluator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalContext {
    key: String,
    type_name: String,
    scope: EvalScope,
}

impl EvalContext {
    /// Build the context for `(session, kind, type, scope, expression)`
    pub fn new<K: MemberKind>(
        session: &SessionId,
        type_name: &str,
        scope: EvalScope,
        expression: &str,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        expression.hash(&mut hasher);
        let key = format!(
            "{}/{}/{}/{}/{:016x}",
            session,
            K::LABEL,
            type_name,
            scope,
            hasher.finish()
        );
        Self {
            key,
            type_name: type_name.to_string(),
            scope,
        }
    }

    /// Stable key identifying the sequence
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Member type being evaluated
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Evaluation scope
    pub fn scope(&self) -> &EvalScope {
        &self.scope
    }
}

/// Pluggable expression evaluator
#[cfg_attr(test, mockall::automock)]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression within a context
    fn evaluate(&self, context: &EvalContext, expression: &str) -> Result<Value>;

    /// Discard all sequence state
    fn reset(&self) {}

    /// Evaluator name for logging
    fn name(&self) -> &str {
        "custom"
    }
}

/// Type alias for a shared evaluator
pub type BoxedEvaluator = Arc<dyn ExpressionEvaluator>;

/// Creates the evaluator used by one session
pub trait EvaluatorFactory: Send + Sync {
    /// Create an evaluator for a session
    fn create(&self, session: &SessionId) -> BoxedEvaluator;
}

impl<F> EvaluatorFactory for F
where
    F: Fn(&SessionId) -> BoxedEvaluator + Send + Sync,
{
    fn create(&self, session: &SessionId) -> BoxedEvaluator {
        self(session)
    }
}

/// Factory producing a fresh [`BasicEvaluator`] per session
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluatorFactory;

impl EvaluatorFactory for BasicEvaluatorFactory {
    fn create(&self, _session: &SessionId) -> BoxedEvaluator {
        Arc::new(BasicEvaluator::new())
    }
}

#[derive(Debug, Default)]
struct Sequence {
    calls: u64,
    last: Option<String>,
}

/// Reference evaluator
///
/// Supported functions, all keyed by context and call position:
/// - `counter()`, `counter(start)`, `counter(prefix)`, `counter(prefix, start)`
/// - `roundRobin(a, b, ...)`
/// - `alphanumeric(seed)`: `seed`, then the seed incremented per call
/// - `ip(seed)`: `seed`, `seed + 1`, ...
/// - `distribution(base, everyOther, more)`: `base`, or `base + more` on every
///   `everyOther`-th call
/// - `concat(a, b, ...)`
/// - `uuid()`
#[derive(Debug, Default)]
pub struct BasicEvaluator {
    sequences: DashMap<String, Sequence>,
    cache: DashMap<String, Arc<Node>>,
}

impl BasicEvaluator {
    /// Create a new evaluator with empty sequence state
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sequences
    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    fn parsed(&self, expression: &str) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.get(expression) {
            return Ok(node.value().clone());
        }
        let node = Arc::new(expr::parse(expression)?);
        self.cache.insert(expression.to_string(), node.clone());
        Ok(node)
    }

    fn advance(&self, key: String) -> u64 {
        let mut seq = self.sequences.entry(key).or_default();
        let n = seq.calls;
        seq.calls += 1;
        n
    }

    fn eval(&self, ctx: &EvalContext, source: &str, node: &Node) -> Result<Value> {
        let (name, args, ordinal) = match &node.expr {
            Expr::Literal(value) => return Ok(value.clone()),
            Expr::Call { name, args, ordinal } => (name.as_str(), args, *ordinal),
        };
        let key = format!("{}#{}", ctx.key(), ordinal);
        let arg = |i: usize| -> Result<Value> {
            let node = args.get(i).ok_or_else(|| {
                PopulationError::evaluation(source, format!("{}() expects argument {}", name, i + 1))
            })?;
            self.eval(ctx, source, node)
        };

        match name {
            "counter" => {
                let (prefix, start) = match args.len() {
                    0 => (None, 1),
                    1 => match arg(0)? {
                        Value::String(prefix) => (Some(prefix), 1),
                        other => (None, as_i64(&other, source)?),
                    },
                    _ => (Some(value_as_text(&arg(0)?)), as_i64(&arg(1)?, source)?),
                };
                let n = start + self.advance(key) as i64;
                Ok(match prefix {
                    Some(prefix) => Value::String(format!("{}{}", prefix, n)),
                    None => Value::from(n),
                })
            }
            "roundRobin" => {
                if args.is_empty() {
                    return Err(PopulationError::evaluation(source, "roundRobin() needs at least one choice"));
                }
                let n = self.advance(key) as usize;
                arg(n % args.len())
            }
            "alphanumeric" => {
                let seed = value_as_text(&arg(0)?);
                let mut seq = self.sequences.entry(key).or_default();
                let next = match &seq.last {
                    Some(last) => increment_alphanumeric(last),
                    None => seed,
                };
                seq.calls += 1;
                seq.last = Some(next.clone());
                Ok(Value::String(next))
            }
            "ip" => {
                let seed = value_as_text(&arg(0)?);
                let base: Ipv4Addr = seed.parse().map_err(|_| {
                    PopulationError::evaluation(source, format!("invalid IPv4 seed '{}'", seed))
                })?;
                let n = self.advance(key) as u32;
                Ok(Value::String(Ipv4Addr::from(u32::from(base).wrapping_add(n)).to_string()))
            }
            "distribution" => {
                let base = as_i64(&arg(0)?, source)?;
                let every_other = as_i64(&arg(1)?, source)?;
                let more = as_i64(&arg(2)?, source)?;
                let n = self.advance(key) as i64 + 1;
                if every_other > 0 && n % every_other == 0 {
                    Ok(Value::from(base + more))
                } else {
                    Ok(Value::from(base))
                }
            }
            "concat" => {
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&value_as_text(&arg(i)?));
                }
                Ok(Value::String(out))
            }
            "uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            other => Err(PopulationError::evaluation(
                source,
                format!("unknown function '{}'", other),
            )),
        }
    }
}

impl ExpressionEvaluator for BasicEvaluator {
    fn evaluate(&self, context: &EvalContext, expression: &str) -> Result<Value> {
        let node = self.parsed(expression)?;
        let value = self.eval(context, expression, &node)?;
        trace!(key = %context.key(), value = %value, "Evaluated expression");
        Ok(value)
    }

    fn reset(&self) {
        self.sequences.clear();
    }

    fn name(&self) -> &str {
        "basic"
    }
}

fn as_i64(value: &Value, source: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| PopulationError::evaluation(source, format!("expected an integer, got {}", value)))
}

/// Increment the alphanumeric characters of `s` with carry, leaving
/// separators in place (`rack-09` becomes `rack-10`, `az` becomes `ba`).
fn increment_alphanumeric(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    for i in (0..chars.len()).rev() {
        let (next, carry) = match chars[i] {
            '9' => ('0', true),
            'z' => ('a', true),
            'Z' => ('A', true),
            c if c.is_ascii_alphanumeric() => ((c as u8 + 1) as char, false),
            _ => continue,
        };
        chars[i] = next;
        if !carry {
            break;
        }
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{Entity, Resource};
    use serde_json::json;

    fn ctx(attr: &str, expression: &str) -> EvalContext {
        EvalContext::new::<Entity>(
            &SessionId::new("s1"),
            "node",
            EvalScope::Attribute(attr.into()),
            expression,
        )
    }

    fn run(eval: &BasicEvaluator, ctx: &EvalContext, expression: &str, times: usize) -> Vec<Value> {
        (0..times).map(|_| eval.evaluate(ctx, expression).unwrap()).collect()
    }

    #[test]
    fn test_context_keys_are_scoped() {
        let session = SessionId::new("s1");
        let a = EvalContext::new::<Entity>(&session, "node", EvalScope::Attribute("id".into()), "counter()");
        let b = EvalContext::new::<Entity>(&session, "pod", EvalScope::Attribute("id".into()), "counter()");
        let c = EvalContext::new::<Resource>(&session, "node", EvalScope::Attribute("id".into()), "counter()");
        assert_ne!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert!(a.key().starts_with("s1/entity/node/attr:id/"));
        assert_eq!(
            a,
            EvalContext::new::<Entity>(&session, "node", EvalScope::Attribute("id".into()), "counter()")
        );
    }

    #[test]
    fn test_counter_variants() {
        let eval = BasicEvaluator::new();
        assert_eq!(run(&eval, &ctx("a", "counter()"), "counter()", 3), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(run(&eval, &ctx("b", "counter(10)"), "counter(10)", 2), vec![json!(10), json!(11)]);
        assert_eq!(
            run(&eval, &ctx("c", "counter('host-')"), "counter('host-')", 2),
            vec![json!("host-1"), json!("host-2")]
        );
        assert_eq!(
            run(&eval, &ctx("d", "counter('n', 0)"), "counter('n', 0)", 2),
            vec![json!("n0"), json!("n1")]
        );
    }

    #[test]
    fn test_independent_contexts() {
        let eval = BasicEvaluator::new();
        let a = ctx("a", "counter()");
        let b = ctx("b", "counter()");
        assert_eq!(eval.evaluate(&a, "counter()").unwrap(), json!(1));
        assert_eq!(eval.evaluate(&b, "counter()").unwrap(), json!(1));
        assert_eq!(eval.evaluate(&a, "counter()").unwrap(), json!(2));
    }

    #[test]
    fn test_round_robin() {
        let eval = BasicEvaluator::new();
        let expression = "roundRobin('a', 'b', 'c')";
        assert_eq!(
            run(&eval, &ctx("zone", expression), expression, 4),
            vec![json!("a"), json!("b"), json!("c"), json!("a")]
        );
    }

    #[test]
    fn test_alphanumeric_and_ip() {
        let eval = BasicEvaluator::new();
        let expression = "alphanumeric('rack-a8')";
        assert_eq!(
            run(&eval, &ctx("rack", expression), expression, 3),
            vec![json!("rack-a8"), json!("rack-a9"), json!("rack-b0")]
        );

        let expression = "ip('10.0.0.254')";
        assert_eq!(
            run(&eval, &ctx("ip", expression), expression, 3),
            vec![json!("10.0.0.254"), json!("10.0.0.255"), json!("10.0.1.0")]
        );
    }

    #[test]
    fn test_increment_alphanumeric_carry() {
        assert_eq!(increment_alphanumeric("az"), "ba");
        assert_eq!(increment_alphanumeric("Z9"), "A0");
        assert_eq!(increment_alphanumeric("x-9"), "y-0");
    }

    #[test]
    fn test_distribution() {
        let eval = BasicEvaluator::new();
        let expression = "distribution(2, 3, 1)";
        assert_eq!(
            run(&eval, &ctx("n", expression), expression, 6),
            vec![json!(2), json!(2), json!(3), json!(2), json!(2), json!(3)]
        );
    }

    #[test]
    fn test_concat_with_nested_sequences() {
        let eval = BasicEvaluator::new();
        let expression = "concat('pod-', counter(), '-', roundRobin('x', 'y'))";
        assert_eq!(
            run(&eval, &ctx("name", expression), expression, 2),
            vec![json!("pod-1-x"), json!("pod-2-y")]
        );
    }

    #[test]
    fn test_reset_restarts_sequences() {
        let eval = BasicEvaluator::new();
        let c = ctx("a", "counter()");
        eval.evaluate(&c, "counter()").unwrap();
        eval.evaluate(&c, "counter()").unwrap();
        assert_eq!(eval.sequence_count(), 1);
        eval.reset();
        assert_eq!(eval.evaluate(&c, "counter()").unwrap(), json!(1));
    }

    #[test]
    fn test_errors() {
        let eval = BasicEvaluator::new();
        assert!(eval.evaluate(&ctx("a", "nope()"), "nope()").is_err());
        assert!(eval.evaluate(&ctx("a", "ip('x')"), "ip('x')").is_err());
        assert!(eval.evaluate(&ctx("a", "roundRobin()"), "roundRobin()").is_err());
        assert!(eval.evaluate(&ctx("a", "distribution(1)"), "distribution(1)").is_err());
    }

    #[test]
    fn test_factory_creates_isolated_evaluators() {
        let factory = BasicEvaluatorFactory;
        let a = factory.create(&SessionId::new("a"));
        let b = factory.create(&SessionId::new("b"));
        let c = ctx("a", "counter()");
        assert_eq!(a.evaluate(&c, "counter()").unwrap(), json!(1));
        assert_eq!(b.evaluate(&c, "counter()").unwrap(), json!(1));
        assert_eq!(a.name(), "basic");
    }
}
