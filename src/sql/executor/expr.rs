use std::{cmp::Ordering, rc::Rc};

use tracing::trace;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        plan::{BinaryOperator, Expression, Function, Subquery, SubqueryKind, UnaryOperator},
        types::{Row, Value},
    },
};

use super::{Context, Executor, collect};

/// Evaluates an expression against a row. Column references with a depth
/// above zero read the rows of enclosing queries from the context.
pub fn evaluate<T: Transaction + 'static>(
    expr: &Expression,
    row: &[Value],
    ctx: &mut Context<'_, T>,
) -> Result<Value> {
    Ok(match expr {
        Expression::Constant(value) => value.clone(),
        Expression::Column { depth: 0, index } => row
            .get(*index)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("column index {} out of range", index)))?,
        Expression::Column { depth, index } => ctx
            .outer
            .len()
            .checked_sub(*depth)
            .and_then(|level| ctx.outer.get(level))
            .and_then(|outer| outer.get(*index))
            .cloned()
            .ok_or_else(|| {
                Error::Internal(format!("outer column {} at depth {} not bound", index, depth))
            })?,
        Expression::Binary(op, lhs, rhs) => evaluate_binary(*op, lhs, rhs, row, ctx)?,
        Expression::Unary(op, expr) => {
            let value = evaluate(expr, row, ctx)?;
            match op {
                UnaryOperator::Not => match value.truth()? {
                    Some(b) => Value::Boolean(!b),
                    None => Value::Null,
                },
                UnaryOperator::Negate => value.negate()?,
                UnaryOperator::Identity => value,
            }
        }
        Expression::IsNull { expr, negated } => {
            Value::Boolean(evaluate(expr, row, ctx)?.is_null() != *negated)
        }
        Expression::Function(function, args) => {
            let args = args
                .iter()
                .map(|a| evaluate(a, row, ctx))
                .collect::<Result<Vec<_>>>()?;
            evaluate_function(*function, args)?
        }
        Expression::Case {
            operand,
            when_then,
            else_expr,
        } => {
            let operand = match operand {
                Some(o) => Some(evaluate(o, row, ctx)?),
                None => None,
            };
            for (when, then) in when_then {
                let when = evaluate(when, row, ctx)?;
                let hit = match &operand {
                    Some(o) => o.compare(&when)? == Some(Ordering::Equal),
                    None => when.truth()? == Some(true),
                };
                if hit {
                    return evaluate(then, row, ctx);
                }
            }
            match else_expr {
                Some(e) => evaluate(e, row, ctx)?,
                None => Value::Null,
            }
        }
        Expression::Cast(expr, datatype) => evaluate(expr, row, ctx)?.cast(*datatype)?,
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, row, ctx)?;
            let mut candidates = Vec::with_capacity(list.len());
            for item in list {
                candidates.push(evaluate(item, row, ctx)?);
            }
            membership(&value, candidates.iter(), *negated)?
        }
        Expression::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = evaluate(expr, row, ctx)?;
            let pattern = evaluate(pattern, row, ctx)?;
            if value.is_null() || pattern.is_null() {
                Value::Null
            } else {
                Value::Boolean(like(&value.as_text(), &pattern.as_text()) != *negated)
            }
        }
        Expression::Subquery(subquery) => evaluate_subquery(subquery, row, ctx)?,
    })
}

fn evaluate_binary<T: Transaction + 'static>(
    op: BinaryOperator,
    lhs: &Expression,
    rhs: &Expression,
    row: &[Value],
    ctx: &mut Context<'_, T>,
) -> Result<Value> {
    let left = evaluate(lhs, row, ctx)?;
    // AND/OR use three-valued logic and skip the right side when decided
    match op {
        BinaryOperator::And => {
            let l = left.truth()?;
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            return Ok(match (l, evaluate(rhs, row, ctx)?.truth()?) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            });
        }
        BinaryOperator::Or => {
            let l = left.truth()?;
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            return Ok(match (l, evaluate(rhs, row, ctx)?.truth()?) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            });
        }
        _ => {}
    }

    let right = evaluate(rhs, row, ctx)?;
    let on_zero = ctx.config.division_by_zero;
    let compare = |check: fn(Ordering) -> bool| -> Result<Value> {
        Ok(match left.compare(&right)? {
            Some(ordering) => Value::Boolean(check(ordering)),
            None => Value::Null,
        })
    };
    match op {
        BinaryOperator::Equal => compare(|o| o == Ordering::Equal),
        BinaryOperator::NotEqual => compare(|o| o != Ordering::Equal),
        BinaryOperator::LessThan => compare(|o| o == Ordering::Less),
        BinaryOperator::LessThanOrEqual => compare(|o| o != Ordering::Greater),
        BinaryOperator::GreaterThan => compare(|o| o == Ordering::Greater),
        BinaryOperator::GreaterThanOrEqual => compare(|o| o != Ordering::Less),
        BinaryOperator::Add => left.add(&right),
        BinaryOperator::Subtract => left.subtract(&right),
        BinaryOperator::Multiply => left.multiply(&right),
        BinaryOperator::Divide => left.divide(&right, on_zero),
        BinaryOperator::Remainder => left.remainder(&right, on_zero),
        BinaryOperator::Concat => Ok(left.concat(&right)),
        BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
    }
}

/// `value IN (candidates)` with SQL NULL semantics: a miss against a list
/// containing NULL is unknown rather than false
fn membership<'v>(
    value: &Value,
    candidates: impl Iterator<Item = &'v Value>,
    negated: bool,
) -> Result<Value> {
    let mut saw_null = false;
    let mut empty = true;
    for candidate in candidates {
        empty = false;
        match value.compare(candidate)? {
            Some(Ordering::Equal) => return Ok(Value::Boolean(!negated)),
            Some(_) => {}
            None => saw_null = true,
        }
    }
    Ok(if empty {
        Value::Boolean(negated)
    } else if saw_null {
        Value::Null
    } else {
        Value::Boolean(negated)
    })
}

fn evaluate_function(function: Function, mut args: Vec<Value>) -> Result<Value> {
    let type_error = |name: &str, v: &Value| {
        Error::TypeError(format!(
            "{}() does not accept {}",
            name,
            v.datatype().map(|d| d.to_string()).unwrap_or_default()
        ))
    };
    Ok(match function {
        Function::Abs => match args.swap_remove(0) {
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Integer(b as i64),
            Value::Integer(i) => match i.checked_abs() {
                Some(v) => Value::Integer(v),
                None => Value::Real((i as f64).abs()),
            },
            Value::Real(r) => Value::Real(r.abs()),
            v @ Value::Text(_) => return Err(type_error("abs", &v)),
        },
        Function::Coalesce => args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        Function::IfNull => {
            let fallback = args.pop().unwrap_or(Value::Null);
            match args.pop() {
                Some(Value::Null) | None => fallback,
                Some(v) => v,
            }
        }
        Function::NullIf => {
            let other = args.pop().unwrap_or(Value::Null);
            let value = args.pop().unwrap_or(Value::Null);
            if value.compare(&other)? == Some(Ordering::Equal) {
                Value::Null
            } else {
                value
            }
        }
        Function::Length => match args.swap_remove(0) {
            Value::Null => Value::Null,
            v => Value::Integer(v.as_text().chars().count() as i64),
        },
        Function::Lower => match args.swap_remove(0) {
            Value::Null => Value::Null,
            v => Value::Text(v.as_text().to_lowercase()),
        },
        Function::Upper => match args.swap_remove(0) {
            Value::Null => Value::Null,
            v => Value::Text(v.as_text().to_uppercase()),
        },
        Function::Round => {
            let digits = match args.get(1) {
                None => 0,
                Some(Value::Null) => return Ok(Value::Null),
                Some(Value::Integer(d)) => *d,
                Some(v) => return Err(type_error("round", v)),
            };
            let x = match args.swap_remove(0) {
                Value::Null => return Ok(Value::Null),
                Value::Boolean(b) => b as i64 as f64,
                Value::Integer(i) => i as f64,
                Value::Real(r) => r,
                v @ Value::Text(_) => return Err(type_error("round", &v)),
            };
            let factor = 10f64.powi(digits.clamp(0, 15) as i32);
            Value::Real((x * factor).round() / factor)
        }
    })
}

/// Runs a subquery for the current row. Uncorrelated results are computed
/// once per statement and cached.
fn evaluate_subquery<T: Transaction + 'static>(
    subquery: &Subquery,
    row: &[Value],
    ctx: &mut Context<'_, T>,
) -> Result<Value> {
    // EXISTS and scalar subqueries only need their first row
    let limit = match subquery.kind {
        SubqueryKind::In { .. } => None,
        SubqueryKind::Scalar | SubqueryKind::Exists { .. } => Some(1),
    };

    let cached = match subquery.correlated {
        true => None,
        false => ctx.cache.get(&subquery.id).cloned(),
    };
    let rows = match cached {
        Some(rows) => rows,
        None => {
            if ctx.outer.len() >= ctx.config.max_subquery_depth {
                return Err(Error::StackDepthExceeded(ctx.config.max_subquery_depth));
            }
            trace!(id = subquery.id, correlated = subquery.correlated, "running subquery");
            ctx.outer.push(row.to_vec());
            let result = <dyn Executor<T>>::build(&subquery.plan)
                .and_then(|mut executor| collect(executor.as_mut(), ctx, limit));
            ctx.outer.pop();
            let rows = Rc::new(result?);
            if !subquery.correlated {
                ctx.cache.insert(subquery.id, rows.clone());
            }
            rows
        }
    };

    Ok(match &subquery.kind {
        SubqueryKind::Scalar => rows
            .first()
            .and_then(|r: &Row| r.first().cloned())
            .unwrap_or(Value::Null),
        SubqueryKind::Exists { negated } => Value::Boolean(rows.is_empty() == *negated),
        SubqueryKind::In { expr, negated } => {
            let value = evaluate(expr, row, ctx)?;
            membership(&value, rows.iter().filter_map(|r| r.first()), *negated)?
        }
    })
}

/// SQL LIKE: `%` matches any run of characters, `_` any single character.
/// ASCII letters match case-insensitively.
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut t, mut p) = (0, 0);
    // Position of the last `%` and the text index it is currently matched up to
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    backtrack = Some((bp, bt + 1));
                    p = bp + 1;
                    t = bt + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::{like, membership};
    use crate::{
        config::EngineConfig,
        error::{Error, Result},
        sql::{
            engine::{Engine, KVEngine, Transaction},
            parser::Parser,
            plan::Plan,
            types::Value,
        },
        storage::memory::MemoryEngine,
    };

    #[test]
    fn test_like() {
        assert!(like("hello", "h%o"));
        assert!(like("hello", "HE_LO"));
        assert!(like("hello", "%"));
        assert!(like("", "%"));
        assert!(like("abcabc", "%abc"));
        assert!(like("mississippi", "m%iss%pi"));
        assert!(!like("hello", "h_o"));
        assert!(!like("hello", "hello_"));
        assert!(!like("abc", ""));
    }

    #[test]
    fn test_membership_null_semantics() -> Result<()> {
        let list = [Value::Integer(1), Value::Null];
        assert_eq!(membership(&Value::Integer(1), list.iter(), false)?, Value::Boolean(true));
        assert_eq!(membership(&Value::Integer(2), list.iter(), false)?, Value::Null);
        assert_eq!(membership(&Value::Integer(2), list.iter(), true)?, Value::Null);
        assert_eq!(membership(&Value::Null, [].iter(), false)?, Value::Boolean(false));
        assert_eq!(
            membership(&Value::Integer(2), [Value::Integer(1)].iter(), true)?,
            Value::Boolean(true)
        );
        Ok(())
    }

    #[test]
    fn test_subquery_depth_at_runtime() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new());
        let mut txn = engine.begin()?;
        let stmt = Parser::new("select (select (select 1))").parse()?;
        let plan = Plan::build(stmt, &txn, &EngineConfig::default())?;

        let shallow = EngineConfig {
            max_subquery_depth: 1,
            ..EngineConfig::default()
        };
        assert_eq!(
            plan.execute(&mut txn, &shallow),
            Err(Error::StackDepthExceeded(1))
        );
        txn.rollback()
    }
}
