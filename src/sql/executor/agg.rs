use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    vec,
};

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        plan::{self, AggregateFunction, Expression},
        types::{Coerced, GroupKey, Row, Value},
    },
};

use super::{Context, Executor, evaluate};

/// Aggregate executor - groups its input and computes one row per group
///
/// Output rows hold the group key values followed by the aggregate results.
/// Groups are emitted in order of first appearance. Without GROUP BY the
/// whole input is one group, even when it is empty.
pub struct Aggregate<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    group_by: &'a [Expression],
    aggregates: &'a [plan::Aggregate],
    rows: vec::IntoIter<Row>,
}

impl<'a, T: Transaction> Aggregate<'a, T> {
    pub fn new(
        source: Box<dyn Executor<T> + 'a>,
        group_by: &'a [Expression],
        aggregates: &'a [plan::Aggregate],
    ) -> Box<Self> {
        Box::new(Self {
            source,
            group_by,
            aggregates,
            rows: Vec::new().into_iter(),
        })
    }

    fn accumulators(&self) -> Vec<Box<dyn Accumulator>> {
        self.aggregates
            .iter()
            .map(<dyn Accumulator>::build)
            .collect()
    }
}

impl<T: Transaction + 'static> Executor<T> for Aggregate<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.source.open(ctx)?;

        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<(Row, Vec<Box<dyn Accumulator>>)> = Vec::new();
        if self.group_by.is_empty() {
            index.insert(GroupKey(Vec::new()), 0);
            groups.push((Vec::new(), self.accumulators()));
        }

        while let Some(row) = self.source.next(ctx)? {
            let key = self
                .group_by
                .iter()
                .map(|expr| evaluate(expr, &row, ctx))
                .collect::<Result<Row>>()?;
            let position = match index.get(&GroupKey(key.clone())) {
                Some(position) => *position,
                None => {
                    index.insert(GroupKey(key.clone()), groups.len());
                    groups.push((key, self.accumulators()));
                    groups.len() - 1
                }
            };

            let accumulators = &mut groups[position].1;
            for (aggregate, accumulator) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                let value = match &aggregate.arg {
                    Some(arg) => evaluate(arg, &row, ctx)?,
                    // COUNT(*) counts rows, so any non-NULL placeholder works
                    None => Value::Boolean(true),
                };
                accumulator.accumulate(value)?;
            }
        }

        self.rows = groups
            .into_iter()
            .map(|(mut key, accumulators)| {
                key.extend(accumulators.iter().map(|a| a.finish()));
                key
            })
            .collect::<Vec<_>>()
            .into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Running state of one aggregate function over one group
pub trait Accumulator {
    fn accumulate(&mut self, value: Value) -> Result<()>;
    fn finish(&self) -> Value;
}

impl dyn Accumulator {
    /// Runtime dispatch to the accumulator for an aggregate call
    pub fn build(aggregate: &plan::Aggregate) -> Box<dyn Accumulator> {
        let inner: Box<dyn Accumulator> = match aggregate.function {
            AggregateFunction::Count => Count::new(),
            AggregateFunction::Sum => Sum::new(),
            AggregateFunction::Avg => Avg::new(),
            AggregateFunction::Min => Extreme::new(Ordering::Less),
            AggregateFunction::Max => Extreme::new(Ordering::Greater),
            AggregateFunction::First => First::new(),
        };
        match aggregate.distinct {
            true => Distinct::new(inner),
            false => inner,
        }
    }
}

/// COUNT - counts non-NULL values
pub struct Count(i64);

impl Count {
    fn new() -> Box<Self> {
        Box::new(Self(0))
    }
}

impl Accumulator for Count {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.0 += 1;
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        Value::Integer(self.0)
    }
}

/// SUM - NULL when there is no non-NULL input, otherwise follows the
/// arithmetic rules of `+`
pub struct Sum(Value);

impl Sum {
    fn new() -> Box<Self> {
        Box::new(Self(Value::Null))
    }
}

impl Accumulator for Sum {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        self.0 = match (&self.0, value) {
            (_, Value::Null) => return Ok(()),
            (Value::Null, v) => Value::Integer(0).add(&v)?,
            (sum, v) => sum.add(&v)?,
        };
        Ok(())
    }

    fn finish(&self) -> Value {
        self.0.clone()
    }
}

/// AVG - always REAL, NULL for no input
pub struct Avg {
    sum: f64,
    count: i64,
}

impl Avg {
    fn new() -> Box<Self> {
        Box::new(Self { sum: 0.0, count: 0 })
    }
}

impl Accumulator for Avg {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        match value.coerce_for_arithmetic(&Value::Integer(0), "avg")? {
            Coerced::Null => return Ok(()),
            Coerced::Integers(v, _) => self.sum += v as f64,
            Coerced::Reals(v, _) => self.sum += v,
        }
        self.count += 1;
        Ok(())
    }

    fn finish(&self) -> Value {
        match self.count {
            0 => Value::Null,
            n => Value::Real(self.sum / n as f64),
        }
    }
}

/// MIN and MAX - keep the value that sorts first (`Less`) or last
/// (`Greater`), ignoring NULLs
pub struct Extreme {
    keep: Ordering,
    value: Value,
}

impl Extreme {
    fn new(keep: Ordering) -> Box<Self> {
        Box::new(Self {
            keep,
            value: Value::Null,
        })
    }
}

impl Accumulator for Extreme {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if !value.is_null() && (self.value.is_null() || value.sort_cmp(&self.value) == self.keep) {
            self.value = value;
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        self.value.clone()
    }
}

/// Value of the first row in the group, for columns that are neither
/// grouped nor aggregated
pub struct First(Option<Value>);

impl First {
    fn new() -> Box<Self> {
        Box::new(Self(None))
    }
}

impl Accumulator for First {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if self.0.is_none() {
            self.0 = Some(value);
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }
}

/// Feeds each distinct non-NULL value to the wrapped accumulator once
pub struct Distinct {
    inner: Box<dyn Accumulator>,
    seen: HashSet<GroupKey>,
}

impl Distinct {
    fn new(inner: Box<dyn Accumulator>) -> Box<Self> {
        Box::new(Self {
            inner,
            seen: HashSet::new(),
        })
    }
}

impl Accumulator for Distinct {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if value.is_null() || !self.seen.insert(GroupKey(vec![value.clone()])) {
            return Ok(());
        }
        self.inner.accumulate(value)
    }

    fn finish(&self) -> Value {
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: AggregateFunction, distinct: bool, values: Vec<Value>) -> Result<Value> {
        let aggregate = plan::Aggregate {
            function,
            arg: None,
            distinct,
        };
        let mut accumulator = <dyn Accumulator>::build(&aggregate);
        for value in values {
            accumulator.accumulate(value)?;
        }
        Ok(accumulator.finish())
    }

    #[test]
    fn test_accumulators() -> Result<()> {
        let values = vec![
            Value::Integer(3),
            Value::Null,
            Value::Integer(1),
            Value::Integer(3),
        ];
        use AggregateFunction::*;
        assert_eq!(run(Count, false, values.clone())?, Value::Integer(3));
        assert_eq!(run(Count, true, values.clone())?, Value::Integer(2));
        assert_eq!(run(Sum, false, values.clone())?, Value::Integer(7));
        assert_eq!(run(Sum, true, values.clone())?, Value::Integer(4));
        assert_eq!(run(Avg, false, values.clone())?, Value::Real(7.0 / 3.0));
        assert_eq!(run(Min, false, values.clone())?, Value::Integer(1));
        assert_eq!(run(Max, false, values.clone())?, Value::Integer(3));
        assert_eq!(run(First, false, values)?, Value::Integer(3));
        Ok(())
    }

    #[test]
    fn test_empty_input() -> Result<()> {
        use AggregateFunction::*;
        assert_eq!(run(Count, false, vec![])?, Value::Integer(0));
        assert_eq!(run(Sum, false, vec![Value::Null])?, Value::Null);
        assert_eq!(run(Avg, false, vec![])?, Value::Null);
        assert_eq!(run(Min, false, vec![Value::Null])?, Value::Null);
        assert_eq!(run(First, false, vec![])?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_mixed_numbers() -> Result<()> {
        use AggregateFunction::*;
        let values = vec![Value::Integer(1), Value::Real(2.5)];
        assert_eq!(run(Sum, false, values.clone())?, Value::Real(3.5));
        assert_eq!(run(Max, false, values)?, Value::Real(2.5));
        assert!(run(Sum, false, vec![Value::Text("a".into())]).is_err());
        Ok(())
    }
}
