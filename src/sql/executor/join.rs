use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        plan::Expression,
        types::{Row, Value},
    },
};

use super::{Context, Executor, evaluate};

/// Nested Loop Join executor - pairs every left row with every right row
/// that satisfies the predicate
///
/// The right side is materialized once per open. With `outer` set, a left
/// row without any match is emitted once, padded with NULLs.
pub struct NestedLoopJoin<'a, T: Transaction> {
    left: Box<dyn Executor<T> + 'a>,
    right: Box<dyn Executor<T> + 'a>,
    predicate: Option<&'a Expression>,
    outer: bool,
    right_width: usize,
    right_rows: Vec<Row>,
    /// Current left row and the position of the next right row to try
    current: Option<(Row, usize, bool)>,
}

impl<'a, T: Transaction> NestedLoopJoin<'a, T> {
    pub fn new(
        left: Box<dyn Executor<T> + 'a>,
        right: Box<dyn Executor<T> + 'a>,
        predicate: Option<&'a Expression>,
        outer: bool,
        right_width: usize,
    ) -> Box<Self> {
        Box::new(Self {
            left,
            right,
            predicate,
            outer,
            right_width,
            right_rows: Vec::new(),
            current: None,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for NestedLoopJoin<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.right.open(ctx)?;
        let mut rows = Vec::new();
        while let Some(row) = self.right.next(ctx)? {
            rows.push(row);
        }
        self.right_rows = rows;
        self.current = None;
        self.left.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        loop {
            let (left_row, position, matched) = match self.current.take() {
                Some(current) => current,
                None => match self.left.next(ctx)? {
                    Some(row) => (row, 0, false),
                    None => return Ok(None),
                },
            };

            for (offset, right_row) in self.right_rows[position..].iter().enumerate() {
                let mut row = left_row.clone();
                row.extend(right_row.iter().cloned());
                let keep = match self.predicate {
                    Some(predicate) => evaluate(predicate, &row, ctx)?.truth()? == Some(true),
                    None => true,
                };
                if keep {
                    self.current = Some((left_row, position + offset + 1, true));
                    return Ok(Some(row));
                }
            }

            if self.outer && !matched {
                let mut row = left_row;
                row.resize(row.len() + self.right_width, Value::Null);
                return Ok(Some(row));
            }
        }
    }
}
