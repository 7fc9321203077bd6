use crate::op::{Op, OpKind};

/// Cursor over a delta's operations that can split operations mid-way.
///
/// Reading past the end yields an unbounded retain, which is what lets
/// compose/transform treat the shorter delta as implicitly retaining the rest.
pub(crate) struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    pub(crate) fn new(ops: &'a [Op]) -> Self {
        Self {
            ops,
            index: 0,
            offset: 0,
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    pub(crate) fn peek_kind(&self) -> OpKind {
        self.ops
            .get(self.index)
            .map(Op::kind)
            .unwrap_or(OpKind::Retain)
    }

    pub(crate) fn peek_len(&self) -> usize {
        match self.ops.get(self.index) {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    /// Take at most `max` characters worth of the current operation
    pub(crate) fn next(&mut self, max: usize) -> Op {
        let Some(op) = self.ops.get(self.index) else {
            return Op::Retain(max);
        };

        let remaining = op.len() - self.offset;
        let take = max.min(remaining);
        let piece = match op {
            Op::Retain(_) => Op::Retain(take),
            Op::Delete(_) => Op::Delete(take),
            Op::Insert(text) => Op::Insert(text.chars().skip(self.offset).take(take).collect()),
        };

        if take == remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += take;
        }

        piece
    }

    /// Take whatever is left of the current operation
    pub(crate) fn next_whole(&mut self) -> Op {
        self.next(usize::MAX)
    }
}
