//! # Delta
//!
//! An ordered list of [`Op`]s describing one text transformation, plus the
//! two algebraic operations collaborative editing is built on:
//!
//! - [`Delta::compose`]: fold two sequential deltas into one
//! - [`Delta::transform`]: rebase a concurrent delta over another
//!
//! ## Normal form
//!
//! Every delta built through [`Delta::push`] (and therefore through the
//! builder methods, compose and transform) is kept normalized:
//!
//! - empty operations are dropped
//! - adjacent operations of the same kind are merged
//! - an insert next to a delete always comes first
//!
//! Trailing retains are allowed while building but are insignificant:
//! equality and serialization ignore them.

use crate::iter::OpIter;
use crate::op::{Op, OpKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A text transformation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Op>", into = "Vec<Op>")]
pub struct Delta {
    ops: Vec<Op>,
}

/// Which side wins when both deltas insert at the same position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// The already-applied (left) delta's insert goes first
    Left,
    /// The transformed (right) delta's insert goes first
    Right,
}

impl Priority {
    pub fn opposite(self) -> Self {
        match self {
            Priority::Left => Priority::Right,
            Priority::Right => Priority::Left,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("delta spans {base_len} characters but the text has only {text_len}")]
    BaseLengthExceeded { base_len: usize, text_len: usize },
}

impl Delta {
    /// Create an empty (no-op) delta
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Build a normalized delta from arbitrary operations
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut delta = Self::new();
        for op in ops {
            delta.push(op);
        }
        delta.trim()
    }

    #[must_use]
    pub fn retain(mut self, len: usize) -> Self {
        self.push(Op::Retain(len));
        self
    }

    #[must_use]
    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(Op::Insert(text.into()));
        self
    }

    #[must_use]
    pub fn delete(mut self, len: usize) -> Self {
        self.push(Op::Delete(len));
        self
    }

    /// Operations, excluding any trailing retain
    pub fn ops(&self) -> &[Op] {
        let significant = self
            .ops
            .iter()
            .rposition(|op| op.kind() != OpKind::Retain)
            .map_or(0, |last| last + 1);
        &self.ops[..significant]
    }

    /// Append an operation, keeping the delta normalized
    pub fn push(&mut self, op: Op) {
        if op.is_empty() {
            return;
        }

        let insert_before_delete =
            matches!(op, Op::Insert(_)) && matches!(self.ops.last(), Some(Op::Delete(_)));

        if insert_before_delete {
            let at = self.ops.len() - 1;
            if at > 0 {
                if let (Op::Insert(prev), Op::Insert(text)) = (&mut self.ops[at - 1], &op) {
                    prev.push_str(text);
                    return;
                }
            }
            self.ops.insert(at, op);
            return;
        }

        if let Some(last) = self.ops.last_mut() {
            match (last, &op) {
                (Op::Retain(a), Op::Retain(b)) | (Op::Delete(a), Op::Delete(b)) => {
                    *a += *b;
                    return;
                }
                (Op::Insert(a), Op::Insert(b)) => {
                    a.push_str(b);
                    return;
                }
                _ => {}
            }
        }

        self.ops.push(op);
    }

    /// Drop trailing retains
    #[must_use]
    pub fn trim(mut self) -> Self {
        let significant = self.ops().len();
        self.ops.truncate(significant);
        self
    }

    /// Whether applying this delta leaves any text unchanged
    pub fn is_noop(&self) -> bool {
        self.ops().is_empty()
    }

    /// Minimum length of text this delta can be applied to
    pub fn base_len(&self) -> usize {
        self.ops()
            .iter()
            .map(|op| match op {
                Op::Retain(n) | Op::Delete(n) => *n,
                Op::Insert(_) => 0,
            })
            .sum()
    }

    /// Number of characters this delta explicitly produces
    pub fn target_len(&self) -> usize {
        self.ops()
            .iter()
            .map(|op| match op {
                Op::Retain(_) => op.len(),
                Op::Insert(text) => text.chars().count(),
                Op::Delete(_) => 0,
            })
            .sum()
    }

    /// Apply this delta to `text`
    ///
    /// Characters past the delta's last operation are kept as they are.
    pub fn apply(&self, text: &str) -> Result<String, DeltaError> {
        let text_len = text.chars().count();
        let base_len = self.base_len();
        if base_len > text_len {
            return Err(DeltaError::BaseLengthExceeded { base_len, text_len });
        }

        let mut input = text.chars();
        let mut output = String::with_capacity(text.len());

        for op in self.ops() {
            match op {
                Op::Retain(n) => output.extend(input.by_ref().take(*n)),
                Op::Insert(inserted) => output.push_str(inserted),
                Op::Delete(n) => {
                    input.by_ref().take(*n).for_each(drop);
                }
            }
        }

        output.extend(input);
        Ok(output)
    }

    /// A delta equivalent to applying `self` and then `other`
    #[must_use]
    pub fn compose(&self, other: &Delta) -> Delta {
        let mut this = OpIter::new(self.ops());
        let mut that = OpIter::new(other.ops());
        let mut composed = Delta::new();

        while this.has_next() || that.has_next() {
            if that.peek_kind() == OpKind::Insert {
                composed.push(that.next_whole());
            } else if this.peek_kind() == OpKind::Delete {
                composed.push(this.next_whole());
            } else {
                let len = this.peek_len().min(that.peek_len());
                let this_op = this.next(len);
                let that_op = that.next(len);

                match that_op {
                    // Keeps whatever the first delta produced here (retain or insert)
                    Op::Retain(_) => composed.push(this_op),
                    // Deleting text the first delta inserted cancels both out
                    Op::Delete(n) => {
                        if let Op::Retain(_) = this_op {
                            composed.push(Op::Delete(n));
                        }
                    }
                    Op::Insert(_) => {}
                }
            }
        }

        composed.trim()
    }

    /// Rebase `other` so it applies after `self`
    ///
    /// Both deltas must have been produced against the same text. The result
    /// `other'` satisfies:
    ///
    /// ```text
    /// apply(apply(base, self), self.transform(other, p))
    ///     == apply(apply(base, other), other.transform(self, p.opposite()))
    /// ```
    ///
    /// With [`Priority::Left`], inserts of `self` win same-position ties.
    #[must_use]
    pub fn transform(&self, other: &Delta, priority: Priority) -> Delta {
        let left_wins = priority == Priority::Left;
        let mut this = OpIter::new(self.ops());
        let mut that = OpIter::new(other.ops());
        let mut transformed = Delta::new();

        while this.has_next() || that.has_next() {
            if this.peek_kind() == OpKind::Insert
                && (left_wins || that.peek_kind() != OpKind::Insert)
            {
                transformed.push(Op::Retain(this.next_whole().len()));
            } else if that.peek_kind() == OpKind::Insert {
                transformed.push(that.next_whole());
            } else {
                let len = this.peek_len().min(that.peek_len());
                let this_op = this.next(len);
                let that_op = that.next(len);

                match (this_op, that_op) {
                    // Already deleted on our side: their delete or retain is moot
                    (Op::Delete(_), _) => {}
                    (_, Op::Delete(n)) => transformed.push(Op::Delete(n)),
                    _ => transformed.push(Op::Retain(len)),
                }
            }
        }

        transformed.trim()
    }
}

impl PartialEq for Delta {
    fn eq(&self, other: &Self) -> bool {
        self.ops() == other.ops()
    }
}

impl Eq for Delta {}

impl From<Vec<Op>> for Delta {
    fn from(ops: Vec<Op>) -> Self {
        Delta::from_ops(ops)
    }
}

impl From<Delta> for Vec<Op> {
    fn from(delta: Delta) -> Self {
        delta.trim().ops
    }
}
