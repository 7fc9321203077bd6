//! # Delta Operations
//!
//! The three primitive operations a [`Delta`](crate::Delta) is built from.
//!
//! Lengths are measured in Unicode scalar values (`char`s), never bytes, so
//! an insert of `"é"` has length 1.
//!
//! ## Wire form
//!
//! Operations serialize compactly:
//!
//! ```text
//! retain(4)     →  4
//! delete(2)     → -2
//! insert("tea") → "tea"
//! ```

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single delta operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Keep the next `n` characters unchanged
    Retain(usize),

    /// Insert literal content at the current position
    Insert(String),

    /// Remove the next `n` characters
    Delete(usize),
}

/// Discriminant of an [`Op`], used when peeking without borrowing content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Retain,
    Insert,
    Delete,
}

impl Op {
    /// Number of characters this operation covers
    pub fn len(&self) -> usize {
        match self {
            Op::Retain(n) | Op::Delete(n) => *n,
            Op::Insert(text) => text.chars().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Op::Retain(n) | Op::Delete(n) => *n == 0,
            Op::Insert(text) => text.is_empty(),
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Retain(_) => OpKind::Retain,
            Op::Insert(_) => OpKind::Insert,
            Op::Delete(_) => OpKind::Delete,
        }
    }
}

impl Serialize for Op {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Op::Retain(n) => serializer.serialize_u64(*n as u64),
            Op::Delete(n) => serializer.serialize_i64(-(*n as i64)),
            Op::Insert(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OpVisitor)
    }
}

struct OpVisitor;

impl<'de> Visitor<'de> for OpVisitor {
    type Value = Op;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer (retain/delete) or a string (insert)")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Op, E> {
        usize::try_from(value)
            .map(Op::Retain)
            .map_err(|_| E::custom("retain length out of range"))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Op, E> {
        let len = usize::try_from(value.unsigned_abs())
            .map_err(|_| E::custom("operation length out of range"))?;
        if value < 0 {
            Ok(Op::Delete(len))
        } else {
            Ok(Op::Retain(len))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Op, E> {
        Ok(Op::Insert(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Op, E> {
        Ok(Op::Insert(value))
    }
}
