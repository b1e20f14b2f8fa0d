//! Frame predicates
//!
//! A [`Condition`] is an immutable predicate tree built from a handful of leaf
//! tests joined by `And`. The tree has no `Or` node; alternatives are
//! expressed by attaching several conditions to a cursor, which delivers a
//! frame when any of them matches.

use std::sync::Arc;

use crate::format::{Frame, FrameType};

#[derive(Debug, PartialEq)]
enum ConditionKind {
    And(Condition, Condition),
    WhereTypeIn(Vec<FrameType>),
    WhereTimeBetween { begin: i64, end: i64 },
    WherePidIn(Vec<i32>),
    WhereCounterIn(Vec<u32>),
}

/// Shared handle to an immutable predicate. Cloning shares the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition(Arc<ConditionKind>);

impl Condition {
    fn new(kind: ConditionKind) -> Self {
        Self(Arc::new(kind))
    }

    /// Matches when both `left` and `right` match.
    pub fn and(left: Condition, right: Condition) -> Self {
        Self::new(ConditionKind::And(left, right))
    }

    pub fn where_type_in(types: impl IntoIterator<Item = FrameType>) -> Self {
        Self::new(ConditionKind::WhereTypeIn(types.into_iter().collect()))
    }

    /// Matches frames with `begin <= time <= end`. The bounds may be given
    /// in either order.
    pub fn where_time_between(a: i64, b: i64) -> Self {
        Self::new(ConditionKind::WhereTimeBetween {
            begin: a.min(b),
            end: a.max(b),
        })
    }

    pub fn where_pid_in(pids: impl IntoIterator<Item = i32>) -> Self {
        Self::new(ConditionKind::WherePidIn(pids.into_iter().collect()))
    }

    /// Matches counter definitions and counter updates touching any of
    /// `ids`.
    pub fn where_counter_in(ids: impl IntoIterator<Item = u32>) -> Self {
        Self::new(ConditionKind::WhereCounterIn(ids.into_iter().collect()))
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        match &*self.0 {
            ConditionKind::And(left, right) => left.matches(frame) && right.matches(frame),
            ConditionKind::WhereTypeIn(types) => types.contains(&frame.frame_type()),
            ConditionKind::WhereTimeBetween { begin, end } => {
                (*begin..=*end).contains(&frame.time())
            }
            ConditionKind::WherePidIn(pids) => pids.contains(&frame.pid()),
            ConditionKind::WhereCounterIn(ids) => match frame {
                Frame::CounterDefine(def) => def.counters.iter().any(|c| ids.contains(&c.id)),
                Frame::CounterSet(set) => set.values().any(|(id, _)| ids.contains(&id)),
                _ => false,
            },
        }
    }

    /// Structural copy that shares nothing with `self`.
    pub fn deep_copy(&self) -> Self {
        let kind = match &*self.0 {
            ConditionKind::And(left, right) => ConditionKind::And(left.deep_copy(), right.deep_copy()),
            ConditionKind::WhereTypeIn(types) => ConditionKind::WhereTypeIn(types.clone()),
            ConditionKind::WhereTimeBetween { begin, end } => ConditionKind::WhereTimeBetween {
                begin: *begin,
                end: *end,
            },
            ConditionKind::WherePidIn(pids) => ConditionKind::WherePidIn(pids.clone()),
            ConditionKind::WhereCounterIn(ids) => ConditionKind::WhereCounterIn(ids.clone()),
        };
        Self::new(kind)
    }

    /// Whether `self` and `other` are the same shared tree.
    pub fn ptr_eq(&self, other: &Condition) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
