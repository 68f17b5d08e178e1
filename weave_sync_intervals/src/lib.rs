//! The Interval Set: a set of disjoint, non-touching, half-open `[Start, End)`
//! ranges over the weave's byte offsets, stored sorted by upper bound (§4.1).
//!
//! This is used both as the node's own `SyncRecord` and as a scratch type for
//! the set algebra (`inverse`, `intersection`, `outerjoin`) that drives target
//! selection in the sync engine. A small, append-mostly ordered collection
//! probed by comparison is the natural shape for this kind of index, but
//! here the collection is mutated constantly (insert/delete/fuse), so a
//! `BTreeMap` keyed by `End` replaces a `Vec`+binary-search shape while keeping the
//! same "probe by the value you have, get the covering entry" access pattern.

use rand::Rng;
use std::collections::BTreeMap;
use weave_sync_types::{keys, Offset, NOTE_SIZE};

/// Sentinel representing `+∞`. Only ever appears as the `End` of the topmost
/// interval produced by [`IntervalSet::inverse`]; real chunk offsets never
/// reach `u128::MAX` in practice.
pub const INFINITY: Offset = u128::MAX;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("no such point: n >= sum(S)")]
    NoSuchPoint,
    #[error("invalid serialized interval set")]
    InvalidFormat,
}

/// One `[Start, End)` range, as returned by lookups. The underlying set
/// stores these as `End -> Start` map entries; this struct is just the
/// by-value view handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub end: Offset,
    pub start: Offset,
}

impl Interval {
    pub fn len(&self) -> Offset {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// The result of [`IntervalSet::get_interval_by_nth_inner_number`]: the
/// interval containing the nth covered byte, and that byte's absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NthPoint {
    pub start: Offset,
    pub byte: Offset,
    pub end: Offset,
}

#[derive(Debug, Clone, Default)]
pub struct IntervalSet {
    // End -> Start, so iteration in key order is ascending End order.
    map: BTreeMap<Offset, Offset>,
    total: Offset,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn sum(&self) -> Offset {
        self.total
    }

    /// Iterates intervals in ascending `End` order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Interval> + '_ {
        self.map.iter().map(|(&end, &start)| Interval { end, start })
    }

    /// Inserts `[start, end)`, fusing with any interval it overlaps or
    /// touches. `end` and `start` are named in that order to match the
    /// `Interval(End, Start)` convention used throughout this crate.
    pub fn add(&mut self, end: Offset, start: Offset) {
        assert!(end > start, "add requires end > start");
        let mut new_start = start;
        let mut new_end = end;
        let mut fused = Vec::new();

        // Intervals are disjoint, so ascending End order is also ascending
        // Start order: once a candidate's Start exceeds our End, nothing
        // further can overlap or touch.
        for (&e, &s) in self.map.range(start..) {
            if s > end {
                break;
            }
            fused.push(e);
            new_start = new_start.min(s);
            new_end = new_end.max(e);
        }
        for e in fused {
            let s = self.map.remove(&e).unwrap();
            self.total -= e - s;
        }
        self.map.insert(new_end, new_start);
        self.total += new_end - new_start;
    }

    /// Subtracts `[start, end)`, splitting any interval it overlaps into its
    /// surviving left/right residuals.
    pub fn delete(&mut self, end: Offset, start: Offset) {
        assert!(end > start, "delete requires end > start");
        let mut removed = Vec::new();
        let mut residuals = Vec::new();

        for (&e, &s) in self.map.range(..) {
            if e <= start || s >= end {
                continue; // no overlap
            }
            removed.push(e);
            if s < start {
                residuals.push((start, s));
            }
            if e > end {
                residuals.push((e, end));
            }
        }
        for e in removed {
            let s = self.map.remove(&e).unwrap();
            self.total -= e - s;
        }
        for (e, s) in residuals {
            self.map.insert(e, s);
            self.total += e - s;
        }
    }

    /// Removes every interval (or part of an interval) above `cut_point`,
    /// keeping the left part of any interval that straddles it.
    pub fn cut(&mut self, cut_point: Offset) {
        let mut removed = Vec::new();
        let mut replacement = None;

        for (&e, &s) in self
            .map
            .range((std::ops::Bound::Excluded(cut_point), std::ops::Bound::Unbounded))
        {
            removed.push(e);
            if s < cut_point {
                replacement = Some((cut_point, s));
            }
        }
        for e in removed {
            let s = self.map.remove(&e).unwrap();
            self.total -= e - s;
        }
        if let Some((e, s)) = replacement {
            self.map.insert(e, s);
            self.total += e - s;
        }
    }

    /// Left-exclusive, right-inclusive membership: is there an interval
    /// `I` with `I.Start < n <= I.End`? Chunk keys are end offsets, so "byte
    /// n is covered" means "some chunk ending at E >= n starts at S < n".
    pub fn is_inside(&self, n: Offset) -> bool {
        match self.map.range(n..).next() {
            Some((&_e, &s)) => s < n,
            None => false,
        }
    }

    /// The complement of `self` within `[0, +∞)`.
    pub fn inverse(&self) -> IntervalSet {
        let mut out = IntervalSet::new();
        let mut prev_end: Offset = 0;
        for interval in self.iter() {
            if interval.start > prev_end {
                out.add(interval.start, prev_end);
            }
            prev_end = interval.end;
        }
        out.add(INFINITY, prev_end);
        out
    }

    /// The maximal subintervals common to both `a` and `b`.
    pub fn intersection(a: &IntervalSet, b: &IntervalSet) -> IntervalSet {
        let mut out = IntervalSet::new();
        let mut ai = a.iter().peekable();
        let mut bi = b.iter().peekable();

        while let (Some(&ia), Some(&ib)) = (ai.peek(), bi.peek()) {
            let start = ia.start.max(ib.start);
            let end = ia.end.min(ib.end);
            if start < end {
                out.add(end, start);
            }
            if ia.end <= ib.end {
                ai.next();
            } else {
                bi.next();
            }
        }
        out
    }

    /// Bytes present in `b` but absent from `a`.
    pub fn outerjoin(a: &IntervalSet, b: &IntervalSet) -> IntervalSet {
        IntervalSet::intersection(&a.inverse(), b)
    }

    /// Walks intervals in ascending `End` order, treating the set as a
    /// concatenation of its covered bytes, and returns the `n`th one
    /// (0-indexed).
    pub fn get_interval_by_nth_inner_number(&self, n: Offset) -> Result<NthPoint, IntervalError> {
        let mut consumed: Offset = 0;
        for interval in self.iter() {
            let len = interval.len();
            if n < consumed + len {
                let residual = n - consumed;
                return Ok(NthPoint {
                    start: interval.start,
                    byte: interval.start + residual,
                    end: interval.end,
                });
            }
            consumed += len;
        }
        Err(IntervalError::NoSuchPoint)
    }

    /// Removes and returns the interval with the greatest length, if any.
    pub fn take_largest(&mut self) -> Option<Interval> {
        let largest = self
            .iter()
            .max_by_key(|i| i.len())
            .map(|i| (i.end, i.start))?;
        self.map.remove(&largest.0);
        self.total -= largest.0 - largest.1;
        Some(Interval {
            end: largest.0,
            start: largest.1,
        })
    }

    /// If `count() > limit`, fuses in the `count() - limit` smallest gaps
    /// between intervals so the set shrinks to `limit` intervals, growing
    /// coverage monotonically. Returns the absorbed gaps and leaves `self`
    /// updated in place.
    pub fn compact(&mut self, limit: usize) -> Vec<Interval> {
        if self.count() <= limit {
            return Vec::new();
        }
        let to_absorb = self.count() - limit;

        // Only interior gaps (strictly between two existing intervals) can
        // reduce the interval count when fused back in — the leading gap
        // from 0 to the first interval's start, and the trailing gap to
        // +∞, each only have one neighbor and would just grow an existing
        // interval without reducing count.
        let intervals: Vec<Interval> = self.iter().collect();
        let mut gaps: Vec<Interval> = intervals
            .windows(2)
            .map(|w| Interval {
                end: w[1].start,
                start: w[0].end,
            })
            .collect();
        // Traverse descending End first so a stable sort on length alone
        // gives a deterministic, reference-matching tie-break.
        gaps.reverse();
        gaps.sort_by(|a, b| a.len().cmp(&b.len()));
        gaps.truncate(to_absorb);

        for gap in &gaps {
            self.add(gap.end, gap.start);
        }
        gaps
    }

    /// Serializes up to `limit` intervals. If the set already fits, every
    /// interval is emitted (in descending `End` order, matching the
    /// underlying ordered-set traversal). Otherwise each interval is emitted
    /// independently with probability `limit / count()`, stopping once
    /// `limit` have been emitted.
    pub fn serialize(&self, limit: usize) -> Vec<Interval> {
        let count = self.count();
        let descending: Vec<Interval> = self.iter().rev().collect();
        if count <= limit {
            return descending;
        }
        if limit == 0 {
            return Vec::new();
        }
        let probability = limit as f64 / count as f64;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(limit);
        for interval in descending {
            if out.len() >= limit {
                break;
            }
            if rng.gen_bool(probability.min(1.0)) {
                out.push(interval);
            }
        }
        out
    }

    /// Binary wire encoding: a sequence of `(End: 32 bytes BE, Start: 32
    /// bytes BE)` pairs, in the order returned by [`IntervalSet::serialize`].
    pub fn to_binary(&self, limit: usize) -> Vec<u8> {
        let intervals = self.serialize(limit);
        let mut out = Vec::with_capacity(intervals.len() * NOTE_SIZE * 2);
        for interval in intervals {
            out.extend_from_slice(&keys::encode_offset(interval.end));
            out.extend_from_slice(&keys::encode_offset(interval.start));
        }
        out
    }

    /// Decodes the binary wire encoding. Rejects any sequence that isn't
    /// strictly decreasing in `End`, that contains `End <= Start`, or whose
    /// intervals aren't disjoint once reinserted.
    pub fn from_binary(bytes: &[u8]) -> Result<IntervalSet, IntervalError> {
        if bytes.len() % (NOTE_SIZE * 2) != 0 {
            return Err(IntervalError::InvalidFormat);
        }
        let mut out = IntervalSet::new();
        let mut prev_end: Option<Offset> = None;
        for chunk in bytes.chunks(NOTE_SIZE * 2) {
            let (end_bytes, start_bytes) = chunk.split_at(NOTE_SIZE);
            let end = keys::decode_offset(end_bytes).ok_or(IntervalError::InvalidFormat)?;
            let start = keys::decode_offset(start_bytes).ok_or(IntervalError::InvalidFormat)?;
            if end <= start {
                return Err(IntervalError::InvalidFormat);
            }
            if let Some(prev) = prev_end {
                if end >= prev {
                    return Err(IntervalError::InvalidFormat);
                }
            }
            prev_end = Some(end);
            let before = out.count();
            out.add(end, start);
            if out.count() != before + 1 {
                // Fused with an existing interval: the input wasn't disjoint.
                return Err(IntervalError::InvalidFormat);
            }
        }
        Ok(out)
    }

    /// JSON wire encoding: `[{"<End decimal>": "<Start decimal>"}, ...]`,
    /// ordered by descending `End`.
    pub fn to_json(&self, limit: usize) -> serde_json::Value {
        let intervals = self.serialize(limit);
        let array = intervals
            .into_iter()
            .map(|i| {
                let mut obj = serde_json::Map::new();
                obj.insert(i.end.to_string(), serde_json::Value::String(i.start.to_string()));
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ends_starts(set: &IntervalSet) -> Vec<(Offset, Offset)> {
        set.iter().map(|i| (i.end, i.start)).collect()
    }

    // S1
    #[test]
    fn scenario_s1() {
        let mut s = IntervalSet::new();
        s.add(2, 1);
        assert_eq!(s.sum(), 1);
        assert_eq!(s.count(), 1);
        assert!(s.is_inside(2));
        assert!(!s.is_inside(1));
        assert!(!s.is_inside(3));
        let p = s.get_interval_by_nth_inner_number(0).unwrap();
        assert_eq!((p.start, p.byte, p.end), (1, 1, 2));
    }

    // S2
    #[test]
    fn scenario_s2() {
        let mut s = IntervalSet::new();
        s.add(2, 1);
        s.add(6, 3);
        assert_eq!(s.count(), 2);
        assert_eq!(s.sum(), 4);
        assert!(s.is_inside(4));
        assert!(!s.is_inside(3));

        let mut s2 = s.clone();
        let gaps = s2.compact(1);
        assert_eq!(gaps, vec![Interval { end: 3, start: 2 }]);
        assert_eq!(ends_starts(&s2), vec![(6, 1)]);
    }

    // S3
    #[test]
    fn scenario_s3() {
        let mut s = IntervalSet::new();
        s.add(3, 1);
        s.add(12, 8);
        s.add(25, 22);
        s.add(27, 26);
        let gaps = s.compact(3);
        assert_eq!(gaps, vec![Interval { end: 26, start: 25 }]);
        assert_eq!(ends_starts(&s), vec![(3, 1), (12, 8), (27, 22)]);
    }

    // S4
    #[test]
    fn scenario_s4() {
        let mut s = IntervalSet::new();
        s.add(5, 3);
        s.add(10, 9);
        let gaps = s.compact(1);
        assert_eq!(gaps, vec![Interval { end: 9, start: 5 }]);
        assert_eq!(ends_starts(&s), vec![(10, 3)]);
    }

    // S5
    #[test]
    fn scenario_s5() {
        let mut s = IntervalSet::new();
        s.add(4, 2);
        s.add(8, 6);
        s.delete(7, 3);
        assert_eq!(ends_starts(&s), vec![(3, 2), (8, 7)]);
    }

    // S6
    #[test]
    fn scenario_s6() {
        let mut s = IntervalSet::new();
        s.add(6, 3);
        s.add(2, 1);
        let json = s.to_json(10);
        let expected = serde_json::json!([{"6": "3"}, {"2": "1"}]);
        assert_eq!(json, expected);
    }

    #[test]
    fn add_fuses_touching_intervals() {
        let mut s = IntervalSet::new();
        s.add(5, 3);
        s.add(3, 1); // touches at 3
        assert_eq!(ends_starts(&s), vec![(5, 1)]);
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn add_fuses_overlapping_intervals() {
        let mut s = IntervalSet::new();
        s.add(10, 5);
        s.add(7, 2);
        assert_eq!(ends_starts(&s), vec![(10, 2)]);
    }

    #[test]
    fn delete_removes_whole_interval_with_no_residual() {
        let mut s = IntervalSet::new();
        s.add(5, 2);
        s.delete(6, 1);
        assert!(s.is_empty());
        assert_eq!(s.sum(), 0);
    }

    #[test]
    fn inverse_covers_complement_and_is_disjoint_from_self() {
        let mut s = IntervalSet::new();
        s.add(5, 3);
        s.add(20, 10);
        let inv = s.inverse();
        assert_eq!(IntervalSet::intersection(&s, &inv).count(), 0);
        assert_eq!(inv.iter().next_back().unwrap().end, INFINITY); // unbounded complement

        let mut joined = inv.clone();
        for i in s.iter() {
            joined.add(i.end, i.start);
        }
        // union covers [0, +infinity): a single interval ending at INFINITY.
        assert_eq!(joined.count(), 1);
        assert_eq!(joined.iter().next().unwrap().end, INFINITY);
    }

    #[test]
    fn outerjoin_is_bytes_in_b_not_in_a() {
        let mut a = IntervalSet::new();
        a.add(10, 0);

        let mut b = IntervalSet::new();
        b.add(20, 5);

        let diff = IntervalSet::outerjoin(&a, &b);
        assert_eq!(ends_starts(&diff), vec![(20, 10)]);
    }

    #[test]
    fn nth_inner_number_is_strictly_increasing() {
        let mut s = IntervalSet::new();
        s.add(5, 3); // covers bytes 4,5
        s.add(12, 10); // covers bytes 11,12
        let total = s.sum();
        let mut prev = None;
        for n in 0..total {
            let p = s.get_interval_by_nth_inner_number(n).unwrap();
            if let Some(prev_byte) = prev {
                assert!(p.byte > prev_byte);
            }
            prev = Some(p.byte);
        }
        assert!(s.get_interval_by_nth_inner_number(total).is_err());
    }

    #[test]
    fn cut_keeps_left_part_of_straddling_interval() {
        let mut s = IntervalSet::new();
        s.add(100, 0);
        s.cut(40);
        assert_eq!(ends_starts(&s), vec![(40, 0)]);
    }

    #[test]
    fn cut_drops_intervals_entirely_above_point() {
        let mut s = IntervalSet::new();
        s.add(10, 5);
        s.add(30, 20);
        s.cut(10);
        assert_eq!(ends_starts(&s), vec![(10, 5)]);
    }

    #[test]
    fn binary_roundtrip() {
        let mut s = IntervalSet::new();
        s.add(6, 3);
        s.add(2, 1);
        let bytes = s.to_binary(s.count());
        let back = IntervalSet::from_binary(&bytes).unwrap();
        assert_eq!(ends_starts(&back), ends_starts(&s));
    }

    #[test]
    fn deserialize_rejects_out_of_order_end() {
        // Two entries with End NOT strictly decreasing.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(2));
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(1));
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(5));
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(3));
        assert!(IntervalSet::from_binary(&bytes).is_err());
    }

    #[test]
    fn deserialize_rejects_end_less_equal_start() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(3));
        bytes.extend_from_slice(&weave_sync_types::keys::encode_offset(3));
        assert!(IntervalSet::from_binary(&bytes).is_err());
    }

    #[test]
    fn serialize_limit_zero_is_empty() {
        let mut s = IntervalSet::new();
        s.add(2, 1);
        assert!(s.serialize(0).is_empty());
    }

    #[test]
    fn serialize_under_limit_returns_all_in_descending_end_order() {
        let mut s = IntervalSet::new();
        s.add(6, 3);
        s.add(2, 1);
        let out = s.serialize(10);
        assert_eq!(out, vec![Interval { end: 6, start: 3 }, Interval { end: 2, start: 1 }]);
    }

    // P1: no adds/deletes/cuts leave overlapping or touching intervals.
    #[test]
    fn p1_no_overlap_or_touch_after_mixed_mutations() {
        let mut s = IntervalSet::new();
        let ops: &[(&str, Offset, Offset)] = &[
            ("add", 10, 5),
            ("add", 5, 2),
            ("add", 40, 30),
            ("delete", 8, 6),
            ("add", 100, 50),
            ("delete", 60, 55),
            ("add", 57, 54),
            ("cut", 35, 0),
        ];
        for &(op, a, b) in ops {
            match op {
                "add" => s.add(a, b),
                "delete" => s.delete(a, b),
                "cut" => s.cut(a),
                _ => unreachable!(),
            }
        }
        let items: Vec<Interval> = s.iter().collect();
        for w in items.windows(2) {
            assert!(w[0].end < w[1].start, "intervals must not overlap or touch: {:?}", items);
        }
    }

    // P2
    #[test]
    fn p2_is_inside_matches_definition() {
        let mut s = IntervalSet::new();
        s.add(5, 2);
        s.add(20, 15);
        for n in 0..25 {
            let expected = s.iter().any(|i| i.start < n && n <= i.end);
            assert_eq!(s.is_inside(n), expected, "n={n}");
        }
    }

    // P3
    #[test]
    fn p3_sum_and_inverse_identities() {
        let mut s = IntervalSet::new();
        s.add(5, 2);
        s.add(20, 15);
        assert_eq!(s.sum(), 3 + 5);

        let inv = s.inverse();
        assert_eq!(IntervalSet::intersection(&s, &inv).count(), 0);
    }

    // P4
    #[test]
    fn p4_compact_only_grows_coverage() {
        let mut s = IntervalSet::new();
        s.add(3, 1);
        s.add(12, 8);
        s.add(25, 22);
        s.add(27, 26);
        let before: Vec<Interval> = s.iter().collect();
        let gaps = s.compact(2);
        assert!(s.count() <= 2);
        for b in &before {
            assert!(s.is_inside(b.end), "original coverage must survive compaction");
        }
        let absorbed_total: Offset = gaps.iter().map(|g| g.len()).sum();
        let before_total: Offset = before.iter().map(|i| i.len()).sum();
        assert_eq!(s.sum(), before_total + absorbed_total);
    }

    // P5
    #[test]
    fn p5_deserialize_of_serialize_is_identity_when_under_limit() {
        let mut s = IntervalSet::new();
        s.add(6, 3);
        s.add(2, 1);
        s.add(40, 35);
        let bytes = s.to_binary(s.count());
        let back = IntervalSet::from_binary(&bytes).unwrap();
        assert_eq!(ends_starts(&back), ends_starts(&s));
    }
}
