//! Live-range segments and the strength-aware merge algebra.

use ir::{FuncId, Value};
use smallvec::SmallVec;

/// Strength of a live segment.
///
/// Ordering matters: when segments overlap, the strongest one wins the
/// sweep in [`sort_and_merge`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strength {
    /// Liveness across an uncalled subroutine: blocks coalescing, but
    /// two weak segments do not interfere with each other.
    Weak,
    /// Single-point liveness at a phi-copy insertion slot, used only
    /// to suppress false interference across critical edges.
    PhiCpy,
    /// Real liveness.
    Strong,
}

/// A half-open `[start, end)` interval in instruction-number space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
    pub strength: Strength,
}

impl Segment {
    pub fn new(start: u32, end: u32, strength: Strength) -> Self {
        debug_assert!(start < end, "empty segment [{start}, {end})");
        Segment {
            start,
            end,
            strength,
        }
    }

    pub fn strong(start: u32, end: u32) -> Self {
        Segment::new(start, end, Strength::Strong)
    }

    pub fn weak(start: u32, end: u32) -> Self {
        Segment::new(start, end, Strength::Weak)
    }

    pub fn phicpy(at: u32) -> Self {
        Segment::new(at, at + 1, Strength::PhiCpy)
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, point: u32) -> bool {
        self.start <= point && point < self.end
    }
}

/// Register file a coalesced range must be assigned from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Category {
    #[default]
    General,
    Predicate,
    Address,
    Surface,
    Sampler,
    Special,
}

/// A value identified across a whole function group.
pub type GValue = (FuncId, Value);

/// The liveness of one or more coalesced values, as a sorted,
/// non-overlapping list of strength-tagged segments.
#[derive(Clone, Debug, Default)]
pub struct LiveRange {
    pub segments: Vec<Segment>,
    pub values: SmallVec<[GValue; 2]>,
    pub category: Category,
    /// Required alignment, log2 bytes.
    pub log_align: u32,
    /// Byte offset within an aligned unit.
    pub offset: u32,
}

impl LiveRange {
    pub fn push(&mut self, seg: Segment) {
        self.segments.push(seg);
    }

    pub fn contains_point(&self, point: u32) -> bool {
        self.segments.iter().any(|s| s.contains(point))
    }

    /// Normalizes the segment list: sorted by start, pairwise
    /// non-overlapping, adjacent same-strength segments merged, weak
    /// spans covered by strong ones absorbed, and a PHICPY segment
    /// folded into an immediately-preceding STRONG segment (but never
    /// the other way round: a PHICPY cannot upgrade an otherwise
    /// absent span).
    pub fn sort_and_merge(&mut self) {
        let merged = sort_and_merge(std::mem::take(&mut self.segments));
        self.segments = merged;
    }

    /// Invariant check: sorted, non-overlapping, no two adjacent
    /// same-strength segments left unmerged.
    pub fn test_live_ranges(&self) {
        for pair in self.segments.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.start < a.end, "empty segment");
            assert!(a.end <= b.start, "segments out of order or overlapping");
            assert!(
                a.end < b.start || a.strength != b.strength,
                "adjacent same-strength segments left unmerged"
            );
        }
    }
}

/// Sweep-line merge over segment start/end events, tracking the
/// maximum-strength currently-open segment.
pub fn sort_and_merge(segments: Vec<Segment>) -> Vec<Segment> {
    if segments.is_empty() {
        return segments;
    }

    // (position, is_end, strength); starts sort before ends at equal
    // positions so abutting segments fuse.
    let mut events: Vec<(u32, bool, Strength)> = Vec::with_capacity(segments.len() * 2);
    for seg in &segments {
        events.push((seg.start, false, seg.strength));
        events.push((seg.end, true, seg.strength));
    }
    events.sort_unstable_by_key(|&(pos, is_end, _)| (pos, is_end));

    let mut open = [0u32; 3];
    let max_open = |open: &[u32; 3]| -> Option<Strength> {
        if open[Strength::Strong as usize] > 0 {
            Some(Strength::Strong)
        } else if open[Strength::PhiCpy as usize] > 0 {
            Some(Strength::PhiCpy)
        } else if open[Strength::Weak as usize] > 0 {
            Some(Strength::Weak)
        } else {
            None
        }
    };

    let mut out: Vec<Segment> = Vec::new();
    let mut cur: Option<(u32, Strength)> = None;
    let mut i = 0;
    while i < events.len() {
        let pos = events[i].0;
        while i < events.len() && events[i].0 == pos {
            let (_, is_end, strength) = events[i];
            if is_end {
                open[strength as usize] -= 1;
            } else {
                open[strength as usize] += 1;
            }
            i += 1;
        }
        let now = max_open(&open);
        match (cur, now) {
            (None, Some(s)) => cur = Some((pos, s)),
            (Some((start, s)), None) => {
                out.push(Segment::new(start, pos, s));
                cur = None;
            }
            (Some((start, s)), Some(s2)) if s != s2 => {
                out.push(Segment::new(start, pos, s));
                cur = Some((pos, s2));
            }
            _ => {}
        }
    }
    debug_assert!(cur.is_none(), "unbalanced segment events");

    // Fold PHICPY segments into an immediately preceding abutting
    // STRONG segment; the merge is deliberately not symmetric.
    let mut folded: Vec<Segment> = Vec::with_capacity(out.len());
    for seg in out {
        if let Some(prev) = folded.last_mut() {
            if prev.end == seg.start
                && prev.strength == Strength::Strong
                && seg.strength == Strength::PhiCpy
            {
                prev.end = seg.end;
                continue;
            }
            if prev.end == seg.start && prev.strength == seg.strength {
                prev.end = seg.end;
                continue;
            }
        }
        folded.push(seg);
    }
    folded
}
