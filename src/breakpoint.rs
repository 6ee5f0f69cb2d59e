//! Breakpoints of the piecewise linear functions maximized by the long-step ratio tests.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// Which bound a breakpoint refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundSide {
    /// The lower bound of the variable.
    Lower,
    /// The upper bound of the variable.
    Upper,
}

impl BoundSide {
    /// The other bound.
    pub fn opposite(self) -> BoundSide {
        match self {
            BoundSide::Lower => BoundSide::Upper,
            BoundSide::Upper => BoundSide::Lower,
        }
    }
}

/// A point where the slope of the maximized function drops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breakpoint {
    /// Step length at which the breakpoint is reached.
    pub value: f64,
    /// Variable responsible for the breakpoint.
    pub variable: usize,
    /// Amount by which the slope decreases when the breakpoint is passed. May be infinite.
    pub slope: f64,
    /// Pivot row/column coefficient of the variable.
    pub alpha: f64,
    /// Bound the variable is at (dual) or is reaching (primal) at this breakpoint.
    pub side: BoundSide,
}

/// Ascending step length, then larger |alpha|, then smaller variable index.
fn compare_breakpoints(a: &Breakpoint, b: &Breakpoint) -> Ordering {
    a.value
        .partial_cmp(&b.value)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.alpha
                .abs()
                .partial_cmp(&a.alpha.abs())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.variable.cmp(&b.variable))
}

/// Min-heap adapter for `BinaryHeap`.
struct HeapEntry(Breakpoint);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_breakpoints(&other.0, &self.0)
    }
}

/// How collected breakpoints are put in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortingMethod {
    /// Sort all breakpoints at once.
    Full,
    /// Keep a binary heap and extract breakpoints only as far as they are consumed.
    Heap,
}

impl Default for SortingMethod {
    fn default() -> Self {
        SortingMethod::Heap
    }
}

/// Where the sweep stopped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepResult {
    /// Position of the maximizing breakpoint in sorted order.
    pub index: usize,
    /// Slope right before the breakpoint.
    pub slope_before: f64,
    /// Slope right after the breakpoint.
    pub slope_after: f64,
    /// Function value at the breakpoint.
    pub value: f64,
    /// True if every breakpoint was passed without the slope turning non-positive.
    pub exhausted: bool,
}

/// Result of the stable pivot refinement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refinement {
    /// Position of the chosen breakpoint in sorted order.
    pub index: usize,
    /// Number of positions moved towards shorter steps.
    pub backward: usize,
    /// Number of positions moved towards longer steps.
    pub forward: usize,
}

/// Collects breakpoints and hands them out in ascending order.
pub struct BreakpointHandler {
    method: SortingMethod,
    collected: Vec<Breakpoint>,
    heap: BinaryHeap<HeapEntry>,
    sorted: Vec<Breakpoint>,
    function_values: Vec<f64>,
    finalized: bool,
}

impl fmt::Debug for BreakpointHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BreakpointHandler({:?}, {} breakpoints, {} ordered)",
            self.method,
            self.len(),
            self.sorted.len()
        )
    }
}

impl BreakpointHandler {
    /// Creates an empty handler.
    pub fn new(method: SortingMethod) -> BreakpointHandler {
        BreakpointHandler {
            method,
            collected: vec![],
            heap: BinaryHeap::new(),
            sorted: vec![],
            function_values: vec![],
            finalized: false,
        }
    }

    /// Sorting method in use.
    pub fn method(&self) -> SortingMethod {
        self.method
    }

    /// Removes all breakpoints, keeping allocations.
    pub fn clear(&mut self) {
        self.collected.clear();
        self.heap.clear();
        self.sorted.clear();
        self.function_values.clear();
        self.finalized = false;
    }

    /// Adds a breakpoint. Must not be called after ordered access has started.
    pub fn add(&mut self, breakpoint: Breakpoint) {
        assert!(!self.finalized, "breakpoint added after sorting");
        self.collected.push(breakpoint);
    }

    /// Total number of breakpoints.
    pub fn len(&self) -> usize {
        if self.finalized {
            self.sorted.len() + self.heap.len()
        } else {
            self.collected.len()
        }
    }

    /// True if no breakpoints were added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of breakpoints already put in their final order.
    pub fn ordered_len(&self) -> usize {
        self.sorted.len()
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let collected = std::mem::replace(&mut self.collected, vec![]);
        match self.method {
            SortingMethod::Full => {
                self.sorted = collected;
                self.sorted.sort_unstable_by(compare_breakpoints);
            }
            SortingMethod::Heap => {
                self.heap = collected.into_iter().map(HeapEntry).collect();
            }
        }
    }

    /// The `k`-th smallest breakpoint.
    ///
    /// # Panics
    ///
    /// Panics if `k` is not less than the number of breakpoints.
    pub fn get(&mut self, k: usize) -> &Breakpoint {
        self.finalize();
        assert!(
            k < self.len(),
            "invalid sample {} (only {} breakpoints)",
            k,
            self.len()
        );
        while self.sorted.len() <= k {
            if let Some(HeapEntry(bp)) = self.heap.pop() {
                self.sorted.push(bp);
            }
        }
        &self.sorted[k]
    }

    /// Function value at the `k`-th breakpoint as recorded by the last sweep.
    pub fn function_value(&self, k: usize) -> Option<f64> {
        self.function_values.get(k).copied()
    }

    /// Walks the breakpoints in order, accumulating the piecewise linear function that starts
    /// at `initial_value` with slope `initial_slope` and loses `slope` at every breakpoint.
    ///
    /// Stops at the first breakpoint after which the slope is non-positive (the maximum of the
    /// concave function). If no such breakpoint exists, the last one is returned with
    /// `exhausted` set. Returns `None` if there are no breakpoints.
    pub fn sweep(&mut self, initial_value: f64, initial_slope: f64) -> Option<SweepResult> {
        self.finalize();
        self.function_values.clear();

        let len = self.len();
        let mut prev_t = 0.0;
        let mut value = initial_value;
        let mut slope = initial_slope;
        for k in 0..len {
            let bp = *self.get(k);
            value += slope * (bp.value - prev_t);
            prev_t = bp.value;
            self.function_values.push(value);

            let slope_after = if bp.slope.is_infinite() {
                f64::NEG_INFINITY
            } else {
                slope - bp.slope
            };
            if slope_after <= 0.0 || k + 1 == len {
                return Some(SweepResult {
                    index: k,
                    slope_before: slope,
                    slope_after,
                    value,
                    exhausted: slope_after > 0.0,
                });
            }
            slope = slope_after;
        }

        None
    }

    /// Looks for a numerically safer pivot near the breakpoint at `index`.
    ///
    /// Candidates are the breakpoints whose step length is within `window` of the chosen one.
    /// Moving forward is only possible over breakpoints accepted by `flippable`, since the
    /// passed variables have to change bounds. If the chosen |alpha| is below `threshold`
    /// times the largest candidate |alpha|, the candidate with the largest |alpha| is taken.
    pub fn refine(
        &mut self,
        index: usize,
        window: f64,
        threshold: f64,
        flippable: impl Fn(&Breakpoint) -> bool,
    ) -> Refinement {
        let chosen = *self.get(index);
        let mut best = (index, chosen.alpha.abs());

        for j in (0..index).rev() {
            let bp = *self.get(j);
            if chosen.value - bp.value > window {
                break;
            }
            if bp.alpha.abs() > best.1 {
                best = (j, bp.alpha.abs());
            }
        }

        // Passing breakpoint `j - 1` requires it to be flipped.
        let mut prev = chosen;
        for j in (index + 1)..self.len() {
            if !flippable(&prev) {
                break;
            }
            let bp = *self.get(j);
            if bp.value - chosen.value > window {
                break;
            }
            if bp.alpha.abs() > best.1 {
                best = (j, bp.alpha.abs());
            }
            prev = bp;
        }

        if chosen.alpha.abs() >= threshold * best.1 {
            return Refinement {
                index,
                backward: 0,
                forward: 0,
            };
        }

        let new_index = best.0;
        Refinement {
            index: new_index,
            backward: index.saturating_sub(new_index),
            forward: new_index.saturating_sub(index),
        }
    }
}
