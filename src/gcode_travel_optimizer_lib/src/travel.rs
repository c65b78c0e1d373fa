//! Travel ordering: nearest-neighbour construction followed by 2-opt refinement.
//!
//! The optimizer only ever sees stops as a planar entry point and a planar exit point. It returns
//! a permutation of stop indices, never touching the stops themselves, so the caller's segment
//! multiset is preserved by construction.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use kiddo::SquaredEuclidean;
use merging_iterator::MergeIter;
use ordered_float::OrderedFloat;
use rand::Rng;
use tracing::debug;

use crate::geometry::{planar_distance, Point};
use crate::segmenter::PrintSegment;
use crate::Mm;

type EndpointTree = kiddo::float::kdtree::KdTree<Mm, u32, 2, 32, u32>;

// Below this many stops a linear scan per step is cheaper than building and querying the tree.
const KD_TREE_MIN_STOPS: usize = 48;
// The KdTree refuses buckets where too many items share one coordinate, which is exactly what a
// grid of infill lines produces. Points go into the tree
// nudged by up to this much, queries widen by the same amount, and candidates are re-ranked by
// their exact distance, so the nudge never changes which stop is picked.
const KD_TREE_FUDGE_RADIUS: Mm = 0.0001;
const FRAC_1_SQRT_2: Mm = 0.7071067811865476;
const KD_TREE_FUDGE_PER_COMPONENT: Mm = KD_TREE_FUDGE_RADIUS * FRAC_1_SQRT_2;

/// Anything the optimizer can order. A stop with either end unknown is pinned to its slot.
pub trait TourStop {
    fn entry(&self) -> Option<Point>;
    fn exit(&self) -> Option<Point>;
}

impl TourStop for PrintSegment {
    fn entry(&self) -> Option<Point> {
        self.start().planar()
    }

    fn exit(&self) -> Option<Point> {
        self.end().planar()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TourBudget {
    // 0 disables 2-opt, leaving the nearest-neighbour order
    pub max_passes: usize,
    pub time_limit: Option<Duration>,
    // a reversal must save strictly more than this to be taken
    pub improvement_epsilon: Mm,
}

impl Default for TourBudget {
    fn default() -> Self {
        TourBudget { max_passes: 100, time_limit: None, improvement_epsilon: 1e-5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TourReport {
    /// Stop indices in travel order. Always a permutation of `0..stops.len()`.
    pub order: Vec<usize>,
    /// Stops that kept their original slot because an end could not be resolved.
    pub pinned: Vec<usize>,
    pub original_cost: Mm,
    pub nn_cost: Mm,
    pub final_cost: Mm,
    pub passes: usize,
    pub budget_exhausted: bool,
    // optimized order came out worse than the input, so the input order was kept
    pub kept_original: bool,
}

impl TourReport {
    pub fn is_reordered(&self) -> bool {
        self.order.iter().enumerate().any(|(slot, &index)| slot != index)
    }

    pub fn all_pinned(&self) -> bool {
        !self.order.is_empty() && self.pinned.len() == self.order.len()
    }
}

#[derive(Debug, Default)]
struct Legs {
    starts: Vec<Point>,
    ends: Vec<Point>,
}

impl Legs {
    fn len(&self) -> usize {
        self.starts.len()
    }
}

/// Orders `stops` to shorten travel from `entry` through every resolvable stop.
///
/// An unknown `entry` means the tour starts at the first resolvable stop in input order and the
/// leg leading to it is not counted.
pub fn plan_tour<S: TourStop>(stops: &[S], entry: Option<Point>, budget: &TourBudget) -> TourReport {
    let started = Instant::now();
    let (legs, resolved, pinned) = split_resolved(stops);

    let identity: Vec<usize> = (0..legs.len()).collect();
    let original_cost = tour_cost(&legs, entry, &identity);
    let mut tour = nearest_neighbor(&legs, entry, legs.len() >= KD_TREE_MIN_STOPS);
    let nn_cost = tour_cost(&legs, entry, &tour);
    let (passes, budget_exhausted) = two_opt(&legs, entry, &mut tour, budget, started);
    let mut final_cost = tour_cost(&legs, entry, &tour);

    let kept_original = final_cost > original_cost;
    if kept_original {
        tour = identity;
        final_cost = original_cost;
    }
    debug!(
        "tour of {} stops ({} pinned): original {:.3} nn {:.3} final {:.3} passes {} elapsed {:.2?}",
        stops.len(),
        pinned.len(),
        original_cost,
        nn_cost,
        final_cost,
        passes,
        started.elapsed()
    );

    let order = fill_free_slots(stops.len(), &pinned, tour.into_iter().map(|local| resolved[local]));
    TourReport { order, pinned, original_cost, nn_cost, final_cost, passes, budget_exhausted, kept_original }
}

/// Nearest-neighbour order of the resolvable stops, as indices into `stops`.
pub fn nearest_neighbor_order<S: TourStop>(stops: &[S], entry: Option<Point>) -> Vec<usize> {
    let (legs, resolved, _) = split_resolved(stops);
    nearest_neighbor(&legs, entry, legs.len() >= KD_TREE_MIN_STOPS).into_iter().map(|local| resolved[local]).collect()
}

/// Travel cost of visiting the resolvable stops in `order`; pinned stops are skipped.
pub fn tour_cost_of<S: TourStop>(stops: &[S], order: &[usize], entry: Option<Point>) -> Mm {
    let mut total = 0.0;
    let mut at = entry;
    for stop in order.iter().filter_map(|&i| stops.get(i)) {
        if let (Some(start), Some(end)) = (stop.entry(), stop.exit()) {
            if let Some(at) = at {
                total += planar_distance(at, start);
            }
            at = Some(end);
        }
    }
    total
}

fn split_resolved<S: TourStop>(stops: &[S]) -> (Legs, Vec<usize>, Vec<usize>) {
    let mut legs = Legs::default();
    let mut resolved = Vec::new();
    let mut pinned = Vec::new();
    for (index, stop) in stops.iter().enumerate() {
        match (stop.entry(), stop.exit()) {
            (Some(start), Some(end)) => {
                legs.starts.push(start);
                legs.ends.push(end);
                resolved.push(index);
            }
            _ => pinned.push(index),
        }
    }
    (legs, resolved, pinned)
}

// Pinned stops keep their slot; the optimized stops fill the other slots front to back.
fn fill_free_slots(len: usize, pinned: &[usize], optimized: impl Iterator<Item = usize>) -> Vec<usize> {
    let free_slots = (0..len).filter(|slot| pinned.binary_search(slot).is_err());
    let placed = free_slots.zip(optimized);
    MergeIter::new(pinned.iter().map(|&index| (index, index)), placed).map(|(_, index)| index).collect()
}

fn tour_cost(legs: &Legs, entry: Option<Point>, tour: &[usize]) -> Mm {
    let mut total = 0.0;
    let mut at = entry;
    for &i in tour {
        if let Some(at) = at {
            total += planar_distance(at, legs.starts[i]);
        }
        at = Some(legs.ends[i]);
    }
    total
}

enum Unvisited {
    Scan(BTreeSet<usize>),
    Tree { tree: EndpointTree, fudged: Vec<[Mm; 2]>, remaining: usize },
}

impl Unvisited {
    fn new(starts: &[Point], use_tree: bool) -> Unvisited {
        if !use_tree || u32::try_from(starts.len()).is_err() {
            return Unvisited::Scan((0..starts.len()).collect());
        }
        let mut tree = EndpointTree::new();
        let mut rng = rand::thread_rng();
        let fudged: Vec<[Mm; 2]> = starts
            .iter()
            .map(|p| {
                [
                    p.x + rng.gen::<Mm>() * KD_TREE_FUDGE_PER_COMPONENT,
                    p.y + rng.gen::<Mm>() * KD_TREE_FUDGE_PER_COMPONENT,
                ]
            })
            .collect();
        for (index, point) in fudged.iter().enumerate() {
            // fits, checked above
            tree.add(point, index as u32);
        }
        Unvisited::Tree { tree, fudged, remaining: starts.len() }
    }

    fn remove(&mut self, index: usize) {
        match self {
            Unvisited::Scan(remaining) => {
                remaining.remove(&index);
            }
            Unvisited::Tree { tree, fudged, remaining } => {
                *remaining -= tree.remove(&fudged[index], index as u32);
            }
        }
    }

    /// Removes and returns the unvisited stop whose start is nearest to `from`, lowest index on
    /// ties.
    fn take_nearest(&mut self, from: Point, starts: &[Point]) -> Option<usize> {
        let rank = |index: usize| (OrderedFloat(planar_distance(from, starts[index])), index);
        let nearest = match self {
            Unvisited::Scan(remaining) => remaining.iter().copied().min_by_key(|&index| rank(index))?,
            Unvisited::Tree { tree, remaining, .. } => {
                if *remaining == 0 {
                    return None;
                }
                let query = [from.x, from.y];
                let first_hit = tree.nearest_one::<SquaredEuclidean>(&query).item as usize;
                // Anything at least as close as the first hit's exact distance sits within this
                // radius of the query in the tree, fudge included.
                let radius = planar_distance(from, starts[first_hit]) + 2.0 * KD_TREE_FUDGE_RADIUS;
                tree.within_unsorted::<SquaredEuclidean>(&query, radius * radius)
                    .iter()
                    .map(|neighbour| neighbour.item as usize)
                    .min_by_key(|&index| rank(index))
                    .unwrap_or(first_hit)
            }
        };
        self.remove(nearest);
        Some(nearest)
    }
}

fn nearest_neighbor(legs: &Legs, entry: Option<Point>, use_tree: bool) -> Vec<usize> {
    let mut order = Vec::with_capacity(legs.len());
    if legs.starts.is_empty() {
        return order;
    }
    let mut unvisited = Unvisited::new(&legs.starts, use_tree);
    let mut at = match entry {
        Some(entry) => entry,
        None => {
            unvisited.remove(0);
            order.push(0);
            legs.ends[0]
        }
    };
    while let Some(next) = unvisited.take_nearest(at, &legs.starts) {
        order.push(next);
        at = legs.ends[next];
    }
    order
}

// fwd[p] sums the legs end(t[q-1]) -> start(t[q]) for q in 1..=p, rev[p] the same legs walked
// the other way, end(t[q]) -> start(t[q-1]). Reversing t[i..=k] swaps one run for the other.
fn prefix_sums(legs: &Legs, tour: &[usize]) -> (Vec<Mm>, Vec<Mm>) {
    let mut fwd = vec![0.0; tour.len()];
    let mut rev = vec![0.0; tour.len()];
    for p in 1..tour.len() {
        let (previous, current) = (tour[p - 1], tour[p]);
        fwd[p] = fwd[p - 1] + planar_distance(legs.ends[previous], legs.starts[current]);
        rev[p] = rev[p - 1] + planar_distance(legs.ends[current], legs.starts[previous]);
    }
    (fwd, rev)
}

fn reversal_delta(legs: &Legs, entry: Option<Point>, tour: &[usize], sums: &(Vec<Mm>, Vec<Mm>), i: usize, k: usize) -> Mm {
    let (fwd, rev) = sums;
    let (first, last) = (tour[i], tour[k]);
    let before = if i == 0 { entry } else { Some(legs.ends[tour[i - 1]]) };
    let incoming = before.map_or(0.0, |at| planar_distance(at, legs.starts[last]) - planar_distance(at, legs.starts[first]));
    let internal = (rev[k] - rev[i]) - (fwd[k] - fwd[i]);
    let outgoing = match tour.get(k + 1) {
        Some(&next) => planar_distance(legs.ends[first], legs.starts[next]) - planar_distance(legs.ends[last], legs.starts[next]),
        None => 0.0,
    };
    incoming + internal + outgoing
}

/// Greedy first-improvement 2-opt. Returns the passes run and whether a budget cut it short.
fn two_opt(legs: &Legs, entry: Option<Point>, tour: &mut [usize], budget: &TourBudget, started: Instant) -> (usize, bool) {
    let n = tour.len();
    if n < 2 {
        return (0, false);
    }
    let deadline = budget.time_limit.map(|limit| started + limit);
    let mut sums = prefix_sums(legs, tour);
    let mut passes = 0;
    loop {
        if passes == budget.max_passes {
            // the last pass still improved, so this is a cut-off rather than convergence
            return (passes, passes > 0);
        }
        passes += 1;
        let mut improved = false;
        for i in 0..n - 1 {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return (passes, true);
            }
            for k in i + 1..n {
                if reversal_delta(legs, entry, tour, &sums, i, k) < -budget.improvement_epsilon {
                    tour[i..=k].reverse();
                    sums = prefix_sums(legs, tour);
                    improved = true;
                }
            }
        }
        if !improved {
            return (passes, false);
        }
    }
}
