//! The CPA worklist algorithm.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use rustc_hash::FxHashMap;

use super::{ConfigurableProgramAnalysis, ElementWithLocation};
use crate::cfa::{Cfa, CfaEdge, NodeId};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Partition<E, P> {
    elements: Vec<E>,
    precisions: Vec<P>,
}

impl<E, P> Default for Partition<E, P> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            precisions: Vec::new(),
        }
    }
}

/// Reached elements with their precisions, plus the waitlist of elements
/// whose successors are not yet computed.
///
/// The stop and merge operators only ever see elements at the same program
/// location. A specialized reached set is partitioned by location instead of
/// filtering a single list.
#[derive(Debug, Clone)]
pub struct ReachedSet<E, P> {
    specialized: bool,
    partitions: FxHashMap<Option<NodeId>, Partition<E, P>>,
    waitlist: VecDeque<(E, P)>,
    size: usize,
}

impl<E, P> ReachedSet<E, P>
where
    E: Clone + PartialEq + ElementWithLocation,
    P: Clone,
{
    pub fn new(specialized: bool) -> Self {
        Self {
            specialized,
            partitions: FxHashMap::default(),
            waitlist: VecDeque::new(),
            size: 0,
        }
    }

    pub fn is_specialized(&self) -> bool {
        self.specialized
    }

    fn key(&self, element: &E) -> Option<NodeId> {
        if self.specialized {
            element.location()
        } else {
            None
        }
    }

    pub fn add(&mut self, element: E, precision: P) {
        let key = self.key(&element);
        let partition = self.partitions.entry(key).or_default();
        partition.elements.push(element.clone());
        partition.precisions.push(precision.clone());
        self.waitlist.push_back((element, precision));
        self.size += 1;
    }

    /// Replace `old` by `new`; `old` is also taken off the waitlist.
    pub fn replace(&mut self, old: &E, new: E, precision: P) {
        let key = self.key(old);
        debug_assert_eq!(key, self.key(&new));
        let removed = match self.partitions.get_mut(&key) {
            Some(partition) => match partition.elements.iter().position(|e| e == old) {
                Some(i) => {
                    partition.elements.swap_remove(i);
                    partition.precisions.swap_remove(i);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            self.size -= 1;
        }
        self.waitlist.retain(|(e, _)| e != old);
        self.add(new, precision);
    }

    /// The reached elements at the location of `element`.
    pub fn reached(&self, element: &E) -> Vec<E> {
        let location = element.location();
        match self.partitions.get(&self.key(element)) {
            Some(partition) if self.specialized => partition.elements.clone(),
            Some(partition) => partition
                .elements
                .iter()
                .filter(|e| e.location() == location)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn precision(&self, element: &E) -> Option<&P> {
        let partition = self.partitions.get(&self.key(element))?;
        let i = partition.elements.iter().position(|e| e == element)?;
        Some(&partition.precisions[i])
    }

    pub fn contains(&self, element: &E) -> bool {
        self.reached(element).contains(element)
    }

    pub fn pop(&mut self) -> Option<(E, P)> {
        self.waitlist.pop_front()
    }

    pub fn has_waiting(&self) -> bool {
        !self.waitlist.is_empty()
    }

    pub fn waitlist_len(&self) -> usize {
        self.waitlist.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.partitions.values().flat_map(|partition| partition.elements.iter())
    }

    /// All elements at `node`.
    pub fn at(&self, node: NodeId) -> Vec<&E> {
        self.iter().filter(|e| e.location() == Some(node)).collect()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlgorithmStats {
    pub iterations: usize,
    pub successors: usize,
    pub merges: usize,
    pub stopped: usize,
    pub reached: usize,
    /// The waitlist was not empty when `max_iterations` ran out.
    pub incomplete: bool,
    pub time: Duration,
}

impl Display for AlgorithmStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Iterations:            {}", self.iterations)?;
        writeln!(f, "Successors computed:   {}", self.successors)?;
        writeln!(f, "Merges:                {}", self.merges)?;
        writeln!(f, "Covered successors:    {}", self.stopped)?;
        writeln!(f, "Reached set size:      {}", self.reached)?;
        writeln!(f, "Complete:              {}", !self.incomplete)?;
        write!(f, "Time:                  {:?}", self.time)
    }
}

/// Explores the abstract state space of a [`Cfa`] until the waitlist is empty.
#[derive(Debug)]
pub struct CpaAlgorithm<'a, C> {
    pub cpa: &'a C,
    pub cfa: &'a Cfa,
    pub max_iterations: usize,
}

impl<'a, C> CpaAlgorithm<'a, C>
where
    C: ConfigurableProgramAnalysis,
    C::Element: ElementWithLocation,
{
    pub fn new(cpa: &'a C, cfa: &'a Cfa) -> Self {
        Self {
            cpa,
            cfa,
            max_iterations: 100_000,
        }
    }

    /// A reached set holding the initial element at the entry of the CFA.
    pub fn initial_reached_set(&self, specialized: bool) -> ReachedSet<C::Element, C::Precision> {
        let entry = self.cfa.entry();
        let mut reached = ReachedSet::new(specialized);
        reached.add(self.cpa.initial_element(entry), self.cpa.initial_precision(entry));
        reached
    }

    fn leaving_edges(&self, element: &C::Element) -> Vec<&'a CfaEdge> {
        match element.location() {
            Some(node) => self.cfa.leaving_edges(node).collect(),
            None => self.cfa.edges().iter().collect(),
        }
    }

    pub fn run(&self, reached: &mut ReachedSet<C::Element, C::Precision>) -> Result<AlgorithmStats> {
        let start = Instant::now();
        let transfer = self.cpa.transfer_relation();
        let merge = self.cpa.merge_operator();
        let stop = self.cpa.stop_operator();
        let mut stats = AlgorithmStats::default();

        while reached.has_waiting() {
            if stats.iterations >= self.max_iterations {
                warn!(
                    "{} analysis did not finish after {} iterations",
                    self.cpa.name(),
                    self.max_iterations
                );
                stats.incomplete = true;
                break;
            }
            let Some((element, precision)) = reached.pop() else {
                break;
            };
            stats.iterations += 1;
            trace!("Exploring {:?}", element);

            for edge in self.leaving_edges(&element) {
                let successors = transfer.successors(&element, &precision, edge)?;
                stats.successors += successors.len();

                for successor in successors {
                    for r in reached.reached(&successor) {
                        let merged = merge.merge(&successor, &r, &precision)?;
                        if merged != r {
                            debug!("Merged into element at {:?}", merged.location());
                            stats.merges += 1;
                            reached.replace(&r, merged, precision.clone());
                        }
                    }

                    if stop.stop(&successor, &reached.reached(&successor))? {
                        stats.stopped += 1;
                        continue;
                    }
                    reached.add(successor, precision.clone());
                }
            }
        }

        stats.reached = reached.len();
        stats.time = start.elapsed();
        info!(
            "{} analysis: {} iterations, {} reached elements in {:?}",
            self.cpa.name(),
            stats.iterations,
            stats.reached,
            stats.time
        );
        Ok(stats)
    }
}
