//! Disjoint partitions of a fixed universe of ids with O(1) membership queries and moves.

use crate::helpers::SENTINEL;
use std::fmt;
use std::ops::Range;

#[derive(Clone, Copy, Debug)]
struct Node {
    prev: usize,
    next: usize,
    partition: usize,
}

/// A universe of ids `0..count` split into `partitions` disjoint sets.
///
/// Every set is a circular doubly linked list threaded through one node array. The head of
/// partition `p` is a sentinel node stored at position `count + p`, so all links are plain
/// indices and cloning is an ordinary deep copy. Each id also carries an attached value of
/// type `A`.
///
/// New members are linked in at the head, so a partition iterates its members in reverse
/// insertion order.
#[derive(Clone)]
pub struct PartitionedIndex<A> {
    count: usize,
    nodes: Vec<Node>,
    sizes: Vec<usize>,
    attached: Vec<A>,
}

impl<A: fmt::Debug> fmt::Debug for PartitionedIndex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "PartitionedIndex({} ids, {} partitions)",
            self.count,
            self.sizes.len()
        )?;
        for p in 0..self.sizes.len() {
            let members = self
                .iter_partition(p)
                .map(|id| (id, &self.attached[id]))
                .collect::<Vec<_>>();
            writeln!(f, "  {}: {:?}", p, members)?;
        }
        Ok(())
    }
}

impl<A: Clone + Default> PartitionedIndex<A> {
    /// Creates the structure with all ids detached and every partition empty.
    pub fn new(count: usize, partitions: usize) -> Self {
        let mut nodes = vec![
            Node {
                prev: SENTINEL,
                next: SENTINEL,
                partition: SENTINEL,
            };
            count + partitions
        ];
        for p in 0..partitions {
            let head = count + p;
            nodes[head] = Node {
                prev: head,
                next: head,
                partition: p,
            };
        }

        PartitionedIndex {
            count,
            nodes,
            sizes: vec![0; partitions],
            attached: vec![A::default(); count],
        }
    }
}

impl<A> PartitionedIndex<A> {
    /// Size of the id universe.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.sizes.len()
    }

    /// Number of ids currently in partition `p`.
    pub fn len_of(&self, p: usize) -> usize {
        self.sizes[p]
    }

    /// True if `id` is a member of some partition.
    pub fn is_inserted(&self, id: usize) -> bool {
        self.nodes[id].partition != SENTINEL
    }

    /// The partition containing `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is detached.
    pub fn where_is(&self, id: usize) -> usize {
        let p = self.nodes[id].partition;
        assert!(p != SENTINEL, "id {} is not in any partition", id);
        p
    }

    /// Value attached to `id`.
    pub fn attached(&self, id: usize) -> &A {
        &self.attached[id]
    }

    /// Replaces the value attached to `id` without moving it.
    pub fn set_attached(&mut self, id: usize, val: A) {
        self.attached[id] = val;
    }

    /// Links a detached `id` at the head of `partition`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already a member of some partition.
    pub fn insert(&mut self, partition: usize, id: usize, attached: A) {
        assert!(id < self.count, "id {} out of range", id);
        assert!(
            partition < self.sizes.len(),
            "partition {} out of range",
            partition
        );
        assert!(!self.is_inserted(id), "id {} is already inserted", id);

        let head = self.count + partition;
        let first = self.nodes[head].next;
        self.nodes[id] = Node {
            prev: head,
            next: first,
            partition,
        };
        self.nodes[first].prev = id;
        self.nodes[head].next = id;
        self.sizes[partition] += 1;
        self.attached[id] = attached;
    }

    /// Unlinks `id` from its partition. The attached value is kept.
    ///
    /// # Panics
    ///
    /// Panics if `id` is detached.
    pub fn remove(&mut self, id: usize) {
        let partition = self.where_is(id);
        let Node { prev, next, .. } = self.nodes[id];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[id] = Node {
            prev: SENTINEL,
            next: SENTINEL,
            partition: SENTINEL,
        };
        self.sizes[partition] -= 1;
    }

    /// Moves `id` to the head of `partition` and replaces its attached value.
    pub fn move_to(&mut self, id: usize, partition: usize, attached: A) {
        self.remove(id);
        self.insert(partition, id, attached);
    }

    /// Members of partition `p`, most recently inserted first.
    pub fn iter_partition(&self, p: usize) -> PartitionIter<'_, A> {
        let head = self.count + p;
        PartitionIter {
            index: self,
            head,
            cur: self.nodes[head].next,
        }
    }

    /// Members of the partitions in `range`, partition by partition. Empty partitions are
    /// skipped.
    pub fn iter_range(&self, range: Range<usize>) -> impl Iterator<Item = usize> + '_ {
        range.flat_map(move |p| self.iter_partition(p))
    }
}

/// Iterator over the members of one partition.
#[derive(Clone, Debug)]
pub struct PartitionIter<'a, A> {
    index: &'a PartitionedIndex<A>,
    head: usize,
    cur: usize,
}

impl<'a, A> Iterator for PartitionIter<'a, A> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == self.head {
            return None;
        }
        let id = self.cur;
        self.cur = self.index.nodes[id].next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn move_between_partitions() {
        let mut index = PartitionedIndex::<f64>::new(10, 2);
        index.insert(0, 3, 0.0);
        index.insert(0, 7, 0.0);
        index.insert(0, 9, 0.0);
        index.insert(1, 1, 0.0);

        index.move_to(7, 1, 2.5);
        assert_eq!(index.where_is(7), 1);
        assert_eq!(*index.attached(7), 2.5);
        assert_eq!(index.iter_partition(0).collect::<Vec<_>>(), vec![9, 3]);
        assert_eq!(index.iter_partition(1).collect::<Vec<_>>(), vec![7, 1]);
        assert_eq!(index.len_of(0), 2);
        assert_eq!(index.len_of(1), 2);
    }

    #[test]
    fn range_iteration_skips_empty() {
        let mut index = PartitionedIndex::<()>::new(6, 4);
        index.insert(1, 0, ());
        index.insert(3, 4, ());
        index.insert(3, 5, ());
        index.insert(0, 2, ());

        assert_eq!(index.iter_range(1..4).collect::<Vec<_>>(), vec![0, 5, 4]);
        assert_eq!(index.iter_range(2..3).count(), 0);
        assert_eq!(index.iter_range(0..2).collect::<Vec<_>>(), vec![2, 0]);
    }

    #[test]
    fn clone_is_independent() {
        let mut orig = PartitionedIndex::<i32>::new(4, 2);
        for id in 0..4 {
            orig.insert(id % 2, id, id as i32);
        }

        let mut copy = orig.clone();
        copy.move_to(0, 1, -1);
        copy.remove(3);

        assert_eq!(orig.where_is(0), 0);
        assert_eq!(*orig.attached(0), 0);
        assert!(orig.is_inserted(3));
        assert_eq!(orig.iter_partition(1).collect::<Vec<_>>(), vec![3, 1]);

        assert_eq!(copy.iter_partition(1).collect::<Vec<_>>(), vec![0, 1]);
        assert!(!copy.is_inserted(3));
    }

    #[test]
    fn random_moves_keep_partition_invariant() {
        let count = 50;
        let partitions = 5;
        let mut rng = rand_pcg::Pcg64::seed_from_u64(17);
        let mut index = PartitionedIndex::<usize>::new(count, partitions);
        let mut expected = vec![None; count];

        for _ in 0..2000 {
            let id = rng.gen_range(0, count);
            let p = rng.gen_range(0, partitions);
            match expected[id] {
                None => index.insert(p, id, p),
                Some(_) if rng.gen_range(0, 5) == 0 => {
                    index.remove(id);
                    expected[id] = None;
                    continue;
                }
                Some(_) => index.move_to(id, p, p),
            }
            expected[id] = Some(p);
        }

        let mut seen = vec![0; count];
        for p in 0..partitions {
            let members = index.iter_partition(p).collect::<Vec<_>>();
            assert_eq!(members.len(), index.len_of(p));
            for id in members {
                seen[id] += 1;
                assert_eq!(index.where_is(id), p);
                assert_eq!(*index.attached(id), p);
                assert_eq!(expected[id], Some(p));
            }
        }
        for id in 0..count {
            assert_eq!(seen[id], if expected[id].is_some() { 1 } else { 0 });
        }
        let total: usize = (0..partitions).map(|p| index.len_of(p)).sum();
        assert_eq!(total, expected.iter().filter(|e| e.is_some()).count());
    }

    #[test]
    #[should_panic]
    fn where_is_detached_panics() {
        let index = PartitionedIndex::<()>::new(3, 1);
        index.where_is(2);
    }
}
