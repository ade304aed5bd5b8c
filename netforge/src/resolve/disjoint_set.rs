//! Disjoint-set forest with path compression and union by rank.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Add a singleton set and return its index.
    pub fn push(&mut self) -> usize {
        let index = self.parent.len();
        self.parent.push(index);
        self.rank.push(0);
        index
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets holding `a` and `b`. Returns false when they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }

    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// Every set as a sorted list of members, keyed by its smallest member.
    pub fn groups(&mut self) -> BTreeMap<usize, Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        by_root
            .into_values()
            .map(|members| (members[0], members))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_find() {
        let mut ds = DisjointSet::new(5);
        assert!(ds.union(0, 1));
        assert!(ds.union(3, 4));
        assert!(!ds.union(1, 0));
        assert!(ds.connected(0, 1));
        assert!(!ds.connected(1, 3));
        assert!(ds.union(1, 4));
        assert!(ds.connected(0, 3));
    }

    #[test]
    fn test_groups_independent_of_union_order() {
        let mut a = DisjointSet::new(6);
        a.union(0, 2);
        a.union(2, 5);
        a.union(1, 4);

        let mut b = DisjointSet::new(6);
        b.union(4, 1);
        b.union(5, 2);
        b.union(0, 5);

        assert_eq!(a.groups(), b.groups());
        let groups: Vec<Vec<usize>> = a.groups().into_values().collect();
        assert_eq!(groups, vec![vec![0, 2, 5], vec![1, 4], vec![3]]);
    }

    #[test]
    fn test_push_extends() {
        let mut ds = DisjointSet::new(1);
        let i = ds.push();
        assert_eq!(i, 1);
        assert_eq!(ds.len(), 2);
        ds.union(0, i);
        assert!(ds.connected(1, 0));
    }
}
