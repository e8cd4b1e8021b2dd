//! Union-find with path compression and union by rank, used by cluster-sync
//! to compute connected components of the similarity graph in-process
//! rather than via a recursive CTE.

pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Groups indices by root, in first-seen order.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut groups: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            groups.entry(root).or_default().push(i);
        }
        groups.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_nodes_form_singleton_components() {
        let mut uf = UnionFind::new(3);
        let mut components = uf.components();
        components.sort_by_key(|c| c[0]);
        assert_eq!(components, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn union_merges_two_components_into_one() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        let mut components = uf.components();
        for c in components.iter_mut() {
            c.sort();
        }
        components.sort_by_key(|c| c[0]);
        assert_eq!(components, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn transitive_union_chains_into_one_component() {
        let mut uf = UnionFind::new(3);
        uf.union(0, 1);
        uf.union(1, 2);
        let mut components = uf.components();
        components[0].sort();
        assert_eq!(components, vec![vec![0, 1, 2]]);
    }
}
