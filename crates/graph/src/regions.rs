//! Pipelined region computation over dense member indices.
//!
//! Used twice: once over job vertices to find logical regions, and once over
//! the execution vertices of each logical region that has only pointwise
//! internal edges.

use std::collections::HashMap;

/// A directed data dependency between two members.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionEdge {
    pub producer: usize,
    pub consumer: usize,
    pub pipelined: bool,
}

/// Union-find with path halving and union by rank.
pub(crate) struct DisjointSet {
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

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
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
}

/// Group `len` members into pipelined regions.
///
/// Members joined by a pipelined edge share a region. Regions that depend on
/// each other in a cycle (possible through blocking edges) are merged, since
/// neither could be scheduled or restarted without the other.
///
/// Returned regions are sorted by their smallest member, and members within a
/// region are sorted ascending.
pub(crate) fn compute_regions(len: usize, edges: &[RegionEdge]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(len);
    for edge in edges.iter().filter(|e| e.pipelined) {
        sets.union(edge.producer, edge.consumer);
    }

    let mut region_of = vec![0usize; len];
    let mut raw: Vec<Vec<usize>> = Vec::new();
    let mut by_root: HashMap<usize, usize> = HashMap::new();
    for member in 0..len {
        let root = sets.find(member);
        let region = *by_root.entry(root).or_insert_with(|| {
            raw.push(Vec::new());
            raw.len() - 1
        });
        raw[region].push(member);
        region_of[member] = region;
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); raw.len()];
    for edge in edges {
        let (from, to) = (region_of[edge.producer], region_of[edge.consumer]);
        if from != to && !successors[from].contains(&to) {
            successors[from].push(to);
        }
    }

    let components = strongly_connected(raw.len(), &successors);
    if components.len() == raw.len() {
        return raw;
    }

    let mut merged: Vec<Vec<usize>> = components
        .into_iter()
        .map(|component| {
            let mut members: Vec<usize> = component
                .into_iter()
                .flat_map(|region| raw[region].iter().copied())
                .collect();
            members.sort_unstable();
            members
        })
        .collect();
    merged.sort_by_key(|members| members[0]);
    merged
}

/// Iterative Tarjan SCC over `successors`.
fn strongly_connected(len: usize, successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let mut index = vec![UNVISITED; len];
    let mut low = vec![0usize; len];
    let mut on_stack = vec![false; len];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    for root in 0..len {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = work.last_mut() {
            let node = frame.0;
            if frame.1 < successors[node].len() {
                let next = successors[node][frame.1];
                frame.1 += 1;
                if index[next] == UNVISITED {
                    index[next] = next_index;
                    low[next] = next_index;
                    next_index += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    work.push((next, 0));
                } else if on_stack[next] {
                    low[node] = low[node].min(index[next]);
                }
                continue;
            }

            work.pop();
            if let Some(parent) = work.last() {
                low[parent.0] = low[parent.0].min(low[node]);
            }
            if low[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}
