//! Hierarchical density clustering (HDBSCAN).
//!
//! Builds a minimum spanning tree over the mutual-reachability graph,
//! condenses the resulting single-linkage hierarchy with
//! `min_cluster_size`, and selects clusters by excess of mass. Unlike
//! DBSCAN there is no fixed `eps`: each cluster is extracted at the
//! density level where it is most stable.

use crate::dbscan::NOISE;
use crate::metric::Metric;

/// Tuning knobs for [`hdbscan`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Params {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub allow_single_cluster: bool,
    pub metric: Metric,
}

/// One merge of the single-linkage dendrogram.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Edge of the condensed tree. `child < n` is a point, otherwise a cluster.
#[derive(Debug, Clone, Copy)]
struct Condensed {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

/// Returns labels in the same convention as DBSCAN: -1 for noise,
/// positive integers for clusters.
pub(crate) fn hdbscan(vectors: &[&[f32]], params: Params) -> Vec<i32> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }
    if n < params.min_cluster_size || n == 1 {
        return vec![NOISE; n];
    }

    let space = Space::new(vectors, params.metric, params.min_samples);
    let mst = prim_mst(&space);
    let hierarchy = single_linkage(n, mst);
    let tree = condense(n, &hierarchy, params.min_cluster_size);
    let selected = select_clusters(n, &tree, params.allow_single_cluster);
    label_points(n, &tree, &selected)
}

/// Points plus their core distances. Pairwise distances are computed on
/// demand, so memory stays linear in the number of points while time is
/// quadratic.
struct Space<'a> {
    vectors: &'a [&'a [f32]],
    metric: Metric,
    core: Vec<f64>,
}

impl<'a> Space<'a> {
    fn new(vectors: &'a [&'a [f32]], metric: Metric, min_samples: usize) -> Self {
        let mut space = Self {
            vectors,
            metric,
            core: Vec::new(),
        };
        space.core = space.core_distances(min_samples);
        space
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 0.0;
        }
        self.metric.distance(self.vectors[a], self.vectors[b]) as f64
    }

    /// Distance to the k-th nearest neighbor, counting the point itself.
    fn core_distances(&self, min_samples: usize) -> Vec<f64> {
        let n = self.len();
        let k = (min_samples.max(1) - 1).min(n - 1);
        let mut row = vec![0.0f64; n];
        (0..n)
            .map(|i| {
                for (j, d) in row.iter_mut().enumerate() {
                    *d = self.distance(i, j);
                }
                *row.select_nth_unstable_by(k, f64::total_cmp).1
            })
            .collect()
    }

    fn mutual_reachability(&self, a: usize, b: usize) -> f64 {
        self.distance(a, b).max(self.core[a]).max(self.core[b])
    }
}

/// Dense Prim's algorithm; returns n-1 edges sorted by weight.
fn prim_mst(space: &Space<'_>) -> Vec<(usize, usize, f64)> {
    let n = space.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0usize;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let w = space.mutual_reachability(current, j);
            if w < best[j] {
                best[j] = w;
                from[j] = current;
            }
        }
        let mut next = usize::MAX;
        let mut next_w = f64::INFINITY;
        for j in 0..n {
            if !in_tree[j] && (next == usize::MAX || best[j] < next_w) {
                next = j;
                next_w = best[j];
            }
        }
        in_tree[next] = true;
        edges.push((from[next], next, next_w));
        current = next;
    }

    // Stable sort keeps ties in discovery order, which is deterministic.
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Node `n + t` is created by the t-th merge.
fn single_linkage(n: usize, mst: Vec<(usize, usize, f64)>) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(n - 1);

    for (t, (a, b, w)) in mst.into_iter().enumerate() {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let node = n + t;
        size[node] = size[ra] + size[rb];
        parent[ra] = node;
        parent[rb] = node;
        merges.push(Merge {
            left: ra,
            right: rb,
            distance: w,
            size: size[node],
        });
    }
    merges
}

fn node_size(n: usize, hierarchy: &[Merge], node: usize) -> usize {
    if node < n { 1 } else { hierarchy[node - n].size }
}

fn leaves(n: usize, hierarchy: &[Merge], node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(x) = stack.pop() {
        if x < n {
            out.push(x);
        } else {
            let m = hierarchy[x - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    out
}

fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(1e-12)
}

/// Collapses the dendrogram: splits that shed fewer than
/// `min_cluster_size` points are treated as points falling out of the
/// parent cluster rather than as new clusters.
fn condense(n: usize, hierarchy: &[Merge], min_cluster_size: usize) -> Vec<Condensed> {
    let root = 2 * n - 2;
    let mut relabel = vec![0usize; 2 * n - 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut tree = Vec::new();

    let mut queue = std::collections::VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if node < n {
            continue;
        }
        let m = hierarchy[node - n];
        let lambda = lambda_of(m.distance);
        let parent = relabel[node];
        let left_size = node_size(n, hierarchy, m.left);
        let right_size = node_size(n, hierarchy, m.right);

        let left_big = left_size >= min_cluster_size;
        let right_big = right_size >= min_cluster_size;

        match (left_big, right_big) {
            (true, true) => {
                for (child, size) in [(m.left, left_size), (m.right, right_size)] {
                    relabel[child] = next_label;
                    tree.push(Condensed {
                        parent,
                        child: next_label,
                        lambda,
                        size,
                    });
                    next_label += 1;
                    queue.push_back(child);
                }
            }
            (false, false) => {
                for child in [m.left, m.right] {
                    for p in leaves(n, hierarchy, child) {
                        tree.push(Condensed {
                            parent,
                            child: p,
                            lambda,
                            size: 1,
                        });
                    }
                }
            }
            (true, false) => {
                relabel[m.left] = parent;
                queue.push_back(m.left);
                for p in leaves(n, hierarchy, m.right) {
                    tree.push(Condensed {
                    parent,
                    child: p,
                    lambda,
                    size: 1,
                });
                }
            }
            (false, true) => {
                relabel[m.right] = parent;
                queue.push_back(m.right);
                for p in leaves(n, hierarchy, m.left) {
                    tree.push(Condensed {
                    parent,
                    child: p,
                    lambda,
                    size: 1,
                });
                }
            }
        }
    }
    tree
}

/// Excess-of-mass selection. Returns the chosen condensed cluster labels.
fn select_clusters(n: usize, tree: &[Condensed], allow_single_cluster: bool) -> Vec<usize> {
    let max_label = tree.iter().map(|e| e.parent.max(e.child)).max().unwrap_or(n);
    let slots = max_label + 1 - n;

    let mut birth = vec![0.0f64; slots];
    for e in tree.iter().filter(|e| e.child >= n) {
        birth[e.child - n] = e.lambda;
    }

    let mut stability = vec![0.0f64; slots];
    for e in tree {
        stability[e.parent - n] += (e.lambda - birth[e.parent - n]) * e.size as f64;
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots];
    for e in tree.iter().filter(|e| e.child >= n) {
        children[e.parent - n].push(e.child);
    }

    let root = n;
    let mut is_cluster = vec![true; slots];
    // Children always carry larger labels than their parents.
    for node in (n..=max_label).rev() {
        if node == root && !allow_single_cluster {
            continue;
        }
        let child_stability: f64 = children[node - n].iter().map(|&c| stability[c - n]).sum();
        if !children[node - n].is_empty() && child_stability > stability[node - n] {
            is_cluster[node - n] = false;
            stability[node - n] = child_stability;
        } else {
            let mut stack = children[node - n].clone();
            while let Some(c) = stack.pop() {
                is_cluster[c - n] = false;
                stack.extend(children[c - n].iter().copied());
            }
        }
    }
    if !allow_single_cluster {
        is_cluster[0] = false;
    }

    (n..=max_label).filter(|&c| is_cluster[c - n]).collect()
}

fn label_points(n: usize, tree: &[Condensed], selected: &[usize]) -> Vec<i32> {
    let mut labels = vec![NOISE; n];
    if tree.is_empty() {
        return labels;
    }
    let max_label = tree.iter().map(|e| e.parent.max(e.child)).max().unwrap_or(n);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); max_label + 1 - n];
    for e in tree {
        children[e.parent - n].push(e.child);
    }

    for (i, &cluster) in selected.iter().enumerate() {
        let label = (i + 1) as i32;
        let mut stack = vec![cluster];
        while let Some(c) = stack.pop() {
            for &child in &children[c - n] {
                if child < n {
                    labels[child] = label;
                } else {
                    stack.push(child);
                }
            }
        }
    }
    labels
}
