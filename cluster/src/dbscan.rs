use std::collections::VecDeque;

use crate::metric::Metric;

pub(crate) const NOISE: i32 = -1;

/// Runs the DBSCAN clustering algorithm.
///
/// # Parameters
/// - `vectors`: the data points
/// - `eps`: maximum distance under `metric` for two points to be neighbors
/// - `min_pts`: minimum neighborhood size (including the point itself)
///   for a point to be a core point
///
/// # Returns
/// Cluster labels for each vector. Label -1 means noise (unassigned).
/// Positive labels (1, 2, ...) identify clusters in discovery order.
///
/// Points are visited in input order, so a fixed input always yields
/// the same labels.
pub(crate) fn dbscan(vectors: &[&[f32]], eps: f32, min_pts: usize, metric: Metric) -> Vec<i32> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }

    const UNDEFINED: i32 = 0;

    let mut labels = vec![UNDEFINED; n];
    let mut cluster_id: i32 = 0;

    for i in 0..n {
        if labels[i] != UNDEFINED {
            continue;
        }

        let neighbors = range_query(vectors, i, eps, metric);
        if neighbors.len() < min_pts {
            labels[i] = NOISE;
            continue;
        }

        // Start a new cluster.
        cluster_id += 1;
        labels[i] = cluster_id;

        // Seed set: neighbors minus point i.
        let mut seed: VecDeque<usize> = neighbors.into_iter().filter(|&j| j != i).collect();

        while let Some(q) = seed.pop_front() {
            if labels[q] == NOISE {
                // Border point: reachable but not dense.
                labels[q] = cluster_id;
            }
            if labels[q] != UNDEFINED {
                continue;
            }
            labels[q] = cluster_id;

            let q_neighbors = range_query(vectors, q, eps, metric);
            if q_neighbors.len() >= min_pts {
                seed.extend(q_neighbors);
            }
        }
    }

    labels
}

/// Returns indices of all vectors within eps of vectors[idx].
fn range_query(vectors: &[&[f32]], idx: usize, eps: f32, metric: Metric) -> Vec<usize> {
    let q = vectors[idx];
    vectors
        .iter()
        .enumerate()
        .filter(|(_, v)| metric.distance(q, v) <= eps)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::l2_norm;

    fn normed(points: &[[f32; 3]]) -> Vec<Vec<f32>> {
        points
            .iter()
            .map(|p| {
                let mut v = p.to_vec();
                l2_norm(&mut v);
                v
            })
            .collect()
    }

    #[test]
    fn dbscan_basic_two_clusters() {
        let all = normed(&[
            [1.0, 0.0, 0.0],
            [0.99, 0.1, 0.0],
            [0.98, 0.15, 0.0],
            [0.0, 1.0, 0.0],
            [0.1, 0.99, 0.0],
            [0.15, 0.98, 0.0],
        ]);

        let refs: Vec<&[f32]> = all.iter().map(|v| v.as_slice()).collect();
        let labels = dbscan(&refs, 0.3, 2, Metric::Cosine);

        // First 3 should be one cluster, last 3 another.
        assert_eq!(labels.len(), 6);
        assert!(labels[0] > 0);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert!(labels[3] > 0);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn dbscan_euclidean_with_outlier() {
        let pts: Vec<Vec<f32>> = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
        ];
        let refs: Vec<&[f32]> = pts.iter().map(|v| v.as_slice()).collect();
        let labels = dbscan(&refs, 0.5, 2, Metric::Euclidean);
        assert_eq!(labels, vec![1, 1, 1, NOISE]);
    }

    #[test]
    fn dbscan_noise() {
        // Single point cannot form a cluster with min_pts=2.
        let vectors: Vec<Vec<f32>> = vec![vec![1.0, 0.0, 0.0]];
        let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
        let labels = dbscan(&refs, 0.1, 2, Metric::Cosine);
        assert_eq!(labels, vec![NOISE]);
    }

    #[test]
    fn dbscan_noise_becomes_border() {
        // Point 0 is visited first and has only one neighbor, so it is marked
        // noise; it is later reached from the dense core and becomes border.
        let pts: Vec<Vec<f32>> = vec![
            vec![0.0],
            vec![0.4],
            vec![0.8],
            vec![0.9],
        ];
        let refs: Vec<&[f32]> = pts.iter().map(|v| v.as_slice()).collect();
        let labels = dbscan(&refs, 0.45, 3, Metric::Euclidean);
        assert_eq!(labels, vec![1, 1, 1, 1]);
    }

    #[test]
    fn dbscan_empty() {
        let labels = dbscan(&[], 0.1, 2, Metric::Euclidean);
        assert!(labels.is_empty());
    }
}
