use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How the distance between two clusters is derived from member distances.
///
/// Only `Single` guarantees that no two resulting clusters contain members
/// within the threshold of each other, which is what makes re-running
/// deduplication on its own output a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    Single,
    Complete,
    Average,
}

/// Agglomerative clustering over a precomputed distance matrix.
///
/// Starts from singletons and repeatedly merges the closest pair of clusters
/// while their linkage distance is `<= threshold`; no cluster count is fixed
/// in advance. Ties are broken by lowest index, so the result only depends on
/// the matrix. Returns one label per row, numbered in order of first
/// appearance.
pub fn agglomerative(distances: &Array2<f32>, threshold: f32, linkage: Linkage) -> Vec<usize> {
    let n = distances.nrows();
    if n == 0 {
        return Vec::new();
    }

    let mut d: Vec<Vec<f32>> = distances
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|&x| if x.is_nan() { f32::INFINITY } else { x }).collect())
        .collect();
    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut parent: Vec<usize> = (0..n).collect();
    let mut nearest: Vec<Option<(f32, usize)>> = (0..n).map(|i| nearest_of(&d, &active, i)).collect();

    loop {
        // Closest active pair; lowest index wins ties.
        let mut best: Option<(f32, usize, usize)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            if let Some((dist, j)) = nearest[i] {
                if best.is_none_or(|(best_dist, _, _)| dist < best_dist) {
                    best = Some((dist, i, j));
                }
            }
        }

        let Some((dist, i, j)) = best else { break };
        if dist > threshold {
            break;
        }

        let (keep, gone) = (i.min(j), i.max(j));
        for k in 0..n {
            if !active[k] || k == keep || k == gone {
                continue;
            }
            let merged = match linkage {
                Linkage::Single => d[keep][k].min(d[gone][k]),
                Linkage::Complete => d[keep][k].max(d[gone][k]),
                Linkage::Average => {
                    let (a, b) = (size[keep] as f32, size[gone] as f32);
                    (a * d[keep][k] + b * d[gone][k]) / (a + b)
                }
            };
            d[keep][k] = merged;
            d[k][keep] = merged;
        }

        active[gone] = false;
        size[keep] += size[gone];
        parent[gone] = keep;
        nearest[gone] = None;

        for k in 0..n {
            if !active[k] {
                continue;
            }
            let stale = k == keep
                || matches!(nearest[k], Some((_, target)) if target == keep || target == gone);
            if stale {
                nearest[k] = nearest_of(&d, &active, k);
            } else if let Some((current, target)) = nearest[k] {
                let candidate = d[k][keep];
                if candidate < current || (candidate == current && keep < target) {
                    nearest[k] = Some((candidate, keep));
                }
            }
        }
    }

    let mut labels = vec![0; n];
    let mut label_of_root: Vec<Option<usize>> = vec![None; n];
    let mut next_label = 0;
    for point in 0..n {
        let root = find_root(&parent, point);
        let label = *label_of_root[root].get_or_insert_with(|| {
            next_label += 1;
            next_label - 1
        });
        labels[point] = label;
    }
    labels
}

fn nearest_of(d: &[Vec<f32>], active: &[bool], i: usize) -> Option<(f32, usize)> {
    let mut best: Option<(f32, usize)> = None;
    for (j, &dist) in d[i].iter().enumerate() {
        if j == i || !active[j] {
            continue;
        }
        if best.is_none_or(|(best_dist, _)| dist < best_dist) {
            best = Some((dist, j));
        }
    }
    best
}

fn find_root(parent: &[usize], mut point: usize) -> usize {
    while parent[point] != point {
        point = parent[point];
    }
    point
}

/// Group row indices by label, in label order.
pub fn groups(labels: &[usize]) -> Vec<Vec<usize>> {
    let count = labels.iter().max().map_or(0, |max| max + 1);
    let mut groups = vec![Vec::new(); count];
    for (point, &label) in labels.iter().enumerate() {
        groups[label].push(point);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Distance matrix for points on a line.
    fn line(points: &[f32]) -> Array2<f32> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| (points[i] - points[j]).abs())
    }

    #[test]
    fn test_threshold_separates_groups() {
        let labels = agglomerative(&line(&[0.0, 0.1, 0.2, 5.0, 5.1]), 0.5, Linkage::Single);
        assert_eq!(labels, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_zero_threshold_keeps_distinct_points_apart() {
        let labels = agglomerative(&line(&[0.0, 0.1, 0.2]), 0.0, Linkage::Single);
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_linkage_chains() {
        // Neighbours are 0.4 apart; the ends are 1.2 apart.
        let points = [0.0, 0.4, 0.8, 1.2];
        assert_eq!(agglomerative(&line(&points), 0.5, Linkage::Single), vec![0, 0, 0, 0]);

        let complete = agglomerative(&line(&points), 0.5, Linkage::Complete);
        assert_eq!(groups(&complete).len(), 2);
    }

    #[test]
    fn test_average_linkage() {
        let labels = agglomerative(&line(&[0.0, 0.2, 0.9]), 0.6, Linkage::Average);
        // {0, 0.2} merge at 0.2; average distance to 0.9 is 0.8 > 0.6.
        assert_eq!(labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_deterministic_labels() {
        let m = line(&[3.0, 0.0, 3.05, 0.02, 9.0]);
        let first = agglomerative(&m, 0.1, Linkage::Single);
        let second = agglomerative(&m, 0.1, Linkage::Single);
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 1, 0, 1, 2]);
    }

    #[test]
    fn test_empty_and_singleton() {
        assert!(agglomerative(&Array2::zeros((0, 0)), 0.5, Linkage::Single).is_empty());
        assert_eq!(agglomerative(&Array2::zeros((1, 1)), 0.5, Linkage::Single), vec![0]);
    }

    #[test]
    fn test_groups() {
        assert_eq!(groups(&[0, 1, 0, 2]), vec![vec![0, 2], vec![1], vec![3]]);
    }
}
