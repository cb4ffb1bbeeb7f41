//! Bivariate highest posterior density regions.
//!
//! # Overview
//! A two-component attribute (e.g. a latitude/longitude location) is
//! summarized by the region holding a given fraction of the joint posterior
//! mass. The region may be disjoint; each closed path is one mode.
//!
//! [`KdeContourEstimator`] is the default [`ContourEstimator`]:
//! 1. Gaussian kernel density on a regular grid, one normal-reference
//!    bandwidth per axis
//! 2. density level such that the grid cells above it carry `mass` of the total
//! 3. marching squares on the zero-padded grid, so every contour closes

use crate::stats;
use std::collections::HashMap;

/// One closed polygon; the last point connects back to the first.
#[derive(Clone, Debug, PartialEq)]
pub struct ContourPath {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl ContourPath {
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Even-odd rule point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.xs.len();
        let mut inside = false;
        let mut j = n.wrapping_sub(1);
        for i in 0..n {
            let (xi, yi, xj, yj) = (self.xs[i], self.ys[i], self.xs[j], self.ys[j]);
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// A 2D HPD region: its mass and its disjoint pieces.
#[derive(Clone, Debug, PartialEq)]
pub struct Hpd2D {
    pub mass: f64,
    pub paths: Vec<ContourPath>,
}

impl Hpd2D {
    /// Number of disjoint high-density regions.
    pub fn modality(&self) -> usize {
        self.paths.len()
    }
}

/// Computes closed contour paths enclosing `mass` of the joint density of `(xs, ys)`.
pub trait ContourEstimator {
    fn compute_contours(&self, xs: &[f64], ys: &[f64], mass: f64) -> Vec<ContourPath>;
}

#[derive(Clone, Copy, Debug)]
pub struct KdeContourEstimator {
    /// Grid points per axis, before padding.
    pub grid_size: usize,
}

impl Default for KdeContourEstimator {
    fn default() -> Self {
        KdeContourEstimator { grid_size: 50 }
    }
}

/// Normal-reference bandwidth: `1.06 * min(sd, IQR/1.34) * n^(-1/5)`.
fn bandwidth(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let m = stats::mean(values);
    let sd = (values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0).max(1.0)).sqrt();
    let idx = stats::sorted_indices(values);
    let q = |p: f64| values[idx[((p * (n - 1.0)).round() as usize).min(values.len() - 1)]];
    let iqr = q(0.75) - q(0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    let h = 1.06 * spread * n.powf(-0.2);
    if h > 0.0 { h } else { 1e-6 }
}

/// Grid edge identifier: horizontal edges join (i,j)-(i+1,j), vertical ones (i,j)-(i,j+1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Edge {
    H(usize, usize),
    V(usize, usize),
}

struct DensityGrid {
    values: Vec<Vec<f64>>,
    x0: f64,
    y0: f64,
    dx: f64,
    dy: f64,
}

impl DensityGrid {
    /// Padded grid: indices 0 and `size-1` are a ring of zero density.
    fn estimate(xs: &[f64], ys: &[f64], grid_size: usize) -> Self {
        let (hx, hy) = (bandwidth(xs), bandwidth(ys));
        let (xmin, xmax) = stats::range(xs);
        let (ymin, ymax) = stats::range(ys);
        let g = grid_size.max(3);
        let x0 = xmin - 3.0 * hx;
        let y0 = ymin - 3.0 * hy;
        let dx = (xmax + 3.0 * hx - x0) / (g - 1) as f64;
        let dy = (ymax + 3.0 * hy - y0) / (g - 1) as f64;

        let kernel = |origin: f64, step: f64, h: f64, data: &[f64]| -> Vec<Vec<f64>> {
            (0..g)
                .map(|i| {
                    let c = origin + i as f64 * step;
                    data.iter().map(|v| (-0.5 * ((c - v) / h).powi(2)).exp()).collect()
                })
                .collect()
        };
        let kx = kernel(x0, dx, hx, xs);
        let ky = kernel(y0, dy, hy, ys);

        let mut values = vec![vec![0.0; g + 2]; g + 2];
        for i in 0..g {
            for j in 0..g {
                values[i + 1][j + 1] = kx[i].iter().zip(&ky[j]).map(|(a, b)| a * b).sum();
            }
        }
        // Padded index p maps to grid coordinate p - 1.
        DensityGrid { values, x0: x0 - dx, y0: y0 - dy, dx, dy }
    }

    fn size(&self) -> usize {
        self.values.len()
    }

    /// Density such that cells at or above it hold `mass` of the grid total.
    fn level_for_mass(&self, mass: f64) -> f64 {
        let mut all: Vec<f64> = self.values.iter().flatten().copied().collect();
        all.sort_by(|a, b| b.total_cmp(a));
        let total: f64 = all.iter().sum();
        let mut acc = 0.0;
        for &d in &all {
            acc += d;
            if acc >= mass * total {
                return d;
            }
        }
        all.last().copied().unwrap_or(0.0)
    }

    fn point(&self, edge: Edge, level: f64) -> (f64, f64) {
        let (i, j, i2, j2) = match edge {
            Edge::H(i, j) => (i, j, i + 1, j),
            Edge::V(i, j) => (i, j, i, j + 1),
        };
        let (a, b) = (self.values[i][j], self.values[i2][j2]);
        let t = if b != a { (level - a) / (b - a) } else { 0.5 };
        let x = self.x0 + (i as f64 + t * (i2 - i) as f64) * self.dx;
        let y = self.y0 + (j as f64 + t * (j2 - j) as f64) * self.dy;
        (x, y)
    }

    /// Marching squares; saddle cells are split using the cell-centre average.
    fn segments(&self, level: f64) -> Vec<(Edge, Edge)> {
        let m = self.size();
        let inside = |i: usize, j: usize| self.values[i][j] >= level;
        let mut segments = Vec::new();
        for i in 0..m - 1 {
            for j in 0..m - 1 {
                let c = [inside(i, j), inside(i + 1, j), inside(i + 1, j + 1), inside(i, j + 1)];
                let bottom = Edge::H(i, j);
                let right = Edge::V(i + 1, j);
                let top = Edge::H(i, j + 1);
                let left = Edge::V(i, j);

                let crossed: Vec<Edge> = [
                    (c[0] != c[1], bottom),
                    (c[1] != c[2], right),
                    (c[3] != c[2], top),
                    (c[0] != c[3], left),
                ]
                .into_iter()
                .filter_map(|(hit, e)| hit.then_some(e))
                .collect();

                match crossed.len() {
                    2 => segments.push((crossed[0], crossed[1])),
                    4 => {
                        let centre = (self.values[i][j]
                            + self.values[i + 1][j]
                            + self.values[i + 1][j + 1]
                            + self.values[i][j + 1])
                            / 4.0
                            >= level;
                        // c[0] && c[2] inside, or c[1] && c[3] inside
                        if c[0] == centre {
                            segments.push((bottom, right));
                            segments.push((top, left));
                        } else {
                            segments.push((bottom, left));
                            segments.push((right, top));
                        }
                    }
                    _ => {}
                }
            }
        }
        segments
    }
}

/// Chains segments sharing an edge into closed paths.
fn join_segments(grid: &DensityGrid, level: f64, segments: &[(Edge, Edge)]) -> Vec<ContourPath> {
    let mut by_edge: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (k, (a, b)) in segments.iter().enumerate() {
        by_edge.entry(*a).or_default().push(k);
        by_edge.entry(*b).or_default().push(k);
    }

    let mut used = vec![false; segments.len()];
    let mut paths = Vec::new();
    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (first, mut current) = segments[start];
        let mut points = vec![grid.point(first, level), grid.point(current, level)];

        while let Some(&next) = by_edge
            .get(&current)
            .and_then(|ks| ks.iter().find(|&&k| !used[k]))
        {
            used[next] = true;
            let (a, b) = segments[next];
            current = if a == current { b } else { a };
            if current == first {
                break;
            }
            points.push(grid.point(current, level));
        }

        if points.len() >= 3 {
            let (xs, ys) = points.into_iter().unzip();
            paths.push(ContourPath { xs, ys });
        }
    }
    paths
}

impl ContourEstimator for KdeContourEstimator {
    fn compute_contours(&self, xs: &[f64], ys: &[f64], mass: f64) -> Vec<ContourPath> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Vec::new();
        }
        let grid = DensityGrid::estimate(xs, ys, self.grid_size);
        let level = grid.level_for_mass(mass);
        if level <= 0.0 {
            return Vec::new();
        }
        let segments = grid.segments(level);
        join_segments(&grid, level, &segments)
    }
}
