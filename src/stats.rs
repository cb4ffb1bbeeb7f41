//! Summary statistics over posterior samples.
//!
//! All functions take the raw samples in posterior order and
//! sort through an index permutation, so the input is never reordered.

use itertools::Itertools;

/// A one-dimensional highest posterior density interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HpdInterval {
    pub lower: f64,
    pub upper: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Indices of `values` in ascending value order.
pub fn sorted_indices(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    indices
}

/// Middle value; the average of the two middle values for an even count.
pub fn median(values: &[f64]) -> f64 {
    let indices = sorted_indices(values);
    let pos = values.len() / 2;
    if values.len() % 2 == 1 {
        values[indices[pos]]
    } else {
        (values[indices[pos - 1]] + values[indices[pos]]) / 2.0
    }
}

pub fn range(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

/// True when the samples are not all equal.
pub fn varies(values: &[f64]) -> bool {
    let (lo, hi) = range(values);
    lo < hi
}

/// Narrowest window holding `round(mass * n)` consecutive sorted samples.
///
/// # Algorithm
/// ```text
/// sorted: x0 x1 x2 x3 x4 ... x(n-1)
///         [--- w ---]                 width = x(w-1) - x0
///            [--- w ---]              width = x(w)   - x1
///                          ...
/// ```
/// The first window with the smallest width wins. The interval assumes a
/// unimodal distribution: for multimodal samples it is valid but can span
/// a low-density gap.
pub fn hpd_interval(mass: f64, values: &[f64]) -> HpdInterval {
    let n = values.len();
    if n == 0 {
        return HpdInterval { lower: f64::NAN, upper: f64::NAN };
    }
    let indices = sorted_indices(values);
    let w = ((mass * n as f64).round() as usize).clamp(1, n);

    let mut best = 0;
    let mut best_width = f64::INFINITY;
    for i in 0..=(n - w) {
        let width = (values[indices[i + w - 1]] - values[indices[i]]).abs();
        if width < best_width {
            best_width = width;
            best = i;
        }
    }
    HpdInterval {
        lower: values[indices[best]],
        upper: values[indices[best + w - 1]],
    }
}

/// Counts of discrete values in first-observed order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrequencyTable {
    entries: Vec<(String, usize)>,
    total: usize,
}

impl FrequencyTable {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = FrequencyTable::default();
        for label in labels {
            table.add(label.as_ref());
        }
        table
    }

    pub fn add(&mut self, label: &str) {
        self.total += 1;
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((label.to_string(), 1)),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    /// The most frequent value and its probability.
    ///
    /// Tied values are joined with `+` into one label, and the probability is
    /// `max_count / total` multiplied by the number of tied values, so
    /// `{X, X, Y, Y}` yields `("X+Y", 1.0)`.
    pub fn mode(&self) -> Option<(String, f64)> {
        let max = self.entries.iter().map(|(_, c)| *c).max()?;
        let tied: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, c)| *c == max)
            .map(|(l, _)| l.as_str())
            .collect();
        let prob = max as f64 / self.total as f64 * tied.len() as f64;
        Some((tied.into_iter().join("+"), prob))
    }

    /// Every observed value with its relative frequency.
    pub fn probabilities(&self) -> (Vec<String>, Vec<f64>) {
        self.entries
            .iter()
            .map(|(l, c)| (l.clone(), *c as f64 / self.total as f64))
            .unzip()
    }
}
