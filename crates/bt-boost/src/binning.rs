//! Feature quantisation into histogram bins.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

/// Maps raw feature values of one column to bin indices.
///
/// `upper_bounds` is strictly increasing and always ends with `+inf`, so a
/// value `v` lands in the first bin whose upper bound is `>= v`. NaN maps to
/// bin 0, which keeps it on the left side of every split.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BinMapper {
    upper_bounds: Vec<f64>,
}

impl BinMapper {
    pub(crate) fn from_column(values: ArrayView1<'_, f64>, max_bin: usize) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self {
                upper_bounds: vec![f64::INFINITY],
            };
        }
        sorted.sort_by(f64::total_cmp);

        let mut distinct = sorted.clone();
        distinct.dedup();

        let mut upper_bounds: Vec<f64> = if distinct.len() <= max_bin {
            distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
        } else {
            let n = sorted.len();
            let mut cuts: Vec<f64> = (1..max_bin)
                .map(|k| sorted[(k * n / max_bin).min(n - 1)])
                .collect();
            cuts.dedup();
            // The largest value must stay in the final +inf bin.
            if cuts.last() == sorted.last() {
                cuts.pop();
            }
            cuts
        };
        upper_bounds.push(f64::INFINITY);

        Self { upper_bounds }
    }

    pub(crate) fn n_bins(&self) -> usize {
        self.upper_bounds.len()
    }

    pub(crate) fn bin(&self, value: f64) -> u8 {
        if value.is_nan() {
            return 0;
        }
        self.upper_bounds.partition_point(|&u| u < value) as u8
    }

    /// Raw-value threshold equivalent to "bin <= `bin`".
    pub(crate) fn threshold(&self, bin: usize) -> f64 {
        self.upper_bounds[bin]
    }
}

/// Column-major binned copy of a feature matrix.
#[derive(Debug, Clone)]
pub(crate) struct BinnedMatrix {
    n_rows: usize,
    columns: Vec<Vec<u8>>,
    mappers: Vec<BinMapper>,
}

impl BinnedMatrix {
    /// Build bin mappers from `features` and quantise it.
    pub(crate) fn fit(features: ArrayView2<'_, f64>, max_bin: usize) -> Self {
        let mappers: Vec<BinMapper> = (0..features.ncols())
            .into_par_iter()
            .map(|j| BinMapper::from_column(features.column(j), max_bin))
            .collect();
        let columns = Self::quantise(features, &mappers);
        Self {
            n_rows: features.nrows(),
            columns,
            mappers,
        }
    }

    fn quantise(features: ArrayView2<'_, f64>, mappers: &[BinMapper]) -> Vec<Vec<u8>> {
        mappers
            .par_iter()
            .enumerate()
            .map(|(j, mapper)| features.column(j).iter().map(|&v| mapper.bin(v)).collect())
            .collect()
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub(crate) fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn column(&self, feature: usize) -> &[u8] {
        &self.columns[feature]
    }

    pub(crate) fn mapper(&self, feature: usize) -> &BinMapper {
        &self.mappers[feature]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn few_distinct_values_get_midpoint_bounds() {
        let column = array![3.0, 1.0, 2.0, 1.0, 3.0];
        let mapper = BinMapper::from_column(column.view(), 255);
        assert_eq!(mapper.n_bins(), 3);
        assert_eq!(mapper.bin(1.0), 0);
        assert_eq!(mapper.bin(2.0), 1);
        assert_eq!(mapper.bin(3.0), 2);
        assert_eq!(mapper.threshold(0), 1.5);
        assert_eq!(mapper.bin(f64::NAN), 0);
        assert_eq!(mapper.bin(100.0), 2);
    }

    #[test]
    fn many_distinct_values_are_capped() {
        let column = ndarray::Array1::from_iter((0..10_000).map(|i| i as f64));
        let mapper = BinMapper::from_column(column.view(), 16);
        assert!(mapper.n_bins() <= 16);
        assert!(mapper.n_bins() > 8);
        // Bins are monotone in the raw value.
        let bins: Vec<u8> = column.iter().map(|&v| mapper.bin(v)).collect();
        assert!(bins.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*bins.last().unwrap() as usize, mapper.n_bins() - 1);
    }

    #[test]
    fn threshold_matches_bin_order() {
        let column = array![0.1, 0.4, 0.4, 0.9, 1.7, 2.2];
        let mapper = BinMapper::from_column(column.view(), 255);
        for b in 0..mapper.n_bins() {
            let t = mapper.threshold(b);
            for &v in column.iter() {
                assert_eq!(mapper.bin(v) as usize <= b, v <= t);
            }
        }
    }

    #[test]
    fn binned_matrix_is_column_major() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let binned = BinnedMatrix::fit(x.view(), 255);
        assert_eq!(binned.n_rows(), 3);
        assert_eq!(binned.n_features(), 2);
        assert_eq!(binned.column(1), &[0, 1, 2]);
    }
}
