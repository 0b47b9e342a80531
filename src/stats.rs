// stats.rs
//
// Nested-model F-test and the p-value / z-score transforms shared with the
// permutation correction. Degenerate inputs come back as NaN, never as errors.

use crate::model::ModelFit;
use statrs::distribution::{ContinuousCDF, FisherSnedecor, Normal};

/// Smallest p-value ever reported.
pub const P_VALUE_FLOOR: f64 = 1e-16;

/// F-statistic comparing a null fit (`rss1`, `df1`) against a nested
/// alternative (`rss2`, `df2`) over `n` samples.
///
/// NaN when `df1 >= df2` or `df2 >= n`.
pub fn calc_f_value(rss1: f64, rss2: f64, df1: usize, df2: usize, n: usize) -> f64 {
    if df1 >= df2 || df2 >= n {
        return f64::NAN;
    }
    ((rss1 - rss2) / (df2 - df1) as f64) / (rss2 / (n - df2) as f64)
}

/// Upper-tail probability of `f_value` under F(df2 - df1, n - df2), floored
/// at [`P_VALUE_FLOOR`]. NaN in, NaN out.
pub fn get_p_value(f_value: f64, df1: usize, df2: usize, n: usize) -> f64 {
    if f_value.is_nan() || df1 >= df2 || df2 >= n {
        return f64::NAN;
    }
    let p_value = if f_value == f64::INFINITY {
        0.0
    } else if f_value <= 0.0 {
        1.0
    } else {
        match FisherSnedecor::new((df2 - df1) as f64, (n - df2) as f64) {
            Ok(dist) => 1.0 - dist.cdf(f_value),
            Err(_) => return f64::NAN,
        }
    };
    p_value.max(P_VALUE_FLOOR)
}

/// Inverse standard-normal CDF of `1 - p_value`. NaN unless `p_value` lies
/// strictly inside (0, 1).
pub fn get_z_score(p_value: f64) -> f64 {
    if !(p_value > 0.0 && p_value < 1.0) {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(norm) => norm.inverse_cdf(1.0 - p_value),
        Err(_) => f64::NAN,
    }
}

/// Inverse of [`get_z_score`].
pub fn z_score_to_p_value(z_score: f64) -> f64 {
    if z_score.is_nan() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(norm) => 1.0 - norm.cdf(z_score),
        Err(_) => f64::NAN,
    }
}

/// Result of comparing two nested fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub f_value: f64,
    pub p_value: f64,
    pub z_score: f64,
}

/// Full F-test between a null fit and a nested alternative fit.
///
/// Degrees of freedom are regressors + 1 for both fits. An alternative that
/// adds no rank over the null is scored with the null's df, which makes the
/// test NaN.
pub fn compare_models(null: &ModelFit, alt: &ModelFit) -> Comparison {
    let n = alt.n;
    let alt_df = if alt.rank > null.rank { alt.df } else { null.df };
    let f_value = calc_f_value(null.rss, alt.rss, null.df, alt_df, n);
    let p_value = get_p_value(f_value, null.df, alt_df, n);
    let z_score = get_z_score(p_value);
    Comparison {
        f_value,
        p_value,
        z_score,
    }
}

/// Empirical p-value from the number of permutations that beat the observed
/// statistic, clamped to `[1e-16, 1 - 1e-16]`.
pub fn calc_adj_p_value(rank: usize, n_permutations: usize) -> f64 {
    let adj = (rank + 1) as f64 / (n_permutations + 1) as f64;
    if adj >= 1.0 {
        1.0 - P_VALUE_FLOOR
    } else if adj < P_VALUE_FLOOR {
        P_VALUE_FLOOR
    } else {
        adj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn f_value_guards_degenerate_designs() {
        assert!(calc_f_value(10.0, 5.0, 3, 3, 20).is_nan());
        assert!(calc_f_value(10.0, 5.0, 4, 3, 20).is_nan());
        assert!(calc_f_value(10.0, 5.0, 2, 5, 5).is_nan());
        assert!(calc_f_value(10.0, 5.0, 2, 6, 5).is_nan());
    }

    #[test]
    fn f_value_is_finite_and_non_negative_for_nested_fits() {
        for &(rss1, rss2) in &[(10.0, 5.0), (3.0, 3.0), (1.0, 0.2), (100.0, 99.9)] {
            let f = calc_f_value(rss1, rss2, 2, 3, 12);
            assert!(f.is_finite());
            assert!(f >= 0.0);
        }
        // (10 - 5) / 1 / (5 / 9) = 9
        assert_relative_eq!(calc_f_value(10.0, 5.0, 2, 3, 12), 9.0, epsilon = 1e-12);
    }

    #[test]
    fn p_value_stays_in_range() {
        for &f in &[0.0, 1e-9, 0.5, 1.0, 4.0, 50.0, 1e6, 1e300, f64::INFINITY] {
            let p = get_p_value(f, 2, 3, 30);
            assert!(p >= P_VALUE_FLOOR, "p={} for f={}", p, f);
            assert!(p <= 1.0, "p={} for f={}", p, f);
        }
        assert_eq!(get_p_value(f64::INFINITY, 2, 3, 30), P_VALUE_FLOOR);
        assert!(get_p_value(f64::NAN, 2, 3, 30).is_nan());
    }

    #[test]
    fn p_value_matches_known_quantile() {
        // F(1, 10) upper 5% point is 4.9646
        let p = get_p_value(4.964603, 2, 3, 13);
        assert_relative_eq!(p, 0.05, epsilon = 1e-5);
    }

    #[test]
    fn z_score_rejects_boundaries() {
        assert!(get_z_score(0.0).is_nan());
        assert!(get_z_score(1.0).is_nan());
        assert!(get_z_score(-0.1).is_nan());
        assert!(get_z_score(f64::NAN).is_nan());
        assert_relative_eq!(get_z_score(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(get_z_score(0.025), 1.959964, epsilon = 1e-5);
    }

    #[test]
    fn z_score_round_trips_to_p_value() {
        for &p in &[1e-6, 0.001, 0.05, 0.3, 0.5, 0.9, 0.999] {
            let z = get_z_score(p);
            assert_relative_eq!(z_score_to_p_value(z), p, max_relative = 1e-6);
        }
    }

    #[test]
    fn adjusted_p_value_properties() {
        assert_eq!(calc_adj_p_value(0, 100), 1.0 / 101.0);
        assert_eq!(calc_adj_p_value(0, 9), 0.1);
        assert_eq!(calc_adj_p_value(100, 100), 1.0 - P_VALUE_FLOOR);
        assert_eq!(calc_adj_p_value(0, 0), 1.0 - P_VALUE_FLOOR);
        let mut last = 0.0;
        for rank in 0..=50 {
            let adj = calc_adj_p_value(rank, 50);
            assert!(adj >= last);
            assert!(adj >= 1.0 / 51.0);
            last = adj;
        }
    }

    #[test]
    fn equal_degrees_of_freedom_give_nan_z_score() {
        let null = ModelFit { df: 2, rank: 2, rss: 4.0, n: 10 };
        let alt = ModelFit { df: 2, rank: 2, rss: 4.0, n: 10 };
        let cmp = compare_models(&null, &alt);
        assert!(cmp.f_value.is_nan());
        assert!(cmp.z_score.is_nan());
    }

    #[test]
    fn alternative_without_extra_rank_is_degenerate() {
        let null = ModelFit { df: 2, rank: 2, rss: 4.0, n: 10 };
        let alt = ModelFit { df: 3, rank: 2, rss: 4.0, n: 10 };
        assert!(compare_models(&null, &alt).z_score.is_nan());

        // A rank-deficient null still tests with the declared df.
        let null = ModelFit { df: 2, rank: 1, rss: 4.0, n: 10 };
        let alt = ModelFit { df: 3, rank: 2, rss: 2.0, n: 10 };
        let cmp = compare_models(&null, &alt);
        // (4 - 2) / 1 / (2 / 7) = 7
        assert_relative_eq!(cmp.f_value, 7.0, epsilon = 1e-12);
        assert_eq!(cmp.p_value, get_p_value(7.0, 2, 3, 10));
    }
}
