//! Information-theoretic and statistical measures for a fitted model (C8).
//!
//! A stateless set of pure functions over result structs, the same shape as
//! the teacher's relational statistics module, generalized from cardinality/
//! selectivity estimation to entropy, degrees of freedom, likelihood ratio
//! and chi-squared testing.

use crate::error::RaError;
use crate::key::Key;
use crate::relation::Relation;
use crate::table::ContingencyTable;
use crate::variable::VariableList;

/// Floor applied to log arguments and chi-squared expected counts so no
/// computation divides by, or takes the log of, zero.
pub const PROB_MIN: f64 = 1e-36;

/// Shannon entropy of a normalized table, in bits. Cells at or below zero
/// contribute nothing.
pub fn entropy(table: &ContingencyTable) -> f64 {
    let mut h = 0.0;
    for tuple in table.entries() {
        if tuple.value > 0.0 {
            let p = tuple.value.max(PROB_MIN);
            h -= p * p.log2();
        }
    }
    h
}

/// Model entropy for a decomposable model via inclusion-exclusion over its
/// junction tree: `Σ H(clique) - Σ H(separator)`.
pub fn model_entropy_decomposable(cliques: &[ContingencyTable], separators: &[ContingencyTable]) -> f64 {
    let clique_h: f64 = cliques.iter().map(entropy).sum();
    let sep_h: f64 = separators.iter().map(entropy).sum();
    clique_h - sep_h
}

/// Model entropy for a non-decomposable (loopy) model: entropy of its
/// IPF-fit joint.
pub fn model_entropy_loopy(fitted_joint: &ContingencyTable) -> f64 {
    entropy(fitted_joint)
}

/// NC(M): the number of distinct states captured by the model's relations,
/// by inclusion-exclusion over pairwise (and higher-order) relation
/// intersections. `df(M) = NC(M) - 1` (ADR-4).
pub fn model_nc(relations: &[Relation], vl: &VariableList) -> Result<u64, RaError> {
    let n = relations.len();
    if n == 0 {
        return Ok(1);
    }
    if n > 20 {
        return Err(RaError::Computation(
            "model_nc: inclusion-exclusion over more than 20 relations is impractical".into(),
        ));
    }

    let mut total: i64 = 0;
    for mask in 1u32..(1u32 << n) {
        let mut intersection: Option<Relation> = None;
        let mut popcount = 0u32;
        for i in 0..n {
            if mask & (1 << i) != 0 {
                popcount += 1;
                intersection = Some(match intersection {
                    None => relations[i].clone(),
                    Some(acc) => acc.intersection(&relations[i]),
                });
            }
        }
        let nc = intersection.expect("mask is nonzero").nc(vl)? as i64;
        let sign = if popcount % 2 == 1 { 1 } else { -1 };
        total += sign * nc;
    }
    Ok(total.max(1) as u64)
}

/// Degrees of freedom of a model: `NC(M) - 1`.
pub fn model_df(relations: &[Relation], vl: &VariableList) -> Result<u64, RaError> {
    Ok(model_nc(relations, vl)?.saturating_sub(1))
}

/// `ΔDF = DF(model) - DF(saturated)`, the number of constraints the model
/// imposes relative to the saturated model (non-negative: the saturated
/// model always has the fewest degrees of freedom).
pub fn delta_df(model_df: u64, saturated_df: u64) -> u64 {
    model_df.saturating_sub(saturated_df)
}

/// Likelihood ratio statistic vs. the saturated model:
/// `LR = 2 N ln(2) (H_model - H_saturated)`.
pub fn likelihood_ratio(h_model: f64, h_saturated: f64, n: f64) -> f64 {
    2.0 * n * std::f64::consts::LN_2 * (h_model - h_saturated)
}

/// Pearson chi-squared statistic: `Σ (O - E)² / E` over the union of cells
/// present in either table, with `E` floored to [`PROB_MIN`].
pub fn pearson_chi2(observed_counts: &ContingencyTable, fitted: &ContingencyTable, n: f64) -> Result<f64, RaError> {
    let mut keys: Vec<Key> = observed_counts.entries().iter().map(|t| t.key.clone()).collect();
    keys.extend(fitted.entries().iter().map(|t| t.key.clone()));
    keys.sort();
    keys.dedup();

    let mut chi2 = 0.0;
    for key in keys {
        let observed = observed_counts.value_at(&key)?;
        let expected = (fitted.value_at(&key)? * n).max(PROB_MIN);
        chi2 += (observed - expected).powi(2) / expected;
    }
    Ok(chi2)
}

/// p-value (α): the chi-squared survival function at `statistic` with
/// `df` degrees of freedom. `1.0` when `df == 0`.
pub fn p_value(statistic: f64, df: u64) -> f64 {
    if df == 0 {
        return 1.0;
    }
    chi2_survival(statistic, df as f64)
}

/// Statistical power (β) at significance `alpha`, for a test with `df`
/// degrees of freedom and noncentrality parameter `noncentrality` (the LR
/// statistic under the alternative hypothesis).
pub fn power(noncentrality: f64, df: u64, alpha: f64) -> f64 {
    if df == 0 {
        return 0.0;
    }
    let df = df as f64;
    let critical = chi2_quantile(1.0 - alpha, df);
    1.0 - noncentral_chi2_cdf(critical, df, noncentrality)
}

/// AIC = LR + 2 · DF.
pub fn aic(lr: f64, df: u64) -> f64 {
    lr + 2.0 * df as f64
}

/// BIC = LR - ΔDF · ln(N).
pub fn bic(lr: f64, delta_df: u64, n: f64) -> f64 {
    lr - delta_df as f64 * n.ln()
}

// --- chi-squared numerics ------------------------------------------------
//
// No stats crate is pulled in for this; the survival function and its
// inverse are standard regularized-incomplete-gamma evaluations (Lanczos
// approximation for ln Γ, series/continued-fraction for the incomplete
// gamma), and the noncentral CDF is the textbook Poisson-weighted mixture
// of central chi-squared CDFs.

fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut a = COEFFICIENTS[0];
    let t = x + G + 0.5;
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized lower incomplete gamma function `P(a, x)`.
fn gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_series(a, x)
    } else {
        1.0 - gamma_continued_fraction(a, x)
    }
}

fn gamma_series(a: f64, x: f64) -> f64 {
    let mut term = 1.0 / a;
    let mut sum = term;
    let mut n = a;
    for _ in 0..500 {
        n += 1.0;
        term *= x / n;
        sum += term;
        if term.abs() < sum.abs() * 1e-15 {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..500 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < 1e-15 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Central chi-squared survival function `P(X > x)` with `df` degrees of
/// freedom.
fn chi2_survival(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    (1.0 - gamma_p(df / 2.0, x / 2.0)).clamp(0.0, 1.0)
}

/// Central chi-squared CDF `P(X <= x)` with `df` degrees of freedom.
fn chi2_cdf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    gamma_p(df / 2.0, x / 2.0).clamp(0.0, 1.0)
}

/// Quantile (inverse CDF) of the central chi-squared distribution via
/// bisection: `chi2_cdf(result, df) == p`.
fn chi2_quantile(p: f64, df: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    let mut lo = 0.0;
    let mut hi = df + 10.0 * (2.0 * df).sqrt() + 50.0;
    while chi2_cdf(hi, df) < p {
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if chi2_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Noncentral chi-squared CDF as a Poisson(`noncentrality / 2`)-weighted
/// mixture of central chi-squared CDFs with `df + 2j` degrees of freedom.
fn noncentral_chi2_cdf(x: f64, df: f64, noncentrality: f64) -> f64 {
    if noncentrality <= 0.0 {
        return chi2_cdf(x, df);
    }
    let lambda_half = noncentrality / 2.0;
    let mut sum = 0.0;
    let mut log_weight = -lambda_half;
    for j in 0..1000 {
        let weight = log_weight.exp();
        let term = weight * chi2_cdf(x, df + 2.0 * j as f64);
        sum += term;
        if weight < 1e-16 && j > lambda_half as usize {
            break;
        }
        log_weight += lambda_half.max(PROB_MIN).ln() - (j as f64 + 1.0).ln();
    }
    sum.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Tuple;
    use crate::variable::VariableSpec;

    fn uniform_table_over(n_cells: usize) -> ContingencyTable {
        let vl = VariableList::new(vec![VariableSpec::new("A", 'A', n_cells as u32)]).unwrap();
        let mut t = ContingencyTable::new(vl.key_size());
        let a = vl.index_of_abbreviation('A').unwrap();
        for v in 0..n_cells as u32 {
            t.add(vl.build_key(&[(a, v)]).unwrap(), 1.0 / n_cells as f64)
                .unwrap();
        }
        t.sort();
        t
    }

    #[test]
    fn entropy_of_uniform_eight_cells_is_three_bits() {
        let t = uniform_table_over(8);
        assert!((entropy(&t) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_of_degenerate_distribution_is_zero() {
        let mut t = ContingencyTable::new(1);
        t.add(Key::zero(1), 1.0).unwrap();
        t.sort();
        assert!(entropy(&t).abs() < 1e-12);
    }

    #[test]
    fn model_df_of_three_independent_binaries_is_three() {
        let vl = VariableList::new(vec![
            VariableSpec::new("A", 'A', 2),
            VariableSpec::new("B", 'B', 2),
            VariableSpec::new("C", 'C', 2),
        ])
        .unwrap();
        let relations = vec![Relation::new(vec![0]), Relation::new(vec![1]), Relation::new(vec![2])];
        assert_eq!(model_df(&relations, &vl).unwrap(), 3);
    }

    #[test]
    fn model_df_of_saturated_three_binaries_is_seven() {
        let vl = VariableList::new(vec![
            VariableSpec::new("A", 'A', 2),
            VariableSpec::new("B", 'B', 2),
            VariableSpec::new("C", 'C', 2),
        ])
        .unwrap();
        let relations = vec![Relation::new(vec![0, 1, 2])];
        assert_eq!(model_df(&relations, &vl).unwrap(), 7);
    }

    #[test]
    fn p_value_is_one_when_df_is_zero() {
        assert_eq!(p_value(12.3, 0), 1.0);
    }

    #[test]
    fn p_value_of_zero_statistic_is_one() {
        assert!((p_value(0.0, 5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn chi2_quantile_and_cdf_are_inverse() {
        let df = 5.0;
        let x = chi2_quantile(0.95, df);
        assert!((chi2_cdf(x, df) - 0.95).abs() < 1e-6);
    }

    #[test]
    fn power_increases_with_noncentrality() {
        let low = power(1.0, 3, 0.05);
        let high = power(50.0, 3, 0.05);
        assert!(high > low);
    }

    #[test]
    fn aic_and_bic_formulas() {
        assert_eq!(aic(10.0, 4), 18.0);
        let n = 100.0f64;
        assert!((bic(10.0, 4, n) - (10.0 - 4.0 * n.ln())).abs() < 1e-9);
    }

    #[test]
    fn pearson_chi2_is_zero_for_a_perfect_fit() {
        let vl = VariableList::new(vec![VariableSpec::new("A", 'A', 2)]).unwrap();
        let a = vl.index_of_abbreviation('A').unwrap();
        let mut observed = ContingencyTable::new(vl.key_size());
        observed.add(vl.build_key(&[(a, 0)]).unwrap(), 50.0).unwrap();
        observed.add(vl.build_key(&[(a, 1)]).unwrap(), 50.0).unwrap();
        observed.sort();
        observed.merge().unwrap();

        let mut fitted = observed.clone();
        fitted.normalize();

        let chi2 = pearson_chi2(&observed, &fitted, 100.0).unwrap();
        assert!(chi2.abs() < 1e-6);
    }

    #[test]
    fn tuple_values_are_independent_of_order_in_entropy() {
        let t1 = ContingencyTable::from_entries(
            1,
            vec![
                Tuple { key: Key::zero(1), value: 0.5 },
                Tuple { key: Key::wildcard(1), value: 0.5 },
            ],
        );
        assert!((entropy(&t1) - 1.0).abs() < 1e-9);
    }
}
