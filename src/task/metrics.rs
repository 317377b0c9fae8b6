//! Evaluation metrics: ROC, regression scatter and concordance

use serde::{Deserialize, Serialize};

/// ROC curve with its trapezoidal area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f32>,
    pub tpr: Vec<f32>,
    pub auc: f32,
}

/// ROC of `scores` against binary truth; `None` unless both classes occur
///
/// Tied scores form a single threshold step.
pub fn roc_curve(scores: &[f32], positives: &[bool]) -> Option<RocCurve> {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (rank, &i) in order.iter().enumerate() {
        if positives[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        let threshold_ends = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if threshold_ends {
            fpr.push(fp as f32 / n_neg as f32);
            tpr.push(tp as f32 / n_pos as f32);
        }
    }

    let auc = trapezoid(&fpr, &tpr);
    Some(RocCurve { fpr, tpr, auc })
}

/// Macro-averaged one-vs-rest ROC over a batch×classes probability matrix
///
/// Per-class curves are interpolated on the union of their FPR points and
/// averaged. Classes absent from the truth contribute no curve.
pub fn macro_roc(probabilities: &[f32], classes: usize, truth: &[usize]) -> Option<RocCurve> {
    let curves: Vec<RocCurve> = (0..classes)
        .filter_map(|c| {
            let scores: Vec<f32> = probabilities.chunks(classes).map(|row| row[c]).collect();
            let positives: Vec<bool> = truth.iter().map(|&t| t == c).collect();
            roc_curve(&scores, &positives)
        })
        .collect();
    if curves.is_empty() {
        return None;
    }

    let mut grid: Vec<f32> = curves.iter().flat_map(|c| c.fpr.iter().copied()).collect();
    grid.sort_by(f32::total_cmp);
    grid.dedup();

    let tpr: Vec<f32> = grid
        .iter()
        .map(|&x| {
            curves
                .iter()
                .map(|c| interpolate(x, &c.fpr, &c.tpr))
                .sum::<f32>()
                / curves.len() as f32
        })
        .collect();

    let auc = trapezoid(&grid, &tpr);
    Some(RocCurve {
        fpr: grid,
        tpr,
        auc,
    })
}

/// Piecewise-linear value at `x`; on a vertical step the upper value wins
fn interpolate(x: f32, xs: &[f32], ys: &[f32]) -> f32 {
    let upper = xs.partition_point(|&v| v <= x);
    if upper == 0 {
        return ys[0];
    }
    let lo = upper - 1;
    if xs[lo] == x || upper == xs.len() {
        return ys[lo];
    }
    let t = (x - xs[lo]) / (xs[upper] - xs[lo]);
    ys[lo] + t * (ys[upper] - ys[lo])
}

fn trapezoid(xs: &[f32], ys: &[f32]) -> f32 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}

/// Predicted-vs-observed pairs of a regression head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterSummary {
    pub observed: Vec<f32>,
    pub predicted: Vec<f32>,
    pub r2: f32,
}

impl ScatterSummary {
    pub fn new(observed: Vec<f32>, predicted: Vec<f32>) -> Self {
        let r2 = r_squared(&observed, &predicted);
        Self {
            observed,
            predicted,
            r2,
        }
    }
}

/// Coefficient of determination; a constant target scores 1 only when hit exactly
pub fn r_squared(observed: &[f32], predicted: &[f32]) -> f32 {
    if observed.is_empty() {
        return 0.0;
    }
    let mean = observed.iter().sum::<f32>() / observed.len() as f32;
    let ss_tot: f32 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f32 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Which pairs count as comparable under censoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CensoringRule {
    /// Earlier time is an event and times differ
    #[default]
    Harrell,
    /// Harrell, plus an event tied in time with a censored record
    IncludeTiedEvents,
}

/// Fraction of comparable pairs whose risk order matches outcome order
///
/// Higher risk means earlier failure. Tied risks score 0.5. `None` when no
/// pair is comparable.
pub fn concordance_index(
    risks: &[f32],
    periods: &[f32],
    events: &[bool],
    rule: CensoringRule,
) -> Option<f32> {
    let n = risks.len();
    let mut concordant = 0.0;
    let mut comparable = 0usize;

    for i in 0..n {
        if !events[i] {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            let counts = periods[i] < periods[j]
                || (rule == CensoringRule::IncludeTiedEvents
                    && periods[i] == periods[j]
                    && !events[j]);
            if !counts {
                continue;
            }
            comparable += 1;
            if risks[i] > risks[j] {
                concordant += 1.0;
            } else if risks[i] == risks[j] {
                concordant += 0.5;
            }
        }
    }

    (comparable > 0).then(|| concordant / comparable as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_perfect_and_inverted_roc() {
        let truth = [false, false, true, true];
        let perfect = roc_curve(&[0.1, 0.2, 0.8, 0.9], &truth).unwrap();
        assert_relative_eq!(perfect.auc, 1.0);
        let inverted = roc_curve(&[0.9, 0.8, 0.2, 0.1], &truth).unwrap();
        assert_relative_eq!(inverted.auc, 0.0);
    }

    #[test]
    fn test_roc_ties_form_one_step() {
        let curve = roc_curve(&[0.5, 0.5, 0.5, 0.5], &[true, false, true, false]).unwrap();
        assert_eq!(curve.fpr, vec![0.0, 1.0]);
        assert_relative_eq!(curve.auc, 0.5);
    }

    #[test]
    fn test_roc_single_class_is_none() {
        assert!(roc_curve(&[0.1, 0.9], &[true, true]).is_none());
    }

    #[test]
    fn test_macro_roc_perfect_three_class() {
        let probs = [
            0.8, 0.1, 0.1, //
            0.1, 0.8, 0.1, //
            0.1, 0.1, 0.8, //
            0.7, 0.2, 0.1,
        ];
        let curve = macro_roc(&probs, 3, &[0, 1, 2, 0]).unwrap();
        assert_relative_eq!(curve.auc, 1.0, epsilon = 1e-6);
        assert_eq!(curve.fpr.first(), Some(&0.0));
        assert_eq!(curve.fpr.last(), Some(&1.0));
    }

    #[test]
    fn test_interpolate() {
        let xs = [0.0, 0.5, 0.5, 1.0];
        let ys = [0.0, 0.2, 0.8, 1.0];
        assert_relative_eq!(interpolate(0.25, &xs, &ys), 0.1);
        assert_relative_eq!(interpolate(0.5, &xs, &ys), 0.8);
        assert_relative_eq!(interpolate(0.75, &xs, &ys), 0.9);
    }

    #[test]
    fn test_r_squared() {
        assert_relative_eq!(r_squared(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_relative_eq!(r_squared(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]), 0.0);
        assert_relative_eq!(r_squared(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
    }

    #[test]
    fn test_concordance_ten_records() {
        let periods: Vec<f32> = (1..=10).map(|t| t as f32).collect();
        let events = vec![true; 10];
        // earliest failure carries the highest risk
        let consistent: Vec<f32> = (0..10).map(|i| 10.0 - i as f32).collect();
        let reversed: Vec<f32> = (0..10).map(|i| i as f32).collect();

        let c = concordance_index(&consistent, &periods, &events, CensoringRule::Harrell);
        assert_eq!(c, Some(1.0));
        let c = concordance_index(&reversed, &periods, &events, CensoringRule::Harrell);
        assert_eq!(c, Some(0.0));
    }

    #[test]
    fn test_concordance_censoring_rules() {
        // record 0 fails at t=2, record 1 censored at t=2
        let risks = [1.0, 0.0];
        let periods = [2.0, 2.0];
        let events = [true, false];
        assert_eq!(
            concordance_index(&risks, &periods, &events, CensoringRule::Harrell),
            None
        );
        assert_eq!(
            concordance_index(&risks, &periods, &events, CensoringRule::IncludeTiedEvents),
            Some(1.0)
        );
    }

    #[test]
    fn test_censored_earlier_record_is_not_comparable() {
        // censored at t=1 says nothing about record 1 failing at t=3
        let c = concordance_index(
            &[0.0, 1.0, 0.5],
            &[1.0, 3.0, 5.0],
            &[false, true, false],
            CensoringRule::Harrell,
        );
        assert_eq!(c, Some(1.0));
    }

    proptest! {
        #[test]
        fn prop_concordance_in_unit_interval(
            rows in prop::collection::vec((-5.0f32..5.0, 0.0f32..10.0, any::<bool>()), 2..30)
        ) {
            let risks: Vec<f32> = rows.iter().map(|r| r.0).collect();
            let periods: Vec<f32> = rows.iter().map(|r| r.1).collect();
            let events: Vec<bool> = rows.iter().map(|r| r.2).collect();
            if let Some(c) = concordance_index(&risks, &periods, &events, CensoringRule::Harrell) {
                prop_assert!((0.0..=1.0).contains(&c));
            }
        }

        #[test]
        fn prop_auc_in_unit_interval(
            rows in prop::collection::vec((0.0f32..1.0, any::<bool>()), 2..40)
        ) {
            let scores: Vec<f32> = rows.iter().map(|r| r.0).collect();
            let truth: Vec<bool> = rows.iter().map(|r| r.1).collect();
            if let Some(curve) = roc_curve(&scores, &truth) {
                prop_assert!(curve.auc >= -1e-6 && curve.auc <= 1.0 + 1e-6);
            }
        }
    }
}
