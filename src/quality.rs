//! Precision, recall and F-measure from confusion-matrix counts.
//!
//! A ratio whose denominator is zero is reported as 0.0 rather than NaN, so
//! every value written to output lies in `[0, 1]`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `tp / (tp + fp)`, or 0 when nothing was predicted positive.
pub fn precision(tp: u64, fp: u64) -> f64 {
    ratio(tp, tp + fp)
}

/// `tp / (tp + fn)`, or 0 when there are no true links.
pub fn recall(tp: u64, fn_: u64) -> f64 {
    ratio(tp, tp + fn_)
}

/// Harmonic mean of precision and recall, or 0 when both are 0.
pub fn f_measure(tp: u64, fp: u64, fn_: u64) -> f64 {
    let p = precision(tp, fp);
    let r = recall(tp, fn_);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Aggregate quality of a set of asserted links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkageQuality {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
}

impl LinkageQuality {
    pub fn new(tp: u64, fp: u64, fn_: u64) -> Self {
        Self { tp, fp, fn_ }
    }

    /// Derive false negatives from the number of true links in the data.
    pub fn from_ground_truth_total(tp: u64, fp: u64, true_links: u64) -> Self {
        Self::new(tp, fp, true_links.saturating_sub(tp))
    }

    pub fn precision(&self) -> f64 {
        precision(self.tp, self.fp)
    }

    pub fn recall(&self) -> f64 {
        recall(self.tp, self.fn_)
    }

    pub fn f_measure(&self) -> f64 {
        f_measure(self.tp, self.fp, self.fn_)
    }
}

impl fmt::Display for LinkageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TP: {} FP: {} FN: {} precision: {:.2} recall: {:.2} f-measure: {:.2}",
            self.tp,
            self.fp,
            self.fn_,
            self.precision(),
            self.recall(),
            self.f_measure()
        )
    }
}
