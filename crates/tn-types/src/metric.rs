//! Evaluation metrics and their optimization direction.
//!
//! Histories always minimize. Metrics where a larger value is better are
//! negated on the way in by [`Metric::to_score`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::OutcomeError;

/// Metric a trial producer reports its quality in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    #[serde(rename = "areaAboveROC")]
    AreaAboveRoc,
    #[serde(rename = "areaUnderROC")]
    AreaUnderRoc,
    AvgCost,
    Correct,
    CorrelationCoefficient,
    ErrorRate,
    FalseNegativeRate,
    FalsePositiveRate,
    FMeasure,
    Incorrect,
    Kappa,
    KBInformation,
    KBMeanInformation,
    KBRelativeInformation,
    MeanAbsoluteError,
    PctCorrect,
    PctIncorrect,
    Precision,
    RelativeAbsoluteError,
    RootMeanSquaredError,
    RootRelativeSquaredError,
    #[serde(rename = "weightedAreaUnderROC")]
    WeightedAreaUnderRoc,
    WeightedFalseNegativeRate,
    WeightedFalsePositiveRate,
    WeightedFMeasure,
    WeightedPrecision,
    WeightedRecall,
    WeightedTrueNegativeRate,
    WeightedTruePositiveRate,
}

impl Metric {
    pub const ALL: [Metric; 29] = [
        Metric::AreaAboveRoc,
        Metric::AreaUnderRoc,
        Metric::AvgCost,
        Metric::Correct,
        Metric::CorrelationCoefficient,
        Metric::ErrorRate,
        Metric::FalseNegativeRate,
        Metric::FalsePositiveRate,
        Metric::FMeasure,
        Metric::Incorrect,
        Metric::Kappa,
        Metric::KBInformation,
        Metric::KBMeanInformation,
        Metric::KBRelativeInformation,
        Metric::MeanAbsoluteError,
        Metric::PctCorrect,
        Metric::PctIncorrect,
        Metric::Precision,
        Metric::RelativeAbsoluteError,
        Metric::RootMeanSquaredError,
        Metric::RootRelativeSquaredError,
        Metric::WeightedAreaUnderRoc,
        Metric::WeightedFalseNegativeRate,
        Metric::WeightedFalsePositiveRate,
        Metric::WeightedFMeasure,
        Metric::WeightedPrecision,
        Metric::WeightedRecall,
        Metric::WeightedTrueNegativeRate,
        Metric::WeightedTruePositiveRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AreaAboveRoc => "areaAboveROC",
            Self::AreaUnderRoc => "areaUnderROC",
            Self::AvgCost => "avgCost",
            Self::Correct => "correct",
            Self::CorrelationCoefficient => "correlationCoefficient",
            Self::ErrorRate => "errorRate",
            Self::FalseNegativeRate => "falseNegativeRate",
            Self::FalsePositiveRate => "falsePositiveRate",
            Self::FMeasure => "fMeasure",
            Self::Incorrect => "incorrect",
            Self::Kappa => "kappa",
            Self::KBInformation => "kBInformation",
            Self::KBMeanInformation => "kBMeanInformation",
            Self::KBRelativeInformation => "kBRelativeInformation",
            Self::MeanAbsoluteError => "meanAbsoluteError",
            Self::PctCorrect => "pctCorrect",
            Self::PctIncorrect => "pctIncorrect",
            Self::Precision => "precision",
            Self::RelativeAbsoluteError => "relativeAbsoluteError",
            Self::RootMeanSquaredError => "rootMeanSquaredError",
            Self::RootRelativeSquaredError => "rootRelativeSquaredError",
            Self::WeightedAreaUnderRoc => "weightedAreaUnderROC",
            Self::WeightedFalseNegativeRate => "weightedFalseNegativeRate",
            Self::WeightedFalsePositiveRate => "weightedFalsePositiveRate",
            Self::WeightedFMeasure => "weightedFMeasure",
            Self::WeightedPrecision => "weightedPrecision",
            Self::WeightedRecall => "weightedRecall",
            Self::WeightedTrueNegativeRate => "weightedTrueNegativeRate",
            Self::WeightedTruePositiveRate => "weightedTruePositiveRate",
        }
    }

    /// Whether a larger raw value of this metric means a better model.
    pub fn is_maximized(&self) -> bool {
        matches!(
            self,
            Self::AreaUnderRoc
                | Self::Correct
                | Self::CorrelationCoefficient
                | Self::FMeasure
                | Self::Kappa
                | Self::KBInformation
                | Self::KBMeanInformation
                | Self::KBRelativeInformation
                | Self::PctCorrect
                | Self::Precision
                | Self::WeightedAreaUnderRoc
                | Self::WeightedFMeasure
                | Self::WeightedPrecision
                | Self::WeightedRecall
                | Self::WeightedTrueNegativeRate
                | Self::WeightedTruePositiveRate
        )
    }

    /// Convert a raw metric value into a lower-is-better ranking score.
    pub fn to_score(&self, raw: f64) -> f64 {
        if self.is_maximized() {
            -raw
        } else {
            raw
        }
    }

    /// Inverse of [`Metric::to_score`].
    pub fn from_score(&self, score: f64) -> f64 {
        self.to_score(score)
    }
}

impl Default for Metric {
    fn default() -> Self {
        Self::ErrorRate
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| OutcomeError::UnknownMetric {
                name: s.to_string(),
            })
    }
}
