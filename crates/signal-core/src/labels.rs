use serde::{Deserialize, Serialize};

/// Trading direction attached to a label band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Neutral,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Neutral => "neutral",
            Direction::Sell => "sell",
        }
    }
}

/// One `(min_score, name, direction)` band of the label scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelBand {
    pub min_score: f64,
    pub name: String,
    pub direction: Direction,
}

/// Walk the bands (sorted descending by `min_score`) and return the first one
/// the score reaches. Falls back to the last band for scores below every
/// threshold.
pub fn classify(score: f64, bands: &[LabelBand]) -> (String, Direction) {
    for band in bands {
        if score >= band.min_score {
            return (band.name.clone(), band.direction);
        }
    }
    match bands.last() {
        Some(band) => (band.name.clone(), band.direction),
        None => ("UNKNOWN".to_string(), Direction::Neutral),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;

    #[test]
    fn test_classify_walks_descending_bands() {
        let bands = Profile::default().labels;
        let (name, direction) = classify(81.1, &bands);
        assert_eq!(name, "STRONG BUY");
        assert_eq!(direction, Direction::Buy);

        let (name, direction) = classify(50.0, &bands);
        assert_eq!(name, "NEUTRAL");
        assert_eq!(direction, Direction::Neutral);

        let (name, direction) = classify(5.0, &bands);
        assert_eq!(name, "STRONG SELL");
        assert_eq!(direction, Direction::Sell);
    }

    #[test]
    fn test_label_order_is_monotone() {
        let bands = Profile::default().labels;
        let band_index = |score: f64| {
            bands
                .iter()
                .position(|b| score >= b.min_score)
                .unwrap_or(bands.len() - 1)
        };
        // Higher score never maps to a lower band.
        let mut prev = band_index(100.0);
        for score in [90.0, 70.0, 60.0, 50.0, 40.0, 25.0, 10.0, 0.0] {
            let idx = band_index(score);
            assert!(idx >= prev, "band order broke at score {score}");
            prev = idx;
        }
    }
}
