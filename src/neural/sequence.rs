// projeto: lstmpetr4
// file: src/neural/sequence.rs
// Sliding-window supervised samples: W consecutive values predict the next one

use ndarray::{Array1, Array3};

use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub window: Vec<f64>,
    pub target: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceBuilder {
    window: usize,
}

impl SequenceBuilder {
    pub fn new(window: usize) -> Self {
        SequenceBuilder { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Produces `max(0, N - W)` samples in order; sample `i` covers
    /// `values[i..i + W]` and targets `values[i + W]`.
    pub fn build(&self, values: &[f64]) -> Vec<Sequence> {
        if self.window == 0 || values.len() <= self.window {
            return Vec::new();
        }

        values
            .windows(self.window + 1)
            .map(|w| Sequence {
                window: w[..self.window].to_vec(),
                target: w[self.window],
            })
            .collect()
    }

    /// Packs samples into `[n, W, 1]` inputs and `[n]` targets.
    pub fn to_tensors(&self, sequences: &[Sequence]) -> Result<(Array3<f64>, Array1<f64>), TrainingError> {
        let mut flat = Vec::with_capacity(sequences.len() * self.window);
        for (i, seq) in sequences.iter().enumerate() {
            if seq.window.len() != self.window {
                return Err(TrainingError::Shape(format!(
                    "sequence {} has length {}, expected {}",
                    i,
                    seq.window.len(),
                    self.window
                )));
            }
            flat.extend_from_slice(&seq.window);
        }

        let x = Array3::from_shape_vec((sequences.len(), self.window, 1), flat)?;
        let y = sequences.iter().map(|s| s.target).collect::<Array1<f64>>();
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_produces_expected_windows() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let sequences = SequenceBuilder::new(10).build(&values);

        assert_eq!(sequences.len(), 90);
        assert_eq!(sequences[0].window, (1..=10).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(sequences[0].target, 11.0);
        assert_eq!(sequences[89].window, (90..=99).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(sequences[89].target, 100.0);
    }

    #[test]
    fn test_short_input_yields_nothing() {
        let builder = SequenceBuilder::new(5);
        assert!(builder.build(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_empty());
        assert!(builder.build(&[]).is_empty());
        assert_eq!(builder.build(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).len(), 1);
    }

    #[test]
    fn test_zero_window_yields_nothing() {
        assert!(SequenceBuilder::new(0).build(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_windows_are_contiguous_and_targets_follow() {
        let values: Vec<f64> = (0..30).map(|v| (v as f64).sin()).collect();
        let window = 7;
        for (i, seq) in SequenceBuilder::new(window).build(&values).iter().enumerate() {
            assert_eq!(seq.window.as_slice(), &values[i..i + window]);
            assert_eq!(seq.target, values[i + window]);
        }
    }

    #[test]
    fn test_to_tensors_shapes() {
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let builder = SequenceBuilder::new(4);
        let sequences = builder.build(&values);
        let (x, y) = builder.to_tensors(&sequences).unwrap();

        assert_eq!(x.dim(), (8, 4, 1));
        assert_eq!(y.len(), 8);
        assert_eq!(x[[2, 3, 0]], 5.0);
        assert_eq!(y[2], 6.0);
    }
}
