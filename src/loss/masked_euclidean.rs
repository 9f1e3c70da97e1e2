use serde::{Serialize, Deserialize};
use tracing::{debug, trace};

use crate::error::{LossError, LossResult};
use crate::loss::LossLayer;
use crate::math::blob::{self, Blob};
use crate::math::ops;

/// Squared-Euclidean loss whose elements can be switched off by a validity
/// mask.
///
///   D    = (P - T) ⊙ valid(V)
///   loss = (D · D) / B / 2
///
/// where B is the prediction's batch size. The loss is averaged over the
/// batch only; masked-out elements still count towards the normalization.
///
/// A mask element is valid when its value truncated to an integer is nonzero.
#[derive(Debug, Clone)]
pub struct MaskedEuclideanLoss {
    mask_enabled: bool,
    loss_weight: f64,
    diff: Blob,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unconfigured,
    Ready,
    Forwarded,
}

/// Outcome of a one-shot `evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossEvaluation {
    pub loss: f64,
    /// `loss * loss_weight`, the layer's contribution to the objective.
    pub weighted_loss: f64,
}

impl MaskedEuclideanLoss {
    pub const TYPE: &'static str = "EuclideanWithValidLabelLoss";

    pub fn new(mask_enabled: bool) -> MaskedEuclideanLoss {
        MaskedEuclideanLoss::with_loss_weight(mask_enabled, 1.0)
    }

    pub fn with_loss_weight(mask_enabled: bool, loss_weight: f64) -> MaskedEuclideanLoss {
        MaskedEuclideanLoss {
            mask_enabled,
            loss_weight,
            diff: Blob::default(),
            phase: Phase::Unconfigured,
        }
    }

    pub fn mask_enabled(&self) -> bool {
        self.mask_enabled
    }

    pub fn loss_weight(&self) -> f64 {
        self.loss_weight
    }

    /// Masked difference retained from the last forward pass.
    pub fn difference(&self) -> &[f64] {
        self.diff.data()
    }

    /// Runs setup, forward and backward in one go, seeding backward with the
    /// configured loss weight as the upstream gradient.
    pub fn evaluate(
        &mut self,
        prediction: &mut Blob,
        target: &mut Blob,
        mask: Option<&Blob>,
        propagate_down: [bool; 2],
    ) -> LossResult<LossEvaluation> {
        self.setup(prediction.shape(), target.shape())?;
        let loss = self.forward(prediction, target, mask)?;
        self.backward(self.loss_weight, propagate_down, prediction, target, mask)?;
        Ok(LossEvaluation { loss, weighted_loss: loss * self.loss_weight })
    }

    /// Resolves the mask argument against the configuration.
    fn valid_flags<'a>(&self, mask: Option<&'a Blob>, count: usize) -> LossResult<Option<&'a [f64]>> {
        match (self.mask_enabled, mask) {
            (true, None) => Err(LossError::MissingMask),
            (false, Some(_)) => Err(LossError::UnexpectedMask),
            (false, None) => Ok(None),
            (true, Some(m)) if m.count() != count => {
                Err(LossError::MaskSizeMismatch { expected: count, got: m.count() })
            }
            (true, Some(m)) => Ok(Some(m.data())),
        }
    }

    fn check_input(&self, input: &'static str, blob: &Blob) -> LossResult<()> {
        if blob.count() != self.diff.count() {
            return Err(LossError::InputSizeMismatch {
                input,
                expected: self.diff.count(),
                got: blob.count(),
            });
        }
        Ok(())
    }
}

/// Mask flags are integers stored as floats; truncation decides validity.
pub fn is_valid(flag: f64) -> bool {
    flag as i64 != 0
}

impl LossLayer for MaskedEuclideanLoss {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn setup(&mut self, prediction: &[usize], target: &[usize]) -> LossResult<Vec<usize>> {
        // A rejected shape must not leave the previous difference usable.
        self.phase = Phase::Unconfigured;
        if prediction.is_empty() {
            return Err(LossError::MissingBatchAxis { input: "prediction" });
        }
        if target.is_empty() {
            return Err(LossError::MissingBatchAxis { input: "target" });
        }
        let per_prediction = blob::count_from(prediction, 1)?;
        let per_target = blob::count_from(target, 1)?;
        if per_prediction != per_target {
            return Err(LossError::ShapeMismatch {
                prediction: per_prediction,
                target: per_target,
            });
        }
        if prediction[0] == 0 {
            return Err(LossError::EmptyBatch);
        }

        self.diff.reshape(prediction)?;
        self.phase = Phase::Ready;
        debug!(?prediction, ?target, mask = self.mask_enabled, "masked euclidean loss set up");
        Ok(prediction.to_vec())
    }

    fn forward(&mut self, prediction: &Blob, target: &Blob, mask: Option<&Blob>) -> LossResult<f64> {
        if self.phase == Phase::Unconfigured {
            return Err(LossError::NotSetUp);
        }
        // Until this pass succeeds, `diff` no longer belongs to these inputs.
        self.phase = Phase::Ready;
        self.check_input("prediction", prediction)?;
        self.check_input("target", target)?;
        let count = prediction.count();
        let valid = self.valid_flags(mask, count)?;

        let d = self.diff.data_mut();
        ops::sub(prediction.data(), target.data(), d);
        if let Some(flags) = valid {
            for (x, &flag) in d.iter_mut().zip(flags.iter()) {
                if !is_valid(flag) {
                    *x = 0.0;
                }
            }
        }

        let dot = ops::dot(self.diff.data(), self.diff.data());
        let loss = dot / prediction.num() as f64 / 2.0;
        self.phase = Phase::Forwarded;

        let valid_count = valid.map_or(count, |flags| flags.iter().filter(|&&f| is_valid(f)).count());
        debug!(loss, valid = valid_count, total = count, "masked euclidean forward");
        Ok(loss)
    }

    fn backward(
        &mut self,
        top_diff: f64,
        propagate_down: [bool; 2],
        prediction: &mut Blob,
        target: &mut Blob,
        mask: Option<&Blob>,
    ) -> LossResult<()> {
        if self.phase != Phase::Forwarded {
            return Err(LossError::BackwardBeforeForward);
        }
        self.check_input("prediction", prediction)?;
        self.check_input("target", target)?;
        let count = prediction.count();
        let valid = self.valid_flags(mask, count)?;

        let bottoms: [&mut Blob; 2] = [prediction, target];
        for (i, bottom) in bottoms.into_iter().enumerate() {
            if propagate_down[i] {
                let sign = if i == 0 { 1.0 } else { -1.0 };
                // Each input normalizes by its own batch size.
                let alpha = sign * top_diff / bottom.num() as f64;
                trace!(input = i, alpha, "masked euclidean backward");
                ops::axpby(alpha, self.diff.data(), 0.0, bottom.diff_mut());
            }

            // Masked entries are zeroed even when this input is not propagated.
            if let Some(flags) = valid {
                for (g, &flag) in bottom.diff_mut().iter_mut().zip(flags.iter()) {
                    if !is_valid(flag) {
                        *g = 0.0;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(shape: &[usize], data: &[f64]) -> Blob {
        Blob::from_data(shape, data.to_vec()).unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn unmasked_forward_backward() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let mut p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let mut t = blob(&[1, 3], &[0.0, 0.0, 0.0]);
        layer.setup(p.shape(), t.shape()).unwrap();

        let loss = layer.forward(&p, &t, None).unwrap();
        assert!((loss - 7.0).abs() < 1e-12);

        layer.backward(1.0, [true, true], &mut p, &mut t, None).unwrap();
        assert_close(p.diff(), &[1.0, 2.0, 3.0]);
        assert_close(t.diff(), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn masked_forward_backward() {
        let mut layer = MaskedEuclideanLoss::new(true);
        let mut p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let mut t = blob(&[1, 3], &[0.0, 0.0, 0.0]);
        let v = blob(&[1, 3], &[1.0, 0.0, 1.0]);
        layer.setup(p.shape(), t.shape()).unwrap();

        let loss = layer.forward(&p, &t, Some(&v)).unwrap();
        assert!((loss - 5.0).abs() < 1e-12);
        assert_close(layer.difference(), &[1.0, 0.0, 3.0]);

        layer.backward(1.0, [true, true], &mut p, &mut t, Some(&v)).unwrap();
        assert_close(p.diff(), &[1.0, 0.0, 3.0]);
        assert_close(t.diff(), &[-1.0, 0.0, -3.0]);
    }

    #[test]
    fn loss_is_averaged_over_batch_not_valid_count() {
        let mut layer = MaskedEuclideanLoss::new(true);
        let p = blob(&[2, 2], &[2.0, 2.0, 2.0, 2.0]);
        let t = blob(&[2, 2], &[0.0; 4]);
        let v = blob(&[2, 2], &[1.0, 0.0, 0.0, 0.0]);
        layer.setup(p.shape(), t.shape()).unwrap();
        // one valid element: 4 / 2 batches / 2
        let loss = layer.forward(&p, &t, Some(&v)).unwrap();
        assert!((loss - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mask_flags_truncate_toward_zero() {
        assert!(!is_valid(0.0));
        assert!(!is_valid(0.9));
        assert!(!is_valid(-0.5));
        assert!(!is_valid(f64::NAN));
        assert!(is_valid(1.0));
        assert!(is_valid(-1.0));
        assert!(is_valid(2.7));
    }

    #[test]
    fn masking_applies_to_unpropagated_input() {
        let mut layer = MaskedEuclideanLoss::new(true);
        let mut p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let mut t = blob(&[1, 3], &[0.0; 3]);
        let v = blob(&[1, 3], &[0.0, 1.0, 0.0]);
        t.diff_mut().copy_from_slice(&[7.0, 7.0, 7.0]);
        layer.setup(p.shape(), t.shape()).unwrap();
        layer.forward(&p, &t, Some(&v)).unwrap();

        layer.backward(1.0, [true, false], &mut p, &mut t, Some(&v)).unwrap();
        assert_close(p.diff(), &[0.0, 2.0, 0.0]);
        // untouched except where masked
        assert_close(t.diff(), &[0.0, 7.0, 0.0]);
    }

    #[test]
    fn backward_overwrites_previous_gradient() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let mut p = blob(&[1, 2], &[1.0, 1.0]);
        let mut t = blob(&[1, 2], &[0.0, 0.0]);
        p.diff_mut().copy_from_slice(&[100.0, 100.0]);
        layer.setup(p.shape(), t.shape()).unwrap();
        layer.forward(&p, &t, None).unwrap();
        layer.backward(2.0, [true, false], &mut p, &mut t, None).unwrap();
        assert_close(p.diff(), &[2.0, 2.0]);
    }

    #[test]
    fn backward_uses_each_inputs_batch_size() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let mut p = blob(&[2, 2], &[1.0, 1.0, 1.0, 1.0]);
        let mut t = blob(&[2, 2], &[0.0; 4]);
        layer.setup(p.shape(), t.shape()).unwrap();
        layer.forward(&p, &t, None).unwrap();

        // Same element count, different batch extent.
        let mut t = blob(&[4, 1], &[0.0; 4]);
        layer.backward(1.0, [true, true], &mut p, &mut t, None).unwrap();
        assert_close(p.diff(), &[0.5; 4]);
        assert_close(t.diff(), &[-0.25; 4]);
    }

    #[test]
    fn setup_rejects_per_example_mismatch() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let err = layer.setup(&[1, 3], &[1, 4]).unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { prediction: 3, target: 4 }));
    }

    #[test]
    fn setup_ignores_batch_extent() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let shape = layer.setup(&[2, 3, 4], &[5, 12]).unwrap();
        assert_eq!(shape, vec![2, 3, 4]);

        // Setup only compares per-example sizes; forward needs equal totals.
        let p = Blob::zeros(&[2, 3, 4]).unwrap();
        let t = Blob::zeros(&[5, 12]).unwrap();
        let err = layer.forward(&p, &t, None).unwrap_err();
        assert!(matches!(err, LossError::InputSizeMismatch { input: "target", expected: 24, got: 60 }));
    }

    #[test]
    fn setup_rejects_empty_and_shapeless_inputs() {
        let mut layer = MaskedEuclideanLoss::new(false);
        assert!(matches!(layer.setup(&[], &[1]), Err(LossError::MissingBatchAxis { .. })));
        assert!(matches!(layer.setup(&[0, 3], &[0, 3]), Err(LossError::EmptyBatch)));
    }

    #[test]
    fn phase_ordering_is_enforced() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let mut p = blob(&[1, 1], &[1.0]);
        let mut t = blob(&[1, 1], &[0.0]);
        assert!(matches!(layer.forward(&p, &t, None), Err(LossError::NotSetUp)));

        layer.setup(p.shape(), t.shape()).unwrap();
        let err = layer.backward(1.0, [true, true], &mut p, &mut t, None).unwrap_err();
        assert!(matches!(err, LossError::BackwardBeforeForward));
    }

    #[test]
    fn failed_forward_blocks_backward() {
        let mut layer = MaskedEuclideanLoss::new(true);
        let p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let t = blob(&[1, 3], &[0.0; 3]);
        let v = blob(&[1, 3], &[1.0, 1.0, 1.0]);
        layer.setup(p.shape(), t.shape()).unwrap();
        layer.forward(&p, &t, Some(&v)).unwrap();

        let mut p2 = blob(&[1, 3], &[10.0, 10.0, 10.0]);
        let mut t2 = blob(&[1, 3], &[0.0; 3]);
        let short = blob(&[1, 2], &[1.0, 1.0]);
        assert!(layer.forward(&p2, &t2, Some(&short)).is_err());

        let err = layer.backward(1.0, [true, true], &mut p2, &mut t2, Some(&v)).unwrap_err();
        assert!(matches!(err, LossError::BackwardBeforeForward));
        assert!(p2.diff().iter().all(|&g| g == 0.0));

        // A later successful forward re-enables backward.
        layer.forward(&p2, &t2, Some(&v)).unwrap();
        layer.backward(1.0, [true, false], &mut p2, &mut t2, Some(&v)).unwrap();
        assert_close(p2.diff(), &[10.0, 10.0, 10.0]);
    }

    #[test]
    fn failed_setup_blocks_forward_and_backward() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let mut p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let mut t = blob(&[1, 3], &[0.0; 3]);
        layer.setup(p.shape(), t.shape()).unwrap();
        layer.forward(&p, &t, None).unwrap();

        assert!(matches!(layer.setup(&[1, 3], &[1, 4]), Err(LossError::ShapeMismatch { .. })));
        let err = layer.backward(1.0, [true, true], &mut p, &mut t, None).unwrap_err();
        assert!(matches!(err, LossError::BackwardBeforeForward));
        assert!(matches!(layer.forward(&p, &t, None), Err(LossError::NotSetUp)));
    }

    #[test]
    fn setup_rejects_overflowing_shape() {
        let mut layer = MaskedEuclideanLoss::new(false);
        let err = layer.setup(&[1, usize::MAX, 2], &[1, 3]).unwrap_err();
        assert!(matches!(err, LossError::ShapeOverflow { .. }));
    }

    #[test]
    fn mask_presence_must_match_configuration() {
        let p = blob(&[1, 2], &[1.0, 2.0]);
        let t = blob(&[1, 2], &[0.0, 0.0]);
        let v = blob(&[1, 2], &[1.0, 1.0]);

        let mut masked = MaskedEuclideanLoss::new(true);
        masked.setup(p.shape(), t.shape()).unwrap();
        assert!(matches!(masked.forward(&p, &t, None), Err(LossError::MissingMask)));

        let mut plain = MaskedEuclideanLoss::new(false);
        plain.setup(p.shape(), t.shape()).unwrap();
        assert!(matches!(plain.forward(&p, &t, Some(&v)), Err(LossError::UnexpectedMask)));
    }

    #[test]
    fn mask_size_is_validated() {
        let mut layer = MaskedEuclideanLoss::new(true);
        let p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let t = blob(&[1, 3], &[0.0; 3]);
        let v = blob(&[1, 2], &[1.0, 1.0]);
        layer.setup(p.shape(), t.shape()).unwrap();
        let err = layer.forward(&p, &t, Some(&v)).unwrap_err();
        assert!(matches!(err, LossError::MaskSizeMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn forward_rejects_inputs_resized_after_setup() {
        let mut layer = MaskedEuclideanLoss::new(false);
        layer.setup(&[1, 3], &[1, 3]).unwrap();
        let p = blob(&[2, 3], &[0.0; 6]);
        let t = blob(&[2, 3], &[0.0; 6]);
        let err = layer.forward(&p, &t, None).unwrap_err();
        assert!(matches!(err, LossError::InputSizeMismatch { input: "prediction", expected: 3, got: 6 }));
    }

    #[test]
    fn evaluate_scales_by_loss_weight() {
        let mut layer = MaskedEuclideanLoss::with_loss_weight(false, 0.5);
        let mut p = blob(&[1, 3], &[1.0, 2.0, 3.0]);
        let mut t = blob(&[1, 3], &[0.0; 3]);
        let eval = layer.evaluate(&mut p, &mut t, None, [true, true]).unwrap();
        assert!((eval.loss - 7.0).abs() < 1e-12);
        assert!((eval.weighted_loss - 3.5).abs() < 1e-12);
        assert_close(p.diff(), &[0.5, 1.0, 1.5]);
        assert_close(t.diff(), &[-0.5, -1.0, -1.5]);
    }
}
