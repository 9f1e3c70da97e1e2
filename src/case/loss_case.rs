use rand::Rng;
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::case::report::LossReport;
use crate::error::LossResult;
use crate::loss::masked_euclidean::is_valid;
use crate::loss::spec::LossSpec;
use crate::loss::LossLayer;
use crate::math::blob::Blob;

/// A self-contained loss evaluation: layer configuration plus the inputs the
/// host would feed it.
///
/// # Fields
/// - `spec`       — layer configuration; defaults to an unmasked layer
/// - `prediction` — first input, gradients land in its `diff`
/// - `target`     — second input, same per-example size as `prediction`
/// - `mask`       — validity flags, required iff `spec.mask_enabled`
/// - `upstream`   — gradient of the objective w.r.t. the loss; falls back to
///                  `spec.loss_weight`
/// - `propagate`  — which of (prediction, target) receive gradients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossCase {
    #[serde(default)]
    pub spec: LossSpec,
    pub prediction: Blob,
    pub target: Blob,
    #[serde(default)]
    pub mask: Option<Blob>,
    #[serde(default)]
    pub upstream: Option<f64>,
    #[serde(default = "default_propagate")]
    pub propagate: [bool; 2],
}

fn default_propagate() -> [bool; 2] {
    [true, true]
}

impl LossCase {
    /// Deserializes a case from a JSON file.
    pub fn load_json(path: &str) -> LossResult<LossCase> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Random prediction/target pair of shape `[batch, dim]`.
    ///
    /// With `mask_ratio > 0` the layer is configured with a mask in which
    /// roughly that fraction of elements is marked invalid.
    pub fn random<R: Rng + ?Sized>(
        batch: usize,
        dim: usize,
        mask_ratio: f64,
        rng: &mut R,
    ) -> LossResult<LossCase> {
        let shape = [batch, dim];
        let prediction = Blob::random(&shape, rng)?;
        let target = Blob::random(&shape, rng)?;
        let mask = if mask_ratio > 0.0 {
            let mut mask = Blob::zeros(&shape)?;
            for flag in mask.data_mut().iter_mut() {
                *flag = if rng.gen::<f64>() < mask_ratio { 0.0 } else { 1.0 };
            }
            Some(mask)
        } else {
            None
        };

        Ok(LossCase {
            spec: LossSpec {
                name: "demo".to_string(),
                mask_enabled: mask.is_some(),
                ..LossSpec::default()
            },
            prediction,
            target,
            mask,
            upstream: None,
            propagate: default_propagate(),
        })
    }

    pub fn run(mut self) -> LossResult<LossReport> {
        self.prediction.validate()?;
        self.target.validate()?;
        if let Some(mask) = &self.mask {
            mask.validate()?;
        }

        let mut layer = self.spec.build();
        layer.setup(self.prediction.shape(), self.target.shape())?;
        let loss = layer.forward(&self.prediction, &self.target, self.mask.as_ref())?;

        let upstream = self.upstream.unwrap_or(layer.loss_weight());
        layer.backward(
            upstream,
            self.propagate,
            &mut self.prediction,
            &mut self.target,
            self.mask.as_ref(),
        )?;

        let total_elements = self.prediction.count();
        let valid_elements = match &self.mask {
            Some(mask) => mask.data().iter().filter(|&&f| is_valid(f)).count(),
            None => total_elements,
        };
        info!(name = %self.spec.name, loss, valid_elements, total_elements, "loss case evaluated");

        let [propagate_prediction, propagate_target] = self.propagate;
        Ok(LossReport {
            name: self.spec.name,
            loss,
            upstream,
            valid_elements,
            total_elements,
            prediction_grad: propagate_prediction.then(|| self.prediction.diff().to_vec()),
            target_grad: propagate_target.then(|| self.target.diff().to_vec()),
        })
    }
}
