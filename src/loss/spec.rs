use serde::{Serialize, Deserialize};

use crate::error::LossResult;
use crate::loss::masked_euclidean::MaskedEuclideanLoss;

/// Serializable configuration for a masked Euclidean loss layer.
///
/// Fields:
/// - `name`         — label used in logs and reports
/// - `mask_enabled` — whether the layer expects a third, validity-mask input
/// - `loss_weight`  — upstream gradient seeded into backward by `evaluate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossSpec {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub mask_enabled: bool,
    #[serde(default = "default_loss_weight")]
    pub loss_weight: f64,
}

fn default_name() -> String {
    "loss".to_string()
}

fn default_loss_weight() -> f64 {
    1.0
}

impl Default for LossSpec {
    fn default() -> Self {
        LossSpec {
            name: default_name(),
            mask_enabled: false,
            loss_weight: default_loss_weight(),
        }
    }
}

impl LossSpec {
    pub fn build(&self) -> MaskedEuclideanLoss {
        MaskedEuclideanLoss::with_loss_weight(self.mask_enabled, self.loss_weight)
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> LossResult<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `LossSpec` from a JSON file.
    pub fn load_json(path: &str) -> LossResult<LossSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
