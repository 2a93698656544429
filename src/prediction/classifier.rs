use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use super::PredictionError;

const KIND: &str = "classifier";

/// A trained classifier: one transformed feature row in, one score per
/// class out.
pub trait Classifier: Send + Sync {
    /// Expected row width, when the artifact declares it.
    fn input_width(&self) -> Option<usize>;
    fn predict(&self, row: &[f32]) -> Result<Vec<f32>, PredictionError>;
}

/// Load the classifier at `path`. `.onnx` files need the `onnx` feature;
/// anything else is read as a JSON [`DenseNetwork`].
pub fn load_classifier(path: &Path) -> Result<Box<dyn Classifier>, PredictionError> {
    if !path.exists() {
        return Err(PredictionError::ArtifactMissing { kind: KIND, path: path.to_path_buf() });
    }
    let is_onnx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        load_onnx(path)
    } else {
        Ok(Box::new(DenseNetwork::load(path)?))
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path) -> Result<Box<dyn Classifier>, PredictionError> {
    Ok(Box::new(onnx::OnnxClassifier::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path) -> Result<Box<dyn Classifier>, PredictionError> {
    Err(PredictionError::RuntimeUnavailable {
        path: path.to_path_buf(),
        reason: "built without the `onnx` feature".into(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn apply(&self, x: Array1<f32>) -> Array1<f32> {
        match self {
            Self::Linear => x,
            Self::Relu => x.mapv(|v| v.max(0.0)),
            Self::Sigmoid => x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Self::Tanh => x.mapv(f32::tanh),
            Self::Softmax => {
                let max = x.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let exp = x.mapv(|v| (v - max).exp());
                let sum = exp.sum();
                exp / sum
            }
        }
    }
}

#[derive(Deserialize)]
struct RawLayer {
    /// `[inputs][outputs]`
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

#[derive(Deserialize)]
struct RawNetwork {
    layers: Vec<RawLayer>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

/// Feed-forward network of dense layers, `y = act(x·W + b)` per layer.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    pub fn load(path: &Path) -> Result<Self, PredictionError> {
        let invalid = |reason: String| PredictionError::ArtifactInvalid {
            kind: KIND,
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let network = Self::from_json(&raw).map_err(invalid)?;
        tracing::info!(
            path = %path.display(),
            layers = network.layers.len(),
            classes = network.output_width(),
            "Dense classifier loaded"
        );
        Ok(network)
    }

    pub fn from_json(raw: &str) -> Result<Self, String> {
        let raw_net: RawNetwork = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        if raw_net.layers.is_empty() {
            return Err("network has no layers".into());
        }

        let mut layers = Vec::with_capacity(raw_net.layers.len());
        for (i, layer) in raw_net.layers.into_iter().enumerate() {
            let inputs = layer.weights.len();
            let outputs = layer.bias.len();
            if inputs == 0 || outputs == 0 {
                return Err(format!("layer {i} is empty"));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != outputs) {
                return Err(format!(
                    "layer {i}: weight row {row} has {} columns, bias has {outputs}",
                    layer.weights[row].len()
                ));
            }
            if let Some(prev) = layers.last().map(|l: &DenseLayer| l.bias.len()) {
                if prev != inputs {
                    return Err(format!("layer {i} expects {inputs} inputs, previous layer emits {prev}"));
                }
            }
            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((inputs, outputs), flat).map_err(|e| e.to_string())?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
        }
        Ok(Self { layers })
    }

    pub fn output_width(&self) -> usize {
        self.layers.last().map(|l| l.bias.len()).unwrap_or(0)
    }
}

impl Classifier for DenseNetwork {
    fn input_width(&self) -> Option<usize> {
        self.layers.first().map(|l| l.weights.nrows())
    }

    fn predict(&self, row: &[f32]) -> Result<Vec<f32>, PredictionError> {
        let expected = self.input_width().unwrap_or(0);
        if row.len() != expected {
            return Err(PredictionError::Inference(format!(
                "feature row has {} values, network expects {expected}",
                row.len()
            )));
        }
        let mut x = Array1::from(row.to_vec());
        for layer in &self.layers {
            x = layer.activation.apply(x.dot(&layer.weights) + &layer.bias);
        }
        Ok(x.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX classifier, behind the `onnx` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx")]
mod onnx {
    use super::{Classifier, PredictionError, KIND};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// Classifier exported to ONNX: one `float32 [1, n]` input, first
    /// output is the class distribution.
    ///
    /// `Session::run` needs `&mut self`, hence the Mutex.
    pub struct OnnxClassifier {
        session: Mutex<Session>,
    }

    impl OnnxClassifier {
        pub fn load(path: &Path) -> Result<Self, PredictionError> {
            let init = |e: ort::Error| PredictionError::RuntimeUnavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            };
            let session = Session::builder()
                .map_err(init)?
                .with_intra_threads(1)
                .map_err(init)?
                .commit_from_file(path)
                .map_err(|e: ort::Error| PredictionError::ArtifactInvalid {
                    kind: KIND,
                    path: path.to_path_buf(),
                    reason: format!("ONNX load failed: {e}"),
                })?;

            tracing::info!("ONNX classifier loaded from {}", path.display());
            Ok(Self { session: Mutex::new(session) })
        }
    }

    impl Classifier for OnnxClassifier {
        fn input_width(&self) -> Option<usize> {
            None
        }

        fn predict(&self, row: &[f32]) -> Result<Vec<f32>, PredictionError> {
            use ort::value::TensorRef;

            let input = ndarray::Array2::from_shape_vec((1, row.len()), row.to_vec())
                .map_err(|e| PredictionError::Inference(e.to_string()))?;
            let tensor = TensorRef::from_array_view(&input)
                .map_err(|e| PredictionError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| PredictionError::Inference("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| PredictionError::Inference(format!("ONNX inference failed: {e}")))?;

            let (_shape, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| PredictionError::Inference(format!("Output extraction: {e}")))?;

            Ok(scores.to_vec())
        }
    }
}
