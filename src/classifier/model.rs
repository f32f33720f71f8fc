//! # CNN Snore Model
//!
//! Small convolutional network over log-mel spectrograms, loaded from a
//! safetensors file and run with Candle.
//!
//! ## Architecture:
//! ```text
//! input (N, 1, n_mels, frames)
//!   conv1 3x3, 16 ch, ReLU, maxpool 2x2
//!   conv2 3x3, 32 ch, ReLU, maxpool 2x2
//!   conv3 3x3, 64 ch, ReLU
//!   global mean over (mel, frame)
//!   head  linear 64 -> 1, sigmoid
//! ```
//!
//! ## Weight File:
//! Tensors are looked up by name: `conv1.weight`, `conv1.bias`, ...,
//! `head.weight`, `head.bias`. Any safetensors export using those names can
//! be loaded, whatever framework trained it.

use crate::analysis::features::FeatureTensor;
use crate::analysis::AnalysisError;
use crate::classifier::SnoreClassifier;
use crate::device::DeviceManager;
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder};
use serde::Serialize;
use std::path::Path;

/// Output channels of the three convolution blocks.
const CHANNELS: [usize; 3] = [16, 32, 64];

/// Information about a loaded classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// File the weights came from (or a label for in-memory models)
    pub source: String,
    /// Device description, e.g. "CPU"
    pub device: String,
    /// Architecture summary
    pub architecture: String,
    pub loaded: bool,
}

/// A loaded CNN ready for inference.
///
/// ## Thread Safety:
/// Candle tensors are immutable and `forward` only reads them, so one model
/// is shared by concurrent analyses without locking.
pub struct CnnSnoreClassifier {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    head: Linear,
    device: Device,
    info: ModelInfo,
}

impl CnnSnoreClassifier {
    /// Load weights from a safetensors file.
    ///
    /// ## Returns:
    /// - **Ok(CnnSnoreClassifier)**: every tensor was found with the right shape
    /// - **Err(anyhow::Error)**: missing file, wrong format or missing tensors
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        tracing::info!("Loading snore classifier from {}", path.display());
        let start_time = std::time::Instant::now();

        if !path.exists() {
            return Err(anyhow!("Model file not found: {}", path.display()));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("safetensors") {
            return Err(anyhow!("Only safetensors format is supported, got {}", path.display()));
        }

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? };
        let mut model = Self::from_varbuilder(vb, device)?;
        model.info.source = path.display().to_string();

        tracing::info!(
            "Snore classifier loaded in {:.2}s on {}",
            start_time.elapsed().as_secs_f64(),
            model.info.device
        );
        Ok(model)
    }

    /// Build the network from any variable source.
    pub fn from_varbuilder(vb: VarBuilder, device: Device) -> Result<Self> {
        let conv_config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(1, CHANNELS[0], 3, conv_config, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(CHANNELS[0], CHANNELS[1], 3, conv_config, vb.pp("conv2"))?;
        let conv3 = candle_nn::conv2d(CHANNELS[1], CHANNELS[2], 3, conv_config, vb.pp("conv3"))?;
        let head = candle_nn::linear(CHANNELS[2], 1, vb.pp("head"))?;

        let info = ModelInfo {
            source: "in-memory".to_string(),
            device: DeviceManager::get_device_info(&device),
            architecture: format!(
                "cnn conv{}-{}-{} + linear head",
                CHANNELS[0], CHANNELS[1], CHANNELS[2]
            ),
            loaded: true,
        };

        Ok(Self {
            conv1,
            conv2,
            conv3,
            head,
            device,
            info,
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Stack the batch into one `(N, 1, n_mels, frames)` tensor.
    fn batch_tensor(&self, batch: &[FeatureTensor]) -> Result<Tensor> {
        let (n_mels, n_frames, _) = batch[0].shape();
        let mut data = Vec::with_capacity(batch.len() * n_mels * n_frames);
        for tensor in batch {
            if tensor.shape() != batch[0].shape() {
                return Err(anyhow!(
                    "Mixed feature shapes in one batch: {:?} and {:?}",
                    batch[0].shape(),
                    tensor.shape()
                ));
            }
            data.extend_from_slice(tensor.as_slice());
        }
        Ok(Tensor::from_vec(data, (batch.len(), 1, n_mels, n_frames), &self.device)?)
    }

    /// Forward pass, returns `(N,)` probabilities.
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let x = self.conv1.forward(input)?.relu()?.max_pool2d(2)?;
        let x = self.conv2.forward(&x)?.relu()?.max_pool2d(2)?;
        let x = self.conv3.forward(&x)?.relu()?;
        let pooled = x.mean((2, 3))?;
        let logits = self.head.forward(&pooled)?;
        Ok(candle_nn::ops::sigmoid(&logits)?.squeeze(1)?)
    }

    fn run(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>> {
        let input = self.batch_tensor(batch)?;
        let probabilities = self.forward(&input)?;
        Ok(probabilities.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}

impl SnoreClassifier for CnnSnoreClassifier {
    fn predict(&self, batch: &[FeatureTensor]) -> Result<Vec<f32>, AnalysisError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.run(batch)
            .map_err(|e| AnalysisError::ModelUnavailable(format!("inference failed: {}", e)))
    }

    fn describe(&self) -> String {
        format!("{} ({}, {})", self.info.architecture, self.info.source, self.info.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::{FeatureConfig, FeatureExtractor};
    use std::collections::HashMap;

    /// All-zero weights except the head bias.
    fn weights(head_bias: f32) -> HashMap<String, Tensor> {
        let dev = Device::Cpu;
        let mut map = HashMap::new();
        let mut in_ch = 1;
        for (i, out_ch) in CHANNELS.iter().enumerate() {
            let name = format!("conv{}", i + 1);
            map.insert(
                format!("{}.weight", name),
                Tensor::zeros((*out_ch, in_ch, 3, 3), DType::F32, &dev).unwrap(),
            );
            map.insert(
                format!("{}.bias", name),
                Tensor::zeros(*out_ch, DType::F32, &dev).unwrap(),
            );
            in_ch = *out_ch;
        }
        map.insert(
            "head.weight".to_string(),
            Tensor::zeros((1, CHANNELS[2]), DType::F32, &dev).unwrap(),
        );
        map.insert(
            "head.bias".to_string(),
            Tensor::new(&[head_bias], &dev).unwrap(),
        );
        map
    }

    fn model(head_bias: f32) -> CnnSnoreClassifier {
        let vb = VarBuilder::from_tensors(weights(head_bias), DType::F32, &Device::Cpu);
        CnnSnoreClassifier::from_varbuilder(vb, Device::Cpu).unwrap()
    }

    fn features(n: usize) -> Vec<FeatureTensor> {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        (0..n)
            .map(|i| extractor.extract(i, &vec![0.05 * (i as f32 + 1.0); 16_000]).unwrap())
            .collect()
    }

    #[test]
    fn test_zero_network_outputs_half() {
        let probabilities = model(0.0).predict(&features(3)).unwrap();
        assert_eq!(probabilities.len(), 3);
        for p in probabilities {
            assert!((p - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_head_bias_moves_probability() {
        let probabilities = model(2.0).predict(&features(2)).unwrap();
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        for p in probabilities {
            assert!((p - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_batch() {
        assert!(model(0.0).predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_tensor_fails_to_build() {
        let mut map = weights(0.0);
        map.remove("conv2.weight");
        let vb = VarBuilder::from_tensors(map, DType::F32, &Device::Cpu);
        assert!(CnnSnoreClassifier::from_varbuilder(vb, Device::Cpu).is_err());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let err = CnnSnoreClassifier::load(Path::new("/nonexistent/model.safetensors"), Device::Cpu);
        assert!(err.is_err());
    }

    #[test]
    fn test_describe_mentions_device() {
        assert!(model(0.0).describe().contains("CPU"));
    }
}
