use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Classification, Classifier};
use crate::constants::NSFW_LABEL;
use crate::models::ProbabilityMap;

const MODEL_REPO: &str = "Falconsai/nsfw_image_detection";
const IMAGE_SIZE: usize = 224;

/// Only the label table; the rest of config.json goes to `vit::Config`
#[derive(Deserialize)]
struct LabelConfig {
    id2label: BTreeMap<String, String>,
}

/// NSFW classifier using the Falconsai/nsfw_image_detection ViT model.
/// Two classes: normal, nsfw.
pub struct NsfwClassifier {
    model: Mutex<vit::Model>,
    device: Device,
    labels: Vec<String>,
    threshold: f64,
    batch_size: usize,
}

impl NsfwClassifier {
    pub fn new(threshold: f64, batch_size: usize) -> Result<Self> {
        #[cfg(feature = "metal")]
        let device = Device::new_metal(0).unwrap_or(Device::Cpu);
        #[cfg(all(feature = "cuda", not(feature = "metal")))]
        let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
        #[cfg(not(any(feature = "metal", feature = "cuda")))]
        let device = Device::Cpu;

        log::info!("[NSFW] Loading {} on {:?}", MODEL_REPO, device);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(MODEL_REPO.to_string(), RepoType::Model));
        let model_path = repo.get("model.safetensors")?;
        let config_path = repo.get("config.json")?;

        let raw_config = std::fs::read_to_string(config_path)?;
        let config: vit::Config = serde_json::from_str(&raw_config)?;
        let labels = ordered_labels(serde_json::from_str::<LabelConfig>(&raw_config)?.id2label)?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)? };
        let model = vit::Model::new(&config, labels.len(), vb)?;

        log::info!("[NSFW] Model loaded, labels: {:?}", labels);

        Ok(Self {
            model: Mutex::new(model),
            device,
            labels,
            threshold,
            batch_size: batch_size.max(1),
        })
    }

    /// Load, resize and normalize one batch into an NCHW tensor
    fn preprocess_batch(&self, paths: &[PathBuf]) -> Result<Tensor> {
        // mean=0.5, std=0.5 for all channels
        let mean = 0.5;
        let std = 0.5;
        let plane = IMAGE_SIZE * IMAGE_SIZE;
        let mut data = vec![0f32; paths.len() * 3 * plane];

        for (batch_idx, path) in paths.iter().enumerate() {
            let rgb = load_rgb(path)?;
            let offset = batch_idx * 3 * plane;
            for i in 0..plane {
                let r = rgb[i * 3] as f32 / 255.0;
                let g = rgb[i * 3 + 1] as f32 / 255.0;
                let b = rgb[i * 3 + 2] as f32 / 255.0;

                data[offset + i] = (r - mean) / std;
                data[offset + plane + i] = (g - mean) / std;
                data[offset + 2 * plane + i] = (b - mean) / std;
            }
        }

        let tensor = Tensor::from_vec(data, (paths.len(), 3, IMAGE_SIZE, IMAGE_SIZE), &self.device)?;
        Ok(tensor)
    }

    fn classify_batch(&self, paths: &[PathBuf]) -> Result<Vec<Classification>> {
        let input = self.preprocess_batch(paths)?;
        let model = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let logits = model.forward(&input)?;
        drop(model);

        let probs = candle_nn::ops::softmax(&logits, 1)?;
        let rows: Vec<Vec<f32>> = probs.to_vec2()?;
        if rows.len() != paths.len() {
            return Err(anyhow!(
                "model returned {} rows for {} images",
                rows.len(),
                paths.len()
            ));
        }

        Ok(paths
            .iter()
            .zip(rows)
            .map(|(path, row)| {
                let probs = label_probs(&self.labels, &row);
                let score = probs.get(NSFW_LABEL).copied().unwrap_or(0.0);
                let is_nsfw = score > self.threshold;
                if is_nsfw {
                    log::warn!("[NSFW] {} flagged at {:.1}%", path.display(), score * 100.0);
                } else {
                    log::debug!("[NSFW] {} safe ({:.1}%)", path.display(), score * 100.0);
                }
                Classification {
                    path: path.clone(),
                    is_nsfw,
                    score,
                    probs,
                }
            })
            .collect())
    }
}

impl Classifier for NsfwClassifier {
    fn classify(&self, paths: &[PathBuf]) -> Result<Vec<Classification>> {
        let mut results = Vec::with_capacity(paths.len());
        for batch in paths.chunks(self.batch_size) {
            results.extend(self.classify_batch(batch)?);
        }
        log::info!(
            "[NSFW] Classified {} images in {} batch(es)",
            results.len(),
            paths.len().div_ceil(self.batch_size)
        );
        Ok(results)
    }
}

/// 224x224 RGB bytes for one image file
fn load_rgb(path: &Path) -> Result<Vec<u8>> {
    let img = image::open(path).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    let resized = image::imageops::resize(
        &img.to_rgb8(),
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        image::imageops::FilterType::Triangle,
    );
    Ok(resized.into_raw())
}

/// `id2label` keys are stringified class indices; order labels by index
fn ordered_labels(id2label: BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut indexed = id2label
        .into_iter()
        .map(|(id, label)| {
            id.parse::<usize>()
                .map(|id| (id, label.to_lowercase()))
                .map_err(|_| anyhow!("invalid class id {:?}", id))
        })
        .collect::<Result<Vec<_>>>()?;
    indexed.sort_by_key(|(id, _)| *id);
    if indexed.iter().enumerate().any(|(i, (id, _))| i != *id) {
        return Err(anyhow!("class ids are not contiguous"));
    }
    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}

fn label_probs(labels: &[String], row: &[f32]) -> ProbabilityMap {
    labels
        .iter()
        .zip(row)
        .map(|(label, p)| (label.clone(), f64::from(*p)))
        .collect()
}
