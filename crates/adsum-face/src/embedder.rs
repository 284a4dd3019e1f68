//! Face embedding model via ONNX Runtime.
//!
//! Turns a 112×112 face crop into a 128-dimensional L2-normalized vector.
//! Every embedding in the system — enrolled or probed — comes through
//! here, so the dimension check at the output is the single gate that
//! keeps the matching index homogeneous.

use adsum_core::types::{Embedding, EMBEDDING_DIM};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// 128-dim face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self { session })
    }

    /// Embed an aligned face crop. The crop is resized to the model input
    /// size here, so callers may pass any reasonably square face image.
    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances live on a fixed scale.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values: Vec<f32> = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding { values })
    }

    /// Resize to 112×112 and normalize into a NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = EMBED_INPUT_SIZE;
        let resized = image::imageops::resize(
            face,
            size as u32,
            size as u32,
            image::imageops::FilterType::CatmullRom,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - EMBED_MEAN) / EMBED_STD;
            }
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::new(200, 180);
        let tensor = FaceEmbedder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization_is_symmetric() {
        // Pixel 0 → -1.0, pixel 255 → +1.0.
        let dark = RgbImage::from_pixel(112, 112, image::Rgb([0, 0, 0]));
        let tensor = FaceEmbedder::preprocess(&dark);
        assert!((tensor[[0, 0, 5, 5]] + 1.0).abs() < 1e-6);

        let bright = RgbImage::from_pixel(112, 112, image::Rgb([255, 255, 255]));
        let tensor = FaceEmbedder::preprocess(&bright);
        assert!((tensor[[0, 2, 5, 5]] - 1.0).abs() < 1e-6);
    }
}
