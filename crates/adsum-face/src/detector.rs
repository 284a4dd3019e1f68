//! Single-face ONNX detector.
//!
//! Runs an UltraFace-style detection model (fixed 320×240 input, two
//! output tensors: per-prior scores `[1, N, 2]` and normalized corner
//! boxes `[1, N, 4]`). The kiosk only ever needs the single best face in
//! frame, so post-processing keeps the highest-scoring box above the
//! confidence floor instead of running full NMS.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECT_INPUT_WIDTH: usize = 320;
const DETECT_INPUT_HEIGHT: usize = 240;
const DETECT_MEAN: f32 = 127.0;
const DETECT_STD: f32 = 128.0;
const DETECT_CONFIDENCE_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Best face found in an image, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// UltraFace-style face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the detection ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Find the highest-confidence face, or `None` when nothing in frame
    /// clears the confidence floor.
    pub fn detect_best(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        // scores carry 2 values per prior (background, face), boxes 4.
        if scores.len() / 2 != boxes.len() / 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "prior count mismatch: {} scores vs {} boxes",
                scores.len() / 2,
                boxes.len() / 4
            )));
        }
        let priors = scores.len() / 2;

        let mut best: Option<(usize, f32)> = None;
        for i in 0..priors {
            let confidence = scores[i * 2 + 1];
            if confidence < DETECT_CONFIDENCE_THRESHOLD {
                continue;
            }
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some((i, confidence));
            }
        }

        let Some((idx, confidence)) = best else {
            return Ok(None);
        };

        // Boxes are normalized corners; scale straight back to source
        // pixels (preprocess stretches, so no letterbox de-mapping needed).
        let (w, h) = (image.width() as f32, image.height() as f32);
        let x1 = (boxes[idx * 4] * w).clamp(0.0, w);
        let y1 = (boxes[idx * 4 + 1] * h).clamp(0.0, h);
        let x2 = (boxes[idx * 4 + 2] * w).clamp(0.0, w);
        let y2 = (boxes[idx * 4 + 3] * h).clamp(0.0, h);

        if x2 <= x1 || y2 <= y1 {
            return Ok(None);
        }

        Ok(Some(DetectedFace {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        }))
    }

    /// Stretch-resize to the fixed model input and normalize into a NCHW
    /// float tensor.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            DETECT_INPUT_WIDTH as u32,
            DETECT_INPUT_HEIGHT as u32,
            image::imageops::FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - DETECT_MEAN) / DETECT_STD;
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
        let img = RgbImage::new(640, 480);
        let tensor = FaceDetector::preprocess(&img);
        assert_eq!(
            tensor.shape(),
            &[1, 3, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        let img = RgbImage::from_pixel(320, 240, image::Rgb([127, 127, 127]));
        let tensor = FaceDetector::preprocess(&img);
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);

        let bright = RgbImage::from_pixel(320, 240, image::Rgb([255, 255, 255]));
        let tensor = FaceDetector::preprocess(&bright);
        let expected = (255.0 - DETECT_MEAN) / DETECT_STD;
        assert!((tensor[[0, 1, 10, 10]] - expected).abs() < 1e-6);
    }
}
