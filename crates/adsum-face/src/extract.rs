//! End-to-end extraction pipeline: image bytes → 128-dim embedding.
//!
//! decode → downscale → detect best face → square crop with margin →
//! embed. Enrollment runs in precise mode (larger working resolution);
//! recognition runs fast.

use crate::detector::{DetectedFace, DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use adsum_core::types::Embedding;
use image::RgbImage;
use thiserror::Error;

/// Working resolution tier for a single extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyMode {
    /// Recognition traffic: downscale aggressively, favor latency.
    Fast,
    /// Enrollment: keep more resolution for a stabler embedding.
    Precise,
}

impl AccuracyMode {
    /// Maximum long-side pixels before detection.
    pub fn max_side(self) -> u32 {
        match self {
            AccuracyMode::Fast => 640,
            AccuracyMode::Precise => 1280,
        }
    }
}

/// Fraction of the face box added on each side before the square crop.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// The embedding-extraction capability. The daemon's engine thread owns an
/// [`OnnxExtractor`]; tests substitute stubs.
pub trait Extractor: Send {
    fn extract(&mut self, image_bytes: &[u8], mode: AccuracyMode) -> Result<Embedding, ExtractError>;
}

/// ONNX-backed extractor: detection + embedding sessions.
pub struct OnnxExtractor {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxExtractor {
    /// Load both models. Fails fast so the daemon can refuse to start with
    /// missing model files.
    pub fn load(detect_model: &str, embed_model: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            detector: FaceDetector::load(detect_model)?,
            embedder: FaceEmbedder::load(embed_model)?,
        })
    }
}

impl Extractor for OnnxExtractor {
    fn extract(&mut self, image_bytes: &[u8], mode: AccuracyMode) -> Result<Embedding, ExtractError> {
        let decoded = image::load_from_memory(image_bytes)?.to_rgb8();
        let working = downscale(decoded, mode.max_side());

        let face = self
            .detector
            .detect_best(&working)?
            .ok_or(ExtractError::NoFaceDetected)?;

        tracing::debug!(
            confidence = face.confidence,
            w = face.width,
            h = face.height,
            "face detected"
        );

        let (x, y, side) = square_crop(&face, working.width(), working.height());
        let crop = image::imageops::crop_imm(&working, x, y, side, side).to_image();

        Ok(self.embedder.embed(&crop)?)
    }
}

/// Shrink so the long side is at most `max_side`, preserving aspect ratio.
/// Smaller images pass through untouched.
fn downscale(image: RgbImage, max_side: u32) -> RgbImage {
    let long = image.width().max(image.height());
    if long <= max_side {
        return image;
    }
    let ratio = max_side as f32 / long as f32;
    let w = ((image.width() as f32 * ratio) as u32).max(1);
    let h = ((image.height() as f32 * ratio) as u32).max(1);
    tracing::debug!(from_w = image.width(), from_h = image.height(), w, h, "downscaled");
    image::imageops::resize(&image, w, h, image::imageops::FilterType::Lanczos3)
}

/// Expand the detected box by the crop margin, squared on its longer side
/// and clamped to the image. Returns (x, y, side) in pixels.
fn square_crop(face: &DetectedFace, img_w: u32, img_h: u32) -> (u32, u32, u32) {
    let side = (face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN))
        .min(img_w.min(img_h) as f32);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let half = side / 2.0;
    let x = (cx - half).clamp(0.0, img_w as f32 - side);
    let y = (cy - half).clamp(0.0, img_h as f32 - side);

    (x as u32, y as u32, (side as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> DetectedFace {
        DetectedFace {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_mode_working_resolution() {
        assert_eq!(AccuracyMode::Fast.max_side(), 640);
        assert_eq!(AccuracyMode::Precise.max_side(), 1280);
    }

    #[test]
    fn test_downscale_keeps_small_images() {
        let img = RgbImage::new(320, 240);
        let out = downscale(img, 640);
        assert_eq!((out.width(), out.height()), (320, 240));
    }

    #[test]
    fn test_downscale_preserves_aspect() {
        let img = RgbImage::new(1280, 960);
        let out = downscale(img, 640);
        assert_eq!((out.width(), out.height()), (640, 480));
    }

    #[test]
    fn test_square_crop_is_square_and_in_bounds() {
        let (x, y, side) = square_crop(&face(100.0, 80.0, 60.0, 80.0), 640, 480);
        assert!(side >= 80);
        assert!(x + side <= 640);
        assert!(y + side <= 480);
    }

    #[test]
    fn test_square_crop_clamps_at_edges() {
        // Face hugging the top-left corner: crop must not go negative.
        let (x, y, side) = square_crop(&face(0.0, 0.0, 50.0, 50.0), 640, 480);
        assert_eq!((x, y), (0, 0));
        assert!(side > 0);
    }

    #[test]
    fn test_square_crop_never_exceeds_image() {
        // Face nearly as large as the frame.
        let (x, y, side) = square_crop(&face(10.0, 10.0, 620.0, 460.0), 640, 480);
        assert!(side <= 480);
        assert!(x + side <= 640);
        assert!(y + side <= 480);
    }
}
