//! adsum-face — Face detection and embedding extraction.
//!
//! A lightweight single-face detector picks the best face in a kiosk
//! snapshot; an embedding model turns the aligned crop into a
//! 128-dimensional vector. Both run on CPU via ONNX Runtime.

pub mod detector;
pub mod embedder;
pub mod extract;

pub use detector::{DetectedFace, FaceDetector};
pub use embedder::FaceEmbedder;
pub use extract::{AccuracyMode, ExtractError, Extractor, OnnxExtractor};
