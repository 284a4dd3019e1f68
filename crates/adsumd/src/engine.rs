//! Extraction engine: owns the ONNX sessions on a dedicated OS thread.
//!
//! `ort` sessions need `&mut` for inference, so one thread owns them and
//! D-Bus handlers talk to it through a bounded channel. Extraction is a
//! blocking call with no retry; a bad frame is retried by the human
//! re-presenting their face.

use adsum_core::types::Embedding;
use adsum_face::{AccuracyMode, ExtractError, Extractor, OnnxExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    Extract {
        image: Vec<u8>,
        mode: AccuracyMode,
        reply: oneshot::Sender<Result<Embedding, ExtractError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Extract an embedding from raw image bytes.
    pub async fn extract(
        &self,
        image: Vec<u8>,
        mode: AccuracyMode,
    ) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                mode,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Load both ONNX models and spawn the engine thread. Fails fast when a
/// model file is missing so the daemon refuses to start half-configured.
pub fn spawn_onnx_engine(
    detect_model: &str,
    embed_model: &str,
    queue_depth: usize,
) -> Result<EngineHandle, ExtractError> {
    let extractor = OnnxExtractor::load(detect_model, embed_model)?;
    Ok(spawn_with(extractor, queue_depth))
}

/// Spawn the engine loop around any extractor. Tests pass stubs.
pub fn spawn_with(mut extractor: impl Extractor + 'static, queue_depth: usize) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("adsum-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, mode, reply } => {
                        let result = extractor.extract(&image, mode);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsum_core::types::EMBEDDING_DIM;

    struct StubExtractor;

    impl Extractor for StubExtractor {
        fn extract(
            &mut self,
            image_bytes: &[u8],
            _mode: AccuracyMode,
        ) -> Result<Embedding, ExtractError> {
            if image_bytes.is_empty() {
                return Err(ExtractError::NoFaceDetected);
            }
            Ok(Embedding {
                values: vec![image_bytes[0] as f32; EMBEDDING_DIM],
            })
        }
    }

    #[tokio::test]
    async fn test_roundtrip_through_engine_thread() {
        let handle = spawn_with(StubExtractor, 4);
        let embedding = handle
            .extract(vec![7u8], AccuracyMode::Fast)
            .await
            .unwrap();
        assert_eq!(embedding.values[0], 7.0);
    }

    #[tokio::test]
    async fn test_no_face_propagates() {
        let handle = spawn_with(StubExtractor, 4);
        let err = handle
            .extract(Vec::new(), AccuracyMode::Fast)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Extract(ExtractError::NoFaceDetected)
        ));
    }
}
