use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Dimension of every face embedding in the system. Vectors of any other
/// length are excluded from matching, never padded or truncated.
pub const EMBEDDING_DIM: usize = 128;

/// Byte length of a stored embedding blob (little-endian f32).
pub const EMBEDDING_BYTES: usize = EMBEDDING_DIM * 4;

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Decode a stored blob of `EMBEDDING_DIM` little-endian f32 values.
    ///
    /// Returns `None` for blobs of any other length.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() != EMBEDDING_BYTES {
            return None;
        }
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }

    /// Encode as a little-endian f32 blob for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to another embedding of the same dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Map a Euclidean distance to a bounded similarity score in [0, 1].
/// Distance 0 → 1.0; distance ≥ 1 → 0.0.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

/// An enrolled employee. Owns zero or more face embeddings; deleting the
/// employee deletes them with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    /// Civil-service registration number, when assigned.
    pub nip: Option<String>,
    pub name: String,
    pub position: String,
    pub is_active: bool,
}

/// Day outcome for one employee. Authoritative once set by check-in or the
/// absence sweep; checkout never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Excused,
    Sick,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            "sick" => Some(AttendanceStatus::Sick),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One attendance row. At most one exists per (employee, date);
/// `check_out_at` is only ever set after `check_in_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub employee_id: i64,
    pub date: NaiveDate,
    pub check_in_at: Option<NaiveDateTime>,
    pub check_out_at: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    /// Match confidence in [0, 1] captured at check-in.
    pub confidence: Option<f32>,
    pub corrected_by: Option<String>,
    pub correction_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let e = Embedding {
            values: (0..EMBEDDING_DIM).map(|i| i as f32 * 0.25).collect(),
        };
        let blob = e.to_bytes();
        assert_eq!(blob.len(), EMBEDDING_BYTES);
        assert_eq!(Embedding::from_bytes(&blob), Some(e));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(Embedding::from_bytes(&[0u8; EMBEDDING_BYTES - 4]).is_none());
        assert!(Embedding::from_bytes(&[0u8; EMBEDDING_BYTES + 4]).is_none());
        assert!(Embedding::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding { values: vec![0.0, 0.0, 0.0] };
        let b = Embedding { values: vec![3.0, 4.0, 0.0] };
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_bounded() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!((similarity_from_distance(0.6) - 0.4).abs() < 1e-6);
        assert_eq!(similarity_from_distance(1.7), 0.0);
    }

    #[test]
    fn test_status_strings() {
        for s in [
            AttendanceStatus::Present,
            AttendanceStatus::Late,
            AttendanceStatus::Excused,
            AttendanceStatus::Sick,
            AttendanceStatus::Absent,
        ] {
            assert_eq!(AttendanceStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(AttendanceStatus::from_str("gone"), None);
    }
}
