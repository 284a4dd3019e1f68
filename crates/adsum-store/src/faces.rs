use crate::employees::map_employee;
use crate::{Store, StoreError, StoreResult};
use adsum_core::index::{EmbeddingSource, EnrolledFace, SourceError};
use rusqlite::params;

/// Face embedding row metadata (without the vector blob).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FaceRow {
    pub id: i64,
    pub employee_id: i64,
    pub photo_path: Option<String>,
    pub is_primary: bool,
    pub created_at: String,
}

impl Store {
    /// Insert a new embedding for an employee. The first face enrolled
    /// becomes the primary one.
    pub fn add_face(
        &self,
        employee_id: i64,
        embedding: &[u8],
        photo_path: Option<&str>,
    ) -> StoreResult<FaceRow> {
        let conn = self.conn();
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM face_embeddings WHERE employee_id = ?1",
            [employee_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO face_embeddings (employee_id, embedding, photo_path, is_primary)
             VALUES (?1, ?2, ?3, ?4)",
            params![employee_id, embedding, photo_path, existing == 0],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.face(id)?.ok_or(StoreError::FaceNotFound(id))
    }

    pub fn face(&self, id: i64) -> StoreResult<Option<FaceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, employee_id, photo_path, is_primary, created_at
             FROM face_embeddings WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], |row| {
            Ok(FaceRow {
                id: row.get("id")?,
                employee_id: row.get("employee_id")?,
                photo_path: row.get("photo_path")?,
                is_primary: row.get::<_, i64>("is_primary")? != 0,
                created_at: row.get("created_at")?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn faces_for(&self, employee_id: i64) -> StoreResult<Vec<FaceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, employee_id, photo_path, is_primary, created_at
             FROM face_embeddings WHERE employee_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([employee_id], |row| {
            Ok(FaceRow {
                id: row.get("id")?,
                employee_id: row.get("employee_id")?,
                photo_path: row.get("photo_path")?,
                is_primary: row.get::<_, i64>("is_primary")? != 0,
                created_at: row.get("created_at")?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Delete one face row. Returns its photo path so the caller can clean
    /// up the stored image file.
    pub fn remove_face(&self, employee_id: i64, face_id: i64) -> StoreResult<Option<String>> {
        let conn = self.conn();
        let photo: Option<Option<String>> = conn
            .query_row(
                "SELECT photo_path FROM face_embeddings WHERE id = ?1 AND employee_id = ?2",
                params![face_id, employee_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(photo_path) = photo else {
            return Err(StoreError::FaceNotFound(face_id));
        };
        conn.execute(
            "DELETE FROM face_embeddings WHERE id = ?1 AND employee_id = ?2",
            params![face_id, employee_id],
        )?;
        Ok(photo_path)
    }

    /// All embeddings for active employees, in (employee, face) order —
    /// this read order defines the matching index's row order.
    pub fn active_embedding_rows(&self) -> StoreResult<Vec<EnrolledFace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id AS face_id, f.embedding,
                    e.id, e.nip, e.name, e.position, e.is_active
             FROM face_embeddings f
             JOIN employees e ON e.id = f.employee_id
             WHERE e.is_active = 1
             ORDER BY e.id, f.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrolledFace {
                face_id: row.get("face_id")?,
                employee: map_employee(row)?,
                blob: row.get("embedding")?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

impl EmbeddingSource for Store {
    fn active_embeddings(&self) -> Result<Vec<EnrolledFace>, SourceError> {
        Ok(self.active_embedding_rows()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Store, StoreError};
    use adsum_core::types::{Embedding, EMBEDDING_DIM};

    fn blob(seed: f32) -> Vec<u8> {
        Embedding {
            values: vec![seed; EMBEDDING_DIM],
        }
        .to_bytes()
    }

    #[test]
    fn test_first_face_is_primary() {
        let store = Store::open_in_memory().unwrap();
        let emp = store.create_employee(None, "Ana", "Clerk").unwrap();

        let first = store.add_face(emp.id, &blob(0.1), Some("a.jpg")).unwrap();
        let second = store.add_face(emp.id, &blob(0.2), Some("b.jpg")).unwrap();
        assert!(first.is_primary);
        assert!(!second.is_primary);
    }

    #[test]
    fn test_remove_face_returns_photo_path() {
        let store = Store::open_in_memory().unwrap();
        let emp = store.create_employee(None, "Ana", "Clerk").unwrap();
        let face = store.add_face(emp.id, &blob(0.1), Some("a.jpg")).unwrap();

        let photo = store.remove_face(emp.id, face.id).unwrap();
        assert_eq!(photo.as_deref(), Some("a.jpg"));
        assert!(store.faces_for(emp.id).unwrap().is_empty());
    }

    #[test]
    fn test_remove_face_checks_ownership() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_employee(None, "Ana", "Clerk").unwrap();
        let budi = store.create_employee(None, "Budi", "Driver").unwrap();
        let face = store.add_face(ana.id, &blob(0.1), None).unwrap();

        assert!(matches!(
            store.remove_face(budi.id, face.id),
            Err(StoreError::FaceNotFound(_))
        ));
    }

    #[test]
    fn test_deleting_employee_cascades_embeddings() {
        let store = Store::open_in_memory().unwrap();
        let emp = store.create_employee(None, "Ana", "Clerk").unwrap();
        store.add_face(emp.id, &blob(0.1), None).unwrap();

        store
            .conn()
            .execute("DELETE FROM employees WHERE id = ?1", [emp.id])
            .unwrap();
        assert!(store.faces_for(emp.id).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_employees_excluded_from_index_rows() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_employee(None, "Ana", "Clerk").unwrap();
        let budi = store.create_employee(None, "Budi", "Driver").unwrap();
        store.add_face(ana.id, &blob(0.1), None).unwrap();
        store.add_face(budi.id, &blob(0.2), None).unwrap();
        store.set_employee_active(budi.id, false).unwrap();

        let rows = store.active_embedding_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].employee.id, ana.id);
    }
}
