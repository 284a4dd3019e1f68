use crate::{Store, StoreResult};
use rusqlite::params;

impl Store {
    /// Append one audit entry. Every attendance transition, enrollment and
    /// schedule edit goes through here; failures are the caller's to
    /// decide on (the daemon logs and continues).
    pub fn audit(
        &self,
        action: &str,
        entity: &str,
        description: &str,
        actor: &str,
        details: serde_json::Value,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO audit_log (action, entity, description, actor, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, entity, description, actor, details.to_string()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn audit_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?)
    }
}
