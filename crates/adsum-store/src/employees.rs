use crate::{Store, StoreError, StoreResult};
use adsum_core::types::Employee;
use rusqlite::{params, Row};

pub(crate) fn map_employee(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        nip: row.get("nip")?,
        name: row.get("name")?,
        position: row.get("position")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

impl Store {
    pub fn create_employee(
        &self,
        nip: Option<&str>,
        name: &str,
        position: &str,
    ) -> StoreResult<Employee> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO employees (nip, name, position) VALUES (?1, ?2, ?3)",
            params![nip, name, position],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.employee(id)?.ok_or(StoreError::EmployeeNotFound(id))
    }

    pub fn employee(&self, id: i64) -> StoreResult<Option<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, nip, name, position, is_active FROM employees WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], map_employee)?;
        Ok(rows.next().transpose()?)
    }

    pub fn active_employees(&self) -> StoreResult<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, nip, name, position, is_active
             FROM employees WHERE is_active = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], map_employee)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn set_employee_active(&self, id: i64, active: bool) -> StoreResult<()> {
        let changed = self.conn().execute(
            "UPDATE employees SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        if changed == 0 {
            return Err(StoreError::EmployeeNotFound(id));
        }
        Ok(())
    }
}
