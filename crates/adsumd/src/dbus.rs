use crate::service::{KioskService, ServiceError};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Adsum attendance kiosk daemon.
///
/// Bus name: org.adsum.Kiosk1
/// Object path: /org/adsum/Kiosk1
///
/// Composite replies are JSON strings; domain rejections come back
/// success-shaped with `ok: false` and a `reason` kind, so only transport
/// and internal failures surface as D-Bus errors.
pub struct KioskInterface {
    service: Arc<KioskService>,
}

impl KioskInterface {
    pub fn new(service: Arc<KioskService>) -> Self {
        Self { service }
    }
}

fn internal(e: ServiceError) -> zbus::fdo::Error {
    tracing::error!(error = %e, "request failed");
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| zbus::fdo::Error::Failed(format!("serialize reply: {e}")))
}

/// Empty string means "today"; anything else must be YYYY-MM-DD.
fn parse_date_arg(date: &str) -> zbus::fdo::Result<NaiveDate> {
    if date.is_empty() {
        return Ok(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("bad date: {date}")))
}

#[interface(name = "org.adsum.Kiosk1")]
impl KioskInterface {
    /// Recognize the face in `image` and apply the attendance transition
    /// for the current time.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let reply = self
            .service
            .recognize_and_attend(image, Local::now().naive_local())
            .await
            .map_err(internal)?;
        to_json(&reply)
    }

    /// Enroll a new face for the given employee.
    async fn enroll(&self, employee_id: i64, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(employee_id, bytes = image.len(), "enroll requested");
        let reply = self
            .service
            .enroll(employee_id, image)
            .await
            .map_err(internal)?;
        to_json(&reply)
    }

    /// List enrolled faces for the given employee.
    async fn list_faces(&self, employee_id: i64) -> zbus::fdo::Result<String> {
        let faces = self.service.list_faces(employee_id).map_err(internal)?;
        to_json(&faces)
    }

    /// Remove an enrolled face. Returns false when no such face exists.
    async fn remove_face(&self, employee_id: i64, face_id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(employee_id, face_id, "remove_face requested");
        self.service
            .remove_face(employee_id, face_id)
            .map_err(internal)
    }

    /// Run the absence sweep for a date ("" = today).
    async fn sweep_absences(&self, date: String) -> zbus::fdo::Result<String> {
        let date = parse_date_arg(&date)?;
        let reply = self.service.sweep_absences(date).map_err(internal)?;
        to_json(&reply)
    }

    /// Effective attendance windows for a date ("" = today).
    async fn today_schedule(&self, date: String) -> zbus::fdo::Result<String> {
        let date = parse_date_arg(&date)?;
        let schedule = self.service.schedule_for(date).map_err(internal)?;
        to_json(&schedule)
    }

    /// Force a matching index rebuild; returns embeddings loaded.
    async fn refresh_index(&self) -> zbus::fdo::Result<u32> {
        let loaded = self.service.warm_index().map_err(internal)?;
        Ok(loaded as u32)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self.service.index_stats();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "index": stats,
        })
        .to_string())
    }
}
