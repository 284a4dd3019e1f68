//! Recognition orchestrator and attendance application.
//!
//! Glues the extraction engine, matching index, schedule resolver and
//! record store into single kiosk responses. Domain denials (holiday,
//! out-of-window, …) are success-shaped replies carrying a reason kind;
//! only infrastructure failures become errors.

use crate::engine::{EngineError, EngineHandle};
use adsum_core::attendance::{decide, AttendancePolicy, Decision, Denial};
use adsum_core::index::{FaceIndex, IndexError};
use adsum_core::schedule::{ScheduleError, ScheduleResolver};
use adsum_core::types::{AttendanceRecord, AttendanceStatus, Employee};
use adsum_core::Embedding;
use adsum_face::{AccuracyMode, ExtractError};
use adsum_store::{CheckInApplied, Store, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("photo store: {0}")]
    PhotoStore(#[from] std::io::Error),
}

/// Reason kinds surfaced to the kiosk, one per rejection or informational
/// outcome.
pub mod reason {
    pub const NO_FACE_DETECTED: &str = "no_face_detected";
    pub const NO_MATCH_FOUND: &str = "no_match_found";
    pub const NOT_A_WORKDAY: &str = "not_a_workday";
    pub const IS_HOLIDAY: &str = "is_holiday";
    pub const OUT_OF_WINDOW: &str = "out_of_attendance_window";
    pub const ALREADY_CHECKED_IN: &str = "already_checked_in";
    pub const ALREADY_CHECKED_OUT: &str = "already_checked_out";
    pub const NO_CHECK_IN_YET: &str = "no_check_in_yet";
    pub const TOO_SOON_TO_CHECKOUT: &str = "too_soon_to_checkout";
    pub const EMPLOYEE_NOT_FOUND: &str = "employee_not_found";
    pub const EMPLOYEE_INACTIVE: &str = "employee_inactive";
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeDto {
    pub id: i64,
    pub nip: Option<String>,
    pub name: String,
    pub position: String,
}

impl From<&Employee> for EmployeeDto {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id,
            nip: e.nip.clone(),
            name: e.name.clone(),
            position: e.position.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceDto {
    pub id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub check_in_at: Option<NaiveDateTime>,
    pub check_out_at: Option<NaiveDateTime>,
    pub confidence: Option<f32>,
}

impl From<&AttendanceRecord> for AttendanceDto {
    fn from(r: &AttendanceRecord) -> Self {
        Self {
            id: r.id,
            date: r.date,
            status: r.status,
            check_in_at: r.check_in_at,
            check_out_at: r.check_out_at,
            confidence: r.confidence,
        }
    }
}

/// One kiosk response. `ok` is true for applied transitions and for
/// idempotent "already done" outcomes, so kiosk retries never look like
/// failures. Confidence stays in [0, 1]; displays multiply by 100.
#[derive(Debug, Clone, Serialize)]
pub struct KioskReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee: Option<EmployeeDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Best similarity seen during matching, reported even on no-match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<f32>,
}

impl KioskReply {
    fn rejected(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            message: message.into(),
            employee: None,
            attendance: None,
            confidence: None,
            best_score: None,
        }
    }
}

/// Result of one absence sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReply {
    pub date: NaiveDate,
    pub swept: bool,
    pub inserted: usize,
    pub message: String,
}

pub struct KioskService {
    store: Arc<Store>,
    index: FaceIndex<Arc<Store>>,
    resolver: ScheduleResolver<Arc<Store>>,
    engine: EngineHandle,
    faces_dir: PathBuf,
}

const KIOSK_ACTOR: &str = "kiosk";

impl KioskService {
    pub fn new(store: Arc<Store>, engine: EngineHandle, faces_dir: PathBuf) -> Self {
        Self {
            index: FaceIndex::new(store.clone()),
            resolver: ScheduleResolver::new(store.clone()),
            store,
            engine,
            faces_dir,
        }
    }

    /// Warm the matching index at startup. Returns embeddings loaded.
    pub fn warm_index(&self) -> Result<usize, ServiceError> {
        Ok(self.index.refresh()?)
    }

    pub fn index_stats(&self) -> adsum_core::index::IndexStats {
        self.index.stats()
    }

    /// Full kiosk flow: extract → match → attendance decision.
    pub async fn recognize_and_attend(
        &self,
        image: Vec<u8>,
        now: NaiveDateTime,
    ) -> Result<KioskReply, ServiceError> {
        let embedding = match self.engine.extract(image, AccuracyMode::Fast).await {
            Ok(e) => e,
            Err(EngineError::Extract(ExtractError::NoFaceDetected)) => {
                return Ok(KioskReply::rejected(
                    reason::NO_FACE_DETECTED,
                    "No face detected, please face the camera",
                ));
            }
            Err(e) => return Err(e.into()),
        };
        self.attend_with_probe(&embedding, now)
    }

    /// Match an already-extracted probe and run the attendance state
    /// machine for the winner.
    pub fn attend_with_probe(
        &self,
        probe: &Embedding,
        now: NaiveDateTime,
    ) -> Result<KioskReply, ServiceError> {
        let settings = self.store.work_settings()?;
        let outcome = self.index.best_match(probe, settings.similarity_threshold)?;

        let Some(candidate) = outcome.candidate else {
            tracing::info!(best_score = outcome.best_score, "no match above threshold");
            let mut reply =
                KioskReply::rejected(reason::NO_MATCH_FOUND, "Face not recognized");
            reply.best_score = Some(outcome.best_score);
            return Ok(reply);
        };

        let mut reply =
            self.process_attendance(&candidate.employee, outcome.best_score, now)?;
        reply.best_score = Some(outcome.best_score);
        Ok(reply)
    }

    /// Apply one recognition event to the attendance record for
    /// `now.date()`. Pure decision first, then the storage upsert with the
    /// unique `(employee, date)` constraint as the race arbiter.
    pub fn process_attendance(
        &self,
        employee: &Employee,
        confidence: f32,
        now: NaiveDateTime,
    ) -> Result<KioskReply, ServiceError> {
        let date = now.date();
        let schedule = self.resolver.effective(date)?;
        let settings = self.store.work_settings()?;
        let policy = AttendancePolicy::from(&settings);
        let existing = self.store.attendance_for(employee.id, date)?;

        let decision = decide(existing.as_ref(), now, &schedule, &policy);
        tracing::debug!(employee = employee.id, ?decision, "attendance decision");

        let reply = match decision {
            Decision::CheckIn { status } => {
                let (record, applied) =
                    self.store
                        .record_check_in(employee.id, date, now, status, confidence)?;
                match applied {
                    CheckInApplied::AlreadyCheckedIn => {
                        self.already_checked_in_reply(employee, record)
                    }
                    _ => {
                        self.audit_transition(
                            "check_in",
                            employee,
                            &record,
                            serde_json::json!({
                                "status": record.status.as_str(),
                                "confidence": confidence,
                                "applied": match applied {
                                    CheckInApplied::Created => "created",
                                    CheckInApplied::UpdatedExisting => "updated_existing",
                                    CheckInApplied::AlreadyCheckedIn => unreachable!(),
                                },
                            }),
                        );
                        let message = match status {
                            AttendanceStatus::Late => {
                                format!("Welcome, {} (late)", employee.name)
                            }
                            _ => format!("Welcome, {}", employee.name),
                        };
                        KioskReply {
                            ok: true,
                            reason: None,
                            message,
                            employee: Some(employee.into()),
                            attendance: Some((&record).into()),
                            confidence: Some(confidence),
                            best_score: None,
                        }
                    }
                }
            }
            Decision::AlreadyCheckedIn => {
                let record = existing.expect("decision implies an existing record");
                self.already_checked_in_reply(employee, record)
            }
            Decision::CheckOut => {
                let (record, applied) = self.store.record_check_out(employee.id, date, now)?;
                if applied {
                    self.audit_transition(
                        "check_out",
                        employee,
                        &record,
                        serde_json::json!({ "confidence": confidence }),
                    );
                    KioskReply {
                        ok: true,
                        reason: None,
                        message: format!("See you tomorrow, {}", employee.name),
                        employee: Some(employee.into()),
                        attendance: Some((&record).into()),
                        confidence: Some(confidence),
                        best_score: None,
                    }
                } else {
                    // Concurrent duplicate checkout landed first.
                    self.already_checked_out_reply(employee, record)
                }
            }
            Decision::AlreadyCheckedOut => {
                let record = existing.expect("decision implies an existing record");
                self.already_checked_out_reply(employee, record)
            }
            Decision::Denied(denial) => {
                let (reason, message) = denial_reply(&denial);
                let mut reply = KioskReply::rejected(reason, message);
                reply.employee = Some(employee.into());
                reply
            }
        };
        Ok(reply)
    }

    fn already_checked_in_reply(&self, employee: &Employee, record: AttendanceRecord) -> KioskReply {
        let at = record
            .check_in_at
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        KioskReply {
            ok: true,
            reason: Some(reason::ALREADY_CHECKED_IN),
            message: format!("Already checked in at {at}"),
            employee: Some(employee.into()),
            attendance: Some((&record).into()),
            confidence: None,
            best_score: None,
        }
    }

    fn already_checked_out_reply(
        &self,
        employee: &Employee,
        record: AttendanceRecord,
    ) -> KioskReply {
        let at = record
            .check_out_at
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        KioskReply {
            ok: true,
            reason: Some(reason::ALREADY_CHECKED_OUT),
            message: format!("Already checked out at {at}"),
            employee: Some(employee.into()),
            attendance: Some((&record).into()),
            confidence: None,
            best_score: None,
        }
    }

    /// Enroll a face for an active employee: precise-mode extraction,
    /// photo persisted under the faces dir, index invalidated.
    pub async fn enroll(
        &self,
        employee_id: i64,
        image: Vec<u8>,
    ) -> Result<KioskReply, ServiceError> {
        let Some(employee) = self.store.employee(employee_id)? else {
            return Ok(KioskReply::rejected(
                reason::EMPLOYEE_NOT_FOUND,
                format!("Employee {employee_id} not found"),
            ));
        };
        if !employee.is_active {
            return Ok(KioskReply::rejected(
                reason::EMPLOYEE_INACTIVE,
                format!("Employee {} is inactive", employee.name),
            ));
        }

        let embedding = match self.engine.extract(image.clone(), AccuracyMode::Precise).await {
            Ok(e) => e,
            Err(EngineError::Extract(ExtractError::NoFaceDetected)) => {
                return Ok(KioskReply::rejected(
                    reason::NO_FACE_DETECTED,
                    "No face detected in the photo",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        std::fs::create_dir_all(&self.faces_dir)?;
        let filename = format!("{}.jpg", Uuid::new_v4());
        let photo_path = self.faces_dir.join(&filename);
        std::fs::write(&photo_path, &image)?;

        let face = self.store.add_face(
            employee_id,
            &embedding.to_bytes(),
            Some(&photo_path.to_string_lossy()),
        )?;

        self.audit(
            "enroll_face",
            "face_embedding",
            &format!("enrolled face {} for {}", face.id, employee.name),
            serde_json::json!({ "employee_id": employee_id, "face_id": face.id }),
        );
        self.index.invalidate();

        Ok(KioskReply {
            ok: true,
            reason: None,
            message: format!("Face enrolled for {}", employee.name),
            employee: Some((&employee).into()),
            attendance: None,
            confidence: None,
            best_score: None,
        })
    }

    pub fn list_faces(&self, employee_id: i64) -> Result<Vec<adsum_store::FaceRow>, ServiceError> {
        Ok(self.store.faces_for(employee_id)?)
    }

    /// Remove an enrolled face; the stored photo is deleted best-effort.
    pub fn remove_face(&self, employee_id: i64, face_id: i64) -> Result<bool, ServiceError> {
        let photo = match self.store.remove_face(employee_id, face_id) {
            Ok(photo) => photo,
            Err(StoreError::FaceNotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Some(path) = photo {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path, error = %e, "could not delete enrollment photo");
            }
        }
        self.audit(
            "remove_face",
            "face_embedding",
            &format!("removed face {face_id} of employee {employee_id}"),
            serde_json::json!({ "employee_id": employee_id, "face_id": face_id }),
        );
        self.index.invalidate();
        Ok(true)
    }

    /// End-of-day absence sweep. No-op on non-workdays and holidays;
    /// re-running never duplicates records.
    pub fn sweep_absences(&self, date: NaiveDate) -> Result<SweepReply, ServiceError> {
        let schedule = self.resolver.effective(date)?;
        if !schedule.attendance_applies() {
            let message = if schedule.is_holiday {
                format!("{date} is a holiday, nothing to sweep")
            } else {
                format!("{date} is not a workday, nothing to sweep")
            };
            return Ok(SweepReply {
                date,
                swept: false,
                inserted: 0,
                message,
            });
        }

        let inserted = self.store.sweep_absences(date)?;
        if inserted > 0 {
            self.audit(
                "sweep_absences",
                "attendance",
                &format!("marked {inserted} employees absent on {date}"),
                serde_json::json!({ "date": date, "inserted": inserted }),
            );
        }
        tracing::info!(%date, inserted, "absence sweep complete");
        Ok(SweepReply {
            date,
            swept: true,
            inserted,
            message: format!("Marked {inserted} employees absent"),
        })
    }

    /// Effective schedule for a date, for kiosk display.
    pub fn schedule_for(
        &self,
        date: NaiveDate,
    ) -> Result<adsum_core::EffectiveSchedule, ServiceError> {
        Ok(self.resolver.effective(date)?)
    }

    fn audit_transition(
        &self,
        action: &str,
        employee: &Employee,
        record: &AttendanceRecord,
        details: serde_json::Value,
    ) {
        let mut details = details;
        if let Some(obj) = details.as_object_mut() {
            obj.insert("employee_id".into(), serde_json::json!(employee.id));
            obj.insert("record_id".into(), serde_json::json!(record.id));
        }
        self.audit(
            action,
            "attendance",
            &format!("{action} {} on {}", employee.name, record.date),
            details,
        );
    }

    /// Audit failures must never fail the kiosk flow; log and continue.
    fn audit(&self, action: &str, entity: &str, description: &str, details: serde_json::Value) {
        if let Err(e) = self
            .store
            .audit(action, entity, description, KIOSK_ACTOR, details)
        {
            tracing::warn!(action, error = %e, "audit write failed");
        }
    }
}

fn denial_reply(denial: &Denial) -> (&'static str, String) {
    match denial {
        Denial::NotAWorkday => (reason::NOT_A_WORKDAY, "Today is not a workday".to_string()),
        Denial::IsHoliday => (reason::IS_HOLIDAY, "Today is a holiday".to_string()),
        Denial::OutOfWindow { check_in_start } => (
            reason::OUT_OF_WINDOW,
            format!(
                "Outside attendance hours ({}-23:59)",
                check_in_start.format("%H:%M")
            ),
        ),
        Denial::NoCheckInYet => (
            reason::NO_CHECK_IN_YET,
            "No check-in recorded today".to_string(),
        ),
        Denial::TooSoonToCheckout { minutes_remaining } => (
            reason::TOO_SOON_TO_CHECKOUT,
            format!("Check-out available in {minutes_remaining} minute(s)"),
        ),
    }
}
