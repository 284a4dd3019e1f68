//! adsum-core — Attendance kiosk domain core.
//!
//! Holds the in-memory face matching index, the schedule resolver and the
//! attendance decision logic. Persistence and inference live in sibling
//! crates; this crate only sees their data through small traits.

pub mod attendance;
pub mod index;
pub mod schedule;
pub mod types;

pub use index::{EmbeddingSource, EnrolledFace, FaceIndex, MatchOutcome};
pub use schedule::{DaySchedule, EffectiveSchedule, ScheduleResolver, WorkSettings};
pub use types::{AttendanceRecord, AttendanceStatus, Embedding, Employee};
