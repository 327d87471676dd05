//! rollcall-store — SQLite attendance storage.
//!
//! One table per class (`attendance_<class_code>`), at most one record per
//! person per meeting, and a local pending → success status flip for sync.

pub mod record;
pub mod store;

pub use record::{AttendanceRecord, AttendanceStatus, ClassSummary, RecordOutcome};
pub use store::{AttendanceStore, StoreError};
