//! Attendance ledger: idempotent commits plus the read side used by reports.

use crate::store::{AttendanceEntry, Repository, StoreError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rollcall_core::api::{AttendanceRecord, DashboardStats};
use rollcall_core::{Period, RecognizedFace};
use std::sync::Arc;

/// What a commit did. `recorded` counts net-new rows; re-recognizing a
/// student already present for the period is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub recorded: usize,
    pub attempted: usize,
}

pub struct AttendanceLedger {
    repo: Arc<dyn Repository>,
}

impl AttendanceLedger {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Commit `matches` for `period` on `date`, stamped with the current
    /// local time. All rows land or none do.
    pub async fn record(
        &self,
        matches: &[RecognizedFace],
        period: &Period,
        date: NaiveDate,
    ) -> Result<RecordOutcome, StoreError> {
        self.record_at(matches, period, date, chrono::Local::now().time()).await
    }

    async fn record_at(
        &self,
        matches: &[RecognizedFace],
        period: &Period,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RecordOutcome, StoreError> {
        let time = time.format("%H:%M:%S").to_string();
        let entries: Vec<_> = matches
            .iter()
            .map(|m| AttendanceEntry {
                student_name: m.student_name.clone(),
                date,
                period: period.clone(),
                time: time.clone(),
                confidence: m.confidence,
            })
            .collect();

        let attempted = entries.len();
        let recorded = self.repo.upsert_attendance(entries).await?;
        tracing::info!(%period, %date, recorded, attempted, "attendance committed");
        Ok(RecordOutcome { recorded, attempted })
    }

    pub async fn attendance_on(
        &self,
        date: NaiveDate,
        period: Option<Period>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.repo.attendance_on(date, period).await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.repo.recent_activity(limit).await
    }

    /// Dashboard figures as of `now` (local time).
    pub async fn stats(&self, now: NaiveDateTime) -> Result<DashboardStats, StoreError> {
        let total_students = self.repo.count_students().await?;
        let today_attendance = self.repo.count_present(now.date()).await?;
        let attendance_rate = if total_students == 0 {
            0
        } else {
            ((today_attendance as f64 / total_students as f64) * 100.0).round() as u32
        };
        Ok(DashboardStats {
            total_students,
            today_attendance,
            attendance_rate,
            current_period: Period::for_hour(now.hour()).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewEnrollment, SqliteStore};
    use rollcall_core::{BoundingBox, FeatureVector, FEATURE_DIM};

    fn hit(id: i64, name: &str, confidence: f32) -> RecognizedFace {
        RecognizedFace {
            bounding_box: BoundingBox::new(20.0, 20.0, 10.0, 10.0),
            student_id: id,
            student_name: name.to_string(),
            distance: 0.1,
            confidence,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn ledger() -> (Arc<SqliteStore>, AttendanceLedger) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let ledger = AttendanceLedger::new(store.clone());
        (store, ledger)
    }

    #[tokio::test]
    async fn test_record_twice_keeps_one_row() {
        let (_store, ledger) = ledger().await;
        let period = Period::new("9-10 AM").unwrap();
        let matches = [hit(1, "Alice", 0.9)];

        let first = ledger.record_at(&matches, &period, date(), at(9, 5)).await.unwrap();
        assert_eq!(first, RecordOutcome { recorded: 1, attempted: 1 });
        let second = ledger.record_at(&matches, &period, date(), at(9, 20)).await.unwrap();
        assert_eq!(second, RecordOutcome { recorded: 0, attempted: 1 });

        let rows = ledger.attendance_on(date(), Some(period)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, "09:05:00");
    }

    #[tokio::test]
    async fn test_other_period_is_a_new_row() {
        let (_store, ledger) = ledger().await;
        let matches = [hit(1, "Alice", 0.9)];
        let nine = Period::new("9-10 AM").unwrap();
        let ten = Period::new("10-11 AM").unwrap();

        ledger.record_at(&matches, &nine, date(), at(9, 5)).await.unwrap();
        let outcome = ledger.record_at(&matches, &ten, date(), at(10, 5)).await.unwrap();
        assert_eq!(outcome.recorded, 1);
        assert_eq!(ledger.attendance_on(date(), None).await.unwrap().len(), 2);
        assert_eq!(ledger.recent(1).await.unwrap()[0].period, "10-11 AM");
    }

    #[tokio::test]
    async fn test_empty_commit() {
        let (_store, ledger) = ledger().await;
        let outcome = ledger.record(&[], &Period::new("9-10 AM").unwrap(), date()).await.unwrap();
        assert_eq!(outcome, RecordOutcome { recorded: 0, attempted: 0 });
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, ledger) = ledger().await;
        for name in ["Alice", "Bob", "Carol"] {
            store
                .upsert_signature(NewEnrollment {
                    student_name: name.to_string(),
                    folder_path: String::new(),
                    photo_count: 10,
                    features: FeatureVector::new(vec![0.0; FEATURE_DIM]).unwrap(),
                })
                .await
                .unwrap();
        }
        let nine = Period::new("9-10 AM").unwrap();
        let ten = Period::new("10-11 AM").unwrap();
        ledger.record_at(&[hit(1, "Alice", 0.9)], &nine, date(), at(9, 5)).await.unwrap();
        ledger.record_at(&[hit(1, "Alice", 0.9)], &ten, date(), at(10, 5)).await.unwrap();

        let stats = ledger.stats(date().and_time(at(10, 30))).await.unwrap();
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.today_attendance, 1);
        assert_eq!(stats.attendance_rate, 33);
        assert_eq!(stats.current_period, "10-11 AM");

        let evening = ledger.stats(date().and_time(at(19, 0))).await.unwrap();
        assert_eq!(evening.current_period, "After Hours");
    }

    #[tokio::test]
    async fn test_stats_with_no_students() {
        let (_store, ledger) = ledger().await;
        let stats = ledger.stats(date().and_time(at(9, 0))).await.unwrap();
        assert_eq!(stats.attendance_rate, 0);
    }
}
