use rollcall_store::{AttendanceStatus, AttendanceStore, RecordOutcome};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn setup_store() -> (TempDir, AttendanceStore) {
    let tmp = TempDir::new().unwrap();
    let store = AttendanceStore::open(&tmp.path().join("nested").join("attendance.db")).unwrap();
    (tmp, store)
}

#[test]
fn test_record_once_per_meeting() {
    let (_tmp, store) = setup_store();

    let first = store.record_attendance("C1", "S1", "Ann", 1);
    assert!(matches!(first, RecordOutcome::Recorded { .. }));

    let second = store.record_attendance("C1", "S1", "Ann", 1);
    assert!(second.is_success());
    assert_eq!(second.message(), "already recorded");
    assert_eq!(second.id(), first.id());

    let records = store.records("C1", None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Pending);
}

#[test]
fn test_same_person_other_meeting_and_class() {
    let (_tmp, store) = setup_store();

    store.record_attendance("C1", "S1", "Ann", 1);
    assert!(matches!(
        store.record_attendance("C1", "S1", "Ann", 2),
        RecordOutcome::Recorded { .. }
    ));
    assert!(matches!(
        store.record_attendance("C2", "S1", "Ann", 1),
        RecordOutcome::Recorded { .. }
    ));

    assert_eq!(store.records("C1", None).unwrap().len(), 2);
    assert_eq!(store.records("C1", Some(2)).unwrap().len(), 1);
    assert_eq!(store.records("C2", None).unwrap().len(), 1);
    assert_eq!(store.classes().unwrap(), vec!["C1".to_string(), "C2".to_string()]);
}

#[test]
fn test_records_ordered_by_meeting() {
    let (_tmp, store) = setup_store();

    store.record_attendance("C1", "S2", "Budi", 3);
    store.record_attendance("C1", "S1", "Ann", 1);
    store.record_attendance("C1", "S3", "Citra", 2);

    let meetings: Vec<u32> = store
        .records("C1", None)
        .unwrap()
        .iter()
        .map(|r| r.meeting)
        .collect();
    assert_eq!(meetings, vec![1, 2, 3]);
}

#[test]
fn test_concurrent_recording_writes_one_row() {
    let (_tmp, store) = setup_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.record_attendance("C1", "S1", "Ann", 1))
        })
        .collect();
    let outcomes: Vec<RecordOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let recorded = outcomes
        .iter()
        .filter(|o| matches!(o, RecordOutcome::Recorded { .. }))
        .count();
    assert_eq!(recorded, 1);
    assert!(outcomes.iter().all(RecordOutcome::is_success));
    assert_eq!(store.records("C1", None).unwrap().len(), 1);
}

#[test]
fn test_mark_synced_exact_ids() {
    let (_tmp, store) = setup_store();

    let a = store.record_attendance("C1", "S1", "Ann", 1).id().unwrap();
    let b = store.record_attendance("C1", "S2", "Budi", 1).id().unwrap();
    let c = store.record_attendance("C1", "S3", "Citra", 1).id().unwrap();

    assert_eq!(store.mark_synced("C1", &[a, c, 9999]).unwrap(), 2);
    assert_eq!(store.pending_ids("C1").unwrap(), vec![b]);

    let statuses: Vec<(i64, AttendanceStatus)> = store
        .records("C1", None)
        .unwrap()
        .into_iter()
        .map(|r| (r.id, r.status))
        .collect();
    assert!(statuses.contains(&(a, AttendanceStatus::Success)));
    assert!(statuses.contains(&(b, AttendanceStatus::Pending)));
    assert!(statuses.contains(&(c, AttendanceStatus::Success)));

    assert_eq!(store.mark_synced("C1", &[]).unwrap(), 0);
}

#[test]
fn test_sync_pending_and_summary() {
    let (_tmp, store) = setup_store();

    store.record_attendance("C1", "S1", "Ann", 1);
    store.record_attendance("C1", "S2", "Budi", 1);
    store.record_attendance("C1", "S1", "Ann", 2);

    let before = store.summary("C1").unwrap();
    assert_eq!(before.records, 3);
    assert_eq!(before.pending, 3);
    assert_eq!(before.synced, 0);
    assert_eq!(before.meetings, 2);
    assert_eq!(before.identities, 2);

    assert_eq!(store.sync_pending("C1").unwrap(), 3);
    assert_eq!(store.sync_pending("C1").unwrap(), 0);

    let after = store.summary("C1").unwrap();
    assert_eq!(after.pending, 0);
    assert_eq!(after.synced, 3);
}

#[test]
fn test_reopen_keeps_records() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("attendance.db");
    {
        let store = AttendanceStore::open(&path).unwrap();
        store.record_attendance("C1", "S1", "Ann", 1);
    }
    let store = AttendanceStore::open(&path).unwrap();
    assert_eq!(
        store.record_attendance("C1", "S1", "Ann", 1).message(),
        "already recorded"
    );
}
