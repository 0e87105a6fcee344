use chrono::Duration;
use facts_core::Catalog;
use facts_core::model::{
    FactKey, FactRecordSet, FactResponse, ResponseOutcome, RunId, RunStatus, TrainingRun,
};
use facts_core::time::fixed_now;
use storage::repository::{FactRecordRepository, StorageError, TrainingRunRepository};
use storage::sqlite::SqliteRepository;

async fn repo(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn answered(records: &mut FactRecordSet, fact: FactKey, outcome: ResponseOutcome) -> FactResponse {
    let now = fixed_now();
    let record = records.get_mut(fact).expect("catalog fact");
    let snapshot = record.snapshot();
    record.apply_response(outcome, 2_500, now);
    FactResponse {
        fact,
        snapshot,
        outcome,
        response_time_ms: 2_500,
        answered_at: now,
    }
}

#[tokio::test]
async fn sqlite_roundtrips_fact_records() {
    let repo = repo("memdb_records").await;
    assert!(repo.load_records().await.unwrap().is_empty());

    let now = fixed_now();
    let mut records = FactRecordSet::defaults_for(&Catalog::standard(), now);
    for _ in 0..3 {
        records
            .get_mut(FactKey::new(7, 8))
            .unwrap()
            .apply_response(ResponseOutcome::Correct, 3_200, now);
    }
    records
        .get_mut(FactKey::new(6, 9))
        .unwrap()
        .apply_response(ResponseOutcome::TimedOut, 30_000, now);

    repo.save_records(&records).await.unwrap();
    let loaded = repo.load_records().await.unwrap();
    assert_eq!(loaded.len(), 100);
    assert_eq!(loaded, records);

    let promoted = loaded.get(FactKey::new(7, 8)).unwrap();
    assert_eq!(promoted.leitner_box.value(), 2);
    assert_eq!(promoted.next_practice_due, now + Duration::days(1));
}

#[tokio::test]
async fn sqlite_save_is_idempotent_and_keeps_absent_records() {
    let repo = repo("memdb_idempotent").await;
    let now = fixed_now();
    let records = FactRecordSet::defaults_for(&Catalog::standard(), now);
    repo.save_records(&records).await.unwrap();
    repo.save_records(&records).await.unwrap();

    let partial: FactRecordSet = records
        .iter()
        .filter(|r| r.fact.multiplicand() == 1)
        .cloned()
        .collect();
    repo.save_records(&partial).await.unwrap();

    assert_eq!(repo.load_records().await.unwrap(), records);
}

#[tokio::test]
async fn sqlite_active_run_resumes_with_responses() {
    let repo = repo("memdb_active").await;
    let now = fixed_now();
    let mut records = FactRecordSet::defaults_for(&Catalog::standard(), now);

    let mut run = TrainingRun::start(RunId::generate(), now);
    repo.save_active_run(&run).await.unwrap();
    run.push_response(
        answered(&mut records, FactKey::new(2, 2), ResponseOutcome::Correct),
        10,
    )
    .unwrap();
    run.push_response(
        answered(&mut records, FactKey::new(3, 3), ResponseOutcome::Wrong),
        -5,
    )
    .unwrap();
    repo.save_active_run(&run).await.unwrap();

    let resumed = repo.load_active_run().await.unwrap().expect("active run");
    assert_eq!(resumed, run);
    assert_eq!(resumed.score(), 5);
    assert_eq!(resumed.responses()[1].snapshot.attempts, 0);
}

#[tokio::test]
async fn sqlite_rejects_second_active_run() {
    let repo = repo("memdb_conflict").await;
    let first = TrainingRun::start(RunId::generate(), fixed_now());
    let second = TrainingRun::start(RunId::generate(), fixed_now());

    repo.save_active_run(&first).await.unwrap();
    let err = repo.save_active_run(&second).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
async fn sqlite_archive_completes_run_and_trims_history() {
    let repo = repo("memdb_history").await;
    let start = fixed_now();

    let mut ids = Vec::new();
    for i in 0..4 {
        let started = start + Duration::minutes(i * 10);
        let mut run = TrainingRun::start(RunId::generate(), started);
        repo.save_active_run(&run).await.unwrap();
        run.complete(started + Duration::minutes(5)).unwrap();
        repo.archive_run(&run, 3).await.unwrap();
        ids.push(run.id());
    }

    assert!(repo.load_active_run().await.unwrap().is_none());

    let history = repo.list_completed_runs(10).await.unwrap();
    let got: Vec<_> = history.iter().map(TrainingRun::id).collect();
    assert_eq!(got, vec![ids[3], ids[2], ids[1]]);
    assert!(history.iter().all(|r| r.status() == RunStatus::Completed));

    // An archived run can no longer be written.
    let err = repo.archive_run(&history[0], 3).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}
