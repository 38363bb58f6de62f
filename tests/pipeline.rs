//! End-to-end search jobs against the in-memory store with real encrypted
//! archives.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use zip::write::SimpleFileOptions;
use zip::{AesMode, ZipWriter};

use zipsweep::config::Config;
use zipsweep::identifiers::IdentifierFormat;
use zipsweep::jobs::JobRegistry;
use zipsweep::models::{
    Credentials, DiagnosticKind, JobId, JobSnapshot, JobStatus, SearchRequest,
};
use zipsweep::report;
use zipsweep::storage::memory::{MemoryProvider, MemoryStore};

const PASSWORD: &str = "correct horse";

fn encrypted_zip(files: &[(&str, &str)], password: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().with_aes_encryption(AesMode::Aes256, password);
    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn registry(store: Arc<MemoryStore>) -> JobRegistry {
    let mut config = Config::default();
    config.search.archive_timeout_secs = 5;
    JobRegistry::new(Arc::new(config), Arc::new(MemoryProvider::new(store)))
}

fn request(prefix: &str, identifiers: &str) -> SearchRequest {
    SearchRequest {
        credentials: Credentials {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            region: None,
            session_token: None,
        },
        bucket: "exports".into(),
        prefix: prefix.into(),
        password: Some(PASSWORD.into()),
        identifiers: identifiers.into(),
        format: IdentifierFormat::Line,
    }
}

/// Poll like a client would, checking that progress never goes backwards.
async fn wait(registry: &JobRegistry, id: &JobId) -> JobSnapshot {
    let mut last = 0;
    for _ in 0..400 {
        let snap = registry.status(id).expect("job exists");
        assert!(snap.progress >= last, "progress went from {} to {}", last, snap.progress);
        last = snap.progress;
        if snap.status.is_terminal() {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job did not finish");
}

fn seed(store: &MemoryStore) {
    store.put_object(
        "exports",
        "2024/jan/batch1.zip",
        encrypted_zip(
            &[
                ("report.txt", "Customer CUST-001 renewed. CUST-0010 did not."),
                ("data/rows.csv", "id,name\nCUST-002,Acme\n"),
                ("logo.png", "CUST-001"),
            ],
            PASSWORD,
        ),
    );
    store.put_object(
        "exports",
        "2024/jan/batch2.zip",
        encrypted_zip(&[("notes.md", "follow up with cust-001")], PASSWORD),
    );
    store.put_object(
        "exports",
        "2024/feb/broken.zip",
        encrypted_zip(&[("a.txt", "CUST-002")], "some other password"),
    );
    store.put_object(
        "exports",
        "2024/feb/batch3.zip",
        encrypted_zip(&[("x.json", "{\"customer\": \"CUST-002\"}")], PASSWORD),
    );
    store.put_object("exports", "2024/feb/readme.txt", b"CUST-001".to_vec());
}

#[tokio::test]
async fn finds_identifiers_across_folders() {
    let store = Arc::new(MemoryStore::with_page_size(2));
    seed(&store);
    let registry = registry(store);

    let id = registry
        .submit(request("2024/", "CUST-001\nCUST-002\nCUST-999\n"))
        .unwrap();
    let snap = wait(&registry, &id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.progress, 100);
    assert_eq!(snap.folders_total, 2);
    assert_eq!(snap.archives_scanned, 3);
    assert_eq!(snap.archives_skipped, 1);
    assert_eq!(snap.diagnostics[0].key, "2024/feb/broken.zip");
    assert_eq!(snap.diagnostics[0].kind, DiagnosticKind::WrongPassword);

    // `feb/` sorts before `jan/`, so CUST-002 is discovered first.
    let ids: Vec<_> = snap.results.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, vec!["CUST-002", "CUST-001"]);

    let cust1: Vec<_> = snap.results[1]
        .occurrences
        .iter()
        .map(|o| (o.archive_key.as_str(), o.entry_path.as_str()))
        .collect();
    assert_eq!(
        cust1,
        vec![
            ("2024/jan/batch1.zip", "report.txt"),
            ("2024/jan/batch2.zip", "notes.md"),
        ]
    );

    let csv = report::to_csv(&snap.results).unwrap();
    assert_eq!(
        csv,
        "Identifier,Zip File,File in Zip,S3 Path\n\
         CUST-002,batch3.zip,x.json,s3://exports/2024/feb/batch3.zip\n\
         CUST-002,batch1.zip,data/rows.csv,s3://exports/2024/jan/batch1.zip\n\
         CUST-001,batch1.zip,report.txt,s3://exports/2024/jan/batch1.zip\n\
         CUST-001,batch2.zip,notes.md,s3://exports/2024/jan/batch2.zip"
    );
}

#[tokio::test]
async fn rerun_gives_identical_results() {
    let store = Arc::new(MemoryStore::new());
    seed(&store);
    let registry = registry(store);

    let first = registry.submit(request("2024/", "CUST-001\nCUST-002")).unwrap();
    let second = registry.submit(request("2024/", "CUST-001\nCUST-002")).unwrap();
    assert_ne!(first, second);

    let a = wait(&registry, &first).await;
    let b = wait(&registry, &second).await;
    assert_eq!(a.results, b.results);
    assert_eq!(registry.list().len(), 2);
}

#[tokio::test]
async fn missing_password_is_a_per_archive_skip() {
    let store = Arc::new(MemoryStore::new());
    seed(&store);
    let registry = registry(store);

    let mut req = request("2024/jan/", "CUST-001");
    req.password = None;
    let id = registry.submit(req).unwrap();
    let snap = wait(&registry, &id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.archives_skipped, 2);
    assert!(snap
        .diagnostics
        .iter()
        .all(|d| d.kind == DiagnosticKind::PasswordRequired));
    assert!(snap.results.is_empty());
}

#[tokio::test]
async fn download_failure_is_recorded_and_search_continues() {
    let store = Arc::new(MemoryStore::new());
    seed(&store);
    store.fail_key("2024/jan/batch1.zip");
    let registry = registry(store);

    let id = registry.submit(request("2024/jan/", "CUST-001")).unwrap();
    let snap = wait(&registry, &id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.diagnostics[0].kind, DiagnosticKind::Download);
    assert_eq!(snap.results.len(), 1);
    assert_eq!(snap.results[0].occurrences[0].archive_key, "2024/jan/batch2.zip");
}

fn occurrences(snap: &JobSnapshot) -> usize {
    snap.results.iter().map(|r| r.occurrences.len()).sum()
}

#[tokio::test]
async fn failed_job_keeps_results_merged_before_the_failure() {
    let store = Arc::new(MemoryStore::new());
    store.put_object(
        "exports",
        "a/first.zip",
        encrypted_zip(&[("log.txt", "ticket CUST-001 opened")], PASSWORD),
    );
    store.put_object(
        "exports",
        "a/second.zip",
        encrypted_zip(&[("log.txt", "ticket CUST-001 closed")], PASSWORD),
    );
    store.put_object(
        "exports",
        "b/third.zip",
        encrypted_zip(&[("log.txt", "CUST-001")], PASSWORD),
    );
    store.delay_key("a/second.zip", Duration::from_millis(800));
    store.fail_listing("b/");
    let registry = registry(store);

    let id = registry.submit(request("", "CUST-001")).unwrap();

    // The first archive is merged while the second is still downloading.
    let mut partial = None;
    for _ in 0..30 {
        let snap = registry.status(&id).unwrap();
        if snap.status == JobStatus::Processing && occurrences(&snap) > 0 {
            partial = Some(snap);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let partial = partial.expect("partial results visible while processing");
    assert_eq!(occurrences(&partial), 1);
    assert_eq!(partial.results[0].occurrences[0].archive_key, "a/first.zip");
    assert!(partial.progress < 100);

    let snap = wait(&registry, &id).await;
    assert_eq!(snap.status, JobStatus::Failed);
    let error = snap.error.clone().unwrap_or_default();
    assert!(error.contains("failed to list s3://exports/b/"), "error: {}", error);
    assert_eq!(snap.folders_total, 2);
    assert_eq!(snap.archives_scanned, 2);
    assert_eq!(occurrences(&snap), 2);
    let keys: Vec<_> = snap.results[0]
        .occurrences
        .iter()
        .map(|o| o.archive_key.as_str())
        .collect();
    assert_eq!(keys, vec!["a/first.zip", "a/second.zip"]);

    let csv = registry.report_csv(&id).unwrap().unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[tokio::test]
async fn cancel_stops_a_running_job() {
    let store = Arc::new(MemoryStore::new());
    seed(&store);
    store.delay_key("2024/feb/batch3.zip", Duration::from_secs(2));
    store.delay_key("2024/feb/broken.zip", Duration::from_secs(2));
    let registry = registry(store);

    let id = registry.submit(request("2024/", "CUST-001")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.cancel(&id), Some(true));

    let snap = wait(&registry, &id).await;
    assert_eq!(snap.status, JobStatus::Cancelled);
    assert!(snap.progress < 100);
    assert_eq!(registry.cancel(&id), Some(false));
}

#[tokio::test]
async fn unknown_job_is_none() {
    let registry = registry(Arc::new(MemoryStore::new()));
    let id = uuid::Uuid::new_v4();
    assert!(registry.status(&id).is_none());
    assert!(registry.cancel(&id).is_none());
    assert!(registry.report_csv(&id).is_none());
}
