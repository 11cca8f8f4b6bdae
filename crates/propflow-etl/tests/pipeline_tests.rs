//! End-to-end pipeline runs against in-memory collaborators

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{
    assessor_rows, corrupt_content, init_tracing, read_zip, stored_zip_bytes, zip_bytes, FakeSink, FakeSource,
};
use propflow_etl::config::{AppConfig, ConfigFormat};
use propflow_etl::pipeline::{DatasetStatus, EtlPipeline};
use propflow_etl::upload::SinkKind;

fn config(root: &Path, datasets: serde_json::Value) -> AppConfig {
    let json = serde_json::json!({
        "states": ["CA", "TX"],
        "directories": {
            "downloads": root.join("downloads"),
            "extracted": root.join("extracted"),
            "filtered": root.join("filtered"),
            "processed": root.join("processed"),
        },
        "retry": { "max_attempts": 2, "base_delay_secs": 0, "max_delay_secs": 0 },
        "datasets": datasets,
    });
    AppConfig::parse_str(&json.to_string(), ConfigFormat::Json).unwrap()
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect()
}

fn assessor_source() -> Arc<FakeSource> {
    Arc::new(
        FakeSource::new()
            .with_file(
                "/outgoing/A_CA_TAXASSESSOR_0001.zip",
                zip_bytes(&[("ASSESSOR_0001.txt", assessor_rows().as_slice())]),
            )
            .with_file("/outgoing/A_NV_TAXASSESSOR_0001.zip", zip_bytes(&[("x.txt", b"x".as_slice())])),
    )
}

#[tokio::test]
async fn test_end_to_end_keeps_requested_partitions() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(
        root,
        serde_json::json!([{
            "name": "Assessor",
            "ftp_folder": "/outgoing",
            "save_mode": "both",
            "delete_local_after_remote_save": false
        }]),
    );

    let store = Arc::new(FakeSink::new(SinkKind::ObjectStore));
    let pipeline = EtlPipeline::new(config, CancellationToken::new())
        .with_source(assessor_source())
        .with_object_store(store.clone());

    let summary = pipeline.run().await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(!summary.has_failures());

    let outcome = &summary.datasets[0];
    assert_eq!(outcome.downloaded, 1);
    assert_eq!(outcome.archives_built, 1);
    assert_eq!(outcome.archives_verified, 1);

    // One archive holding one file: header, then CA and TX rows in order
    let archives = files_with_extension(&root.join("filtered"), "zip");
    assert_eq!(archives.len(), 1);
    let name = archives[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("Assessor_ASSESSOR_0001_"));
    assert_eq!(store.uploaded_names(), vec![name]);

    let entries = read_zip(&archives[0]);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "ASSESSOR_0001_filtered_CA_TX.txt");
    assert_eq!(
        String::from_utf8(entries[0].1.clone()).unwrap(),
        "PropertyID\tSitusStateCode\tValue\n1\tCA\t100\n2\tTX\t200\n4\tCA\t400\n5\tTX\t500\n"
    );

    // Default post-processing removes the download, staging and filtered text
    assert!(files_with_extension(&root.join("downloads"), "zip").is_empty());
    assert!(files_with_extension(&root.join("filtered"), "txt").is_empty());
    assert!(!root.join("extracted/A_CA_TAXASSESSOR_0001").exists());
}

#[tokio::test]
async fn test_move_policies_keep_files_in_processed() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(
        root,
        serde_json::json!([{
            "name": "Assessor",
            "ftp_folder": "/outgoing",
            "partition_keys": ["CA"],
            "post_download": "move",
            "post_filter": "move",
            "save_mode": "local"
        }]),
    );

    let pipeline = EtlPipeline::new(config, CancellationToken::new()).with_source(assessor_source());
    let summary = pipeline.run().await;
    assert_eq!(summary.succeeded, 1);

    let processed = root.join("processed");
    assert!(processed.join("A_CA_TAXASSESSOR_0001.zip").exists());
    assert!(processed.join("ASSESSOR_0001_filtered_CA.txt").exists());
    // Nothing verified, so the archive stays local
    assert_eq!(files_with_extension(&root.join("filtered"), "zip").len(), 1);
}

#[tokio::test]
async fn test_summary_counts_each_status() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(
        root,
        serde_json::json!([
            { "name": "Assessor", "ftp_folder": "/outgoing", "save_mode": "local" },
            { "name": "Recorder", "enabled": false, "ftp_folder": "/outgoing" },
            { "name": "Deed", "ftp_folder": "/empty" },
            { "name": "Parcel", "urls": ["https://example.invalid/parcel.zip"] }
        ]),
    );

    // No HTTP client attached, so the URL dataset cannot resolve its targets
    let pipeline = EtlPipeline::new(config, CancellationToken::new()).with_source(assessor_source());
    let summary = pipeline.run().await;

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 1);
    assert!(summary.has_failures());

    let statuses: Vec<DatasetStatus> = summary.datasets.iter().map(|d| d.status).collect();
    assert_eq!(
        statuses,
        vec![
            DatasetStatus::Succeeded,
            DatasetStatus::Skipped,
            DatasetStatus::Skipped,
            DatasetStatus::Failed
        ]
    );
    assert!(summary.datasets[3].error.is_some());
}

#[tokio::test]
async fn test_cancelled_run_skips_remaining_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        dir.path(),
        serde_json::json!([{ "name": "Assessor", "ftp_folder": "/outgoing" }]),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = EtlPipeline::new(config, cancel)
        .with_source(assessor_source())
        .run()
        .await;
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_file_without_requested_rows_still_gets_an_archive() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(
        root,
        serde_json::json!([{ "name": "Assessor", "ftp_folder": "/outgoing", "save_mode": "local" }]),
    );
    let rows = b"PropertyID\tSitusStateCode\tValue\n1\tNV\t100\n".as_slice();
    let source = Arc::new(FakeSource::new().with_file(
        "/outgoing/A_CA_TAXASSESSOR_0003.zip",
        zip_bytes(&[("ASSESSOR_0003.txt", rows)]),
    ));

    let summary = EtlPipeline::new(config, CancellationToken::new())
        .with_source(source)
        .run()
        .await;
    assert_eq!(summary.datasets[0].status, DatasetStatus::Succeeded);
    assert_eq!(summary.datasets[0].archives_built, 1);

    let archives = files_with_extension(&root.join("filtered"), "zip");
    assert_eq!(archives.len(), 1);
    let entries = read_zip(&archives[0]);
    assert_eq!(entries[0].0, "ASSESSOR_0003_filtered_CA_TX.txt");
    assert_eq!(entries[0].1, b"PropertyID\tSitusStateCode\tValue\n");
}

#[tokio::test]
async fn test_same_extracted_stem_in_two_downloads_keeps_both_archives() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(root, serde_json::json!([{ "name": "Assessor", "ftp_folder": "/outgoing" }]));
    let source = Arc::new(
        FakeSource::new()
            .with_file(
                "/outgoing/A_CA_TAXASSESSOR_0001.zip",
                zip_bytes(&[("ASSESSOR_0001.txt", assessor_rows().as_slice())]),
            )
            .with_file(
                "/outgoing/A_TX_TAXASSESSOR_0001.zip",
                zip_bytes(&[("ASSESSOR_0001.txt", assessor_rows().as_slice())]),
            ),
    );
    let store = Arc::new(FakeSink::new(SinkKind::ObjectStore));

    let summary = EtlPipeline::new(config, CancellationToken::new())
        .with_source(source)
        .with_object_store(store.clone())
        .run()
        .await;
    let outcome = &summary.datasets[0];
    assert_eq!(outcome.downloaded, 2);
    assert_eq!(outcome.archives_built, 2);
    assert_eq!(outcome.archives_verified, 2);

    let names = store.uploaded_names();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("Assessor_ASSESSOR_0001_"));
    assert!(names[1].starts_with("Assessor_A_TX_TAXASSESSOR_0001_ASSESSOR_0001_"));
}

#[tokio::test]
async fn test_fips_dataset_delivers_selected_county_archives() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(
        root,
        serde_json::json!([{
            "name": "Parcel",
            "urls": ["/outgoing/PARCEL_COUNTIES.zip"],
            "fips_codes": ["06037"]
        }]),
    );

    let los_angeles = zip_bytes(&[("parcels.txt", b"apn\n1\n".as_slice())]);
    let harris = zip_bytes(&[("parcels.txt", b"apn\n2\n".as_slice())]);
    let source = Arc::new(FakeSource::new().with_file(
        "/outgoing/PARCEL_COUNTIES.zip",
        zip_bytes(&[
            ("counties/06037.zip", los_angeles.as_slice()),
            ("counties/48201.zip", harris.as_slice()),
            ("README.txt", b"county extracts".as_slice()),
        ]),
    ));
    let store = Arc::new(FakeSink::new(SinkKind::ObjectStore));

    let summary = EtlPipeline::new(config, CancellationToken::new())
        .with_source(source)
        .with_object_store(store.clone())
        .run()
        .await;
    let outcome = &summary.datasets[0];
    assert_eq!(outcome.status, DatasetStatus::Succeeded);
    assert_eq!(outcome.archives_built, 1);
    assert_eq!(store.uploaded_names(), vec!["fips_06037.zip"]);
    assert_eq!(store.uploads.lock().unwrap()[0].local_path, root.join("filtered/fips_06037.zip"));

    // Verified upload removed the copy; download and staging are cleaned up
    assert!(!root.join("filtered/fips_06037.zip").exists());
    assert!(!root.join("downloads/PARCEL_COUNTIES.zip").exists());
    assert!(!root.join("extracted/PARCEL_COUNTIES").exists());
}

#[tokio::test]
async fn test_corrupt_download_fails_dataset_and_is_kept() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = config(root, serde_json::json!([{ "name": "Assessor", "ftp_folder": "/outgoing" }]));
    let rows = assessor_rows();
    let source = Arc::new(FakeSource::new().with_file(
        "/outgoing/A_CA_TAXASSESSOR_0004.zip",
        corrupt_content(stored_zip_bytes("ASSESSOR_0004.txt", &rows), &rows),
    ));

    let summary = EtlPipeline::new(config, CancellationToken::new())
        .with_source(source)
        .run()
        .await;
    let outcome = &summary.datasets[0];
    assert_eq!(outcome.status, DatasetStatus::Failed);
    assert_eq!(outcome.downloaded, 1);
    assert_eq!(outcome.archives_built, 0);
    assert!(root.join("downloads/A_CA_TAXASSESSOR_0004.zip").exists());
    assert!(!root.join("extracted/A_CA_TAXASSESSOR_0004").exists());
}
