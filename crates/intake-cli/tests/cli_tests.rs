//! Command runs against a file-backed store in a temp directory.

use clap::Parser;
use intake_cli::{exit, run, Cli};
use std::path::Path;

fn write_config(dir: &Path) -> String {
    let config = format!(
        "generation:\n  provider: heuristic\nstore:\n  backend: file\n  path: {}\n",
        dir.join("store").display()
    );
    let path = dir.join("intake.yaml");
    std::fs::write(&path, config).unwrap();
    path.display().to_string()
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("intake").chain(args.iter().copied())).unwrap()
}

#[tokio::test]
async fn test_process_literal_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let code = run(cli(&[
        "--config",
        &config,
        "process",
        "--input",
        "Subject: RFQ Request\nBody: We need 500 units",
        "--conversation",
        "buyer-42",
    ]))
    .await
    .unwrap();
    assert_eq!(code, exit::OK);

    let conversation = intake_context::conversation_id_for(Some("buyer-42"));
    let code = run(cli(&["--config", &config, "history", "--conversation", &conversation]))
        .await
        .unwrap();
    assert_eq!(code, exit::OK);
    assert!(dir.path().join("store").is_dir());
}

#[tokio::test]
async fn test_process_fixture_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../testing/fixtures/inputs/invoice.json");

    let code = run(cli(&["--config", &config, "process", "--input", fixture.to_str().unwrap()]))
        .await
        .unwrap();
    assert_eq!(code, exit::OK);
}

#[tokio::test]
async fn test_rejections_map_to_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let blob = dir.path().join("blob.bin");
    std::fs::write(&blob, [0u8, 1, 2, 3, 0xff, 0xfe, 0, 0]).unwrap();
    let code = run(cli(&["--config", &config, "process", "--input", blob.to_str().unwrap()]))
        .await
        .unwrap();
    assert_eq!(code, exit::UNROUTABLE);

    let code = run(cli(&[
        "--config",
        &config,
        "process",
        "--input",
        "{not json",
        "--format",
        "structured",
    ]))
    .await
    .unwrap();
    assert_eq!(code, exit::MALFORMED);
}

#[tokio::test]
async fn test_usage_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let missing = run(cli(&["--config", &config, "process", "--input", "./inbox/nope.eml"])).await;
    assert!(missing.is_err());

    let bad_format = run(cli(&[
        "--config",
        &config,
        "process",
        "--input",
        "hello",
        "--format",
        "spreadsheet",
    ]))
    .await;
    assert!(bad_format.is_err());

    let bad_config = run(cli(&["--config", "/nonexistent/intake.yaml", "history", "--conversation", "x"])).await;
    assert!(bad_config.is_err());
}
