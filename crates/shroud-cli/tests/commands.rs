//! Commands run against a dump directory on disk.

use std::fs;
use std::path::Path;

use chrono::Utc;
use clap::Parser;
use shroud_cli::{Cli, Commands, commands};
use shroud_core::config::Config;
use shroud_test_utils::{init_test_logging, sample_metadata};

fn write_dump(root: &Path, id: &str, heartbeat: &str, with_metadata: bool) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("heartbeat"), heartbeat).expect("heartbeat");
    if with_metadata {
        let metadata = sample_metadata("shop", Utc::now());
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec(&metadata).expect("json"),
        )
        .expect("metadata");
    }
    fs::write(dir.join("public.users.dat.gz"), b"data").expect("data");
}

fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.directory = root.to_path_buf();
    config
}

fn delete_args(argv: &[&str]) -> commands::delete::DeleteArgs {
    let mut full = vec!["shroud", "delete"];
    full.extend_from_slice(argv);
    match Cli::parse_from(full).command {
        Commands::Delete(args) => args,
        Commands::ListDumps(_) => panic!("expected delete"),
    }
}

#[tokio::test]
async fn retain_recent_removes_older_dump_directories() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    write_dump(dir.path(), "d1", "done", true);
    write_dump(dir.path(), "d2", "failed", false);
    write_dump(dir.path(), "d3", "done", true);
    let config = config_for(dir.path());

    commands::delete::execute(delete_args(&["--retain-recent", "1"]), &config)
        .await
        .expect("delete");

    assert!(!dir.path().join("d1").exists());
    assert!(dir.path().join("d2").exists());
    assert!(dir.path().join("d3/metadata.json").exists());
}

#[tokio::test]
async fn dry_run_leaves_directories_in_place() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    write_dump(dir.path(), "d1", "failed", false);
    let config = config_for(dir.path());

    commands::delete::execute(delete_args(&["--prune-failed", "--dry-run"]), &config)
        .await
        .expect("dry run");

    assert!(dir.path().join("d1/heartbeat").exists());
}

#[tokio::test]
async fn deleting_unknown_dump_id_fails() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    write_dump(dir.path(), "d1", "done", true);
    let config = config_for(dir.path());

    let err = commands::delete::execute(delete_args(&["d9"]), &config)
        .await
        .expect_err("unknown id");
    assert!(format!("{err:#}").contains("d9"));
    assert!(dir.path().join("d1").exists());
}

#[tokio::test]
async fn list_tolerates_corrupted_dumps() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    write_dump(dir.path(), "d1", "done", true);
    write_dump(dir.path(), "d2", "garbage", false);
    let config = config_for(dir.path());

    for argv in [
        vec!["shroud", "list-dumps"],
        vec!["shroud", "list-dumps", "--quiet", "--status", "done"],
    ] {
        let Commands::ListDumps(args) = Cli::parse_from(argv).command else {
            panic!("expected list-dumps");
        };
        commands::list::execute(&args, &config).await.expect("list");
    }
}
