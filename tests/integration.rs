use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn datalk_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("datalk");
    path
}

const STORES_CSV: &str = "\
store_id,hub_id,store_name,store_segment,store_plan_price,store_latitude,store_longitude
3,2,CUMIURI,FOOD,0,-30.0374149,-51.20352
6,3,PIMUIMA,FOOD,0,-30.0374149,-51.20352
8,3,MSAMIMPIT,FOOD,0,-30.0374149,-51.20352
53,8,PURGRIPI,GOOD,49,-22.921475,-43.234718
";

const ORDERS_CSV: &str = "\
order_id,store_id,channel_id,order_status,order_amount,order_moment_created
68405119,3512,5,CANCELED,62.7,1/21/2021 12:01:44 AM
68405123,3512,5,FINISHED,62.7,
68405206,3512,5,FINISHED,lots,1/21/2021 12:04:20 AM
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("stores.csv"), STORES_CSV).unwrap();
    fs::write(data_dir.join("orders.csv"), ORDERS_CSV).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/datalk.sqlite"

[ingest]
batch_size = 2

[sources.stores]
path = "{root}/data/stores.csv"

[sources.orders]
path = "{root}/data/orders.csv"

[oracle]
url = "http://127.0.0.1:1/api/generate"
timeout_secs = 2

[server]
bind = "127.0.0.1:7431"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("datalk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_datalk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = datalk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("DATALK_ORACLE_URL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run datalk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_datalk(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_datalk(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_datalk(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_stores() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_datalk(&config_path, &["ingest", "stores"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("batches: 2"));
    assert!(stdout.contains("written: 4"));
    assert!(stdout.contains("documents in collection: 4"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout1, _, success1) = run_datalk(&config_path, &["ingest", "stores"]);
    assert!(success1);
    assert!(stdout1.contains("documents in collection: 4"));

    let (stdout2, _, success2) = run_datalk(&config_path, &["ingest", "stores"]);
    assert!(success2);
    assert!(
        stdout2.contains("documents in collection: 4"),
        "second incremental run duplicated documents: {}",
        stdout2
    );
    assert!(stdout2.contains("rejected documents: 0"));
}

#[test]
fn test_ingest_orders_skips_malformed_row() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_datalk(&config_path, &["ingest", "orders", "--mode", "fresh"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("rows read: 3"));
    assert!(stdout.contains("malformed rows: 1"));
    assert!(stdout.contains("documents in collection: 2"));
    assert!(stderr.contains("skipping malformed row"));
}

#[test]
fn test_ingest_all_then_stats() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_datalk(&config_path, &["ingest", "all"]);
    assert!(success, "ingest all failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingest stores"));
    assert!(stdout.contains("ingest orders"));

    let (stdout, stderr, success) = run_datalk(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("stores"));
    assert!(stdout.contains("uq_order_id"));
    assert!(!stdout.contains("missing:"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_datalk(&config_path, &["ingest", "orders", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("written: 2"));
    assert!(!stdout.contains("documents in collection"));

    let (stdout, _, success) = run_datalk(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("(missing, run `datalk init`)"));

    // stats only reads: the collections are still missing afterwards.
    let (stdout, _, success) = run_datalk(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("(missing, run `datalk init`)"));
}

#[test]
fn test_ingest_path_override() {
    let (tmp, config_path) = setup_test_env();
    let other = tmp.path().join("data").join("more_stores.csv");
    fs::write(&other, "store_id;hub_id\n900;1\n901;1\n").unwrap();

    // Wrong delimiter for this file: the whole header is one column.
    let (stdout, _, success) = run_datalk(
        &config_path,
        &["ingest", "stores", "--path", other.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("malformed rows: 2"));

    fs::write(&other, "store_id,hub_id\n900,1\n901,1\n").unwrap();
    let (stdout, _, success) = run_datalk(
        &config_path,
        &["ingest", "stores", "--path", other.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("documents in collection: 2"));
}

#[test]
fn test_ingest_unknown_collection() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_datalk(&config_path, &["ingest", "customers"]);
    assert!(!success);
    assert!(stderr.contains("Unknown collection"));
}

#[test]
fn test_ask_unreachable_oracle_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_datalk(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_datalk(&config_path, &["ask", "stores", "pizza places"]);
    assert!(!success, "ask should fail: stdout={}", stdout);
    assert!(
        stderr.contains("unreachable") || stderr.contains("timed out"),
        "stderr: {}",
        stderr
    );
}
