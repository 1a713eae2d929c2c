use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rrc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rrc");
    path
}

const CSL_EXPORT: &str = r#"[
  {"id": "aspirin2019", "title": "Aspirin after stroke",
   "abstract": "A randomised trial of aspirin dosing in 120 stroke patients.",
   "author": [{"family": "Okafor", "given": "Ada"}], "issued": {"date-parts": [[2019]]}},
  {"id": "statin2021", "title": "Statins in older adults",
   "abstract": "An observational cohort following statin therapy and cholesterol outcomes.",
   "issued": {"date-parts": [[2021]]}},
  {"id": "empty", "title": ""}
]"#;

fn setup_test_env(mode: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("library.json"), CSL_EXPORT).unwrap();

    let config_content = format!(
        r#"[session]
src_dir = "{root}/corpus"

[db]
path = "{root}/data/rrc.sqlite"

[retriever]
provider = "hash"
dims = 256
top_k = 2
mode = "{mode}"
"#,
        root = root.display(),
        mode = mode
    );

    let config_path = config_dir.join("rrc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rrc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rrc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rrc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Import the CSL-JSON export into `<root>/corpus`.
fn import_refs(root: &Path, config_path: &Path) {
    let (stdout, stderr, success) = run_rrc(
        config_path,
        &[
            "refs",
            root.join("library.json").to_str().unwrap(),
            "--out",
            root.join("corpus").to_str().unwrap(),
        ],
    );
    assert!(success, "refs failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("dense");

    let (stdout, stderr, success) = run_rrc(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("rrc.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("dense");

    let (_, _, success1) = run_rrc(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_rrc(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_refs_writes_articles() {
    let (tmp, config_path) = setup_test_env("dense");
    let root = tmp.path();

    let (stdout, _, success) = run_rrc(
        &config_path,
        &[
            "refs",
            root.join("library.json").to_str().unwrap(),
            "--out",
            root.join("corpus").to_str().unwrap(),
        ],
    );
    assert!(success);
    assert!(stdout.contains("records: 3"), "{}", stdout);
    assert!(stdout.contains("skipped (no title or abstract): 1"), "{}", stdout);

    let article: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(root.join("corpus").join("aspirin2019.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(article["article_id"], "aspirin2019");
    assert_eq!(article["year"], "2019");
    assert!(article["extracted_text"]
        .as_str()
        .unwrap()
        .starts_with("Aspirin after stroke\n\n"));
}

#[test]
fn test_sample_lists_articles() {
    let (tmp, config_path) = setup_test_env("dense");
    import_refs(tmp.path(), &config_path);

    let (stdout, _, success) = run_rrc(
        &config_path,
        &["sample", tmp.path().join("corpus").to_str().unwrap(), "--n", "5"],
    );
    assert!(success);
    assert!(stdout.contains("aspirin2019 (aspirin2019.json)"), "{}", stdout);
    assert!(stdout.contains("statin2021 (statin2021.json)"), "{}", stdout);
}

#[test]
fn test_plan_reports_budget() {
    let (_tmp, config_path) = setup_test_env("dense");

    let (stdout, stderr, success) =
        run_rrc(&config_path, &["plan", "What was the sample size?"]);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    // 1024 - 7 query - 6 prompt - 50 buffer - 256 answer
    assert!(stdout.contains("context size: 705"), "{}", stdout);
    assert!(stdout.contains("chunk size: 352"), "{}", stdout);
}

#[test]
fn test_plan_rejects_long_prompt() {
    let (_tmp, config_path) = setup_test_env("dense");
    let prompt = format!("{} {{documents}} {{query}}", "word ".repeat(600));

    let (_, stderr, success) = run_rrc(&config_path, &["plan", "q", "--prompt", &prompt]);
    assert!(!success);
    assert!(stderr.contains("Prompt + Query is too long"), "{}", stderr);
}

#[test]
fn test_retrieve_dense() {
    let (tmp, config_path) = setup_test_env("dense");
    import_refs(tmp.path(), &config_path);

    let (stdout, stderr, success) = run_rrc(&config_path, &["retrieve", "aspirin dosing trial"]);
    assert!(success, "retrieve failed: stdout={}, stderr={}", stdout, stderr);

    let first = stdout
        .lines()
        .find(|l| l.starts_with("1. "))
        .expect("no ranked results");
    assert!(first.ends_with("aspirin2019 / aspirin2019.json"), "{}", stdout);
}

#[test]
fn test_retrieve_rejects_chunk_over_retriever_limit() {
    let (tmp, config_path) = setup_test_env("dense");
    import_refs(tmp.path(), &config_path);

    // one chunk would take the whole 705-token context
    let (_, stderr, success) = run_rrc(&config_path, &["retrieve", "aspirin", "--top-k", "1"]);
    assert!(!success);
    assert!(stderr.contains("Retriever MAX SEQ LENGTH"), "{}", stderr);
}

#[test]
fn test_retrieve_keyword_with_article_filter() {
    let (tmp, config_path) = setup_test_env("keyword");
    import_refs(tmp.path(), &config_path);

    let (stdout, _, success) = run_rrc(
        &config_path,
        &["retrieve", "cohort statin", "--article", "statin2021"],
    );
    assert!(success);
    assert!(stdout.contains("chunk: statin2021_0"), "{}", stdout);
    assert!(!stdout.contains("aspirin2019"), "{}", stdout);

    let (stdout, _, success) = run_rrc(
        &config_path,
        &["retrieve", "cohort statin", "--article", "aspirin2019"],
    );
    assert!(success);
    assert!(stdout.contains("No results."), "{}", stdout);
}

#[test]
fn test_ask_without_generator_fails() {
    let (tmp, config_path) = setup_test_env("dense");
    import_refs(tmp.path(), &config_path);

    let (_, stderr, success) = run_rrc(&config_path, &["ask", "What dose of aspirin?"]);
    assert!(!success);
    assert!(stderr.contains("Generator is disabled"), "{}", stderr);
}

#[test]
fn test_missing_corpus_is_error() {
    let (_tmp, config_path) = setup_test_env("dense");

    let (_, stderr, success) = run_rrc(&config_path, &["retrieve", "anything"]);
    assert!(!success);
    assert!(stderr.contains("Corpus directory does not exist"), "{}", stderr);
}
