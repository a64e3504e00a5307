use assert_cmd::Command;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn temp_workspace() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn page(title: &str, ns: i64, body: &str) -> String {
    format!(
        "<page><title>{title}</title><ns>{ns}</ns><id>1</id><revision><id>2</id>\
         <text xml:space=\"preserve\">{body}</text></revision></page>"
    )
}

fn compress(xml: &str) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(xml.as_bytes()).expect("compress");
    encoder.finish().expect("finish stream")
}

/// Writes a two-block multistream dump and its plain-text index.
fn write_dump(dir: &Path) -> (PathBuf, PathBuf) {
    let body = "Rust is a language. ".repeat(20);
    let blocks = [
        page("Rust", 0, &body) + &page("List of languages", 0, &body),
        page("Talk:Rust", 1, &body) + &page("Ferris", 0, &format!("{{{{Infobox}}}}{body}")),
    ];
    let mut dump = Vec::new();
    let mut index = String::new();
    for (block, xml) in blocks.iter().enumerate() {
        index.push_str(&format!("{}:{}:Block {block}\n", dump.len(), block + 1));
        dump.extend(compress(xml));
    }
    let dump_path = dir.join("dump.xml.bz2");
    let index_path = dir.join("index.txt");
    fs::write(&dump_path, dump).expect("write dump");
    fs::write(&index_path, index).expect("write index");
    (dump_path, index_path)
}

fn wikitok(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("wikitok").expect("binary exists");
    cmd.current_dir(dir)
        .env_remove("XML_PATH")
        .env_remove("INDEX_PATH")
        .env_remove("TOKENS_FILE")
        .env_remove("TOKENIZE_CHECKPOINT")
        .env_remove("TRAIN_CHECKPOINT")
        .args([
            "--dump",
            "dump.xml.bz2",
            "--index",
            "index.txt",
            "--cache",
            "out/tokens.bin",
            "--tokenize-checkpoint",
            "out/tokenize.json",
            "--train-checkpoint",
            "out/train.json",
        ]);
    cmd
}

fn info_json(dir: &Path) -> Value {
    let output = wikitok(dir)
        .args(["--quiet", "info", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("info output is valid JSON")
}

#[test]
fn tokenize_then_stream_round_trip() {
    let workspace = temp_workspace();
    write_dump(workspace.path());

    wikitok(workspace.path())
        .args(["--quiet", "tokenize", "--no-progress"])
        .assert()
        .success();
    assert!(workspace.path().join("out/tokens.bin").exists());

    let info = info_json(workspace.path());
    assert_eq!(info["cache"]["records"], 2, "Rust and Ferris qualify");
    assert!(info["cache"]["error"].is_null());
    assert_eq!(info["tokenize_checkpoint"], 2);
    assert!(info["train_checkpoint"].is_null());
    let tokens = info["cache"]["tokens"].as_u64().expect("token count");

    wikitok(workspace.path())
        .args(["--quiet", "stream", "--max-windows", "10"])
        .assert()
        .success();
    let info = info_json(workspace.path());
    let buffered = info["train_checkpoint"]["buffered_tokens"]
        .as_u64()
        .expect("buffered tokens");
    assert!(buffered > 0);

    wikitok(workspace.path())
        .args(["--quiet", "stream"])
        .assert()
        .success();
    let info = info_json(workspace.path());
    assert_eq!(
        info["train_checkpoint"]["cursor_bytes"],
        info["cache"]["bytes"],
        "the whole cache was consumed"
    );
    assert!(info["train_checkpoint"]["buffered_tokens"].as_u64().expect("buffered") <= 256);
    assert!(tokens > 256);
}

#[test]
fn rerunning_tokenize_leaves_cache_untouched() {
    let workspace = temp_workspace();
    write_dump(workspace.path());

    wikitok(workspace.path())
        .args(["--quiet", "run", "--no-progress", "--max-windows", "1"])
        .assert()
        .success();
    let cache = workspace.path().join("out/tokens.bin");
    let before = fs::read(&cache).expect("read cache");

    wikitok(workspace.path())
        .args(["--quiet", "tokenize", "--no-progress"])
        .assert()
        .success();
    assert_eq!(fs::read(&cache).expect("read cache"), before);
}

#[test]
fn paths_can_come_from_the_environment() {
    let workspace = temp_workspace();
    write_dump(workspace.path());

    let mut cmd = Command::cargo_bin("wikitok").expect("binary exists");
    cmd.current_dir(workspace.path())
        .env("XML_PATH", "dump.xml.bz2")
        .env("INDEX_PATH", "index.txt")
        .env("TOKENS_FILE", "env/tokens.bin")
        .env("TOKENIZE_CHECKPOINT", "env/tokenize.json")
        .env("TRAIN_CHECKPOINT", "env/train.json")
        .args(["--quiet", "tokenize", "--no-progress"])
        .assert()
        .success();
    assert!(workspace.path().join("env/tokens.bin").exists());
    assert!(workspace.path().join("env/tokenize.json").exists());
}

#[test]
fn peek_prints_decompressed_block_lines() {
    let workspace = temp_workspace();
    write_dump(workspace.path());

    let output = wikitok(workspace.path())
        .args(["--quiet", "peek", "--block", "1", "--lines", "5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8 output");
    assert!(text.contains("Talk:Rust"));
    assert!(text.lines().count() <= 5);

    wikitok(workspace.path())
        .args(["--quiet", "peek", "--block", "7"])
        .assert()
        .failure();
}

#[test]
fn mismatched_checkpoint_version_is_fatal() {
    let workspace = temp_workspace();
    write_dump(workspace.path());
    fs::create_dir_all(workspace.path().join("out")).expect("mkdir");
    fs::write(
        workspace.path().join("out/tokenize.json"),
        r#"{"block_idx": 1}"#,
    )
    .expect("write legacy checkpoint");

    wikitok(workspace.path())
        .args(["--quiet", "tokenize", "--no-progress"])
        .assert()
        .failure();
}
