//! End-to-end tests for the `quill` binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn languages_lists_the_builtin_interpreters() {
    Command::cargo_bin("quill")
        .unwrap()
        .arg("languages")
        .assert()
        .success()
        .stdout(predicate::str::contains("python"))
        .stdout(predicate::str::contains("sh"))
        .stdout(predicate::str::contains("r"));
}

#[test]
fn batch_rejects_an_unknown_cell_kind() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("empty.doc");
    std::fs::write(&doc, "just prose\n").unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .args(["batch", "--kind", "prose"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown cell kind"));
}

#[test]
fn batch_rejects_output_as_a_kind() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("empty.doc");
    std::fs::write(&doc, "just prose\n").unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .args(["batch", "--kind", "output"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be evaluated"));
}

#[test]
fn batch_reports_a_document_without_cells() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("prose.doc");
    std::fs::write(&doc, "nothing to run here\n").unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .arg("batch")
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("No code cells found"));
}

#[cfg(unix)]
#[test]
fn batch_writes_output_cells_to_a_separate_file() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("shell.doc");
    let out = dir.path().join("shell.out");
    std::fs::write(
        &doc,
        "\\begin_cell code sh\necho batch works\n\\end_cell\n",
    )
    .unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .arg("batch")
        .arg(&doc)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));

    // The source document is untouched; the copy gained an output cell.
    let original = std::fs::read_to_string(&doc).unwrap();
    assert!(!original.contains("\\begin_cell output"));
    let updated = std::fs::read_to_string(&out).unwrap();
    assert!(updated.contains("\\begin_cell output sh"));
    assert!(updated.contains("batch works"));
}

#[cfg(unix)]
#[test]
fn batch_in_place_overwrites_a_clean_document() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("shell.doc");
    std::fs::write(
        &doc,
        "\\begin_cell code sh\necho in place\n\\end_cell\n",
    )
    .unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .arg("batch")
        .arg(&doc)
        .arg("--in-place")
        .assert()
        .success();

    let updated = std::fs::read_to_string(&doc).unwrap();
    assert!(updated.contains("\\begin_cell output sh"));
    assert!(updated.contains("in place"));
}

#[cfg(unix)]
#[test]
fn batch_in_place_refuses_a_failing_document() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("broken.doc");
    let before = "\\begin_cell code ghostlang\nwhatever\n\\end_cell\n";
    std::fs::write(&doc, before).unwrap();

    Command::cargo_bin("quill")
        .unwrap()
        .arg("batch")
        .arg(&doc)
        .arg("--in-place")
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite"));

    assert_eq!(std::fs::read_to_string(&doc).unwrap(), before);
}
