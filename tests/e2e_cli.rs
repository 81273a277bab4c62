mod xlsx_fixtures;

use assert_cmd::cargo;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use xlsx_fixtures::write_negotiation_file;

fn carteira(db: &PathBuf) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("carteira"));
    cmd.arg("--db").arg(db).arg("--no-color");
    cmd
}

fn fixture(dir: &TempDir) -> PathBuf {
    write_negotiation_file(
        dir.path(),
        "negociacao.xlsx",
        &[(
            "01/02/2025",
            "Compra",
            "Mercado à Vista",
            "NU INVEST CORRETORA DE VALORES S.A.",
            "PETR4",
            100.0,
            10.0,
            1000.0,
        )],
    )
    .expect("failed to write fixture")
}

#[test]
fn init_creates_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("data.db");

    carteira(&db)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database initialized"))
        .stdout(predicate::str::contains("\u{001b}[").not());

    assert!(db.exists());
}

#[test]
fn import_without_confirm_is_preview_only() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("data.db");
    let file = fixture(&dir);

    carteira(&db).arg("init").assert().success();

    carteira(&db)
        .arg("import")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("PETR4"))
        .stdout(predicate::str::contains("Preview only"));

    carteira(&db)
        .arg("transactions")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 transactions"));
}

#[test]
fn import_with_confirm_persists_transactions() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("data.db");
    let file = fixture(&dir);

    carteira(&db).arg("init").assert().success();

    carteira(&db)
        .arg("import")
        .arg(&file)
        .arg("--confirm")
        .arg("--no-enrich")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 transactions imported"))
        .stdout(predicate::str::contains("\u{001b}[").not());

    carteira(&db)
        .arg("transactions")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("PETR4"))
        .stdout(predicate::str::contains("1 transactions"));
}

#[test]
fn import_json_output_is_parseable() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("data.db");
    let file = fixture(&dir);

    carteira(&db).arg("init").assert().success();

    let output = carteira(&db)
        .arg("--json")
        .arg("import")
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let preview: serde_json::Value =
        serde_json::from_slice(&output).expect("import --json should emit valid JSON");
    assert_eq!(preview["summary"]["total"], 1);
    assert_eq!(preview["rows"][0]["ticker"], "PETR4");
}
