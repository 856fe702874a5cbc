use std::path::PathBuf;

use assert_cmd::Command;
use serde_json::Value;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

fn sheetpilot() -> Command {
    let mut cmd = Command::cargo_bin("sheetpilot").unwrap();
    cmd.env_remove("RUST_LOG").args(["--log-level", "warn"]);
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn parse_prints_the_typed_command() {
    let value = json_output(sheetpilot().args(["-o", "json", "parse", "click(//button[@id='go'])"]));
    assert_eq!(value["type"], "click");
    assert_eq!(value["params"]["xpath"], "//button[@id='go']");

    let value = json_output(sheetpilot().args(["-o", "json", "parse", "   "]));
    assert_eq!(value["type"], "empty");
}

#[test]
fn columns_expands_ranges() {
    let value = json_output(sheetpilot().args(["-o", "json", "columns", "A-C,F"]));
    assert_eq!(value, serde_json::json!(["A", "B", "C", "F"]));

    sheetpilot().args(["columns", "C-A"]).assert().failure();
}

#[test]
fn substitute_reports_unresolved_names() {
    let value = json_output(sheetpilot().args([
        "-o",
        "json",
        "substitute",
        "INV-{n+1} for ${B} by ${user} ${missing}",
        "--seq",
        "4",
        "--cell",
        "b=Acme",
        "--var",
        "user=ann",
    ]));
    assert_eq!(value["text"], "INV-5 for Acme by ann ${missing}");
    assert_eq!(value["unresolved"], serde_json::json!(["missing"]));

    sheetpilot()
        .args(["substitute", "x", "--var", "novalue"])
        .assert()
        .failure();
}

#[test]
fn run_fills_the_demo_sheet() {
    let value = json_output(sheetpilot().args([
        "-c",
        demo("fast.yaml").to_str().unwrap(),
        "-o",
        "json",
        "run",
        "--sheet",
        demo("contacts.csv").to_str().unwrap(),
        "--rows",
        "2-4",
        "--page",
        demo("contacts-site.json").to_str().unwrap(),
        "--active-columns",
        "B-D",
        "--id-column",
        "A",
    ]));
    assert_eq!(value["status"], "IDLE");
    assert_eq!(value["completed"], 3);
    assert_eq!(value["filled"]["//input[@name='name']"], "Carol White");
    assert_eq!(value["commandErrors"], serde_json::json!([]));
}

#[test]
fn run_rejects_bad_row_ranges() {
    sheetpilot()
        .args([
            "run",
            "--sheet",
            demo("contacts.csv").to_str().unwrap(),
            "--rows",
            "2;4",
            "--page",
            demo("contacts-site.json").to_str().unwrap(),
        ])
        .assert()
        .failure();
}

#[test]
fn config_show_merges_the_file_with_defaults() {
    let value = json_output(sheetpilot().args([
        "-c",
        demo("fast.yaml").to_str().unwrap(),
        "-o",
        "json",
        "config",
        "show",
    ]));
    assert_eq!(value["run"]["batch_item_delay_ms"], 50);
    assert_eq!(value["run"]["max_navigations_per_item"], 5);
    assert_eq!(value["variables"]["max_vars"], 50);
}
