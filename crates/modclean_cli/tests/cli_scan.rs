use std::fs;
use std::path::Path;
use std::process::Command;

use modclean_test_utils::{
    FLAG_MASTER, PluginBuilder, cell_children, deleted, edid, fixture_dir, interior_block,
    record, top_group, xcll,
};
use serde_json::Value;

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_modclean"))
        .args(args)
        .env_remove("MODCLEAN_LOG")
        .output()
        .expect("failed to run modclean CLI")
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("stdout should be valid JSON")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn dirty_plugin() -> PluginBuilder {
    PluginBuilder::new().node(top_group(
        b"CELL",
        vec![interior_block(
            0,
            vec![
                record(b"CELL", 0x20, [edid("Cellar"), xcll(0.0, 0.0, 0.0)].concat()),
                cell_children(0x20, 9, vec![deleted(b"REFR", 0x30), deleted(b"ACHR", 0x31)]),
            ],
        )],
    ))
}

#[test]
fn scan_json_reports_each_file_and_fails_on_unreadable_ones() {
    let dir = fixture_dir();
    let dirty = dirty_plugin().write_to(dir.path(), "Dirty.esp");
    let missing = dir.path().join("Missing.esp");

    let output = run_cli(&[
        "scan",
        "--udr",
        "--fog",
        "--detailed",
        "--json",
        &path_arg(&dirty),
        &path_arg(&missing),
    ]);
    assert_eq!(output.status.code(), Some(1));

    let json = stdout_json(&output);
    let entries = json.as_array().expect("scan output should be an array");
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0]["plugin"], "Dirty.esp");
    assert_eq!(entries[0]["status"], "scanned");
    let udr = entries[0]["udr"].as_array().expect("udr should be an array");
    assert_eq!(udr.len(), 2);
    assert_eq!(udr[0]["fid"], "00000030");
    assert_eq!(udr[1]["type"], "ACHR");
    assert_eq!(udr[0]["parent"]["editor_id"], "Cellar");
    assert_eq!(udr[0]["parent"]["interior"], true);
    assert_eq!(entries[0]["fog"], serde_json::json!(["00000020"]));
    assert!(entries[0].get("itm").is_none());

    assert_eq!(entries[1]["status"], "undetermined");
    assert_eq!(entries[1]["error"]["code"], "io");
}

#[test]
fn scan_text_exits_zero_for_clean_plugins() {
    let dir = fixture_dir();
    let clean = PluginBuilder::new()
        .node(top_group(b"CELL", vec![record(b"CELL", 0x20, xcll(1.0, 2.0, 3.0))]))
        .write_to(dir.path(), "Clean.esp");

    let output = run_cli(&["scan", "--all", &path_arg(&clean)]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "== Clean.esp\n  clean\n1 plugin scanned, 0 dirty, 0 undetermined\n");
}

#[test]
fn fix_fog_patches_then_scan_is_clean() {
    let dir = fixture_dir();
    let dirty = dirty_plugin().write_to(dir.path(), "Dirty.esp");
    let original = fs::read(&dirty).expect("fixture should be readable");

    let output = run_cli(&["fix-fog", "--json", &path_arg(&dirty)]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json[0]["status"], "ok");
    assert_eq!(json[0]["fixed"], serde_json::json!(["00000020"]));

    let backup = dir.path().join("Dirty.esp.bak");
    assert_eq!(json[0]["backup"], path_arg(&backup));
    assert_eq!(fs::read(&backup).expect("backup should exist"), original);

    let output = run_cli(&["scan", "--fog", "--json", &path_arg(&dirty)]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)[0]["fog"], serde_json::json!([]));
}

#[test]
fn fix_fog_reports_broken_plugins_and_carries_on() {
    let dir = fixture_dir();
    let broken = dir.path().join("Broken.esp");
    let mut bytes = dirty_plugin().build();
    bytes.truncate(bytes.len() - 10);
    fs::write(&broken, &bytes).expect("fixture should be writable");
    let dirty = dirty_plugin().write_to(dir.path(), "Dirty.esp");

    let output = run_cli(&["fix-fog", &path_arg(&broken), &path_arg(&dirty)]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Broken.esp: failed: "));
    assert!(stdout.contains("Dirty.esp: fixed 1 cell\n  00000020\n"));
    assert_eq!(fs::read(&broken).expect("broken file should remain"), bytes);
}

#[test]
fn details_and_info_render_json() {
    let dir = fixture_dir();
    let path = PluginBuilder::new()
        .header_flags(FLAG_MASTER)
        .author("Modder")
        .masters(&["Fallout4.esm"])
        .node(top_group(b"GLOB", vec![record(b"GLOB", 0x800, edid("TimeScale"))]))
        .write_to(dir.path(), "Tweaks.esm");

    let output = run_cli(&["details", "--json", "--game", "fo4", &path_arg(&path)]);
    assert!(output.status.success());
    let details = stdout_json(&output);
    assert_eq!(details["plugin"], "Tweaks.esm");
    assert_eq!(details["groups"]["GLOB"][0]["fid"], "00000800");
    assert_eq!(details["groups"]["GLOB"][0]["editor_id"], "TimeScale");

    let output = run_cli(&["info", "--json", &path_arg(&path)]);
    assert!(output.status.success());
    let info = stdout_json(&output);
    assert_eq!(info["master"], true);
    assert_eq!(info["author"], "Modder");
    assert_eq!(info["masters"], serde_json::json!(["Fallout4.esm"]));
    assert_eq!(info["record_count"], 1);
}

#[test]
fn info_on_a_missing_file_fails() {
    let dir = fixture_dir();
    let output = run_cli(&["info", &path_arg(&dir.path().join("Nope.esp"))]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error reading header of"));
    assert!(output.stdout.is_empty());
}

#[test]
fn usage_errors_exit_with_two() {
    let output = run_cli(&["scan"]);
    assert_eq!(output.status.code(), Some(2));
    let output = run_cli(&["scan", "--game", "morrowind", "A.esp"]);
    assert_eq!(output.status.code(), Some(2));
}
