mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_answers_before_any_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(result.get("version").and_then(|v| v.as_str()).is_some());
    assert!(result
        .get("workspacePath")
        .map(|v| v.is_null())
        .unwrap_or(false));
}

#[test]
fn data_methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "payments.record",
        json!({ "enrollmentId": "x", "amount": 1000.0, "method": "Espèces" }),
    );
    assert_eq!(error_code(&error), "no_workspace");
}

#[test]
fn unknown_method_maps_to_not_implemented() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let error = request_err(&mut stdin, &mut reader, "1", "nope.nothing", json!({}));
    assert_eq!(error_code(&error), "not_implemented");
}

#[test]
fn workspace_select_reports_the_path_back() {
    let workspace = temp_dir("scolard-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        result.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
}
