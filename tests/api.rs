#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use cabtrack::app::{AppState, router};
use cabtrack::store::Database;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(data_file: Option<PathBuf>) -> Router {
    router(Arc::new(AppState::new(Database::new(), data_file)), 1024 * 1024)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Project J1: template MOTOR (isolator 2h + motor 6h) on P-101, and a
/// 20m cable C1 glanded at both ends (pull 2h, glands 1h each, test 0.5h)
async fn seeded() -> Router {
    let app = app_with(None);
    let (status, _) = call(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "job_no": "J1", "title": "Plant room" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, created) = call(
        &app,
        "POST",
        "/api/projects/J1/components/bulk",
        Some(json!([
            { "code": "ISO", "name": "Isolator", "lab_norm": 2.0 },
            { "code": "MTR", "name": "Motor", "lab_norm": 6.0 },
            { "code": "SWA16", "name": "16mm SWA", "lab_norm": 0.1, "gland_norm": 1.0, "test_norm": 0.5 }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let ids: Vec<u64> = created
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_u64().unwrap())
        .collect();

    let (status, _) = call(
        &app,
        "POST",
        "/api/projects/J1/templates",
        Some(json!({ "name": "MOTOR", "components": [ids[0], ids[1]] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "POST",
        "/api/projects/J1/equipment",
        Some(json!({
            "equip_ref": "P-101",
            "description": "Cooling water pump",
            "section": "North",
            "template": "MOTOR"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "POST",
        "/api/projects/J1/cabscheds",
        Some(json!({
            "cab_num": "C1",
            "cab_size": "16mm SWA",
            "equip_ref": "P-101",
            "length": 20.0,
            "a_gland_area": "MCC",
            "z_gland_area": "Pump house"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    app
}

fn multipart(filename: &str, content: &str) -> Request<Body> {
    let boundary = "cabtrack-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = content
    );
    Request::builder()
        .method("POST")
        .uri("/api/projects/J1/import/equipment")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app_with(None);
    let (status, body) = call(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn duplicate_project_is_a_conflict() {
    let app = seeded().await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "job_no": "J1", "title": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn second_equipment_with_same_ref_is_rejected() {
    let app = seeded().await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/projects/J1/equipment",
        Some(json!({ "equip_ref": "P-101", "description": "Copy", "template": "MOTOR" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_EXISTS");
    assert_eq!(body["details"]["entity"], "equipment");
    assert_eq!(body["details"]["key"], "P-101");

    let (_, list) = call(&app, "GET", "/api/projects/J1/equipment", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let app = app_with(None);
    let (status, body) = call(&app, "GET", "/api/projects/NOPE/components", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["details"]["key"], "NOPE");
}

#[tokio::test]
async fn progress_lists_component_rows_and_cable_phases() {
    let app = seeded().await;
    let (status, rows) = call(&app, "GET", "/api/projects/J1/progress", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    for id in ["C1", "C1A", "C1Z", "C1T"] {
        assert!(ids.contains(&id), "missing row {}", id);
    }
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn gland_row_update_writes_the_a_end() {
    let app = seeded().await;
    let (status, row) = call(
        &app,
        "PUT",
        "/api/projects/J1/progress/cable-a/C1",
        Some(json!({ "percent": 50, "current_recovery": 0.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["id"], "C1A");
    assert_eq!(row["percent"], 50);

    let (_, cables) = call(&app, "GET", "/api/projects/J1/cabscheds", None).await;
    let cable = &cables[0];
    assert_eq!(cable["a_gland"]["percent"], 50);
    assert_eq!(cable["z_gland"]["percent"], 0);
    assert_eq!(cable["pull"]["percent"], 0);
}

#[tokio::test]
async fn percent_above_hundred_is_invalid() {
    let app = seeded().await;
    let (status, body) = call(
        &app,
        "PUT",
        "/api/projects/J1/progress/cable/C1",
        Some(json!({ "percent": 150, "current_recovery": 3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn unknown_row_kind_is_not_found() {
    let app = seeded().await;
    let (status, _) = call(
        &app,
        "PUT",
        "/api/projects/J1/progress/cable-q/C1",
        Some(json!({ "percent": 10, "current_recovery": 0.2 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn equipment_spread_sets_percent_complete() {
    let app = seeded().await;
    let (status, view) = call(
        &app,
        "PUT",
        "/api/projects/J1/equipment/P-101/percent",
        Some(json!({ "percent": 40.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!((view["percent_complete"].as_f64().unwrap() - 40.0).abs() < 1e-9);
    assert!((view["lab_norm"].as_f64().unwrap() - 12.5).abs() < 1e-9);

    let (_, summary) = call(&app, "GET", "/api/projects/J1/summary", None).await;
    assert!((summary["current_recovery"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(summary["sections"][0]["section"], "North");
}

#[tokio::test]
async fn template_in_use_cannot_be_deleted() {
    let app = seeded().await;
    let (status, body) = call(&app, "DELETE", "/api/projects/J1/templates/MOTOR", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "IN_USE");
}

#[tokio::test]
async fn cc_lift_defaults_to_today_and_unlift_clears_it() {
    let app = seeded().await;
    let (status, _) = call(
        &app,
        "POST",
        "/api/projects/J1/ccs",
        Some(json!({ "cc_ref": "CC-1", "date": "2024-03-01", "equip_refs": ["P-101"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, cc) = call(&app, "POST", "/api/projects/J1/ccs/CC-1/lift", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cc["lifted"], true);
    let today = chrono::Local::now().date_naive().to_string();
    assert_eq!(cc["lifted_on"], today.as_str());

    let (_, cc) = call(
        &app,
        "POST",
        "/api/projects/J1/ccs/CC-1/lift",
        Some(json!({ "date": "2024-04-02" })),
    )
    .await;
    assert_eq!(cc["lifted_on"], "2024-04-02");

    let (_, cc) = call(&app, "POST", "/api/projects/J1/ccs/CC-1/unlift", None).await;
    assert_eq!(cc["lifted"], false);
    assert_eq!(cc["lifted_on"], Value::Null);
}

#[tokio::test]
async fn encoded_refs_reach_the_handler_decoded() {
    let app = seeded().await;
    let (status, _) = call(
        &app,
        "POST",
        "/api/projects/J1/equipment",
        Some(json!({ "equip_ref": "DB 1/2", "description": "Board", "template": "MOTOR" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, view) = call(&app, "GET", "/api/projects/J1/equipment/DB%201%2F2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["equip_ref"], "DB 1/2");
}

#[tokio::test]
async fn equipment_upload_reports_line_problems() {
    let app = seeded().await;
    let csv = "Ref,Description,Template\n\
               P-201,Pump,MOTOR\n\
               P-202,Fan,NOPE\n\
               ,Missing ref,MOTOR\n\
               P-201,Second pump,MOTOR\n\
               P-101,Existing,MOTOR";
    let (status, bytes) = send(&app, multipart("equipment.csv", csv)).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(report["created"], 1);
    assert_eq!(report["non_existent"]["templates"], json!(["NOPE"]));
    assert_eq!(report["errors"][0]["line"], 4);
    assert_eq!(report["duplicates"], json!([5, 6]));

    let (_, list) = call(&app, "GET", "/api/projects/J1/equipment", None).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn upload_without_file_field_is_invalid() {
    let app = seeded().await;
    let boundary = "b";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/projects/J1/import/components")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn components_export_as_csv_and_xlsx() {
    let app = seeded().await;
    let request = Request::builder()
        .uri("/api/projects/J1/export/components?format=csv")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("Code,Name,LabNorm"));
    assert!(text.contains("MTR,Motor,6"));

    let request = Request::builder()
        .uri("/api/projects/J1/export/cabscheds")
        .body(Body::empty())
        .unwrap();
    let (status, bytes) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..2], b"PK");

    let request = Request::builder()
        .uri("/api/projects/J1/export/components?format=pdf")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn changes_are_snapshotted_to_the_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.bin.gz");
    let app = app_with(Some(path.clone()));

    let (status, _) = call(
        &app,
        "POST",
        "/api/projects",
        Some(json!({ "job_no": "J9", "title": "Substation" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let db = cabtrack::saving::load_database(&path).unwrap();
    assert_eq!(db.project("J9").unwrap().project.title, "Substation");
}
