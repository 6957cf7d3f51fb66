use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::NaiveDate;
use log::{error, info};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::downloader;
use crate::error::{ApiError, ErrorCode, StoreError};
use crate::import::{self, ImportReport};
use crate::loader;
use crate::model::{
    Cable, Cc, Component, CompletionUpdate, EquipmentView, ImportKind, NewCable, NewCc,
    NewComponent, NewEquipment, PercentInput, ProgressRow, Project, ProjectSummary, RowKind,
    Template,
};
use crate::saving;
use crate::store::{Database, ProjectData};

pub struct AppState {
    db: Mutex<Database>,
    data_file: Option<PathBuf>,
}

impl AppState {
    pub fn new(db: Database, data_file: Option<PathBuf>) -> Self {
        AppState {
            db: Mutex::new(db),
            data_file,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("store lock poisoned"))
    }

    /// Run a read-only query against one project
    fn read<T>(
        &self,
        job_no: &str,
        f: impl FnOnce(&ProjectData) -> Result<T, StoreError>,
    ) -> Result<T, ApiError> {
        let db = self.lock()?;
        Ok(f(db.project(job_no)?)?)
    }

    /// Run a mutation and snapshot the store when it succeeds
    fn write<T>(&self, f: impl FnOnce(&mut Database) -> Result<T, StoreError>) -> Result<T, ApiError> {
        let mut db = self.lock()?;
        let out = f(&mut *db)?;
        if let Some(path) = &self.data_file {
            if let Err(e) = saving::save_database(&db, path) {
                error!("failed to save {}: {}", path.display(), e);
                return Err(ApiError::internal(format!("change applied but not saved: {}", e)));
            }
        }
        Ok(out)
    }

    fn write_project<T>(
        &self,
        job_no: &str,
        f: impl FnOnce(&mut ProjectData) -> Result<T, StoreError>,
    ) -> Result<T, ApiError> {
        self.write(|db| f(db.project_mut(job_no)?))
    }
}

/// Build the API router over `state`
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/:job_no",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/:job_no/summary", get(project_summary))
        .route(
            "/api/projects/:job_no/components",
            get(list_components).post(create_component),
        )
        .route(
            "/api/projects/:job_no/components/bulk",
            post(bulk_create_components),
        )
        .route(
            "/api/projects/:job_no/components/:id",
            put(update_component).delete(delete_component),
        )
        .route(
            "/api/projects/:job_no/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/projects/:job_no/templates/bulk",
            post(bulk_create_templates),
        )
        .route(
            "/api/projects/:job_no/templates/:name",
            put(update_template).delete(delete_template),
        )
        .route(
            "/api/projects/:job_no/equipment",
            get(list_equipment).post(create_equipment),
        )
        .route(
            "/api/projects/:job_no/equipment/bulk",
            post(bulk_create_equipment),
        )
        .route(
            "/api/projects/:job_no/equipment/:equip_ref",
            get(get_equipment)
                .put(update_equipment)
                .delete(delete_equipment),
        )
        .route(
            "/api/projects/:job_no/equipment/:equip_ref/percent",
            put(spread_equipment),
        )
        .route(
            "/api/projects/:job_no/cabscheds",
            get(list_cables).post(create_cable),
        )
        .route(
            "/api/projects/:job_no/cabscheds/bulk",
            post(bulk_create_cables),
        )
        .route(
            "/api/projects/:job_no/cabscheds/:cab_num",
            put(update_cable).delete(delete_cable),
        )
        .route(
            "/api/projects/:job_no/cabscheds/:cab_num/percent",
            put(spread_cable),
        )
        .route("/api/projects/:job_no/ccs", get(list_ccs).post(create_cc))
        .route(
            "/api/projects/:job_no/ccs/:cc_ref",
            put(update_cc).delete(delete_cc),
        )
        .route("/api/projects/:job_no/ccs/:cc_ref/lift", post(lift_cc))
        .route("/api/projects/:job_no/ccs/:cc_ref/unlift", post(unlift_cc))
        .route("/api/projects/:job_no/progress", get(list_progress))
        .route(
            "/api/projects/:job_no/progress/:kind/:id",
            put(update_progress_row),
        )
        .route("/api/projects/:job_no/import/:kind", post(import_file))
        .route("/api/projects/:job_no/export/:kind", get(export_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = match &config.data_file {
        Some(path) => saving::load_or_default(path)?,
        None => Database::new(),
    };
    info!("loaded {} project(s)", db.projects().len());

    let state = Arc::new(AppState::new(db, config.data_file.clone()));
    let app = router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

type Shared = State<Arc<AppState>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ----------------------------------------------------------------------
// Projects
// ----------------------------------------------------------------------

async fn list_projects(State(state): Shared) -> ApiResult<Vec<Project>> {
    Ok(Json(state.lock()?.projects()))
}

async fn create_project(
    State(state): Shared,
    Json(project): Json<Project>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let project = state.write(|db| db.create_project(project))?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Project> {
    state.read(&job_no, |p| Ok(p.project.clone())).map(Json)
}

async fn update_project(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(project): Json<Project>,
) -> ApiResult<Project> {
    state
        .write(|db| db.update_project(&job_no, project))
        .map(Json)
}

async fn delete_project(State(state): Shared, Path(job_no): Path<String>) -> Result<StatusCode, ApiError> {
    state.write(|db| db.delete_project(&job_no))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn project_summary(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<ProjectSummary> {
    state.read(&job_no, |p| Ok(p.summary())).map(Json)
}

// ----------------------------------------------------------------------
// Components
// ----------------------------------------------------------------------

async fn list_components(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<Component>> {
    state.read(&job_no, |p| Ok(p.components())).map(Json)
}

async fn create_component(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(component): Json<NewComponent>,
) -> Result<(StatusCode, Json<Component>), ApiError> {
    let component = state.write_project(&job_no, |p| p.create_component(component))?;
    Ok((StatusCode::CREATED, Json(component)))
}

async fn bulk_create_components(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(batch): Json<Vec<NewComponent>>,
) -> Result<(StatusCode, Json<Vec<Component>>), ApiError> {
    let created = state.write_project(&job_no, |p| p.bulk_create_components(batch))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_component(
    State(state): Shared,
    Path((job_no, id)): Path<(String, u64)>,
    Json(component): Json<NewComponent>,
) -> ApiResult<Component> {
    state
        .write_project(&job_no, |p| p.update_component(id, component))
        .map(Json)
}

async fn delete_component(
    State(state): Shared,
    Path((job_no, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    state.write_project(&job_no, |p| p.delete_component(id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Templates
// ----------------------------------------------------------------------

async fn list_templates(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<Template>> {
    state.read(&job_no, |p| Ok(p.templates())).map(Json)
}

async fn create_template(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(template): Json<Template>,
) -> Result<(StatusCode, Json<Template>), ApiError> {
    let template = state.write_project(&job_no, |p| p.create_template(template))?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn bulk_create_templates(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(batch): Json<Vec<Template>>,
) -> Result<(StatusCode, Json<Vec<Template>>), ApiError> {
    let created = state.write_project(&job_no, |p| p.bulk_create_templates(batch))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_template(
    State(state): Shared,
    Path((job_no, name)): Path<(String, String)>,
    Json(template): Json<Template>,
) -> ApiResult<Template> {
    state
        .write_project(&job_no, |p| p.update_template(&name, template))
        .map(Json)
}

async fn delete_template(
    State(state): Shared,
    Path((job_no, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.write_project(&job_no, |p| p.delete_template(&name))?;
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Equipment
// ----------------------------------------------------------------------

async fn list_equipment(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<EquipmentView>> {
    state.read(&job_no, |p| Ok(p.equipment_list())).map(Json)
}

async fn get_equipment(
    State(state): Shared,
    Path((job_no, equip_ref)): Path<(String, String)>,
) -> ApiResult<EquipmentView> {
    state
        .read(&job_no, |p| p.equipment_view(&equip_ref))
        .map(Json)
}

async fn create_equipment(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(equipment): Json<NewEquipment>,
) -> Result<(StatusCode, Json<EquipmentView>), ApiError> {
    let view = state.write_project(&job_no, |p| p.create_equipment(equipment))?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn bulk_create_equipment(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(batch): Json<Vec<NewEquipment>>,
) -> Result<(StatusCode, Json<Vec<EquipmentView>>), ApiError> {
    let created = state.write_project(&job_no, |p| p.bulk_create_equipment(batch))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_equipment(
    State(state): Shared,
    Path((job_no, equip_ref)): Path<(String, String)>,
    Json(equipment): Json<NewEquipment>,
) -> ApiResult<EquipmentView> {
    state
        .write_project(&job_no, |p| p.update_equipment(&equip_ref, equipment))
        .map(Json)
}

async fn delete_equipment(
    State(state): Shared,
    Path((job_no, equip_ref)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.write_project(&job_no, |p| p.delete_equipment(&equip_ref))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn spread_equipment(
    State(state): Shared,
    Path((job_no, equip_ref)): Path<(String, String)>,
    Json(input): Json<PercentInput>,
) -> ApiResult<EquipmentView> {
    state
        .write_project(&job_no, |p| p.spread_equipment(&equip_ref, input.percent))
        .map(Json)
}

// ----------------------------------------------------------------------
// Cable schedule
// ----------------------------------------------------------------------

async fn list_cables(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<Cable>> {
    state.read(&job_no, |p| Ok(p.cables())).map(Json)
}

async fn create_cable(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(cable): Json<NewCable>,
) -> Result<(StatusCode, Json<Cable>), ApiError> {
    let cable = state.write_project(&job_no, |p| p.create_cable(cable))?;
    Ok((StatusCode::CREATED, Json(cable)))
}

async fn bulk_create_cables(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(batch): Json<Vec<NewCable>>,
) -> Result<(StatusCode, Json<Vec<Cable>>), ApiError> {
    let created = state.write_project(&job_no, |p| p.bulk_create_cables(batch))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_cable(
    State(state): Shared,
    Path((job_no, cab_num)): Path<(String, String)>,
    Json(cable): Json<NewCable>,
) -> ApiResult<Cable> {
    state
        .write_project(&job_no, |p| p.update_cable(&cab_num, cable))
        .map(Json)
}

async fn delete_cable(
    State(state): Shared,
    Path((job_no, cab_num)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.write_project(&job_no, |p| p.delete_cable(&cab_num))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn spread_cable(
    State(state): Shared,
    Path((job_no, cab_num)): Path<(String, String)>,
    Json(input): Json<PercentInput>,
) -> ApiResult<Cable> {
    state
        .write_project(&job_no, |p| p.spread_cable(&cab_num, input.percent))
        .map(Json)
}

// ----------------------------------------------------------------------
// CCs
// ----------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct LiftInput {
    date: Option<NaiveDate>,
}

async fn list_ccs(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<Cc>> {
    state.read(&job_no, |p| Ok(p.ccs())).map(Json)
}

async fn create_cc(
    State(state): Shared,
    Path(job_no): Path<String>,
    Json(cc): Json<NewCc>,
) -> Result<(StatusCode, Json<Cc>), ApiError> {
    let cc = state.write_project(&job_no, |p| p.create_cc(cc))?;
    Ok((StatusCode::CREATED, Json(cc)))
}

async fn update_cc(
    State(state): Shared,
    Path((job_no, cc_ref)): Path<(String, String)>,
    Json(cc): Json<NewCc>,
) -> ApiResult<Cc> {
    state
        .write_project(&job_no, |p| p.update_cc(&cc_ref, cc))
        .map(Json)
}

async fn delete_cc(
    State(state): Shared,
    Path((job_no, cc_ref)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.write_project(&job_no, |p| p.delete_cc(&cc_ref))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lift_cc(
    State(state): Shared,
    Path((job_no, cc_ref)): Path<(String, String)>,
    input: Option<Json<LiftInput>>,
) -> ApiResult<Cc> {
    let date = input
        .and_then(|Json(i)| i.date)
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    state
        .write_project(&job_no, |p| p.set_cc_lift(&cc_ref, Some(date)))
        .map(Json)
}

async fn unlift_cc(
    State(state): Shared,
    Path((job_no, cc_ref)): Path<(String, String)>,
) -> ApiResult<Cc> {
    state
        .write_project(&job_no, |p| p.set_cc_lift(&cc_ref, None))
        .map(Json)
}

// ----------------------------------------------------------------------
// Progress
// ----------------------------------------------------------------------

async fn list_progress(State(state): Shared, Path(job_no): Path<String>) -> ApiResult<Vec<ProgressRow>> {
    state.read(&job_no, |p| Ok(p.progress_rows())).map(Json)
}

async fn update_progress_row(
    State(state): Shared,
    Path((job_no, kind, id)): Path<(String, String, String)>,
    Json(update): Json<CompletionUpdate>,
) -> ApiResult<ProgressRow> {
    let kind = RowKind::from_path_segment(&kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown row kind {}", kind)))?;
    state
        .write_project(&job_no, |p| p.set_row_completion(kind, &id, update))
        .map(Json)
}

// ----------------------------------------------------------------------
// Import / export
// ----------------------------------------------------------------------

fn import_kind(segment: &str) -> Result<ImportKind, ApiError> {
    ImportKind::from_path_segment(segment)
        .ok_or_else(|| ApiError::not_found(format!("unknown import kind {}", segment)))
}

async fn import_file(
    State(state): Shared,
    Path((job_no, kind)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<ImportReport> {
    let kind = import_kind(&kind)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_input(format!("bad upload: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.xlsx").to_string();
            let data = field.bytes().await.map_err(|e| {
                ApiError::new(ErrorCode::PayloadTooLarge, format!("bad upload: {}", e))
            })?;
            upload = Some((filename, data));
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| ApiError::invalid_input("No file data received"))?;
    let sheet = loader::load_upload(&filename, &data)
        .map_err(|e| ApiError::invalid_input(format!("cannot read {}: {}", filename, e)))?;

    state
        .write_project(&job_no, |p| import::import_into(p, kind, &sheet))
        .map(Json)
}

#[derive(Deserialize, Default)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_file(
    State(state): Shared,
    Path((job_no, kind)): Path<(String, String)>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let kind = import_kind(&kind)?;
    let table = state.read(&job_no, |p| Ok(downloader::project_table(p, kind)))?;
    let name = format!("{}-{}", job_no, kind.as_str());

    let (content_type, filename, body) = match query.format.as_deref() {
        Some("csv") => (
            "text/csv",
            format!("{}.csv", name),
            downloader::to_csv(&table).into_bytes(),
        ),
        None | Some("xlsx") => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            format!("{}.xlsx", name),
            downloader::to_xlsx(&table, kind.as_str())
                .map_err(|e| ApiError::internal(format!("export failed: {}", e)))?,
        ),
        Some(other) => {
            return Err(ApiError::invalid_input(format!(
                "unsupported export format {}",
                other
            )));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(body),
    )
        .into_response())
}
