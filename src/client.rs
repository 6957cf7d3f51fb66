//! REST client and client-side project store.
//!
//! `ProjectStore` keeps the lists of one project in memory, calls the API
//! for every change and only touches its caches once the server accepted
//! the change. Failures are returned and also queued as error toasts.

use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::completion;
use crate::error::{ApiError, StoreError};
use crate::import::{self, Import, ImportReport, Known};
use crate::loader;
use crate::model::{
    Cable, Cc, Component, CompletionUpdate, EquipmentView, ImportKind, NewCable, NewCc,
    NewComponent, NewEquipment, PercentInput, ProgressRow, Project, ProjectSummary, Template,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{}", .0.message)]
    Api(ApiError),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Invalid(#[from] StoreError),
    #[error("Cannot read {file}: {reason}")]
    Load { file: String, reason: String },
    #[error("Config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Warning,
    Error,
}

/// A notification for the user
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("bad base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!("bad base url {}", base_url)));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// URL of `/api/<segments...>`, each segment percent-encoded
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        self.get_json(self.url(&["projects"])).await
    }

    pub async fn create_project(&self, project: &Project) -> Result<Project, ClientError> {
        self.post_json(self.url(&["projects"]), project).await
    }

    pub async fn delete_project(&self, job_no: &str) -> Result<(), ClientError> {
        self.delete(self.url(&["projects", job_no])).await
    }

    pub async fn summary(&self, job_no: &str) -> Result<ProjectSummary, ClientError> {
        self.get_json(self.url(&["projects", job_no, "summary"])).await
    }

    /// Upload a workbook to the server-side importer
    pub async fn upload_import(
        &self,
        job_no: &str,
        kind: ImportKind,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<ImportReport, ClientError> {
        let form = Form::new().part("file", Part::bytes(data).file_name(filename.to_string()));
        let response = self
            .client
            .post(self.url(&["projects", job_no, "import", kind.as_str()]))
            .multipart(form)
            .send()
            .await?;
        parse_response(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let response = self.client.get(url).send().await?;
        parse_response(response).await
    }

    pub async fn post_json<T, B>(&self, url: Url, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.client.post(url).json(body).send().await?;
        parse_response(response).await
    }

    pub async fn put_json<T, B>(&self, url: Url, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.client.put(url).json(body).send().await?;
        parse_response(response).await
    }

    pub async fn delete(&self, url: Url) -> Result<(), ClientError> {
        let response = self.client.delete(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    if response.status().is_success() {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    } else {
        Err(error_from(response).await)
    }
}

async fn error_from(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    match response.text().await {
        Ok(text) => match serde_json::from_str::<ApiError>(&text) {
            Ok(api_error) => ClientError::Api(api_error),
            Err(_) => ClientError::Status { status, body: text },
        },
        Err(e) => ClientError::Http(e),
    }
}

/// Cached view of one project
pub struct ProjectStore {
    rest: RestClient,
    job_no: String,
    pub components: Vec<Component>,
    pub templates: Vec<Template>,
    pub equipment: Vec<EquipmentView>,
    pub cables: Vec<Cable>,
    pub ccs: Vec<Cc>,
    pub progress: Vec<ProgressRow>,
    toasts: Vec<Toast>,
}

impl ProjectStore {
    pub fn new(rest: RestClient, job_no: impl Into<String>) -> Self {
        Self {
            rest,
            job_no: job_no.into(),
            components: Vec::new(),
            templates: Vec::new(),
            equipment: Vec::new(),
            cables: Vec::new(),
            ccs: Vec::new(),
            progress: Vec::new(),
            toasts: Vec::new(),
        }
    }

    /// Open a project and load all its lists
    pub async fn open(rest: RestClient, job_no: impl Into<String>) -> Result<Self, ClientError> {
        let mut store = Self::new(rest, job_no);
        store.fetch_all().await?;
        Ok(store)
    }

    pub fn job_no(&self) -> &str {
        &self.job_no
    }

    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }

    pub fn take_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut all = vec!["projects", self.job_no.as_str()];
        all.extend_from_slice(segments);
        self.rest.url(&all)
    }

    /// Queue an error toast for a failed call and hand the result back
    fn check<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            warn!("{}: {}", self.job_no, e);
            self.toasts.push(Toast::error(e.to_string()));
        }
        result
    }

    pub async fn fetch_all(&mut self) -> Result<(), ClientError> {
        let result = async {
            let components = self.rest.get_json::<Vec<Component>>(self.url(&["components"])).await?;
            let templates = self.rest.get_json::<Vec<Template>>(self.url(&["templates"])).await?;
            let ccs = self.rest.get_json::<Vec<Cc>>(self.url(&["ccs"])).await?;
            Ok::<_, ClientError>((components, templates, ccs))
        }
        .await;
        let (components, templates, ccs) = self.check(result)?;
        self.components = components;
        self.templates = templates;
        self.ccs = ccs;
        self.refresh_derived().await
    }

    /// Reload the lists whose contents the server derives from others
    pub async fn refresh_derived(&mut self) -> Result<(), ClientError> {
        let result = async {
            let equipment = self.rest.get_json::<Vec<EquipmentView>>(self.url(&["equipment"])).await?;
            let cables = self.rest.get_json::<Vec<Cable>>(self.url(&["cabscheds"])).await?;
            let progress = self.rest.get_json::<Vec<ProgressRow>>(self.url(&["progress"])).await?;
            Ok::<_, ClientError>((equipment, cables, progress))
        }
        .await;
        let (equipment, cables, progress) = self.check(result)?;
        self.equipment = equipment;
        self.cables = cables;
        self.progress = progress;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub async fn add_component(&mut self, new: NewComponent) -> Result<Component, ClientError> {
        let result = self.rest.post_json(self.url(&["components"]), &new).await;
        let component: Component = self.check(result)?;
        self.components.push(component.clone());
        Ok(component)
    }

    pub async fn update_component(
        &mut self,
        id: u64,
        new: NewComponent,
    ) -> Result<Component, ClientError> {
        let result = self
            .rest
            .put_json(self.url(&["components", &id.to_string()]), &new)
            .await;
        let component: Component = self.check(result)?;
        if let Some(cached) = self.components.iter_mut().find(|c| c.id == id) {
            *cached = component.clone();
        }
        // norm changes move recoveries
        self.refresh_derived().await?;
        Ok(component)
    }

    pub async fn delete_component(&mut self, id: u64) -> Result<(), ClientError> {
        let result = self
            .rest
            .delete(self.url(&["components", &id.to_string()]))
            .await;
        self.check(result)?;
        self.components.retain(|c| c.id != id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub async fn add_template(&mut self, template: Template) -> Result<Template, ClientError> {
        let result = self.rest.post_json(self.url(&["templates"]), &template).await;
        let template: Template = self.check(result)?;
        self.templates.push(template.clone());
        Ok(template)
    }

    pub async fn update_template(
        &mut self,
        name: &str,
        template: Template,
    ) -> Result<Template, ClientError> {
        let result = self
            .rest
            .put_json(self.url(&["templates", name]), &template)
            .await;
        let template: Template = self.check(result)?;
        if let Some(cached) = self.templates.iter_mut().find(|t| t.name == name) {
            *cached = template.clone();
        }
        self.refresh_derived().await?;
        Ok(template)
    }

    pub async fn delete_template(&mut self, name: &str) -> Result<(), ClientError> {
        let result = self.rest.delete(self.url(&["templates", name])).await;
        self.check(result)?;
        self.templates.retain(|t| t.name != name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Equipment
    // ------------------------------------------------------------------

    pub async fn add_equipment(&mut self, new: NewEquipment) -> Result<EquipmentView, ClientError> {
        let result = self.rest.post_json(self.url(&["equipment"]), &new).await;
        let view: EquipmentView = self.check(result)?;
        self.equipment.push(view.clone());
        self.refresh_derived().await?;
        Ok(view)
    }

    pub async fn update_equipment(
        &mut self,
        equip_ref: &str,
        new: NewEquipment,
    ) -> Result<EquipmentView, ClientError> {
        let result = self
            .rest
            .put_json(self.url(&["equipment", equip_ref]), &new)
            .await;
        let view: EquipmentView = self.check(result)?;
        // a rename follows into cables and CCs
        self.refresh_derived().await?;
        let result = self.rest.get_json(self.url(&["ccs"])).await;
        self.ccs = self.check(result)?;
        Ok(view)
    }

    pub async fn delete_equipment(&mut self, equip_ref: &str) -> Result<(), ClientError> {
        let result = self.rest.delete(self.url(&["equipment", equip_ref])).await;
        self.check(result)?;
        self.equipment.retain(|e| e.equip_ref != equip_ref);
        self.progress.retain(|r| r.equip_ref != equip_ref);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cable schedule
    // ------------------------------------------------------------------

    pub async fn add_cable(&mut self, new: NewCable) -> Result<Cable, ClientError> {
        let result = self.rest.post_json(self.url(&["cabscheds"]), &new).await;
        let cable: Cable = self.check(result)?;
        self.cables.push(cable.clone());
        self.refresh_derived().await?;
        Ok(cable)
    }

    pub async fn update_cable(&mut self, cab_num: &str, new: NewCable) -> Result<Cable, ClientError> {
        let result = self
            .rest
            .put_json(self.url(&["cabscheds", cab_num]), &new)
            .await;
        let cable: Cable = self.check(result)?;
        self.refresh_derived().await?;
        Ok(cable)
    }

    pub async fn delete_cable(&mut self, cab_num: &str) -> Result<(), ClientError> {
        let result = self.rest.delete(self.url(&["cabscheds", cab_num])).await;
        self.check(result)?;
        self.refresh_derived().await
    }

    // ------------------------------------------------------------------
    // CCs
    // ------------------------------------------------------------------

    pub async fn add_cc(&mut self, new: NewCc) -> Result<Cc, ClientError> {
        let result = self.rest.post_json(self.url(&["ccs"]), &new).await;
        let cc: Cc = self.check(result)?;
        self.ccs.push(cc.clone());
        Ok(cc)
    }

    pub async fn update_cc(&mut self, cc_ref: &str, new: NewCc) -> Result<Cc, ClientError> {
        let result = self.rest.put_json(self.url(&["ccs", cc_ref]), &new).await;
        let cc: Cc = self.check(result)?;
        self.replace_cc(cc_ref, cc.clone());
        Ok(cc)
    }

    pub async fn delete_cc(&mut self, cc_ref: &str) -> Result<(), ClientError> {
        let result = self.rest.delete(self.url(&["ccs", cc_ref])).await;
        self.check(result)?;
        self.ccs.retain(|c| c.cc_ref != cc_ref);
        Ok(())
    }

    /// Mark a CC lifted on `date`, or today when `None`
    pub async fn lift_cc(&mut self, cc_ref: &str, date: Option<NaiveDate>) -> Result<Cc, ClientError> {
        let body = serde_json::json!({ "date": date });
        let result = self
            .rest
            .post_json(self.url(&["ccs", cc_ref, "lift"]), &body)
            .await;
        let cc: Cc = self.check(result)?;
        self.replace_cc(cc_ref, cc.clone());
        Ok(cc)
    }

    pub async fn unlift_cc(&mut self, cc_ref: &str) -> Result<Cc, ClientError> {
        let result = self
            .rest
            .post_json(self.url(&["ccs", cc_ref, "unlift"]), &serde_json::json!({}))
            .await;
        let cc: Cc = self.check(result)?;
        self.replace_cc(cc_ref, cc.clone());
        Ok(cc)
    }

    fn replace_cc(&mut self, cc_ref: &str, cc: Cc) {
        match self.ccs.iter_mut().find(|c| c.cc_ref == cc_ref) {
            Some(cached) => *cached = cc,
            None => self.ccs.push(cc),
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Apply `percent` to each selected progress row, one request per row.
    ///
    /// Stops at the first failure; rows already written stay written and the
    /// cached lists are reloaded before the error is returned.
    pub async fn set_percent(&mut self, rows: &[ProgressRow], percent: f64) -> Result<usize, ClientError> {
        let planned = completion::plan_updates(rows, percent);
        let planned = self.check(planned.map_err(ClientError::from))?;

        for plan in &planned {
            debug!("{}: {} {} -> {}%", self.job_no, plan.kind, plan.id, plan.update.percent);
            let result = self
                .rest
                .put_json::<ProgressRow, CompletionUpdate>(
                    self.url(&["progress", plan.kind.path_segment(), &plan.id]),
                    &plan.update,
                )
                .await;
            let row = match self.check(result) {
                Ok(row) => row,
                Err(e) => {
                    // rows before this one are written, pick them up
                    let _ = self.refresh_derived().await;
                    return Err(e);
                }
            };
            if let Some(cached) = self
                .progress
                .iter_mut()
                .find(|r| r.kind == row.kind && r.id == row.id)
            {
                *cached = row;
            }
        }

        self.refresh_derived().await?;
        Ok(planned.len())
    }

    /// Spread `percent` over an equipment's component rows and its cables
    pub async fn spread_equipment(
        &mut self,
        equip_ref: &str,
        percent: f64,
    ) -> Result<EquipmentView, ClientError> {
        let result = self
            .rest
            .put_json(
                self.url(&["equipment", equip_ref, "percent"]),
                &PercentInput { percent },
            )
            .await;
        let view: EquipmentView = self.check(result)?;
        self.refresh_derived().await?;
        Ok(view)
    }

    pub async fn spread_cable(&mut self, cab_num: &str, percent: f64) -> Result<Cable, ClientError> {
        let result = self
            .rest
            .put_json(
                self.url(&["cabscheds", cab_num, "percent"]),
                &PercentInput { percent },
            )
            .await;
        let cable: Cable = self.check(result)?;
        self.refresh_derived().await?;
        Ok(cable)
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    fn known(&self) -> Known {
        Known::new(
            self.components.iter(),
            self.templates.iter().map(|t| t.name.as_str()),
            self.equipment.iter().map(|e| e.equip_ref.as_str()),
            self.cables.iter().map(|c| c.cab_num.as_str()),
        )
    }

    /// Check a workbook against the cached lists and bulk-create the rows
    /// that pass. Row problems come back in the report and as toasts.
    pub async fn import(
        &mut self,
        kind: ImportKind,
        filename: &str,
        data: &[u8],
    ) -> Result<ImportReport, ClientError> {
        let sheet = loader::load_upload(filename, data).map_err(|e| ClientError::Load {
            file: filename.to_string(),
            reason: e.to_string(),
        });
        let sheet = self.check(sheet)?;
        let known = self.known();

        let mut report = match kind {
            ImportKind::Components => {
                let Import { records, mut report } = import::import_components(&sheet, &known);
                if !records.is_empty() {
                    let result = self
                        .rest
                        .post_json(self.url(&["components", "bulk"]), &records)
                        .await;
                    let created: Vec<Component> = self.check(result)?;
                    report.created = created.len();
                    self.components.extend(created);
                }
                report
            }
            ImportKind::Templates => {
                let Import { records, mut report } = import::import_templates(&sheet, &known);
                if !records.is_empty() {
                    let result = self
                        .rest
                        .post_json(self.url(&["templates", "bulk"]), &records)
                        .await;
                    let created: Vec<Template> = self.check(result)?;
                    report.created = created.len();
                    self.templates.extend(created);
                }
                report
            }
            ImportKind::Equipment => {
                let Import { records, mut report } = import::import_equipment(&sheet, &known);
                if !records.is_empty() {
                    let result = self
                        .rest
                        .post_json::<Vec<EquipmentView>, _>(self.url(&["equipment", "bulk"]), &records)
                        .await;
                    report.created = self.check(result)?.len();
                    self.refresh_derived().await?;
                }
                report
            }
            ImportKind::Cabscheds => {
                let Import { records, mut report } = import::import_cables(&sheet, &known);
                if !records.is_empty() {
                    let result = self
                        .rest
                        .post_json::<Vec<Cable>, _>(self.url(&["cabscheds", "bulk"]), &records)
                        .await;
                    report.created = self.check(result)?.len();
                    self.refresh_derived().await?;
                }
                report
            }
        };

        for message in report.messages() {
            self.toasts.push(Toast::warning(message));
        }
        if report.created > 0 {
            info!("{}: imported {} {}", self.job_no, report.created, kind.as_str());
            self.toasts.push(Toast::success(format!(
                "Imported {} {}",
                report.created,
                kind.as_str()
            )));
        }
        Ok(report)
    }

    pub async fn import_file(
        &mut self,
        kind: ImportKind,
        path: impl AsRef<Path>,
    ) -> Result<ImportReport, ClientError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = tokio::fs::read(path).await.map_err(|e| ClientError::Load {
            file: path.display().to_string(),
            reason: e.to_string(),
        });
        let data = self.check(data)?;
        self.import(kind, &filename, &data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_segments_are_encoded() {
        let rest = RestClient::new("http://localhost:3000/").unwrap();
        let url = rest.url(&["projects", "J1", "equipment", "DB 1/2"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/projects/J1/equipment/DB%201%2F2"
        );
    }

    #[test]
    fn bad_base_url_is_a_config_error() {
        assert!(matches!(
            RestClient::new("not a url"),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn api_errors_display_their_message() {
        let err = ClientError::Api(ApiError::not_found("equipment P-1 not found"));
        assert_eq!(err.to_string(), "equipment P-1 not found");
    }

    #[tokio::test]
    async fn unreadable_upload_queues_a_toast() {
        let rest = RestClient::new("http://127.0.0.1:9").unwrap();
        let mut store = ProjectStore::new(rest, "J1");
        let result = store.import(ImportKind::Components, "list.txt", b"x").await;
        assert!(matches!(result, Err(ClientError::Load { .. })));
        let toasts = store.take_toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Error);
        assert!(store.toasts().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_percent_is_rejected_before_any_request() {
        let rest = RestClient::new("http://127.0.0.1:9").unwrap();
        let mut store = ProjectStore::new(rest, "J1");
        let row = ProgressRow {
            id: "C1A".into(),
            kind: crate::model::RowKind::CableA,
            equip_ref: "P-1".into(),
            description: "A gland".into(),
            lab_norm: 1.0,
            percent: 0,
            current_recovery: 0.0,
        };
        let result = store.set_percent(&[row], 120.0).await;
        assert!(matches!(result, Err(ClientError::Invalid(_))));
        assert_eq!(store.toasts().len(), 1);
    }
}
