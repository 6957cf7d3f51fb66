//! In-memory relational store.
//!
//! Every project owns its own tables. The unique and foreign-key rules a
//! relational schema would enforce are checked here, so a handler never
//! needs to pre-check anything before calling a mutation.

use crate::completion::{self, CABLE_KINDS, CableNorms};
use crate::error::StoreError;
use crate::model::{
    Cable, Cc, Component, ComponentRow, CompletionUpdate, Equipment, EquipmentView, NewCable,
    NewCc, NewComponent, NewEquipment, ProgressRow, Project, ProjectSummary, RowKind,
    SectionSummary, Template,
};
use crate::validation;
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Composite key of the (name, lab norm) unique constraint on components
pub fn component_key(name: &str, lab_norm: f64) -> String {
    format!("{}|{}", name.trim(), lab_norm)
}

struct NormSnapshot {
    components: HashMap<u64, f64>,
    cables: HashMap<String, CableNorms>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Database {
    projects: BTreeMap<String, ProjectData>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.values().map(|p| p.project.clone()).collect()
    }

    pub fn project(&self, job_no: &str) -> Result<&ProjectData, StoreError> {
        self.projects
            .get(job_no)
            .ok_or_else(|| StoreError::ProjectNotFound(job_no.to_string()))
    }

    pub fn project_mut(&mut self, job_no: &str) -> Result<&mut ProjectData, StoreError> {
        self.projects
            .get_mut(job_no)
            .ok_or_else(|| StoreError::ProjectNotFound(job_no.to_string()))
    }

    pub fn create_project(&mut self, project: Project) -> Result<Project, StoreError> {
        validation::validate_project(&project)?;
        if self.projects.contains_key(&project.job_no) {
            return Err(StoreError::duplicate("project", &project.job_no));
        }
        info!("created project {}", project.job_no);
        self.projects
            .insert(project.job_no.clone(), ProjectData::new(project.clone()));
        Ok(project)
    }

    /// Update title/address, renaming the job number when it changes
    pub fn update_project(&mut self, job_no: &str, project: Project) -> Result<Project, StoreError> {
        validation::validate_project(&project)?;
        if project.job_no != job_no && self.projects.contains_key(&project.job_no) {
            return Err(StoreError::duplicate("project", &project.job_no));
        }
        let mut data = self
            .projects
            .remove(job_no)
            .ok_or_else(|| StoreError::ProjectNotFound(job_no.to_string()))?;
        data.project = project.clone();
        self.projects.insert(project.job_no.clone(), data);
        Ok(project)
    }

    pub fn delete_project(&mut self, job_no: &str) -> Result<(), StoreError> {
        self.projects
            .remove(job_no)
            .map(|_| info!("deleted project {}", job_no))
            .ok_or_else(|| StoreError::ProjectNotFound(job_no.to_string()))
    }
}

/// The tables of one project
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ProjectData {
    pub project: Project,
    components: BTreeMap<u64, Component>,
    templates: BTreeMap<String, Template>,
    equipment: BTreeMap<String, Equipment>,
    cables: BTreeMap<String, Cable>,
    ccs: BTreeMap<String, Cc>,
    next_component_id: u64,
    next_row_id: u64,
}

impl ProjectData {
    pub fn new(project: Project) -> Self {
        ProjectData {
            project,
            components: BTreeMap::new(),
            templates: BTreeMap::new(),
            equipment: BTreeMap::new(),
            cables: BTreeMap::new(),
            ccs: BTreeMap::new(),
            next_component_id: 1,
            next_row_id: 1,
        }
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn components(&self) -> Vec<Component> {
        self.components.values().cloned().collect()
    }

    pub fn component(&self, id: u64) -> Option<&Component> {
        self.components.get(&id)
    }

    /// First component (lowest id) with the given name; cable sizes refer
    /// to components this way
    pub fn component_by_name(&self, name: &str) -> Option<&Component> {
        let name = name.trim();
        self.components.values().find(|c| c.name == name)
    }

    pub fn find_component(&self, name: &str, lab_norm: f64) -> Option<&Component> {
        let key = component_key(name, lab_norm);
        self.components
            .values()
            .find(|c| component_key(&c.name, c.lab_norm) == key)
    }

    fn check_component_unique(&self, c: &NewComponent, except: Option<u64>) -> Result<(), StoreError> {
        match self.find_component(&c.name, c.lab_norm) {
            Some(existing) if Some(existing.id) != except => Err(StoreError::duplicate(
                "component",
                format!("{} (lab norm {})", c.name, c.lab_norm),
            )),
            _ => Ok(()),
        }
    }

    pub fn create_component(&mut self, new: NewComponent) -> Result<Component, StoreError> {
        let new = new.trimmed();
        validation::validate_component(&new)?;
        self.check_component_unique(&new, None)?;
        let id = self.next_component_id;
        self.next_component_id += 1;
        let component = new.into_component(id);
        debug!("{}: component {} = {}", self.project.job_no, id, component.name);
        self.components.insert(id, component.clone());
        Ok(component)
    }

    /// Insert all components or none
    pub fn bulk_create_components(
        &mut self,
        batch: Vec<NewComponent>,
    ) -> Result<Vec<Component>, StoreError> {
        let batch: Vec<NewComponent> = batch.into_iter().map(NewComponent::trimmed).collect();
        let mut seen = HashSet::new();
        for c in &batch {
            validation::validate_component(c)?;
            self.check_component_unique(c, None)?;
            if !seen.insert(component_key(&c.name, c.lab_norm)) {
                return Err(StoreError::duplicate(
                    "component",
                    format!("{} (lab norm {})", c.name, c.lab_norm),
                ));
            }
        }
        let created: Vec<Component> = batch
            .into_iter()
            .map(|c| self.create_component(c))
            .collect::<Result<_, _>>()?;
        info!(
            "{}: bulk created {} components",
            self.project.job_no,
            created.len()
        );
        Ok(created)
    }

    pub fn update_component(&mut self, id: u64, new: NewComponent) -> Result<Component, StoreError> {
        let new = new.trimmed();
        validation::validate_component(&new)?;
        let old_name = self
            .components
            .get(&id)
            .map(|c| c.name.clone())
            .ok_or_else(|| StoreError::not_found("component", id.to_string()))?;
        self.check_component_unique(&new, Some(id))?;
        if old_name != new.name {
            if let Some(cable) = self.cables.values().find(|c| c.cab_size == old_name) {
                if self.components.values().filter(|c| c.name == old_name).count() == 1 {
                    return Err(StoreError::InUse {
                        entity: "component",
                        key: old_name,
                        by: format!("cable {}", cable.cab_num),
                    });
                }
            }
        }
        let before = self.norm_snapshot();
        let component = new.into_component(id);
        self.components.insert(id, component.clone());
        self.reweight_recoveries(&before);
        Ok(component)
    }

    pub fn delete_component(&mut self, id: u64) -> Result<(), StoreError> {
        let component = self
            .components
            .get(&id)
            .ok_or_else(|| StoreError::not_found("component", id.to_string()))?;
        if let Some(t) = self.templates.values().find(|t| t.components.contains(&id)) {
            return Err(StoreError::InUse {
                entity: "component",
                key: component.name.clone(),
                by: format!("template {}", t.name),
            });
        }
        let same_name = self
            .components
            .values()
            .filter(|c| c.name == component.name)
            .count();
        if same_name == 1 {
            if let Some(cable) = self.cables.values().find(|c| c.cab_size == component.name) {
                return Err(StoreError::InUse {
                    entity: "component",
                    key: component.name.clone(),
                    by: format!("cable {}", cable.cab_num),
                });
            }
        }
        let before = self.norm_snapshot();
        self.components.remove(&id);
        self.reweight_recoveries(&before);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub fn templates(&self) -> Vec<Template> {
        self.templates.values().cloned().collect()
    }

    fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    fn check_template(&self, template: &Template) -> Result<(), StoreError> {
        validation::validate_template_name(&template.name)?;
        match template
            .components
            .iter()
            .find(|id| !self.components.contains_key(id))
        {
            Some(id) => Err(StoreError::not_found("component", id.to_string())),
            None => Ok(()),
        }
    }

    pub fn create_template(&mut self, template: Template) -> Result<Template, StoreError> {
        self.check_template(&template)?;
        if self.templates.contains_key(&template.name) {
            return Err(StoreError::duplicate("template", &template.name));
        }
        self.templates
            .insert(template.name.clone(), template.clone());
        Ok(template)
    }

    pub fn bulk_create_templates(
        &mut self,
        batch: Vec<Template>,
    ) -> Result<Vec<Template>, StoreError> {
        let mut seen = HashSet::new();
        for t in &batch {
            self.check_template(t)?;
            if self.templates.contains_key(&t.name) || !seen.insert(t.name.clone()) {
                return Err(StoreError::duplicate("template", &t.name));
            }
        }
        for t in &batch {
            self.templates.insert(t.name.clone(), t.clone());
        }
        info!(
            "{}: bulk created {} templates",
            self.project.job_no,
            batch.len()
        );
        Ok(batch)
    }

    /// Replace a template. Equipment using it follows a rename and gets its
    /// component rows rebuilt.
    pub fn update_template(&mut self, name: &str, template: Template) -> Result<Template, StoreError> {
        self.check_template(&template)?;
        if !self.templates.contains_key(name) {
            return Err(StoreError::not_found("template", name));
        }
        if template.name != name && self.templates.contains_key(&template.name) {
            return Err(StoreError::duplicate("template", &template.name));
        }
        self.templates.remove(name);
        self.templates
            .insert(template.name.clone(), template.clone());

        let users: Vec<String> = self
            .equipment
            .values()
            .filter(|e| e.template == name)
            .map(|e| e.equip_ref.clone())
            .collect();
        for equip_ref in users {
            if let Some(mut equipment) = self.equipment.remove(&equip_ref) {
                equipment.template = template.name.clone();
                equipment.rows = self.rebuild_rows(&template.components, &equipment.rows);
                self.equipment.insert(equip_ref, equipment);
            }
        }
        Ok(template)
    }

    pub fn delete_template(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.templates.contains_key(name) {
            return Err(StoreError::not_found("template", name));
        }
        if let Some(e) = self.equipment.values().find(|e| e.template == name) {
            return Err(StoreError::InUse {
                entity: "template",
                key: name.to_string(),
                by: format!("equipment {}", e.equip_ref),
            });
        }
        self.templates.remove(name);
        Ok(())
    }

    /// Component rows for a template's entries, reusing earlier rows for
    /// the same component so their completion survives
    fn rebuild_rows(&mut self, components: &[u64], previous: &[ComponentRow]) -> Vec<ComponentRow> {
        let mut unused: Vec<&ComponentRow> = previous.iter().collect();
        let mut rows = Vec::with_capacity(components.len());
        for &component_id in components {
            match unused.iter().position(|r| r.component_id == component_id) {
                Some(pos) => rows.push(unused.remove(pos).clone()),
                None => {
                    rows.push(ComponentRow {
                        id: self.next_row_id,
                        component_id,
                        percent: 0,
                        current_recovery: 0.0,
                    });
                    self.next_row_id += 1;
                }
            }
        }
        rows
    }

    // ------------------------------------------------------------------
    // Equipment
    // ------------------------------------------------------------------

    pub fn equipment(&self, equip_ref: &str) -> Option<&Equipment> {
        self.equipment.get(equip_ref)
    }

    pub fn equipment_list(&self) -> Vec<EquipmentView> {
        self.equipment.values().map(|e| self.view(e)).collect()
    }

    pub fn equipment_view(&self, equip_ref: &str) -> Result<EquipmentView, StoreError> {
        self.equipment
            .get(equip_ref)
            .map(|e| self.view(e))
            .ok_or_else(|| StoreError::not_found("equipment", equip_ref))
    }

    fn view(&self, e: &Equipment) -> EquipmentView {
        let (lab_norm, current_recovery) = self.equipment_totals(e);
        EquipmentView {
            equip_ref: e.equip_ref.clone(),
            description: e.description.clone(),
            section: e.section.clone(),
            area: e.area.clone(),
            tend_section: e.tend_section.clone(),
            template: e.template.clone(),
            revision: e.revision.clone(),
            lab_norm,
            current_recovery,
            percent_complete: completion::percent_of(current_recovery, lab_norm),
        }
    }

    /// Norm and recovery over an equipment's component rows and cables
    fn equipment_totals(&self, e: &Equipment) -> (f64, f64) {
        let mut norm = 0.0;
        let mut recovery = 0.0;
        for row in &e.rows {
            norm += self.components.get(&row.component_id).map_or(0.0, |c| c.lab_norm);
            recovery += row.current_recovery;
        }
        for cable in self.cables.values().filter(|c| c.equip_ref == e.equip_ref) {
            norm += self.cable_norms(cable).total();
            recovery += completion::cable_recovery(cable);
        }
        (norm, recovery)
    }

    fn equipment_rows(&mut self, new: &NewEquipment) -> Result<Vec<ComponentRow>, StoreError> {
        let template = self
            .templates
            .get(&new.template)
            .ok_or_else(|| StoreError::not_found("template", &new.template))?
            .components
            .clone();
        Ok(self.rebuild_rows(&template, &[]))
    }

    pub fn create_equipment(&mut self, new: NewEquipment) -> Result<EquipmentView, StoreError> {
        validation::validate_equipment(&new)?;
        if self.equipment.contains_key(&new.equip_ref) {
            return Err(StoreError::duplicate("equipment", &new.equip_ref));
        }
        let rows = self.equipment_rows(&new)?;
        let equipment = Equipment {
            equip_ref: new.equip_ref,
            description: new.description,
            section: new.section,
            area: new.area,
            tend_section: new.tend_section,
            template: new.template,
            revision: new.revision,
            rows,
        };
        let view = self.view(&equipment);
        self.equipment
            .insert(equipment.equip_ref.clone(), equipment);
        Ok(view)
    }

    /// Insert all equipment or none
    pub fn bulk_create_equipment(
        &mut self,
        batch: Vec<NewEquipment>,
    ) -> Result<Vec<EquipmentView>, StoreError> {
        let mut seen = HashSet::new();
        for e in &batch {
            validation::validate_equipment(e)?;
            if !self.templates.contains_key(&e.template) {
                return Err(StoreError::not_found("template", &e.template));
            }
            if self.equipment.contains_key(&e.equip_ref) || !seen.insert(e.equip_ref.clone()) {
                return Err(StoreError::duplicate("equipment", &e.equip_ref));
            }
        }
        let created: Vec<EquipmentView> = batch
            .into_iter()
            .map(|e| self.create_equipment(e))
            .collect::<Result<_, _>>()?;
        info!(
            "{}: bulk created {} equipment",
            self.project.job_no,
            created.len()
        );
        Ok(created)
    }

    /// Update equipment fields. A rename carries over to cables and CCs, a
    /// template change rebuilds the component rows.
    pub fn update_equipment(
        &mut self,
        equip_ref: &str,
        new: NewEquipment,
    ) -> Result<EquipmentView, StoreError> {
        validation::validate_equipment(&new)?;
        let components = self
            .template(&new.template)
            .map(|t| t.components.clone())
            .ok_or_else(|| StoreError::not_found("template", &new.template))?;
        if new.equip_ref != equip_ref && self.equipment.contains_key(&new.equip_ref) {
            return Err(StoreError::duplicate("equipment", &new.equip_ref));
        }
        let mut equipment = self
            .equipment
            .remove(equip_ref)
            .ok_or_else(|| StoreError::not_found("equipment", equip_ref))?;
        if equipment.template != new.template {
            equipment.rows = self.rebuild_rows(&components, &equipment.rows);
        }
        if new.equip_ref != equip_ref {
            for cable in self.cables.values_mut().filter(|c| c.equip_ref == equip_ref) {
                cable.equip_ref = new.equip_ref.clone();
            }
            for cc in self.ccs.values_mut() {
                for r in cc.equip_refs.iter_mut().filter(|r| r.as_str() == equip_ref) {
                    *r = new.equip_ref.clone();
                }
            }
        }
        equipment.equip_ref = new.equip_ref;
        equipment.description = new.description;
        equipment.section = new.section;
        equipment.area = new.area;
        equipment.tend_section = new.tend_section;
        equipment.template = new.template;
        equipment.revision = new.revision;
        let view = self.view(&equipment);
        self.equipment
            .insert(equipment.equip_ref.clone(), equipment);
        Ok(view)
    }

    pub fn delete_equipment(&mut self, equip_ref: &str) -> Result<(), StoreError> {
        if !self.equipment.contains_key(equip_ref) {
            return Err(StoreError::not_found("equipment", equip_ref));
        }
        let in_use = |by: String| StoreError::InUse {
            entity: "equipment",
            key: equip_ref.to_string(),
            by,
        };
        if let Some(cable) = self.cables.values().find(|c| c.equip_ref == equip_ref) {
            return Err(in_use(format!("cable {}", cable.cab_num)));
        }
        if let Some(cc) = self
            .ccs
            .values()
            .find(|cc| cc.equip_refs.iter().any(|r| r == equip_ref))
        {
            return Err(in_use(format!("CC {}", cc.cc_ref)));
        }
        self.equipment.remove(equip_ref);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cables
    // ------------------------------------------------------------------

    pub fn cables(&self) -> Vec<Cable> {
        self.cables.values().cloned().collect()
    }

    pub fn cable(&self, cab_num: &str) -> Option<&Cable> {
        self.cables.get(cab_num)
    }

    pub fn cable_norms(&self, cable: &Cable) -> CableNorms {
        CableNorms::for_cable(cable, self.component_by_name(&cable.cab_size))
    }

    fn check_cable_refs(&self, new: &NewCable) -> Result<(), StoreError> {
        validation::validate_cable(new)?;
        if self.component_by_name(&new.cab_size).is_none() {
            return Err(StoreError::not_found("cable size", &new.cab_size));
        }
        if !self.equipment.contains_key(&new.equip_ref) {
            return Err(StoreError::not_found("equipment", &new.equip_ref));
        }
        Ok(())
    }

    pub fn create_cable(&mut self, new: NewCable) -> Result<Cable, StoreError> {
        let new = new.trimmed();
        self.check_cable_refs(&new)?;
        if self.cables.contains_key(&new.cab_num) {
            return Err(StoreError::duplicate("cable", &new.cab_num));
        }
        let cable = new.into_cable();
        self.cables.insert(cable.cab_num.clone(), cable.clone());
        Ok(cable)
    }

    /// Insert all cables or none
    pub fn bulk_create_cables(&mut self, batch: Vec<NewCable>) -> Result<Vec<Cable>, StoreError> {
        let batch: Vec<NewCable> = batch.into_iter().map(NewCable::trimmed).collect();
        let mut seen = HashSet::new();
        for c in &batch {
            self.check_cable_refs(c)?;
            if self.cables.contains_key(&c.cab_num) || !seen.insert(c.cab_num.clone()) {
                return Err(StoreError::duplicate("cable", &c.cab_num));
            }
        }
        let created: Vec<Cable> = batch.into_iter().map(NewCable::into_cable).collect();
        for cable in &created {
            self.cables.insert(cable.cab_num.clone(), cable.clone());
        }
        info!(
            "{}: bulk created {} cables",
            self.project.job_no,
            created.len()
        );
        Ok(created)
    }

    /// Update a cable run; completion is kept and its recovery re-weighted
    /// to the new norms
    pub fn update_cable(&mut self, cab_num: &str, new: NewCable) -> Result<Cable, StoreError> {
        let new = new.trimmed();
        self.check_cable_refs(&new)?;
        if new.cab_num != cab_num && self.cables.contains_key(&new.cab_num) {
            return Err(StoreError::duplicate("cable", &new.cab_num));
        }
        let mut before = self.norm_snapshot();
        let old = self
            .cables
            .remove(cab_num)
            .ok_or_else(|| StoreError::not_found("cable", cab_num))?;
        let key = new.cab_num.clone();
        if let Some(norms) = before.cables.remove(cab_num) {
            before.cables.insert(key.clone(), norms);
        }
        let mut cable = new.into_cable();
        cable.pull = old.pull;
        cable.a_gland = old.a_gland;
        cable.z_gland = old.z_gland;
        cable.test = old.test;
        self.cables.insert(cable.cab_num.clone(), cable);
        self.reweight_recoveries(&before);
        Ok(self.cables[&key].clone())
    }

    pub fn delete_cable(&mut self, cab_num: &str) -> Result<(), StoreError> {
        self.cables
            .remove(cab_num)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("cable", cab_num))
    }

    // ------------------------------------------------------------------
    // CCs
    // ------------------------------------------------------------------

    pub fn ccs(&self) -> Vec<Cc> {
        self.ccs.values().cloned().collect()
    }

    fn check_cc(&self, new: &NewCc) -> Result<(), StoreError> {
        validation::validate_cc_ref(&new.cc_ref)?;
        match new
            .equip_refs
            .iter()
            .find(|r| !self.equipment.contains_key(r.as_str()))
        {
            Some(r) => Err(StoreError::not_found("equipment", r)),
            None => Ok(()),
        }
    }

    pub fn create_cc(&mut self, new: NewCc) -> Result<Cc, StoreError> {
        self.check_cc(&new)?;
        if self.ccs.contains_key(&new.cc_ref) {
            return Err(StoreError::duplicate("CC", &new.cc_ref));
        }
        let cc = Cc {
            cc_ref: new.cc_ref,
            date: new.date,
            description: new.description,
            equip_refs: new.equip_refs,
            lifted: false,
            lifted_on: None,
        };
        self.ccs.insert(cc.cc_ref.clone(), cc.clone());
        Ok(cc)
    }

    pub fn update_cc(&mut self, cc_ref: &str, new: NewCc) -> Result<Cc, StoreError> {
        self.check_cc(&new)?;
        if new.cc_ref != cc_ref && self.ccs.contains_key(&new.cc_ref) {
            return Err(StoreError::duplicate("CC", &new.cc_ref));
        }
        let old = self
            .ccs
            .remove(cc_ref)
            .ok_or_else(|| StoreError::not_found("CC", cc_ref))?;
        let cc = Cc {
            cc_ref: new.cc_ref,
            date: new.date,
            description: new.description,
            equip_refs: new.equip_refs,
            lifted: old.lifted,
            lifted_on: old.lifted_on,
        };
        self.ccs.insert(cc.cc_ref.clone(), cc.clone());
        Ok(cc)
    }

    pub fn delete_cc(&mut self, cc_ref: &str) -> Result<(), StoreError> {
        self.ccs
            .remove(cc_ref)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("CC", cc_ref))
    }

    /// Mark a CC lifted on `on`, or clear the lift when `on` is `None`
    pub fn set_cc_lift(&mut self, cc_ref: &str, on: Option<NaiveDate>) -> Result<Cc, StoreError> {
        let cc = self
            .ccs
            .get_mut(cc_ref)
            .ok_or_else(|| StoreError::not_found("CC", cc_ref))?;
        cc.lifted = on.is_some();
        cc.lifted_on = on;
        Ok(cc.clone())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Every row of the progress grid, equipment by equipment: component
    /// rows first, then each attached cable with its gland and test rows
    pub fn progress_rows(&self) -> Vec<ProgressRow> {
        let mut rows = Vec::new();
        for e in self.equipment.values() {
            for row in &e.rows {
                let component = self.components.get(&row.component_id);
                rows.push(ProgressRow {
                    id: row.id.to_string(),
                    kind: RowKind::Component,
                    equip_ref: e.equip_ref.clone(),
                    description: component.map(|c| c.name.clone()).unwrap_or_default(),
                    lab_norm: component.map_or(0.0, |c| c.lab_norm),
                    percent: row.percent,
                    current_recovery: row.current_recovery,
                });
            }
            for cable in self.cables.values().filter(|c| c.equip_ref == e.equip_ref) {
                rows.extend(self.cable_rows(cable));
            }
        }
        rows
    }

    fn cable_rows(&self, cable: &Cable) -> Vec<ProgressRow> {
        let norms = self.cable_norms(cable);
        CABLE_KINDS
            .iter()
            .filter_map(|&kind| {
                let phase = completion::phase(cable, kind)?;
                let description = match kind {
                    RowKind::Cable => format!("{} {}m", cable.cab_size, cable.length),
                    RowKind::CableA => format!("A end gland {}", cable.a_gland_area),
                    RowKind::CableZ => format!("Z end gland {}", cable.z_gland_area),
                    _ => "Test".to_string(),
                };
                Some(ProgressRow {
                    id: completion::cable_row_id(&cable.cab_num, kind),
                    kind,
                    equip_ref: cable.equip_ref.clone(),
                    description,
                    lab_norm: norms.get(kind),
                    percent: phase.percent,
                    current_recovery: phase.current_recovery,
                })
            })
            .collect()
    }

    fn check_update(update: &CompletionUpdate) -> Result<(), StoreError> {
        if !(0..=100).contains(&update.percent) {
            return Err(StoreError::invalid(
                "percent",
                format!("{} is outside 0..=100", update.percent),
            ));
        }
        if !update.current_recovery.is_finite() || update.current_recovery < 0.0 {
            return Err(StoreError::invalid(
                "current_recovery",
                format!("{} is not a non-negative number", update.current_recovery),
            ));
        }
        Ok(())
    }

    /// Write one row's completion. `id` is a component row id for
    /// `Component`, otherwise the base cable number.
    pub fn set_row_completion(
        &mut self,
        kind: RowKind,
        id: &str,
        update: CompletionUpdate,
    ) -> Result<ProgressRow, StoreError> {
        Self::check_update(&update)?;
        debug!(
            "{}: {} {} -> {}%",
            self.project.job_no, kind, id, update.percent
        );
        match kind {
            RowKind::Component => {
                let row_id: u64 = id
                    .parse()
                    .map_err(|_| StoreError::not_found("component row", id))?;
                let (equipment, row) = self
                    .equipment
                    .values_mut()
                    .find_map(|e| {
                        let equip_ref = e.equip_ref.clone();
                        e.rows
                            .iter_mut()
                            .find(|r| r.id == row_id)
                            .map(|r| (equip_ref, r))
                    })
                    .ok_or_else(|| StoreError::not_found("component row", id))?;
                row.percent = update.percent;
                row.current_recovery = update.current_recovery;
                let component_id = row.component_id;
                let component = self.components.get(&component_id);
                Ok(ProgressRow {
                    id: row_id.to_string(),
                    kind,
                    equip_ref: equipment,
                    description: component.map(|c| c.name.clone()).unwrap_or_default(),
                    lab_norm: component.map_or(0.0, |c| c.lab_norm),
                    percent: update.percent,
                    current_recovery: update.current_recovery,
                })
            }
            _ => {
                let cable = self
                    .cables
                    .get_mut(id)
                    .ok_or_else(|| StoreError::not_found("cable", id))?;
                if let Some(phase) = completion::phase_mut(cable, kind) {
                    phase.percent = update.percent;
                    phase.current_recovery = update.current_recovery;
                }
                let cable = &self.cables[id];
                self.cable_rows(cable)
                    .into_iter()
                    .find(|r| r.kind == kind)
                    .ok_or_else(|| StoreError::not_found("cable", id))
            }
        }
    }

    /// Apply `percent` to every phase of a cable
    pub fn spread_cable(&mut self, cab_num: &str, percent: f64) -> Result<Cable, StoreError> {
        completion::check_percent(percent)?;
        let cable = self
            .cables
            .get(cab_num)
            .ok_or_else(|| StoreError::not_found("cable", cab_num))?;
        let norms = self.cable_norms(cable);
        let cable = self
            .cables
            .get_mut(cab_num)
            .ok_or_else(|| StoreError::not_found("cable", cab_num))?;
        for kind in CABLE_KINDS {
            let update = completion::completion_update(percent, norms.get(kind))?;
            if let Some(phase) = completion::phase_mut(cable, kind) {
                phase.percent = update.percent;
                phase.current_recovery = update.current_recovery;
            }
        }
        Ok(cable.clone())
    }

    /// Apply `percent` to all component rows of an equipment and to every
    /// phase of its cables
    pub fn spread_equipment(
        &mut self,
        equip_ref: &str,
        percent: f64,
    ) -> Result<EquipmentView, StoreError> {
        completion::check_percent(percent)?;
        let norms: Vec<f64> = self
            .equipment
            .get(equip_ref)
            .ok_or_else(|| StoreError::not_found("equipment", equip_ref))?
            .rows
            .iter()
            .map(|r| self.components.get(&r.component_id).map_or(0.0, |c| c.lab_norm))
            .collect();
        if let Some(e) = self.equipment.get_mut(equip_ref) {
            for (row, norm) in e.rows.iter_mut().zip(norms) {
                let update = completion::completion_update(percent, norm)?;
                row.percent = update.percent;
                row.current_recovery = update.current_recovery;
            }
        }
        let cab_nums: Vec<String> = self
            .cables
            .values()
            .filter(|c| c.equip_ref == equip_ref)
            .map(|c| c.cab_num.clone())
            .collect();
        for cab_num in cab_nums {
            self.spread_cable(&cab_num, percent)?;
        }
        info!(
            "{}: equipment {} set to {}%",
            self.project.job_no, equip_ref, percent
        );
        self.equipment_view(equip_ref)
    }

    /// Norms the stored recoveries are currently weighted by
    fn norm_snapshot(&self) -> NormSnapshot {
        NormSnapshot {
            components: self
                .components
                .values()
                .map(|c| (c.id, c.lab_norm))
                .collect(),
            cables: self
                .cables
                .values()
                .map(|c| (c.cab_num.clone(), self.cable_norms(c)))
                .collect(),
        }
    }

    /// Re-weight stored recoveries whose norm moved since `before` was
    /// taken. Rows whose norm is unchanged keep their recovery as stored.
    fn reweight_recoveries(&mut self, before: &NormSnapshot) {
        let components = &self.components;
        for e in self.equipment.values_mut() {
            for row in &mut e.rows {
                let old = before.components.get(&row.component_id).copied().unwrap_or(0.0);
                let new = components.get(&row.component_id).map_or(0.0, |c| c.lab_norm);
                row.current_recovery =
                    completion::reweight(row.current_recovery, row.percent, old, new);
            }
        }
        let norms: Vec<(String, CableNorms)> = self
            .cables
            .values()
            .map(|c| (c.cab_num.clone(), self.cable_norms(c)))
            .collect();
        for (cab_num, new) in norms {
            let old = before.cables.get(&cab_num).copied().unwrap_or_default();
            if old == new {
                continue;
            }
            if let Some(cable) = self.cables.get_mut(&cab_num) {
                for kind in CABLE_KINDS {
                    if let Some(phase) = completion::phase_mut(cable, kind) {
                        phase.current_recovery = completion::reweight(
                            phase.current_recovery,
                            phase.percent,
                            old.get(kind),
                            new.get(kind),
                        );
                    }
                }
            }
        }
    }

    /// Totals for the project, broken down by equipment section
    pub fn summary(&self) -> ProjectSummary {
        let mut sections: BTreeMap<String, SectionSummary> = BTreeMap::new();
        for e in self.equipment.values() {
            let (norm, recovery) = self.equipment_totals(e);
            let entry = sections
                .entry(e.section.clone())
                .or_insert_with(|| SectionSummary {
                    section: e.section.clone(),
                    ..Default::default()
                });
            entry.lab_norm += norm;
            entry.current_recovery += recovery;
        }
        let mut summary = ProjectSummary {
            job_no: self.project.job_no.clone(),
            equipment_count: self.equipment.len(),
            cable_count: self.cables.len(),
            ..Default::default()
        };
        for mut section in sections.into_values() {
            section.percent_complete =
                completion::percent_of(section.current_recovery, section.lab_norm);
            summary.lab_norm += section.lab_norm;
            summary.current_recovery += section.current_recovery;
            summary.sections.push(section);
        }
        summary.percent_complete =
            completion::percent_of(summary.current_recovery, summary.lab_norm);
        summary
    }
}
