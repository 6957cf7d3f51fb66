use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An installation project, identified by its job number
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Project {
    pub job_no: String,
    pub title: String,
    #[serde(default)]
    pub address: String,
}

/// A priced unit of work (a fitting, a cable type, a gland...)
///
/// `lab_norm` is the labour-hour norm for one unit. For cable types it is
/// the norm per metre, and `gland_norm`/`test_norm` cover the terminations
/// and the test of one cable.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Component {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub lab_norm: f64,
    #[serde(default)]
    pub lab_uplift: f64,
    #[serde(default)]
    pub mat_norm: f64,
    #[serde(default)]
    pub sub_con_cost: f64,
    #[serde(default)]
    pub sub_con_norm: f64,
    #[serde(default)]
    pub plant_cost: f64,
    #[serde(default)]
    pub gland_norm: f64,
    #[serde(default)]
    pub test_norm: f64,
}

/// Component fields as sent by a client; the store assigns the id
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct NewComponent {
    pub code: String,
    pub name: String,
    pub lab_norm: f64,
    #[serde(default)]
    pub lab_uplift: f64,
    #[serde(default)]
    pub mat_norm: f64,
    #[serde(default)]
    pub sub_con_cost: f64,
    #[serde(default)]
    pub sub_con_norm: f64,
    #[serde(default)]
    pub plant_cost: f64,
    #[serde(default)]
    pub gland_norm: f64,
    #[serde(default)]
    pub test_norm: f64,
}

impl NewComponent {
    /// Drop surrounding whitespace from the code and name
    pub fn trimmed(mut self) -> Self {
        self.code = self.code.trim().to_string();
        self.name = self.name.trim().to_string();
        self
    }

    pub fn into_component(self, id: u64) -> Component {
        Component {
            id,
            code: self.code,
            name: self.name,
            lab_norm: self.lab_norm,
            lab_uplift: self.lab_uplift,
            mat_norm: self.mat_norm,
            sub_con_cost: self.sub_con_cost,
            sub_con_norm: self.sub_con_norm,
            plant_cost: self.plant_cost,
            gland_norm: self.gland_norm,
            test_norm: self.test_norm,
        }
    }
}

impl From<&Component> for NewComponent {
    fn from(c: &Component) -> Self {
        NewComponent {
            code: c.code.clone(),
            name: c.name.clone(),
            lab_norm: c.lab_norm,
            lab_uplift: c.lab_uplift,
            mat_norm: c.mat_norm,
            sub_con_cost: c.sub_con_cost,
            sub_con_norm: c.sub_con_norm,
            plant_cost: c.plant_cost,
            gland_norm: c.gland_norm,
            test_norm: c.test_norm,
        }
    }
}

/// A named, ordered list of components applied to equipment
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Template {
    pub name: String,
    pub components: Vec<u64>,
}

/// Completion of one template entry on one piece of equipment
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ComponentRow {
    pub id: u64,
    pub component_id: u64,
    pub percent: i32,
    pub current_recovery: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Equipment {
    pub equip_ref: String,
    pub description: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub tend_section: String,
    pub template: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub rows: Vec<ComponentRow>,
}

/// Equipment fields as sent by a client; component rows are derived
/// from the template by the store
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct NewEquipment {
    pub equip_ref: String,
    pub description: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub tend_section: String,
    pub template: String,
    #[serde(default)]
    pub revision: String,
}

/// Equipment as listed by the API, with its rolled-up completion
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct EquipmentView {
    pub equip_ref: String,
    pub description: String,
    pub section: String,
    pub area: String,
    pub tend_section: String,
    pub template: String,
    pub revision: String,
    pub lab_norm: f64,
    pub current_recovery: f64,
    pub percent_complete: f64,
}

/// Completion state of one phase of a cable run
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Phase {
    pub percent: i32,
    pub current_recovery: f64,
}

/// A cable schedule entry
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Cable {
    pub cab_num: String,
    pub cab_size: String,
    pub equip_ref: String,
    pub length: f64,
    #[serde(default)]
    pub a_gland_area: String,
    #[serde(default)]
    pub z_gland_area: String,
    #[serde(default)]
    pub pull: Phase,
    #[serde(default)]
    pub a_gland: Phase,
    #[serde(default)]
    pub z_gland: Phase,
    #[serde(default)]
    pub test: Phase,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct NewCable {
    pub cab_num: String,
    pub cab_size: String,
    pub equip_ref: String,
    pub length: f64,
    #[serde(default)]
    pub a_gland_area: String,
    #[serde(default)]
    pub z_gland_area: String,
}

impl NewCable {
    /// Drop surrounding whitespace from the references and the size name
    pub fn trimmed(mut self) -> Self {
        self.cab_num = self.cab_num.trim().to_string();
        self.cab_size = self.cab_size.trim().to_string();
        self.equip_ref = self.equip_ref.trim().to_string();
        self
    }

    pub fn into_cable(self) -> Cable {
        Cable {
            cab_num: self.cab_num,
            cab_size: self.cab_size,
            equip_ref: self.equip_ref,
            length: self.length,
            a_gland_area: self.a_gland_area,
            z_gland_area: self.z_gland_area,
            pull: Phase::default(),
            a_gland: Phase::default(),
            z_gland: Phase::default(),
            test: Phase::default(),
        }
    }
}

/// Change/completion certificate
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Cc {
    pub cc_ref: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub equip_refs: Vec<String>,
    #[serde(default)]
    pub lifted: bool,
    #[serde(default)]
    pub lifted_on: Option<NaiveDate>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NewCc {
    pub cc_ref: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub equip_refs: Vec<String>,
}

/// Which field a progress-grid row writes to
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum RowKind {
    Cable,
    CableA,
    CableZ,
    CableT,
    Component,
}

impl RowKind {
    /// Path segment of the update endpoint for this kind
    pub fn path_segment(self) -> &'static str {
        match self {
            RowKind::Cable => "cable",
            RowKind::CableA => "cable-a",
            RowKind::CableZ => "cable-z",
            RowKind::CableT => "cable-t",
            RowKind::Component => "component",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "cable" => Some(RowKind::Cable),
            "cable-a" => Some(RowKind::CableA),
            "cable-z" => Some(RowKind::CableZ),
            "cable-t" => Some(RowKind::CableT),
            "component" => Some(RowKind::Component),
            _ => None,
        }
    }

    /// Trailing letter appended to a cable number for sub-rows
    pub fn suffix(self) -> Option<char> {
        match self {
            RowKind::CableA => Some('A'),
            RowKind::CableZ => Some('Z'),
            RowKind::CableT => Some('T'),
            RowKind::Cable | RowKind::Component => None,
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// One row of the progress grid
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ProgressRow {
    pub id: String,
    pub kind: RowKind,
    pub equip_ref: String,
    pub description: String,
    pub lab_norm: f64,
    pub percent: i32,
    pub current_recovery: f64,
}

/// Body of a per-row completion update
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct CompletionUpdate {
    pub percent: i32,
    pub current_recovery: f64,
}

/// Body of an equipment or cable spread request
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct PercentInput {
    pub percent: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SectionSummary {
    pub section: String,
    pub lab_norm: f64,
    pub current_recovery: f64,
    pub percent_complete: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProjectSummary {
    pub job_no: String,
    pub equipment_count: usize,
    pub cable_count: usize,
    pub lab_norm: f64,
    pub current_recovery: f64,
    pub percent_complete: f64,
    pub sections: Vec<SectionSummary>,
}

/// Entities that can be bulk-imported from a spreadsheet
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Components,
    Templates,
    Equipment,
    Cabscheds,
}

impl ImportKind {
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "components" => Some(ImportKind::Components),
            "templates" => Some(ImportKind::Templates),
            "equipment" => Some(ImportKind::Equipment),
            "cabscheds" => Some(ImportKind::Cabscheds),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportKind::Components => "components",
            ImportKind::Templates => "templates",
            ImportKind::Equipment => "equipment",
            ImportKind::Cabscheds => "cabscheds",
        }
    }
}
