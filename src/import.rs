//! Spreadsheet import reconciliation.
//!
//! Each importer walks the rows of a [`SheetRows`], trims and validates
//! every column, checks references against the records already known to
//! the caller and drops duplicates. What survives is ready for the bulk
//! create endpoints; everything else ends up in the [`ImportReport`].

use crate::loader::SheetRows;
use crate::model::{Component, ImportKind, NewCable, NewComponent, NewEquipment, Template};
use crate::store::{ProjectData, component_key};
use crate::validation::{
    self, CODE_REGEX, DESCRIPTION_REGEX, LOCATION_REGEX, NAME_REGEX, NUMBER_REGEX, REF_REGEX,
    REVISION_REGEX,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub const NON_EXISTENT_COMPONENTS: &str = "components";
pub const NON_EXISTENT_TEMPLATES: &str = "templates";
pub const NON_EXISTENT_CABLE_SIZES: &str = "cable sizes";
pub const NON_EXISTENT_EQUIPMENT: &str = "equipment";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ImportReport {
    pub kind: ImportKind,
    /// Records forwarded to bulk create
    pub accepted: usize,
    /// Records actually created; filled in once bulk create succeeded
    pub created: usize,
    pub errors: Vec<LineError>,
    /// Unknown references, by what they should have referred to
    pub non_existent: BTreeMap<String, BTreeSet<String>>,
    /// Lines dropped because their key was already taken
    pub duplicates: Vec<usize>,
}

impl ImportReport {
    fn new(kind: ImportKind) -> Self {
        ImportReport {
            kind,
            accepted: 0,
            created: 0,
            errors: Vec::new(),
            non_existent: BTreeMap::new(),
            duplicates: Vec::new(),
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(LineError {
            line,
            message: message.into(),
        });
    }

    fn missing(&mut self, what: &str, key: impl Into<String>) {
        self.non_existent
            .entry(what.to_string())
            .or_default()
            .insert(key.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.non_existent.is_empty() && self.duplicates.is_empty()
    }

    /// One message per problem category, for toast display
    pub fn messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.errors.is_empty() {
            let lines: Vec<String> = self
                .errors
                .iter()
                .map(|e| format!("Line {}: {}", e.line, e.message))
                .collect();
            out.push(format!(
                "{} invalid row(s) skipped. {}",
                self.errors.len(),
                lines.join("; ")
            ));
        }
        for (what, keys) in &self.non_existent {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            out.push(format!("Non-existent {}: {}", what, keys.join(", ")));
        }
        if !self.duplicates.is_empty() {
            out.push(format!(
                "{} duplicate row(s) skipped",
                self.duplicates.len()
            ));
        }
        out
    }
}

/// Records accepted by an importer together with its report
#[derive(Clone, Debug)]
pub struct Import<T> {
    pub records: Vec<T>,
    pub report: ImportReport,
}

/// What already exists in the project, as seen by the importer
#[derive(Clone, Debug, Default)]
pub struct Known {
    components: HashMap<String, u64>,
    component_names: HashSet<String>,
    templates: HashSet<String>,
    equipment: HashSet<String>,
    cables: HashSet<String>,
}

impl Known {
    pub fn new<'a>(
        components: impl IntoIterator<Item = &'a Component>,
        templates: impl IntoIterator<Item = &'a str>,
        equipment: impl IntoIterator<Item = &'a str>,
        cables: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut known = Known::default();
        for c in components {
            known
                .components
                .entry(component_key(&c.name, c.lab_norm))
                .or_insert(c.id);
            known.component_names.insert(c.name.clone());
        }
        known.templates = templates.into_iter().map(str::to_string).collect();
        known.equipment = equipment.into_iter().map(str::to_string).collect();
        known.cables = cables.into_iter().map(str::to_string).collect();
        known
    }

    pub fn from_project(project: &ProjectData) -> Self {
        let components = project.components();
        let templates = project.templates();
        let equipment = project.equipment_list();
        let cables = project.cables();
        Known::new(
            components.iter(),
            templates.iter().map(|t| t.name.as_str()),
            equipment.iter().map(|e| e.equip_ref.as_str()),
            cables.iter().map(|c| c.cab_num.as_str()),
        )
    }
}

struct Column {
    header: &'static str,
    required: bool,
    pattern: &'static Regex,
    numeric: bool,
}

const fn col(header: &'static str, required: bool, pattern: &'static Regex) -> Column {
    Column {
        header,
        required,
        pattern,
        numeric: false,
    }
}

/// A decimal column; values must also parse to a finite number
fn num(header: &'static str, required: bool) -> Column {
    Column {
        header,
        required,
        pattern: &NUMBER_REGEX,
        numeric: true,
    }
}

/// Column positions in the sheet, `None` for absent optional columns
struct Layout {
    positions: Vec<Option<usize>>,
}

impl Layout {
    fn locate(sheet: &SheetRows, columns: &[Column], report: &mut ImportReport) -> Option<Self> {
        let positions: Vec<Option<usize>> =
            columns.iter().map(|c| sheet.column(c.header)).collect();
        let missing: Vec<&str> = columns
            .iter()
            .zip(&positions)
            .filter(|(c, p)| c.required && p.is_none())
            .map(|(c, _)| c.header)
            .collect();
        if missing.is_empty() {
            Some(Layout { positions })
        } else {
            report.error(1, format!("missing column(s): {}", missing.join(", ")));
            None
        }
    }

    fn values<'a>(&self, row: &'a [String]) -> Vec<&'a str> {
        self.positions
            .iter()
            .map(|p| p.and_then(|i| row.get(i)).map_or("", |s| s.trim()))
            .collect()
    }
}

/// Validate one row's values; pushes an error per failing column
fn check_row(columns: &[Column], values: &[&str], line: usize, report: &mut ImportReport) -> bool {
    let mut ok = true;
    for (column, value) in columns.iter().zip(values) {
        if value.is_empty() {
            if column.required {
                report.error(line, format!("{} is required", column.header));
                ok = false;
            }
        } else if !column.pattern.is_match(value)
            || (column.numeric && validation::parse_number(column.header, value).is_err())
        {
            report.error(line, format!("invalid {} '{}'", column.header, value));
            ok = false;
        }
    }
    ok
}

/// Blank optional cells read as 0; `check_row` has rejected anything unparsable
fn number(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn blank(row: &[String]) -> bool {
    row.iter().all(|v| v.trim().is_empty())
}

lazy_static::lazy_static! {
    static ref COMPONENT_COLUMNS: [Column; 10] = [
        col("Code", true, &CODE_REGEX),
        col("Name", true, &NAME_REGEX),
        num("LabNorm", true),
        num("LabUplift", false),
        num("MatNorm", false),
        num("SubConCost", false),
        num("SubConNorm", false),
        num("PlantCost", false),
        num("GlandNorm", false),
        num("TestNorm", false),
    ];
    static ref TEMPLATE_COLUMNS: [Column; 3] = [
        col("Template", true, &NAME_REGEX),
        col("Component", true, &NAME_REGEX),
        num("LabNorm", true),
    ];
    static ref EQUIPMENT_COLUMNS: [Column; 7] = [
        col("Ref", true, &REF_REGEX),
        col("Description", true, &DESCRIPTION_REGEX),
        col("Section", false, &LOCATION_REGEX),
        col("Area", false, &LOCATION_REGEX),
        col("TendSection", false, &LOCATION_REGEX),
        col("Template", true, &NAME_REGEX),
        col("Revision", false, &REVISION_REGEX),
    ];
    static ref CABLE_COLUMNS: [Column; 6] = [
        col("CabNum", true, &REF_REGEX),
        col("CabSize", true, &NAME_REGEX),
        col("EquipRef", true, &REF_REGEX),
        num("Length", true),
        col("AGlandArea", false, &LOCATION_REGEX),
        col("ZGlandArea", false, &LOCATION_REGEX),
    ];
}

/// Components, deduplicated on (name, lab norm)
pub fn import_components(sheet: &SheetRows, known: &Known) -> Import<NewComponent> {
    let columns = &COMPONENT_COLUMNS[..];
    let mut report = ImportReport::new(ImportKind::Components);
    let mut records = Vec::new();
    let Some(layout) = Layout::locate(sheet, columns, &mut report) else {
        return Import { records, report };
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (index, row) in sheet.rows.iter().enumerate() {
        let line = sheet.line_number(index);
        if blank(row) {
            continue;
        }
        let v = layout.values(row);
        if !check_row(columns, &v, line, &mut report) {
            continue;
        }
        let component = NewComponent {
            code: v[0].to_string(),
            name: v[1].to_string(),
            lab_norm: number(v[2]),
            lab_uplift: number(v[3]),
            mat_norm: number(v[4]),
            sub_con_cost: number(v[5]),
            sub_con_norm: number(v[6]),
            plant_cost: number(v[7]),
            gland_norm: number(v[8]),
            test_norm: number(v[9]),
        };
        let key = component_key(&component.name, component.lab_norm);
        if known.components.contains_key(&key) || seen.contains_key(&key) {
            report.duplicates.push(line);
            continue;
        }
        seen.insert(key, line);
        records.push(component);
    }
    report.accepted = records.len();
    Import { records, report }
}

/// Templates, one per distinct name, components in sheet order.
///
/// A template with any bad or unknown component line is dropped whole.
pub fn import_templates(sheet: &SheetRows, known: &Known) -> Import<Template> {
    let columns = &TEMPLATE_COLUMNS[..];
    let mut report = ImportReport::new(ImportKind::Templates);
    let mut records = Vec::new();
    let Some(layout) = Layout::locate(sheet, columns, &mut report) else {
        return Import { records, report };
    };

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<u64>, bool, usize)> = HashMap::new();
    for (index, row) in sheet.rows.iter().enumerate() {
        let line = sheet.line_number(index);
        if blank(row) {
            continue;
        }
        let v = layout.values(row);
        let valid = check_row(columns, &v, line, &mut report);
        let name = v[0].to_string();
        if name.is_empty() {
            continue;
        }
        let group = groups.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            (Vec::new(), true, line)
        });
        if !valid {
            group.1 = false;
            continue;
        }
        let key = component_key(v[1], number(v[2]));
        match known.components.get(&key) {
            Some(id) => group.0.push(*id),
            None => {
                report.missing(
                    NON_EXISTENT_COMPONENTS,
                    format!("{} ({})", v[1], number(v[2])),
                );
                group.1 = false;
            }
        }
    }

    for name in order {
        let Some((components, valid, first_line)) = groups.remove(&name) else {
            continue;
        };
        if known.templates.contains(&name) {
            report.duplicates.push(first_line);
        } else if valid {
            records.push(Template { name, components });
        }
    }
    report.accepted = records.len();
    Import { records, report }
}

/// Equipment, deduplicated on ref; the template must exist
pub fn import_equipment(sheet: &SheetRows, known: &Known) -> Import<NewEquipment> {
    let columns = &EQUIPMENT_COLUMNS[..];
    let mut report = ImportReport::new(ImportKind::Equipment);
    let mut records = Vec::new();
    let Some(layout) = Layout::locate(sheet, columns, &mut report) else {
        return Import { records, report };
    };

    let mut seen: HashSet<String> = HashSet::new();
    for (index, row) in sheet.rows.iter().enumerate() {
        let line = sheet.line_number(index);
        if blank(row) {
            continue;
        }
        let v = layout.values(row);
        if !check_row(columns, &v, line, &mut report) {
            continue;
        }
        if !known.templates.contains(v[5]) {
            report.missing(NON_EXISTENT_TEMPLATES, v[5]);
            continue;
        }
        if known.equipment.contains(v[0]) || !seen.insert(v[0].to_string()) {
            report.duplicates.push(line);
            continue;
        }
        records.push(NewEquipment {
            equip_ref: v[0].to_string(),
            description: v[1].to_string(),
            section: v[2].to_string(),
            area: v[3].to_string(),
            tend_section: v[4].to_string(),
            template: v[5].to_string(),
            revision: v[6].to_string(),
        });
    }
    report.accepted = records.len();
    Import { records, report }
}

/// Cable schedule rows, deduplicated on cable number; cable size and
/// equipment must exist
pub fn import_cables(sheet: &SheetRows, known: &Known) -> Import<NewCable> {
    let columns = &CABLE_COLUMNS[..];
    let mut report = ImportReport::new(ImportKind::Cabscheds);
    let mut records = Vec::new();
    let Some(layout) = Layout::locate(sheet, columns, &mut report) else {
        return Import { records, report };
    };

    let mut seen: HashSet<String> = HashSet::new();
    for (index, row) in sheet.rows.iter().enumerate() {
        let line = sheet.line_number(index);
        if blank(row) {
            continue;
        }
        let v = layout.values(row);
        if !check_row(columns, &v, line, &mut report) {
            continue;
        }
        let mut resolved = true;
        if !known.component_names.contains(v[1]) {
            report.missing(NON_EXISTENT_CABLE_SIZES, v[1]);
            resolved = false;
        }
        if !known.equipment.contains(v[2]) {
            report.missing(NON_EXISTENT_EQUIPMENT, v[2]);
            resolved = false;
        }
        if !resolved {
            continue;
        }
        if known.cables.contains(v[0]) || !seen.insert(v[0].to_string()) {
            report.duplicates.push(line);
            continue;
        }
        records.push(NewCable {
            cab_num: v[0].to_string(),
            cab_size: v[1].to_string(),
            equip_ref: v[2].to_string(),
            length: number(v[3]),
            a_gland_area: v[4].to_string(),
            z_gland_area: v[5].to_string(),
        });
    }
    report.accepted = records.len();
    Import { records, report }
}

/// Run the importer for `kind` against a project and bulk-create what it
/// accepts
pub fn import_into(
    project: &mut ProjectData,
    kind: ImportKind,
    sheet: &SheetRows,
) -> Result<ImportReport, crate::error::StoreError> {
    let known = Known::from_project(project);
    let report = match kind {
        ImportKind::Components => {
            let Import { records, mut report } = import_components(sheet, &known);
            report.created = project.bulk_create_components(records)?.len();
            report
        }
        ImportKind::Templates => {
            let Import { records, mut report } = import_templates(sheet, &known);
            report.created = project.bulk_create_templates(records)?.len();
            report
        }
        ImportKind::Equipment => {
            let Import { records, mut report } = import_equipment(sheet, &known);
            report.created = project.bulk_create_equipment(records)?.len();
            report
        }
        ImportKind::Cabscheds => {
            let Import { records, mut report } = import_cables(sheet, &known);
            report.created = project.bulk_create_cables(records)?.len();
            report
        }
    };
    log::info!(
        "{}: imported {} {} ({} errors, {} duplicates)",
        project.project.job_no,
        report.created,
        kind.as_str(),
        report.errors.len(),
        report.duplicates.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> SheetRows {
        SheetRows::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn known_component(id: u64, name: &str, lab_norm: f64) -> Component {
        Component {
            id,
            code: format!("C{}", id),
            name: name.into(),
            lab_norm,
            lab_uplift: 0.0,
            mat_norm: 0.0,
            sub_con_cost: 0.0,
            sub_con_norm: 0.0,
            plant_cost: 0.0,
            gland_norm: 1.0,
            test_norm: 0.5,
        }
    }

    #[test]
    fn duplicate_name_and_norm_dedup_to_one_record() {
        let s = sheet(
            &["Code", "Name", "LabNorm"],
            &[
                &["S1", "Socket", "1.5"],
                &["S2", "Socket", "1.50"],
                &["S3", "Socket", "2"],
            ],
        );
        let import = import_components(&s, &Known::default());
        assert_eq!(import.records.len(), 2);
        assert_eq!(import.report.duplicates, vec![3]);
    }

    #[test]
    fn existing_components_count_as_duplicates() {
        let existing = [known_component(1, "Socket", 1.5)];
        let known = Known::new(existing.iter(), [], [], []);
        let s = sheet(&["Code", "Name", "LabNorm"], &[&["S1", " Socket ", "1.5"]]);
        let import = import_components(&s, &known);
        assert!(import.records.is_empty());
        assert_eq!(import.report.duplicates, vec![2]);
    }

    #[test]
    fn errors_carry_spreadsheet_line_numbers() {
        let s = sheet(
            &["Code", "Name", "LabNorm"],
            &[
                &["S1", "Socket", "1"],
                &["", "", ""],
                &["S3", "Lamp", "abc"],
                &["S 4", "Switch", "1"],
            ],
        );
        let import = import_components(&s, &Known::default());
        assert_eq!(import.records.len(), 1);
        let lines: Vec<usize> = import.report.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![4, 5]);
        assert_eq!(import.report.errors[0].message, "invalid LabNorm 'abc'");
    }

    #[test]
    fn numbers_too_large_for_f64_are_line_errors() {
        let mut project = ProjectData::new(crate::model::Project {
            job_no: "J1".into(),
            title: "Plant room".into(),
            address: String::new(),
        });
        let huge = format!("1{}", "0".repeat(400));
        let s = sheet(
            &["Code", "Name", "LabNorm"],
            &[&["A", "Good", "1"], &["B", "Bad", huge.as_str()]],
        );
        let report = import_into(&mut project, ImportKind::Components, &s).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 3);
        assert_eq!(project.components().len(), 1);
    }

    #[test]
    fn missing_required_column_stops_the_import() {
        let s = sheet(&["Code", "Name"], &[&["S1", "Socket"]]);
        let import = import_components(&s, &Known::default());
        assert!(import.records.is_empty());
        assert_eq!(import.report.errors[0].line, 1);
        assert!(import.report.errors[0].message.contains("LabNorm"));
    }

    #[test]
    fn equipment_with_unknown_template_is_reported() {
        let known = Known::new([], ["MOTOR"], ["P-1"], []);
        let s = sheet(
            &["Ref", "Description", "Template", "Section"],
            &[
                &["P-1", "Pump", "MOTOR", "North"],
                &["P-2", "Pump", "MOTOR", "North"],
                &["P-2", "Pump again", "MOTOR", ""],
                &["P-3", "Fan", "FAN", ""],
            ],
        );
        let import = import_equipment(&s, &known);
        assert_eq!(import.records.len(), 1);
        assert_eq!(import.records[0].equip_ref, "P-2");
        assert_eq!(import.report.duplicates, vec![2, 4]);
        assert!(import.report.non_existent[NON_EXISTENT_TEMPLATES].contains("FAN"));
    }

    #[test]
    fn cables_check_size_and_equipment() {
        let sizes = [known_component(1, "16mm SWA", 0.1)];
        let known = Known::new(sizes.iter(), [], ["P-1"], ["C0"]);
        let s = sheet(
            &["CabNum", "CabSize", "EquipRef", "Length", "AGlandArea"],
            &[
                &["C1", "16mm SWA", "P-1", "25", "MCC"],
                &["C2", "25mm SWA", "P-1", "25", ""],
                &["C3", "16mm SWA", "P-9", "25", ""],
                &["C0", "16mm SWA", "P-1", "5", ""],
            ],
        );
        let import = import_cables(&s, &known);
        assert_eq!(import.records.len(), 1);
        assert_eq!(import.records[0].a_gland_area, "MCC");
        assert!(import.report.non_existent[NON_EXISTENT_CABLE_SIZES].contains("25mm SWA"));
        assert!(import.report.non_existent[NON_EXISTENT_EQUIPMENT].contains("P-9"));
        assert_eq!(import.report.duplicates, vec![5]);
    }

    #[test]
    fn templates_group_rows_and_drop_incomplete_ones() {
        let comps = [
            known_component(1, "Isolator", 2.0),
            known_component(2, "Motor", 6.0),
        ];
        let known = Known::new(comps.iter(), ["OLD"], [], []);
        let s = sheet(
            &["Template", "Component", "LabNorm"],
            &[
                &["MOTOR", "Isolator", "2"],
                &["FAN", "Motor", "6"],
                &["MOTOR", "Motor", "6"],
                &["FAN", "Belt", "1"],
                &["OLD", "Motor", "6"],
            ],
        );
        let import = import_templates(&s, &known);
        assert_eq!(import.records.len(), 1);
        assert_eq!(import.records[0].name, "MOTOR");
        assert_eq!(import.records[0].components, vec![1, 2]);
        assert!(import.report.non_existent[NON_EXISTENT_COMPONENTS].contains("Belt (1)"));
        assert_eq!(import.report.duplicates, vec![6]);
    }

    #[test]
    fn messages_aggregate_each_category() {
        let known = Known::new([], ["MOTOR"], [], []);
        let s = sheet(
            &["Ref", "Description", "Template"],
            &[&["", "Pump", "MOTOR"], &["P-2", "Pump", "FAN"]],
        );
        let report = import_equipment(&s, &known).report;
        assert!(!report.is_clean());
        let messages = report.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("Line 2: Ref is required"));
        assert_eq!(messages[1], "Non-existent templates: FAN");
    }
}
