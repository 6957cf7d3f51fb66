#![cfg(not(tarpaulin_include))]

use crate::model::{Cable, Component, EquipmentView, ImportKind, Template};
use crate::store::ProjectData;
use rust_xlsxwriter::{Format, Workbook};
use std::error::Error;

/// A cell of an export table
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Header row plus data rows, in the column layout the importers read
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<Value>>,
}

pub fn component_table(components: &[Component]) -> Table {
    Table {
        headers: vec![
            "Code",
            "Name",
            "LabNorm",
            "LabUplift",
            "MatNorm",
            "SubConCost",
            "SubConNorm",
            "PlantCost",
            "GlandNorm",
            "TestNorm",
        ],
        rows: components
            .iter()
            .map(|c| {
                vec![
                    c.code.as_str().into(),
                    c.name.as_str().into(),
                    c.lab_norm.into(),
                    c.lab_uplift.into(),
                    c.mat_norm.into(),
                    c.sub_con_cost.into(),
                    c.sub_con_norm.into(),
                    c.plant_cost.into(),
                    c.gland_norm.into(),
                    c.test_norm.into(),
                ]
            })
            .collect(),
    }
}

/// One row per template entry, the layout the template importer reads
pub fn template_table(templates: &[Template], components: &[Component]) -> Table {
    let mut rows = Vec::new();
    for t in templates {
        for id in &t.components {
            if let Some(c) = components.iter().find(|c| c.id == *id) {
                rows.push(vec![
                    t.name.as_str().into(),
                    c.name.as_str().into(),
                    c.lab_norm.into(),
                ]);
            }
        }
    }
    Table {
        headers: vec!["Template", "Component", "LabNorm"],
        rows,
    }
}

pub fn equipment_table(equipment: &[EquipmentView]) -> Table {
    Table {
        headers: vec![
            "Ref",
            "Description",
            "Section",
            "Area",
            "TendSection",
            "Template",
            "Revision",
            "LabNorm",
            "Recovered",
            "PercentComplete",
        ],
        rows: equipment
            .iter()
            .map(|e| {
                vec![
                    e.equip_ref.as_str().into(),
                    e.description.as_str().into(),
                    e.section.as_str().into(),
                    e.area.as_str().into(),
                    e.tend_section.as_str().into(),
                    e.template.as_str().into(),
                    e.revision.as_str().into(),
                    e.lab_norm.into(),
                    e.current_recovery.into(),
                    e.percent_complete.round().into(),
                ]
            })
            .collect(),
    }
}

pub fn cable_table(cables: &[Cable]) -> Table {
    Table {
        headers: vec![
            "CabNum",
            "CabSize",
            "EquipRef",
            "Length",
            "AGlandArea",
            "ZGlandArea",
            "PullPercent",
            "AGlandPercent",
            "ZGlandPercent",
            "TestPercent",
        ],
        rows: cables
            .iter()
            .map(|c| {
                vec![
                    c.cab_num.as_str().into(),
                    c.cab_size.as_str().into(),
                    c.equip_ref.as_str().into(),
                    c.length.into(),
                    c.a_gland_area.as_str().into(),
                    c.z_gland_area.as_str().into(),
                    f64::from(c.pull.percent).into(),
                    f64::from(c.a_gland.percent).into(),
                    f64::from(c.z_gland.percent).into(),
                    f64::from(c.test.percent).into(),
                ]
            })
            .collect(),
    }
}

/// Export table for one kind of record in a project
///
/// The columns match what the importer for the same kind reads, so an
/// exported file can be edited and uploaded again.
///
/// # Arguments
/// * `project` - The project to export from
/// * `kind` - Which list to export
///
/// # Returns
/// * `Table` - Header row plus one row per record (per template entry for templates)
///
/// # Examples
/// ```
/// use cabtrack::downloader::project_table;
/// use cabtrack::model::{ImportKind, Project};
/// use cabtrack::store::ProjectData;
///
/// let project = ProjectData::new(Project {
///     job_no: "J1".into(),
///     title: "Plant room".into(),
///     address: String::new(),
/// });
/// let table = project_table(&project, ImportKind::Cabscheds);
/// assert!(table.rows.is_empty());
/// ```
pub fn project_table(project: &ProjectData, kind: ImportKind) -> Table {
    match kind {
        ImportKind::Components => component_table(&project.components()),
        ImportKind::Templates => template_table(&project.templates(), &project.components()),
        ImportKind::Equipment => equipment_table(&project.equipment_list()),
        ImportKind::Cabscheds => cable_table(&project.cables()),
    }
}

/// Convert a table to CSV format
///
/// Values containing commas, quotes or newlines are quoted, with inner
/// quotes doubled.
///
/// # Arguments
/// * `table` - The table to write
///
/// # Returns
/// * `String` - CSV text, header line first
///
/// # Examples
/// ```
/// use cabtrack::downloader::{Table, Value, to_csv};
///
/// let table = Table {
///     headers: vec!["Name", "LabNorm"],
///     rows: vec![vec![Value::from("Socket, twin"), Value::from(0.75)]],
/// };
/// assert_eq!(to_csv(&table), "Name,LabNorm\n\"Socket, twin\",0.75\n");
/// ```
pub fn to_csv(table: &Table) -> String {
    let mut csv_content = table.headers.join(",");
    csv_content.push('\n');

    for row in &table.rows {
        let line: Vec<String> = row
            .iter()
            .map(|value| match value {
                Value::Number(n) => n.to_string(),
                Value::Text(s) if s.contains(',') || s.contains('"') || s.contains('\n') => {
                    format!("\"{}\"", s.replace('"', "\"\""))
                }
                Value::Text(s) => s.clone(),
            })
            .collect();
        csv_content.push_str(&line.join(","));
        csv_content.push('\n');
    }

    csv_content
}

/// Convert a table to XLSX format
///
/// The header row is bold; numbers are written as numeric cells so the
/// workbook can be re-imported or summed in Excel.
///
/// # Arguments
/// * `table` - The table to write
/// * `sheet_name` - Name of the single worksheet
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error + Send + Sync>>` - XLSX file content or an error
///
/// # Examples
/// ```no_run
/// use cabtrack::downloader::{Table, to_xlsx};
///
/// let table = Table { headers: vec!["CabNum"], rows: vec![] };
/// match to_xlsx(&table, "cabscheds") {
///     Ok(bytes) => println!("XLSX generated: {} bytes", bytes.len()),
///     Err(e) => eprintln!("Failed to generate XLSX: {}", e),
/// }
/// ```
pub fn to_xlsx(table: &Table, sheet_name: &str) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (c, header) in table.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, *header, &bold)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row.iter().enumerate() {
            match value {
                Value::Text(s) => {
                    worksheet.write_string(r, c as u16, s.as_str())?;
                }
                Value::Number(n) => {
                    worksheet.write_number(r, c as u16, *n)?;
                }
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
