//! Field patterns shared by the REST handlers and the spreadsheet importers.

use crate::error::StoreError;
use crate::model::{NewCable, NewComponent, NewEquipment, Project};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref JOB_NO_REGEX: Regex = Regex::new(r"^[A-Za-z0-9-]{1,20}$").unwrap();
    pub static ref REF_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 ./_+-]{0,49}$").unwrap();
    pub static ref CODE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{1,20}$").unwrap();
    pub static ref NAME_REGEX: Regex = Regex::new(r"^\S.{0,99}$").unwrap();
    pub static ref DESCRIPTION_REGEX: Regex = Regex::new(r"^\S.{0,254}$").unwrap();
    pub static ref LOCATION_REGEX: Regex = Regex::new(r"^[A-Za-z0-9 ./&()_-]{0,50}$").unwrap();
    pub static ref REVISION_REGEX: Regex = Regex::new(r"^[A-Za-z0-9.-]{0,10}$").unwrap();
    pub static ref NUMBER_REGEX: Regex = Regex::new(r"^\d+(\.\d+)?$").unwrap();
}

/// Check `value` against `pattern`, naming the field on failure
pub fn check(field: &'static str, value: &str, pattern: &Regex) -> Result<(), StoreError> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(StoreError::invalid(field, format!("'{}'", value)))
    }
}

/// Parse a non-negative decimal as written in a spreadsheet cell
///
/// Digit strings too long for an `f64` are rejected rather than read as
/// infinity.
pub fn parse_number(field: &'static str, value: &str) -> Result<f64, StoreError> {
    check(field, value, &NUMBER_REGEX)?;
    let number = value
        .parse::<f64>()
        .map_err(|_| StoreError::invalid(field, format!("'{}'", value)))?;
    if number.is_finite() {
        Ok(number)
    } else {
        Err(StoreError::invalid(field, format!("'{}' is out of range", value)))
    }
}

fn check_norm(field: &'static str, value: f64) -> Result<(), StoreError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::invalid(field, format!("{} is not a non-negative number", value)))
    }
}

pub fn validate_project(project: &Project) -> Result<(), StoreError> {
    check("job_no", &project.job_no, &JOB_NO_REGEX)?;
    check("title", &project.title, &DESCRIPTION_REGEX)
}

pub fn validate_component(component: &NewComponent) -> Result<(), StoreError> {
    check("code", &component.code, &CODE_REGEX)?;
    check("name", &component.name, &NAME_REGEX)?;
    check_norm("lab_norm", component.lab_norm)?;
    check_norm("lab_uplift", component.lab_uplift)?;
    check_norm("mat_norm", component.mat_norm)?;
    check_norm("sub_con_cost", component.sub_con_cost)?;
    check_norm("sub_con_norm", component.sub_con_norm)?;
    check_norm("plant_cost", component.plant_cost)?;
    check_norm("gland_norm", component.gland_norm)?;
    check_norm("test_norm", component.test_norm)
}

pub fn validate_template_name(name: &str) -> Result<(), StoreError> {
    check("template", name, &NAME_REGEX)
}

pub fn validate_equipment(equipment: &NewEquipment) -> Result<(), StoreError> {
    check("equip_ref", &equipment.equip_ref, &REF_REGEX)?;
    check("description", &equipment.description, &DESCRIPTION_REGEX)?;
    check("section", &equipment.section, &LOCATION_REGEX)?;
    check("area", &equipment.area, &LOCATION_REGEX)?;
    check("tend_section", &equipment.tend_section, &LOCATION_REGEX)?;
    check("template", &equipment.template, &NAME_REGEX)?;
    check("revision", &equipment.revision, &REVISION_REGEX)
}

pub fn validate_cable(cable: &NewCable) -> Result<(), StoreError> {
    check("cab_num", &cable.cab_num, &REF_REGEX)?;
    check("cab_size", &cable.cab_size, &NAME_REGEX)?;
    check("equip_ref", &cable.equip_ref, &REF_REGEX)?;
    check_norm("length", cable.length)?;
    check("a_gland_area", &cable.a_gland_area, &LOCATION_REGEX)?;
    check("z_gland_area", &cable.z_gland_area, &LOCATION_REGEX)
}

pub fn validate_cc_ref(cc_ref: &str) -> Result<(), StoreError> {
    check("cc_ref", cc_ref, &REF_REGEX)
}
