//! Completion arithmetic.
//!
//! A percentage entered against a row earns `percent * lab_norm / 100`
//! hours of recovery. The recovery is computed from the entered value, the
//! stored percentage is rounded to a whole number.

use crate::error::StoreError;
use crate::model::{Cable, Component, CompletionUpdate, Phase, ProgressRow, RowKind};

pub fn current_recovery(percent: f64, lab_norm: f64) -> f64 {
    percent * lab_norm / 100.0
}

pub fn round_percent(percent: f64) -> i32 {
    percent.round() as i32
}

pub fn check_percent(percent: f64) -> Result<f64, StoreError> {
    if percent.is_finite() && (0.0..=100.0).contains(&percent) {
        Ok(percent)
    } else {
        Err(StoreError::invalid(
            "percent",
            format!("{} is outside 0..=100", percent),
        ))
    }
}

/// Turn an entered percentage into the values stored for a row
pub fn completion_update(percent: f64, lab_norm: f64) -> Result<CompletionUpdate, StoreError> {
    let percent = check_percent(percent)?;
    Ok(CompletionUpdate {
        percent: round_percent(percent),
        current_recovery: current_recovery(percent, lab_norm),
    })
}

/// Percentage of `lab_norm` earned by `recovery`; zero when there is no norm
pub fn percent_of(recovery: f64, lab_norm: f64) -> f64 {
    if lab_norm > 0.0 {
        recovery / lab_norm * 100.0
    } else {
        0.0
    }
}

/// Recovery after the norm of a row moved from `old_norm` to `new_norm`.
///
/// The stored recovery is scaled so it keeps the percentage it was entered
/// at; only a row with no previous norm falls back to the stored percent.
pub fn reweight(recovery: f64, percent: i32, old_norm: f64, new_norm: f64) -> f64 {
    if old_norm == new_norm {
        recovery
    } else if old_norm > 0.0 {
        recovery * new_norm / old_norm
    } else {
        current_recovery(f64::from(percent), new_norm)
    }
}

/// Strip the synthetic type letter from a cable sub-row id.
///
/// `C101A` of kind `CableA` refers to cable `C101`. Ids of other kinds are
/// returned unchanged.
pub fn base_row_id(id: &str, kind: RowKind) -> &str {
    match kind.suffix() {
        Some(letter) => id.strip_suffix(letter).unwrap_or(id),
        None => id,
    }
}

/// Grid id for a cable phase row
pub fn cable_row_id(cab_num: &str, kind: RowKind) -> String {
    match kind.suffix() {
        Some(letter) => format!("{}{}", cab_num, letter),
        None => cab_num.to_string(),
    }
}

/// Labour norms of the four phases of a cable run
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct CableNorms {
    pub pull: f64,
    pub a_gland: f64,
    pub z_gland: f64,
    pub test: f64,
}

impl CableNorms {
    /// Norms for `cable` given its cable-size component. Gland norms only
    /// apply to ends with a gland area.
    pub fn for_cable(cable: &Cable, size: Option<&Component>) -> Self {
        let Some(size) = size else {
            return CableNorms::default();
        };
        let gland = |area: &str| {
            if area.trim().is_empty() {
                0.0
            } else {
                size.gland_norm
            }
        };
        CableNorms {
            pull: size.lab_norm * cable.length,
            a_gland: gland(&cable.a_gland_area),
            z_gland: gland(&cable.z_gland_area),
            test: size.test_norm,
        }
    }

    pub fn get(&self, kind: RowKind) -> f64 {
        match kind {
            RowKind::Cable => self.pull,
            RowKind::CableA => self.a_gland,
            RowKind::CableZ => self.z_gland,
            RowKind::CableT => self.test,
            RowKind::Component => 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.pull + self.a_gland + self.z_gland + self.test
    }
}

pub const CABLE_KINDS: [RowKind; 4] = [
    RowKind::Cable,
    RowKind::CableA,
    RowKind::CableZ,
    RowKind::CableT,
];

pub fn phase(cable: &Cable, kind: RowKind) -> Option<&Phase> {
    match kind {
        RowKind::Cable => Some(&cable.pull),
        RowKind::CableA => Some(&cable.a_gland),
        RowKind::CableZ => Some(&cable.z_gland),
        RowKind::CableT => Some(&cable.test),
        RowKind::Component => None,
    }
}

pub fn phase_mut(cable: &mut Cable, kind: RowKind) -> Option<&mut Phase> {
    match kind {
        RowKind::Cable => Some(&mut cable.pull),
        RowKind::CableA => Some(&mut cable.a_gland),
        RowKind::CableZ => Some(&mut cable.z_gland),
        RowKind::CableT => Some(&mut cable.test),
        RowKind::Component => None,
    }
}

pub fn cable_recovery(cable: &Cable) -> f64 {
    cable.pull.current_recovery
        + cable.a_gland.current_recovery
        + cable.z_gland.current_recovery
        + cable.test.current_recovery
}

/// One request the client sends for a selected grid row
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedUpdate {
    pub kind: RowKind,
    pub id: String,
    pub update: CompletionUpdate,
}

/// Plan the per-row updates for a percentage entered against a selection
pub fn plan_updates(rows: &[ProgressRow], percent: f64) -> Result<Vec<PlannedUpdate>, StoreError> {
    check_percent(percent)?;
    rows.iter()
        .map(|row| {
            Ok(PlannedUpdate {
                kind: row.kind,
                id: base_row_id(&row.id, row.kind).to_string(),
                update: completion_update(percent, row.lab_norm)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCable;

    fn cable_size() -> Component {
        Component {
            id: 1,
            code: "C16".into(),
            name: "4c 16mm SWA".into(),
            lab_norm: 0.1,
            lab_uplift: 0.0,
            mat_norm: 0.0,
            sub_con_cost: 0.0,
            sub_con_norm: 0.0,
            plant_cost: 0.0,
            gland_norm: 1.5,
            test_norm: 0.5,
        }
    }

    #[test]
    fn fifty_percent_of_ten_hours_is_five() {
        assert_eq!(current_recovery(50.0, 10.0), 5.0);
        let update = completion_update(50.0, 10.0).unwrap();
        assert_eq!(update.percent, 50);
        assert_eq!(update.current_recovery, 5.0);
    }

    #[test]
    fn reweight_scales_with_the_norm() {
        assert_eq!(reweight(3.36, 34, 10.0, 10.0), 3.36);
        assert!((reweight(3.36, 34, 10.0, 20.0) - 6.72).abs() < 1e-12);
        assert_eq!(reweight(0.0, 50, 0.0, 4.0), 2.0);
    }

    #[test]
    fn percent_is_rounded_but_recovery_is_not() {
        let update = completion_update(33.6, 10.0).unwrap();
        assert_eq!(update.percent, 34);
        assert!((update.current_recovery - 3.36).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_percent_is_rejected() {
        assert!(completion_update(100.5, 1.0).is_err());
        assert!(completion_update(-1.0, 1.0).is_err());
        assert!(completion_update(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn sub_row_ids_lose_their_type_letter() {
        assert_eq!(base_row_id("C101A", RowKind::CableA), "C101");
        assert_eq!(base_row_id("C101Z", RowKind::CableZ), "C101");
        assert_eq!(base_row_id("C101T", RowKind::CableT), "C101");
        assert_eq!(base_row_id("C101A", RowKind::Cable), "C101A");
        assert_eq!(base_row_id("42", RowKind::Component), "42");
        assert_eq!(cable_row_id("C101", RowKind::CableZ), "C101Z");
    }

    #[test]
    fn cable_norms_skip_ends_without_gland_area() {
        let cable = NewCable {
            cab_num: "C1".into(),
            cab_size: "4c 16mm SWA".into(),
            equip_ref: "P-101".into(),
            length: 40.0,
            a_gland_area: "MCC".into(),
            z_gland_area: String::new(),
        }
        .into_cable();
        let norms = CableNorms::for_cable(&cable, Some(&cable_size()));
        assert!((norms.pull - 4.0).abs() < 1e-9);
        assert_eq!(norms.a_gland, 1.5);
        assert_eq!(norms.z_gland, 0.0);
        assert_eq!(norms.test, 0.5);
        assert_eq!(CableNorms::for_cable(&cable, None).total(), 0.0);
    }

    #[test]
    fn plan_strips_ids_and_weights_by_norm() {
        let rows = vec![
            ProgressRow {
                id: "C7A".into(),
                kind: RowKind::CableA,
                equip_ref: "P-1".into(),
                description: "A end gland".into(),
                lab_norm: 2.0,
                percent: 0,
                current_recovery: 0.0,
            },
            ProgressRow {
                id: "12".into(),
                kind: RowKind::Component,
                equip_ref: "P-1".into(),
                description: "Motor".into(),
                lab_norm: 8.0,
                percent: 0,
                current_recovery: 0.0,
            },
        ];
        let plan = plan_updates(&rows, 25.0).unwrap();
        assert_eq!(plan[0].id, "C7");
        assert_eq!(plan[0].update.current_recovery, 0.5);
        assert_eq!(plan[1].id, "12");
        assert_eq!(plan[1].update.current_recovery, 2.0);
    }

    #[test]
    fn percent_of_zero_norm_is_zero() {
        assert_eq!(percent_of(3.0, 0.0), 0.0);
        assert_eq!(percent_of(5.0, 10.0), 50.0);
    }
}
