//! Maintenance contracts and their service history.
//!
//! A contract is either a Hardware or a Label contract. Both share one
//! shape; they differ in the identifying attribute (`equipment_ref` holds the
//! model for hardware and the part number for labels) and in the maintenance
//! cadence derived from the class.

pub mod sequence;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Contract class, which determines the maintenance cadence.
///
/// `Unrecognized` is the explicit default arm for any class string that is
/// neither hardware nor label. It schedules monthly and cannot be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractClass {
    Hardware,
    Label,
    #[serde(other)]
    Unrecognized,
}

impl ContractClass {
    /// Classes that own contract rows.
    pub const STORED: [ContractClass; 2] = [ContractClass::Hardware, ContractClass::Label];

    /// Parse a class name, falling back to `Unrecognized`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hardware" => ContractClass::Hardware,
            "label" => ContractClass::Label,
            _ => ContractClass::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractClass::Hardware => "hardware",
            ContractClass::Label => "label",
            ContractClass::Unrecognized => "unrecognized",
        }
    }

    /// Name of the attribute carried in `equipment_ref`.
    pub fn equipment_attribute(&self) -> &'static str {
        match self {
            ContractClass::Hardware => "model",
            ContractClass::Label => "part_number",
            ContractClass::Unrecognized => "equipment",
        }
    }

    pub fn is_stored(&self) -> bool {
        !matches!(self, ContractClass::Unrecognized)
    }
}

impl std::fmt::Display for ContractClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    Active,
    Inactive,
    Pending,
    Expired,
}

impl ContractStatus {
    /// Strict parse for administrative input.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(ContractStatus::Active),
            "inactive" => Some(ContractStatus::Inactive),
            "pending" => Some(ContractStatus::Pending),
            "expired" => Some(ContractStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Inactive => "inactive",
            ContractStatus::Pending => "pending",
            ContractStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A PMS contract as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub class: ContractClass,
    /// Human-facing ordinal, numeric text scoped per class.
    pub sq: String,
    pub end_user: String,
    /// Model (hardware) or part number (label).
    pub equipment_ref: String,
    pub serial: String,
    pub branch: String,
    pub technical_specialist: String,
    pub po_number: String,
    pub contract_date: Option<NaiveDate>,
    pub contract_end_date: Option<NaiveDate>,
    pub next_due_date: Option<NaiveDate>,
    /// Day the due-soon sweep last sent a reminder for this contract.
    #[serde(default)]
    pub last_reminded_on: Option<NaiveDate>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_expired(&self) -> bool {
        self.status == ContractStatus::Expired
    }

    /// Short label used in notifications and service descriptions.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.sq, self.end_user)
    }
}

/// Input for creating a contract. Missing SQ and due date are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContract {
    pub class: ContractClass,
    pub sq: Option<String>,
    pub end_user: String,
    pub equipment_ref: String,
    pub serial: String,
    pub branch: String,
    pub technical_specialist: String,
    pub po_number: String,
    pub contract_date: Option<NaiveDate>,
    pub contract_end_date: Option<NaiveDate>,
    pub next_due_date: Option<NaiveDate>,
    pub status: Option<ContractStatus>,
}

impl NewContract {
    pub fn new(class: ContractClass, end_user: impl Into<String>) -> Self {
        Self {
            class,
            sq: None,
            end_user: end_user.into(),
            equipment_ref: String::new(),
            serial: String::new(),
            branch: String::new(),
            technical_specialist: String::new(),
            po_number: String::new(),
            contract_date: None,
            contract_end_date: None,
            next_due_date: None,
            status: None,
        }
    }

    pub fn with_term(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.contract_date = Some(start);
        self.contract_end_date = Some(end);
        self
    }
}

/// Partial update applied by `ContractStore::update_contract_fields`.
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractPatch {
    pub sq: Option<String>,
    pub status: Option<ContractStatus>,
    pub next_due_date: Option<NaiveDate>,
    pub contract_end_date: Option<NaiveDate>,
    pub last_reminded_on: Option<NaiveDate>,
}

impl ContractPatch {
    pub fn status(status: ContractStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn next_due(date: NaiveDate) -> Self {
        Self {
            next_due_date: Some(date),
            ..Self::default()
        }
    }

    pub fn sq(sq: impl Into<String>) -> Self {
        Self {
            sq: Some(sq.into()),
            ..Self::default()
        }
    }

    pub fn reminded(on: NaiveDate) -> Self {
        Self {
            last_reminded_on: Some(on),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sq.is_none()
            && self.status.is_none()
            && self.next_due_date.is_none()
            && self.contract_end_date.is_none()
            && self.last_reminded_on.is_none()
    }
}

/// Outcome recorded on a service event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOutcome {
    Completed,
    Pending,
}

impl ServiceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOutcome::Completed => "completed",
            ServiceOutcome::Pending => "pending",
        }
    }
}

/// One maintenance visit. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub id: String,
    pub contract_id: String,
    pub contract_class: ContractClass,
    pub service_date: NaiveDate,
    pub service_type: String,
    pub description: String,
    pub technician: String,
    pub outcome: ServiceOutcome,
    pub service_report: Option<String>,
    pub sr_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parse_falls_back_to_unrecognized() {
        assert_eq!(ContractClass::parse("Hardware"), ContractClass::Hardware);
        assert_eq!(ContractClass::parse(" label "), ContractClass::Label);
        assert_eq!(ContractClass::parse("repair"), ContractClass::Unrecognized);
        assert_eq!(ContractClass::parse(""), ContractClass::Unrecognized);
    }

    #[test]
    fn class_deserializes_unknown_values_to_default_arm() {
        let class: ContractClass = serde_json::from_str("\"quarterly-widget\"").unwrap();
        assert_eq!(class, ContractClass::Unrecognized);
        let class: ContractClass = serde_json::from_str("\"label\"").unwrap();
        assert_eq!(class, ContractClass::Label);
    }

    #[test]
    fn status_parse_is_strict() {
        assert_eq!(ContractStatus::parse("EXPIRED"), Some(ContractStatus::Expired));
        assert_eq!(ContractStatus::parse("archived"), None);
    }

    #[test]
    fn empty_patch_detected() {
        assert!(ContractPatch::default().is_empty());
        assert!(!ContractPatch::status(ContractStatus::Inactive).is_empty());
    }
}
