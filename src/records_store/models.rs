use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    // Peruvian RUC: exactly 11 digits.
    static ref RUC_RE: Regex = Regex::new(r"^\d{11}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Errors produced when validating record inputs before they hit the database.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid RUC code: {0}")]
    InvalidRuc(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("amount must not be negative: {0}")]
    NegativeAmount(i64),
}

// =============================================================================
// Accounts
// =============================================================================

/// A billing entity. Owns contacts and work orders, soft-deleted via `deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub date_entered: DateTime<Utc>,
    pub name: String,
    pub account_type: Option<String>,
    pub billing_address_city: Option<String>,
    pub phone_office: Option<String>,
    pub ruc_code: String,
    pub shipping_address_street: Option<String>,
    pub deleted: bool,
}

/// Input for creating an account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub name: String,
    pub ruc_code: String,
    pub account_type: Option<String>,
    pub billing_address_city: Option<String>,
    pub phone_office: Option<String>,
    pub shipping_address_street: Option<String>,
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !RUC_RE.is_match(&self.ruc_code) {
            return Err(ValidationError::InvalidRuc(self.ruc_code.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Contacts
// =============================================================================

/// A person belonging to exactly one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub date_entered: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub title: Option<String>,
    pub department: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub phone_mobile: Option<String>,
    pub phone_work: Option<String>,
    pub email: String,
    pub primary_address_street: Option<String>,
    pub deleted: bool,
}

/// Input for creating a contact under an account.
#[derive(Debug, Clone, Default)]
pub struct NewContact {
    pub account_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub title: Option<String>,
    pub department: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub phone_mobile: Option<String>,
    pub phone_work: Option<String>,
    pub primary_address_street: Option<String>,
}

impl NewContact {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !EMAIL_RE.is_match(&self.email) {
            return Err(ValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Work orders (ODTs)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    Invoiced,
    Closed,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::Invoiced => "invoiced",
            WorkOrderStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(WorkOrderStatus::Open),
            "invoiced" => Some(WorkOrderStatus::Invoiced),
            "closed" => Some(WorkOrderStatus::Closed),
            _ => None,
        }
    }
}

/// A priced job for an account, carried out with one of its contacts.
///
/// `number` is assigned from the ODT counter at creation and is unique and
/// monotonically increasing across all committed work orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: String,
    pub number: i64,
    pub account_id: String,
    pub contact_id: String,
    pub description: Option<String>,
    /// Amount in cents; avoids float money arithmetic.
    pub total_cents: i64,
    pub status: WorkOrderStatus,
    pub date_entered: DateTime<Utc>,
    pub deleted: bool,
}

/// Input for creating a work order. The ODT number is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewWorkOrder {
    pub account_id: String,
    pub contact_id: String,
    pub description: Option<String>,
    pub total_cents: i64,
    pub status: WorkOrderStatus,
}

impl NewWorkOrder {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.total_cents < 0 {
            return Err(ValidationError::NegativeAmount(self.total_cents));
        }
        Ok(())
    }
}

// =============================================================================
// File attachments
// =============================================================================

/// Which entity an attachment hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    Account,
    Contact,
    WorkOrder,
}

impl ParentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Account => "account",
            ParentKind::Contact => "contact",
            ParentKind::WorkOrder => "work_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account" => Some(ParentKind::Account),
            "contact" => Some(ParentKind::Contact),
            "work_order" => Some(ParentKind::WorkOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentCategory {
    Budget,
    ComplianceDoc,
    ReferenceImage,
}

impl AttachmentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentCategory::Budget => "budget",
            AttachmentCategory::ComplianceDoc => "compliance_doc",
            AttachmentCategory::ReferenceImage => "reference_image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "budget" => Some(AttachmentCategory::Budget),
            "compliance_doc" => Some(AttachmentCategory::ComplianceDoc),
            "reference_image" => Some(AttachmentCategory::ReferenceImage),
            _ => None,
        }
    }
}

/// A file reference tagged with its parent entity and a category.
///
/// The parent is a polymorphic reference: `parent_kind` disambiguates which
/// table `parent_id` points into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: i64,
    pub parent_kind: ParentKind,
    pub parent_id: String,
    pub category: AttachmentCategory,
    pub file_name: String,
    pub date_entered: DateTime<Utc>,
}

/// Per-table row counts, reported by the admin CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RecordCounts {
    pub accounts: usize,
    pub contacts: usize,
    pub work_orders: usize,
    pub file_attachments: usize,
}
