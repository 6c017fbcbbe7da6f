// Invoice document payloads (PDF / Pohoda XML / ISDOC jobs)
//
// Snapshots of business entities taken at submit time. The persistence
// layer owns the real entities; these only carry what a renderer needs.
// Money is in minor units (haléře).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub organization_id: i64,
    pub month: u32,
    pub year: i32,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub ico: Option<String>,
    #[serde(default)]
    pub dic: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub hourly_rate_minor: i64,
    #[serde(default)]
    pub km_rate_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    pub id: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    pub minutes: u32,
    #[serde(default)]
    pub kilometers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceItem {
    pub id: i64,
    pub name: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareItem {
    pub id: i64,
    pub name: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
}

/// Precomputed totals (the arithmetic lives with the invoice service)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub work_minor: i64,
    pub travel_minor: i64,
    pub services_minor: i64,
    pub hardware_minor: i64,
    pub subtotal_minor: i64,
    pub vat_rate_percent: u32,
    pub vat_minor: i64,
    pub total_minor: i64,
}

/// Payload for PDF rendering and Pohoda XML export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDocument {
    pub invoice: Invoice,
    pub organization: Organization,
    #[serde(default)]
    pub work_records: Vec<WorkRecord>,
    #[serde(default)]
    pub services: Vec<ServiceItem>,
    #[serde(default)]
    pub hardware: Vec<HardwareItem>,
}

/// Payload for ISDOC export: the document plus its totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsdocDocument {
    #[serde(flatten)]
    pub document: InvoiceDocument,
    pub totals: InvoiceTotals,
}

/// Where a renderer stored its artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub location: String,
}
