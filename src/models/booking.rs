use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::models::catalog;

pub const DEFAULT_BRAND: &str = "Any";
pub const DEFAULT_TONNAGE: &str = "1.5 Ton";
pub const DEFAULT_BUDGET: &str = "Not specified";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub user_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub booking_type: BookingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_details: Option<PurchaseDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub status: BookingStatus,
    pub ac_type: AcType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by the store on every write.
    pub revision: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDetails {
    pub brands: BTreeSet<String>,
    pub tonnage: String,
    pub budget: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingType {
    #[default]
    Service,
    Amc,
    Purchase,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Service => "SERVICE",
            BookingType::Amc => "AMC",
            BookingType::Purchase => "PURCHASE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SERVICE" => Some(BookingType::Service),
            "AMC" => Some(BookingType::Amc),
            "PURCHASE" => Some(BookingType::Purchase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(BookingStatus::Pending),
            "Confirmed" => Some(BookingStatus::Confirmed),
            "Completed" => Some(BookingStatus::Completed),
            "Cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Statuses reachable in one step.
    pub fn next_statuses(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[BookingStatus::Confirmed, BookingStatus::Cancelled],
            BookingStatus::Confirmed => &[BookingStatus::Completed, BookingStatus::Cancelled],
            BookingStatus::Completed | BookingStatus::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AcType {
    #[default]
    Split,
    Window,
    Cassette,
    Tower,
    Other,
}

impl AcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcType::Split => "Split",
            AcType::Window => "Window",
            AcType::Cassette => "Cassette",
            AcType::Tower => "Tower",
            AcType::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Split" => Some(AcType::Split),
            "Window" => Some(AcType::Window),
            "Cassette" => Some(AcType::Cassette),
            "Tower" => Some(AcType::Tower),
            "Other" => Some(AcType::Other),
            _ => None,
        }
    }
}

/// A booking or purchase request as submitted by a form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub customer_address: String,
    #[serde(default)]
    pub booking_type: Option<BookingType>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub purchase_details: Option<PurchaseDraft>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub ac_type: Option<AcType>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDraft {
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub tonnage: Option<String>,
    #[serde(default)]
    pub budget: Option<String>,
}

impl BookingDraft {
    /// Validates the draft and builds a new `Pending` booking without an id.
    ///
    /// Fields that do not apply to the booking type are dropped: a service
    /// booking keeps only `serviceId`, a plan keeps only `planId`, and only a
    /// purchase carries `purchaseDetails`.
    pub fn into_booking(
        self,
        user_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Booking, ValidationError> {
        let customer_name = required("customerName", &self.customer_name)?;
        let customer_phone = required("customerPhone", &self.customer_phone)?;
        if customer_phone.len() != 10 || !customer_phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::new(
                "customerPhone",
                "enter a valid 10-digit phone number",
            ));
        }
        let customer_address = required("customerAddress", &self.customer_address)?;

        let booking_type = self.booking_type.unwrap_or_default();
        let date = non_empty(self.date);
        let time = non_empty(self.time);

        if booking_type != BookingType::Purchase {
            let Some(d) = date.as_deref() else {
                return Err(ValidationError::new("date", "date is required"));
            };
            if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
                return Err(ValidationError::new("date", "date must be YYYY-MM-DD"));
            }
            if time.is_none() {
                return Err(ValidationError::new("time", "time slot is required"));
            }
        }

        let (service_id, plan_id, purchase_details) = match booking_type {
            BookingType::Service => {
                let id = non_empty(self.service_id)
                    .ok_or_else(|| ValidationError::new("serviceId", "please select a service"))?;
                if !catalog::is_known_service(&id) {
                    return Err(ValidationError::new("serviceId", format!("unknown service: {id}")));
                }
                (Some(id), None, None)
            }
            BookingType::Amc => {
                let id = non_empty(self.plan_id)
                    .ok_or_else(|| ValidationError::new("planId", "please select a plan"))?;
                if !catalog::is_known_plan(&id) {
                    return Err(ValidationError::new("planId", format!("unknown plan: {id}")));
                }
                (None, Some(id), None)
            }
            BookingType::Purchase => {
                let draft = self.purchase_details.unwrap_or_default();
                let mut brands: BTreeSet<String> = draft
                    .brands
                    .into_iter()
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect();
                if brands.is_empty() {
                    brands.insert(DEFAULT_BRAND.to_string());
                }
                let details = PurchaseDetails {
                    brands,
                    tonnage: non_empty(draft.tonnage).unwrap_or_else(|| DEFAULT_TONNAGE.to_string()),
                    budget: non_empty(draft.budget).unwrap_or_else(|| DEFAULT_BUDGET.to_string()),
                };
                (None, None, Some(details))
            }
        };

        Ok(Booking {
            id: String::new(),
            user_id,
            customer_name,
            customer_phone,
            customer_address,
            booking_type,
            service_id,
            plan_id,
            purchase_details,
            date,
            time,
            status: BookingStatus::Pending,
            ac_type: self.ac_type.unwrap_or_default(),
            notes: non_empty(self.notes),
            created_at: now,
            updated_at: now,
            revision: 1,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::new(field, format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
