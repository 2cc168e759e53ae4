//! Request DTOs
//!
//! Amounts arrive as major-unit strings ("500.00") and are parsed with
//! [`crate::money::parse_amount`]; JSON numbers are rejected so no value
//! ever passes through a binary float.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::escrow::actions::CreateBooking;
use crate::gateway::BankDetails;
use crate::money::parse_amount;

use super::response::ApiError;

fn validated<T: Validate>(req: &T) -> Result<(), ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string().replace('\n', "; ")))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    pub provider_id: i64,
    pub service_id: i64,
    pub scheduled_date: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    /// Major units, e.g. "500.00"
    #[schema(example = "500.00")]
    pub total_amount: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
}

impl CreateBookingRequest {
    pub fn into_command(self) -> Result<CreateBooking, ApiError> {
        validated(&self)?;
        let total_amount = parse_amount(&self.total_amount)
            .map_err(|e| ApiError::bad_request(format!("total_amount: {}", e)))?;
        Ok(CreateBooking {
            provider_id: self.provider_id,
            service_id: self.service_id,
            scheduled_date: self.scheduled_date,
            duration_minutes: self.duration_minutes,
            total_amount,
            address: self.address.trim().to_string(),
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    /// `ONLINE` (default) or `CASH`
    #[serde(default)]
    #[schema(example = "ONLINE")]
    pub method: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DisputeRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

impl DisputeRequest {
    pub fn reason(&self) -> Result<&str, ApiError> {
        validated(self)?;
        Ok(&self.reason)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveDisputeRequest {
    /// `RELEASE` or `REFUND`
    #[schema(example = "RELEASE")]
    pub resolution: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PayoutAccountRequest {
    #[validate(length(min = 1, max = 200))]
    pub account_name: String,
    #[validate(length(min = 6, max = 20))]
    pub account_number: String,
    #[validate(length(min = 2, max = 10))]
    pub bank_code: String,
}

impl PayoutAccountRequest {
    pub fn into_bank_details(self) -> Result<BankDetails, ApiError> {
        validated(&self)?;
        if !self.account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiError::bad_request("account_number must be digits"));
        }
        Ok(BankDetails {
            account_name: self.account_name,
            account_number: self.account_number,
            bank_code: self.bank_code,
        })
    }
}
