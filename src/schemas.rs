use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

fn default_false() -> bool {
    false
}

/// Verified payment event handed over by the payment gateway collaborator.
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RentPrepaymentInput {
    #[validate(length(min = 1, max = 64))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 64))]
    pub lease_id: String,
    #[validate(length(min = 1, max = 64))]
    pub tenant_user_id: String,
    #[validate(custom(function = "positive_amount"))]
    pub amount_paid: Decimal,
    #[serde(default, alias = "months_paid")]
    #[validate(range(min = 1, max = 120))]
    pub months_paid_hint: Option<u32>,
    pub payment_date: DateTime<Utc>,
    #[validate(length(max = 40))]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, Validate)]
pub struct AutoCreateInvoicesInput {
    #[validate(length(max = 500))]
    pub lease_ids: Option<Vec<String>>,
    #[serde(default = "default_false")]
    pub force_recreate: bool,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct MarkOverdueInput {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasePath {
    pub lease_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use validator::Validate;

    use super::{AutoCreateInvoicesInput, RentPrepaymentInput};

    #[test]
    fn accepts_months_paid_alias_and_string_amounts() {
        let input: RentPrepaymentInput = serde_json::from_value(json!({
            "payment_id": "p-1",
            "lease_id": "l-1",
            "tenant_user_id": "t-1",
            "amount_paid": "30000.00",
            "months_paid": 3,
            "payment_date": "2026-03-10T09:00:00Z",
            "method": "mpesa"
        }))
        .expect("valid payload");
        assert_eq!(input.months_paid_hint, Some(3));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let input: RentPrepaymentInput = serde_json::from_value(json!({
            "payment_id": "p-1",
            "lease_id": "l-1",
            "tenant_user_id": "t-1",
            "amount_paid": "0",
            "payment_date": "2026-03-10T09:00:00Z"
        }))
        .expect("valid payload");
        assert!(input.validate().is_err());
    }

    #[test]
    fn auto_create_defaults_to_all_leases() {
        let input: AutoCreateInvoicesInput =
            serde_json::from_value(json!({})).expect("empty body");
        assert_eq!(input.lease_ids, None);
        assert!(!input.force_recreate);
    }
}
