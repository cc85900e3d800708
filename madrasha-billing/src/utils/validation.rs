use axum::{
    extract::{FromRequest, Request},
    Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON body that has passed its `validator` rules.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid JSON body: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// Money amounts must be strictly positive with at most two decimal places.
pub fn ensure_positive(amount: Decimal, field: &str) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be greater than zero",
            field
        )));
    }
    if amount.scale() > 2 && amount.normalize().scale() > 2 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} cannot have more than two decimal places",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn positive_amounts_pass() {
        assert!(ensure_positive(dec!(1500), "amount").is_ok());
        assert!(ensure_positive(dec!(0.01), "amount").is_ok());
        assert!(ensure_positive(dec!(12.500), "amount").is_ok());
    }

    #[test]
    fn zero_negative_and_sub_cent_amounts_fail() {
        assert!(ensure_positive(Decimal::ZERO, "amount").is_err());
        assert!(ensure_positive(dec!(-5), "amount").is_err());
        assert!(ensure_positive(dec!(1.005), "amount").is_err());
    }
}
