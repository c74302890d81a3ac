use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::error_response;
use validator::Validate;

/// JSON body that has passed `validator` checks.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Json parse error: {}", e),
                Some("invalid_json"),
                None,
                None,
            )
        })?;

        value.validate().map_err(|e| {
            error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some("validation_error"),
                Some(e.to_string()),
                None,
            )
        })?;

        Ok(ValidatedJson(value))
    }
}
