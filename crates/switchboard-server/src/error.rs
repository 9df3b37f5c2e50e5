use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use switchboard::RegistryError;
use thiserror::Error;

use crate::vendor::VendorError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to prepare session: {0}")]
    Registry(#[from] RegistryError),
    #[error("Realtime service unavailable: {0}")]
    Vendor(#[from] VendorError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Vendor(_) => StatusCode::BAD_GATEWAY,
        };

        (status, self.to_string()).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Sections a bare field name can belong to when serde reports it as missing.
const REQUIRED_FIELD_SECTIONS: &[(&str, &str)] = &[("api_key", "vendor")];

// Map a config path like `vendor.api_key` to the variable that sets it
pub(crate) fn to_env_var(field_path: &str) -> String {
    let normalized_path = if field_path.contains('.') {
        field_path.to_string()
    } else {
        REQUIRED_FIELD_SECTIONS
            .iter()
            .find(|(field, _)| *field == field_path)
            .map(|(field, section)| format!("{}.{}", section, field))
            .unwrap_or_else(|| field_path.to_string())
    };

    format!(
        "SWITCHBOARD_{}",
        normalized_path.replace('.', "__").to_uppercase()
    )
}
