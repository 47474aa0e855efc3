use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_display_name;

/// Local identity as shown by the frontend.
#[derive(Debug, Serialize, ToSchema)]
pub struct IdentityResponse {
    /// Display name used in every room, absent until chosen.
    pub display_name: Option<String>,
    /// Avatar derived from the display name.
    pub avatar_ref: Option<String>,
}

/// Request to choose or change the display name.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateIdentityRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub display_name: String,
}
