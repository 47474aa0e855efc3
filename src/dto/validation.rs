//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::room::EstimateValue;

pub const DISPLAY_NAME_MIN: usize = 2;
pub const DISPLAY_NAME_MAX: usize = 20;
pub const ROOM_ID_MAX: usize = 64;

/// Validates that a display name has 2 to 20 characters once trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("  Ada ") // Ok
/// validate_display_name("A")      // Err - too short
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let length = name.trim().chars().count();
    if !(DISPLAY_NAME_MIN..=DISPLAY_NAME_MAX).contains(&length) {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!(
                "Display name must be between {DISPLAY_NAME_MIN} and {DISPLAY_NAME_MAX} characters (got {length})"
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates that a room id is 1 to 64 ASCII letters, digits, `-` or `_`.
pub fn validate_room_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > ROOM_ID_MAX {
        let mut err = ValidationError::new("room_id_length");
        err.message =
            Some(format!("Room id must be between 1 and {ROOM_ID_MAX} characters").into());
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("room_id_format");
        err.message = Some("Room id may only contain letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a vote is a card of the scale or `?`.
pub fn validate_estimate_value(value: &str) -> Result<(), ValidationError> {
    value.parse::<EstimateValue>().map(drop).map_err(|off_scale| {
        let mut err = ValidationError::new("estimate_value");
        err.message = Some(off_scale.to_string().into());
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_are_measured_trimmed() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name("  Al  ").is_ok());
        assert!(validate_display_name("Zoë").is_ok());
        assert!(validate_display_name(&"x".repeat(20)).is_ok());

        assert!(validate_display_name(" A ").is_err()); // too short once trimmed
        assert!(validate_display_name(&"x".repeat(21)).is_err());
        assert!(validate_display_name("   ").is_err());
    }

    #[test]
    fn room_ids_are_url_safe() {
        assert!(validate_room_id("a1b2c3d4").is_ok());
        assert!(validate_room_id("team_sync-42").is_ok());

        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("with space").is_err());
        assert!(validate_room_id("semi;colon").is_err());
        assert!(validate_room_id(&"r".repeat(65)).is_err());
    }

    #[test]
    fn votes_must_be_on_the_scale() {
        assert!(validate_estimate_value("21").is_ok());
        assert!(validate_estimate_value("?").is_ok());
        assert!(validate_estimate_value("4").is_err());
        assert!(validate_estimate_value("one").is_err());
    }
}
