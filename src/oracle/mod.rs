//! Estimate oracle: the text-generation service that plays simulated participants.

/// Policy layer turning oracle answers into scale members.
pub mod adapter;
/// HTTP client for the Anthropic Messages API.
pub mod anthropic;
/// Oracle client errors.
pub mod error;

use futures::future::BoxFuture;

use crate::state::room::{Persona, ScalePoint, Topic};

pub use adapter::{OracleAdapter, OracleEstimate};
pub use error::OracleError;

/// Question put to the oracle: estimate `topic` in the voice of `persona`.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub topic: Topic,
    pub persona: Persona,
}

impl OracleRequest {
    pub fn new(topic: Topic, persona: Persona) -> Self {
        Self { topic, persona }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are {name}, {role}. You are taking part in a planning poker session and give \
             story point estimates the way someone in that role would.",
            name = self.persona.name,
            role = self.persona.role,
        )
    }

    /// Instructions asking for a machine-readable JSON answer constrained to the scale.
    pub fn user_prompt(&self) -> String {
        let scale = ScalePoint::ALL
            .iter()
            .map(ScalePoint::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let description = match self.topic.description.trim() {
            "" => "(no description)",
            text => text,
        };

        format!(
            "Estimate the following work item.\n\n\
             Title: {title}\n\
             Description: {description}\n\n\
             Answer with a single JSON object and nothing else: \
             {{\"value\": <one of {scale}>, \"rationale\": \"<one sentence explaining your estimate>\"}}",
            title = self.topic.title.trim(),
        )
    }
}

/// Text-generation service producing raw estimate payloads.
///
/// Implementations return the model's text verbatim; parsing and scale snapping are done by
/// [`OracleAdapter`].
pub trait EstimateOracle: Send + Sync {
    fn request(&self, request: OracleRequest) -> BoxFuture<'static, Result<String, OracleError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_name_the_persona_and_the_scale() {
        let request = OracleRequest::new(
            Topic::new("Password reset", ""),
            Persona {
                id: "qa".into(),
                name: "Tomasz".into(),
                role: "a meticulous QA engineer".into(),
                avatar_ref: String::new(),
            },
        );

        assert!(request.system_prompt().contains("Tomasz"));
        assert!(request.system_prompt().contains("meticulous QA engineer"));
        let prompt = request.user_prompt();
        assert!(prompt.contains("Title: Password reset"));
        assert!(prompt.contains("(no description)"));
        assert!(prompt.contains("1, 2, 3, 5, 8, 13, 21"));
    }
}
