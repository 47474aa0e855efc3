use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde_json::Value;
use tracing::{debug, warn};

use super::{EstimateOracle, OracleRequest};
use crate::state::room::{Persona, ScalePoint, Topic};

/// Card played whenever the oracle cannot provide a usable answer.
pub const FALLBACK_POINT: ScalePoint = ScalePoint::Eight;
pub const NO_CONTEXT_RATIONALE: &str =
    "No topic details were given, so this is a gut-feeling pick.";
pub const UNAVAILABLE_RATIONALE: &str =
    "The estimation assistant is unavailable right now, so I went with a middle-of-the-scale guess.";
pub const UNREADABLE_RATIONALE: &str =
    "The estimation assistant's answer could not be read, so I went with a middle-of-the-scale guess.";
const NEUTRAL_RATIONALE: &str = "This feels about right for the described scope.";

/// Estimate produced for a simulated participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleEstimate {
    pub value: ScalePoint,
    pub rationale: String,
}

impl OracleEstimate {
    fn fallback(rationale: &str) -> Self {
        Self {
            value: FALLBACK_POINT,
            rationale: rationale.to_string(),
        }
    }
}

/// Wraps an optional [`EstimateOracle`] and guarantees an on-scale answer.
#[derive(Clone, Default)]
pub struct OracleAdapter {
    oracle: Option<Arc<dyn EstimateOracle>>,
}

impl OracleAdapter {
    pub fn new(oracle: Option<Arc<dyn EstimateOracle>>) -> Self {
        Self { oracle }
    }

    /// Adapter without a backing oracle: every topic gets a fallback answer.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.oracle.is_some()
    }

    /// Estimate `topic` in the voice of `persona`. Never fails.
    pub async fn estimate(&self, topic: &Topic, persona: &Persona) -> OracleEstimate {
        if topic.is_blank() {
            return OracleEstimate {
                value: random_point(),
                rationale: NO_CONTEXT_RATIONALE.to_string(),
            };
        }

        let Some(oracle) = &self.oracle else {
            return OracleEstimate::fallback(UNAVAILABLE_RATIONALE);
        };

        let request = OracleRequest::new(topic.clone(), persona.clone());
        let payload = match oracle.request(request).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(persona = %persona.id, remote = err.is_remote(), error = %err, "oracle call failed");
                return OracleEstimate::fallback(UNAVAILABLE_RATIONALE);
            }
        };

        match parse_payload(&payload) {
            Some(estimate) => {
                debug!(persona = %persona.id, value = %estimate.value, "oracle estimate");
                estimate
            }
            None => {
                warn!(persona = %persona.id, payload = %payload, "unreadable oracle payload");
                OracleEstimate::fallback(UNREADABLE_RATIONALE)
            }
        }
    }
}

fn random_point() -> ScalePoint {
    ScalePoint::ALL
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_POINT)
}

/// Extract `{value, rationale}` from a raw oracle payload and snap the value onto the scale.
///
/// The outermost JSON object is located inside the text so prose or code fences around it are
/// tolerated. `value` may be a number or a numeric string; anything else is unreadable.
pub fn parse_payload(payload: &str) -> Option<OracleEstimate> {
    let start = payload.find('{')?;
    let end = payload.rfind('}')?;
    if end < start {
        return None;
    }

    let object: Value = serde_json::from_str(&payload[start..=end]).ok()?;
    let raw = match object.get("value")? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let value = ScalePoint::nearest(raw)?;

    let rationale = object
        .get("rationale")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(NEUTRAL_RATIONALE)
        .to_string();

    Some(OracleEstimate { value, rationale })
}
