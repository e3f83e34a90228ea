//! Posts both legs of a pair and classifies what came back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::model::{Direction, EventFields, EventPayload, EventType, TransactionPair};
use crate::transport::{EventPoster, PostResponse, TransportError};

pub const FAILED_POST: &str = "FAILED POST";
/// `responseBody` of every 204 envelope, whatever the leg's event type.
pub const NO_CONTENT_PLACEHOLDER: &str = "paymentNRT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// `200 OK`: synchronous decision with a body carrying risk scores.
    SuccessWithBody,
    /// `204 No Content`: accepted for asynchronous processing.
    SuccessNoBody,
    Failure,
}

impl ResponseClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => ResponseClass::SuccessWithBody,
            204 => ResponseClass::SuccessNoBody,
            _ => ResponseClass::Failure,
        }
    }
}

/// Record written next to each posted payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub transaction_id: String,
    pub event_id: String,
    pub event_type: String,
    pub response_status: String,
    pub response_headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_result: Option<String>,
    pub response_body: Value,
    pub process_time: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn build(
        leg: &EventPayload,
        resp: &PostResponse,
        class: ResponseClass,
        process_time: DateTime<Utc>,
    ) -> Self {
        let event_type = leg.event_type();
        let (response_result, response_body) = match class {
            ResponseClass::SuccessWithBody => (None, body_value(&resp.body)),
            ResponseClass::SuccessNoBody => (None, Value::from(NO_CONTENT_PLACEHOLDER)),
            ResponseClass::Failure => (Some(FAILED_POST.to_string()), body_value(&resp.body)),
        };

        Self {
            transaction_id: leg.transaction_id().to_string(),
            event_id: leg.event_id().to_string(),
            event_type: event_type.as_str().to_string(),
            response_status: resp.status_line.clone(),
            response_headers: resp.headers.clone(),
            response_result,
            response_body,
            process_time,
        }
    }
}

/// JSON bodies are kept structured, anything else as text.
fn body_value(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Highest number under `entities[*].overallScore.*`, or 0.0 when the
/// structure is missing. Never negative.
pub fn extract_risk_score(body: &[u8]) -> f64 {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Risk score: response body is not JSON: {}", e);
            return 0.0;
        }
    };

    let Some(entities) = parsed.get("entities").and_then(Value::as_array) else {
        warn!("Risk score: response has no entities array");
        return 0.0;
    };

    let mut score = 0.0_f64;
    for entity in entities {
        match entity.get("overallScore").and_then(Value::as_object) {
            Some(scores) => {
                for value in scores.values().filter_map(Value::as_f64) {
                    score = score.max(value);
                }
            }
            None => warn!("Risk score: entity without overallScore map"),
        }
    }
    score
}

/// Result of posting one leg.
#[derive(Debug, Clone)]
pub struct LegOutcome {
    pub direction: Direction,
    pub event_type: EventType,
    pub tenant_id: String,
    pub local_instrument: String,
    pub class: ResponseClass,
    /// Extracted on `200 OK` only.
    pub score: Option<f64>,
    pub elapsed: Duration,
    pub envelope: ResponseEnvelope,
}

pub struct Dispatcher {
    poster: Arc<dyn EventPoster>,
}

impl Dispatcher {
    pub fn new(poster: Arc<dyn EventPoster>) -> Self {
        Self { poster }
    }

    /// Posts both legs in the pair's mandated order. The second POST is
    /// only issued once the first response has been received.
    pub async fn dispatch(&self, pair: &TransactionPair) -> Result<[LegOutcome; 2], TransportError> {
        let [first, second] = pair.post_order();
        let first = self.post_leg(pair.leg(first), first).await?;
        let second = self.post_leg(pair.leg(second), second).await?;
        Ok([first, second])
    }

    pub async fn post_leg(&self, leg: &EventPayload, direction: Direction) -> Result<LegOutcome, TransportError> {
        let body = leg
            .to_json_bytes()
            .map_err(|e| TransportError::Request(format!("encode {} leg: {}", direction, e)))?;

        debug!(
            transaction_id = %leg.transaction_id(),
            event_id = %leg.event_id(),
            direction = %direction,
            endpoint = self.poster.endpoint(),
            "Posting leg"
        );
        let resp = self.poster.post(body).await?;
        let class = ResponseClass::from_status(resp.status);
        let event_type = leg.event_type();

        let score = match class {
            ResponseClass::SuccessWithBody => Some(extract_risk_score(&resp.body)),
            _ => None,
        };

        info!(
            transaction_id = %leg.transaction_id(),
            event_id = %leg.event_id(),
            status = resp.status,
            "{} {} => {}",
            direction,
            event_type,
            resp.status_line
        );
        trace!(headers = ?resp.headers, body = %resp.body_text(), "Response detail");
        if class == ResponseClass::Failure {
            warn!(
                transaction_id = %leg.transaction_id(),
                status = resp.status,
                "{} post failed: {}",
                direction,
                resp.body_text()
            );
        }

        Ok(LegOutcome {
            direction,
            event_type,
            tenant_id: leg.tenant_id().to_string(),
            local_instrument: leg.local_instrument().unwrap_or_default().to_string(),
            class,
            score,
            elapsed: resp.elapsed,
            envelope: ResponseEnvelope::build(leg, &resp, class, Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScenarioEvent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedPoster {
        statuses: Mutex<Vec<u16>>,
        seen: Mutex<Vec<Value>>,
    }

    impl ScriptedPoster {
        fn new(statuses: &[u16]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().rev().copied().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventPoster for ScriptedPoster {
        async fn post(&self, body: Vec<u8>) -> Result<PostResponse, TransportError> {
            self.seen.lock().unwrap().push(serde_json::from_slice(&body).unwrap());
            let status = self.statuses.lock().unwrap().pop().unwrap_or(204);
            let body = if status == 200 {
                br#"{"entities":[{"overallScore":{"a":12.5,"b":80}}]}"#.to_vec()
            } else if status == 204 {
                Vec::new()
            } else {
                br#"{"error":"bad tenant"}"#.to_vec()
            };
            Ok(PostResponse {
                status,
                status_line: format!("{} Test", status),
                headers: BTreeMap::from([("x-request-id".to_string(), vec!["r1".to_string()])]),
                body,
                elapsed: Duration::from_millis(5),
            })
        }

        fn endpoint(&self) -> &str {
            "mock://events"
        }
    }

    fn leg(value: Value) -> EventPayload {
        match value {
            Value::Object(map) => EventPayload::Scenario(ScenarioEvent(map)),
            _ => panic!("fixture must be an object"),
        }
    }

    fn payment_pair() -> TransactionPair {
        TransactionPair::new(
            leg(json!({"transactionId": "t1", "eventId": "o1", "eventType": "paymentNRT", "tenantId": "alpha", "localInstrument": "RTP"})),
            leg(json!({"transactionId": "t1", "eventId": "i1", "eventType": "paymentRT", "tenantId": "beta", "localInstrument": "RTP"})),
        )
    }

    #[test]
    fn test_classification() {
        assert_eq!(ResponseClass::from_status(200), ResponseClass::SuccessWithBody);
        assert_eq!(ResponseClass::from_status(204), ResponseClass::SuccessNoBody);
        for status in [201, 202, 400, 500] {
            assert_eq!(ResponseClass::from_status(status), ResponseClass::Failure);
        }
    }

    #[test]
    fn test_risk_score_takes_maximum() {
        let body = json!({
            "entities": [
                {"overallScore": {"fraud": 10.0, "mule": 42.5}},
                {"overallScore": {"fraud": 99, "label": "high"}},
                {"other": true}
            ]
        });
        assert_eq!(extract_risk_score(body.to_string().as_bytes()), 99.0);
    }

    #[test]
    fn test_risk_score_defaults_to_zero() {
        assert_eq!(extract_risk_score(b"not json"), 0.0);
        assert_eq!(extract_risk_score(b"{}"), 0.0);
        assert_eq!(extract_risk_score(br#"{"entities": "nope"}"#), 0.0);
        assert_eq!(extract_risk_score(br#"{"entities": [{"overallScore": {"a": -5}}]}"#), 0.0);
    }

    #[test]
    fn test_envelopes_for_each_class() {
        let event = leg(json!({"transactionId": "t1", "eventId": "e1", "eventType": "paymentNRT"}));
        let resp = |status: u16, body: &[u8]| PostResponse {
            status,
            status_line: format!("{} X", status),
            headers: BTreeMap::new(),
            body: body.to_vec(),
            elapsed: Duration::ZERO,
        };
        let now = Utc::now();

        let ok = ResponseEnvelope::build(&event, &resp(200, br#"{"entities":[]}"#), ResponseClass::SuccessWithBody, now);
        assert_eq!(ok.response_body, json!({"entities": []}));
        assert_eq!(ok.response_result, None);

        let accepted = ResponseEnvelope::build(&event, &resp(204, b""), ResponseClass::SuccessNoBody, now);
        assert_eq!(accepted.response_body, json!("paymentNRT"));

        let failed = ResponseEnvelope::build(&event, &resp(500, b"boom"), ResponseClass::Failure, now);
        assert_eq!(failed.response_result.as_deref(), Some(FAILED_POST));
        assert_eq!(failed.response_body, json!("boom"));

        for envelope in [&ok, &accepted, &failed] {
            assert_eq!(envelope.transaction_id, "t1");
            assert_eq!(envelope.event_id, "e1");
            assert_eq!(envelope.event_type, "paymentNRT");
        }
        let v = serde_json::to_value(&accepted).unwrap();
        assert!(v.get("responseResult").is_none());
        assert!(v.get("processTime").is_some());
    }

    #[tokio::test]
    async fn test_payment_pair_posts_inbound_first() {
        let poster = Arc::new(ScriptedPoster::new(&[200, 204]));
        let dispatcher = Dispatcher::new(poster.clone());
        let [first, second] = dispatcher.dispatch(&payment_pair()).await.unwrap();

        assert_eq!(first.direction, Direction::Inbound);
        assert_eq!(first.score, Some(80.0));
        assert_eq!(first.tenant_id, "beta");
        assert_eq!(second.direction, Direction::Outbound);
        assert_eq!(second.class, ResponseClass::SuccessNoBody);
        assert_eq!(second.score, None);

        let seen = poster.seen.lock().unwrap();
        assert_eq!(seen[0]["eventId"], "i1");
        assert_eq!(seen[1]["eventId"], "o1");
    }

    #[tokio::test]
    async fn test_add_payee_pair_posts_outbound_first() {
        let poster = Arc::new(ScriptedPoster::new(&[204, 400]));
        let dispatcher = Dispatcher::new(poster.clone());
        let pair = TransactionPair::new(
            leg(json!({"eventId": "o1", "eventType": "addPayeeRT"})),
            leg(json!({"eventId": "i1", "eventType": "addPayeeNRT"})),
        );
        let [first, second] = dispatcher.dispatch(&pair).await.unwrap();

        assert_eq!(first.direction, Direction::Outbound);
        assert_eq!(first.envelope.event_type, "addPayeeRT");
        assert_eq!(first.envelope.response_body, json!(NO_CONTENT_PLACEHOLDER));
        assert_eq!(second.class, ResponseClass::Failure);
        assert_eq!(second.envelope.response_body, json!({"error": "bad tenant"}));
        assert_eq!(poster.seen.lock().unwrap()[0]["eventId"], "o1");
    }
}
