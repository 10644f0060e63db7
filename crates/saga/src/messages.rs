//! Topics, typed payloads and the base64 wire envelope.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ledger::{CorrelationId, TransactionStatus, TransitId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::protocol::DEFAULT_CANCELLATION_ERROR;

/// Named bus topics of the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    Bookings,
    Payments,
    BookingCompletions,
    BookingCancellations,
    ReservationCompletions,
    ReservationCancellations,
    Notifications,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Bookings,
        Topic::Payments,
        Topic::BookingCompletions,
        Topic::BookingCancellations,
        Topic::ReservationCompletions,
        Topic::ReservationCancellations,
        Topic::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Bookings => "bookings",
            Topic::Payments => "payments",
            Topic::BookingCompletions => "bookingCompletions",
            Topic::BookingCancellations => "bookingCancellations",
            Topic::ReservationCompletions => "reservationCompletions",
            Topic::ReservationCancellations => "reservationCancellations",
            Topic::Notifications => "notifications",
        }
    }

    /// Returns true for topics that carry compensation triggers.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            Topic::BookingCancellations | Topic::ReservationCancellations
        )
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

/// Returned when parsing a topic name that is not part of the saga.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

fn default_cancellation_error() -> String {
    DEFAULT_CANCELLATION_ERROR.to_string()
}

/// `bookings`: a reservation was accepted and seats must be locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequested {
    pub correlation_id: CorrelationId,
    pub number_of_seats: u32,
    pub transit_id: TransitId,
    pub user_id: String,
}

/// `payments`: seats are locked and the user must be charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequested {
    pub correlation_id: CorrelationId,
    pub user_id: String,
    pub amount: u64,
}

/// `bookingCompletions`: payment succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCompleted {
    pub correlation_id: CorrelationId,
}

/// `bookingCancellations`: payment failed, locked seats must be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelled {
    pub correlation_id: CorrelationId,
    #[serde(default = "default_cancellation_error")]
    pub error: String,
}

/// `reservationCompletions`: the booking is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCompleted {
    pub correlation_id: CorrelationId,
}

/// `reservationCancellations`: the reservation failed somewhere downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCancelled {
    pub correlation_id: CorrelationId,
    #[serde(default = "default_cancellation_error")]
    pub error: String,
}

/// `notifications`: the externally visible conclusion of a saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub correlation_id: CorrelationId,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A payload on one of the saga topics.
///
/// Serializes to the bare payload; the topic travels alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SagaMessage {
    BookingRequested(BookingRequested),
    PaymentRequested(PaymentRequested),
    BookingCompleted(BookingCompleted),
    BookingCancelled(BookingCancelled),
    ReservationCompleted(ReservationCompleted),
    ReservationCancelled(ReservationCancelled),
    Notification(Notification),
}

impl SagaMessage {
    pub fn topic(&self) -> Topic {
        match self {
            SagaMessage::BookingRequested(_) => Topic::Bookings,
            SagaMessage::PaymentRequested(_) => Topic::Payments,
            SagaMessage::BookingCompleted(_) => Topic::BookingCompletions,
            SagaMessage::BookingCancelled(_) => Topic::BookingCancellations,
            SagaMessage::ReservationCompleted(_) => Topic::ReservationCompletions,
            SagaMessage::ReservationCancelled(_) => Topic::ReservationCancellations,
            SagaMessage::Notification(_) => Topic::Notifications,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            SagaMessage::BookingRequested(m) => m.correlation_id,
            SagaMessage::PaymentRequested(m) => m.correlation_id,
            SagaMessage::BookingCompleted(m) => m.correlation_id,
            SagaMessage::BookingCancelled(m) => m.correlation_id,
            SagaMessage::ReservationCompleted(m) => m.correlation_id,
            SagaMessage::ReservationCancelled(m) => m.correlation_id,
            SagaMessage::Notification(m) => m.correlation_id,
        }
    }

    /// Encodes the payload into a wire envelope.
    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        Envelope::encode(self)
    }

    /// Decodes and validates an envelope received on `topic`.
    pub fn decode(topic: Topic, envelope: &Envelope) -> Result<Self, SagaError> {
        let invalid = |reason: String| SagaError::InvalidPayload { topic, reason };

        let bytes = envelope.payload_bytes().map_err(|e| invalid(e.to_string()))?;
        let message = match topic {
            Topic::Bookings => SagaMessage::BookingRequested(parse(&bytes).map_err(invalid)?),
            Topic::Payments => SagaMessage::PaymentRequested(parse(&bytes).map_err(invalid)?),
            Topic::BookingCompletions => {
                SagaMessage::BookingCompleted(parse(&bytes).map_err(invalid)?)
            }
            Topic::BookingCancellations => {
                SagaMessage::BookingCancelled(parse(&bytes).map_err(invalid)?)
            }
            Topic::ReservationCompletions => {
                SagaMessage::ReservationCompleted(parse(&bytes).map_err(invalid)?)
            }
            Topic::ReservationCancellations => {
                SagaMessage::ReservationCancelled(parse(&bytes).map_err(invalid)?)
            }
            Topic::Notifications => SagaMessage::Notification(parse(&bytes).map_err(invalid)?),
        };
        message.validate().map_err(|reason| invalid(reason.to_string()))?;
        Ok(message)
    }

    /// Checks the values serde cannot: non-empty ids, positive quantities.
    fn validate(&self) -> Result<(), &'static str> {
        match self {
            SagaMessage::BookingRequested(m) => {
                if m.number_of_seats == 0 {
                    return Err("numberOfSeats must be positive");
                }
                if m.transit_id.as_str().trim().is_empty() {
                    return Err("transitId is empty");
                }
                if m.user_id.trim().is_empty() {
                    return Err("userId is empty");
                }
            }
            SagaMessage::PaymentRequested(m) => {
                if m.amount == 0 {
                    return Err("amount must be positive");
                }
                if m.user_id.trim().is_empty() {
                    return Err("userId is empty");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

/// Wire form of a bus message: the JSON payload, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
}

impl Envelope {
    /// Serializes `payload` to JSON and wraps it.
    pub fn encode<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(payload)?;
        Ok(Self {
            data: STANDARD.encode(json),
        })
    }

    /// Returns the decoded JSON bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> Envelope {
        Envelope::encode(&json).unwrap()
    }

    #[test]
    fn topic_names_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
        assert!("orders".parse::<Topic>().is_err());
    }

    #[test]
    fn booking_message_uses_wire_field_names() {
        let id = CorrelationId::new();
        let message = SagaMessage::BookingRequested(BookingRequested {
            correlation_id: id,
            number_of_seats: 2,
            transit_id: TransitId::new("T-1"),
            user_id: "user-1".into(),
        });

        let bytes = message.to_envelope().unwrap().payload_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["correlationId"], id.to_string());
        assert_eq!(json["numberOfSeats"], 2);
        assert_eq!(json["transitId"], "T-1");
        assert_eq!(json["userId"], "user-1");
        assert!(json.get("BookingRequested").is_none());
    }

    #[test]
    fn decode_picks_variant_from_topic() {
        let id = CorrelationId::new();
        let env = envelope(serde_json::json!({
            "correlationId": id,
            "userId": "user-1",
            "amount": 40
        }));

        let message = SagaMessage::decode(Topic::Payments, &env).unwrap();
        assert_eq!(message.topic(), Topic::Payments);
        assert_eq!(message.correlation_id(), id);
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let env = envelope(serde_json::json!({
            "correlationId": CorrelationId::new(),
            "userId": "user-1"
        }));

        let err = SagaMessage::decode(Topic::Payments, &env).unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidPayload {
                topic: Topic::Payments,
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_zero_seats_and_blank_user() {
        let id = CorrelationId::new();
        let zero_seats = envelope(serde_json::json!({
            "correlationId": id, "numberOfSeats": 0, "transitId": "T-1", "userId": "u"
        }));
        assert!(SagaMessage::decode(Topic::Bookings, &zero_seats).is_err());

        let blank_user = envelope(serde_json::json!({
            "correlationId": id, "numberOfSeats": 1, "transitId": "T-1", "userId": " "
        }));
        assert!(SagaMessage::decode(Topic::Bookings, &blank_user).is_err());
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let env = Envelope {
            data: "%%% not base64 %%%".into(),
        };
        assert!(SagaMessage::decode(Topic::BookingCompletions, &env).is_err());
    }

    #[test]
    fn cancellation_error_defaults_when_absent() {
        let id = CorrelationId::new();
        let env = envelope(serde_json::json!({ "correlationId": id }));

        let message = SagaMessage::decode(Topic::BookingCancellations, &env).unwrap();
        let SagaMessage::BookingCancelled(cancelled) = message else {
            panic!("expected a booking cancellation");
        };
        assert_eq!(cancelled.error, DEFAULT_CANCELLATION_ERROR);
    }

    #[test]
    fn notification_omits_missing_user() {
        let note = Notification {
            correlation_id: CorrelationId::new(),
            status: TransactionStatus::Failed,
            user_id: None,
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert!(json.get("userId").is_none());
    }
}
