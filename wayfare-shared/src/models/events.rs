use uuid::Uuid;

/// Published once a payment session is confirmed and the booking flow moves on.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct BookingAdvancedEvent {
    pub session_id: Uuid,
    pub booking_id: Uuid,
    pub payment_reference: String,
    pub timestamp: i64,
}
