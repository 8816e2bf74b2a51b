//! Tagged shapes for the upstream booking platform's JSON responses.
//!
//! Encodes only the fields the booking handshake actually consumes; unknown fields
//! are tolerated, missing required fields fail clearly at deserialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct FindRequest {
    pub day: String,
    pub venue_id: i64,
    pub party_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub results: FindResults,
}

#[derive(Debug, Deserialize)]
pub struct FindResults {
    #[serde(default)]
    pub venues: Vec<VenueSlots>,
}

#[derive(Debug, Deserialize)]
pub struct VenueSlots {
    pub venue: VenueInfo,
    #[serde(default)]
    pub slots: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct VenueInfo {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Slot {
    pub date: SlotDate,
    pub config: SlotConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotDate {
    /// Naive local datetime in the venue's timezone, e.g. "2025-06-01 19:00:00".
    pub start: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotConfig {
    /// Opaque config token required to request DETAIL.
    pub token: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct DetailRequest {
    pub commit: u8,
    pub config_id: String,
    pub day: String,
    pub party_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct DetailResponse {
    pub book_token: BookToken,
}

#[derive(Debug, Deserialize)]
pub struct BookToken {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct StructPaymentMethod {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BookResponse {
    pub reservation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub payment_method_id: Option<i64>,
}
