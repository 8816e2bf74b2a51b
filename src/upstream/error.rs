//! Error taxonomy surfaced by the Upstream Protocol Client.

use thiserror::Error;

/// Which call in the booking handshake (or login) an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStep {
    Login,
    Find,
    Detail,
    Book,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP 419 on the login endpoint.
    #[error("login credentials rejected")]
    LoginWrong,
    /// Login response lacks a payment_method_id.
    #[error("no payment method on file")]
    NoPaymentInfo,
    /// FIND returned zero venues.
    #[error("no offer available for this venue")]
    NoOffer,
    /// All candidate slots exhausted without a successful booking.
    #[error("no table available matching the request")]
    NoTable,
    /// WAF challenge retry budget exhausted.
    #[error("blocked by WAF challenge after exhausting retry budget")]
    WafBlocked,
    /// Any other non-2xx or transport error.
    #[error("network error during {step:?}: {message}")]
    Network {
        step: UpstreamStep,
        status: Option<u16>,
        message: String,
    },
}
