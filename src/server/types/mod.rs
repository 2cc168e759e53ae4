//! HTTP boundary types
//!
//! - [`request`]: validated request DTOs
//! - [`response`]: `ApiResponse<T>` envelope, `ApiError`, response DTOs

pub mod request;
pub mod response;

pub use request::{
    CreateBookingRequest, DisputeRequest, InitiatePaymentRequest, PayoutAccountRequest,
    ResolveDisputeRequest,
};
pub use response::{
    ApiError, ApiResponse, ApiResult, BookingView, PaymentInitView, PaymentView,
    PayoutAccountView, PayoutView, WebhookAck, error_codes, ok,
};
