//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers::HealthResponse;
use super::types::{
    BookingView, CreateBookingRequest, DisputeRequest, InitiatePaymentRequest, PaymentInitView,
    PaymentView, PayoutAccountRequest, PayoutAccountView, PayoutView, ResolveDisputeRequest,
    WebhookAck,
};

/// Identity headers forwarded by the session layer
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "actor_headers",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-User-Id",
                    r#"Authenticated caller, set by the upstream session layer.

Both headers are required:
- X-User-Id: positive integer user id
- X-User-Role: client | provider | admin"#,
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Escrow Engine API",
        version = "1.0.0",
        description = "Booking lifecycle, escrowed payments and provider payouts for a services marketplace.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::server::handlers::health_check,
        // Bookings
        crate::server::handlers::create_booking,
        crate::server::handlers::get_booking,
        crate::server::handlers::accept_booking,
        crate::server::handlers::reject_booking,
        crate::server::handlers::start_job,
        crate::server::handlers::complete_job,
        crate::server::handlers::confirm_completion,
        crate::server::handlers::cancel_booking,
        crate::server::handlers::file_dispute,
        // Payments
        crate::server::handlers::initiate_payment,
        crate::server::handlers::confirm_cash_received,
        // Admin
        crate::server::handlers::verify_cash,
        crate::server::handlers::resolve_dispute,
        // Providers
        crate::server::handlers::register_payout_account,
        // Gateway callbacks
        crate::server::handlers::gateway_webhook,
    ),
    components(
        schemas(
            HealthResponse,
            BookingView,
            PaymentView,
            PayoutView,
            PaymentInitView,
            PayoutAccountView,
            WebhookAck,
            CreateBookingRequest,
            InitiatePaymentRequest,
            DisputeRequest,
            ResolveDisputeRequest,
            PayoutAccountRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Bookings", description = "Booking lifecycle (actor headers required)"),
        (name = "Payments", description = "Charge initialization and cash handling"),
        (name = "Admin", description = "Cash verification and dispute resolution"),
        (name = "Providers", description = "Payout account registration"),
        (name = "Webhooks", description = "Signed gateway callbacks"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Escrow Engine API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_openapi_json_serializable() {
        let json_str = ApiDoc::openapi().to_json().unwrap();
        assert!(json_str.contains("Escrow Engine API"));
    }

    #[test]
    fn test_endpoints_registered() {
        let paths = ApiDoc::openapi().paths;
        assert!(paths.paths.contains_key("/api/v1/health"));
        assert!(paths.paths.contains_key("/api/v1/bookings"));
        assert!(paths.paths.contains_key("/api/v1/bookings/{id}/confirm"));
        assert!(paths.paths.contains_key("/api/v1/admin/bookings/{id}/resolve-dispute"));
        assert!(paths.paths.contains_key("/webhooks/gateway"));
    }

    #[test]
    fn test_security_scheme_registered() {
        let components = ApiDoc::openapi().components.expect("should have components");
        assert!(components.security_schemes.contains_key("actor_headers"));
    }
}
