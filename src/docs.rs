use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::payments::submit_payment,
        crate::api::webhooks::payment_gateway_webhook
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::webhooks::GatewayWebhook,
            crate::models::DestinationAccount
        )
    ),
    tags(
        (name = "auth", description = "Authentication"),
        (name = "payments", description = "Payment submission and review"),
        (name = "webhooks", description = "Payment-gateway callbacks")
    )
)]
pub struct ApiDoc;
