// src/main.rs
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use dotenvy::dotenv;
use sqlx::PgPool;
use std::env;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use gias_backend::notify::Notifier;
use gias_backend::ocr::OcrClient;
use gias_backend::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let s3_bucket = env::var("S3_BUCKET").expect("S3_BUCKET required");
    let s3_endpoint = env::var("S3_ENDPOINT").ok();
    let s3_public_base_url = env::var("S3_PUBLIC_BASE_URL")
        .unwrap_or_else(|_| format!("https://{}.s3.amazonaws.com", s3_bucket));

    let gateway_webhook_key = env::var("GATEWAY_WEBHOOK_KEY").unwrap_or_default();

    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

    // Allow custom S3-compatible endpoints (e.g., MinIO)
    if let Some(endpoint) = s3_endpoint {
        s3_config_builder = s3_config_builder
            .endpoint_url(endpoint)
            .force_path_style(true);
    }

    let s3_client = S3Client::from_conf(s3_config_builder.build());

    let state = web::Data::new(AppState {
        pool: pool.clone(),
        s3_client,
        s3_bucket: s3_bucket.clone(),
        s3_public_base_url: s3_public_base_url.clone(),
        ocr: OcrClient::from_env(),
        notifier: Notifier::from_env(pool),
        gateway_webhook_key,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // public auth routes
            .service(api::auth::register)
            .service(api::auth::login)
            // voice-assistant account linking (public)
            .service(api::oauth::authorize)
            .service(api::oauth::token)
            .service(api::oauth::validate_voice_pin)
            // protected routes
            .service(
                web::scope("/api")
                    .wrap(api::auth::AuthMiddleware)
                    .service(api::cycles::list_cycles)
                    .service(api::cycles::my_cycles)
                    .service(api::cycles::join_cycle)
                    .service(api::cycles::reorder_participants)
                    .service(api::cycles::define_start_date)
                    .service(api::cycles::start_cycle)
                    .service(api::cycles::update_turns)
                    .service(api::cycles::get_cycle)
                    .service(api::cycles::delete_cycle)
                    .service(api::payments::submit_payment)
                    .service(api::payments::my_payments)
                    .service(api::payments::next_due)
                    .service(api::payments::dashboard)
                    .service(api::payments::list_payments)
                    .service(api::payments::approve_payment)
                    .service(api::payments::reject_payment)
                    .service(api::accounts::get_destination_account)
                    .service(api::accounts::put_destination_account)
                    .service(api::notifications::my_notifications)
                    .service(api::notifications::send_reminder)
                    .service(api::oauth::generate_voice_pin),
            )
            // webhooks (public)
            .service(api::webhooks::payment_gateway_webhook)
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
