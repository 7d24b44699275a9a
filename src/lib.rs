pub mod api;
pub mod db;
pub mod docs;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod ocr;
pub mod receipt;
pub mod s3_utils;
pub mod schedule;

use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;

use crate::notify::Notifier;
use crate::ocr::OcrClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub s3_client: S3Client,
    pub s3_bucket: String,
    pub s3_public_base_url: String,
    pub ocr: OcrClient,
    pub notifier: Notifier,
    pub gateway_webhook_key: String,
}
