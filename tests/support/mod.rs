use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

use gias_backend::notify::Notifier;
use gias_backend::ocr::OcrClient;
use gias_backend::AppState;

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Provisions a scratch database from TEST_DATABASE_URL. Returns None when
/// the variable is unset so the suite can pass without a Postgres around.
pub async fn try_init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping integration test");
        return None;
    };

    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb {
        pool,
        _guard: guard,
    })
}

pub async fn build_state(pool: PgPool, gateway_webhook_key: &str) -> AppState {
    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let s3_client = S3Client::from_conf(aws_sdk_s3::config::Builder::from(&aws_config).build());

    AppState {
        pool: pool.clone(),
        s3_client,
        s3_bucket: "test-bucket".to_string(),
        s3_public_base_url: "http://localhost".to_string(),
        ocr: OcrClient::new(String::new(), String::new()),
        notifier: Notifier::from_env(pool),
        gateway_webhook_key: gateway_webhook_key.to_string(),
    }
}

/// Inserts a user and returns its id.
pub async fn insert_user(pool: &PgPool, suffix: &str) -> i32 {
    use sqlx::Row;
    sqlx::query(
        r#"INSERT INTO users (name, email, password_hash)
           VALUES ($1, $2, 'test-hash')
           RETURNING id"#,
    )
    .bind(format!("user_{suffix}"))
    .bind(format!("user_{suffix}@test.mx"))
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

/// Inserts a weekly cycle with a fixed start date and returns its id.
pub async fn insert_cycle(pool: &PgPool, amount: f64, start_date: &str) -> i32 {
    use sqlx::Row;
    sqlx::query(
        r#"INSERT INTO cycles (amount, cadence, start_date, total_turns)
           VALUES ($1, 'weekly', $2::date, 10)
           RETURNING id"#,
    )
    .bind(amount)
    .bind(start_date)
    .fetch_one(pool)
    .await
    .expect("insert cycle")
    .get("id")
}

pub async fn insert_participant(pool: &PgPool, cycle_id: i32, user_id: i32, turn_order: i32) {
    sqlx::query(
        r#"INSERT INTO participants (cycle_id, user_id, turn_order)
           VALUES ($1, $2, $3)"#,
    )
    .bind(cycle_id)
    .bind(user_id)
    .bind(turn_order)
    .execute(pool)
    .await
    .expect("insert participant");
}

pub async fn insert_destination_account(pool: &PgPool) {
    sqlx::query(
        r#"INSERT INTO destination_accounts (titleholder, account_number, card_number, bank)
           VALUES ('Maria Lopez Garcia', '012345678901', '4152313112345678', 'BBVA')"#,
    )
    .execute(pool)
    .await
    .expect("insert destination account");
}

/// Regenerates the schedule for a cycle the tests just assembled.
pub async fn generate_schedule(pool: &PgPool, cycle_id: i32) {
    let cycle = gias_backend::db::get_cycle(pool, cycle_id)
        .await
        .expect("get cycle")
        .expect("cycle exists");
    gias_backend::db::regenerate_schedule(pool, &cycle)
        .await
        .expect("regenerate schedule");
}
