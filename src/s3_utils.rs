// Helpers for receipt object keys and public S3-compatible URLs.

use uuid::Uuid;

pub fn build_public_url(base: &str, bucket: &str, key: &str) -> String {
    let trimmed = base.trim_end_matches('/');

    // Allow simple templating: https://host/{bucket}/{key} or https://bucket.host/{key}
    if trimmed.contains("{bucket}") || trimmed.contains("{key}") {
        return trimmed.replace("{bucket}", bucket).replace("{key}", key);
    }

    if trimmed.contains(bucket) {
        format!("{}/{}", trimmed, key)
    } else {
        format!("{}/{}/{}", trimmed, bucket, key)
    }
}

/// Object key for an uploaded receipt image, unique per submission.
pub fn receipt_key(user_id: i32, filename: &str) -> String {
    format!(
        "receipts/{}/{}_{}",
        user_id,
        Uuid::new_v4(),
        sanitize(filename)
    )
}

pub fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect()
}
