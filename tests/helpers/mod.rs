//! Test helper utilities for E2E testing

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from the submission endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
}

/// Mint a bearer token the way the credential service does.
pub fn client_token(secret: &str, client_id: i64) -> String {
    let claims = serde_json::json!({
        "sub": client_id.to_string(),
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign token")
}

/// Submit a job and return its id
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    path: &str,
    body: Value,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}{}", base_url, path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submission failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    job_type: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<Value, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/result/{}/{}", base_url, job_type, job_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let body = response.json::<Value>().await?;

        match body["status"].as_str() {
            Some("completed") | Some("failed") => return Ok(body),
            Some("created") | Some("processing") => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown job status: {:?}", other).into()),
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}
