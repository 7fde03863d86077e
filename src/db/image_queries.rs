use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::db::queries::JobStoreError;
use crate::models::image::{ImageKind, UploadedImage};

/// Read access to the metadata of uploaded images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Look up an image by the reference returned to the client on upload.
    async fn get_by_reference(&self, reference: &str) -> Result<Option<UploadedImage>, JobStoreError>;
}

/// PostgreSQL image metadata store.
#[derive(Clone)]
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    async fn get_by_reference(&self, reference: &str) -> Result<Option<UploadedImage>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, reference, kind, client_id, storage_path, size_kb
            FROM uploads
            WHERE reference = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let kind: String = r.try_get("kind")?;
            Ok(UploadedImage {
                id: r.try_get("id")?,
                reference: r.try_get("reference")?,
                kind: ImageKind::from_str(&kind)
                    .map_err(|_| JobStoreError::Decode(format!("unknown image kind '{kind}'")))?,
                client_id: r.try_get("client_id")?,
                storage_path: r.try_get("storage_path")?,
                size_kb: r.try_get("size_kb")?,
            })
        })
        .transpose()
    }
}
