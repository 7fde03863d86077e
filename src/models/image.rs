use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What an uploaded image depicts, fixed at upload time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageKind {
    Face,
    IdCard,
}

/// Metadata of an image uploaded by a client. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedImage {
    pub id: i64,
    /// Opaque reference handed back to the client on upload.
    pub reference: String,
    pub kind: ImageKind,
    pub client_id: i64,
    pub storage_path: String,
    pub size_kb: i64,
}
