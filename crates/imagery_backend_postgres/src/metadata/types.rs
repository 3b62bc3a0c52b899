use chrono::{DateTime, Utc};
use sea_query::Iden;
use sqlx::postgres::PgRow;
use sqlx::Row;

use imagery_core::{
    ContentHash, ImageContentType, ImageObject, OwnerRef, UploadProtocol, UploadSession,
    UploadStatus,
};
use imagery_objectstore::Chunk as ObjectStoreChunk;

fn column_decode<T, E: std::fmt::Display>(
    column: &str,
    value: std::result::Result<T, E>,
) -> sqlx::Result<T> {
    value.map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("{}", e).into(),
    })
}

/// An `upload_sessions` row. Parts live in `upload_parts` and are attached separately.
pub struct SessionRow(pub UploadSession);

impl sqlx::FromRow<'_, PgRow> for SessionRow {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        let protocol: String = row.try_get("protocol")?;
        let status: String = row.try_get("status")?;
        let content_type: String = row.try_get("content_type")?;
        let content_hash: Option<String> = row.try_get("content_hash")?;

        Ok(Self(UploadSession {
            id: row.try_get("id")?,
            owner: OwnerRef::new(
                row.try_get::<String, _>("owner_kind")?,
                row.try_get::<String, _>("owner_id")?,
            ),
            protocol: column_decode("protocol", UploadProtocol::try_from(protocol.as_str()))?,
            status: column_decode("status", UploadStatus::try_from(status.as_str()))?,
            content_type: column_decode(
                "content_type",
                ImageContentType::try_from(content_type.as_str()),
            )?,
            content_hash: content_hash
                .map(|h| column_decode("content_hash", ContentHash::try_from(h.as_str())))
                .transpose()?,
            current_part_index: row.try_get("current_part_index")?,
            part_number: row.try_get("part_number")?,
            parts: Vec::new(),
            buffered: row.try_get("buffered")?,
            received_bytes: row.try_get("received_bytes")?,
            upload_length: row.try_get("upload_length")?,
            upload_id: row.try_get("upload_id")?,
            storage_key: row.try_get("storage_key")?,
            assembled: row.try_get("assembled")?,
            total_parts: row.try_get("total_parts")?,
            image_id: row.try_get("image_id")?,
            version: row.try_get("version")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        }))
    }
}

#[derive(Iden)]
pub enum UploadSessions {
    Table,
    Id,
    OwnerKind,
    OwnerId,
    Protocol,
    Status,
    ContentType,
    ContentHash,
    CurrentPartIndex,
    PartNumber,
    Buffered,
    ReceivedBytes,
    UploadLength,
    UploadId,
    StorageKey,
    Assembled,
    TotalParts,
    ImageId,
    Version,
    CreatedAt,
    UpdatedAt,
}

impl UploadSessions {
    pub fn all() -> [UploadSessions; 20] {
        [
            UploadSessions::Id,
            UploadSessions::OwnerKind,
            UploadSessions::OwnerId,
            UploadSessions::Protocol,
            UploadSessions::Status,
            UploadSessions::ContentType,
            UploadSessions::ContentHash,
            UploadSessions::CurrentPartIndex,
            UploadSessions::PartNumber,
            UploadSessions::Buffered,
            UploadSessions::ReceivedBytes,
            UploadSessions::UploadLength,
            UploadSessions::UploadId,
            UploadSessions::StorageKey,
            UploadSessions::Assembled,
            UploadSessions::TotalParts,
            UploadSessions::ImageId,
            UploadSessions::Version,
            UploadSessions::CreatedAt,
            UploadSessions::UpdatedAt,
        ]
    }
}

#[derive(Default, sqlx::FromRow)]
pub struct Part {
    pub e_tag: Option<String>,
    pub part_number: i32,
}

impl From<&ObjectStoreChunk> for Part {
    fn from(chunk: &ObjectStoreChunk) -> Self {
        Self {
            e_tag: chunk.e_tag.clone(),
            part_number: chunk.chunk_number,
        }
    }
}

impl From<Part> for ObjectStoreChunk {
    fn from(Part { e_tag, part_number }: Part) -> Self {
        Self {
            e_tag,
            chunk_number: part_number,
        }
    }
}

#[derive(Iden)]
pub enum UploadParts {
    Table,
    UploadSessionId,
    PartNumber,
    ETag,
}

pub struct ImageRow(pub ImageObject);

impl sqlx::FromRow<'_, PgRow> for ImageRow {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        let content_hash: String = row.try_get("content_hash")?;
        Ok(Self(ImageObject {
            id: row.try_get("id")?,
            owner: OwnerRef::new(
                row.try_get::<String, _>("owner_kind")?,
                row.try_get::<String, _>("owner_id")?,
            ),
            storage_key: row.try_get("storage_key")?,
            content_hash: column_decode(
                "content_hash",
                ContentHash::try_from(content_hash.as_str()),
            )?,
            is_primary: row.try_get("is_primary")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        }))
    }
}

#[derive(Iden)]
pub enum Images {
    Table,
    Id,
    OwnerKind,
    OwnerId,
    StorageKey,
    ContentHash,
    IsPrimary,
    CreatedAt,
}

impl Images {
    pub fn all() -> [Images; 7] {
        [
            Images::Id,
            Images::OwnerKind,
            Images::OwnerId,
            Images::StorageKey,
            Images::ContentHash,
            Images::IsPrimary,
            Images::CreatedAt,
        ]
    }
}
