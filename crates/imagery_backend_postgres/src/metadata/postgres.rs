use chrono::{DateTime, Utc};
use sea_query::{
    Alias, Expr, Func, OnConflict, Order, PostgresQueryBuilder, Query, SelectStatement, Value,
};
use sea_query_binder::SqlxBinder;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::types::Uuid;
use sqlx::{PgConnection, Pool, Row, Transaction};

use imagery_core::{ContentHash, ImageObject, OwnerRef, UploadSession};
use imagery_objectstore::Chunk;

use super::super::errors::{Error, Result};
use super::types::{ImageRow, Images, Part, SessionRow, UploadParts, UploadSessions};

fn default_max_connections() -> u32 {
    10
}

fn default_run_migrations() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct PostgresConfig {
    connection_string: String,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
    #[serde(default = "default_run_migrations")]
    run_migrations: bool,
}

impl PostgresConfig {
    pub async fn new_metadata(&self) -> Result<PostgresMetadataPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.connection_string)
            .await?;
        if self.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("applied metadata migrations");
        }
        Ok(PostgresMetadataPool { pool })
    }
}

#[derive(Clone)]
pub struct PostgresMetadataPool {
    pool: Pool<Postgres>,
}

impl PostgresMetadataPool {
    pub async fn get_conn(&self) -> Result<PostgresMetadataConn> {
        Ok(PostgresMetadataConn {
            conn: self.pool.acquire().await?,
        })
    }

    pub async fn get_tx(&self) -> Result<PostgresMetadataTx<'static>> {
        Ok(PostgresMetadataTx {
            tx: Some(self.pool.begin().await?),
        })
    }
}

pub struct PostgresMetadataConn {
    conn: PoolConnection<Postgres>,
}

// A collection of queries that are only require a `&mut PgConnection` and don't care whether it
// came from a transaction or a pool connection.
struct Queries {}

impl Queries {
    pub async fn insert_session(executor: &mut PgConnection, session: &UploadSession) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(UploadSessions::Table)
            .columns(UploadSessions::all())
            .values([
                Value::from(session.id).into(),
                Value::from(session.owner.kind.as_str()).into(),
                Value::from(session.owner.id.as_str()).into(),
                Value::from(session.protocol.as_str()).into(),
                Value::from(session.status.as_str()).into(),
                Value::from(session.content_type.as_str()).into(),
                Value::from(session.content_hash.as_ref().map(|h| h.to_string())).into(),
                Value::from(session.current_part_index).into(),
                Value::from(session.part_number).into(),
                Value::from(session.buffered.clone()).into(),
                Value::from(session.received_bytes).into(),
                Value::from(session.upload_length).into(),
                Value::from(session.upload_id.as_str()).into(),
                Value::from(session.storage_key.as_str()).into(),
                Value::from(session.assembled).into(),
                Value::from(session.total_parts).into(),
                Value::from(session.image_id).into(),
                Value::from(session.version).into(),
                Value::from(session.created_at).into(),
                Value::from(session.updated_at).into(),
            ])?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn get_session(
        executor: &mut PgConnection,
        id: &Uuid,
    ) -> Result<Option<UploadSession>> {
        let (sql, values) = Query::select()
            .from(UploadSessions::Table)
            .columns(UploadSessions::all())
            .and_where(Expr::col(UploadSessions::Id).eq(*id))
            .build_sqlx(PostgresQueryBuilder);

        let row = sqlx::query_as_with::<_, SessionRow, _>(&sql, values)
            .fetch_optional(&mut *executor)
            .await?;
        match row {
            Some(SessionRow(mut session)) => {
                session.parts = Queries::get_parts(executor, id).await?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn find_active_session(
        executor: &mut PgConnection,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<UploadSession>> {
        let (sql, values) = Query::select()
            .from(UploadSessions::Table)
            .column(UploadSessions::Id)
            .and_where(Expr::col(UploadSessions::OwnerKind).eq(owner.kind.as_str()))
            .and_where(Expr::col(UploadSessions::OwnerId).eq(owner.id.as_str()))
            .and_where(Expr::col(UploadSessions::ContentHash).eq(hash.as_str()))
            .and_where(Expr::col(UploadSessions::Status).is_in(["pending", "in_progress"]))
            .build_sqlx(PostgresQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *executor)
            .await?;
        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                Queries::get_session(executor, &id).await
            }
            None => Ok(None),
        }
    }

    /// Write every mutable field of `session` if the stored version still matches. Returns the
    /// number of rows written.
    pub async fn update_session(
        executor: &mut PgConnection,
        session: &UploadSession,
        updated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let (sql, values) = Query::update()
            .table(UploadSessions::Table)
            .value(UploadSessions::Status, session.status.as_str())
            .value(UploadSessions::CurrentPartIndex, session.current_part_index)
            .value(UploadSessions::PartNumber, session.part_number)
            .value(UploadSessions::Buffered, session.buffered.clone())
            .value(UploadSessions::ReceivedBytes, session.received_bytes)
            .value(UploadSessions::Assembled, session.assembled)
            .value(UploadSessions::TotalParts, session.total_parts)
            .value(UploadSessions::ImageId, session.image_id)
            .value(UploadSessions::Version, session.version + 1)
            .value(UploadSessions::UpdatedAt, updated_at)
            .and_where(Expr::col(UploadSessions::Id).eq(session.id))
            .and_where(Expr::col(UploadSessions::Version).eq(session.version))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn session_exists(executor: &mut PgConnection, id: &Uuid) -> Result<bool> {
        let (sql, values) = Query::select()
            .expr_as(
                Expr::exists(
                    Query::select()
                        .from(UploadSessions::Table)
                        .column(UploadSessions::Id)
                        .and_where(Expr::col(UploadSessions::Id).eq(*id))
                        .to_owned(),
                ),
                Alias::new("exists"),
            )
            .build_sqlx(PostgresQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;

        Ok(row.try_get("exists")?)
    }

    pub async fn get_parts(executor: &mut PgConnection, session_id: &Uuid) -> Result<Vec<Chunk>> {
        let (sql, values) = Query::select()
            .from(UploadParts::Table)
            .columns([UploadParts::ETag, UploadParts::PartNumber])
            .and_where(Expr::col(UploadParts::UploadSessionId).eq(*session_id))
            .order_by(UploadParts::PartNumber, Order::Asc)
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, Part, _>(&sql, values)
            .fetch_all(executor)
            .await?
            .into_iter()
            .map(Chunk::from)
            .collect())
    }

    /// Make `upload_parts` hold exactly `session.parts`.
    pub async fn sync_parts(executor: &mut PgConnection, session: &UploadSession) -> Result<()> {
        let mut builder = Query::delete();
        builder
            .from_table(UploadParts::Table)
            .and_where(Expr::col(UploadParts::UploadSessionId).eq(session.id));
        if !session.parts.is_empty() {
            let kept = session.parts.iter().map(|c| c.chunk_number);
            builder.and_where(Expr::col(UploadParts::PartNumber).is_not_in(kept));
        }
        let (sql, values) = builder.build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *executor).await?;

        if session.parts.is_empty() {
            return Ok(());
        }

        let mut builder = Query::insert();
        builder.into_table(UploadParts::Table).columns([
            UploadParts::UploadSessionId,
            UploadParts::PartNumber,
            UploadParts::ETag,
        ]);
        for part in session.parts.iter().map(Part::from) {
            builder.values([
                Value::from(session.id).into(),
                Value::from(part.part_number).into(),
                Value::from(part.e_tag).into(),
            ])?;
        }
        builder.on_conflict(
            OnConflict::columns([UploadParts::UploadSessionId, UploadParts::PartNumber])
                .update_columns([UploadParts::ETag])
                .to_owned(),
        );

        let (sql, values) = builder.build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn get_image(executor: &mut PgConnection, id: &Uuid) -> Result<Option<ImageObject>> {
        let (sql, values) = Query::select()
            .from(Images::Table)
            .columns(Images::all())
            .and_where(Expr::col(Images::Id).eq(*id))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, ImageRow, _>(&sql, values)
            .fetch_optional(executor)
            .await?
            .map(|ImageRow(image)| image))
    }

    pub async fn find_image_by_hash(
        executor: &mut PgConnection,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<ImageObject>> {
        let (sql, values) = Query::select()
            .from(Images::Table)
            .columns(Images::all())
            .and_where(Expr::col(Images::OwnerKind).eq(owner.kind.as_str()))
            .and_where(Expr::col(Images::OwnerId).eq(owner.id.as_str()))
            .and_where(Expr::col(Images::ContentHash).eq(hash.as_str()))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, ImageRow, _>(&sql, values)
            .fetch_optional(executor)
            .await?
            .map(|ImageRow(image)| image))
    }

    pub async fn insert_image(executor: &mut PgConnection, image: &ImageObject) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(Images::Table)
            .columns(Images::all())
            .values([
                Value::from(image.id).into(),
                Value::from(image.owner.kind.as_str()).into(),
                Value::from(image.owner.id.as_str()).into(),
                Value::from(image.storage_key.as_str()).into(),
                Value::from(image.content_hash.as_str()).into(),
                Value::from(image.is_primary).into(),
                Value::from(image.created_at).into(),
            ])?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn repoint_image(
        executor: &mut PgConnection,
        id: &Uuid,
        storage_key: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::update()
            .table(Images::Table)
            .value(Images::StorageKey, storage_key)
            .and_where(Expr::col(Images::Id).eq(*id))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    /// Mark image `id` primary unless its owner already has a primary image.
    ///
    /// Concurrent links for one owner serialize on a transaction-scoped advisory lock, so the
    /// existence check below always sees a primary committed by the other transaction instead of
    /// both passing it and tripping `images_one_primary`.
    pub async fn claim_primary(
        executor: &mut PgConnection,
        owner: &OwnerRef,
        id: &Uuid,
    ) -> Result<bool> {
        let (sql, values) = primary_lock(owner).build_sqlx(PostgresQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *executor).await?;

        let (sql, values) = Query::update()
            .table(Images::Table)
            .value(Images::IsPrimary, true)
            .and_where(Expr::col(Images::Id).eq(*id))
            .and_where(
                Expr::exists(
                    Query::select()
                        .from(Images::Table)
                        .column(Images::Id)
                        .and_where(Expr::col(Images::OwnerKind).eq(owner.kind.as_str()))
                        .and_where(Expr::col(Images::OwnerId).eq(owner.id.as_str()))
                        .and_where(Expr::col(Images::IsPrimary).eq(true))
                        .to_owned(),
                )
                .not(),
            )
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected()
            > 0)
    }

    pub async fn resource_exists(
        executor: &mut PgConnection,
        table: &str,
        id_column: &str,
        id: &str,
    ) -> Result<bool> {
        let (sql, values) = Query::select()
            .expr_as(
                Expr::exists(
                    Query::select()
                        .from(Alias::new(table))
                        .expr(Expr::val(1))
                        .and_where(
                            Expr::expr(
                                Expr::col(Alias::new(id_column))
                                    .cast_as(Alias::new("text")),
                            )
                            .eq(id),
                        )
                        .to_owned(),
                ),
                Alias::new("exists"),
            )
            .build_sqlx(PostgresQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;

        Ok(row.try_get("exists")?)
    }
}

// PoolConnection<Postgres>-based metadata queries.
impl PostgresMetadataConn {
    pub async fn get_session(&mut self, id: &Uuid) -> Result<Option<UploadSession>> {
        Queries::get_session(&mut *self.conn, id).await
    }

    pub async fn find_active_session(
        &mut self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<UploadSession>> {
        Queries::find_active_session(&mut *self.conn, owner, hash).await
    }

    pub async fn get_image(&mut self, id: &Uuid) -> Result<Option<ImageObject>> {
        Queries::get_image(&mut *self.conn, id).await
    }

    pub async fn find_image_by_hash(
        &mut self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<ImageObject>> {
        Queries::find_image_by_hash(&mut *self.conn, owner, hash).await
    }

    pub async fn resource_exists(
        &mut self,
        table: &str,
        id_column: &str,
        id: &str,
    ) -> Result<bool> {
        Queries::resource_exists(&mut *self.conn, table, id_column, id).await
    }
}

// Wrapper around a Postgres transaction with the ability to commit transactions. Dropping it
// uncommitted rolls back.
pub struct PostgresMetadataTx<'a> {
    tx: Option<Transaction<'a, Postgres>>,
}

impl<'a> PostgresMetadataTx<'a> {
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(t) = self.tx.take() {
            Ok(t.commit().await?)
        } else {
            Ok(())
        }
    }

    pub async fn insert_session(&mut self, session: &UploadSession) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::insert_session(&mut **tx, session).await
    }

    /// Persist `session` under optimistic concurrency, parts included.
    pub async fn update_session(
        &mut self,
        session: &UploadSession,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        if Queries::update_session(&mut **tx, session, updated_at).await? == 0 {
            return if Queries::session_exists(&mut **tx, &session.id).await? {
                Err(Error::StaleSession(session.id))
            } else {
                Err(Error::MissingSession(session.id))
            };
        }
        Queries::sync_parts(&mut **tx, session).await
    }

    pub async fn get_image(&mut self, id: &Uuid) -> Result<Option<ImageObject>> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::get_image(&mut **tx, id).await
    }

    pub async fn insert_image(&mut self, image: &ImageObject) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::insert_image(&mut **tx, image).await
    }

    pub async fn repoint_image(&mut self, id: &Uuid, storage_key: &str) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        match Queries::repoint_image(&mut **tx, id, storage_key).await? {
            0 => Err(Error::MissingImage(*id)),
            _ => Ok(()),
        }
    }

    pub async fn claim_primary(&mut self, owner: &OwnerRef, id: &Uuid) -> Result<bool> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::claim_primary(&mut **tx, owner, id).await
    }
}

/// `SELECT pg_advisory_xact_lock(..)` keyed on the owner, released when the transaction ends.
fn primary_lock(owner: &OwnerRef) -> SelectStatement {
    let key = format!("images/primary/{}/{}", owner.kind, owner.id);
    Query::select()
        .expr(
            Func::cust(Alias::new("pg_advisory_xact_lock")).arg(
                Func::cust(Alias::new("hashtextextended"))
                    .arg(Expr::val(key))
                    .arg(Expr::val(0i64)),
            ),
        )
        .to_owned()
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::user(OwnerRef::new("users", "42"), "'images/primary/users/42'")]
    #[case::product(OwnerRef::new("products", "42"), "'images/primary/products/42'")]
    fn primary_claims_lock_per_owner(#[case] owner: OwnerRef, #[case] key: &str) {
        let sql = primary_lock(&owner).to_string(PostgresQueryBuilder);
        assert!(sql.starts_with("SELECT pg_advisory_xact_lock(hashtextextended("), "{sql}");
        assert!(sql.contains(key), "{sql}");
    }
}
