use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter, RuntimeErr, SqlErr,
};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::{config::db_conn_capsule, orm::url_mapping};

pub const SHORT_CODE_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be {SHORT_CODE_LEN} characters long, got {actual}")]
    InvalidLength { actual: usize },
    #[error("short code may only contain lowercase hex digits, found {invalid_chars:?}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] when `code` is not exactly [`SHORT_CODE_LEN`] lowercase hex digits.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let actual = code.chars().count();
        if actual != SHORT_CODE_LEN {
            return Err(ShortCodeValidationError::InvalidLength { actual });
        }

        let invalid_chars: String = code
            .chars()
            .filter(|c| !matches!(c, '0'..='9' | 'a'..='f'))
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        Ok(Self(code))
    }

    /// Derives the code for `original_url` at probe index `attempt`.
    ///
    /// Attempt 0 is the code every URL gets unless another URL already holds it;
    /// later attempts key the hash with the attempt number.
    #[must_use]
    pub fn derive(original_url: &str, attempt: u64) -> Self {
        let mut salt = [0; blake3::KEY_LEN];
        salt[..8].copy_from_slice(&attempt.to_le_bytes());

        let hash = blake3::Hasher::new_keyed(&salt)
            .update(original_url.as_bytes())
            .finalize();
        Self(hash.to_hex().as_str()[..SHORT_CODE_LEN].to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A stored association between a [`ShortCode`] and the URL it was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMapping {
    pub short_code: ShortCode,
    pub original_url: String,
}

#[derive(Debug, Error)]
pub enum SaveUrlError {
    /// Another row already owns the short code; carries that row.
    #[error("short code is already mapped")]
    ItemAlreadyExists(UrlMapping),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn retrieve_url(&self, short_code: &ShortCode) -> anyhow::Result<Option<UrlMapping>>;

    /// Inserts a new mapping.
    /// A unique-constraint rejection is reported as [`SaveUrlError::ItemAlreadyExists`]
    /// holding whichever mapping won the code.
    async fn save_url(&self, mapping: UrlMapping) -> Result<UrlMapping, SaveUrlError>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn retrieve_url(&self, short_code: &ShortCode) -> anyhow::Result<Option<UrlMapping>> {
        url_mapping::Entity::find()
            .filter(url_mapping::Column::ShortCode.eq(short_code.as_str()))
            .one(&self.db)
            .await
            .context("Failed to query urls by short code")?
            .map(UrlMapping::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn save_url(&self, mapping: UrlMapping) -> Result<UrlMapping, SaveUrlError> {
        let to_insert = url_mapping::ActiveModel {
            id: NotSet,
            short_code: Set(mapping.short_code.clone().into_inner()),
            original_url: Set(mapping.original_url.clone()),
        };

        match to_insert.insert(&self.db).await {
            Ok(inserted) => UrlMapping::try_from(inserted).map_err(SaveUrlError::Internal),
            Err(db_err) if is_unique_violation(&db_err) => {
                warn!(short_code = mapping.short_code.as_str(), "Lost insert race");
                let existing = self
                    .retrieve_url(&mapping.short_code)
                    .await
                    .map_err(SaveUrlError::Internal)?
                    .ok_or_else(|| {
                        SaveUrlError::Internal(anyhow!(
                            "Row for short code {} vanished after unique violation",
                            mapping.short_code.as_str()
                        ))
                    })?;
                Err(SaveUrlError::ItemAlreadyExists(existing))
            }
            Err(db_err) => Err(SaveUrlError::Internal(
                anyhow::Error::new(db_err).context("Failed to insert url mapping"),
            )),
        }
    }
}

fn is_unique_violation(db_err: &DbErr) -> bool {
    if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    match db_err {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx_err)) => is_sqlx_unique_violation(sqlx_err),
        _ => false,
    }
}

fn is_sqlx_unique_violation(sqlx_err: &sea_orm::sqlx::Error) -> bool {
    match sqlx_err {
        sea_orm::sqlx::Error::Database(database_err) => database_err.is_unique_violation(),
        _ => false,
    }
}

impl TryFrom<url_mapping::Model> for UrlMapping {
    type Error = anyhow::Error;

    fn try_from(
        url_mapping::Model {
            short_code,
            original_url,
            ..
        }: url_mapping::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            short_code: ShortCode::new(short_code).context("Stored short code is malformed")?,
            original_url,
        })
    }
}
