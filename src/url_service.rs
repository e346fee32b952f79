use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::url_repo::{SaveUrlError, ShortCode, UrlMapping, UrlRepository, url_repository_capsule};

/// Number of derived codes tried for one URL before giving up.
pub const PROBE_ATTEMPTS: u64 = 3;

pub fn url_mapping_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlMappingService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    Arc::new(UrlMappingServiceImpl { url_repo })
}

#[async_trait]
pub trait UrlMappingService: Send + Sync {
    /// Returns the mapping for `original_url`, creating it on first submission.
    async fn shorten(&self, original_url: &str) -> Result<UrlMapping, ShortenError>;

    /// Returns the original URL stored under `short_code`.
    async fn resolve(&self, short_code: &str) -> Result<String, ResolveError>;
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("every derived short code is held by a different URL")]
    CodesExhausted,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("database error: {0}")]
    Db(anyhow::Error),
}

struct UrlMappingServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
}

#[async_trait]
impl UrlMappingService for UrlMappingServiceImpl {
    #[instrument(skip(self))]
    async fn shorten(&self, original_url: &str) -> Result<UrlMapping, ShortenError> {
        for attempt in 0..PROBE_ATTEMPTS {
            let short_code = ShortCode::derive(original_url, attempt);

            match self.url_repo.retrieve_url(&short_code).await {
                Ok(Some(existing)) if existing.original_url == original_url => return Ok(existing),
                Ok(Some(existing)) => {
                    warn!(
                        attempt,
                        short_code = short_code.as_str(),
                        taken_by = %existing.original_url,
                        "Short code collision"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    return Err(ShortenError::Internal(
                        err.context("Failed to look up derived short code"),
                    ));
                }
            }

            let to_save = UrlMapping {
                short_code: short_code.clone(),
                original_url: original_url.to_owned(),
            };
            match self.url_repo.save_url(to_save).await {
                Ok(saved) => return Ok(saved),
                // NOTE: a concurrent request for the same URL got there first
                Err(SaveUrlError::ItemAlreadyExists(existing))
                    if existing.original_url == original_url =>
                {
                    return Ok(existing);
                }
                Err(SaveUrlError::ItemAlreadyExists(existing)) => {
                    warn!(
                        attempt,
                        short_code = short_code.as_str(),
                        taken_by = %existing.original_url,
                        "Short code collision while inserting"
                    );
                }
                Err(SaveUrlError::Internal(err)) => {
                    return Err(ShortenError::Internal(
                        err.context("Failed to save url mapping"),
                    ));
                }
            }
        }

        error!(original_url, "Exhausted short code attempts");
        Err(ShortenError::CodesExhausted)
    }

    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Result<String, ResolveError> {
        // NOTE: nothing malformed was ever issued, so skip the round trip
        let Ok(short_code) = ShortCode::new(short_code.to_owned()) else {
            return Err(ResolveError::NotFound);
        };

        match self.url_repo.retrieve_url(&short_code).await {
            Ok(Some(mapping)) => Ok(mapping.original_url),
            Ok(None) => Err(ResolveError::NotFound),
            Err(err) => Err(ResolveError::Db(
                err.context(format!("Failed to resolve {}", short_code.as_str())),
            )),
        }
    }
}

impl UrlMapping {
    /// Full public link for this mapping under `base_url`.
    #[must_use]
    pub fn shortened_url(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.short_code.as_str()
        )
    }
}
