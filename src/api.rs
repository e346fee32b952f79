use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// A URL string accepted by `POST /shorten`.
///
/// Validated on deserialization so malformed input never reaches the service;
/// the original text is kept verbatim rather than in [`Url`]'s normalized form.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct HttpUrl(String);

#[derive(Debug, Error)]
pub enum HttpUrlError {
    #[error("invalid URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("URL scheme must be http or https, got {0}")]
    UnsupportedScheme(String),
}

impl TryFrom<String> for HttpUrl {
    type Error = HttpUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Url::parse(&value)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpUrlError::UnsupportedScheme(parsed.scheme().to_owned()));
        }
        Ok(Self(value))
    }
}

impl HttpUrl {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Deserialize)]
pub struct ShortenPayload {
    pub url: HttpUrl,
}

#[derive(Debug, Serialize)]
pub struct ShortenedUrl {
    pub shortened_url: String,
}

#[derive(Debug, Serialize)]
pub struct OriginalUrl {
    pub original_url: String,
}

#[derive(Debug, Serialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}
