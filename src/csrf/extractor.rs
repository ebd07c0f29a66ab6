use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use actix_web::{web, HttpRequest};
use anyhow::{anyhow, Result};

use crate::error::{AuthError, AuthResult};

/// Decoded urlencoded form body, when the caller has one
pub type FormFields = HashMap<String, String>;

pub type CustomExtractor =
    Arc<dyn Fn(&HttpRequest, Option<&FormFields>) -> AuthResult<String> + Send + Sync>;

/// Where the guard looks for the submitted token
#[derive(Clone)]
pub enum TokenExtractor {
    Header(String),
    /// Route path segment, e.g. `/forms/{csrf}`
    Param(String),
    Form(String),
    Query(String),
    Custom(CustomExtractor),
}

impl TokenExtractor {
    /// Parse a `source:name` lookup such as `header:X-Csrf-Token` or `query:csrf`
    ///
    /// # Errors
    ///
    /// Returns an error if the source is unknown or the name is empty
    pub fn from_lookup(lookup: &str) -> Result<Self> {
        let (source, name) = lookup
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid token lookup '{lookup}': expected source:name"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Invalid token lookup '{lookup}': empty name"));
        }

        match source.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header(name.to_string())),
            "param" => Ok(Self::Param(name.to_string())),
            "form" => Ok(Self::Form(name.to_string())),
            "query" => Ok(Self::Query(name.to_string())),
            other => Err(anyhow!("Unknown token lookup source: {other}")),
        }
    }

    /// Pull the candidate token out of the request
    ///
    /// # Errors
    ///
    /// Returns `MissingToken` if the configured location is absent or empty
    pub fn extract(&self, req: &HttpRequest, form: Option<&FormFields>) -> AuthResult<String> {
        let token = match self {
            Self::Header(name) => req
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Self::Param(name) => req.match_info().get(name).map(str::to_string),
            Self::Form(name) => form.and_then(|f| f.get(name)).cloned(),
            Self::Query(name) => web::Query::<HashMap<String, String>>::from_query(req.query_string())
                .ok()
                .and_then(|q| q.get(name).cloned()),
            Self::Custom(extract) => Some(extract(req, form)?),
        };

        match token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(AuthError::MissingToken),
        }
    }
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self::Header(super::HEADER_NAME.to_string())
    }
}

impl fmt::Debug for TokenExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(name) => write!(f, "header:{name}"),
            Self::Param(name) => write!(f, "param:{name}"),
            Self::Form(name) => write!(f, "form:{name}"),
            Self::Query(name) => write!(f, "query:{name}"),
            Self::Custom(_) => f.write_str("custom"),
        }
    }
}
