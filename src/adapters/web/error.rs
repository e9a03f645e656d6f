//! HTTP error responses for web adapter.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::domain::error::DashtraderError;

use super::templates::{BasePage, ErrorTemplate};

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

pub fn status_from_error(err: &DashtraderError) -> StatusCode {
    match err {
        DashtraderError::NoData { .. } | DashtraderError::NoPosition { .. } => {
            StatusCode::NOT_FOUND
        }
        DashtraderError::InsufficientFunds { .. } | DashtraderError::InvalidOrder { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DashtraderError::MarketData { .. } | DashtraderError::Broker { .. } => {
            StatusCode::BAD_GATEWAY
        }
        DashtraderError::ConfigParse { .. }
        | DashtraderError::ConfigMissing { .. }
        | DashtraderError::ConfigInvalid { .. }
        | DashtraderError::Database { .. }
        | DashtraderError::DatabaseQuery { .. }
        | DashtraderError::Template { .. }
        | DashtraderError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DashtraderError> for WebError {
    fn from(err: DashtraderError) -> Self {
        Self::new(status_from_error(&err), err.to_string())
    }
}

impl From<askama::Error> for WebError {
    fn from(err: askama::Error) -> Self {
        DashtraderError::Template {
            reason: err.to_string(),
        }
        .into()
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        }

        let content = ErrorTemplate {
            message: &self.message,
            status: self.status.as_u16(),
        }
        .render();
        let page = content.and_then(|content| {
            BasePage {
                title: "Error",
                content: &content,
                year: super::current_year(),
            }
            .render()
        });

        match page {
            Ok(html) => (self.status, Html(html)).into_response(),
            Err(_) => (self.status, self.message).into_response(),
        }
    }
}
