use std::error::Error;
use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message
    pub fn with_detail<S: AsRef<str>>(s: S) -> ApiErrorResponse {
        ApiErrorResponse {
            category: None,
            detail: Some(s.as_ref().to_owned()),
            causes: Vec::new(),
        }
    }

    /// Creates an error response from an error, listing all of its sources as causes.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let detail = Some(error.to_string());

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(s) = source {
            let message = s.to_string();
            if !causes.contains(&message) {
                causes.push(message);
            }
            source = s.source();
        }

        Self {
            category: None,
            detail,
            causes,
        }
    }

    /// Attaches the stable failure category.
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_owned());
        self
    }

    /// Returns the failure category, if any.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.detail {
            write!(f, "{detail}")
        } else {
            write!(f, "no error details")
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn test_from_error_chain() {
        let error = Outer(std::io::Error::other("inner"));
        let response = ApiErrorResponse::from_error(&error).with_category("internal");

        insta::assert_json_snapshot!(response, @r###"
        {
          "category": "internal",
          "detail": "outer",
          "causes": [
            "inner"
          ]
        }
        "###);
    }

    #[test]
    fn test_with_detail() {
        let json = serde_json::to_string(&ApiErrorResponse::with_detail("boom")).unwrap();
        assert_eq!(json, r#"{"detail":"boom"}"#);
    }
}
