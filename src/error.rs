//! Error types for the knowledge graph service

use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Conversation {0} not found")]
    SessionNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Graph query error: {0}")]
    Graph(String),

    #[error("Generation backend error: {0}")]
    Generation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status used when the error reaches the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<neo4rs::Error> for Error {
    fn from(err: neo4rs::Error) -> Self {
        Error::Graph(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_session_not_found() {
        let err = Error::SessionNotFound("abc-123".to_string());
        assert_eq!(err.to_string(), "Conversation abc-123 not found");
    }

    #[test]
    fn test_payload_too_large_maps_to_413() {
        let err = Error::PayloadTooLarge(1024);
        assert_eq!(err.to_string(), "Request body exceeds 1024 bytes");
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_error_display_invalid_argument() {
        let err = Error::InvalidArgument("query must not be empty".to_string());
        assert!(err.to_string().contains("Invalid argument"));
        assert!(err.to_string().contains("query must not be empty"));
    }

    #[test]
    fn test_error_display_graph() {
        let err = Error::Graph("index not found".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Graph query error"));
        assert!(msg.contains("index not found"));
    }

    #[test]
    fn test_error_display_generation() {
        let err = Error::Generation("quota exceeded".to_string());
        assert!(err.to_string().contains("Generation backend error"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{ not: [a list").unwrap_err();
        let err: Error = yaml_err.into();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::InvalidArgument("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Serialization("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::SessionNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Graph("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Connection("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_all_variants_debug() {
        let variants: Vec<Error> = vec![
            Error::SessionNotFound("session".to_string()),
            Error::InvalidArgument("arg".to_string()),
            Error::Graph("graph".to_string()),
            Error::Generation("gen".to_string()),
            Error::Connection("conn".to_string()),
            Error::Config("cfg".to_string()),
            Error::Serialization("serial".to_string()),
        ];

        for err in variants {
            let debug_str = format!("{:?}", err);
            assert!(!debug_str.is_empty());
        }
    }
}
