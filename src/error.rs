use nostr_sdk::nips::nip19;
use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Nip19(nip19::Error),
    Json(serde_json::Error),
    /// The bech32 entity decoded fine but does not name something we can thread
    NotThreadable,
    Generic(String),
}

impl From<nip19::Error> for Error {
    fn from(err: nip19::Error) -> Self {
        Error::Nip19(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Generic(err)
    }
}

// Implementing `Display`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Nip19(e) => write!(f, "Nip19 error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::NotThreadable => write!(f, "entity cannot be threaded"),
            Error::Generic(e) => write!(f, "{}", e),
        }
    }
}

// Implementing `StdError`
impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Nip19(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::NotThreadable => None,
            Error::Generic(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_generic() {
        let err = Error::from("relay exploded".to_string());
        assert_eq!(err.to_string(), "relay exploded");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_json_error_has_source() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("JSON error"));
        assert!(err.source().is_some());
    }
}
