use std::fmt;

/// Status words the firmware uses in replies and ERROR frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    Ok,
    Fail,
    Exists,
    NotFound,
    Full,
    Locked,
    AuthRequired,
    /// Any token this host does not know.
    Other(String),
}

impl StatusToken {
    /// Parse a status payload. Trailing NULs and whitespace are ignored.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
        match text {
            "OK" => StatusToken::Ok,
            "FAIL" => StatusToken::Fail,
            "EXISTS" => StatusToken::Exists,
            "NOT_FOUND" => StatusToken::NotFound,
            "FULL" => StatusToken::Full,
            "LOCKED" => StatusToken::Locked,
            "AUTH_REQUIRED" => StatusToken::AuthRequired,
            other => StatusToken::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusToken::Ok => "OK",
            StatusToken::Fail => "FAIL",
            StatusToken::Exists => "EXISTS",
            StatusToken::NotFound => "NOT_FOUND",
            StatusToken::Full => "FULL",
            StatusToken::Locked => "LOCKED",
            StatusToken::AuthRequired => "AUTH_REQUIRED",
            StatusToken::Other(text) => text,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusToken::Ok)
    }
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
