//! Cluster join token parsing

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while reading a join token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("unexpected token format: expected a single line, got {0} lines")]
    MultipleLines(usize),

    #[error("unexpected token format: {0}")]
    UnexpectedFormat(String),
}

/// Secure k3s tokens look like `K10<ca hash>::<user>:<password>`
fn secure_format() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^K10[0-9a-f]+::[A-Za-z0-9_-]+:\S+$").expect("valid regex"))
}

/// Shared secret workers use to join the cluster
#[derive(Clone, PartialEq, Eq)]
pub struct JoinToken(String);

impl JoinToken {
    /// Parse the contents of a k3s `node-token` file.
    ///
    /// Tolerates surrounding whitespace and a leading sudo prompt
    /// (`[sudo] password for user: `) left in captured output.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let lines: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let line = match lines.as_slice() {
            [] => return Err(TokenError::Empty),
            [line] => *line,
            many => return Err(TokenError::MultipleLines(many.len())),
        };

        let token = match line.strip_prefix("[sudo]") {
            Some(rest) => rest
                .split_once(": ")
                .map(|(_, token)| token.trim())
                .ok_or_else(|| TokenError::UnexpectedFormat("sudo prompt without token".to_string()))?,
            None => line,
        };

        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(TokenError::UnexpectedFormat("token contains whitespace".to_string()));
        }
        if token.starts_with("K10") && !secure_format().is_match(token) {
            return Err(TokenError::UnexpectedFormat(
                "malformed K10 token, expected K10<hash>::<user>:<secret>".to_string(),
            ));
        }

        Ok(Self(token.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JoinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JoinToken(***)")
    }
}
