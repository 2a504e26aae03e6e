//! Identity extracted from the connection string

use percent_encoding::percent_decode_str;
use slspg_core::{Result, SlsError};
use url::{ParseError, Url};

/// User and database the supervisor connects as, plus the source URL used
/// for reconnects.
///
/// The reaper scopes its queries to this `(user, database)` pair so that it
/// only ever terminates the caller's own sessions.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionCredential {
    pub user: String,
    pub database: String,
    pub host: String,
    source_url: String,
}

impl ConnectionCredential {
    /// Parse a connection string.
    ///
    /// User and database are percent-decoded, matching the names the server
    /// sees at login. A string that is not a URL at all yields empty identity fields; so
    /// does a URL without user or path (`https://example.com`). A string
    /// that looks like a URL but is malformed (bad port, bad host) is
    /// rejected.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let parsed = match Url::parse(connection_string) {
            Ok(url) => url,
            Err(ParseError::RelativeUrlWithoutBase) => {
                tracing::debug!("connection string is not a URL, identity left empty");
                return Ok(Self {
                    source_url: connection_string.to_string(),
                    ..Self::default()
                });
            }
            Err(e) => {
                return Err(SlsError::Validation(format!(
                    "invalid connection string: {}",
                    e
                )));
            }
        };

        Ok(Self {
            user: decode_component("user", parsed.username())?,
            database: decode_component("database", &parsed.path().replacen('/', "", 2))?,
            host: parsed.host_str().unwrap_or_default().to_string(),
            source_url: connection_string.to_string(),
        })
    }

    /// The original connection string, password included
    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

fn decode_component(name: &str, raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| {
            SlsError::Validation(format!("invalid connection string: {} is not UTF-8: {}", name, e))
        })
}

impl std::fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("source_url", &"<redacted>")
            .finish()
    }
}
