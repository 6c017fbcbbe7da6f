// Broker Connection Provider
//
// Decides from environment state whether a broker is configured. Pure:
// no network I/O, never fails. Absence selects inline mode.

use std::fmt;

pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Redis endpoint assembled from REDIS_URL or REDIS_HOST/PORT/...
#[derive(Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub url: String,
}

impl RedisEndpoint {
    /// Build a URL from discrete parts (`rediss://` when TLS is on)
    ///
    /// Credentials are percent-encoded, so reserved characters in a
    /// password cannot leak into the host or database part.
    pub fn from_parts(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        tls: bool,
    ) -> Self {
        let scheme = if tls { "rediss" } else { "redis" };
        let user = username.map(urlencoding::encode);
        let pass = password.map(urlencoding::encode);
        let auth = match (user, pass) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (None, Some(pass)) => format!(":{pass}@"),
            (Some(user), None) => format!("{user}@"),
            (None, None) => String::new(),
        };
        Self {
            url: format!("{scheme}://{auth}{host}:{port}"),
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.url.starts_with("rediss://")
    }
}

// Credentials stay out of logs
impl fmt::Debug for RedisEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEndpoint")
            .field("url", &redact(&self.url))
            .finish()
    }
}

fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Resolved broker descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerConnection {
    Redis(RedisEndpoint),
    /// Single-host broker stored in SQLite
    Sqlite { url: String },
    Unavailable,
}

impl BrokerConnection {
    /// Resolve from a variable lookup
    ///
    /// Precedence: REDIS_URL, then REDIS_HOST (+ PORT/USERNAME/PASSWORD/
    /// USE_TLS), then QUEUE_DATABASE_URL. Empty values count as unset.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("REDIS_URL") {
            return BrokerConnection::Redis(RedisEndpoint { url });
        }

        if let Some(host) = get("REDIS_HOST") {
            let port = match get("REDIS_PORT") {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(value = %raw, "Invalid REDIS_PORT, using {}", DEFAULT_REDIS_PORT);
                    DEFAULT_REDIS_PORT
                }),
                None => DEFAULT_REDIS_PORT,
            };
            let tls = get("REDIS_USE_TLS").as_deref() == Some("true");
            let username = get("REDIS_USERNAME");
            let password = get("REDIS_PASSWORD");
            return BrokerConnection::Redis(RedisEndpoint::from_parts(
                &host,
                port,
                username.as_deref(),
                password.as_deref(),
                tls,
            ));
        }

        if let Some(url) = get("QUEUE_DATABASE_URL") {
            return BrokerConnection::Sqlite { url };
        }

        BrokerConnection::Unavailable
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, BrokerConnection::Unavailable)
    }
}
