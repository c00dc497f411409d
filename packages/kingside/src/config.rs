/// Resolved runtime settings: command line flags first, environment second.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `None` runs without durable storage.
    pub database_url: Option<String>,
    pub debug: bool,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pick the database URL: an explicit flag wins over DATABASE_URL, and blank
/// values in either place mean "no database".
pub fn resolve_database_url(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.or(env)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment() {
        let url = resolve_database_url(
            Some("sqlite://flag.db".into()),
            Some("sqlite://env.db".into()),
        );
        assert_eq!(url.as_deref(), Some("sqlite://flag.db"));
    }

    #[test]
    fn environment_is_the_fallback() {
        let url = resolve_database_url(None, Some("sqlite://env.db".into()));
        assert_eq!(url.as_deref(), Some("sqlite://env.db"));
    }

    #[test]
    fn blank_values_disable_the_database() {
        assert_eq!(resolve_database_url(None, None), None);
        assert_eq!(resolve_database_url(Some("  ".into()), None), None);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = Config {
            host: "0.0.0.0".into(),
            port: 9000,
            database_url: None,
            debug: false,
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
