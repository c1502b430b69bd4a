//! Client URL grammar (§6, bit-exact):
//! `proxy:[endpoint(,endpoint)*]_driver-specific-url`.

use ojp_proto::OjpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProxyUrl {
    /// The raw `host:port,host:port` list, not yet split into endpoints.
    pub server_list: String,
    /// Everything after `]_`, forwarded verbatim to the driver on the proxy.
    pub driver_url: String,
}

const PREFIX: &str = "proxy:[";

pub fn parse_proxy_url(url: &str) -> Result<ParsedProxyUrl, OjpError> {
    let rest = url.strip_prefix(PREFIX).ok_or_else(|| OjpError::Configuration {
        details: format!("URL must start with '{PREFIX}': '{url}'"),
    })?;

    let close = rest.find("]_").ok_or_else(|| OjpError::Configuration {
        details: format!("URL is missing the ']_' endpoint-list terminator: '{url}'"),
    })?;

    let server_list = rest[..close].to_string();
    let driver_url = rest[close + 2..].to_string();

    if server_list.is_empty() {
        return Err(OjpError::Configuration {
            details: format!("URL has an empty endpoint list: '{url}'"),
        });
    }
    if driver_url.is_empty() {
        return Err(OjpError::Configuration {
            details: format!("URL has an empty driver-specific URL: '{url}'"),
        });
    }

    Ok(ParsedProxyUrl {
        server_list,
        driver_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_endpoint() {
        let parsed = parse_proxy_url("proxy:[localhost:1059]_jdbc:postgresql://db:5432/app").unwrap();
        assert_eq!(parsed.server_list, "localhost:1059");
        assert_eq!(parsed.driver_url, "jdbc:postgresql://db:5432/app");
    }

    #[test]
    fn parses_multiple_endpoints() {
        let parsed = parse_proxy_url("proxy:[h1:5000,h2:5001]_jdbc:h2:mem:test").unwrap();
        assert_eq!(parsed.server_list, "h1:5000,h2:5001");
        assert_eq!(parsed.driver_url, "jdbc:h2:mem:test");
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(parse_proxy_url("jdbc:postgresql://db/app").is_err());
    }

    #[test]
    fn rejects_missing_terminator() {
        assert!(parse_proxy_url("proxy:[h1:5000jdbc:h2:mem:test").is_err());
    }

    #[test]
    fn rejects_empty_server_list() {
        assert!(parse_proxy_url("proxy:[]_jdbc:h2:mem:test").is_err());
    }
}
