//! Media payload validation.
//!
//! Media messages carry a URL as their content. Only http(s) URLs whose
//! host is on the configured allow-list are accepted; everything else is
//! rejected before persistence.

use url::Url;

pub fn is_allowed_media(content: &str, allowed_domains: &[String]) -> bool {
    let Ok(parsed) = Url::parse(content) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    allowed_domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["tenor.com".to_string()]
    }

    #[test]
    fn accepts_allowed_domain_and_subdomains() {
        assert!(is_allowed_media("https://tenor.com/view/abc.gif", &allowed()));
        assert!(is_allowed_media("https://media.tenor.com/xyz.gif", &allowed()));
    }

    #[test]
    fn rejects_lookalike_hosts_and_query_tricks() {
        assert!(!is_allowed_media("https://eviltenor.com/abc.gif", &allowed()));
        assert!(!is_allowed_media("https://evil.com/?q=tenor.com", &allowed()));
        assert!(!is_allowed_media("https://evil.com/tenor.com/a.gif", &allowed()));
    }

    #[test]
    fn rejects_non_http_schemes_and_non_urls() {
        assert!(!is_allowed_media("ftp://tenor.com/a.gif", &allowed()));
        assert!(!is_allowed_media("just some text", &allowed()));
        assert!(!is_allowed_media("", &allowed()));
    }
}
