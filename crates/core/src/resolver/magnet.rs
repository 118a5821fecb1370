/// Fields of interest in a magnet URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagnetInfo {
    /// `dn` parameter, decoded.
    pub display_name: Option<String>,
    /// `xt=urn:btih:` value, lowercased.
    pub info_hash: Option<String>,
}

impl MagnetInfo {
    /// Identifier used to detect duplicate fetches of the same content.
    pub fn resource_id(&self, uri: &str) -> String {
        self.info_hash.clone().unwrap_or_else(|| uri.to_string())
    }
}

pub fn is_magnet(url: &str) -> bool {
    url.get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

/// Parse the query part of a magnet URI. Unknown parameters are ignored.
pub fn parse_magnet(uri: &str) -> MagnetInfo {
    let mut info = MagnetInfo::default();
    let Some((_, query)) = uri.split_once('?') else {
        return info;
    };

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "dn" if info.display_name.is_none() => {
                let value = value.replace('+', " ");
                let decoded = urlencoding::decode(&value)
                    .map(|v| v.into_owned())
                    .unwrap_or(value);
                if !decoded.trim().is_empty() {
                    info.display_name = Some(decoded);
                }
            }
            "xt" if info.info_hash.is_none() => {
                let is_btih = value
                    .get(..9)
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case("urn:btih:"));
                if is_btih && value.len() > 9 {
                    info.info_hash = Some(value[9..].to_ascii_lowercase());
                }
            }
            _ => {}
        }
    }
    info
}

/// Build a magnet URI from an info hash, display name and trackers.
pub fn build_magnet_uri(info_hash: &str, name: Option<&str>, trackers: &[String]) -> String {
    let mut uri = format!("magnet:?xt=urn:btih:{}", info_hash);
    if let Some(name) = name {
        uri.push_str("&dn=");
        uri.push_str(&urlencoding::encode(name));
    }
    for tracker in trackers {
        uri.push_str("&tr=");
        uri.push_str(&urlencoding::encode(tracker));
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_magnet() {
        assert!(is_magnet("magnet:?xt=urn:btih:abc"));
        assert!(is_magnet("MAGNET:?xt=urn:btih:abc"));
        assert!(!is_magnet("https://example.com/a.torrent"));
        assert!(!is_magnet("mag"));
    }

    #[test]
    fn test_parse_magnet() {
        let info = parse_magnet(
            "magnet:?xt=urn:btih:ABCDEF0123&dn=Some+Linux%20ISO.iso&tr=udp%3A%2F%2Ftracker",
        );
        assert_eq!(info.info_hash.as_deref(), Some("abcdef0123"));
        assert_eq!(info.display_name.as_deref(), Some("Some Linux ISO.iso"));
    }

    #[test]
    fn test_parse_magnet_without_fields() {
        let uri = "magnet:?tr=udp%3A%2F%2Ftracker";
        let info = parse_magnet(uri);
        assert_eq!(info, MagnetInfo::default());
        assert_eq!(info.resource_id(uri), uri);
    }

    #[test]
    fn test_build_magnet_uri() {
        let uri = build_magnet_uri(
            "abc123",
            Some("My File.iso"),
            &["udp://t.example:1337/announce".to_string()],
        );
        assert_eq!(
            uri,
            "magnet:?xt=urn:btih:abc123&dn=My%20File.iso&tr=udp%3A%2F%2Ft.example%3A1337%2Fannounce"
        );
        let parsed = parse_magnet(&uri);
        assert_eq!(parsed.info_hash.as_deref(), Some("abc123"));
        assert_eq!(parsed.display_name.as_deref(), Some("My File.iso"));
    }
}
