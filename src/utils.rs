use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static E164ISH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9]\d{6,14}$").expect("phone pattern compiles"));

const MEDIA_EXTENSIONS: &[&str] = &[".mp3", ".wav"];

/// Strip common separators and check the number is E.164-ish. Returns the cleaned number.
pub fn normalize_phone_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    E164ISH.is_match(&cleaned).then_some(cleaned)
}

/// Resolve the requesting user from a client caller identity (`client:<uuid>` or `<uuid>`).
pub fn parse_client_identity(caller: &str) -> Option<Uuid> {
    let identity = caller.strip_prefix("client:").unwrap_or(caller);
    Uuid::parse_str(identity.trim()).ok()
}

/// Recording URLs arrive without a media extension; point them at the mp3 rendition.
pub fn normalize_recording_url(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        url.to_string()
    } else {
        format!("{url}.mp3")
    }
}

/// Treat empty form values the same as absent ones.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_numbers() {
        assert_eq!(normalize_phone_number("+15551234567").as_deref(), Some("+15551234567"));
        assert_eq!(
            normalize_phone_number("+1 (555) 123-4567").as_deref(),
            Some("+15551234567")
        );
        assert_eq!(normalize_phone_number("555.123.4567").as_deref(), Some("5551234567"));
        for bad in ["", "+", "12345", "+0123456789", "+1555123456789012", "+1555abc4567"] {
            assert_eq!(normalize_phone_number(bad), None, "{bad}");
        }
    }

    #[test]
    fn client_identities() {
        let user = Uuid::new_v4();
        assert_eq!(parse_client_identity(&format!("client:{user}")), Some(user));
        assert_eq!(parse_client_identity(&user.to_string()), Some(user));
        assert_eq!(parse_client_identity("client:someone"), None);
        assert_eq!(parse_client_identity("+15551234567"), None);
    }

    #[test]
    fn recording_urls_get_a_playable_extension() {
        assert_eq!(
            normalize_recording_url("https://api.twilio.com/2010-04-01/Accounts/AC1/Recordings/RE1"),
            "https://api.twilio.com/2010-04-01/Accounts/AC1/Recordings/RE1.mp3"
        );
        assert_eq!(normalize_recording_url("https://x/RE1.mp3"), "https://x/RE1.mp3");
        assert_eq!(normalize_recording_url("https://x/RE1.WAV"), "https://x/RE1.WAV");
    }
}
