use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

/// Ticket numbers look like `ARB-7K2QX`. The suffix alphabet is uppercase
/// alphanumeric; generation is collision-resistant, not secret.
pub const TICKET_PREFIX: &str = "ARB-";
const TICKET_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TICKET_SUFFIX_LEN: usize = 5;

// 5 chars for the random form, up to 13 for the base36 timestamp fallback
// (13 base36 digits cover the full u64 range).
static TICKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ARB-[A-Z0-9]{5,13}$").unwrap());

/// Store-checked generation attempts before falling back to the
/// timestamp-derived form.
pub const TICKET_GENERATION_ATTEMPTS: usize = 5;

/// Suffix probes before giving up on deriving a unique slug.
pub const MAX_SLUG_ATTEMPTS: u32 = 1000;

/// Random ticket-number candidate. Uniqueness is the caller's job.
pub fn ticket_candidate() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TICKET_SUFFIX_LEN)
        .map(|_| TICKET_CHARSET[rng.gen_range(0..TICKET_CHARSET.len())] as char)
        .collect();
    format!("{}{}", TICKET_PREFIX, suffix)
}

/// Timestamp-derived fallback used once random candidates exhaust their
/// retry budget. Millisecond precision makes collisions practically
/// impossible, and the unique index backstops the rest.
pub fn ticket_fallback() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    format!("{}{}", TICKET_PREFIX, to_base36_upper(millis))
}

/// Canonical form for ticket-number lookups: trimmed, uppercased.
pub fn normalize_ticket(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Whether a normalized value has the shape of an issued ticket number,
/// in either the random or the timestamp-fallback form. Lets lookups skip
/// the store for garbage input.
pub fn is_ticket_shaped(value: &str) -> bool {
    TICKET_RE.is_match(value)
}

fn to_base36_upper(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Derives a URL-safe slug: lowercase, alphanumerics kept, word breaks
/// collapsed to single hyphens, everything else dropped.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_hyphen = true;
        }
        // Any other character is dropped without forcing a break.
    }

    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

/// Numbered variant probed when the base slug is taken: `base-2`, `base-3`, …
pub fn slug_with_suffix(base: &str, attempt: u32) -> String {
    format!("{}-{}", base, attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_ticket_suffix(s: &str) -> bool {
        s.len() == TICKET_SUFFIX_LEN && s.bytes().all(|b| TICKET_CHARSET.contains(&b))
    }

    #[test]
    fn candidates_match_expected_shape() {
        for _ in 0..100 {
            let ticket = ticket_candidate();
            let suffix = ticket.strip_prefix(TICKET_PREFIX).expect("prefix");
            assert!(is_ticket_suffix(suffix), "bad candidate: {}", ticket);
        }
    }

    #[test]
    fn fallback_is_prefixed_base36() {
        let ticket = ticket_fallback();
        let suffix = ticket.strip_prefix(TICKET_PREFIX).expect("prefix");
        assert!(!suffix.is_empty());
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    }

    #[test]
    fn base36_known_values() {
        assert_eq!(to_base36_upper(0), "0");
        assert_eq!(to_base36_upper(35), "Z");
        assert_eq!(to_base36_upper(36), "10");
        assert_eq!(to_base36_upper(1295), "ZZ");
        assert_eq!(to_base36_upper(1296), "100");
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_ticket("  arb-7k2qx "), "ARB-7K2QX");
    }

    #[test]
    fn ticket_shape_accepts_both_issued_forms() {
        assert!(is_ticket_shaped(&ticket_candidate()));
        assert!(is_ticket_shaped(&ticket_fallback()));
        assert!(is_ticket_shaped("ARB-7K2QX"));
    }

    #[test]
    fn ticket_shape_rejects_garbage() {
        assert!(!is_ticket_shaped("arb-7k2qx"));
        assert!(!is_ticket_shaped("ARB-7K2Q"));
        assert!(!is_ticket_shaped("XYZ-7K2QX"));
        assert!(!is_ticket_shaped("ARB-7K2QX; DROP TABLE"));
        assert!(!is_ticket_shaped(""));
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Fixing   CRT Monitors!  "), "fixing-crt-monitors");
        assert_eq!(slugify("Walkman: tape deck repair 101"), "walkman-tape-deck-repair-101");
    }

    #[test]
    fn slugify_strips_punctuation_without_breaking_words() {
        assert_eq!(slugify("don't panic"), "dont-panic");
        assert_eq!(slugify("a_b-c d"), "a-b-c-d");
    }

    #[test]
    fn slugify_empty_falls_back() {
        assert_eq!(slugify("!!!"), "post");
        assert_eq!(slugify(""), "post");
    }

    #[test]
    fn suffix_form() {
        assert_eq!(slug_with_suffix("hello-world", 2), "hello-world-2");
    }
}
