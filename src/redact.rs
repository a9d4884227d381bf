//! Masking secret option values before they reach logs, run records and
//! plan listings.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

/// Characters kept at each end of a masked secret.
const SECRET_VISIBLE: usize = 4;
/// Characters kept at each end of a masked URL host.
const HOST_VISIBLE: usize = 3;
/// Leading port digits hidden in a masked URL.
const PORT_HIDDEN: usize = 3;

lazy_static! {
    static ref URL_PARTS: Regex = Regex::new(
        r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*)://(?:[^@/?#]*@)?(?P<host>\[[^\]/]*\]|[^:/?#]*)(?::(?P<port>[0-9]+))?(?P<path>[^?#]*)"
    )
    .unwrap();
}

fn stars(count: usize) -> String {
    "*".repeat(count)
}

/// Keeps `show` characters at both ends and stars out the middle. Values too
/// short to keep anything are starred out entirely.
pub fn obfuscate(secret: &str, show: usize) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return stars(3);
    }
    if chars.len() <= show * 2 {
        return stars(chars.len());
    }
    let head: String = chars[..show].iter().collect();
    let tail: String = chars[chars.len() - show..].iter().collect();
    format!("{head}{}{tail}", stars(chars.len() - show * 2))
}

/// Masks the host and the leading port digits of a URL but keeps the scheme
/// and path, so `http://10.0.0.5:7878/api` reads `http://10.**0.5:***8/api`.
/// Credentials, query and fragment are dropped.
pub fn obfuscate_url(url: &str) -> String {
    let Some(parts) = URL_PARTS.captures(url) else {
        return stars(3);
    };
    let scheme = &parts["scheme"];
    let host = obfuscate(&parts["host"], HOST_VISIBLE);
    let port = parts
        .name("port")
        .map(|port| {
            let digits = port.as_str();
            if digits.len() <= PORT_HIDDEN {
                format!(":{}", stars(digits.len()))
            } else {
                format!(":{}{}", stars(PORT_HIDDEN), &digits[PORT_HIDDEN..])
            }
        })
        .unwrap_or_default();
    let path = &parts["path"];
    format!("{scheme}://{host}{port}{path}")
}

/// URL-aware masking of one secret value.
pub fn mask(value: &str) -> String {
    if value.contains("://") {
        obfuscate_url(value)
    } else {
        obfuscate(value, SECRET_VISIBLE)
    }
}

/// Replaces known secret values inside arbitrary text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redactor {
    /// (secret, masked form), longest secret first.
    secrets: Vec<(String, String)>,
}

impl Redactor {
    pub const fn empty() -> Self {
        Self {
            secrets: Vec::new(),
        }
    }

    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<(String, String)> = secrets
            .into_iter()
            .map(Into::<String>::into)
            .filter(|secret: &String| !secret.is_empty())
            .map(|secret| {
                let masked = mask(&secret);
                (secret, masked)
            })
            .collect();
        secrets.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        secrets.dedup_by(|a, b| a.0 == b.0);
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn redact<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut result = Cow::Borrowed(text);
        for (secret, masked) in &self.secrets {
            if result.contains(secret.as_str()) {
                result = Cow::Owned(result.replace(secret.as_str(), masked));
            }
        }
        result
    }
}
