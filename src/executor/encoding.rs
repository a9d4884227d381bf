use encoding_rs::{Encoding, UTF_8};
use lazy_static::lazy_static;
use std::env;

lazy_static! {
    /// Charset named by the process locale, e.g. `zh_CN.GBK`. UTF-8 when the
    /// locale is unset or names an unknown charset.
    static ref SYSTEM_ENCODING: &'static Encoding = ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| encoding_for_locale(&locale))
        .unwrap_or(UTF_8);
}

fn encoding_for_locale(locale: &str) -> Option<&'static Encoding> {
    let charset = locale.split('.').nth(1)?.split('@').next()?;
    Encoding::for_label(charset.as_bytes())
}

/// Decodes one line of command output and drops its line terminator.
pub fn decode_line(bytes: &[u8]) -> String {
    decode_with(bytes, *SYSTEM_ENCODING)
}

fn decode_with(bytes: &[u8], fallback: &'static Encoding) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    if fallback != UTF_8 {
        let (text, _, had_errors) = fallback.decode(bytes);
        if !had_errors {
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_terminators() {
        assert_eq!(decode_with(b"load average: 0.10\n", UTF_8), "load average: 0.10");
        assert_eq!(decode_with(b"C:\\> dir\r\n", UTF_8), "C:\\> dir");
        assert_eq!(decode_with(b"no newline", UTF_8), "no newline");
    }

    #[test]
    fn falls_back_to_locale_charset_then_lossy() {
        // "中文" in GBK
        let gbk = [0xD6, 0xD0, 0xCE, 0xC4, b'\n'];
        assert_eq!(decode_with(&gbk, encoding_rs::GBK), "中文");
        assert!(decode_with(&gbk, UTF_8).contains('\u{FFFD}'));
    }

    #[test]
    fn reads_charset_from_locale_names() {
        assert_eq!(encoding_for_locale("zh_CN.GBK"), Some(encoding_rs::GBK));
        assert_eq!(encoding_for_locale("en_US.UTF-8"), Some(UTF_8));
        assert_eq!(encoding_for_locale("de_DE.ISO-8859-15@euro"), Some(encoding_rs::ISO_8859_15));
        assert_eq!(encoding_for_locale("C"), None);
    }
}
