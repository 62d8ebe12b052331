//! Query string decoding
//!
//! `urlencoding::decode` passes stray `%` sequences through untouched, so escapes are
//! validated here first and malformed input is reported instead of guessed at.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed percent-encoding in '{0}'")]
    MalformedEscape(String),

    #[error("decoded value is not valid UTF-8: '{0}'")]
    InvalidUtf8(String),
}

/// Decode one `application/x-www-form-urlencoded` component (`+` is a space).
pub fn percent_decode(raw: &str) -> Result<String, DecodeError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(DecodeError::MalformedEscape(raw.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| DecodeError::InvalidUtf8(raw.to_string()))
}

/// Return the query part of a URL, without the fragment.
pub fn query_string(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once('?')?;
    Some(rest.split('#').next().unwrap_or(rest))
}

/// Look up the first query parameter called `name`, decoding keys and values.
pub fn find_param(url: &str, name: &str) -> Result<Option<String>, DecodeError> {
    let Some(query) = query_string(url) else {
        return Ok(None);
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(raw_key)? == name {
            return percent_decode(raw_value).map(Some);
        }
    }
    Ok(None)
}
