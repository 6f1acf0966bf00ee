//! HTTP/1.x のフレーミングに必要な最小限の構文チェック

use crate::error::Error;

fn malformed(msg: &str) -> Error {
    Error::MalformedFraming(msg.to_string())
}

/// 行を UTF-8 として解釈
pub(crate) fn line_to_string(line: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(line).map_err(|e| Error::MalformedFraming(format!("invalid UTF-8: {e}")))
}

/// ヘッダー行をパース
pub(crate) fn parse_header_line(line: &str) -> Result<(String, String), Error> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(malformed("invalid header line: obs-fold"));
    }
    if line.contains('\r') || line.contains('\n') {
        return Err(malformed("invalid header line: contains CR/LF"));
    }

    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| malformed("invalid header line: missing colon"))?;
    if !is_valid_header_name(name) {
        return Err(malformed("invalid header line: invalid name"));
    }

    // ヘッダー値の検証 (RFC 9110 Section 5.5)
    let value = value.trim_matches([' ', '\t']);
    if !is_valid_field_value(value) {
        return Err(malformed(
            "invalid header line: invalid value (contains control characters)",
        ));
    }

    Ok((name.to_string(), value.to_string()))
}

pub(crate) fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_char)
}

pub(crate) fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
    )
}

fn is_valid_field_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| matches!(b, 0x09 | 0x20..=0x7E | 0x80..=0xFF))
}

pub(crate) fn is_valid_method(method: &str) -> bool {
    !method.is_empty() && method.bytes().all(is_token_char)
}

pub(crate) fn is_valid_http_version(version: &str) -> bool {
    matches!(version, "HTTP/1.0" | "HTTP/1.1")
}

pub(crate) fn is_valid_request_target(target: &str) -> bool {
    !target.is_empty() && target.bytes().all(|b| b.is_ascii_graphic())
}

pub(crate) fn is_valid_status_code(code: u16) -> bool {
    (100..=599).contains(&code)
}

pub(crate) fn is_valid_reason_phrase(phrase: &str) -> bool {
    is_valid_field_value(phrase)
}

/// チャンクサイズ行をパース
///
/// `;` 以降のチャンク拡張は無視する
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<usize, Error> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::MalformedFraming(format!("invalid UTF-8: {e}")))?;
    let size_str = line
        .split(';')
        .next()
        .unwrap_or(line)
        .trim_matches([' ', '\t']);
    if size_str.is_empty() {
        return Err(malformed("invalid chunk size: empty"));
    }

    let mut size: usize = 0;
    for c in size_str.chars() {
        let digit = c
            .to_digit(16)
            .ok_or_else(|| Error::MalformedFraming(format!("invalid chunk size: {}", size_str)))?;
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as usize))
            .ok_or(Error::Overflow)?;
    }
    Ok(size)
}

/// Transfer-Encoding が chunked かどうかを判定
///
/// chunked 以外のコーディングはサポートしない
fn parse_transfer_encoding_chunked(headers: &[(String, String)]) -> Result<bool, Error> {
    let mut chunked_count = 0;

    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            for token in value.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    return Err(malformed("invalid Transfer-Encoding: empty token"));
                }
                if !token.eq_ignore_ascii_case("chunked") {
                    return Err(malformed("invalid Transfer-Encoding: unsupported coding"));
                }
                chunked_count += 1;
                if chunked_count > 1 {
                    return Err(malformed("invalid Transfer-Encoding: duplicate chunked"));
                }
            }
        }
    }

    Ok(chunked_count == 1)
}

/// Content-Length ヘッダーを解析
fn parse_content_length(headers: &[(String, String)]) -> Result<Option<usize>, Error> {
    let mut value: Option<usize> = None;
    for (name, raw_value) in headers {
        if name.eq_ignore_ascii_case("Content-Length") {
            let raw_value = raw_value.trim();
            if raw_value.is_empty() || !raw_value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed("invalid Content-Length: not a number"));
            }
            let parsed = raw_value.parse::<usize>().map_err(|_| Error::Overflow)?;
            match value {
                Some(prev) if prev != parsed => {
                    return Err(malformed("invalid Content-Length: mismatched values"));
                }
                _ => value = Some(parsed),
            }
        }
    }
    Ok(value)
}

/// ボディ関連ヘッダーを解決
///
/// (chunked かどうか, Content-Length) を返す
pub(crate) fn resolve_body_headers(
    headers: &[(String, String)],
) -> Result<(bool, Option<usize>), Error> {
    let chunked = parse_transfer_encoding_chunked(headers)?;
    let content_length = parse_content_length(headers)?;

    if chunked && content_length.is_some() {
        return Err(malformed(
            "invalid message: both Transfer-Encoding and Content-Length",
        ));
    }

    Ok((chunked, content_length))
}
