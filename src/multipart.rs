//! MIME multipart (RFC 2046 Section 5.1, RFC 7578)
//!
//! ## 概要
//!
//! 境界で区切られたパートを 1 つずつ取り出すデコーダーと、
//! 同じ形式でボディを組み立てるビルダーを提供する。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_framing::multipart::MultipartDecoder;
//!
//! let mut decoder = MultipartDecoder::new("BOUNDARY").unwrap();
//! decoder
//!     .feed(b"--BOUNDARY\r\nA: 1\r\n\r\nhello\r\n--BOUNDARY--\r\n")
//!     .unwrap();
//!
//! let part = decoder.next_part().unwrap();
//! assert_eq!(part.header("A"), Some("1"));
//! assert_eq!(part.body(), b"hello");
//! assert!(decoder.is_finished());
//! ```

use std::collections::VecDeque;

use crate::error::{Error, WriteError};
use crate::http::syntax::{line_to_string, parse_header_line};
use crate::limits::{DecoderLimits, with_delimiter};
use crate::pipeline::{Pipeline, Protocol, StageId, Stages};
use crate::sink::{Sink, WriteResult};
use crate::stage::{ParseMode, Stage};

const MAX_BOUNDARY_LEN: usize = 70;

/// 最初の境界の種類
const OPEN: usize = 0;
const CLOSE: usize = 1;

/// 境界文字列を検証 (RFC 2046 Section 5.1.1)
///
/// 1 から 70 文字の bchars で、空白で終わってはならない
pub fn validate_boundary(boundary: &str) -> Result<(), Error> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(Error::InvalidConfig(format!(
            "boundary length must be 1 to {MAX_BOUNDARY_LEN}: {}",
            boundary.len()
        )));
    }
    if !boundary.bytes().all(is_bchar) {
        return Err(Error::InvalidConfig(
            "boundary contains invalid character".to_string(),
        ));
    }
    if boundary.ends_with(' ') {
        return Err(Error::InvalidConfig(
            "boundary must not end with space".to_string(),
        ));
    }
    Ok(())
}

fn is_bchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' | b' '
        )
}

/// multipart パート
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Part {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Part {
    /// form-data のフィールドを作成
    pub fn new(name: &str) -> Self {
        Self::default().with_header(
            "Content-Disposition",
            &format!("form-data; name=\"{}\"", escape_quoted(name)),
        )
    }

    /// form-data のファイルフィールドを作成
    pub fn file(name: &str, filename: &str, content_type: &str) -> Self {
        Self::default()
            .with_header(
                "Content-Disposition",
                &format!(
                    "form-data; name=\"{}\"; filename=\"{}\"",
                    escape_quoted(name),
                    escape_quoted(filename)
                ),
            )
            .with_header("Content-Type", content_type)
    }

    /// ヘッダーを追加
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// ボディを設定
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    /// ヘッダーを取得 (名前は大文字小文字を区別しない)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// すべてのヘッダー
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// ボディ
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// ボディを文字列として取得
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// ボディを取り出す
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Content-Disposition の name パラメーター
    pub fn name(&self) -> Option<String> {
        disposition_param(self.header("Content-Disposition")?, "name")
    }

    /// Content-Disposition の filename パラメーター
    pub fn filename(&self) -> Option<String> {
        disposition_param(self.header("Content-Disposition")?, "filename")
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `type; key=value; key="quoted"` 形式からパラメーターを取り出す
fn disposition_param(value: &str, key: &str) -> Option<String> {
    let mut rest = value.split_once(';')?.1;
    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            return None;
        }
        let (k, after) = rest.split_once('=')?;
        let (v, next) = if let Some(quoted) = after.strip_prefix('"') {
            let mut v = String::new();
            let mut chars = quoted.char_indices();
            let mut end = None;
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            v.push(escaped);
                        }
                    }
                    '"' => {
                        end = Some(i + 1);
                        break;
                    }
                    _ => v.push(c),
                }
            }
            (v, &quoted[end?..])
        } else {
            let end = after.find(';').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };
        if k.trim().eq_ignore_ascii_case(key) {
            return Some(v);
        }
        rest = next;
    }
}

/// multipart プロトコル
#[derive(Debug, Clone)]
pub struct MultipartProtocol {
    boundary: String,
    limits: DecoderLimits,
    ids: Option<MultipartStages>,
    headers: Vec<(String, String)>,
    /// 読み飛ばしたプリアンブルの長さ
    skipped_preamble: usize,
}

#[derive(Debug, Clone, Copy)]
struct MultipartStages {
    first_boundary: StageId,
    header: StageId,
    content: StageId,
    end: StageId,
}

impl MultipartProtocol {
    /// 境界と制限を指定して作成
    pub fn new(boundary: &str, limits: DecoderLimits) -> Result<Self, Error> {
        validate_boundary(boundary)?;
        Ok(Self {
            boundary: boundary.to_string(),
            limits,
            ids: None,
            headers: Vec::new(),
            skipped_preamble: 0,
        })
    }

    /// 境界文字列
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// 行の途中で一致した分をプリアンブルとして読み飛ばし、残りの許容量で探し直す
    fn skip_preamble(&mut self, stage: &mut Stage) -> Result<(), Error> {
        let limit = self.limits.max_multipart_preamble_size;
        self.skipped_preamble = self.skipped_preamble.saturating_add(stage.consumed());
        if self.skipped_preamble > limit {
            return Err(Error::CapacityExceeded {
                size: self.skipped_preamble,
                limit,
            });
        }
        let close_len = self.boundary.len() + 6;
        let mode = stage.mode().clone();
        stage.configure(mode, with_delimiter(limit - self.skipped_preamble, close_len))
    }
}

impl Protocol for MultipartProtocol {
    type Token = Part;

    fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
        self.headers.clear();
        self.skipped_preamble = 0;

        let open = format!("--{}\r\n", self.boundary);
        let close = format!("--{}--\r\n", self.boundary);
        let first_boundary = stages.add(Stage::new(
            "first-boundary",
            ParseMode::delimiters(&[open.as_bytes(), close.as_bytes()]),
            with_delimiter(self.limits.max_multipart_preamble_size, close.len()),
        )?);
        let header = stages.add(Stage::new(
            "part-header",
            ParseMode::delimiter(b"\r\n"),
            with_delimiter(self.limits.max_header_line_size, 2),
        )?);
        let delimiter = format!("\r\n--{}", self.boundary);
        let content = stages.add(Stage::new(
            "part-content",
            ParseMode::delimiter(delimiter.as_bytes()),
            with_delimiter(self.limits.max_multipart_content_size, delimiter.len()),
        )?);
        // 末尾の "--" だけでストリームが終わる入力も閉じ境界として受け入れる
        let end = stages.add(
            Stage::new(
                "part-end",
                ParseMode::delimiters(&[b"--\r\n", b"\r\n"]),
                4,
            )?
            .with_end_of_stream_completion(true),
        );

        self.ids = Some(MultipartStages {
            first_boundary,
            header,
            content,
            end,
        });
        Ok(first_boundary)
    }

    fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        out: &mut VecDeque<Self::Token>,
    ) -> Result<Option<StageId>, Error> {
        let ids = self
            .ids
            .ok_or_else(|| Error::InvalidConfig("multipart is not initialized".to_string()))?;

        if completed == ids.first_boundary {
            // 行の途中に現れた境界はプリアンブルの一部として読み飛ばす。
            // 一致は CRLF で終わるので、読み直した先頭は行頭になる。
            let stage = &mut stages[completed];
            let preamble = stage.parsed_content();
            if !preamble.is_empty() && !preamble.ends_with(b"\r\n") {
                return self.skip_preamble(stage).map(|()| Some(ids.first_boundary));
            }
            return match stages[completed].matched_index() {
                Some(OPEN) => Ok(Some(ids.header)),
                Some(CLOSE) => Ok(None),
                _ => Err(Error::MalformedFraming("missing boundary".to_string())),
            };
        }

        if completed == ids.header {
            let line = stages[completed].take_content();
            if line.is_empty() {
                return Ok(Some(ids.content));
            }
            if self.headers.len() >= self.limits.max_headers_count {
                return Err(Error::CapacityExceeded {
                    size: self.headers.len() + 1,
                    limit: self.limits.max_headers_count,
                });
            }
            self.headers.push(parse_header_line(&line_to_string(line)?)?);
            return Ok(Some(ids.header));
        }

        if completed == ids.content {
            let body = stages[completed].take_content();
            out.push_back(Part {
                headers: std::mem::take(&mut self.headers),
                body,
            });
            return Ok(Some(ids.end));
        }

        let stage = &stages[completed];
        if stage.ended_by_end_of_stream() {
            if stage.parsed_content() == b"--" {
                return Ok(None);
            }
            return Err(Error::PrematureEndOfStream);
        }
        if !stage.parsed_content().is_empty() {
            return Err(Error::MalformedFraming(
                "unexpected bytes after boundary".to_string(),
            ));
        }
        match stage.matched_index() {
            Some(0) => Ok(None),
            _ => Ok(Some(ids.header)),
        }
    }
}

/// multipart デコーダー (Sans I/O)
#[derive(Debug)]
pub struct MultipartDecoder {
    pipeline: Pipeline<MultipartProtocol>,
}

impl MultipartDecoder {
    /// デフォルトの制限でデコーダーを作成
    ///
    /// 境界が不正な場合は [`Error::InvalidConfig`]
    pub fn new(boundary: &str) -> Result<Self, Error> {
        Self::with_limits(boundary, DecoderLimits::default())
    }

    /// 制限付きでデコーダーを作成
    pub fn with_limits(boundary: &str, limits: DecoderLimits) -> Result<Self, Error> {
        Ok(Self {
            pipeline: Pipeline::start(MultipartProtocol::new(boundary, limits)?)?,
        })
    }

    /// 境界文字列
    pub fn boundary(&self) -> &str {
        self.pipeline.protocol().boundary()
    }

    /// データを投入
    ///
    /// 閉じ境界より後ろ (エピローグ) は受け入れない
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.pipeline.feed(data)
    }

    /// ストリーム終了を通知
    pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
        self.pipeline.end_of_stream()
    }

    /// 次のパートを取り出す
    pub fn next_part(&mut self) -> Option<Part> {
        self.pipeline.next_token()
    }

    /// 閉じ境界まで読み終えたかどうか
    pub fn is_finished(&self) -> bool {
        self.pipeline.is_finished()
    }
}

impl Sink for MultipartDecoder {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.feed(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        MultipartDecoder::end_of_stream(self)
    }
}

/// multipart ボディビルダー
#[derive(Debug, Clone)]
pub struct MultipartBuilder {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartBuilder {
    /// 乱数値を受け取って境界を生成する
    ///
    /// Sans I/O の原則に従い、乱数生成は呼び出し側の責任となる。
    ///
    /// ```
    /// use shiguredo_framing::multipart::MultipartBuilder;
    ///
    /// let builder = MultipartBuilder::new(12345678901234567890);
    /// assert!(builder.boundary().starts_with("----FormBoundary"));
    /// ```
    pub fn new(random_value: u64) -> Self {
        Self {
            boundary: format!("----FormBoundary{random_value}"),
            parts: Vec::new(),
        }
    }

    /// 境界を指定して作成
    pub fn with_boundary(boundary: &str) -> Result<Self, Error> {
        validate_boundary(boundary)?;
        Ok(Self {
            boundary: boundary.to_string(),
            parts: Vec::new(),
        })
    }

    /// 境界文字列
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Content-Type ヘッダー値
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// テキストフィールドを追加
    pub fn text_field(self, name: &str, value: &str) -> Self {
        self.part(Part::new(name).with_body(value.as_bytes()))
    }

    /// ファイルフィールドを追加
    pub fn file_field(self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.part(Part::file(name, filename, content_type).with_body(data))
    }

    /// パートを追加
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// ボディを組み立てる
    ///
    /// ボディに区切り (`CRLF--境界`) が含まれる場合や
    /// ヘッダーに改行が含まれる場合は [`Error::MalformedFraming`]
    pub fn build(&self) -> Result<Vec<u8>, Error> {
        let delimiter = format!("\r\n--{}", self.boundary);
        let mut out = Vec::new();

        for part in &self.parts {
            let body = part.body();
            if body
                .windows(delimiter.len())
                .any(|w| w == delimiter.as_bytes())
            {
                return Err(Error::MalformedFraming(
                    "part body contains the boundary delimiter".to_string(),
                ));
            }

            out.extend_from_slice(b"--");
            out.extend_from_slice(self.boundary.as_bytes());
            out.extend_from_slice(b"\r\n");
            for (name, value) in part.headers() {
                if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
                    return Err(Error::MalformedFraming(
                        "part header contains CR/LF".to_string(),
                    ));
                }
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
        Ok(out)
    }
}
