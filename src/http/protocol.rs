use std::collections::VecDeque;

use tracing::trace;

use crate::chunked::{ChunkedBody, ChunkedEvent};
use crate::error::Error;
use crate::limits::{DecoderLimits, with_delimiter};
use crate::pipeline::{Protocol, StageId, Stages};
use crate::stage::{ParseMode, Stage};

use super::syntax::{
    is_valid_http_version, is_valid_method, is_valid_reason_phrase, is_valid_request_target,
    is_valid_status_code, line_to_string, parse_header_line, resolve_body_headers,
};
use super::{BodyKind, HttpEvent, RequestLine, StatusLine};

/// メッセージの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// リクエスト (サーバー側で使う)
    Request,
    /// レスポンス (クライアント側で使う)
    Response,
}

#[derive(Debug, Clone, Copy)]
struct HttpStages {
    start_line: StageId,
    header: StageId,
    body: StageId,
    close_delimited: StageId,
}

/// HTTP/1.x プロトコル
///
/// メッセージを読み終えるとスタートラインに戻るので、
/// 1 つのパイプラインで同じ接続上の複数のメッセージを扱える。
#[derive(Debug, Clone)]
pub struct HttpProtocol {
    kind: MessageKind,
    limits: DecoderLimits,
    ids: Option<HttpStages>,
    chunked: Option<ChunkedBody>,
    /// HEAD リクエストへのレスポンスとして次のメッセージを読む
    expect_no_body: bool,
    started: bool,
    status: Option<StatusLine>,
    headers: Vec<(String, String)>,
    head_size: usize,
    /// Content-Length の残りバイト数
    remaining: usize,
    /// close-delimited ボディの合計
    body_size: usize,
}

impl HttpProtocol {
    /// リクエスト用のプロトコルを作成
    pub fn request(limits: DecoderLimits) -> Self {
        Self::new(MessageKind::Request, limits)
    }

    /// レスポンス用のプロトコルを作成
    pub fn response(limits: DecoderLimits) -> Self {
        Self::new(MessageKind::Response, limits)
    }

    fn new(kind: MessageKind, limits: DecoderLimits) -> Self {
        Self {
            kind,
            limits,
            ids: None,
            chunked: None,
            expect_no_body: false,
            started: false,
            status: None,
            headers: Vec::new(),
            head_size: 0,
            remaining: 0,
            body_size: 0,
        }
    }

    /// メッセージの種類
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// 制限設定
    pub fn limits(&self) -> &DecoderLimits {
        &self.limits
    }

    /// 次のレスポンスを HEAD リクエストへのレスポンスとして読む (ボディなし)
    ///
    /// 設定は次のレスポンスのヘッダーを読み終えた時点で解除される
    pub fn set_expect_no_body(&mut self, expect_no_body: bool) {
        self.expect_no_body = expect_no_body;
    }

    /// メッセージの途中かどうか
    pub fn in_message(&self) -> bool {
        self.started
    }

    fn begin_message(&mut self, ids: HttpStages) -> StageId {
        self.started = false;
        self.status = None;
        self.headers.clear();
        self.head_size = 0;
        self.remaining = 0;
        self.body_size = 0;
        ids.start_line
    }

    fn complete_message(&mut self, ids: HttpStages, out: &mut VecDeque<HttpEvent>) -> StageId {
        out.push_back(HttpEvent::MessageComplete);
        trace!(kind = ?self.kind, "message complete");
        self.begin_message(ids)
    }

    /// ヘッダーブロックの長さを加算
    fn add_head_size(&mut self, line_len: usize) -> Result<(), Error> {
        let size = self
            .head_size
            .checked_add(line_len)
            .and_then(|n| n.checked_add(2))
            .ok_or(Error::Overflow)?;
        if size > self.limits.max_header_block_size {
            return Err(Error::CapacityExceeded {
                size,
                limit: self.limits.max_header_block_size,
            });
        }
        self.head_size = size;
        Ok(())
    }

    fn parse_start_line(&mut self, line: String) -> Result<HttpEvent, Error> {
        match self.kind {
            MessageKind::Request => {
                // METHOD SP request-target SP HTTP-version
                let mut parts = line.split(' ');
                let (Some(method), Some(target), Some(version), None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(Error::MalformedFraming(format!(
                        "invalid request line: {line}"
                    )));
                };
                if !is_valid_method(method) {
                    return Err(Error::MalformedFraming(format!("invalid method: {method}")));
                }
                if !is_valid_request_target(target) {
                    return Err(Error::MalformedFraming(format!(
                        "invalid request target: {target}"
                    )));
                }
                if !is_valid_http_version(version) {
                    return Err(Error::MalformedFraming(format!(
                        "invalid HTTP version: {version}"
                    )));
                }
                Ok(HttpEvent::RequestLine(RequestLine {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                }))
            }
            MessageKind::Response => {
                // HTTP-version SP status-code SP [ reason-phrase ]
                let mut parts = line.splitn(3, ' ');
                let version = parts.next().unwrap_or_default();
                let code = parts.next().ok_or_else(|| {
                    Error::MalformedFraming(format!("invalid status line: {line}"))
                })?;
                let reason = parts.next().unwrap_or_default();

                if !is_valid_http_version(version) {
                    return Err(Error::MalformedFraming(format!(
                        "invalid HTTP version: {version}"
                    )));
                }
                let status_code = code
                    .parse::<u16>()
                    .ok()
                    .filter(|c| code.len() == 3 && is_valid_status_code(*c))
                    .ok_or_else(|| {
                        Error::MalformedFraming(format!("invalid status code: {code}"))
                    })?;
                if !is_valid_reason_phrase(reason) {
                    return Err(Error::MalformedFraming(
                        "invalid reason phrase".to_string(),
                    ));
                }
                let status = StatusLine {
                    version: version.to_string(),
                    status_code,
                    reason: reason.to_string(),
                };
                self.status = Some(status.clone());
                Ok(HttpEvent::StatusLine(status))
            }
        }
    }

    /// ボディの種類を決める (RFC 9112 Section 6.3)
    fn body_kind(&mut self) -> Result<BodyKind, Error> {
        let (chunked, content_length) = resolve_body_headers(&self.headers)?;
        // 1xx の後に本来の応答が続くので、フラグはそちらまで残す
        let informational = self.status.as_ref().is_some_and(|s| s.is_informational());
        let expect_no_body = if informational {
            self.expect_no_body
        } else {
            std::mem::take(&mut self.expect_no_body)
        };

        if let Some(status) = &self.status {
            if expect_no_body || !status.allows_body() {
                return Ok(BodyKind::None);
            }
        }
        if chunked {
            return Ok(BodyKind::Chunked);
        }
        if let Some(len) = content_length {
            if len > self.limits.max_body_size {
                return Err(Error::CapacityExceeded {
                    size: len,
                    limit: self.limits.max_body_size,
                });
            }
            return Ok(BodyKind::ContentLength(len));
        }
        match self.kind {
            MessageKind::Request => Ok(BodyKind::None),
            MessageKind::Response => Ok(BodyKind::CloseDelimited),
        }
    }

    fn next_piece(&self, ids: HttpStages, stages: &mut Stages) -> Result<StageId, Error> {
        let piece = self.limits.body_piece_size;
        stages[ids.body].configure(ParseMode::FixedSize(self.remaining.min(piece)), piece)?;
        Ok(ids.body)
    }

    fn headers_complete(
        &mut self,
        ids: HttpStages,
        stages: &mut Stages,
        out: &mut VecDeque<HttpEvent>,
    ) -> Result<StageId, Error> {
        let kind = self.body_kind()?;
        out.push_back(HttpEvent::HeadersComplete(kind));
        trace!(kind = ?self.kind, body = ?kind, "headers complete");

        match kind {
            BodyKind::None | BodyKind::ContentLength(0) => Ok(self.complete_message(ids, out)),
            BodyKind::ContentLength(len) => {
                self.remaining = len;
                self.next_piece(ids, stages)
            }
            BodyKind::Chunked => {
                let chunked = self.chunked.as_mut().ok_or_else(not_initialized)?;
                Ok(chunked.begin())
            }
            BodyKind::CloseDelimited => Ok(ids.close_delimited),
        }
    }
}

fn not_initialized() -> Error {
    Error::InvalidConfig("http protocol is not initialized".to_string())
}

impl Protocol for HttpProtocol {
    type Token = HttpEvent;

    fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
        self.limits.validate()?;
        let line_cap = with_delimiter(self.limits.max_header_line_size, 2);
        let piece = self.limits.body_piece_size;

        // メッセージ間でのストリーム終了は正常終了
        let start_line = stages.add(
            Stage::new("start-line", ParseMode::delimiter(b"\r\n"), line_cap)?
                .with_end_of_stream_completion(true),
        );
        let header = stages.add(Stage::new(
            "header",
            ParseMode::delimiter(b"\r\n"),
            line_cap,
        )?);
        let body = stages.add(Stage::new("body", ParseMode::FixedSize(0), piece)?);
        let close_delimited = stages.add(
            Stage::new("body-until-close", ParseMode::FixedSize(piece), piece)?
                .with_end_of_stream_completion(true),
        );
        self.chunked = Some(ChunkedBody::install(stages, &self.limits)?);

        let ids = HttpStages {
            start_line,
            header,
            body,
            close_delimited,
        };
        self.ids = Some(ids);
        Ok(self.begin_message(ids))
    }

    fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        out: &mut VecDeque<Self::Token>,
    ) -> Result<Option<StageId>, Error> {
        let ids = self.ids.ok_or_else(not_initialized)?;

        if completed == ids.start_line {
            let ended = stages[completed].ended_by_end_of_stream();
            let line = stages[completed].take_content();
            if ended {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(Error::PrematureEndOfStream);
            }
            self.add_head_size(line.len())?;
            // メッセージ前の空行は無視する (RFC 9112 Section 2.2)
            if line.is_empty() {
                return Ok(Some(ids.start_line));
            }
            self.started = true;
            let event = self.parse_start_line(line_to_string(line)?)?;
            out.push_back(event);
            return Ok(Some(ids.header));
        }

        if completed == ids.header {
            let line = stages[completed].take_content();
            self.add_head_size(line.len())?;
            if line.is_empty() {
                return self.headers_complete(ids, stages, out).map(Some);
            }
            if self.headers.len() >= self.limits.max_headers_count {
                return Err(Error::CapacityExceeded {
                    size: self.headers.len() + 1,
                    limit: self.limits.max_headers_count,
                });
            }
            let (name, value) = parse_header_line(&line_to_string(line)?)?;
            self.headers.push((name.clone(), value.clone()));
            out.push_back(HttpEvent::Header { name, value });
            return Ok(Some(ids.header));
        }

        if completed == ids.body {
            let piece = stages[completed].take_content();
            self.remaining -= piece.len();
            out.push_back(HttpEvent::Body(piece));
            if self.remaining > 0 {
                return self.next_piece(ids, stages).map(Some);
            }
            return Ok(Some(self.complete_message(ids, out)));
        }

        if completed == ids.close_delimited {
            let ended = stages[completed].ended_by_end_of_stream();
            let piece = stages[completed].take_content();
            self.body_size = self
                .body_size
                .checked_add(piece.len())
                .ok_or(Error::Overflow)?;
            if self.body_size > self.limits.max_body_size {
                return Err(Error::CapacityExceeded {
                    size: self.body_size,
                    limit: self.limits.max_body_size,
                });
            }
            if !piece.is_empty() {
                out.push_back(HttpEvent::Body(piece));
            }
            if ended {
                out.push_back(HttpEvent::MessageComplete);
                return Ok(None);
            }
            return Ok(Some(ids.close_delimited));
        }

        let chunked = self.chunked.as_mut().ok_or_else(not_initialized)?;
        let next = chunked.advance(completed, stages, &mut |event| {
            out.push_back(match event {
                ChunkedEvent::Data(data) => HttpEvent::Body(data),
                ChunkedEvent::Trailer { name, value } => HttpEvent::Trailer { name, value },
                ChunkedEvent::End => HttpEvent::MessageComplete,
            })
        })?;
        match next {
            Some(next) => Ok(Some(next)),
            None => Ok(Some(self.begin_message(ids))),
        }
    }
}
