//! Chunked Transfer Encoding (RFC 9112 Section 7.1)
//!
//! ## エンコード
//!
//! [`ChunkedEncoder`] は書き込み先をラップし、書き込みごとに 1 チャンクを出力する。
//! チャンクデータ直後の CRLF は次のチャンクか終端チャンクを出力するときにまとめて書く。
//!
//! ```rust
//! use shiguredo_framing::{ChunkedEncoder, Sink};
//!
//! let mut encoder = ChunkedEncoder::new(Vec::new());
//! encoder.write(b"hello").unwrap();
//! encoder.write(b", world").unwrap();
//! encoder.finish().unwrap();
//! assert_eq!(encoder.get_ref(), b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n");
//! ```
//!
//! ## デコード
//!
//! ```rust
//! use shiguredo_framing::{ChunkedDecoder, ChunkedEvent};
//!
//! let mut decoder = ChunkedDecoder::new().unwrap();
//! decoder.feed(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
//! assert_eq!(decoder.next_event(), Some(ChunkedEvent::Data(b"hello".to_vec())));
//! assert_eq!(decoder.next_event(), Some(ChunkedEvent::End));
//! ```

use std::collections::VecDeque;

use crate::error::{Error, WriteError};
use crate::http::syntax::{line_to_string, parse_chunk_size, parse_header_line};
use crate::limits::{DecoderLimits, with_delimiter};
use crate::pipeline::{Pipeline, Protocol, StageId, Stages};
use crate::sink::{Sink, WriteResult, write_all};
use crate::stage::{ParseMode, Stage};

const ENCODER_STAGE: &str = "chunked-encoder";

/// チャンクヘッダー (`[CRLF] hex(count) CRLF`) を作成
///
/// フレーム全体の長さが `usize` に収まらない場合は [`Error::Overflow`]
fn chunk_header(count: usize, first: bool) -> Result<Vec<u8>, Error> {
    let hex = format!("{:x}", count);
    let prefix: usize = if first { 0 } else { 2 };
    prefix
        .checked_add(hex.len())
        .and_then(|n| n.checked_add(2))
        .and_then(|n| n.checked_add(count))
        .ok_or(Error::Overflow)?;

    let mut header = Vec::with_capacity(prefix + hex.len() + 2);
    if !first {
        header.extend_from_slice(b"\r\n");
    }
    header.extend_from_slice(hex.as_bytes());
    header.extend_from_slice(b"\r\n");
    Ok(header)
}

/// chunked エンコーダー
#[derive(Debug)]
pub struct ChunkedEncoder<S> {
    sink: S,
    wrote_chunk: bool,
    finished: bool,
}

impl<S: Sink> ChunkedEncoder<S> {
    /// 書き込み先をラップしてエンコーダーを作成
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            wrote_chunk: false,
            finished: false,
        }
    }

    /// 書き込み先を取得
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// 書き込み先を可変で取得
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// 書き込み先を取り出す
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// 終端チャンクを書き込んだかどうか
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 終端チャンクを書き込む
    ///
    /// チャンクを 1 つ以上書いていれば `\r\n0\r\n\r\n`、そうでなければ `0\r\n\r\n`
    pub fn finish(&mut self) -> Result<(), WriteError> {
        if self.finished {
            return Ok(());
        }
        let terminator: &[u8] = if self.wrote_chunk {
            b"\r\n0\r\n\r\n"
        } else {
            b"0\r\n\r\n"
        };
        write_all(&mut self.sink, terminator).map_err(|e| e.with_accepted(0))?;
        self.finished = true;
        self.sink.end_of_stream()
    }
}

impl<S: Sink> Sink for ChunkedEncoder<S> {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        if self.finished {
            return Err(WriteError::new(0, ENCODER_STAGE, Error::SinkClosed));
        }
        // 空のチャンクは終端チャンクになってしまうので何も書かない
        if data.is_empty() {
            return Ok(WriteResult::more(0));
        }

        let header = chunk_header(data.len(), !self.wrote_chunk)
            .map_err(|e| WriteError::new(0, ENCODER_STAGE, e))?;
        write_all(&mut self.sink, &header).map_err(|e| e.with_accepted(0))?;
        self.wrote_chunk = true;
        write_all(&mut self.sink, data)?;
        Ok(WriteResult::more(data.len()))
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        self.finish()
    }
}

/// 複数のデータを chunked 形式でエンコード
///
/// 空のデータは読み飛ばし、最後に終端チャンクを追加する
pub fn encode_chunks(chunks: &[&[u8]]) -> Result<Vec<u8>, Error> {
    let mut encoder = ChunkedEncoder::new(Vec::new());
    for chunk in chunks {
        encoder.write(chunk)?;
    }
    encoder.finish()?;
    Ok(encoder.into_inner())
}

/// chunked デコードのイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkedEvent {
    /// チャンクデータ (長いチャンクは分割されて届く)
    Data(Vec<u8>),
    /// トレーラーヘッダー
    Trailer { name: String, value: String },
    /// 終端
    End,
}

/// chunked ボディのステージ群
///
/// HTTP デコーダーと単体の chunked デコーダーで共有する
#[derive(Debug, Clone)]
pub(crate) struct ChunkedBody {
    size_line: StageId,
    data: StageId,
    crlf: StageId,
    trailer: StageId,
    max_chunk_size: usize,
    max_body_size: usize,
    max_trailers_count: usize,
    piece_size: usize,
    /// 現在のチャンクの残りバイト数
    remaining: usize,
    body_size: usize,
    trailer_count: usize,
}

impl ChunkedBody {
    /// ステージを登録
    pub(crate) fn install(stages: &mut Stages, limits: &DecoderLimits) -> Result<Self, Error> {
        let size_line = stages.add(Stage::new(
            "chunk-size",
            ParseMode::delimiter(b"\r\n"),
            with_delimiter(limits.max_chunk_line_size, 2),
        )?);
        let data = stages.add(Stage::new(
            "chunk-data",
            ParseMode::FixedSize(0),
            limits.body_piece_size,
        )?);
        let crlf = stages.add(Stage::new("chunk-crlf", ParseMode::FixedSize(2), 2)?);
        let trailer = stages.add(Stage::new(
            "chunk-trailer",
            ParseMode::delimiter(b"\r\n"),
            with_delimiter(limits.max_header_line_size, 2),
        )?);
        Ok(Self {
            size_line,
            data,
            crlf,
            trailer,
            max_chunk_size: limits.max_chunk_size,
            max_body_size: limits.max_body_size,
            max_trailers_count: limits.max_headers_count,
            piece_size: limits.body_piece_size,
            remaining: 0,
            body_size: 0,
            trailer_count: 0,
        })
    }

    /// 新しいボディを開始し、最初のステージを返す
    pub(crate) fn begin(&mut self) -> StageId {
        self.remaining = 0;
        self.body_size = 0;
        self.trailer_count = 0;
        self.size_line
    }

    fn next_piece(&self, stages: &mut Stages) -> Result<StageId, Error> {
        stages[self.data].configure(
            ParseMode::FixedSize(self.remaining.min(self.piece_size)),
            self.piece_size,
        )?;
        Ok(self.data)
    }

    /// 完了したステージを処理し、次のステージを返す
    ///
    /// 終端 (トレーラーを含む) まで読み終えたら `None`
    pub(crate) fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        emit: &mut impl FnMut(ChunkedEvent),
    ) -> Result<Option<StageId>, Error> {
        if completed == self.size_line {
            let size = parse_chunk_size(stages[completed].parsed_content())?;
            if size == 0 {
                return Ok(Some(self.trailer));
            }
            if size > self.max_chunk_size {
                return Err(Error::CapacityExceeded {
                    size,
                    limit: self.max_chunk_size,
                });
            }
            let total = self.body_size.checked_add(size).ok_or(Error::Overflow)?;
            if total > self.max_body_size {
                return Err(Error::CapacityExceeded {
                    size: total,
                    limit: self.max_body_size,
                });
            }
            self.remaining = size;
            return self.next_piece(stages).map(Some);
        }

        if completed == self.data {
            let piece = stages[completed].take_content();
            self.remaining -= piece.len();
            self.body_size += piece.len();
            emit(ChunkedEvent::Data(piece));
            if self.remaining > 0 {
                return self.next_piece(stages).map(Some);
            }
            return Ok(Some(self.crlf));
        }

        if completed == self.crlf {
            if stages[completed].parsed_content() != b"\r\n" {
                return Err(Error::MalformedFraming(
                    "missing CRLF after chunk data".to_string(),
                ));
            }
            return Ok(Some(self.size_line));
        }

        // トレーラー
        let line = stages[completed].take_content();
        if line.is_empty() {
            emit(ChunkedEvent::End);
            return Ok(None);
        }
        if self.trailer_count >= self.max_trailers_count {
            return Err(Error::CapacityExceeded {
                size: self.trailer_count + 1,
                limit: self.max_trailers_count,
            });
        }
        let (name, value) = parse_header_line(&line_to_string(line)?)?;
        self.trailer_count += 1;
        emit(ChunkedEvent::Trailer { name, value });
        Ok(Some(self.trailer))
    }
}

/// 単体の chunked ボディプロトコル
#[derive(Debug, Clone)]
pub struct ChunkedProtocol {
    limits: DecoderLimits,
    body: Option<ChunkedBody>,
}

impl ChunkedProtocol {
    /// 制限を指定して作成
    pub fn new(limits: DecoderLimits) -> Self {
        Self { limits, body: None }
    }
}

impl Protocol for ChunkedProtocol {
    type Token = ChunkedEvent;

    fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
        self.limits.validate()?;
        let mut body = ChunkedBody::install(stages, &self.limits)?;
        let first = body.begin();
        self.body = Some(body);
        Ok(first)
    }

    fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        out: &mut VecDeque<Self::Token>,
    ) -> Result<Option<StageId>, Error> {
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig("chunked body is not initialized".to_string()))?;
        body.advance(completed, stages, &mut |event| out.push_back(event))
    }
}

/// chunked デコーダー (Sans I/O)
#[derive(Debug)]
pub struct ChunkedDecoder {
    pipeline: Pipeline<ChunkedProtocol>,
}

impl ChunkedDecoder {
    /// デフォルトの制限でデコーダーを作成
    pub fn new() -> Result<Self, Error> {
        Self::with_limits(DecoderLimits::default())
    }

    /// 制限付きでデコーダーを作成
    pub fn with_limits(limits: DecoderLimits) -> Result<Self, Error> {
        Ok(Self {
            pipeline: Pipeline::start(ChunkedProtocol::new(limits))?,
        })
    }

    /// データを投入
    ///
    /// 終端チャンクより後ろのデータは受け入れない
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.pipeline.feed(data)
    }

    /// ストリーム終了を通知
    ///
    /// 終端チャンクの前に終了した場合は [`Error::PrematureEndOfStream`]
    pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
        self.pipeline.end_of_stream()
    }

    /// 次のイベントを取り出す
    pub fn next_event(&mut self) -> Option<ChunkedEvent> {
        self.pipeline.next_token()
    }

    /// 終端まで読み終えたかどうか
    pub fn is_finished(&self) -> bool {
        self.pipeline.is_finished()
    }

    /// 溜まっているデータを `body` に追加し、トレーラーを返す
    pub fn read_body(&mut self, body: &mut Vec<u8>) -> Vec<(String, String)> {
        let mut trailers = Vec::new();
        for event in self.pipeline.drain_tokens() {
            match event {
                ChunkedEvent::Data(data) => body.extend_from_slice(&data),
                ChunkedEvent::Trailer { name, value } => trailers.push((name, value)),
                ChunkedEvent::End => {}
            }
        }
        trailers
    }
}

impl Sink for ChunkedDecoder {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.feed(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        ChunkedDecoder::end_of_stream(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_header() {
        assert_eq!(chunk_header(5, true).unwrap(), b"5\r\n");
        assert_eq!(chunk_header(255, false).unwrap(), b"\r\nff\r\n");
        assert_eq!(chunk_header(usize::MAX, true), Err(Error::Overflow));
        assert_eq!(chunk_header(usize::MAX - 3, true), Err(Error::Overflow));
    }

    #[test]
    fn test_encoder_empty_body() {
        let mut encoder = ChunkedEncoder::new(Vec::new());
        encoder.write(b"").unwrap();
        encoder.finish().unwrap();
        assert_eq!(encoder.get_ref(), b"0\r\n\r\n");
        assert!(encoder.is_finished());

        let e = encoder.write(b"late").unwrap_err();
        assert_eq!(e.error, Error::SinkClosed);
        assert_eq!(e.accepted, 0);
    }

    #[test]
    fn test_encode_chunks() {
        let encoded = encode_chunks(&[b"Wiki", b"", b"pedia"]).unwrap();
        assert_eq!(encoded, b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
    }

    #[test]
    fn test_decoder_with_trailers() {
        let mut decoder = ChunkedDecoder::new().unwrap();
        let input = b"4;ext=1\r\nWiki\r\n0\r\nExpires: never\r\n\r\nnext";
        let r = decoder.feed(input).unwrap();
        assert!(r.finished);
        assert_eq!(r.accepted, input.len() - 4);

        let mut body = Vec::new();
        let trailers = decoder.read_body(&mut body);
        assert_eq!(body, b"Wiki");
        assert_eq!(
            trailers,
            vec![("Expires".to_string(), "never".to_string())]
        );
    }

    #[test]
    fn test_decoder_splits_large_chunks() {
        let limits = DecoderLimits {
            body_piece_size: 4,
            ..Default::default()
        };
        let mut decoder = ChunkedDecoder::with_limits(limits).unwrap();
        decoder.feed(b"a\r\n0123456789\r\n0\r\n\r\n").unwrap();
        let events: Vec<_> = std::iter::from_fn(|| decoder.next_event()).collect();
        assert_eq!(
            events,
            vec![
                ChunkedEvent::Data(b"0123".to_vec()),
                ChunkedEvent::Data(b"4567".to_vec()),
                ChunkedEvent::Data(b"89".to_vec()),
                ChunkedEvent::End,
            ]
        );
    }

    #[test]
    fn test_decoder_errors() {
        let mut decoder = ChunkedDecoder::new().unwrap();
        let e = decoder.feed(b"zz\r\n").unwrap_err();
        assert_eq!(e.stage, "chunk-size");
        assert!(matches!(e.error, Error::MalformedFraming(_)));

        let mut decoder = ChunkedDecoder::new().unwrap();
        let e = decoder.feed(b"3\r\nabcX\r\n").unwrap_err();
        assert_eq!(e.stage, "chunk-crlf");

        let mut decoder = ChunkedDecoder::new().unwrap();
        let e = decoder.feed(b"fffffffffffffffffff\r\n").unwrap_err();
        assert_eq!(e.error, Error::Overflow);

        let limits = DecoderLimits {
            max_chunk_size: 8,
            ..Default::default()
        };
        let mut decoder = ChunkedDecoder::with_limits(limits).unwrap();
        let e = decoder.feed(b"9\r\n").unwrap_err();
        assert_eq!(e.error, Error::CapacityExceeded { size: 9, limit: 8 });

        let mut decoder = ChunkedDecoder::new().unwrap();
        decoder.feed(b"5\r\nhel").unwrap();
        let e = decoder.end_of_stream().unwrap_err();
        assert_eq!(e.error, Error::PrematureEndOfStream);
    }
}
