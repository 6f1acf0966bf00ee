//! 行デコーダー
//!
//! `\n` または `\r` で終わる行を取り出す。`\r\n` は 1 つの改行として扱う。
//!
//! ```rust
//! use shiguredo_framing::LineDecoder;
//!
//! let mut decoder = LineDecoder::new().unwrap();
//! decoder.feed(b"a\nb\r\nc").unwrap();
//! assert_eq!(decoder.next_line(), Some(b"a".to_vec()));
//! assert_eq!(decoder.next_line(), Some(b"b".to_vec()));
//! // "c" は改行かストリーム終了を待っている
//! assert_eq!(decoder.next_line(), None);
//!
//! decoder.feed(b"\n").unwrap();
//! assert_eq!(decoder.next_line(), Some(b"c".to_vec()));
//! ```

use std::collections::VecDeque;

use crate::error::{Error, WriteError};
use crate::limits::{DecoderLimits, with_delimiter};
use crate::pipeline::{Pipeline, Protocol, StageId, Stages};
use crate::sink::{Sink, WriteResult};
use crate::stage::{ParseMode, Stage};

const LF: usize = 0;
const CR: usize = 1;

/// 行プロトコル
#[derive(Debug, Clone)]
pub struct LineProtocol {
    max_line_size: usize,
    /// 直前の行が `\r` で終わった
    after_cr: bool,
}

impl LineProtocol {
    /// 最大行長を指定して作成
    pub fn new(max_line_size: usize) -> Self {
        Self {
            max_line_size,
            after_cr: false,
        }
    }
}

impl Protocol for LineProtocol {
    type Token = Vec<u8>;

    fn init(&mut self, stages: &mut Stages) -> Result<StageId, Error> {
        self.after_cr = false;
        let stage = Stage::new(
            "line",
            ParseMode::delimiters(&[b"\n", b"\r"]),
            with_delimiter(self.max_line_size, 1),
        )?
        .with_end_of_stream_completion(true);
        Ok(stages.add(stage))
    }

    fn advance(
        &mut self,
        completed: StageId,
        stages: &mut Stages,
        out: &mut VecDeque<Self::Token>,
    ) -> Result<Option<StageId>, Error> {
        let stage = &mut stages[completed];
        let terminator = stage.matched_index();
        let ended = stage.ended_by_end_of_stream();
        let line = stage.take_content();

        if ended {
            if !line.is_empty() {
                out.push_back(line);
            }
            return Ok(None);
        }

        // "\r\n" の "\n" 側は空行として現れるので捨てる
        let crlf_tail = self.after_cr && terminator == Some(LF) && line.is_empty();
        self.after_cr = terminator == Some(CR);
        if !crlf_tail {
            out.push_back(line);
        }
        Ok(Some(completed))
    }
}

/// 行デコーダー (Sans I/O)
#[derive(Debug)]
pub struct LineDecoder {
    pipeline: Pipeline<LineProtocol>,
}

impl LineDecoder {
    /// デフォルトの制限でデコーダーを作成
    pub fn new() -> Result<Self, Error> {
        Self::with_limits(DecoderLimits::default())
    }

    /// 制限付きでデコーダーを作成
    pub fn with_limits(limits: DecoderLimits) -> Result<Self, Error> {
        Self::with_max_line_size(limits.max_line_size)
    }

    /// 最大行長を指定してデコーダーを作成
    pub fn with_max_line_size(max_line_size: usize) -> Result<Self, Error> {
        Ok(Self {
            pipeline: Pipeline::start(LineProtocol::new(max_line_size))?,
        })
    }

    /// データを投入
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.pipeline.feed(data)
    }

    /// ストリーム終了を通知
    ///
    /// 改行で終わっていない行が残っていれば最後の行として取り出せるようになる
    pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
        self.pipeline.end_of_stream()
    }

    /// 次の行を取り出す (改行文字を含まない)
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        self.pipeline.next_token()
    }

    /// 次の行を UTF-8 文字列として取り出す
    pub fn next_line_str(&mut self) -> Option<Result<String, Error>> {
        self.next_line().map(|line| {
            String::from_utf8(line)
                .map_err(|e| Error::MalformedFraming(format!("invalid UTF-8: {e}")))
        })
    }

    /// 取り出し待ちの行があるかどうか
    pub fn has_lines(&self) -> bool {
        self.pipeline.has_tokens()
    }

    /// ストリーム終了後、すべての行を取り出し終えたかどうか
    pub fn is_finished(&self) -> bool {
        self.pipeline.is_finished() && !self.pipeline.has_tokens()
    }

    /// 改行待ちのバイト数
    pub fn pending(&self) -> usize {
        self.pipeline
            .current_stage()
            .map(|stage| stage.consumed())
            .unwrap_or(0)
    }
}

impl Sink for LineDecoder {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.feed(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        LineDecoder::end_of_stream(self)
    }
}
