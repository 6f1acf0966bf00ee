//! サブパーサー (ステージ)
//!
//! ステージは 1 つの構文単位 (固定長ブロック、区切り文字で終わるトークン、
//! 複数候補の区切り文字のいずれか) を認識する。
//! 入力がどのように分割されて届いても同じ結果になるように、
//! 区切り文字の途中で入力が途切れた場合は末尾を未確定として保持し、次の入力と合わせて再走査する。
//!
//! ```rust
//! use shiguredo_framing::{ParseMode, Stage};
//!
//! let mut stage = Stage::new("line", ParseMode::delimiter(b"\r\n"), 1024).unwrap();
//!
//! // 区切り文字が 2 回の入力にまたがる
//! let r = stage.feed(b"foo\r").unwrap();
//! assert!(!r.finished);
//! let r = stage.feed(b"\nbar").unwrap();
//! assert!(r.finished);
//! // "bar" は次のステージのために残される
//! assert_eq!(r.accepted, 1);
//! assert_eq!(stage.parsed_content(), b"foo");
//! ```

use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::error::{Error, WriteError};
use crate::sink::{Sink, WriteResult};

/// パースモード
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMode {
    /// 指定バイト数が揃ったら完了
    FixedSize(usize),
    /// 区切り文字が現れたら完了
    SingleDelimiter(Vec<u8>),
    /// いずれかの区切り文字が現れたら完了
    ///
    /// 開始位置が最も早いものが優先され、同じ位置なら長いものが優先される
    MultiDelimiter(Vec<Vec<u8>>),
}

impl ParseMode {
    /// 単一の区切り文字モードを作成
    pub fn delimiter(delimiter: &[u8]) -> Self {
        ParseMode::SingleDelimiter(delimiter.to_vec())
    }

    /// 複数の区切り文字モードを作成
    pub fn delimiters(delimiters: &[&[u8]]) -> Self {
        ParseMode::MultiDelimiter(delimiters.iter().map(|d| d.to_vec()).collect())
    }

    /// 区切り文字の一覧 (固定長モードでは空)
    pub(crate) fn delimiter_set(&self) -> &[Vec<u8>] {
        match self {
            ParseMode::FixedSize(_) => &[],
            ParseMode::SingleDelimiter(d) => std::slice::from_ref(d),
            ParseMode::MultiDelimiter(set) => set,
        }
    }

    fn validate(&self, max_size: usize) -> Result<(), Error> {
        if let ParseMode::FixedSize(n) = self {
            if *n > max_size {
                return Err(Error::CapacityExceeded {
                    size: *n,
                    limit: max_size,
                });
            }
            return Ok(());
        }

        let set = self.delimiter_set();
        if set.is_empty() {
            return Err(Error::InvalidConfig("empty delimiter set".to_string()));
        }
        for d in set {
            if d.is_empty() {
                return Err(Error::InvalidConfig("empty delimiter".to_string()));
            }
            if d.len() > max_size {
                return Err(Error::InvalidConfig(format!(
                    "delimiter length {} exceeds max size {}",
                    d.len(),
                    max_size
                )));
            }
        }
        Ok(())
    }
}

/// ステージの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// データ待ち
    NeedMoreData,
    /// 完了
    Done,
    /// 失敗
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Active,
    Done,
    Failed(Error),
}

/// 区切り文字の走査結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// `pos` で `index` 番目の区切り文字が確定
    Found { pos: usize, index: usize },
    /// `pos` で始まる候補が入力の末尾で途切れている
    Undecided { pos: usize },
    /// `from` 以降に候補なし
    NotFound,
}

/// `from` 以降で区切り文字を探す
///
/// `at_end` が true の場合は末尾で途切れた候補を考慮しない。
/// 上限 `limit` に収まらない候補も考慮しない。
fn scan(
    haystack: &[u8],
    from: usize,
    delimiters: &[Vec<u8>],
    limit: usize,
    at_end: bool,
) -> Scan {
    for pos in from..haystack.len() {
        let rest = &haystack[pos..];
        let mut best: Option<usize> = None;
        let mut pending_len = 0;
        for (index, d) in delimiters.iter().enumerate() {
            if rest.starts_with(d) {
                if best.is_none_or(|b| d.len() > delimiters[b].len()) {
                    best = Some(index);
                }
            } else if !at_end
                && rest.len() < d.len()
                && d.starts_with(rest)
                && d.len() <= limit - pos
            {
                pending_len = pending_len.max(d.len());
            }
        }
        match best {
            Some(index) if pending_len <= delimiters[index].len() => {
                return Scan::Found { pos, index };
            }
            Some(_) => return Scan::Undecided { pos },
            None if pending_len > 0 => return Scan::Undecided { pos },
            None => {}
        }
    }
    Scan::NotFound
}

/// サブパーサー
///
/// 上限 `max_size` はステージが消費するバイト数 (区切り文字を含む) の上限。
/// 完了後に再利用するには [`Stage::reset`] を呼ぶ。
#[derive(Debug, Clone)]
pub struct Stage {
    name: &'static str,
    mode: ParseMode,
    buf: Buffer,
    /// 区切り文字を除いたコンテンツ長
    content_len: usize,
    matched: Option<usize>,
    state: State,
    /// 区切り文字がまだ始まり得る最初の位置
    scan_from: usize,
    /// 受け入れ済みだが区切り文字の後ろにあったバイト列
    excess: Vec<u8>,
    completes_at_end_of_stream: bool,
    ended_by_end_of_stream: bool,
}

impl Stage {
    /// 新しいステージを作成
    pub fn new(name: &'static str, mode: ParseMode, max_size: usize) -> Result<Self, Error> {
        mode.validate(max_size)?;
        let mut stage = Self {
            name,
            mode,
            buf: Buffer::new(max_size),
            content_len: 0,
            matched: None,
            state: State::Active,
            scan_from: 0,
            excess: Vec::new(),
            completes_at_end_of_stream: false,
            ended_by_end_of_stream: false,
        };
        stage.reset();
        Ok(stage)
    }

    /// ストリーム終了を完了として扱うかを設定して返す
    pub fn with_end_of_stream_completion(mut self, completes: bool) -> Self {
        self.completes_at_end_of_stream = completes;
        self
    }

    /// パースモードと上限を設定し直す
    ///
    /// サイクルの途中で呼んではならない。呼ぶとステージはリセットされる。
    pub fn configure(&mut self, mode: ParseMode, max_size: usize) -> Result<(), Error> {
        mode.validate(max_size)?;
        self.mode = mode;
        self.buf.clear();
        self.buf.set_limit(max_size)?;
        self.reset();
        Ok(())
    }

    /// ストリーム終了を完了として扱うかを設定
    pub fn set_completes_at_end_of_stream(&mut self, completes: bool) {
        self.completes_at_end_of_stream = completes;
    }

    /// 次のサイクルのためにリセット
    ///
    /// モードと上限は維持される
    pub fn reset(&mut self) {
        self.buf.clear();
        self.content_len = 0;
        self.matched = None;
        self.scan_from = 0;
        self.excess.clear();
        self.ended_by_end_of_stream = false;
        self.state = if self.mode == ParseMode::FixedSize(0) {
            State::Done
        } else {
            State::Active
        };
    }

    /// ステージ名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 現在のパースモード
    pub fn mode(&self) -> &ParseMode {
        &self.mode
    }

    /// 上限
    pub fn max_size(&self) -> usize {
        self.buf.limit()
    }

    /// 状態
    pub fn status(&self) -> StageStatus {
        match self.state {
            State::Active => StageStatus::NeedMoreData,
            State::Done => StageStatus::Done,
            State::Failed(_) => StageStatus::Failed,
        }
    }

    /// 完了したかどうか
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// 失敗した場合のエラー
    pub fn error(&self) -> Option<&Error> {
        match &self.state {
            State::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// このサイクルで消費したバイト数
    pub fn consumed(&self) -> usize {
        self.buf.len()
    }

    /// データを投入
    ///
    /// 区切り文字より後ろのバイトは受け入れない。
    /// 完了済みのステージは何も受け入れずに `finished` を返す。
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        match &self.state {
            State::Done => return Ok(WriteResult::finished(0)),
            State::Failed(e) => return Err(WriteError::new(0, self.name, e.clone())),
            State::Active => {}
        }

        match self.mode {
            ParseMode::FixedSize(n) => self.feed_fixed(n, data),
            _ => self.feed_delimited(data),
        }
    }

    fn feed_fixed(&mut self, n: usize, data: &[u8]) -> Result<WriteResult, WriteError> {
        let take = (n - self.buf.len()).min(data.len());
        if let Err(overflow) = self.buf.append(&data[..take]) {
            return Err(self.fail(overflow.accepted, overflow.into()));
        }
        if self.buf.len() == n {
            self.content_len = n;
            self.state = State::Done;
            trace!(stage = self.name, size = n, "fixed-size stage completed");
            Ok(WriteResult::finished(take))
        } else {
            Ok(WriteResult::more(take))
        }
    }

    fn feed_delimited(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        let old_len = self.buf.len();
        let overflow = self.buf.append(data).err();
        let appended = self.buf.len() - old_len;

        match scan(
            self.buf.as_slice(),
            self.scan_from,
            self.mode.delimiter_set(),
            self.buf.limit(),
            false,
        ) {
            Scan::Found { pos, index } => {
                let accepted = self.complete_match(pos, index, old_len);
                return Ok(WriteResult::finished(accepted));
            }
            Scan::Undecided { pos } => self.scan_from = pos,
            Scan::NotFound => self.scan_from = self.buf.len(),
        }

        match overflow {
            Some(overflow) => Err(self.fail(overflow.accepted, overflow.into())),
            None => Ok(WriteResult::more(appended)),
        }
    }

    /// 区切り文字の一致を確定させ、今回の入力から受け入れたバイト数を返す
    fn complete_match(&mut self, pos: usize, index: usize, old_len: usize) -> usize {
        let end = pos + self.mode.delimiter_set()[index].len();
        let accepted = if end >= old_len {
            end - old_len
        } else {
            // 以前の入力で受け入れた分が区切り文字の後ろに残った
            self.excess
                .extend_from_slice(&self.buf.as_slice()[end..old_len]);
            0
        };
        self.buf.truncate(end);
        self.content_len = pos;
        self.matched = Some(index);
        self.state = State::Done;
        trace!(
            stage = self.name,
            content_len = pos,
            delimiter = index,
            "delimiter stage completed"
        );
        accepted
    }

    fn fail(&mut self, accepted: usize, error: Error) -> WriteError {
        debug!(stage = self.name, accepted, %error, "stage failed");
        self.state = State::Failed(error.clone());
        WriteError::new(accepted, self.name, error)
    }

    /// ストリーム終了を通知
    ///
    /// 区切り文字モードでは末尾を確定したものとして走査し直す。
    /// それでも完了しない場合、終了を完了として扱うステージは保持中のデータで完了し、
    /// それ以外は [`Error::PrematureEndOfStream`] で失敗する。
    pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
        match &self.state {
            State::Done => return Ok(()),
            State::Failed(e) => return Err(WriteError::new(0, self.name, e.clone())),
            State::Active => {}
        }

        if let Scan::Found { pos, index } = scan(
            self.buf.as_slice(),
            self.scan_from,
            self.mode.delimiter_set(),
            self.buf.limit(),
            true,
        ) {
            let len = self.buf.len();
            self.complete_match(pos, index, len);
            return Ok(());
        }

        if self.completes_at_end_of_stream {
            self.content_len = self.buf.len();
            self.ended_by_end_of_stream = true;
            self.state = State::Done;
            trace!(
                stage = self.name,
                content_len = self.content_len,
                "stage completed by end of stream"
            );
            return Ok(());
        }

        Err(self.fail(0, Error::PrematureEndOfStream))
    }

    /// ストリーム終了によって完了したかどうか
    pub fn ended_by_end_of_stream(&self) -> bool {
        self.ended_by_end_of_stream
    }

    /// パース済みコンテンツ (区切り文字を含まない)
    pub fn parsed_content(&self) -> &[u8] {
        &self.buf.as_slice()[..self.content_len]
    }

    /// パース済みコンテンツを取り出す
    pub fn take_content(&mut self) -> Vec<u8> {
        self.buf.truncate(self.content_len);
        self.content_len = 0;
        self.buf.drain()
    }

    /// 一致した区切り文字
    pub fn matched_delimiter(&self) -> Option<&[u8]> {
        self.matched
            .map(|index| self.mode.delimiter_set()[index].as_slice())
    }

    /// 一致した区切り文字の番号
    pub fn matched_index(&self) -> Option<usize> {
        self.matched
    }

    /// 次のステージに引き渡すべきバイト列を取り出す
    pub(crate) fn take_excess(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.excess)
    }
}

impl Sink for Stage {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.feed(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        Stage::end_of_stream(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crlf_stage(max_size: usize) -> Stage {
        Stage::new("test", ParseMode::delimiter(b"\r\n"), max_size).unwrap()
    }

    #[test]
    fn test_capacity_guard() {
        let mut stage = crlf_stage(10);
        let e = stage.feed(b"0123456789a").unwrap_err();
        assert_eq!(e.accepted, 10);
        assert_eq!(e.stage, "test");
        assert_eq!(e.error, Error::CapacityExceeded { size: 11, limit: 10 });
        assert_eq!(stage.status(), StageStatus::Failed);

        // 失敗後は何も受け入れない
        let e = stage.feed(b"\r\n").unwrap_err();
        assert_eq!(e.accepted, 0);
    }

    #[test]
    fn test_delimiter_split_across_feeds() {
        let mut stage = crlf_stage(64);
        assert_eq!(stage.feed(b"foo\r").unwrap(), WriteResult::more(4));
        assert_eq!(stage.feed(b"\nbar").unwrap(), WriteResult::finished(1));
        assert_eq!(stage.parsed_content(), b"foo");
        assert_eq!(stage.matched_delimiter(), Some(&b"\r\n"[..]));

        let mut single = crlf_stage(64);
        assert_eq!(single.feed(b"foo\r\nbar").unwrap(), WriteResult::finished(5));
        assert_eq!(single.parsed_content(), b"foo");
    }

    #[test]
    fn test_overlapping_candidate() {
        let mut stage = crlf_stage(64);
        stage.feed(b"a\r\r").unwrap();
        let r = stage.feed(b"\nz").unwrap();
        assert_eq!(r, WriteResult::finished(1));
        assert_eq!(stage.parsed_content(), b"a\r");
    }

    #[test]
    fn test_delimiter_byte_by_byte() {
        let mut stage = Stage::new("b", ParseMode::delimiter(b"\r\n--xyz"), 64).unwrap();
        let input = b"hello\r\n--xy\r\n--xyzrest";
        let mut accepted = 0;
        for b in input.iter() {
            let r = stage.feed(std::slice::from_ref(b)).unwrap();
            accepted += r.accepted;
            if r.finished {
                break;
            }
        }
        assert_eq!(stage.parsed_content(), b"hello\r\n--xy");
        assert_eq!(accepted, input.len() - 4);
    }

    #[test]
    fn test_multi_delimiter_earliest_then_longest() {
        let mut stage = Stage::new(
            "end",
            ParseMode::delimiters(&[b"--\r\n", b"\r\n"]),
            16,
        )
        .unwrap();
        stage.feed(b"--\r\nnext").unwrap();
        assert_eq!(stage.matched_index(), Some(0));
        assert_eq!(stage.parsed_content(), b"");

        stage.reset();
        stage.feed(b"\r\n--").unwrap();
        assert_eq!(stage.matched_index(), Some(1));

        // 同じ位置なら長い方
        let mut stage = Stage::new("p", ParseMode::delimiters(&[b"\r", b"\r\n"]), 16).unwrap();
        assert_eq!(stage.feed(b"ab\r").unwrap(), WriteResult::more(3));
        assert_eq!(stage.feed(b"\nc").unwrap(), WriteResult::finished(1));
        assert_eq!(stage.matched_delimiter(), Some(&b"\r\n"[..]));
        assert_eq!(stage.parsed_content(), b"ab");
    }

    #[test]
    fn test_shorter_match_at_capacity() {
        // 上限 3 では "\r\n" は収まらないので "\r" で確定する
        let mode = ParseMode::delimiters(&[b"\r", b"\r\n"]);
        let mut stage = Stage::new("p", mode.clone(), 3).unwrap();
        assert_eq!(stage.feed(b"ab\rX").unwrap(), WriteResult::finished(3));
        assert_eq!(stage.parsed_content(), b"ab");
        assert_eq!(stage.matched_delimiter(), Some(&b"\r"[..]));

        let mut split = Stage::new("p", mode, 3).unwrap();
        assert_eq!(split.feed(b"ab\r").unwrap(), WriteResult::finished(3));
        assert_eq!(split.parsed_content(), b"ab");
        assert_eq!(split.matched_index(), Some(0));
    }

    #[test]
    fn test_shorter_match_after_undecided_returns_excess() {
        let mut stage = Stage::new("p", ParseMode::delimiters(&[b"\r", b"\r\n\r\n"]), 16).unwrap();
        assert_eq!(stage.feed(b"a\r\n").unwrap(), WriteResult::more(3));
        // 長い候補が外れたので短い方で確定し、受け入れ済みの "\n" は次へ引き渡す
        assert_eq!(stage.feed(b"x").unwrap(), WriteResult::finished(0));
        assert_eq!(stage.parsed_content(), b"a");
        assert_eq!(stage.take_excess(), b"\n");
    }

    #[test]
    fn test_fixed_size() {
        let mut stage = Stage::new("data", ParseMode::FixedSize(5), 5).unwrap();
        assert_eq!(stage.feed(b"abc").unwrap(), WriteResult::more(3));
        assert_eq!(stage.feed(b"defgh").unwrap(), WriteResult::finished(2));
        assert_eq!(stage.parsed_content(), b"abcde");
        assert_eq!(stage.matched_delimiter(), None);
    }

    #[test]
    fn test_fixed_size_zero_completes_immediately() {
        let mut stage = Stage::new("empty", ParseMode::FixedSize(0), 0).unwrap();
        assert!(stage.is_done());
        assert_eq!(stage.feed(b"abc").unwrap(), WriteResult::finished(0));
        assert_eq!(stage.parsed_content(), b"");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Stage::new("x", ParseMode::delimiter(b""), 10),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Stage::new("x", ParseMode::MultiDelimiter(Vec::new()), 10),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Stage::new("x", ParseMode::delimiter(b"abcdef"), 3),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(
            Stage::new("x", ParseMode::FixedSize(11), 10).unwrap_err(),
            Error::CapacityExceeded { size: 11, limit: 10 }
        );
    }

    #[test]
    fn test_reset_and_reconfigure() {
        let mut stage = crlf_stage(32);
        stage.feed(b"one\r\n").unwrap();
        assert!(stage.is_done());
        assert_eq!(stage.take_content(), b"one");

        stage.reset();
        assert_eq!(stage.status(), StageStatus::NeedMoreData);
        stage.feed(b"two\r\n").unwrap();
        assert_eq!(stage.parsed_content(), b"two");

        stage
            .configure(ParseMode::delimiters(&[b"--\r\n", b"\r\n"]), 4)
            .unwrap();
        assert_eq!(stage.max_size(), 4);
        stage.feed(b"--\r\n").unwrap();
        assert_eq!(stage.matched_index(), Some(0));
    }

    #[test]
    fn test_end_of_stream() {
        // 終了を完了として扱わないステージ
        let mut stage = crlf_stage(32);
        stage.feed(b"partial").unwrap();
        let e = stage.end_of_stream().unwrap_err();
        assert_eq!(e.error, Error::PrematureEndOfStream);

        // 終了を完了として扱うステージ
        let mut stage = crlf_stage(32).with_end_of_stream_completion(true);
        stage.feed(b"partial").unwrap();
        stage.end_of_stream().unwrap();
        assert!(stage.ended_by_end_of_stream());
        assert_eq!(stage.parsed_content(), b"partial");

        // 末尾で保留していた短い区切り文字が確定する
        let mut stage = Stage::new("p", ParseMode::delimiters(&[b"\r", b"\r\n"]), 16).unwrap();
        stage.feed(b"ab\r").unwrap();
        stage.end_of_stream().unwrap();
        assert!(!stage.ended_by_end_of_stream());
        assert_eq!(stage.matched_delimiter(), Some(&b"\r"[..]));
        assert_eq!(stage.parsed_content(), b"ab");
    }
}
