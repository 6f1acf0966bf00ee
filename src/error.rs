use std::fmt;

/// フレーミングエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// ステージの上限に達した
    ///
    /// `size` は受け入れようとしたサイズ、`limit` は上限
    CapacityExceeded { size: usize, limit: usize },
    /// フレーミングとして不正なデータ
    MalformedFraming(String),
    /// ステージの完了前にストリームが終了した
    PrematureEndOfStream,
    /// 長さ計算のオーバーフロー
    Overflow,
    /// 不正な設定
    InvalidConfig(String),
    /// 書き込み先がこれ以上データを受け付けない
    SinkClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CapacityExceeded { size, limit } => {
                write!(f, "capacity exceeded: {} > {}", size, limit)
            }
            Error::MalformedFraming(msg) => write!(f, "malformed framing: {}", msg),
            Error::PrematureEndOfStream => write!(f, "premature end of stream"),
            Error::Overflow => write!(f, "length overflow"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Error::SinkClosed => write!(f, "sink closed"),
        }
    }
}

impl std::error::Error for Error {}

/// 書き込み失敗
///
/// 失敗までに消費したバイト数と、失敗したステージ名を保持する。
/// 呼び出し側は `accepted` を使って入力のどこまでが処理済みかを把握できる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// 失敗までに受け入れたバイト数
    pub accepted: usize,
    /// 失敗したステージ名
    pub stage: &'static str,
    /// エラー本体
    pub error: Error,
}

impl WriteError {
    /// 新しい書き込みエラーを作成
    pub fn new(accepted: usize, stage: &'static str, error: Error) -> Self {
        Self {
            accepted,
            stage,
            error,
        }
    }

    /// 受け入れバイト数を差し替える
    pub(crate) fn with_accepted(mut self, accepted: usize) -> Self {
        self.accepted = accepted;
        self
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (stage: {}, accepted: {} bytes)",
            self.error, self.stage, self.accepted
        )
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        e.error
    }
}
