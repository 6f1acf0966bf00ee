//! tokio-framing エラー型

use std::fmt;

use shiguredo_framing::WriteError;

/// tokio-framing エラー
#[derive(Debug)]
pub enum Error {
    /// I/O エラー
    Io(std::io::Error),
    /// フレーミングエラー
    Framing(WriteError),
    /// パイプラインの構築に失敗した
    Config(shiguredo_framing::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Framing(e) => write!(f, "framing error: {}", e),
            Error::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Framing(e) => Some(e),
            Error::Config(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        Error::Framing(e)
    }
}

impl From<shiguredo_framing::Error> for Error {
    fn from(e: shiguredo_framing::Error) -> Self {
        Error::Config(e)
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
