//! 書き込み先の抽象
//!
//! バッファ、ステージ、パイプライン、chunked エンコーダーはすべて [`Sink`] を実装し、
//! 受け入れたバイト数と終了状態を呼び出し側へ返す。

use crate::error::{Error, WriteError};

/// 書き込み結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteResult {
    /// 受け入れたバイト数 (提示したバイト数以下)
    pub accepted: usize,
    /// これ以上のデータは不要
    pub finished: bool,
}

impl WriteResult {
    /// 続きのデータを待っている結果
    pub fn more(accepted: usize) -> Self {
        Self {
            accepted,
            finished: false,
        }
    }

    /// 完了した結果
    pub fn finished(accepted: usize) -> Self {
        Self {
            accepted,
            finished: true,
        }
    }
}

/// バイト列の書き込み先
///
/// 失敗時は [`WriteError::accepted`] に失敗までに受け入れたバイト数が入る。
pub trait Sink {
    /// データを書き込む
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError>;

    /// これ以上データが来ないことを通知する
    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

impl Sink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        self.extend_from_slice(data);
        Ok(WriteResult::more(data.len()))
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        (**self).write(data)
    }

    fn end_of_stream(&mut self) -> Result<(), WriteError> {
        (**self).end_of_stream()
    }
}

/// すべてのデータを書き込む
///
/// 書き込み先が途中で終了した場合は [`Error::SinkClosed`] を返す。
pub fn write_all<S: Sink + ?Sized>(sink: &mut S, data: &[u8]) -> Result<(), WriteError> {
    let mut offset = 0;
    while offset < data.len() {
        let result = sink
            .write(&data[offset..])
            .map_err(|e| {
                let accepted = offset + e.accepted;
                e.with_accepted(accepted)
            })?;
        offset += result.accepted;
        if offset < data.len() && (result.finished || result.accepted == 0) {
            return Err(WriteError::new(offset, "sink", Error::SinkClosed));
        }
    }
    Ok(())
}
