//! 上限付きの蓄積バッファ

use crate::error::{Error, WriteError};
use crate::sink::{Sink, WriteResult};

/// 上限超過
///
/// 入るだけのバイトは受け入れた上で返される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    /// 受け入れたバイト数
    pub accepted: usize,
    /// 追加しようとした結果のサイズ
    pub size: usize,
    /// 上限
    pub limit: usize,
}

impl From<Overflow> for Error {
    fn from(o: Overflow) -> Self {
        Error::CapacityExceeded {
            size: o.size,
            limit: o.limit,
        }
    }
}

/// 上限付きバッファ
///
/// `len() <= limit()` は常に成り立つ。上限を超える追加は収まる分だけ受け入れて [`Overflow`] を返す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    limit: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Buffer {
    /// 上限を指定してバッファを作成
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    /// 上限なしのバッファを作成
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// データを追加
    ///
    /// 上限に収まらない場合は収まる分だけ追加して `Overflow` を返す。
    pub fn append(&mut self, data: &[u8]) -> Result<usize, Overflow> {
        let room = self.remaining();
        if data.len() <= room {
            self.data.extend_from_slice(data);
            return Ok(data.len());
        }
        let size = self.data.len().saturating_add(data.len());
        self.data.extend_from_slice(&data[..room]);
        Err(Overflow {
            accepted: room,
            size,
            limit: self.limit,
        })
    }

    /// 現在のサイズ
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 上限
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 上限を変更
    ///
    /// 既に保持しているデータが新しい上限を超える場合はエラー
    pub fn set_limit(&mut self, limit: usize) -> Result<(), Error> {
        if self.data.len() > limit {
            return Err(Error::CapacityExceeded {
                size: self.data.len(),
                limit,
            });
        }
        self.limit = limit;
        Ok(())
    }

    /// 追加できる残りバイト数
    pub fn remaining(&self) -> usize {
        self.limit - self.data.len()
    }

    /// 保持しているデータ
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// 先頭が `pattern` と一致するか
    pub fn prefix_equals(&self, pattern: &[u8]) -> bool {
        self.data.starts_with(pattern)
    }

    /// 末尾が `pattern` と一致するか
    pub fn ends_with(&self, pattern: &[u8]) -> bool {
        self.data.ends_with(pattern)
    }

    /// 指定サイズに切り詰める
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// 先頭 `len` バイトを取り除く
    pub fn consume(&mut self, len: usize) {
        self.data.drain(..len.min(self.data.len()));
    }

    /// 中身を空にする
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// 中身を取り出して空にする
    ///
    /// バッファ自身の確保済み容量は維持される
    pub fn drain(&mut self) -> Vec<u8> {
        self.data.drain(..).collect()
    }

    /// 中身を UTF-8 文字列として取り出す
    pub fn drain_to_string(&mut self) -> Result<String, Error> {
        String::from_utf8(self.drain())
            .map_err(|e| Error::MalformedFraming(format!("invalid UTF-8: {e}")))
    }

    /// 中身を書き込み先へ流す
    ///
    /// 受け入れられた分だけバッファから取り除き、そのバイト数を返す
    pub fn drain_to<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, WriteError> {
        match sink.write(&self.data) {
            Ok(result) => {
                self.consume(result.accepted);
                Ok(result.accepted)
            }
            Err(e) => {
                self.consume(e.accepted);
                Err(e)
            }
        }
    }
}

impl Sink for Buffer {
    fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
        match self.append(data) {
            Ok(accepted) => Ok(WriteResult {
                accepted,
                finished: self.data.len() == self.limit,
            }),
            Err(overflow) => Err(WriteError::new(
                overflow.accepted,
                "buffer",
                overflow.into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_limit() {
        let mut buf = Buffer::new(8);
        assert_eq!(buf.append(b"abc"), Ok(3));
        assert_eq!(buf.append(b"de"), Ok(2));
        assert_eq!(buf.as_slice(), b"abcde");
        assert_eq!(buf.remaining(), 3);
    }

    #[test]
    fn test_append_overflow_keeps_fitting_prefix() {
        let mut buf = Buffer::new(4);
        buf.append(b"ab").unwrap();
        let overflow = buf.append(b"cdef").unwrap_err();
        assert_eq!(
            overflow,
            Overflow {
                accepted: 2,
                size: 6,
                limit: 4
            }
        );
        assert_eq!(buf.as_slice(), b"abcd");
        assert_eq!(
            Error::from(overflow),
            Error::CapacityExceeded { size: 6, limit: 4 }
        );
    }

    #[test]
    fn test_drain_keeps_capacity() {
        let mut buf = Buffer::new(1024);
        buf.append(&[1u8; 512]).unwrap();
        let capacity = buf.data.capacity();
        let drained = buf.drain();
        assert_eq!(drained.len(), 512);
        assert!(buf.is_empty());
        assert_eq!(buf.data.capacity(), capacity);
    }

    #[test]
    fn test_drain_to_string() {
        let mut buf = Buffer::unlimited();
        buf.append("ヘッダー".as_bytes()).unwrap();
        assert_eq!(buf.drain_to_string().unwrap(), "ヘッダー");

        buf.append(&[0xFF, 0xFE]).unwrap();
        assert!(matches!(
            buf.drain_to_string(),
            Err(Error::MalformedFraming(_))
        ));
    }

    #[test]
    fn test_drain_to_sink() {
        let mut buf = Buffer::unlimited();
        buf.append(b"hello").unwrap();
        let mut out = Vec::new();
        assert_eq!(buf.drain_to(&mut out).unwrap(), 5);
        assert_eq!(out, b"hello");
        assert!(buf.is_empty());

        // 小さいバッファへ流すと入りきらなかった分が残る
        buf.append(b"world").unwrap();
        let mut small = Buffer::new(3);
        let e = buf.drain_to(&mut small).unwrap_err();
        assert_eq!(e.accepted, 3);
        assert_eq!(small.as_slice(), b"wor");
        assert_eq!(buf.as_slice(), b"ld");
    }

    #[test]
    fn test_prefix_and_suffix() {
        let mut buf = Buffer::unlimited();
        buf.append(b"--boundary\r\n").unwrap();
        assert!(buf.prefix_equals(b"--"));
        assert!(!buf.prefix_equals(b"\r\n"));
        assert!(buf.ends_with(b"\r\n"));
    }

    #[test]
    fn test_set_limit() {
        let mut buf = Buffer::new(10);
        buf.append(b"abcdef").unwrap();
        assert!(buf.set_limit(4).is_err());
        buf.set_limit(6).unwrap();
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_sink_reports_full() {
        let mut buf = Buffer::new(3);
        let r = buf.write(b"abc").unwrap();
        assert_eq!(r, WriteResult::finished(3));
    }
}
