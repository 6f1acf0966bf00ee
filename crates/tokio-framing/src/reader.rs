//! 非同期リーダーからトークンを取り出す

use shiguredo_framing::{Pipeline, Protocol};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::error::Result;

/// デフォルトの読み込みバッファサイズ
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// パイプラインを非同期リーダーにつないだもの
///
/// 1 接続につき 1 つ作成する。タイムアウトは呼び出し側で `tokio::time::timeout` などを使う。
pub struct FramedReader<R, P: Protocol> {
    reader: R,
    pipeline: Pipeline<P>,
    buf: Vec<u8>,
    /// パイプライン終了後に読み込んでしまったバイト列
    leftover: Vec<u8>,
    eof: bool,
}

impl<R, P> FramedReader<R, P>
where
    R: AsyncRead + Unpin,
    P: Protocol,
{
    /// リーダーとプロトコルから作成
    pub fn new(reader: R, protocol: P) -> Result<Self> {
        Self::with_capacity(DEFAULT_READ_BUFFER_SIZE, reader, protocol)
    }

    /// 読み込みバッファサイズを指定して作成
    pub fn with_capacity(capacity: usize, reader: R, protocol: P) -> Result<Self> {
        Ok(Self {
            reader,
            pipeline: Pipeline::start(protocol)?,
            buf: vec![0u8; capacity.max(1)],
            leftover: Vec::new(),
            eof: false,
        })
    }

    /// パイプライン
    pub fn pipeline(&self) -> &Pipeline<P> {
        &self.pipeline
    }

    /// パイプライン (可変)
    pub fn pipeline_mut(&mut self) -> &mut Pipeline<P> {
        &mut self.pipeline
    }

    /// パイプライン終了後に残った未処理のバイト列
    ///
    /// パイプラインが使わなかった受け入れ済みのバイト列も含む
    pub fn leftover(&self) -> &[u8] {
        &self.leftover
    }

    /// リーダー、パイプライン、未処理のバイト列に分解
    pub fn into_parts(self) -> (R, Pipeline<P>, Vec<u8>) {
        (self.reader, self.pipeline, self.leftover)
    }

    /// 次のトークンを取り出す
    ///
    /// トークンが溜まっていなければリーダーから読み込んでパイプラインに渡す。
    /// パイプラインが終了するか接続が閉じられてトークンが尽きたら `None` を返す。
    pub async fn next_token(&mut self) -> Result<Option<P::Token>> {
        loop {
            if let Some(token) = self.pipeline.next_token() {
                return Ok(Some(token));
            }
            if self.pipeline.is_finished() || self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                debug!("connection closed");
                self.eof = true;
                self.pipeline.end_of_stream()?;
                continue;
            }

            let result = self.pipeline.feed(&self.buf[..n])?;
            trace!(read = n, accepted = result.accepted, "fed pipeline");
            if self.pipeline.is_finished() {
                // 受け入れ済みでも使われなかったバイト列が先に並ぶ
                self.leftover.extend_from_slice(self.pipeline.carry_over());
            }
            if result.accepted < n {
                self.leftover.extend_from_slice(&self.buf[result.accepted..n]);
            }
        }
    }

    /// 終了までのトークンをすべて取り出す
    pub async fn collect_tokens(&mut self) -> Result<Vec<P::Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token().await? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}
