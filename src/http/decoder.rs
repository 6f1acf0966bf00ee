use crate::error::{Error, WriteError};
use crate::limits::DecoderLimits;
use crate::pipeline::Pipeline;
use crate::sink::{Sink, WriteResult};

use super::HttpEvent;
use super::protocol::HttpProtocol;

macro_rules! http_decoder {
    ($(#[$meta:meta])* $name:ident, $ctor:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            pipeline: Pipeline<HttpProtocol>,
        }

        impl $name {
            /// デフォルトの制限でデコーダーを作成
            pub fn new() -> Result<Self, Error> {
                Self::with_limits(DecoderLimits::default())
            }

            /// 制限付きでデコーダーを作成
            pub fn with_limits(limits: DecoderLimits) -> Result<Self, Error> {
                Ok(Self {
                    pipeline: Pipeline::start(HttpProtocol::$ctor(limits))?,
                })
            }

            /// 制限設定を取得
            pub fn limits(&self) -> &DecoderLimits {
                self.pipeline.protocol().limits()
            }

            /// データを投入
            pub fn feed(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
                self.pipeline.feed(data)
            }

            /// 接続終了を通知
            ///
            /// メッセージの途中で呼んだ場合は [`Error::PrematureEndOfStream`]。
            /// close-delimited ボディはここで完了する。
            pub fn end_of_stream(&mut self) -> Result<(), WriteError> {
                self.pipeline.end_of_stream()
            }

            /// 次のイベントを取り出す
            pub fn next_event(&mut self) -> Option<HttpEvent> {
                self.pipeline.next_token()
            }

            /// 取り出し待ちのイベントがあるかどうか
            pub fn has_events(&self) -> bool {
                self.pipeline.has_tokens()
            }

            /// メッセージの途中かどうか
            pub fn in_message(&self) -> bool {
                self.pipeline.protocol().in_message()
            }

            /// 接続終了まで読み終えたかどうか
            pub fn is_finished(&self) -> bool {
                self.pipeline.is_finished()
            }
        }

        impl Sink for $name {
            fn write(&mut self, data: &[u8]) -> Result<WriteResult, WriteError> {
                self.feed(data)
            }

            fn end_of_stream(&mut self) -> Result<(), WriteError> {
                $name::end_of_stream(self)
            }
        }
    };
}

http_decoder!(
    /// HTTP リクエストデコーダー (Sans I/O)
    ///
    /// サーバー側でクライアントからのリクエストをパースする際に使用
    RequestDecoder,
    request
);

http_decoder!(
    /// HTTP レスポンスデコーダー (Sans I/O)
    ///
    /// クライアント側でサーバーからのレスポンスをパースする際に使用
    ResponseDecoder,
    response
);

impl ResponseDecoder {
    /// 次のレスポンスを HEAD リクエストへのレスポンスとしてデコード (ボディなし)
    pub fn set_expect_no_body(&mut self, expect_no_body: bool) {
        self.pipeline
            .protocol_mut()
            .set_expect_no_body(expect_no_body);
    }
}
