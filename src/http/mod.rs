//! HTTP/1.x メッセージのフレーミング (RFC 9112)
//!
//! スタートライン、ヘッダー、ボディをイベントとして順に取り出す。
//! ヘッダーの意味解釈は行わず、ボディの長さを決めるのに必要なヘッダーだけを見る。
//!
//! ```rust
//! use shiguredo_framing::http::{BodyKind, HttpEvent, RequestDecoder};
//!
//! let mut decoder = RequestDecoder::new().unwrap();
//! decoder
//!     .feed(b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
//!     .unwrap();
//!
//! let events: Vec<_> = std::iter::from_fn(|| decoder.next_event()).collect();
//! assert!(matches!(events[0], HttpEvent::RequestLine(_)));
//! assert_eq!(events[2], HttpEvent::HeadersComplete(BodyKind::ContentLength(5)));
//! assert_eq!(events[3], HttpEvent::Body(b"hello".to_vec()));
//! assert_eq!(events[4], HttpEvent::MessageComplete);
//! ```

mod decoder;
mod protocol;
pub(crate) mod syntax;

pub use decoder::{RequestDecoder, ResponseDecoder};
pub use protocol::{HttpProtocol, MessageKind};

/// リクエストライン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// HTTP メソッド (GET, POST, etc.)
    pub method: String,
    /// リクエストターゲット
    pub target: String,
    /// HTTP バージョン (HTTP/1.1 等)
    pub version: String,
}

/// ステータスライン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// HTTP バージョン (HTTP/1.1 等)
    pub version: String,
    /// ステータスコード (200, 404, etc.)
    pub status_code: u16,
    /// ステータスフレーズ (OK, Not Found, etc.)
    pub reason: String,
}

impl StatusLine {
    /// ステータスコードが情報レスポンス (1xx) か確認
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    /// ステータスコードからボディを持ち得るかを判定
    ///
    /// 1xx, 204, 304 はボディなし
    pub fn allows_body(&self) -> bool {
        !(self.is_informational() || self.status_code == 204 || self.status_code == 304)
    }
}

/// ボディの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// ボディなし
    None,
    /// Content-Length で長さが決まる
    ContentLength(usize),
    /// Transfer-Encoding: chunked
    Chunked,
    /// 接続が閉じるまでがボディ (レスポンスのみ)
    CloseDelimited,
}

/// HTTP デコードのイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpEvent {
    /// リクエストライン
    RequestLine(RequestLine),
    /// ステータスライン
    StatusLine(StatusLine),
    /// ヘッダー
    Header { name: String, value: String },
    /// ヘッダーの終わり
    HeadersComplete(BodyKind),
    /// ボディの断片 (最大 `body_piece_size` バイト)
    Body(Vec<u8>),
    /// chunked ボディのトレーラー
    Trailer { name: String, value: String },
    /// メッセージの終わり
    MessageComplete,
}
