//! # shiguredo_framing
//!
//! ストリーミング向けのフレーミングライブラリ (Sans I/O)
//!
//! ## 特徴
//!
//! - **Sans I/O**: I/O を完全に分離した設計
//! - **分割不変**: 入力がどこで分割されて届いても同じ結果になる
//! - **上限付き**: すべてのステージに上限があり、バッファが際限なく増えることはない
//!
//! ## 構成
//!
//! - [`Stage`]: 固定長、区切り文字、複数の区切り文字のいずれかで 1 つの構文単位を認識する
//! - [`Pipeline`]: ステージを [`Protocol`] に従って切り替え、トークンを取り出す
//! - [`LineDecoder`]: `\n` / `\r` / `\r\n` で区切られた行
//! - [`ChunkedDecoder`] / [`ChunkedEncoder`]: HTTP chunked transfer encoding
//! - [`multipart::MultipartDecoder`]: MIME multipart
//! - [`http::RequestDecoder`] / [`http::ResponseDecoder`]: HTTP/1.x メッセージ
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_framing::{ChunkedDecoder, ChunkedEvent, encode_chunks};
//!
//! let encoded = encode_chunks(&[b"hello", b" world"]).unwrap();
//!
//! let mut decoder = ChunkedDecoder::new().unwrap();
//! // 1 バイトずつ届いても結果は同じ
//! for b in &encoded {
//!     decoder.feed(std::slice::from_ref(b)).unwrap();
//! }
//! let mut body = Vec::new();
//! decoder.read_body(&mut body);
//! assert_eq!(body, b"hello world");
//! assert!(decoder.is_finished());
//! ```

mod buffer;
mod chunked;
mod error;
pub mod http;
mod limits;
mod line;
pub mod multipart;
mod pipeline;
mod sink;
mod stage;

pub use buffer::{Buffer, Overflow};
pub use chunked::{
    ChunkedDecoder, ChunkedEncoder, ChunkedEvent, ChunkedProtocol, encode_chunks,
};
pub use error::{Error, WriteError};
pub use limits::DecoderLimits;
pub use line::{LineDecoder, LineProtocol};
pub use pipeline::{Pipeline, Protocol, StageId, Stages};
pub use sink::{Sink, WriteResult, write_all};
pub use stage::{ParseMode, Stage, StageStatus};
