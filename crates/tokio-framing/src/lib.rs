//! tokio_framing - Tokio integration for shiguredo_framing
//!
//! `tokio::io::AsyncRead` から読み込んだバイト列をパイプラインに渡し、トークンを非同期に取り出す。
//!
//! ## 使い方
//!
//! ```ignore
//! use shiguredo_framing::{DecoderLimits, http::HttpProtocol};
//! use tokio_framing::FramedReader;
//!
//! let (reader, _writer) = stream.into_split();
//! let mut framed = FramedReader::new(reader, HttpProtocol::request(DecoderLimits::default()))?;
//! while let Some(event) = framed.next_token().await? {
//!     // HttpEvent を処理...
//! }
//! ```

pub mod error;
mod reader;

pub use error::{Error, Result};
pub use reader::{DEFAULT_READ_BUFFER_SIZE, FramedReader};
