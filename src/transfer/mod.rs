//! Transfer layer: destination naming and the download-to-upload pipe.
//!
//! ```text
//! download URL ──▶ Downloader ──▶ SourceBody ──▶ pipe() ──▶ ObjectWriter ──▶ bucket
//!                                                  ▲
//!                     resolve_object_name() ───────┘ (object key)
//! ```

mod naming;
mod source;
mod streamer;

pub use naming::{now_millis, resolve_object_name, OverwritePolicy};
pub use source::{
    ChunkStream, Downloader, HttpDownloader, SourceBody, DEFAULT_TRANSFER_TIMEOUT, TCP_KEEPALIVE,
};
pub use streamer::{pipe, CHANNEL_CAPACITY};
