//! cloudtap-stream - the streaming side of cloudtap
//!
//! Opens the long-lived HTTP/1.1 event stream, verifies chunked framing,
//! splits the body into protocol lines, assembles [`cloudtap_core::EventRecord`]s
//! and hands each valid record to an [`cloudtap_core::EventSink`]. Failed
//! handshakes are retried up to a limit; idle or exhausted streams are
//! replaced transparently.

pub mod assembler;
pub mod chunked;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod handshake;
pub mod lines;
pub mod reconnect;
pub mod stats;
pub mod transport;

pub use assembler::EventAssembler;
pub use connection::{ReadEvent, StreamConnection};
pub use consumer::{Consumer, ConsumerHandle};
pub use error::{LastError, StreamError, StreamResult};
pub use reconnect::{Control, ReconnectPolicy};
pub use stats::{ConsumerMetrics, ConsumerStats};
pub use transport::{default_connector, BoxedStream, ByteStream, Connector, TcpConnector, TlsConnector};
