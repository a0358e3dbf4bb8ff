//! UDP 上の OSC。アドレスパターン、ディスパッチ、送受信と特徴量メッセージ

pub mod address;
pub mod message;
pub mod router;
pub mod transport;

pub use address::AddressPattern;
pub use message::Feature;
pub use router::{DispatchReport, Handler, Router};
pub use transport::{encode_message, OscPublisher, OscServer, ServerState};
