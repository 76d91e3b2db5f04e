pub mod error;
pub mod framing;
pub mod net;
pub mod packet;
pub mod state;

pub use error::{ClientError, PacketError, Result};
pub use framing::{DecodePolicy, FrameDecoder, Framing, PrefixWidth};
pub use net::{Transport, TransportEvent, TransportFactory};
pub use state::{ConnectionState, Endpoint};
