pub use ilidar_link_tokio_transport::{TcpTransport, TcpTransportFactory};
pub use linkcore::net::{Transport, TransportEvent, TransportFactory};
