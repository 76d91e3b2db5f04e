use crate::client::SocketClient;
use bytes::Bytes;
use linkcore::packet::{DEFAULT_CHUNK_SIZE, DataPacket, DataType};
use linkcore::{ClientError, ConnectionState, Result};
use log::debug;

impl SocketClient {
    /// Streams `data` to the peer as sequenced upload packets of at most
    /// `chunk_size` payload bytes. All packets of one file are queued
    /// back to back. Returns the number of packets queued.
    pub fn send_file(
        &self,
        data_type: DataType,
        file_name: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<usize> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let packets = DataPacket::chunks(data_type, file_name, data, chunk_size)?;
        let encoded = packets
            .iter()
            .map(|p| p.encode().map(Bytes::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let count = encoded.len();

        self.send_all(encoded)?;
        debug!(
            target: "SocketClient/Upload",
            "Queued {file_name} ({} bytes) as {count} packets",
            data.len()
        );
        Ok(count)
    }

    pub fn send_jpg(&self, file_name: &str, data: &[u8]) -> Result<usize> {
        self.send_file(DataType::Jpg, file_name, data, DEFAULT_CHUNK_SIZE)
    }

    pub fn send_bin(&self, file_name: &str, data: &[u8]) -> Result<usize> {
        self.send_file(DataType::Bin, file_name, data, DEFAULT_CHUNK_SIZE)
    }

    pub fn send_csv(&self, file_name: &str, data: &[u8]) -> Result<usize> {
        self.send_file(DataType::Csv, file_name, data, DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use crate::client::SocketClient;
    use crate::config::ClientConfig;
    use crate::transport::mock::MockTransportFactory;
    use linkcore::packet::{DataType, PacketDecoder};
    use linkcore::{ClientError, PacketError};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_send_file_streams_sequenced_packets() {
        let (factory, mut peers) = MockTransportFactory::new();
        let client = SocketClient::new(ClientConfig::default(), Arc::new(factory));

        assert!(matches!(
            client.send_bin("depth.bin", &[1, 2, 3]),
            Err(ClientError::NotConnected)
        ));

        let (tx, mut connected) = mpsc::unbounded_channel();
        client.set_connection_handler(move |ok| {
            let _ = tx.send(ok);
        });
        client.connect("10.0.0.5", 5678).unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert!(connected.recv().await.unwrap());

        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        assert_eq!(client.send_jpg("frame_0001.jpg", &data).unwrap(), 3);

        let mut decoder = PacketDecoder::new();
        let mut packets = Vec::new();
        while packets.len() < 3 {
            decoder.feed(&peer.next_write().await);
            while let Some(packet) = decoder.decode_packet().unwrap() {
                packets.push(packet);
            }
        }

        assert!(packets.iter().all(|p| p.file_name == "frame_0001.jpg"));
        assert!(packets.iter().all(|p| p.data_type == DataType::Jpg));
        assert_eq!(
            packets.iter().map(|p| p.data.len()).collect::<Vec<_>>(),
            vec![1024, 1024, 452]
        );
        assert_eq!(
            packets.iter().map(|p| p.is_last).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        let rebuilt: Vec<u8> = packets.iter().flat_map(|p| p.data.to_vec()).collect();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_send_file_rejects_bad_input() {
        let (factory, mut peers) = MockTransportFactory::new();
        let client = SocketClient::new(ClientConfig::default(), Arc::new(factory));
        let (tx, mut connected) = mpsc::unbounded_channel();
        client.set_connection_handler(move |ok| {
            let _ = tx.send(ok);
        });
        client.connect("10.0.0.5", 5678).unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert!(connected.recv().await.unwrap());

        assert!(matches!(
            client.send_file(DataType::Csv, "imu.csv", b"t,ax\n", 0),
            Err(ClientError::InvalidPacket(PacketError::InvalidChunkSize))
        ));
        let long_name = "n".repeat(300);
        assert!(matches!(
            client.send_csv(&long_name, b"t,ax\n"),
            Err(ClientError::InvalidPacket(PacketError::FileNameTooLong(300)))
        ));

        // Nothing reached the peer.
        client.send("marker").unwrap();
        assert_eq!(peer.next_write().await, b"marker");
    }
}
