//! Chunked upload packets.
//!
//! Captured files are streamed to the receiver as a sequence of packets:
//!
//! ```text
//! [name_len u8][name][data_type u8][data_size u32 BE][sequence u32 BE][is_last u8][payload]
//! ```

use crate::error::PacketError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const FIXED_HEADER_LEN: usize = 1 + 1 + 4 + 4 + 1;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Jpg = 0x01,
    Bin = 0x02,
    Csv = 0x03,
}

impl DataType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => ".jpg",
            Self::Bin => ".bin",
            Self::Csv => ".csv",
        }
    }

    /// Guesses the data type from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "bin" => Some(Self::Bin),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Jpg),
            0x02 => Ok(Self::Bin),
            0x03 => Ok(Self::Csv),
            other => Err(PacketError::UnknownDataType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub data_type: DataType,
    pub file_name: String,
    pub data: Bytes,
    pub sequence_number: u32,
    pub is_last: bool,
}

impl DataPacket {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let name = self.file_name.as_bytes();
        let name_len =
            u8::try_from(name.len()).map_err(|_| PacketError::FileNameTooLong(name.len()))?;
        let data_len =
            u32::try_from(self.data.len()).map_err(|_| PacketError::PayloadTooLarge(self.data.len()))?;

        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + name.len() + self.data.len());
        out.put_u8(name_len);
        out.put_slice(name);
        out.put_u8(self.data_type as u8);
        out.put_u32(data_len);
        out.put_u32(self.sequence_number);
        out.put_u8(u8::from(self.is_last));
        out.put_slice(&self.data);
        Ok(out)
    }

    /// Splits `data` into sequenced packets of at most `chunk_size` bytes.
    /// The final packet carries `is_last`; an empty payload still produces one.
    pub fn chunks(
        data_type: DataType,
        file_name: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<Vec<DataPacket>, PacketError> {
        if chunk_size == 0 {
            return Err(PacketError::InvalidChunkSize);
        }
        if file_name.len() > u8::MAX as usize {
            return Err(PacketError::FileNameTooLong(file_name.len()));
        }

        let data = Bytes::copy_from_slice(data);
        if data.is_empty() {
            return Ok(vec![DataPacket {
                data_type,
                file_name: file_name.to_string(),
                data,
                sequence_number: 0,
                is_last: true,
            }]);
        }

        let total = data.len();
        let mut packets = Vec::with_capacity(total.div_ceil(chunk_size));
        let mut offset = 0;
        let mut sequence_number = 0u32;
        while offset < total {
            let end = (offset + chunk_size).min(total);
            packets.push(DataPacket {
                data_type,
                file_name: file_name.to_string(),
                data: data.slice(offset..end),
                sequence_number,
                is_last: end >= total,
            });
            offset = end;
            sequence_number = sequence_number.wrapping_add(1);
        }
        Ok(packets)
    }
}

/// Receiver-side parser for a stream of [`DataPacket`]s.
#[derive(Default)]
pub struct PacketDecoder {
    buffer: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete packet, or `Ok(None)` if more bytes are
    /// needed. A malformed header consumes the packet before reporting it.
    pub fn decode_packet(&mut self) -> Result<Option<DataPacket>, PacketError> {
        let Some(&name_len) = self.buffer.first() else {
            return Ok(None);
        };
        let name_len = name_len as usize;
        let header_len = FIXED_HEADER_LEN + name_len;
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let mut header = &self.buffer[1 + name_len..header_len];
        let raw_type = header.get_u8();
        let data_size = header.get_u32() as usize;
        let sequence_number = header.get_u32();
        let is_last = header.get_u8() != 0;

        if self.buffer.len() < header_len + data_size {
            return Ok(None);
        }

        let mut packet = self.buffer.split_to(header_len + data_size);
        let name = packet.split_to(header_len).split_off(1).split_to(name_len);
        let data_type = DataType::try_from(raw_type)?;
        let file_name =
            String::from_utf8(name.to_vec()).map_err(|_| PacketError::InvalidFileName)?;

        Ok(Some(DataPacket {
            data_type,
            file_name,
            data: packet.freeze(),
            sequence_number,
            is_last,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let packet = DataPacket {
            data_type: DataType::Bin,
            file_name: "d.bin".into(),
            data: Bytes::from_static(&[9, 8, 7]),
            sequence_number: 2,
            is_last: true,
        };
        let encoded = packet.encode().unwrap();

        assert_eq!(encoded[0], 5);
        assert_eq!(&encoded[1..6], b"d.bin");
        assert_eq!(encoded[6], 0x02);
        assert_eq!(&encoded[7..11], &[0, 0, 0, 3]);
        assert_eq!(&encoded[11..15], &[0, 0, 0, 2]);
        assert_eq!(encoded[15], 1);
        assert_eq!(&encoded[16..], &[9, 8, 7]);
    }

    #[test]
    fn test_name_length_counts_bytes() {
        let packet = DataPacket {
            data_type: DataType::Csv,
            file_name: "imu_é.csv".into(),
            data: Bytes::new(),
            sequence_number: 0,
            is_last: true,
        };
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0] as usize, "imu_é.csv".len());
    }

    #[test]
    fn test_chunking() {
        let data: Vec<u8> = (0..=9).collect();
        let packets = DataPacket::chunks(DataType::Jpg, "frame.jpg", &data, 4).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[0].data[..], &[0, 1, 2, 3]);
        assert_eq!(&packets[2].data[..], &[8, 9]);
        assert_eq!(
            packets.iter().map(|p| p.sequence_number).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            packets.iter().map(|p| p.is_last).collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }

    #[test]
    fn test_chunking_edge_cases() {
        let empty = DataPacket::chunks(DataType::Bin, "e.bin", &[], 1024).unwrap();
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_last);

        assert_eq!(
            DataPacket::chunks(DataType::Bin, "e.bin", &[1], 0),
            Err(PacketError::InvalidChunkSize)
        );

        let long_name = "x".repeat(256);
        assert_eq!(
            DataPacket::chunks(DataType::Bin, &long_name, &[1], 8),
            Err(PacketError::FileNameTooLong(256))
        );
    }

    #[test]
    fn test_decoder_reassembles_split_stream() {
        let data: Vec<u8> = (0..50).collect();
        let packets = DataPacket::chunks(DataType::Csv, "imu.csv", &data, 16).unwrap();
        let stream: Vec<u8> = packets
            .iter()
            .flat_map(|p| p.encode().unwrap())
            .collect();

        let mut decoder = PacketDecoder::new();
        let mut decoded = Vec::new();
        for piece in stream.chunks(7) {
            decoder.feed(piece);
            while let Some(packet) = decoder.decode_packet().unwrap() {
                decoded.push(packet);
            }
        }
        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_decoder_rejects_unknown_type() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[1, b'a', 0x7f, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            decoder.decode_packet(),
            Err(PacketError::UnknownDataType(0x7f))
        );
        assert!(decoder.decode_packet().unwrap().is_none());
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(DataType::from_extension("JPEG"), Some(DataType::Jpg));
        assert_eq!(DataType::from_extension(".csv"), Some(DataType::Csv));
        assert_eq!(DataType::from_extension("png"), None);
        assert_eq!(DataType::Bin.extension(), ".bin");
    }
}
