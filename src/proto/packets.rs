use std::io;
use std::io::{BufRead, Cursor, Read, Write};

use crate::constants::{
    StateError, EOF_PACKET, ERR_PACKET, MAX_PACKET_SIZE, NULL_VALUE, OK_PACKET,
};
use crate::errors::{ProtoError, ProtoResult};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dakv_logger::prelude::*;

pub trait ReadAndWrite: io::Read + io::Write + Send {}

impl<T> ReadAndWrite for T where T: io::Read + io::Write + Send {}

/// Framed packet stream shared by the client and the server side.
/// Every packet is a 3 byte length, a sequence id and the payload.
pub struct Packets {
    sequence_id: u8,
    stream: Box<dyn ReadAndWrite>,
}

/// Remove the boundary value that we don't want.
/// e.g. 0x00
pub trait ReadUntil: io::BufRead {
    fn real_read_until(&mut self, byte: u8, buf: &mut Vec<u8>) -> io::Result<usize>;
}

impl<T: AsRef<[u8]>> ReadUntil for Cursor<T> {
    fn real_read_until(&mut self, byte: u8, buf: &mut Vec<u8>) -> io::Result<usize> {
        let size = self.read_until(byte, buf)?;
        if buf.last() == Some(&byte) {
            buf.pop();
        }
        Ok(size)
    }
}

pub trait WriteLenEncode: WriteBytesExt {
    fn write_len_int(&mut self, value: u64) -> io::Result<()>;
    fn write_len_str(&mut self, s: &[u8]) -> io::Result<()> {
        self.write_len_int(s.len() as u64)?;
        self.write_all(s)?;
        Ok(())
    }
}

impl WriteLenEncode for Vec<u8> {
    fn write_len_int(&mut self, value: u64) -> io::Result<()> {
        match value {
            value if value < 251 => {
                // Need 1 byte
                self.write_u8(value as u8)?;
            }
            value if value < (1 << 16) => {
                // Need 3 byte
                self.write_u8(0xfc)?;
                self.write_u16::<LittleEndian>(value as u16)?;
            }
            value if value < (1 << 24) => {
                // Need 4 byte
                self.write_u8(0xfd)?;
                self.write_u24::<LittleEndian>(value as u32)?;
            }
            _ => {
                // Need 9 byte
                self.write_u8(0xfe)?;
                self.write_u64::<LittleEndian>(value)?;
            }
        }
        Ok(())
    }
}

pub trait ReadLenEncode: ReadBytesExt {
    /// Bytes left to read.
    fn remaining(&self) -> u64;

    /// Reads a length encoded integer, `None` for the NULL marker.
    fn read_len_int(&mut self) -> ProtoResult<Option<u64>> {
        let first = self.read_u8().map_err(|_| ProtoError::ReadLenEncError)?;
        let value = match first {
            NULL_VALUE => return Ok(None),
            0xfc => self.read_u16::<LittleEndian>().map(u64::from),
            0xfd => self.read_u24::<LittleEndian>().map(u64::from),
            0xfe => self.read_u64::<LittleEndian>(),
            v => Ok(v as u64),
        };
        value.map(Some).map_err(|_| ProtoError::ReadLenEncError)
    }

    fn read_len_str(&mut self) -> ProtoResult<Option<Vec<u8>>> {
        match self.read_len_int()? {
            None => Ok(None),
            Some(len) => {
                // A length past the end of the payload is malformed.
                if len > self.remaining() {
                    return Err(ProtoError::ReadLenEncError);
                }
                let mut buf = vec![0; len as usize];
                self.read_exact(&mut buf)
                    .map_err(|_| ProtoError::ReadLenEncError)?;
                Ok(Some(buf))
            }
        }
    }
}

impl<T: AsRef<[u8]>> ReadLenEncode for Cursor<T> {
    fn remaining(&self) -> u64 {
        (self.get_ref().as_ref().len() as u64).saturating_sub(self.position())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl Packets {
    pub fn new(stream: Box<dyn ReadAndWrite>) -> Self {
        Packets {
            sequence_id: 0,
            stream,
        }
    }

    /// A new command always starts with sequence 0.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Read a whole payload, joining the packets of a payload larger than MAX_PACKET_SIZE.
    pub fn read_packet(&mut self) -> ProtoResult<Vec<u8>> {
        let mut data = self.read_one_packet()?;
        if data.len() < MAX_PACKET_SIZE {
            return Ok(data);
        }
        loop {
            let next = self.read_one_packet()?;
            let last = next.len() < MAX_PACKET_SIZE;
            data.extend_from_slice(next.as_slice());
            if last {
                return Ok(data);
            }
        }
    }

    fn read_one_packet(&mut self) -> ProtoResult<Vec<u8>> {
        let length = self.read_header()?;
        let mut data = vec![0; length];
        self.stream.read_exact(data.as_mut_slice())?;
        Ok(data)
    }

    fn read_header(&mut self) -> ProtoResult<usize> {
        let mut header = [0; 4];
        self.stream.read_exact(&mut header)?;
        let sequence = header[3];
        if sequence != self.sequence_id {
            error!(
                "current sequence:{}, get sequence:{}",
                self.sequence_id, sequence
            );
            return Err(ProtoError::InvalidSequence(self.sequence_id, sequence));
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok((header[0] as usize) | (header[1] as usize) << 8 | (header[2] as usize) << 16)
    }

    pub fn write_packet(&mut self, data: &[u8]) -> ProtoResult<()> {
        let mut index = 0;
        loop {
            let pkg_len = std::cmp::min(data.len() - index, MAX_PACKET_SIZE);
            let header = [
                pkg_len as u8,
                (pkg_len >> 8) as u8,
                (pkg_len >> 16) as u8,
                self.sequence_id,
            ];
            self.stream.write_all(&header)?;
            self.stream.write_all(&data[index..index + pkg_len])?;
            self.sequence_id = self.sequence_id.wrapping_add(1);
            index += pkg_len;
            // A payload of exactly MAX_PACKET_SIZE ends with an empty packet.
            if pkg_len < MAX_PACKET_SIZE {
                break;
            }
        }
        self.stream.flush()?;
        Ok(())
    }

    pub fn write_ok_packet(
        &mut self,
        affected_rows: u64,
        last_insert_id: u64,
        flags: u16,
        warnings: u16,
    ) -> ProtoResult<()> {
        self.write_ok_with_header(OK_PACKET, affected_rows, last_insert_id, flags, warnings)
    }

    /// OK packet closing a result set when CLIENT_DEPRECATE_EOF was negotiated.
    pub fn write_ok_packet_with_eof_header(
        &mut self,
        affected_rows: u64,
        last_insert_id: u64,
        flags: u16,
        warnings: u16,
    ) -> ProtoResult<()> {
        self.write_ok_with_header(EOF_PACKET, affected_rows, last_insert_id, flags, warnings)
    }

    fn write_ok_with_header(
        &mut self,
        header: u8,
        affected_rows: u64,
        last_insert_id: u64,
        flags: u16,
        warnings: u16,
    ) -> ProtoResult<()> {
        let mut inner = Vec::with_capacity(
            1 + len_enc_int_size(affected_rows) + len_enc_int_size(last_insert_id) + 2 + 2,
        );
        inner.write_u8(header)?;
        // Affected rows
        inner.write_len_int(affected_rows)?;
        // Last insert id
        inner.write_len_int(last_insert_id)?;

        inner.write_u16::<LittleEndian>(flags)?;
        inner.write_u16::<LittleEndian>(warnings)?;
        self.write_packet(inner.as_slice())
    }

    // flags may not be equal to the connection status flags
    pub fn write_eof_packet(&mut self, flags: u16, warnings: u16) -> ProtoResult<()> {
        let mut inner = Vec::with_capacity(5);
        inner.write_u8(EOF_PACKET)?;
        inner.write_u16::<LittleEndian>(warnings)?;
        inner.write_u16::<LittleEndian>(flags)?;
        self.write_packet(inner.as_slice())
    }

    pub fn write_err_packet(
        &mut self,
        err_code: u16,
        sql_state: &str,
        err_msg: &str,
    ) -> ProtoResult<()> {
        let sql_state = if sql_state.len() == 5 {
            sql_state
        } else {
            debug!("Invalid sql state {:?}, use default", sql_state);
            StateError::SSUnknownSQLState.as_str()
        };
        let mut inner = Vec::with_capacity(1 + 2 + 1 + 5 + err_msg.len());
        inner.write_u8(ERR_PACKET)?;
        inner.write_u16::<LittleEndian>(err_code)?;
        inner.write_u8(b'#')?;
        inner.write_all(sql_state.as_bytes())?;
        inner.write_all(err_msg.as_bytes())?;
        self.write_packet(inner.as_slice())
    }
}

pub fn is_ok_packet(data: &[u8]) -> bool {
    data.first() == Some(&OK_PACKET)
}

pub fn is_err_packet(data: &[u8]) -> bool {
    data.first() == Some(&ERR_PACKET)
}

/// Both a legacy EOF and an OK packet with the EOF header are shorter than 9 bytes.
pub fn is_eof_packet(data: &[u8]) -> bool {
    data.first() == Some(&EOF_PACKET) && data.len() < 9
}

/// Parse an OK packet, or an OK packet with the EOF header.
pub fn parse_ok_packet(data: &[u8]) -> ProtoResult<OkPacket> {
    let mut payload = Cursor::new(data);
    payload.read_u8().map_err(|_| ProtoError::EmptyPacketError)?;
    let affected_rows = payload.read_len_int()?.unwrap_or(0);
    let last_insert_id = payload.read_len_int()?.unwrap_or(0);
    let status_flags = payload
        .read_u16::<LittleEndian>()
        .map_err(|_| ProtoError::ReadStatusFlagError)?;
    // Some servers omit the warnings.
    let warnings = payload.read_u16::<LittleEndian>().unwrap_or(0);
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
    })
}

/// Parse a legacy EOF packet into (warnings, status flags).
pub fn parse_eof_packet(data: &[u8]) -> ProtoResult<(u16, u16)> {
    let mut payload = Cursor::new(data);
    payload.read_u8().map_err(|_| ProtoError::EmptyPacketError)?;
    let warnings = payload.read_u16::<LittleEndian>().unwrap_or(0);
    let flags = payload.read_u16::<LittleEndian>().unwrap_or(0);
    Ok((warnings, flags))
}

/// Turn an ERR packet into the matching error.
pub fn parse_err_packet(data: &[u8]) -> ProtoError {
    let mut payload = Cursor::new(data);
    if payload.read_u8().is_err() {
        return ProtoError::EmptyPacketError;
    }
    let code = match payload.read_u16::<LittleEndian>() {
        Ok(code) => code,
        Err(_) => return ProtoError::EmptyPacketError,
    };
    let mut rest = &data[payload.position() as usize..];
    let mut state = StateError::SSUnknownSQLState.as_str().to_string();
    if rest.first() == Some(&b'#') && rest.len() >= 6 {
        state = String::from_utf8_lossy(&rest[1..6]).into_owned();
        rest = &rest[6..];
    }
    ProtoError::Server {
        code,
        state,
        message: String::from_utf8_lossy(rest).into_owned(),
    }
}

pub fn len_enc_int_size(n: u64) -> usize {
    if n < 251 {
        1
    } else if n < 1 << 16 {
        3
    } else if n < 1 << 24 {
        4
    } else {
        9
    }
}

pub fn len_enc_str_size(v: &str) -> usize {
    len_enc_int_size(v.len() as u64) + v.len()
}

#[cfg(test)]
pub mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use crate::constants::{MAX_PACKET_SIZE, OK_PACKET};
    use crate::errors::ProtoError;
    use crate::proto::packets::{
        is_eof_packet, parse_err_packet, parse_ok_packet, Packets, ReadLenEncode, WriteLenEncode,
    };

    /// In-memory pipe: whatever one end writes the other end reads.
    #[derive(Clone, Default)]
    pub struct MockStorage {
        content: Arc<Mutex<VecDeque<u8>>>,
    }

    impl io::Read for MockStorage {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut data = self.content.lock().unwrap();
            let n = std::cmp::min(buf.len(), data.len());
            for (i, b) in data.drain(..n).enumerate() {
                buf[i] = b;
            }
            Ok(n)
        }
    }

    impl io::Write for MockStorage {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.content.lock().unwrap().extend(buf.iter());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub fn pair() -> (Packets, Packets) {
        let store = MockStorage::default();
        (
            Packets::new(Box::new(store.clone())),
            Packets::new(Box::new(store)),
        )
    }

    #[test]
    fn test_basic() {
        let (mut server, mut client) = pair();
        server.write_ok_packet(12, 34, 56, 78).unwrap();

        let data = client.read_packet().unwrap();
        assert_eq!(data[0], OK_PACKET);
        let ok = parse_ok_packet(&data).unwrap();
        assert_eq!(ok.affected_rows, 12);
        assert_eq!(ok.last_insert_id, 34);
        assert_eq!(ok.status_flags, 56);
        assert_eq!(ok.warnings, 78);
    }

    #[test]
    fn test_sequence_mismatch() {
        let (mut server, mut client) = pair();
        server.write_packet(b"one").unwrap();
        server.write_packet(b"two").unwrap();
        assert_eq!(client.read_packet().unwrap(), b"one".to_vec());
        client.reset_sequence();
        match client.read_packet() {
            Err(ProtoError::InvalidSequence(0, 1)) => {}
            _ => panic!("Unexpected result"),
        }
    }

    #[test]
    fn test_large_payload() {
        let (mut server, mut client) = pair();
        let payload = vec![7u8; MAX_PACKET_SIZE + 10];
        server.write_packet(&payload).unwrap();
        let data = client.read_packet().unwrap();
        assert_eq!(data.len(), payload.len());

        // exactly one full packet is followed by an empty one
        let payload = vec![1u8; MAX_PACKET_SIZE];
        server.write_packet(&payload).unwrap();
        assert_eq!(client.read_packet().unwrap().len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn test_err_packet() {
        let (mut server, mut client) = pair();
        server
            .write_err_packet(1064, "42000", "You have an error in your SQL syntax")
            .unwrap();
        let data = client.read_packet().unwrap();
        match parse_err_packet(&data) {
            ProtoError::Server {
                code,
                state,
                message,
            } => {
                assert_eq!(code, 1064);
                assert_eq!(state, "42000");
                assert_eq!(message, "You have an error in your SQL syntax");
            }
            _ => panic!("Unexpected result"),
        }
    }

    #[test]
    fn test_eof_and_len_enc() {
        let (mut server, mut client) = pair();
        server.write_eof_packet(0x0002, 1).unwrap();
        assert!(is_eof_packet(&client.read_packet().unwrap()));

        let mut buf = vec![];
        buf.write_len_int(250).unwrap();
        buf.write_len_int(70_000).unwrap();
        buf.write_len_str(b"abc").unwrap();
        buf.push(0xfb);
        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_len_int().unwrap(), Some(250));
        assert_eq!(cursor.read_len_int().unwrap(), Some(70_000));
        assert_eq!(cursor.read_len_str().unwrap(), Some(b"abc".to_vec()));
        assert_eq!(cursor.read_len_str().unwrap(), None);
        assert!(cursor.read_len_int().is_err());

        // lengths longer than the payload are rejected before allocating
        let mut cursor = Cursor::new(vec![0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        match cursor.read_len_str() {
            Err(ProtoError::ReadLenEncError) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        let mut cursor = Cursor::new(vec![0x05, b'a', b'b']);
        assert!(cursor.read_len_str().is_err());
    }
}
