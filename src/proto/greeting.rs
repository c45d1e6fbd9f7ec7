use std::cmp;
use std::io::{Cursor, Read, Write};

use crate::constants::{
    CapabilityFlag, CHARACTER_SET_UTF8, DEFAULT_SERVER_CAPABILITY, MYSQL_NATIVE_PASSWORD,
    PROTOCOL_VERSION, SERVER_STATUS_AUTOCOMMIT,
};
use crate::errors::{ProtoError, ProtoResult};
use crate::proto::packets::ReadUntil;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

/// Initial handshake the server sends right after accepting a connection.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Greeting {
    status_flag: u16,
    capability: u32,
    connection_id: u32,
    charset: u8,
    server_version: String,
    auth_plugin_name: String,
    salt: Vec<u8>,
}

fn byte_rand(min: u64, max: u64) -> u8 {
    let mut rng = rand::thread_rng();
    rng.gen_range(min, max) as u8
}

impl Greeting {
    pub fn new(connection_id: u32, server_version: String) -> Self {
        // The salt is sent NUL terminated so it must not contain zeros.
        let salt = (0..20).map(|_| byte_rand(1, 123)).collect();
        Greeting {
            status_flag: SERVER_STATUS_AUTOCOMMIT,
            capability: DEFAULT_SERVER_CAPABILITY,
            connection_id,
            charset: CHARACTER_SET_UTF8,
            server_version,
            auth_plugin_name: MYSQL_NATIVE_PASSWORD.to_string(),
            salt,
        }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn capability(&self) -> u32 {
        self.capability
    }

    pub fn status_flag(&self) -> u16 {
        self.status_flag
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn auth_plugin_name(&self) -> &str {
        &self.auth_plugin_name
    }

    /// Initial Handshake Packet - protocol version 10
    /// See https://dev.mysql.com/doc/internals/en/connection-phase-packets.html#packet-Protocol::HandshakeV10
    pub fn write_handshake_v10(&self) -> ProtoResult<Vec<u8>> {
        let mut buf = vec![];
        // [u8] protocol version
        buf.write_u8(PROTOCOL_VERSION)?;
        // [string] server version
        buf.write_all(self.server_version.as_bytes())?;
        buf.write_u8(0)?;
        // [u32] connection id
        buf.write_u32::<LittleEndian>(self.connection_id)?;
        // [string] auth-plugin-data-part-1
        buf.write_all(&self.salt[..8])?;
        buf.write_u8(0)?;
        // [u16] capability flags (lower 2 bytes)
        buf.write_u16::<LittleEndian>(self.capability as u16)?;
        // [u8] character set
        buf.write_u8(self.charset)?;
        // [u16] status flags
        buf.write_u16::<LittleEndian>(self.status_flag)?;
        // [u16] capability flags (upper 2 bytes)
        buf.write_u16::<LittleEndian>((self.capability >> 16) as u16)?;
        // [u8] length of auth-plugin-data
        buf.write_u8(self.salt.len() as u8 + 1)?;
        // [0;10] reserved (all [00])
        buf.write_all(&[0; 10])?;
        if CapabilityFlag::CapabilityClientSecureConnection.is_set(self.capability) {
            // auth-plugin-data-part-2 ($len=MAX(13, length of auth-plugin-data - 8))
            buf.write_all(&self.salt[8..])?;
            buf.write_u8(0)?;
        }
        if CapabilityFlag::CapabilityClientPluginAuth.is_set(self.capability) {
            // string[NUL]    auth-plugin name
            buf.write_all(self.auth_plugin_name.as_bytes())?;
            buf.write_u8(0)?;
        }
        Ok(buf)
    }

    /// Parse the handshake on the client side.
    pub fn parse_handshake_v10(payload: &[u8]) -> ProtoResult<Greeting> {
        let mut payload = Cursor::new(payload);
        let version = payload
            .read_u8()
            .map_err(|_| ProtoError::ReadProtocolVersionError)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtoError::ProtocolNotSupport);
        }
        let mut server_version = vec![];
        payload
            .real_read_until(0x00, &mut server_version)
            .map_err(|_| ProtoError::ReadServerVersionError)?;
        let server_version =
            String::from_utf8(server_version).map_err(|_| ProtoError::ReadServerVersionError)?;
        let connection_id = payload
            .read_u32::<LittleEndian>()
            .map_err(|_| ProtoError::ReadConnectionIdError)?;
        // salt[..8]
        let mut salt = vec![0; 8];
        payload
            .read_exact(&mut salt)
            .map_err(|_| ProtoError::ReadSaltError)?;
        payload.read_u8().map_err(|_| ProtoError::ReadZeroError)?;

        let lower_capability = payload
            .read_u16::<LittleEndian>()
            .map_err(|_| ProtoError::ReadCapabilityFlagError)?;
        let charset = payload
            .read_u8()
            .map_err(|_| ProtoError::ReadCharsetError)?;
        let status_flag = payload
            .read_u16::<LittleEndian>()
            .map_err(|_| ProtoError::ReadStatusFlagError)?;
        let upper_capability = payload
            .read_u16::<LittleEndian>()
            .map_err(|_| ProtoError::ReadCapabilityFlagError)?;
        let capability = ((upper_capability as u32) << 16) | lower_capability as u32;
        let auth_plugin_data_len = payload
            .read_u8()
            .map_err(|_| ProtoError::ReadAuthPluginLenError)?;
        // Read 10 zeros
        let mut trailer = [0; 10];
        payload
            .read_exact(&mut trailer)
            .map_err(|_| ProtoError::ReadZeroError)?;

        if CapabilityFlag::CapabilityClientSecureConnection.is_set(capability) {
            let len = cmp::max(13, auth_plugin_data_len as i32 - 8) as usize;
            let mut salt2 = vec![0; len];
            payload
                .read_exact(&mut salt2)
                .map_err(|_| ProtoError::ReadSaltError)?;
            if salt2.last() == Some(&0) {
                salt2.pop();
            }
            salt.extend_from_slice(&salt2);
        }

        let mut auth_plugin_name = String::new();
        if CapabilityFlag::CapabilityClientPluginAuth.is_set(capability) {
            let mut name = vec![];
            payload
                .real_read_until(0x00, &mut name)
                .map_err(|_| ProtoError::ReadPluginError)?;
            auth_plugin_name = String::from_utf8(name).map_err(|_| ProtoError::ReadPluginError)?;
        }

        Ok(Greeting {
            status_flag,
            capability,
            connection_id,
            charset,
            server_version,
            auth_plugin_name,
            salt,
        })
    }
}
