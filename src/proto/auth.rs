use std::fmt::{Display, Error, Formatter};
use std::io::{Cursor, Read, Write};

use crate::constants::{CapabilityFlag, CLIENT_MAX_PACKET_SIZE, MYSQL_NATIVE_PASSWORD};
use crate::errors::{ProtoError, ProtoResult};
use crate::proto::packets::{ReadLenEncode, ReadUntil};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};

/// Connection Phase Packets
/// https://dev.mysql.com/doc/internals/en/connection-phase-packets.html#packet-Protocol::HandshakeResponse41
/// start      length           value
/// 0           4           capability flags
/// 4           4           max-packet size
/// 8           1           character set
/// 9           23          reserved (all [0])
/// 32          unknown     user name
/// unknown     unknown     (auth response length) auth response
/// unknown     unknown     database
/// unknown     unknown     plugin name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Auth {
    character_set: u8,
    max_packet_size: u32,
    capability_flags: u32,
    auth_response: Vec<u8>,
    auth_method: String,
    database: String,
    user: String,
}

impl Auth {
    pub fn new() -> Self {
        Auth::default()
    }

    pub fn capability_flags(&self) -> u32 {
        self.capability_flags
    }

    pub fn auth_response(&self) -> &[u8] {
        &self.auth_response
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Build the client's handshake response. The database is only sent when not empty.
    pub fn write_handshake_resp(
        mut capability_flag: u32,
        charset: u8,
        username: &str,
        password: &str,
        salt: &[u8],
        database: &str,
    ) -> ProtoResult<Vec<u8>> {
        if !database.is_empty() {
            capability_flag |= CapabilityFlag::CapabilityClientConnectWithDB as u32;
        } else {
            capability_flag &= !(CapabilityFlag::CapabilityClientConnectWithDB as u32);
        }
        capability_flag &= !(CapabilityFlag::CapabilityClientPluginAuthLenencClientData as u32);

        let mut buf = vec![];
        buf.write_u32::<LittleEndian>(capability_flag)?;
        buf.write_u32::<LittleEndian>(CLIENT_MAX_PACKET_SIZE)?;
        // charset
        buf.write_u8(charset)?;
        buf.write_all(&[0; 23])?;
        // username
        buf.write_all(username.as_bytes())?;
        buf.write_u8(0)?;

        let auth_resp = gen_native_password(password, salt);
        if CapabilityFlag::CapabilityClientSecureConnection.is_set(capability_flag) {
            buf.write_u8(auth_resp.len() as u8)?;
            buf.write_all(auth_resp.as_slice())?;
        } else {
            buf.write_all(auth_resp.as_slice())?;
            buf.write_u8(0)?;
        }
        if CapabilityFlag::CapabilityClientConnectWithDB.is_set(capability_flag) {
            buf.write_all(database.as_bytes())?;
            buf.write_u8(0)?;
        }
        if CapabilityFlag::CapabilityClientPluginAuth.is_set(capability_flag) {
            buf.write_all(MYSQL_NATIVE_PASSWORD.as_bytes())?;
            buf.write_u8(0)?;
        }
        Ok(buf)
    }

    /// Parse the handshake response on the server side.
    pub fn parse_client_handshake_packet(&mut self, payload: &[u8]) -> ProtoResult<()> {
        let mut payload = Cursor::new(payload);
        // Parse client flag
        let client_flag = payload
            .read_u32::<LittleEndian>()
            .map_err(|_| ProtoError::ReadClientFlagError)?;
        if !CapabilityFlag::CapabilityClientProtocol41.is_set(client_flag) {
            return Err(ProtoError::ProtocolNotSupport);
        }
        self.capability_flags = client_flag;
        // Parse max packet size
        self.max_packet_size = payload
            .read_u32::<LittleEndian>()
            .map_err(|_| ProtoError::ReadMaxPacketSizeError)?;
        // Parse charset
        self.character_set = payload
            .read_u8()
            .map_err(|_| ProtoError::ReadCharsetError)?;
        // Read 23 zeros
        let mut trailer = [0; 23];
        payload
            .read_exact(&mut trailer)
            .map_err(|_| ProtoError::ReadZeroError)?;

        // Parse user name
        let mut user = vec![];
        payload
            .real_read_until(0x00, &mut user)
            .map_err(|_| ProtoError::ReadUserError)?;
        self.user = String::from_utf8(user).map_err(|_| ProtoError::ReadUserError)?;

        // Parse auth response
        self.auth_response = if CapabilityFlag::CapabilityClientPluginAuthLenencClientData
            .is_set(self.capability_flags)
        {
            payload
                .read_len_str()
                .map_err(|_| ProtoError::ReadAuthResponseError)?
                .unwrap_or_default()
        } else if CapabilityFlag::CapabilityClientSecureConnection.is_set(self.capability_flags) {
            let len = payload
                .read_u8()
                .map_err(|_| ProtoError::ReadAuthResponseError)? as usize;
            let mut buffer = vec![0; len];
            payload
                .read_exact(&mut buffer)
                .map_err(|_| ProtoError::ReadAuthResponseError)?;
            buffer
        } else {
            let mut buffer = vec![];
            payload
                .real_read_until(0x00, &mut buffer)
                .map_err(|_| ProtoError::ReadAuthResponseError)?;
            buffer
        };

        // Parse database name
        if CapabilityFlag::CapabilityClientConnectWithDB.is_set(self.capability_flags) {
            let mut database = vec![];
            payload
                .real_read_until(0x00, &mut database)
                .map_err(|_| ProtoError::ReadDatabaseError)?;
            self.database = String::from_utf8(database).map_err(|_| ProtoError::ReadDatabaseError)?;
        }
        // Parse plugin name
        if CapabilityFlag::CapabilityClientPluginAuth.is_set(self.capability_flags) {
            let mut method = vec![];
            payload
                .real_read_until(0x00, &mut method)
                .map_err(|_| ProtoError::ReadPluginError)?;
            self.auth_method = String::from_utf8(method).map_err(|_| ProtoError::ReadPluginError)?;
        }
        // JDBC sometimes send empty auth method but expect mysql_native_password
        if self.auth_method.is_empty() {
            self.auth_method = String::from(MYSQL_NATIVE_PASSWORD);
        }
        if self.auth_method != MYSQL_NATIVE_PASSWORD {
            return Err(ProtoError::InvalidPluginError(self.auth_method.clone()));
        }
        Ok(())
    }
}

/// https://dev.mysql.com/doc/internals/en/secure-password-authentication.html#packet-Authentication::Native41
pub fn gen_native_password(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }
    let mut hasher = Sha1::new();
    hasher.input(password.as_bytes());
    let stage1 = hasher.result_reset();

    hasher.input(&stage1);
    let stage1_sha1 = hasher.result_reset();

    hasher.input(salt);
    hasher.input(stage1_sha1);
    let stage2 = hasher.result();

    stage1
        .iter()
        .zip(stage2.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

pub fn check_native_password(password: &str, salt: &[u8], auth_response: &[u8]) -> bool {
    gen_native_password(password, salt).as_slice() == auth_response
}

impl Display for Auth {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(
            f,
            "Auth: [user: {}, database: {}, auth_method: {}, capability_flags: {}, character_set: {}, max_packet_size: {}]",
            self.user,
            self.database,
            self.auth_method,
            self.capability_flags,
            self.character_set,
            self.max_packet_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::CapabilityFlag;
    use crate::constants::{
        CLIENT_MAX_PACKET_SIZE, DEFAULT_CLIENT_CAPABILITY, DEFAULT_SALT, MYSQL_NATIVE_PASSWORD,
    };
    use crate::errors::ProtoError;
    use crate::proto::auth::{check_native_password, gen_native_password};
    use crate::proto::Auth;

    #[test]
    fn test_auth() {
        let data = &[
            0x8d, 0xa6, 0xff, 0x01, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x72, 0x6f, 0x6f, 0x74, 0x00, 0x14, 0x0e, 0xb4, 0xdd, 0xb5,
            0x5b, 0x64, 0xf8, 0x54, 0x40, 0xfd, 0xf3, 0x45, 0xfa, 0x37, 0x12, 0x20, 0x20, 0xda,
            0x38, 0xaa, 0x61, 0x62, 0x63, 0x00, 0x6d, 0x79, 0x73, 0x71, 0x6c, 0x5f, 0x6e, 0x61,
            0x74, 0x69, 0x76, 0x65, 0x5f, 0x70, 0x61, 0x73, 0x73, 0x77, 0x6f, 0x72, 0x64, 0x00,
        ];
        let mut auth = Auth::new();
        auth.parse_client_handshake_packet(data).unwrap();
        assert_eq!(auth.character_set, 33);
        assert_eq!(auth.max_packet_size, 16777216);
        assert_eq!(auth.auth_method, String::from(MYSQL_NATIVE_PASSWORD));
        assert_eq!(auth.database(), "abc");
        assert_eq!(auth.user(), "root");
        assert_eq!(
            auth.auth_response(),
            &[
                0x0e, 0xb4, 0xdd, 0xb5, 0x5b, 0x64, 0xf8, 0x54, 0x40, 0xfd, 0xf3, 0x45, 0xfa, 0x37,
                0x12, 0x20, 0x20, 0xda, 0x38, 0xaa
            ][..]
        );
    }

    fn parse_err(data: &[u8]) -> ProtoError {
        let mut auth = Auth::new();
        auth.parse_client_handshake_packet(data).unwrap_err()
    }

    #[test]
    fn test_error() {
        match parse_err(&[0x8d, 0xa6, 0xff]) {
            ProtoError::ReadClientFlagError => {}
            e => panic!("Unexpected error {:?}", e),
        }
        match parse_err(&[0x8d, 0x00, 0xff, 0x01]) {
            ProtoError::ProtocolNotSupport => {}
            e => panic!("Unexpected error {:?}", e),
        }
        match parse_err(&[0x8d, 0xa6, 0xff, 0x01, 0x00, 0x00, 0x00]) {
            ProtoError::ReadMaxPacketSizeError => {}
            e => panic!("Unexpected error {:?}", e),
        }
        match parse_err(&[0x8d, 0xa6, 0xff, 0x01, 0x00, 0x00, 0x00, 0x01]) {
            ProtoError::ReadCharsetError => {}
            e => panic!("Unexpected error {:?}", e),
        }
        match parse_err(&[
            0x8d, 0xa6, 0xff, 0x01, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00, 0x00, 0x00,
        ]) {
            ProtoError::ReadZeroError => {}
            e => panic!("Unexpected error {:?}", e),
        }
    }

    #[test]
    fn test_unpack() {
        let mut expected = Auth::new();
        expected.character_set = 0x02;
        expected.max_packet_size = CLIENT_MAX_PACKET_SIZE;
        expected.capability_flags =
            DEFAULT_CLIENT_CAPABILITY | CapabilityFlag::CapabilityClientConnectWithDB as u32;
        expected.auth_response = gen_native_password("password", DEFAULT_SALT);
        expected.database = "test_db".to_string();
        expected.user = "root".to_string();
        expected.auth_method = MYSQL_NATIVE_PASSWORD.to_string();

        let mut actual = Auth::new();
        let tmp = Auth::write_handshake_resp(
            DEFAULT_CLIENT_CAPABILITY,
            0x02,
            "root",
            "password",
            DEFAULT_SALT,
            "test_db",
        )
        .unwrap();
        actual.parse_client_handshake_packet(tmp.as_slice()).unwrap();
        assert_eq!(actual, expected);
        assert!(check_native_password("password", DEFAULT_SALT, actual.auth_response()));
        assert!(!check_native_password("secret", DEFAULT_SALT, actual.auth_response()));
    }

    #[test]
    fn test_unpack_without_secure() {
        let mut expected = Auth::new();
        expected.character_set = 0x02;
        expected.max_packet_size = CLIENT_MAX_PACKET_SIZE;
        expected.capability_flags = DEFAULT_CLIENT_CAPABILITY
            & !(CapabilityFlag::CapabilityClientSecureConnection as u32);
        expected.auth_response = gen_native_password("", DEFAULT_SALT);
        expected.database = "".to_string();
        expected.user = "root".to_string();
        expected.auth_method = MYSQL_NATIVE_PASSWORD.to_string();

        let mut actual = Auth::new();
        let tmp = Auth::write_handshake_resp(
            DEFAULT_CLIENT_CAPABILITY & !(CapabilityFlag::CapabilityClientSecureConnection as u32),
            0x02,
            "root",
            "",
            DEFAULT_SALT,
            "",
        )
        .unwrap();
        actual.parse_client_handshake_packet(tmp.as_slice()).unwrap();
        assert_eq!(actual, expected);
        assert!(check_native_password("", DEFAULT_SALT, actual.auth_response()));
    }
}
