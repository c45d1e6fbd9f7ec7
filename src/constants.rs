use crate::constants::CapabilityFlag::{
    CapabilityClientConnectWithDB, CapabilityClientDeprecateEOF, CapabilityClientLongFlag,
    CapabilityClientLongPassword, CapabilityClientMultiResults, CapabilityClientMultiStatements,
    CapabilityClientPluginAuth, CapabilityClientPluginAuthLenencClientData,
    CapabilityClientProtocol41, CapabilityClientSecureConnection, CapabilityClientTransactions,
};

// MAX_PACKET_SIZE is the maximum payload length of a single packet.
pub const MAX_PACKET_SIZE: usize = (1 << 24) - 1;
// PROTOCOL_VERSION is current version of the protocol.
// Always 10.
pub const PROTOCOL_VERSION: u8 = 10;
// Max packet size the client announces in its handshake response.
pub const CLIENT_MAX_PACKET_SIZE: u32 = 1 << 24;

// MYSQL_NATIVE_PASSWORD uses a salt and transmits a hash on the wire.
pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";

// See http://dev.mysql.com/doc/internals/en/character-set.html#packet-Protocol::CharacterSet
pub const CHARACTER_SET_UTF8: u8 = 33;
pub const CHARACTER_SET_BINARY: u8 = 63;
// See http://dev.mysql.com/doc/internals/en/status-flags.html
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;

// Packet headers
pub const OK_PACKET: u8 = 0x00;
pub const ERR_PACKET: u8 = 0xff;
pub const EOF_PACKET: u8 = 0xfe;
// NULL column value in a text protocol row
pub const NULL_VALUE: u8 = 0xfb;

pub const DEFAULT_SERVER_VERSION: &str = "5.7.0";

// Originally found in include/mysql/mysql_com.h
#[allow(dead_code)]
#[derive(Copy, Clone)]
pub enum CapabilityFlag {
    // CLIENT_LONG_PASSWORD. Assumed to be set since 4.1.1.
    CapabilityClientLongPassword = 1,
    CapabilityClientFoundRows = 1 << 1,
    // Longer flags in Protocol::ColumnDefinition320.
    CapabilityClientLongFlag = 1 << 2,
    // One can specify db on connect.
    CapabilityClientConnectWithDB = 1 << 3,
    // New 4.1 protocol. Enforced everywhere.
    CapabilityClientProtocol41 = 1 << 9,
    CapabilityClientSSL = 1 << 11,
    CapabilityClientTransactions = 1 << 13,
    // Authentication::Native41.
    CapabilityClientSecureConnection = 1 << 15,
    CapabilityClientMultiStatements = 1 << 16,
    CapabilityClientMultiResults = 1 << 17,
    CapabilityClientPluginAuth = 1 << 19,
    CapabilityClientConnAttr = 1 << 20,
    CapabilityClientPluginAuthLenencClientData = 1 << 21,
    // Expects an OK (instead of EOF) after the resultset rows.
    CapabilityClientDeprecateEOF = 1 << 24,
}

impl CapabilityFlag {
    pub fn is_set(self, flags: u32) -> bool {
        flags & self as u32 != 0
    }
}

/// Command byte of a client packet in the command phase.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PacketType {
    ComSleep,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComPing,
    ComSetOption,
    ComResetConnection,
    Unknown(u8),
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::ComSleep => "COM_SLEEP",
            PacketType::ComQuit => "COM_QUIT",
            PacketType::ComInitDB => "COM_INIT_DB",
            PacketType::ComQuery => "COM_QUERY",
            PacketType::ComPing => "COM_PING",
            PacketType::ComSetOption => "COM_SET_OPTION",
            PacketType::ComResetConnection => "COM_RESET_CONNECTION",
            PacketType::Unknown(_) => "COM_UNKNOWN",
        }
    }
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            0x00 => PacketType::ComSleep,
            0x01 => PacketType::ComQuit,
            0x02 => PacketType::ComInitDB,
            0x03 => PacketType::ComQuery,
            0x0e => PacketType::ComPing,
            0x1b => PacketType::ComSetOption,
            0x1f => PacketType::ComResetConnection,
            b => PacketType::Unknown(b),
        }
    }
}

impl Into<u8> for PacketType {
    fn into(self) -> u8 {
        match self {
            PacketType::ComSleep => 0x00,
            PacketType::ComQuit => 0x01,
            PacketType::ComInitDB => 0x02,
            PacketType::ComQuery => 0x03,
            PacketType::ComPing => 0x0e,
            PacketType::ComSetOption => 0x1b,
            PacketType::ComResetConnection => 0x1f,
            PacketType::Unknown(b) => b,
        }
    }
}

// Error codes for server-side errors.
// Originally found in include/mysql/mysqld_error.h
#[allow(dead_code)]
#[derive(Copy, Clone)]
pub enum ServerError {
    ERAccessDeniedError = 1045,
    ERUnknownComError = 1047,
    ERBadDb = 1049,
    ERParseError = 1064,
    ERNoSuchTable = 1146,
    ERUnknownError = 1105,
}

#[allow(dead_code)]
#[derive(Copy, Clone)]
pub enum StateError {
    // SSUnknownSQLState is ER_SIGNAL_EXCEPTION in
    // include/mysql/mysqld_error.h, but the code is defined
    // as HY000
    SSUnknownSQLState,
    // SSUnknownComError is ER_UNKNOWN_COM_ERROR
    SSUnknownComError,
    // SSHandshakeError is ER_HANDSHAKE_ERROR
    SSHandshakeError,
    // SSSyntaxErrorOrAccessViolation is ER_PARSE_ERROR
    SSSyntaxErrorOrAccessViolation,
    // SSNoSuchTable is ER_NO_SUCH_TABLE
    SSNoSuchTable,
    // SSAccessDeniedError is ER_ACCESS_DENIED_ERROR
    SSAccessDeniedError,
}

impl StateError {
    pub fn as_str(self) -> &'static str {
        match self {
            StateError::SSUnknownSQLState => "HY000",
            StateError::SSUnknownComError => "08S01",
            StateError::SSHandshakeError => "08S01",
            StateError::SSSyntaxErrorOrAccessViolation => "42000",
            StateError::SSNoSuchTable => "42S02",
            StateError::SSAccessDeniedError => "28000",
        }
    }
}

// Maps a charset name, as given in the client config, to its collation id.
pub fn convert_character_value(c: &str) -> Option<u8> {
    let id = match c.to_ascii_lowercase().as_str() {
        "big5" => 1,
        "latin1" => 8,
        "latin2" => 9,
        "ascii" => 11,
        "ujis" => 12,
        "sjis" => 13,
        "euckr" => 19,
        "gb2312" => 24,
        "greek" => 25,
        "gbk" => 28,
        "utf8" | "utf-8" => CHARACTER_SET_UTF8,
        "ucs2" => 35,
        "utf8mb4" => 45,
        "cp1251" => 51,
        "utf16" => 54,
        "utf32" => 60,
        "binary" => CHARACTER_SET_BINARY,
        _ => return None,
    };
    Some(id)
}

pub const DEFAULT_CLIENT_CAPABILITY: u32 = CapabilityClientLongPassword as u32
    | CapabilityClientLongFlag as u32
    | CapabilityClientProtocol41 as u32
    | CapabilityClientTransactions as u32
    | CapabilityClientMultiStatements as u32
    | CapabilityClientMultiResults as u32
    | CapabilityClientPluginAuth as u32
    | CapabilityClientDeprecateEOF as u32
    | CapabilityClientSecureConnection as u32;

pub const DEFAULT_SERVER_CAPABILITY: u32 = CapabilityClientLongPassword as u32
    | CapabilityClientLongFlag as u32
    | CapabilityClientConnectWithDB as u32
    | CapabilityClientProtocol41 as u32
    | CapabilityClientTransactions as u32
    | CapabilityClientSecureConnection as u32
    | CapabilityClientMultiStatements as u32
    | CapabilityClientMultiResults as u32
    | CapabilityClientPluginAuth as u32
    | CapabilityClientPluginAuthLenencClientData as u32
    | CapabilityClientDeprecateEOF as u32;

#[cfg(test)]
pub const DEFAULT_SALT: &[u8; 20] = &[
    0x77, 0x63, 0x6a, 0x6d, 0x61, 0x22, 0x23, 0x27, // first part
    0x38, 0x26, 0x55, 0x58, 0x3b, 0x5d, 0x44, 0x78, 0x53, 0x73, 0x6b, 0x41,
];
