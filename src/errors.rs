use std::result;

/// A shortcut to box an error.
#[macro_export]
macro_rules! box_err {
    ($e:expr) => ({
        let e: Box<dyn std::error::Error + Sync + Send> = format!("[{}:{}]: {}", file!(), line!(),  $e).into();
        e.into()
    });
    ($f:tt, $($arg:expr),+) => ({
        box_err!(format!($f, $($arg),+))
    });
}

quick_error! {
    #[derive(Debug)]
    pub enum ProtoError {
        Other(err: Box<dyn std::error::Error + Sync + Send>) {
            from()
            cause(err.as_ref())
            description("other error")
            display("Unknown error: {:?}", err)
        }
        // Following is for From other errors.
        Io(err: std::io::Error) {
            from()
            cause(err)
            description("io error")
            display("Io {}", err)
        }
        Utf8(err: std::string::FromUtf8Error) {
            from()
            cause(err)
            description("utf8 error")
            display("Invalid utf8 {}", err)
        }
        // Config
        InvalidConfig(key: String, reason: String) {
            description("malformed client configuration")
            display("Invalid config `{}`: {}", key, reason)
        }
        // Auth
        ReadClientFlagError {
            description("Read client flags error when unpacking packets")
        }
        ProtocolNotSupport {
            description("Only support protocol 4.1")
        }
        ReadMaxPacketSizeError {
            description("Read max packet size error when unpacking packets")
        }
        ReadCharsetError {
            description("Read charset error when unpacking packets")
        }
        ReadZeroError {
            description("Read zero error when unpacking packets")
        }
        ReadUserError {
            description("Read user error when unpacking packets")
        }
        ReadAuthResponseError {
            description("Read auth response error when unpacking packets")
        }
        ReadDatabaseError {
            description("Read database error when unpacking packets")
        }
        ReadPluginError {
            description("Read plugin name error when unpacking packets")
        }
        InvalidPluginError(s: String) {
            description("unsupported auth plugin")
            display("Invalid plugin name {}", s)
        }
        // Greeting
        ReadProtocolVersionError {
            description("Read protocol version error when unpacking packets")
        }
        ReadServerVersionError {
            description("Read server version error when unpacking packets")
        }
        ReadConnectionIdError {
            description("Read connection id error when unpacking packets")
        }
        ReadSaltError {
            description("Read salt error when unpacking packets")
        }
        ReadCapabilityFlagError {
            description("Read capability flag error when unpacking packets")
        }
        ReadStatusFlagError {
            description("Read status flag error when unpacking packets")
        }
        ReadAuthPluginLenError {
            description("Read auth plugin data length error when unpacking packets")
        }
        // Packets
        ReadLenEncError {
            description("Read length encoded value error when unpacking packets")
        }
        ParseComSetOptionError {
            description("Parse com set option error when unpacking packets")
        }
        InvalidSequence(expected: u8, got: u8) {
            description("packet sequence mismatch")
            display("Invalid sequence, expected {} got {}", expected, got)
        }
        EmptyPacketError {
            description("Empty packet error")
        }
        UnexpectedPacket(header: u8) {
            description("unexpected packet")
            display("Unexpected packet header 0x{:02x}", header)
        }
        // Server replied with an ERR packet.
        Server { code: u16, state: String, message: String } {
            description("server error")
            display("Server error {} ({}): {}", code, state, message)
        }
        // Client
        Closed {
            description("Client is closed")
        }
        ComQuit {
            description("Com Quit")
        }
        // Harness
        AssertionFailed(msg: String) {
            description("assertion failed")
            display("Assertion failed: {}", msg)
        }
    }
}

pub type ProtoResult<T> = result::Result<T, ProtoError>;

impl ProtoError {
    /// Builds the error a server answers with, keeping the five byte sql state.
    pub fn server<S: Into<String>>(code: u16, state: &str, message: S) -> Self {
        ProtoError::Server {
            code,
            state: state.to_string(),
            message: message.into(),
        }
    }

    pub fn server_code(&self) -> Option<u16> {
        match self {
            ProtoError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ProtoError, ProtoResult};

    fn fail() -> ProtoResult<()> {
        Err(box_err!("bad {}", 42))
    }

    #[test]
    fn test_box_err() {
        match fail() {
            Err(ProtoError::Other(e)) => {
                let msg = e.to_string();
                assert!(msg.contains("errors.rs"));
                assert!(msg.ends_with("bad 42"));
            }
            _ => panic!("Unexpected result"),
        }
    }

    #[test]
    fn test_server_display() {
        let err = ProtoError::server(1045, "28000", "Access denied for user 'root'");
        assert_eq!(err.server_code(), Some(1045));
        assert_eq!(
            err.to_string(),
            "Server error 1045 (28000): Access denied for user 'root'"
        );
        assert_eq!(ProtoError::Closed.server_code(), None);
    }
}
