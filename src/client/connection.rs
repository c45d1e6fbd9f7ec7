use std::io::Cursor;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use crate::config::ClientConfig;
use crate::constants::{
    CapabilityFlag, PacketType, DEFAULT_CLIENT_CAPABILITY, MYSQL_NATIVE_PASSWORD,
    SERVER_MORE_RESULTS_EXISTS,
};
use crate::errors::{ProtoError, ProtoResult};
use crate::proto::packets::{
    is_eof_packet, is_err_packet, is_ok_packet, parse_eof_packet, parse_err_packet,
    parse_ok_packet, OkPacket, Packets, ReadLenEncode,
};
use crate::proto::{Auth, Greeting};
use crate::sql_type::{mysql_to_type, Field, SqlResult, Value};

use byteorder::{LittleEndian, ReadBytesExt};
use dakv_logger::prelude::*;

/// Client side of an authenticated connection, text protocol only.
pub struct ClientConnection {
    socket: TcpStream,
    packets: Packets,
    greeting: Greeting,
    capability: u32,
    status_flags: u16,
}

impl ClientConnection {
    pub fn connect(config: &ClientConfig) -> ProtoResult<Self> {
        let socket = open_socket(config)?;
        // Bound the handshake by the connect timeout too.
        socket.set_read_timeout(Some(config.connect_timeout))?;
        socket.set_nodelay(true)?;
        let mut packets = Packets::new(Box::new(socket.try_clone()?));

        let payload = packets.read_packet()?;
        if is_err_packet(&payload) {
            return Err(parse_err_packet(&payload));
        }
        let greeting = Greeting::parse_handshake_v10(&payload)?;
        if !greeting.auth_plugin_name().is_empty()
            && greeting.auth_plugin_name() != MYSQL_NATIVE_PASSWORD
        {
            return Err(ProtoError::InvalidPluginError(
                greeting.auth_plugin_name().to_string(),
            ));
        }
        debug!(
            "Server {} version {}, charset {}, connection id {}",
            config.address(),
            greeting.server_version(),
            greeting.charset(),
            greeting.connection_id()
        );

        let capability = DEFAULT_CLIENT_CAPABILITY & greeting.capability();
        let resp = Auth::write_handshake_resp(
            capability,
            config.charset,
            &config.username,
            &config.password,
            greeting.salt(),
            &config.database,
        )?;
        packets.write_packet(resp.as_slice())?;

        let reply = packets.read_packet()?;
        if is_err_packet(&reply) {
            return Err(parse_err_packet(&reply));
        }
        if !is_ok_packet(&reply) {
            // Auth switch and more data are not supported.
            return Err(ProtoError::UnexpectedPacket(reply.first().cloned().unwrap_or_default()));
        }
        let ok = parse_ok_packet(&reply)?;
        socket.set_read_timeout(None)?;

        Ok(ClientConnection {
            socket,
            packets,
            greeting,
            capability,
            status_flags: ok.status_flags,
        })
    }

    pub fn connection_id(&self) -> u32 {
        self.greeting.connection_id()
    }

    fn write_command(&mut self, cmd: PacketType, arg: &[u8]) -> ProtoResult<()> {
        self.packets.reset_sequence();
        let mut payload = Vec::with_capacity(1 + arg.len());
        payload.push(cmd.into());
        payload.extend_from_slice(arg);
        self.packets.write_packet(payload.as_slice())
    }

    fn read_ok(&mut self) -> ProtoResult<OkPacket> {
        let data = self.packets.read_packet()?;
        if is_err_packet(&data) {
            return Err(parse_err_packet(&data));
        }
        if !is_ok_packet(&data) {
            return Err(ProtoError::UnexpectedPacket(data.first().cloned().unwrap_or_default()));
        }
        let ok = parse_ok_packet(&data)?;
        self.status_flags = ok.status_flags;
        Ok(ok)
    }

    pub fn ping(&mut self) -> ProtoResult<()> {
        self.write_command(PacketType::ComPing, &[])?;
        self.read_ok().map(|_| ())
    }

    pub fn init_db(&mut self, database: &str) -> ProtoResult<()> {
        self.write_command(PacketType::ComInitDB, database.as_bytes())?;
        self.read_ok().map(|_| ())
    }

    /// Run a query and collect every result it produces.
    pub fn query(&mut self, sql: &str) -> ProtoResult<Vec<SqlResult>> {
        self.write_command(PacketType::ComQuery, sql.as_bytes())?;
        let mut results = vec![];
        loop {
            let result = self.read_result()?;
            results.push(result);
            if self.status_flags & SERVER_MORE_RESULTS_EXISTS == 0 {
                return Ok(results);
            }
        }
    }

    fn read_result(&mut self) -> ProtoResult<SqlResult> {
        let data = self.packets.read_packet()?;
        if data.is_empty() {
            return Err(ProtoError::EmptyPacketError);
        }
        if is_err_packet(&data) {
            return Err(parse_err_packet(&data));
        }
        if is_ok_packet(&data) {
            let ok = parse_ok_packet(&data)?;
            self.status_flags = ok.status_flags;
            return Ok(SqlResult::ok(ok.affected_rows, ok.last_insert_id));
        }

        let count = Cursor::new(&data)
            .read_len_int()?
            .ok_or(ProtoError::UnexpectedPacket(data[0]))?;
        // The count comes from the server, fields are pushed as they arrive.
        let mut fields = vec![];
        for _ in 0..count {
            let column = self.packets.read_packet()?;
            fields.push(parse_column_definition(&column)?);
        }
        let deprecate_eof = CapabilityFlag::CapabilityClientDeprecateEOF.is_set(self.capability);
        if !deprecate_eof {
            let eof = self.packets.read_packet()?;
            if !is_eof_packet(&eof) {
                return Err(ProtoError::UnexpectedPacket(eof.first().cloned().unwrap_or_default()));
            }
        }

        let mut rows = vec![];
        loop {
            let row = self.packets.read_packet()?;
            if is_err_packet(&row) {
                return Err(parse_err_packet(&row));
            }
            if is_eof_packet(&row) {
                self.status_flags = if deprecate_eof {
                    parse_ok_packet(&row)?.status_flags
                } else {
                    parse_eof_packet(&row)?.1
                };
                break;
            }
            rows.push(parse_row(&row, &fields)?);
        }
        Ok(SqlResult::new(fields, rows))
    }

    /// Send COM_QUIT and close the socket, the server does not answer.
    pub fn quit(mut self) -> ProtoResult<()> {
        let result = self.write_command(PacketType::ComQuit, &[]);
        if let Err(err) = self.socket.shutdown(Shutdown::Both) {
            debug!("Shutdown socket failed: {}", err);
        }
        result
    }
}

fn open_socket(config: &ClientConfig) -> ProtoResult<TcpStream> {
    let addrs: Vec<SocketAddr> = config.address().to_socket_addrs()?.collect();
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(socket) => return Ok(socket),
            Err(err) => {
                debug!("Connect {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }
    match last_err {
        Some(err) => Err(err.into()),
        None => Err(box_err!("no address resolved for {}", config.address())),
    }
}

/// Protocol::ColumnDefinition41
fn parse_column_definition(data: &[u8]) -> ProtoResult<Field> {
    let mut payload = Cursor::new(data);
    let mut next_str = || -> ProtoResult<String> {
        let s = payload.read_len_str()?.unwrap_or_default();
        Ok(String::from_utf8(s)?)
    };
    let _catalog = next_str()?;
    let database = next_str()?;
    let table = next_str()?;
    let org_table = next_str()?;
    let name = next_str()?;
    let org_name = next_str()?;

    // length of fixed length fields, always 0x0c
    payload.read_len_int()?;
    let charset = payload.read_u16::<LittleEndian>()? as u32;
    let column_len = payload.read_u32::<LittleEndian>()?;
    let typ = payload.read_u8()?;
    let flags = payload.read_u16::<LittleEndian>()?;
    let decimals = payload.read_u8()? as u32;
    Ok(Field {
        name,
        typ: mysql_to_type(typ, flags),
        table,
        org_table,
        database,
        org_name,
        column_len,
        charset,
        decimals,
        flags: flags as u32,
    })
}

/// ProtocolText::ResultsetRow
fn parse_row(data: &[u8], fields: &[Field]) -> ProtoResult<Vec<Value>> {
    let mut payload = Cursor::new(data);
    fields
        .iter()
        .map(|field| {
            Ok(match payload.read_len_str()? {
                None => Value::null(),
                Some(val) => Value {
                    typ: field.typ,
                    val,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::client::connection::{parse_column_definition, parse_row};
    use crate::errors::ProtoError;
    use crate::proto::packets::WriteLenEncode;
    use crate::sql_type::{Field, MysqlType, Type};

    fn column(name: &str, typ: u8, flags: u16) -> Vec<u8> {
        let mut data = vec![];
        for s in &["def", "testdb", "t", "t", name, name] {
            data.write_len_str(s.as_bytes()).unwrap();
        }
        data.push(0x0c);
        data.extend_from_slice(&[33, 0]);
        data.extend_from_slice(&[255, 0, 0, 0]);
        data.push(typ);
        data.extend_from_slice(&flags.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&[0, 0]);
        data
    }

    #[test]
    fn test_column_definition() {
        let field = parse_column_definition(&column("id", 8, 32)).unwrap();
        assert_eq!(field.name, "id");
        assert_eq!(field.database, "testdb");
        assert_eq!(field.typ, MysqlType::TypeUint64 as Type);
        assert_eq!(field.charset, 33);
        assert_eq!(field.column_len, 255);

        assert!(parse_column_definition(&column("id", 8, 32)[..20]).is_err());
    }

    #[test]
    fn test_row() {
        let fields = vec![
            Field::new("a", MysqlType::TypeVarchar),
            Field::new("b", MysqlType::TypeInt32),
        ];
        let mut data = vec![];
        data.write_len_str(b"hello").unwrap();
        data.push(0xfb);
        let row = parse_row(&data, &fields).unwrap();
        assert_eq!(row[0].as_str(), Some("hello"));
        assert!(row[1].is_null());
        assert!(parse_row(&data[..3], &fields).is_err());
    }

    #[test]
    fn test_row_with_oversized_length() {
        let fields = vec![Field::new("a", MysqlType::TypeVarchar)];
        let data = [0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        match parse_row(&data, &fields) {
            Err(ProtoError::ReadLenEncError) => {}
            other => panic!("Unexpected result {:?}", other),
        }
    }
}
