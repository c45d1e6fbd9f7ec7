use std::io::Write;
use std::sync::Arc;

use crate::constants::{
    CapabilityFlag, PacketType, ServerError, StateError, DEFAULT_SERVER_CAPABILITY, NULL_VALUE,
    SERVER_MORE_RESULTS_EXISTS,
};
use crate::errors::{ProtoError, ProtoResult};
use crate::proto::auth::Auth;
use crate::proto::greeting::Greeting;
use crate::proto::packets::{len_enc_str_size, Packets, ReadAndWrite, WriteLenEncode};
use crate::proto::Handler;
use crate::sql_type::{type_to_mysql, Field, SqlResult, Value};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dakv_logger::prelude::*;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Server side of one client connection.
pub struct Connection {
    id: u32,
    greeting: Greeting,
    auth: Auth,
    packets: Packets,
    capability: u32,
    status_flags: u16,
    database: String,
}

impl Connection {
    pub fn new(id: u32, server_version: String, stream: Box<dyn ReadAndWrite>) -> Self {
        let greeting = Greeting::new(id, server_version);
        Connection {
            id,
            status_flags: greeting.status_flag(),
            greeting,
            auth: Auth::new(),
            packets: Packets::new(stream),
            capability: 0,
            database: String::new(),
        }
    }

    /// Run the handshake, then serve commands until the client quits or the stream breaks.
    pub fn handle(&mut self, handler: Arc<dyn Handler>) {
        handler.new_connection(self.id);
        match self.handshake(handler.as_ref()) {
            Ok(true) => loop {
                match self.handle_next_command(handler.clone()) {
                    Ok(()) => {}
                    Err(ProtoError::ComQuit) => {
                        debug!("Connection {} quit", self.id);
                        break;
                    }
                    Err(err) => {
                        debug!("Connection {} closed: {}", self.id, err);
                        break;
                    }
                }
            },
            Ok(false) => {
                info!("Connection {} rejected", self.id);
            }
            Err(err) => {
                error!("Handshake of connection {} failed: {}", self.id, err);
            }
        }
        handler.close_connection(self.id);
    }

    fn handshake(&mut self, handler: &dyn Handler) -> ProtoResult<bool> {
        let greeting = self.greeting.write_handshake_v10()?;
        self.packets.write_packet(greeting.as_slice())?;

        let payload = self.packets.read_packet()?;
        if let Err(err) = self.auth.parse_client_handshake_packet(payload.as_slice()) {
            self.packets.write_err_packet(
                ServerError::ERUnknownError as u16,
                StateError::SSHandshakeError.as_str(),
                &format!("Bad handshake: {}", err),
            )?;
            return Ok(false);
        }
        debug!("{}", self.auth);

        if !handler.check_auth(
            self.auth.user(),
            self.greeting.salt(),
            self.auth.auth_response(),
        ) {
            let msg = format!("Access denied for user '{}'", self.auth.user());
            self.packets.write_err_packet(
                ServerError::ERAccessDeniedError as u16,
                StateError::SSAccessDeniedError.as_str(),
                &msg,
            )?;
            return Ok(false);
        }

        self.capability = self.auth.capability_flags() & DEFAULT_SERVER_CAPABILITY;
        if !self.auth.database().is_empty() {
            let database = self.auth.database().to_string();
            match handler.init_db(&database) {
                Ok(()) => self.database = database,
                Err(ProtoError::Server {
                    code,
                    state,
                    message,
                }) => {
                    self.packets.write_err_packet(code, &state, &message)?;
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }
        self.packets.write_ok_packet(0, 0, self.status_flags, 0)?;
        Ok(true)
    }

    pub fn handle_next_command(&mut self, handler: Arc<dyn Handler>) -> ProtoResult<()> {
        self.packets.reset_sequence();
        let data = self.packets.read_packet()?;
        if data.is_empty() {
            return Err(ProtoError::EmptyPacketError);
        }
        let pt = PacketType::from(data[0]);
        debug!("Packet type {}", pt.as_str());

        match pt {
            PacketType::ComQuit => {
                return Err(ProtoError::ComQuit);
            }
            PacketType::ComInitDB => {
                let db = trim_packet_type(&data)?;
                debug!("ComInitDB {}", db);
                match handler.init_db(&db) {
                    Ok(()) => {
                        self.database = db;
                        self.packets.write_ok_packet(0, 0, self.status_flags, 0)?;
                    }
                    Err(err) => self.write_handler_err(err)?,
                }
            }
            PacketType::ComPing | PacketType::ComResetConnection => {
                self.packets.write_ok_packet(0, 0, self.status_flags, 0)?;
            }
            PacketType::ComQuery => {
                let query = trim_packet_type(&data)?;
                let statements = if CapabilityFlag::CapabilityClientMultiStatements
                    .is_set(self.capability)
                    && query.contains(';')
                {
                    split_statements(&query)
                } else {
                    vec![query]
                };

                let length = statements.len();
                for (index, sql) in statements.iter().enumerate() {
                    debug!("[{}] sql:{}", self.database, sql);
                    let more = index != length - 1;
                    if !self.exec_query(handler.clone(), sql, more)? {
                        // The rest of a multi statement query is skipped after an error.
                        break;
                    }
                }
            }
            PacketType::ComSetOption => match parse_set_option(&data) {
                Ok(0) => {
                    self.capability |= CapabilityFlag::CapabilityClientMultiStatements as u32;
                    self.packets.write_eof_packet(self.status_flags, 0)?;
                }
                Ok(1) => {
                    self.capability &= !(CapabilityFlag::CapabilityClientMultiStatements as u32);
                    self.packets.write_eof_packet(self.status_flags, 0)?;
                }
                Ok(_) => {
                    self.packets.write_err_packet(
                        ServerError::ERUnknownComError as u16,
                        StateError::SSUnknownComError.as_str(),
                        "Unknown set option",
                    )?;
                }
                Err(_) => {
                    self.packets.write_err_packet(
                        ServerError::ERUnknownComError as u16,
                        StateError::SSUnknownComError.as_str(),
                        "Error parsing set option",
                    )?;
                }
            },
            _ => {
                debug!("Unknown command {}", pt.as_str());
                self.packets.write_err_packet(
                    ServerError::ERUnknownComError as u16,
                    StateError::SSUnknownComError.as_str(),
                    &format!("Unknown command: 0x{:02x}", data[0]),
                )?;
            }
        }
        Ok(())
    }

    /// Run one statement through the handler. Returns false if the client got an ERR packet.
    fn exec_query(&mut self, handler: Arc<dyn Handler>, sql: &str, more: bool) -> ProtoResult<bool> {
        let mut send_finished = false;
        let mut field_sent = false;
        let mut flags = self.status_flags;
        if more {
            flags |= SERVER_MORE_RESULTS_EXISTS;
        }
        let result = handler.com_query(sql, &mut |qr: SqlResult| -> ProtoResult<()> {
            if send_finished {
                return Err(box_err!("result of {:?} already sent", sql));
            }
            if !field_sent {
                field_sent = true;
                if qr.fields.is_empty() {
                    send_finished = true;
                    return self
                        .packets
                        .write_ok_packet(qr.affected_rows, qr.insert_id, flags, 0);
                }
                self.write_fields(&qr.fields)?;
            }
            self.write_rows(qr.rows)
        });
        debug!("field_sent:{}, send_finished:{}", field_sent, send_finished);

        if let Err(err) = result {
            self.write_handler_err(err)?;
            return Ok(false);
        }
        if !field_sent {
            self.packets.write_ok_packet(0, 0, flags, 0)?;
        } else if !send_finished {
            self.write_end_result(flags)?;
        }
        Ok(true)
    }

    /// Server errors go back to the client, anything else closes the connection.
    fn write_handler_err(&mut self, err: ProtoError) -> ProtoResult<()> {
        match err {
            ProtoError::Server {
                code,
                state,
                message,
            } => self.packets.write_err_packet(code, &state, &message),
            err => Err(err),
        }
    }

    /// Write the column count and all column definitions.
    fn write_fields(&mut self, fields: &[Field]) -> ProtoResult<()> {
        let mut data = Vec::new();
        data.write_len_int(fields.len() as u64)?;
        self.packets.write_packet(data.as_slice())?;
        for f in fields {
            let column = write_column_definition(f)?;
            self.packets.write_packet(column.as_slice())?;
        }
        if !CapabilityFlag::CapabilityClientDeprecateEOF.is_set(self.capability) {
            self.packets.write_eof_packet(self.status_flags, 0)?;
        }
        Ok(())
    }

    fn write_rows(&mut self, rows: Vec<Vec<Value>>) -> ProtoResult<()> {
        for row in rows {
            let mut data = Vec::new();
            for val in row {
                if val.is_null() {
                    data.write_u8(NULL_VALUE)?;
                } else {
                    data.write_len_str(val.val.as_slice())?;
                }
            }
            self.packets.write_packet(data.as_slice())?;
        }
        Ok(())
    }

    fn write_end_result(&mut self, flags: u16) -> ProtoResult<()> {
        if CapabilityFlag::CapabilityClientDeprecateEOF.is_set(self.capability) {
            self.packets.write_ok_packet_with_eof_header(0, 0, flags, 0)
        } else {
            self.packets.write_eof_packet(flags, 0)
        }
    }
}

/// Protocol::ColumnDefinition41
fn write_column_definition(field: &Field) -> ProtoResult<Vec<u8>> {
    let (typ, mut flags) = match type_to_mysql(field.typ) {
        Some(t) => t,
        None => return Err(box_err!("unknown type {} of column {}", field.typ, field.name)),
    };
    if field.flags != 0 {
        flags = field.flags as u16;
    }
    let capacity = 4 +
        len_enc_str_size(&field.database) +
        len_enc_str_size(&field.table) +
        len_enc_str_size(&field.org_table) +
        len_enc_str_size(&field.name) +
        len_enc_str_size(&field.org_name) +
        1 + // length of fixed length fields
        2 + // character set
        4 + // column length
        1 + // type
        2 + // flags
        1 + // decimals
        2; // filler
    let mut data = Vec::with_capacity(capacity);
    data.write_len_str(b"def")?;
    data.write_len_str(field.database.as_bytes())?;
    data.write_len_str(field.table.as_bytes())?;
    data.write_len_str(field.org_table.as_bytes())?;
    data.write_len_str(field.name.as_bytes())?;
    data.write_len_str(field.org_name.as_bytes())?;

    data.write_u8(0x0c)?;
    data.write_u16::<LittleEndian>(field.charset as u16)?;
    data.write_u32::<LittleEndian>(field.column_len)?;
    data.write_u8(typ)?;
    data.write_u16::<LittleEndian>(flags)?;
    data.write_u8(field.decimals as u8)?;
    data.write_all(&[0, 0])?;
    Ok(data)
}

fn trim_packet_type(data: &[u8]) -> ProtoResult<String> {
    Ok(String::from_utf8(data[1..].to_vec())?)
}

fn parse_set_option(data: &[u8]) -> ProtoResult<u16> {
    let mut data = &data[1..];
    data.read_u16::<LittleEndian>()
        .map_err(|_| ProtoError::ParseComSetOptionError)
}

/// Split a multi statement query. Anything the parser rejects runs as one statement.
fn split_statements(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) if !statements.is_empty() => {
            statements.iter().map(|s| s.to_string()).collect()
        }
        Ok(_) => vec![sql.to_string()],
        Err(err) => {
            debug!("Parse {:?} failed: {:?}", sql, err);
            vec![sql.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::proto::connection::{parse_set_option, split_statements, write_column_definition};
    use crate::sql_type::{Field, MysqlType};

    #[test]
    fn test_split_statements() {
        let statements = split_statements("SELECT a FROM t; SELECT b FROM u");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("FROM t"));
        assert!(statements[1].ends_with("FROM u"));
        assert_eq!(split_statements("PING PONG; ?"), vec!["PING PONG; ?".to_string()]);
    }

    #[test]
    fn test_set_option() {
        assert_eq!(parse_set_option(&[0x1b, 0x01, 0x00]).unwrap(), 1);
        assert!(parse_set_option(&[0x1b]).is_err());
    }

    #[test]
    fn test_column_definition() {
        let data = write_column_definition(&Field::new("id", MysqlType::TypeInt64)).unwrap();
        assert_eq!(&data[..4], &[3, b'd', b'e', b'f']);
        let mut bad = Field::new("x", MysqlType::TypeInt64);
        bad.typ = -1;
        assert!(write_column_definition(&bad).is_err());
    }
}
