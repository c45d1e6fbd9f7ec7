use std::sync::Arc;

use mysql_fixture::{Field, Handler, Listener, MysqlType, ProtoResult, SqlResult, Value};

use dakv_logger::prelude::*;
use dakv_logger::set_logger_level;

struct Server {
    listener: Listener,
}

impl Server {
    pub fn new(addr: &str) -> ProtoResult<Self> {
        Ok(Server {
            listener: Listener::new_tcp_listener(addr)?,
        })
    }

    pub fn start(&mut self, handler: Arc<dyn Handler>) {
        self.listener.accept(handler);
    }
}

/// Answers `SELECT <n>` with `n`, anything else with an OK packet.
struct Echo {}

impl Handler for Echo {
    fn new_connection(&self, connection_id: u32) {
        info!("Connection {} opened", connection_id);
    }

    fn close_connection(&self, connection_id: u32) {
        info!("Connection {} closed", connection_id);
    }

    fn com_query(
        &self,
        sql: &str,
        callback: &mut dyn FnMut(SqlResult) -> ProtoResult<()>,
    ) -> ProtoResult<()> {
        info!("sql:{}", sql);
        let upper = sql.trim().to_uppercase();
        match upper.strip_prefix("SELECT ") {
            Some(expr) => {
                let expr = expr.trim();
                callback(SqlResult::new(
                    vec![Field::new(expr, MysqlType::TypeVarchar)],
                    vec![vec![Value::text(expr)]],
                ))
            }
            None => callback(SqlResult::default()),
        }
    }
}

fn main() {
    let _logger = set_logger_level(true, None);
    let mut s = match Server::new("127.0.0.1:5000") {
        Ok(s) => s,
        Err(e) => {
            error!("Listen failed: {}", e);
            return;
        }
    };
    s.start(Arc::new(Echo {}));
}
