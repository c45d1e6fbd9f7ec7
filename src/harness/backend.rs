use std::collections::{HashMap, HashSet};
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::constants::{ServerError, StateError};
use crate::errors::{ProtoError, ProtoResult};
use crate::proto::{check_native_password, Handler, Listener, ServerHandle};
use crate::sql_type::SqlResult;

use dakv_logger::prelude::*;

enum Response {
    Result(SqlResult),
    Error(u16, String, String),
}

/// In-process MySQL server answering scripted queries.
#[derive(Default)]
pub struct ScriptedBackend {
    credentials: Option<(String, String)>,
    databases: HashSet<String>,
    responses: Mutex<HashMap<String, Response>>,
    queries: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

impl ScriptedBackend {
    pub fn new() -> Self {
        ScriptedBackend::default()
    }

    /// Only accept this user with this password. Anyone is accepted otherwise.
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    /// Only accept these databases. Any database is accepted otherwise.
    pub fn with_databases(mut self, databases: &[&str]) -> Self {
        self.databases = databases.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn respond(self, sql: &str, result: SqlResult) -> Self {
        self.set_response(sql, result);
        self
    }

    pub fn fail(self, sql: &str, code: u16, state: &str, message: &str) -> Self {
        self.lock_responses().insert(
            normalize(sql),
            Response::Error(code, state.to_string(), message.to_string()),
        );
        self
    }

    pub fn set_response(&self, sql: &str, result: SqlResult) {
        self.lock_responses()
            .insert(normalize(sql), Response::Result(result));
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<HashMap<String, Response>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every query received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Listen on `addr` in the background.
    pub fn start<Addr: ToSocketAddrs>(self, addr: Addr) -> ProtoResult<(Arc<Self>, ServerHandle)> {
        let backend = Arc::new(self);
        let handle = Listener::new_tcp_listener(addr)?.spawn(backend.clone())?;
        Ok((backend, handle))
    }
}

impl Handler for ScriptedBackend {
    fn new_connection(&self, connection_id: u32) {
        debug!("New connection {}", connection_id);
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn close_connection(&self, connection_id: u32) {
        debug!("Close connection {}", connection_id);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn check_auth(&self, user: &str, salt: &[u8], auth_response: &[u8]) -> bool {
        match &self.credentials {
            None => true,
            Some((u, p)) => u == user && check_native_password(p, salt, auth_response),
        }
    }

    fn init_db(&self, database: &str) -> ProtoResult<()> {
        if self.databases.is_empty() || self.databases.contains(database) {
            return Ok(());
        }
        Err(ProtoError::server(
            ServerError::ERBadDb as u16,
            StateError::SSSyntaxErrorOrAccessViolation.as_str(),
            format!("Unknown database '{}'", database),
        ))
    }

    fn com_query(
        &self,
        sql: &str,
        callback: &mut dyn FnMut(SqlResult) -> ProtoResult<()>,
    ) -> ProtoResult<()> {
        let sql = normalize(sql);
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.clone());
        let result = match self.lock_responses().get(&sql) {
            Some(Response::Result(result)) => result.clone(),
            Some(Response::Error(code, state, message)) => {
                return Err(ProtoError::server(*code, state, message.as_str()));
            }
            None => {
                return Err(ProtoError::server(
                    ServerError::ERUnknownError as u16,
                    StateError::SSUnknownSQLState.as_str(),
                    format!("No scripted response for '{}'", sql),
                ));
            }
        };
        callback(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::ProtoError;
    use crate::harness::ScriptedBackend;
    use crate::proto::Handler;
    use crate::sql_type::SqlResult;

    #[test]
    fn test_scripted_query() {
        let backend = ScriptedBackend::new()
            .respond("UPDATE t SET a = 1", SqlResult::ok(3, 0))
            .fail("DROP TABLE t", 1051, "42S02", "Unknown table 't'");

        let mut got = vec![];
        backend
            .com_query("UPDATE t SET a = 1;", &mut |r| {
                got.push(r);
                Ok(())
            })
            .unwrap();
        assert_eq!(got, vec![SqlResult::ok(3, 0)]);

        let err = backend.com_query("DROP TABLE t", &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.server_code(), Some(1051));
        match backend.com_query("SELECT nothing", &mut |_| Ok(())) {
            Err(ProtoError::Server { code: 1105, .. }) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(
            backend.queries(),
            vec!["UPDATE t SET a = 1", "DROP TABLE t", "SELECT nothing"]
        );
    }

    #[test]
    fn test_init_db() {
        let backend = ScriptedBackend::new().with_databases(&["testdb"]);
        assert!(backend.init_db("testdb").is_ok());
        assert_eq!(backend.init_db("other").unwrap_err().server_code(), Some(1049));
        assert!(ScriptedBackend::new().init_db("anything").is_ok());
    }
}
