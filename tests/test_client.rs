use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mysql_fixture::{
    ConfigRecord, Context, Field, MySqlClient, MysqlType, ProtoError, ScriptedBackend,
    ServerHandle, SqlResult, Value,
};
use serde_json::json;

fn users() -> SqlResult {
    SqlResult::new(
        vec![
            Field::new("id", MysqlType::TypeInt64),
            Field::new("name", MysqlType::TypeVarchar),
        ],
        vec![
            vec![Value::text("1"), Value::text("alice")],
            vec![Value::text("2"), Value::null()],
        ],
    )
}

fn start() -> (Arc<ScriptedBackend>, ServerHandle) {
    ScriptedBackend::new()
        .with_credentials("vertx", "password")
        .with_databases(&["testdb", "other"])
        .respond("SELECT id, name FROM users", users())
        .respond("UPDATE users SET name = 'bob'", SqlResult::ok(2, 0))
        .respond("INSERT INTO users (name) VALUES ('carol')", SqlResult::ok(1, 3))
        .respond("SELECT 1", SqlResult::new(vec![Field::new("1", MysqlType::TypeInt64)], vec![vec![Value::text("1")]]))
        .respond("SELECT 2", SqlResult::new(vec![Field::new("2", MysqlType::TypeInt64)], vec![vec![Value::text("2")]]))
        .fail("DROP TABLE users", 1051, "42S02", "Unknown table 'users'")
        .start("127.0.0.1:0")
        .unwrap()
}

fn record(addr: SocketAddr, password: &str, database: &str) -> ConfigRecord {
    json!({
        "host": addr.ip().to_string(),
        "port": addr.port(),
        "password": password,
        "database": database,
        "connectTimeout": 2000,
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_query_result_set() {
    let (backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "testdb")).unwrap();
    assert!(!client.is_connected());

    let result = client.query("SELECT id, name FROM users").unwrap();
    assert!(client.is_connected());
    assert_eq!(result.column_names(), vec!["id", "name"]);
    assert_eq!(result.fields[0].typ, MysqlType::TypeInt64 as i32);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0][1].as_str(), Some("alice"));
    assert!(result.rows[1][1].is_null());
    assert_eq!(result.first_value().and_then(|v| v.as_str()), Some("1"));
    assert_eq!(backend.queries(), vec!["SELECT id, name FROM users"]);
}

#[test]
fn test_execute_and_ping() {
    let (_backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "testdb")).unwrap();
    client.ping().unwrap();
    assert_eq!(client.execute("UPDATE users SET name = 'bob'").unwrap(), 2);
    let inserted = client
        .query("INSERT INTO users (name) VALUES ('carol')")
        .unwrap();
    assert_eq!(inserted.affected_rows, 1);
    assert_eq!(inserted.insert_id, 3);
    assert!(inserted.fields.is_empty());
    client.use_database("other").unwrap();
}

#[test]
fn test_server_error_keeps_connection() {
    let (_backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "testdb")).unwrap();
    client.connect().unwrap();
    let connection_id = client.connection_id();

    match client.execute("DROP TABLE users") {
        Err(ProtoError::Server {
            code,
            state,
            message,
        }) => {
            assert_eq!(code, 1051);
            assert_eq!(state, "42S02");
            assert_eq!(message, "Unknown table 'users'");
        }
        other => panic!("Unexpected result {:?}", other),
    }
    assert_eq!(
        client.query("SELECT nothing").unwrap_err().server_code(),
        Some(1105)
    );
    assert_eq!(client.use_database("missing").unwrap_err().server_code(), Some(1049));

    client.ping().unwrap();
    assert_eq!(client.connection_id(), connection_id);
}

#[test]
fn test_multi_statements() {
    let (backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "testdb")).unwrap();
    let results = client.query_all("SELECT 1; SELECT 2").unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].first_value().and_then(|v| v.as_str()), Some("1"));
    assert_eq!(results[1].first_value().and_then(|v| v.as_str()), Some("2"));
    assert_eq!(backend.queries(), vec!["SELECT 1", "SELECT 2"]);

    // the connection is still in sync
    client.ping().unwrap();
}

#[test]
fn test_access_denied() {
    let (backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "wrong", "testdb")).unwrap();
    match client.connect() {
        Err(ProtoError::Server { code, state, .. }) => {
            assert_eq!(code, 1045);
            assert_eq!(state, "28000");
        }
        other => panic!("Unexpected result {:?}", other),
    }
    assert!(!client.is_connected());
    assert!(backend.queries().is_empty());
}

#[test]
fn test_unknown_database() {
    let (_backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "nope")).unwrap();
    assert_eq!(client.ping().unwrap_err().server_code(), Some(1049));
}

#[test]
fn test_close_quits() {
    let (backend, server) = start();
    let ctx = Context::new();
    let client =
        MySqlClient::create_non_shared(&ctx, record(server.addr(), "password", "")).unwrap();
    client.ping().unwrap();
    assert_eq!(backend.connections_opened(), 1);

    client.close().unwrap();
    assert!(!client.is_connected());
    assert!(wait_until(|| backend.connections_closed() == 1));
    match client.ping() {
        Err(ProtoError::Closed) => {}
        other => panic!("Unexpected result {:?}", other),
    }
}

#[test]
fn test_shared_client_across_threads() {
    let (backend, server) = start();
    let ctx = Context::new();
    let addr = server.addr();
    let clients: Vec<_> = (0..4)
        .map(|_| MySqlClient::create_shared(&ctx, record(addr, "password", "testdb"), "pool").unwrap())
        .collect();
    let handles: Vec<_> = clients
        .into_iter()
        .map(|client| {
            thread::spawn(move || {
                client.ping().unwrap();
                client.query("SELECT 1").unwrap()
            })
        })
        .collect();
    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(result.first_value().and_then(|v| v.as_str()), Some("1"));
    }
    assert_eq!(backend.connections_opened(), 1);
    ctx.close().unwrap();
}
