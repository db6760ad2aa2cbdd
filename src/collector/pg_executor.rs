//! PgBouncer executor backed by the `postgres` client.
//!
//! The PgBouncer admin console only speaks the simple query protocol, so all
//! values arrive as text (or NULL). A single connection is kept and lazily
//! re-established: a statement that finds the connection closed by the server
//! reconnects and runs once more, other failures drop the client and the next
//! probe reconnects.

use std::time::Duration;

use postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tracing::{debug, info};

use super::executor::{QueryError, QueryExecutor, RowCursor};
use super::value::ColumnValue;

/// Default timeout for establishing the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Statement used as connectivity probe.
const PING_QUERY: &str = ";";

/// [`QueryExecutor`] over a single PostgreSQL-protocol connection.
pub struct PostgresExecutor {
    config: Config,
    client: Option<Client>,
}

impl PostgresExecutor {
    /// Parses the connection string. Does not connect.
    ///
    /// Accepts both `key=value` and `postgres://` URL forms.
    pub fn new(connection_string: &str) -> Result<Self, QueryError> {
        let mut config: Config = connection_string.parse().map_err(|e: postgres::Error| {
            QueryError::ConnectionError(format!("invalid connection string: {}", e))
        })?;
        config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        Ok(Self {
            config,
            client: None,
        })
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout(timeout);
        self
    }

    /// Returns the connected client, connecting first if needed.
    fn ensure_connected(&mut self) -> Result<&mut Client, QueryError> {
        if self.client.is_none() {
            let client = self
                .config
                .connect(NoTls)
                .map_err(|e| QueryError::ConnectionError(format_postgres_error(&e)))?;
            info!(hosts = ?self.config.get_hosts(), "connected to pgbouncer");
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| QueryError::ConnectionError("not connected".to_string()))
    }

    /// Drops the connection if the error left it unusable.
    fn check_connection(&mut self, e: &postgres::Error) {
        if connection_lost(e) {
            debug!(error = %e, "dropping pgbouncer connection");
            self.client = None;
        }
    }

    /// Runs `sql` with the simple query protocol.
    ///
    /// A connection that was reused from an earlier call and turns out to be
    /// dead is replaced, and `sql` is retried once on the fresh connection.
    fn simple_query(&mut self, sql: &str) -> Result<Vec<SimpleQueryMessage>, QueryError> {
        let reused = self.client.is_some();
        let result = self.ensure_connected()?.simple_query(sql);
        let e = match result {
            Ok(messages) => return Ok(messages),
            Err(e) => e,
        };
        if !(reused && connection_lost(&e)) {
            self.check_connection(&e);
            return Err(QueryError::QueryError(format_postgres_error(&e)));
        }

        info!(error = %e, "pgbouncer connection lost, reconnecting");
        self.client = None;
        let result = self.ensure_connected()?.simple_query(sql);
        result.map_err(|e| {
            self.check_connection(&e);
            QueryError::QueryError(format_postgres_error(&e))
        })
    }
}

/// Whether the error means the connection can no longer be used.
fn connection_lost(e: &postgres::Error) -> bool {
    match e.as_db_error() {
        Some(db_error) => matches!(db_error.severity(), "FATAL" | "PANIC"),
        None => true,
    }
}

impl QueryExecutor for PostgresExecutor {
    fn ping(&mut self) -> Result<(), QueryError> {
        match self.simple_query(PING_QUERY) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.client = None;
                Err(match e {
                    QueryError::QueryError(msg) => QueryError::ConnectionError(msg),
                    other => other,
                })
            }
        }
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, QueryError> {
        let messages = self.simple_query(sql)?;

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    columns = Some(description.iter().map(|c| c.name().to_string()).collect());
                }
                SimpleQueryMessage::Row(row) => {
                    if columns.is_none() {
                        columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                    }
                    rows.push(row);
                }
                _ => {}
            }
        }

        Ok(Box::new(SimpleRowCursor {
            columns: columns.unwrap_or_default(),
            rows,
            position: None,
        }))
    }
}

/// Cursor over an already received simple query result.
struct SimpleRowCursor {
    columns: Vec<String>,
    rows: Vec<SimpleQueryRow>,
    position: Option<usize>,
}

impl RowCursor for SimpleRowCursor {
    fn columns(&mut self) -> Result<Vec<String>, QueryError> {
        Ok(self.columns.clone())
    }

    fn advance(&mut self) -> Result<bool, QueryError> {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next);
        Ok(next < self.rows.len())
    }

    fn read_row(&mut self, slots: &mut [ColumnValue]) -> Result<(), QueryError> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| QueryError::RowError("no current row".to_string()))?;
        if row.len() != slots.len() {
            return Err(QueryError::RowError(format!(
                "expected {} columns, got {}",
                slots.len(),
                row.len()
            )));
        }
        for (i, slot) in slots.iter_mut().enumerate() {
            let value = row
                .try_get(i)
                .map_err(|e| QueryError::RowError(e.to_string()))?;
            *slot = value.map_or(ColumnValue::Null, ColumnValue::from);
        }
        Ok(())
    }
}

/// Formats a client error for logs and metrics.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    const READY_FOR_QUERY: [u8; 6] = [b'Z', 0, 0, 0, 5, b'I'];

    /// Backend that speaks just enough of the protocol to answer simple
    /// queries. It closes its first connection after one statement, the way
    /// PgBouncer drops clients on restart. Returns the number of accepted
    /// connections once the client hangs up.
    fn restarting_backend() -> (u16, thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut accepted = 0;
            for stream in listener.incoming().take(2) {
                let limit = if accepted == 0 { Some(1) } else { None };
                accepted += 1;
                serve_connection(stream.unwrap(), limit);
            }
            accepted
        });
        (port, handle)
    }

    fn serve_connection(mut stream: TcpStream, limit: Option<usize>) {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut startup = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        stream.read_exact(&mut startup).unwrap();
        // AuthenticationOk
        stream.write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]).unwrap();
        stream.write_all(&READY_FOR_QUERY).unwrap();

        let mut answered = 0;
        while limit.is_none_or(|n| answered < n) {
            let mut header = [0u8; 5];
            if stream.read_exact(&mut header).is_err() {
                return;
            }
            let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
            let mut body = vec![0u8; len - 4];
            if stream.read_exact(&mut body).is_err() || header[0] != b'Q' {
                return;
            }
            let mut complete = vec![b'C', 0, 0, 0, 13];
            complete.extend_from_slice(b"SELECT 0\0");
            stream.write_all(&complete).unwrap();
            stream.write_all(&READY_FOR_QUERY).unwrap();
            answered += 1;
        }
    }

    #[test]
    fn parses_key_value_connection_string() {
        let exec = PostgresExecutor::new("host=localhost port=6432 user=pgbouncer dbname=pgbouncer");
        assert!(exec.is_ok());
    }

    #[test]
    fn parses_url_connection_string() {
        let exec = PostgresExecutor::new("postgres://pgbouncer@127.0.0.1:6432/pgbouncer")
            .map(|e| e.with_connect_timeout(Duration::from_secs(1)));
        assert!(exec.is_ok());
    }

    #[test]
    fn rejects_malformed_connection_string() {
        let err = PostgresExecutor::new("host=localhost port=notaport")
            .err()
            .unwrap();
        assert!(matches!(err, QueryError::ConnectionError(ref m) if m.starts_with("invalid connection string")));
    }

    #[test]
    fn unreachable_backend_fails_ping() {
        let mut exec = PostgresExecutor::new("host=127.0.0.1 port=1 user=pgbouncer dbname=pgbouncer")
            .unwrap()
            .with_connect_timeout(Duration::from_secs(1));
        assert!(matches!(exec.ping(), Err(QueryError::ConnectionError(_))));
        assert!(exec.client.is_none());
    }

    #[test]
    fn reconnects_when_server_closed_connection() {
        let (port, backend) = restarting_backend();
        let mut exec = PostgresExecutor::new(&format!(
            "host=127.0.0.1 port={} user=pgbouncer dbname=pgbouncer",
            port
        ))
        .unwrap()
        .with_connect_timeout(Duration::from_secs(2));

        exec.ping().unwrap();
        // The backend has hung up on the first connection by now.
        exec.ping().unwrap();
        exec.ping().unwrap();
        assert!(exec.client.is_some());

        drop(exec);
        assert_eq!(backend.join().unwrap(), 2);
    }
}
