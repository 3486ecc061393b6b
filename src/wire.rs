use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::LedgerAuthSource;
use crate::ledger::{Ledger, LedgerError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, StudentFilter};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    ledger: Arc<Ledger>,
    password: String,
) -> io::Result<()> {
    let factory = Arc::new(LedgerFactory::new(ledger, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

pub struct LedgerHandler {
    ledger: Arc<Ledger>,
    query_parser: Arc<LedgerQueryParser>,
}

impl LedgerHandler {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            query_parser: Arc::new(LedgerQueryParser),
        }
    }

    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let ledger = &self.ledger;
        match cmd {
            Command::InsertRoom {
                id,
                room_type,
                capacity,
                status,
                floor,
            } => {
                ledger
                    .create_room(id, room_type, capacity, status, floor)
                    .await
                    .map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, patch } => {
                ledger.update_room(id, patch).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertStudent {
                id,
                room_id,
                fields,
            } => {
                ledger.admit(id, room_id, fields).await.map_err(ledger_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateStudent { id, room, patch } => {
                let result = ledger
                    .update_student(id, room, patch)
                    .await
                    .map_err(ledger_err)?;
                if result.moved() {
                    tracing::debug!(
                        "student {id} moved from {:?} to {:?}",
                        result.previous_room_id,
                        result.room_id
                    );
                }
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![ledger.get_room(&id).map_err(ledger_err)?],
                    None => ledger.list_rooms().map_err(ledger_err)?,
                };
                room_rows(&rooms)
            }
            Command::SelectStudents { filter } => {
                let students = match filter {
                    StudentFilter::All => ledger.list_students(),
                    StudentFilter::Id(id) => ledger.get_student(&id).map(|s| vec![s]),
                    StudentFilter::Room(room_id) => ledger.list_room_occupants(&room_id),
                }
                .map_err(ledger_err)?;
                student_rows(&students)
            }
            Command::SelectOccupancy => {
                let summary = ledger.occupancy_summary().map_err(ledger_err)?;
                occupancy_rows(&summary)
            }
            Command::SelectDrift => {
                let drift = ledger.check_consistency().map_err(ledger_err)?;
                drift_rows(&drift)
            }
            Command::Reconcile => {
                let corrected = ledger.reconcile().await.map_err(ledger_err)?;
                drift_rows(&corrected)
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("type"),
        int_field("capacity"),
        int_field("occupied"),
        text_field("status"),
        text_field("display_status"),
        int_field("floor"),
    ]
}

fn student_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("room"),
        text_field("course"),
        text_field("year"),
        text_field("contact"),
        text_field("status"),
        text_field("email"),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        int_field("total_rooms"),
        int_field("total_capacity"),
        int_field("total_occupied"),
        int_field("available_rooms"),
    ]
}

fn drift_schema() -> Vec<FieldInfo> {
    vec![text_field("room_id"), int_field("recorded"), int_field("actual")]
}

fn room_rows(rooms: &[Room]) -> PgWireResult<Response> {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .iter()
        .map(|room| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room.id.to_string())?;
            encoder.encode_field(&room.room_type)?;
            encoder.encode_field(&i64::from(room.capacity))?;
            encoder.encode_field(&i64::from(room.occupied))?;
            encoder.encode_field(&room.status.to_string())?;
            encoder.encode_field(&room.display_status().to_string())?;
            encoder.encode_field(&i64::from(room.floor))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn student_rows(students: &[Student]) -> PgWireResult<Response> {
    let schema = Arc::new(student_schema());
    let rows: Vec<PgWireResult<_>> = students
        .iter()
        .map(|student| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&student.id.to_string())?;
            encoder.encode_field(&student.fields.name)?;
            encoder.encode_field(&student.room_id.map(|r| r.to_string()))?;
            for value in student.fields.optional_values() {
                encoder.encode_field(&value.map(str::to_owned))?;
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn occupancy_rows(summary: &OccupancySummary) -> PgWireResult<Response> {
    let schema = Arc::new(occupancy_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    for value in [
        summary.total_rooms,
        summary.total_capacity,
        summary.total_occupied,
        summary.available_rooms,
    ] {
        encoder.encode_field(&i64::try_from(value).unwrap_or(i64::MAX))?;
    }
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn drift_rows(drift: &[Drift]) -> PgWireResult<Response> {
    let schema = Arc::new(drift_schema());
    let rows: Vec<PgWireResult<_>> = drift
        .iter()
        .map(|d| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&d.room_id.to_string())?;
            encoder.encode_field(&i64::from(d.recorded))?;
            encoder.encode_field(&i64::from(d.actual))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement, without executing it. Statements that
/// return no rows get an empty schema.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim().to_lowercase();
    if lower.trim_end_matches(';').trim() == "reconcile" {
        return drift_schema();
    }
    if !lower.starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|word| *word != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';'));
    match table {
        Some("rooms") => room_schema(),
        Some("students") => student_schema(),
        Some("occupancy") => occupancy_schema(),
        Some("drift") => drift_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for LedgerHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LedgerQueryParser;

#[async_trait]
impl QueryParser for LedgerQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LedgerHandler {
    type Statement = String;
    type QueryParser = LedgerQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// Replace `$1, $2, ...` with the bound parameters as quoted text literals.
///
/// One pass over the statement: substituted values are never rescanned, and
/// placeholders inside quoted strings or identifiers are left alone.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                match digits.parse::<usize>().ok().and_then(|n| params.get(n.checked_sub(1)?)) {
                    Some(Some(text)) => {
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
                continue;
            }
            None => {}
        }
        out.push(c);
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LedgerFactory {
    handler: Arc<LedgerHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LedgerAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LedgerFactory {
    pub fn new(ledger: Arc<Ledger>, password: String) -> Self {
        let auth_source = LedgerAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LedgerHandler::new(ledger)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LedgerFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

fn ledger_err(e: LedgerError) -> PgWireError {
    if !e.is_client_error() {
        tracing::error!("statement failed: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM rooms WHERE id = $1"), 1);
        assert_eq!(
            count_params("INSERT INTO students (id, name, room) VALUES ($1, $3, $2)"),
            3
        );
        assert_eq!(count_params("SELECT '$' FROM rooms WHERE id = $12"), 12);
    }

    #[test]
    fn substitution_is_single_pass() {
        let params = vec![Some("x".to_string()), Some("cost $1 paid".to_string())];
        assert_eq!(
            substitute("INSERT INTO t (a, b) VALUES ($1, $2)", &params),
            "INSERT INTO t (a, b) VALUES ('x', 'cost $1 paid')"
        );
    }

    #[test]
    fn substitution_skips_quoted_text() {
        let params = vec![Some("O'Neill".to_string()), None];
        assert_eq!(
            substitute("SELECT '$1', \"$1\", $1, $2 FROM t", &params),
            "SELECT '$1', \"$1\", 'O''Neill', NULL FROM t"
        );
        assert_eq!(
            substitute("SELECT 'it''s $1' WHERE a = $1", &params),
            "SELECT 'it''s $1' WHERE a = 'O''Neill'"
        );
    }

    #[test]
    fn substitution_reads_whole_index() {
        let params: Vec<_> = (1..=10).map(|i| Some(format!("v{i}"))).collect();
        assert_eq!(substitute("$10 $1", &params), "'v10' 'v1'");
        assert_eq!(substitute("$0 $11 $", &params), "$0 $11 $");
    }

    #[test]
    fn schema_follows_table() {
        assert_eq!(result_schema("SELECT * FROM rooms").len(), 7);
        assert_eq!(result_schema("select * from students where room = $1").len(), 8);
        assert_eq!(result_schema("SELECT * FROM occupancy;").len(), 4);
        assert_eq!(result_schema("SELECT * FROM \"drift\"").len(), 3);
        assert_eq!(result_schema("RECONCILE").len(), 3);
        assert!(result_schema("INSERT INTO rooms (id) VALUES ($1)").is_empty());
        assert!(result_schema("SELECT * FROM notices").is_empty());
    }
}
