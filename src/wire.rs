use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::CourtcalAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, CaseChange, Command, HearingFilter};
use crate::tenant::TenantManager;

pub struct CourtcalHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CourtcalQueryParser>,
}

impl CourtcalHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CourtcalQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Run a command and record its RED metrics.
    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertCourt { court } => {
                engine.create_court(court).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectCourts { id } => {
                let courts = match id {
                    Some(id) => vec![engine.get_court(&id).map_err(engine_err)?],
                    None => engine.list_courts(),
                };
                court_rows(&courts)
            }
            Command::InsertCase { id } => {
                engine.open_case(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateCase { id, change } => {
                let result = match change {
                    CaseChange::Status(status) => engine.set_case_status(id, status).await,
                    CaseChange::AssignJudge(judge) => engine.assign_judge(id, judge).await,
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectCase { id } => {
                let case = engine.get_case(id).await.map_err(engine_err)?;
                case_rows(&case)
            }
            Command::InsertHearing { request, returning } => {
                let hearing = engine.schedule_hearing(request).await.map_err(engine_err)?;
                if returning {
                    hearing_rows(&[hearing])
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::UpdateHearing {
                id,
                change,
                returning,
            } => {
                let hearing = engine
                    .update_hearing(id, change)
                    .await
                    .map_err(engine_err)?;
                if returning {
                    hearing_rows(&[hearing])
                } else {
                    Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
                }
            }
            Command::DeleteHearing { id } => {
                engine.delete_hearing(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectHearings { filter } => {
                let hearings = match filter {
                    HearingFilter::Id(id) => vec![engine.get_hearing(id).await.map_err(engine_err)?],
                    HearingFilter::Case(case_id) => engine
                        .hearings_for_case(case_id)
                        .await
                        .map_err(engine_err)?,
                    HearingFilter::Day { court_id, date } => engine
                        .hearings_for_day(court_id, date)
                        .await
                        .map_err(engine_err)?,
                };
                hearing_rows(&hearings)
            }
            Command::SelectAvailableSlots { court_id, date } => {
                let slots = engine
                    .available_slots(court_id, date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let court_str = court_id.to_string();
                let date_str = date.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&court_str)?;
                        encoder.encode_field(&date_str)?;
                        encoder.encode_field(&format_time_of_day(slot.start))?;
                        encoder.encode_field(&format_time_of_day(slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                )))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn courts_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("location", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("opens", Type::VARCHAR),
        text_field("closes", Type::VARCHAR),
        text_field("slot_minutes", Type::INT4),
        text_field("overlap", Type::VARCHAR),
    ]
}

fn cases_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("judge", Type::VARCHAR),
    ]
}

fn hearings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("case_id", Type::VARCHAR),
        text_field("court_id", Type::VARCHAR),
        text_field("hearing_date", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("court_id", Type::VARCHAR),
        text_field("hearing_date", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
    ]
}

fn court_rows(courts: &[Court]) -> PgWireResult<Response> {
    let schema = Arc::new(courts_schema());
    let rows: Vec<PgWireResult<_>> = courts
        .iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.id.to_string())?;
            encoder.encode_field(&c.name)?;
            encoder.encode_field(&c.location)?;
            encoder.encode_field(&(c.capacity as i64))?;
            encoder.encode_field(&format_time_of_day(c.opens))?;
            encoder.encode_field(&format_time_of_day(c.closes))?;
            encoder.encode_field(&c.slot_minutes)?;
            encoder.encode_field(&c.overlap.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn case_rows(case: &CaseState) -> PgWireResult<Response> {
    let schema = Arc::new(cases_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&case.id.to_string())?;
    encoder.encode_field(&case.status.as_str())?;
    encoder.encode_field(&case.judge)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn hearing_rows(hearings: &[Hearing]) -> PgWireResult<Response> {
    let schema = Arc::new(hearings_schema());
    let rows: Vec<PgWireResult<_>> = hearings
        .iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.id.to_string())?;
            encoder.encode_field(&h.case_id.to_string())?;
            encoder.encode_field(&h.court_id.to_string())?;
            encoder.encode_field(&h.date.to_string())?;
            encoder.encode_field(&format_time_of_day(h.span.start))?;
            encoder.encode_field(&format_time_of_day(h.span.end))?;
            encoder.encode_field(&h.notes)?;
            encoder.encode_field(&h.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Row shape a statement will produce, decided before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let table = match words.first() {
        Some(&"SELECT") => words
            .iter()
            .position(|w| *w == "FROM")
            .and_then(|i| words.get(i + 1))
            .copied(),
        Some(&"INSERT") | Some(&"UPDATE") if words.contains(&"RETURNING") => Some("HEARINGS"),
        _ => None,
    };
    match table {
        Some("AVAILABLE_SLOTS") => slots_schema(),
        Some("COURTS") => courts_schema(),
        Some("CASES") => cases_schema(),
        Some("HEARINGS") => hearings_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CourtcalHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.execute_command(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CourtcalQueryParser;

#[async_trait]
impl QueryParser for CourtcalQueryParser {
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
impl ExtendedQueryHandler for CourtcalHandler {
    type Statement = String;
    type QueryParser = CourtcalQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
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

/// A `$N` placeholder outside quoted literals and identifiers: its byte
/// range in the statement and its 1-based index.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start + 1
                    && let Ok(n) = sql[start + 1..end].parse::<usize>()
                {
                    found.push((start, end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Replace each placeholder with its bound value as a quoted literal, in a
/// single pass so bound text is never rescanned. Unbound indexes are left
/// as written and fail to parse.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[last..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        last = end;
    }
    out.push_str(&sql[last..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CourtcalFactory {
    handler: Arc<CourtcalHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<CourtcalAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl CourtcalFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CourtcalAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CourtcalHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CourtcalFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(CourtcalFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::CaseClosed(_) => "55000",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(ref msg) = e {
        tracing::error!("WAL failure: {msg}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
