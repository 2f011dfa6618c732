use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::response::NoticeResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{session_owner, RentDeskAuthSource};
use crate::engine::{BookingOutcome, Engine, EngineError};
use crate::limits::PUBLIC_USER;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::owner::OwnerManager;
use crate::sql::{self, Command, SqlError};

/// Who is on the other end of a connection.
struct Session {
    engine: Arc<Engine>,
    public: bool,
}

pub struct RentDeskHandler {
    owners: Arc<OwnerManager>,
    query_parser: Arc<RentDeskQueryParser>,
}

impl RentDeskHandler {
    pub fn new(owners: Arc<OwnerManager>) -> Self {
        Self {
            owners,
            query_parser: Arc::new(RentDeskQueryParser),
        }
    }

    fn session<C: ClientInfo>(&self, client: &C) -> PgWireResult<Session> {
        let meta = client.metadata();
        let user = meta.get("user").map(String::as_str).unwrap_or_default();
        let owner = session_owner(user, meta.get("database").map(String::as_str));
        let engine = self.owners.get_or_create(owner).map_err(engine_err)?;
        Ok(Session {
            engine,
            public: user == PUBLIC_USER,
        })
    }

    /// Parse and run one statement, recording query metrics. Overlap
    /// warnings are collected into `notices` for the client.
    async fn run(
        &self,
        session: &Session,
        query: &str,
        notices: &mut Vec<String>,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        tracing::debug!(owner = session.engine.owner(), command = label, "query");

        let started = Instant::now();
        let result = self.execute_command(session, cmd, notices).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        session: &Session,
        cmd: Command,
        notices: &mut Vec<String>,
    ) -> PgWireResult<Response> {
        if session.public && !cmd.is_public() {
            return Err(user_error(
                "42501",
                "public sessions may only request bookings, list available cars or sign up".into(),
            ));
        }
        let engine = session.engine.as_ref();

        match cmd {
            Command::InsertCar(new) => {
                engine.add_car(new).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateCar { id, changes } => {
                engine.update_car(id, changes).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteCar { id } => {
                engine.delete_car(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking(new) => {
                let outcome = engine.create_booking(new).await.map_err(engine_err)?;
                overlap_notice(&outcome, notices);
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertBookingRequest(new) => {
                let outcome = engine
                    .submit_booking_request(new)
                    .await
                    .map_err(engine_err)?;
                if !session.public {
                    overlap_notice(&outcome, notices);
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBooking { id, changes } => {
                let outcome = engine
                    .update_booking(id, changes)
                    .await
                    .map_err(engine_err)?;
                overlap_notice(&outcome, notices);
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { .. } => Err(user_error(
                "42501",
                "bookings are kept for the record; set status = 'Rejected' instead".into(),
            )),
            Command::InsertExpense(new) => {
                engine.add_expense(new).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertUser { username, password } => {
                let added = if session.public {
                    engine.sign_up(&username, &password).await
                } else {
                    engine.add_user(&username, &password).await
                };
                added.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectCars => Ok(query_response(
                cars_schema(),
                engine.cars().await,
                encode_car,
            )),
            Command::SelectBookings { car_id } => Ok(query_response(
                bookings_schema(),
                engine.bookings(car_id).await,
                encode_booking,
            )),
            Command::SelectExpenses => Ok(query_response(
                expenses_schema(),
                engine.expenses().await,
                |enc, e: &Expense| {
                    enc.encode_field(&e.id.to_string())?;
                    enc.encode_field(&e.car_id.to_string())?;
                    enc.encode_field(&e.date.to_string())?;
                    enc.encode_field(&e.description)?;
                    enc.encode_field(&e.amount)?;
                    enc.encode_field(&e.kind.as_str())
                },
            )),
            Command::SelectMaintenance => Ok(query_response(
                maintenance_schema(),
                engine.maintenance_schedule().await,
                |enc, m: &MaintenanceEntry| {
                    enc.encode_field(&m.car_id.to_string())?;
                    enc.encode_field(&m.name)?;
                    enc.encode_field(&m.last_service_date.map(|d| d.to_string()))?;
                    enc.encode_field(&m.next_service_date.map(|d| d.to_string()))
                },
            )),
            Command::SelectSummary => Ok(query_response(
                summary_schema(),
                vec![engine.summary().await],
                |enc, s: &Summary| {
                    enc.encode_field(&s.total_income)?;
                    enc.encode_field(&s.total_expenses)?;
                    enc.encode_field(&s.profit)
                },
            )),
            Command::SelectConflicts { car_id, start, end } => {
                let availability = engine
                    .check_availability(car_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(query_response(
                    bookings_schema(),
                    availability.conflicts,
                    encode_booking,
                ))
            }
            Command::SelectAvailableCars { start, end } => {
                let offers = engine
                    .available_cars(start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(query_response(
                    available_cars_schema(),
                    offers,
                    |enc, offer: &crate::engine::CarOffer| {
                        enc.encode_field(&offer.car.id.to_string())?;
                        enc.encode_field(&offer.car.name)?;
                        enc.encode_field(&offer.car.plate_number)?;
                        enc.encode_field(&offer.car.model)?;
                        enc.encode_field(&offer.car.status.as_str())?;
                        enc.encode_field(&(offer.overlapping as i64))
                    },
                ))
            }
        }
    }
}

fn overlap_notice(outcome: &BookingOutcome, notices: &mut Vec<String>) {
    if outcome.conflicts.is_empty() {
        return;
    }
    let ids: Vec<String> = outcome.conflicts.iter().map(|b| b.id.to_string()).collect();
    notices.push(format!(
        "booking {} overlaps {} (flagged as rebooking)",
        outcome.booking.id,
        ids.join(", ")
    ));
}

async fn send_notices<C>(client: &mut C, notices: Vec<String>) -> PgWireResult<()>
where
    C: Sink<PgWireBackendMessage> + Unpin + Send,
    PgWireError: From<C::Error>,
{
    for message in notices {
        let info = ErrorInfo::new("WARNING".into(), "01000".into(), message);
        client
            .send(PgWireBackendMessage::NoticeResponse(NoticeResponse::from(info)))
            .await?;
    }
    Ok(())
}

// ── Result schemas ──────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn cars_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("plate_number", Type::VARCHAR),
        field("model", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("last_service_date", Type::VARCHAR),
        field("next_service_date", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("car_id", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("contact", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("purpose", Type::VARCHAR),
        field("amount_paid", Type::INT8),
        field("status", Type::VARCHAR),
        field("rebooking", Type::BOOL),
    ]
}

fn expenses_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("car_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("amount", Type::INT8),
        field("kind", Type::VARCHAR),
    ]
}

fn maintenance_schema() -> Vec<FieldInfo> {
    vec![
        field("car_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("last_service_date", Type::VARCHAR),
        field("next_service_date", Type::VARCHAR),
    ]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![
        field("total_income", Type::INT8),
        field("total_expenses", Type::INT8),
        field("profit", Type::INT8),
    ]
}

fn available_cars_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("plate_number", Type::VARCHAR),
        field("model", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("overlapping", Type::INT8),
    ]
}

/// Result columns of a statement, found from the table after `FROM`.
/// Statements with parameters cannot be parsed before binding, so this
/// looks at the raw text.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut tokens = lower.split_whitespace();
    if tokens.next() != Some("select") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| *t != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '"'));
    match table {
        Some("cars") => cars_schema(),
        Some("bookings") | Some("conflicts") => bookings_schema(),
        Some("expenses") => expenses_schema(),
        Some("maintenance") => maintenance_schema(),
        Some("summary") => summary_schema(),
        Some("available_cars") => available_cars_schema(),
        _ => vec![],
    }
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_car(enc: &mut DataRowEncoder, car: &Car) -> PgWireResult<()> {
    enc.encode_field(&car.id.to_string())?;
    enc.encode_field(&car.name)?;
    enc.encode_field(&car.plate_number)?;
    enc.encode_field(&car.model)?;
    enc.encode_field(&car.status.as_str())?;
    enc.encode_field(&car.last_service_date.map(|d| d.to_string()))?;
    enc.encode_field(&car.next_service_date.map(|d| d.to_string()))
}

fn encode_booking(enc: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.car_id.to_string())?;
    enc.encode_field(&b.customer_name)?;
    enc.encode_field(&b.contact)?;
    enc.encode_field(&b.start_date.to_string())?;
    enc.encode_field(&b.end_date.to_string())?;
    enc.encode_field(&b.purpose)?;
    enc.encode_field(&b.amount_paid)?;
    enc.encode_field(&b.status.as_str())?;
    enc.encode_field(&b.rebooking)
}

// ── Query handlers ──────────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for RentDeskHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.session(client)?;
        let mut notices = Vec::new();
        let response = self.run(&session, query, &mut notices).await?;
        send_notices(client, notices).await?;
        Ok(vec![response])
    }
}

#[derive(Debug)]
pub struct RentDeskQueryParser;

#[async_trait]
impl QueryParser for RentDeskQueryParser {
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
impl ExtendedQueryHandler for RentDeskHandler {
    type Statement = String;
    type QueryParser = RentDeskQueryParser;

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
        let session = self.session(client)?;
        let sql = substitute_params(portal);
        let mut notices = Vec::new();
        let response = self.run(&session, &sql, &mut notices).await?;
        send_notices(client, notices).await?;
        Ok(response)
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

/// Highest `$n` placeholder in the statement.
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

/// Inline bound parameters as quoted literals. Every parameter is declared
/// VARCHAR, so the text form is what the client sent.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass: inserted values are never rescanned, and `$n`
/// inside quoted literals is left alone.
fn inline_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let slot = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                if let Some(param) = slot {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(value) => {
                            let text = String::from_utf8_lossy(value.as_ref());
                            out.push('\'');
                            out.push_str(&text.replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Connection plumbing ─────────────────────────────────────────

pub struct RentDeskFactory {
    handler: Arc<RentDeskHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RentDeskAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RentDeskFactory {
    pub fn new(owners: Arc<OwnerManager>, public_password: String) -> Self {
        let auth_source = RentDeskAuthSource::new(owners.clone(), public_password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentDeskHandler::new(owners)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentDeskFactory {
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
    owners: Arc<OwnerManager>,
    public_password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RentDeskFactory::new(owners, public_password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ───────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidRange(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::AlreadyExists(_) | EngineError::UserExists(_) => "23505",
        EngineError::MissingField(_) => "23502",
        EngineError::HasActiveBookings(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::InvalidOwner(_) => "3D000",
        EngineError::Store(_) => "P0001",
    };
    if let EngineError::Store(store) = &e {
        tracing::error!("store failure: {store}");
    }
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) | SqlError::MissingColumn(..) => "42703",
        SqlError::ReadOnlyTable(_) => "42809",
        SqlError::BadValue(..) => "22023",
        SqlError::BadDate(..) => "22007",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::Unsupported(_)
        | SqlError::WrongArity(..)
        | SqlError::MissingFilter(_) => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM cars"), 0);
        assert_eq!(
            count_params("SELECT * FROM conflicts WHERE car_id = $1 AND start_date >= $3 AND end_date <= $2"),
            3
        );
    }

    #[test]
    fn inline_params_single_pass() {
        let params: Vec<Option<&[u8]>> = vec![Some(b"$2".as_slice()), Some(b"O'Hara".as_slice())];
        assert_eq!(
            inline_params("INSERT INTO t (a, b) VALUES ($1, $2)", &params),
            "INSERT INTO t (a, b) VALUES ('$2', 'O''Hara')"
        );
    }

    #[test]
    fn inline_params_handles_nulls_and_two_digit_slots() {
        let mut params: Vec<Option<&[u8]>> = vec![Some(b"x".as_slice()); 11];
        params[0] = None;
        assert_eq!(
            inline_params("SELECT $1, $11, '$1', $12", &params),
            "SELECT NULL, 'x', '$1', $12"
        );
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM cars").len(), 7);
        assert_eq!(result_schema("select id from conflicts where car_id = $1").len(), 10);
        assert_eq!(result_schema("SELECT * FROM summary;").len(), 3);
        assert!(result_schema("INSERT INTO cars (name) VALUES ($1)").is_empty());
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let err = engine_err(EngineError::Conflict(vec![]));
        match err {
            PgWireError::UserError(info) => assert!(format!("{info:?}").contains("23P01")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_dates_map_to_datetime_format() {
        match sql_err(SqlError::BadDate("start_date", "x".into())) {
            PgWireError::UserError(info) => assert!(format!("{info:?}").contains("22007")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
