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

use crate::auth::BunkdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::export::{self, format_day, MANIFEST_COLUMNS};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct BunkdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BunkdQueryParser>,
}

impl BunkdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BunkdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("site error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBuilding { id, name } => {
                engine.create_building(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRoom {
                id,
                building_id,
                name,
                gender_policy,
                allocation,
            } => {
                engine
                    .create_room(id, building_id, name, gender_policy, allocation)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBed { id, room_id, label } => {
                engine
                    .create_bed(id, room_id, label)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetBedMaintenance { id, on } => {
                engine
                    .set_bed_maintenance(id, on)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SubmitRequest {
                id,
                requester,
                agency,
                purpose,
                companion,
                window,
                expires_at,
            } => {
                engine
                    .submit_request(id, requester, agency, purpose, companion, window, expires_at)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::AddOccupants { rows } => {
                let count = rows.len();
                for row in rows {
                    engine
                        .add_occupant(
                            row.id,
                            row.request_id,
                            row.name,
                            row.identifier,
                            row.kind,
                            row.gender,
                            row.dates,
                            row.requested_bed,
                        )
                        .await
                        .map_err(engine_err)?;
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::StagePlacement {
                occupant_id,
                placement,
            } => {
                let request_id = engine
                    .request_of_occupant(&occupant_id)
                    .ok_or_else(|| engine_err(EngineError::NotFound(occupant_id)))?;
                engine
                    .stage_placement(request_id, occupant_id, placement)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::ApproveRequest { id, note } => {
                engine.approve_request(id, note).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RejectRequest { id, reason, note } => {
                engine
                    .reject_request(id, reason, note)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelRequest { id, by, reason } => {
                engine
                    .cancel_request(id, by, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CheckIn { occupant_id } => {
                engine.check_in(occupant_id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CheckOut { occupant_id } => {
                engine.check_out(occupant_id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelOccupant {
                occupant_id,
                reason,
            } => {
                engine
                    .cancel_occupant(occupant_id, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability { room_id, window } => {
                let beds = engine
                    .free_beds_for_range(room_id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(availability_schema(), beds, |enc, bed| {
                    enc.encode_field(&bed.id.to_string())?;
                    enc.encode_field(&bed.room_id.to_string())?;
                    enc.encode_field(&bed.label)?;
                    Ok(())
                })])
            }
            Command::SelectTimeline { room_id, window } => {
                let cells = engine
                    .room_timeline(room_id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(timeline_schema(), cells, |enc, cell| {
                    enc.encode_field(&format_day(cell.day))?;
                    enc.encode_field(&cell.bed_id.to_string())?;
                    enc.encode_field(&cell.state.as_str())?;
                    Ok(())
                })])
            }
            Command::SelectFreeCounts { room_id, window } => {
                let counts = engine
                    .room_free_counts(room_id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(
                    free_counts_schema(),
                    counts,
                    |enc, (day, free)| {
                        enc.encode_field(&format_day(day))?;
                        enc.encode_field(&(free as i64))?;
                        Ok(())
                    },
                )])
            }
            Command::SelectBuildings => {
                let buildings = engine.list_buildings();
                Ok(vec![query_response(buildings_schema(), buildings, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.name)?;
                    Ok(())
                })])
            }
            Command::SelectRooms { building_id } => {
                let rooms = engine.list_rooms(building_id).await;
                Ok(vec![query_response(rooms_schema(), rooms, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.building_id.to_string())?;
                    enc.encode_field(&r.name)?;
                    enc.encode_field(&gender_policy_label(r.gender_policy))?;
                    enc.encode_field(&allocation_label(r.allocation))?;
                    enc.encode_field(&(r.bed_count as i64))?;
                    Ok(())
                })])
            }
            Command::SelectBeds { room_id } => {
                let beds = engine.list_beds(room_id).await;
                Ok(vec![query_response(beds_schema(), beds, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.room_id.to_string())?;
                    enc.encode_field(&b.label)?;
                    enc.encode_field(&b.maintenance)?;
                    Ok(())
                })])
            }
            Command::SelectRequests { status } => {
                let requests = engine.list_requests(status).await;
                Ok(vec![query_response(requests_schema(), requests, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.requester)?;
                    enc.encode_field(&r.purpose)?;
                    enc.encode_field(&r.status.as_str())?;
                    enc.encode_field(&format_day(r.window.check_in))?;
                    enc.encode_field(&format_day(r.window.check_out))?;
                    enc.encode_field(&(r.occupant_count as i64))?;
                    Ok(())
                })])
            }
            Command::SelectOccupants { request_id } => {
                let occupants = engine
                    .list_occupants(request_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(occupants_schema(), occupants, |enc, o| {
                    enc.encode_field(&o.id.to_string())?;
                    enc.encode_field(&o.request_id.to_string())?;
                    enc.encode_field(&o.name)?;
                    enc.encode_field(&o.identifier)?;
                    enc.encode_field(&kind_label(o.kind))?;
                    enc.encode_field(&gender_label(o.gender))?;
                    enc.encode_field(&o.status.as_str())?;
                    enc.encode_field(&format_day(o.dates.check_in))?;
                    enc.encode_field(&format_day(o.dates.check_out))?;
                    enc.encode_field(&o.placement.map(|p| p.bed_id.to_string()))?;
                    Ok(())
                })])
            }
            Command::ScanTag { raw } => {
                let (occupant, booking_status) =
                    engine.scan_tag(&raw).await.map_err(engine_err)?;
                Ok(vec![query_response(
                    scan_schema(),
                    std::iter::once(occupant),
                    move |enc, o| {
                        enc.encode_field(&o.id.to_string())?;
                        enc.encode_field(&o.request_id.to_string())?;
                        enc.encode_field(&o.name)?;
                        enc.encode_field(&o.identifier)?;
                        enc.encode_field(&kind_label(o.kind))?;
                        enc.encode_field(&o.status.as_str())?;
                        enc.encode_field(&booking_status.as_str())?;
                        enc.encode_field(&format_day(o.dates.check_in))?;
                        enc.encode_field(&format_day(o.dates.check_out))?;
                        Ok(())
                    },
                )])
            }
            Command::SelectManifest => {
                let rows = export::manifest_rows(engine).await;
                Ok(vec![query_response(manifest_schema(), rows, |enc, row| {
                    enc.encode_field(&row.no)?;
                    enc.encode_field(&row.booking_code)?;
                    enc.encode_field(&row.requested_on)?;
                    enc.encode_field(&row.requester)?;
                    enc.encode_field(&row.agency)?;
                    enc.encode_field(&row.purpose)?;
                    enc.encode_field(&row.booking_status)?;
                    enc.encode_field(&row.occupant_name)?;
                    enc.encode_field(&row.occupant_kind)?;
                    enc.encode_field(&row.identifier)?;
                    enc.encode_field(&row.location)?;
                    enc.encode_field(&row.check_in)?;
                    enc.encode_field(&row.check_out)?;
                    enc.encode_field(&row.occupant_status)?;
                    Ok(())
                })])
            }
        }
    }
}

/// Encode a uniform set of rows against a schema into a single query response.
fn query_response<I, F>(schema: Vec<FieldInfo>, items: I, mut encode: F) -> Response
where
    I: IntoIterator,
    F: FnMut(&mut DataRowEncoder, I::Item) -> PgWireResult<()>,
{
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("bed_id"), text_field("room_id"), text_field("label")]
}

fn timeline_schema() -> Vec<FieldInfo> {
    vec![text_field("day"), text_field("bed_id"), text_field("state")]
}

fn free_counts_schema() -> Vec<FieldInfo> {
    vec![text_field("day"), int8_field("free")]
}

fn buildings_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name")]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("building_id"),
        text_field("name"),
        text_field("gender_policy"),
        text_field("allocation"),
        int8_field("beds"),
    ]
}

fn beds_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room_id"),
        text_field("label"),
        bool_field("maintenance"),
    ]
}

fn requests_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("requester"),
        text_field("purpose"),
        text_field("status"),
        text_field("check_in"),
        text_field("check_out"),
        int8_field("occupants"),
    ]
}

fn occupants_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("request_id"),
        text_field("name"),
        text_field("identifier"),
        text_field("kind"),
        text_field("gender"),
        text_field("status"),
        text_field("check_in"),
        text_field("check_out"),
        text_field("bed_id"),
    ]
}

fn scan_schema() -> Vec<FieldInfo> {
    vec![
        text_field("occupant_id"),
        text_field("request_id"),
        text_field("name"),
        text_field("identifier"),
        text_field("kind"),
        text_field("status"),
        text_field("booking_status"),
        text_field("check_in"),
        text_field("check_out"),
    ]
}

fn manifest_schema() -> Vec<FieldInfo> {
    let mut fields = vec![int8_field(MANIFEST_COLUMNS[0])];
    fields.extend(MANIFEST_COLUMNS[1..].iter().map(|name| text_field(name)));
    fields
}

fn gender_label(g: Gender) -> &'static str {
    match g {
        Gender::Male => "male",
        Gender::Female => "female",
    }
}

fn gender_policy_label(p: GenderPolicy) -> &'static str {
    match p {
        GenderPolicy::MaleOnly => "male_only",
        GenderPolicy::FemaleOnly => "female_only",
        GenderPolicy::Mixed => "mixed",
        GenderPolicy::Flexible => "flexible",
    }
}

fn allocation_label(a: AllocationPolicy) -> &'static str {
    match a {
        AllocationPolicy::EmployeeOnly => "employee_only",
        AllocationPolicy::GuestAllowed => "guest_allowed",
    }
}

fn kind_label(k: OccupantKind) -> &'static str {
    match k {
        OccupantKind::Employee => "employee",
        OccupantKind::Guest => "guest",
    }
}

#[async_trait]
impl SimpleQueryHandler for BunkdHandler {
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
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BunkdQueryParser;

#[async_trait]
impl QueryParser for BunkdQueryParser {
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
        Ok(describe_schema(stmt))
    }
}

/// Best-effort result schema for Describe, before parameters are bound.
/// Keyed on the table name in the statement text; DML statements get none.
fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("TIMELINE") {
        timeline_schema()
    } else if upper.contains("FREE_COUNTS") {
        free_counts_schema()
    } else if upper.contains("BUILDINGS") {
        buildings_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else if upper.contains("BEDS") {
        beds_schema()
    } else if upper.contains("REQUESTS") {
        requests_schema()
    } else if upper.contains("OCCUPANTS") {
        occupants_schema()
    } else if upper.contains("SCAN") {
        scan_schema()
    } else if upper.contains("MANIFEST") {
        manifest_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for BunkdHandler {
    type Statement = String;
    type QueryParser = BunkdQueryParser;

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
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            describe_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

/// Serve a single client connection until it closes.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(BunkdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BunkdFactory {
    handler: Arc<BunkdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BunkdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BunkdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BunkdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BunkdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BunkdFactory {
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

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
