use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use time::macros::format_description;
use time::Date;
use ulid::Ulid;

use crate::model::*;

/// One occupant row from a multi-row `INSERT INTO occupants`.
#[derive(Debug, PartialEq)]
pub struct OccupantRow {
    pub id: Ulid,
    pub request_id: Ulid,
    pub name: String,
    pub identifier: String,
    pub kind: OccupantKind,
    pub gender: Gender,
    pub dates: DayRange,
    pub requested_bed: Option<Ulid>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBuilding {
        id: Ulid,
        name: String,
    },
    InsertRoom {
        id: Ulid,
        building_id: Ulid,
        name: String,
        gender_policy: GenderPolicy,
        allocation: AllocationPolicy,
    },
    InsertBed {
        id: Ulid,
        room_id: Ulid,
        label: String,
    },
    SetBedMaintenance {
        id: Ulid,
        on: bool,
    },
    SubmitRequest {
        id: Ulid,
        requester: String,
        agency: String,
        purpose: String,
        companion: Option<Companion>,
        window: DayRange,
        expires_at: Option<Ms>,
    },
    AddOccupants {
        rows: Vec<OccupantRow>,
    },
    StagePlacement {
        occupant_id: Ulid,
        placement: Placement,
    },
    ApproveRequest {
        id: Ulid,
        note: Option<String>,
    },
    RejectRequest {
        id: Ulid,
        reason: String,
        note: Option<String>,
    },
    CancelRequest {
        id: Ulid,
        by: String,
        reason: String,
    },
    CheckIn {
        occupant_id: Ulid,
    },
    CheckOut {
        occupant_id: Ulid,
    },
    CancelOccupant {
        occupant_id: Ulid,
        reason: String,
    },
    SelectAvailability {
        room_id: Ulid,
        window: DayRange,
    },
    SelectTimeline {
        room_id: Ulid,
        window: DayRange,
    },
    SelectFreeCounts {
        room_id: Ulid,
        window: DayRange,
    },
    SelectBuildings,
    SelectRooms {
        building_id: Option<Ulid>,
    },
    SelectBeds {
        room_id: Ulid,
    },
    SelectRequests {
        status: Option<RequestStatus>,
    },
    SelectOccupants {
        request_id: Ulid,
    },
    ScanTag {
        raw: String,
    },
    SelectManifest,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "buildings" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("buildings", 2, values.len()));
            }
            Ok(Command::InsertBuilding {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
            })
        }
        "rooms" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("rooms", 5, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                building_id: parse_ulid(&values[1])?,
                name: parse_string(&values[2])?,
                gender_policy: parse_gender_policy(&values[3])?,
                allocation: parse_allocation(&values[4])?,
            })
        }
        "beds" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("beds", 3, values.len()));
            }
            Ok(Command::InsertBed {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                label: parse_string(&values[2])?,
            })
        }
        // (id, requester, agency, purpose, check_in, check_out
        //  [, companion_nik, companion_name [, expires_at]])
        "requests" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("requests", 6, values.len()));
            }
            let companion = if values.len() >= 8 {
                match (parse_string_or_null(&values[6])?, parse_string_or_null(&values[7])?) {
                    (Some(nik), Some(name)) => Some(Companion { nik, name }),
                    (None, None) => None,
                    _ => return Err(SqlError::Parse("companion needs both nik and name".into())),
                }
            } else {
                None
            };
            let expires_at = if values.len() >= 9 {
                parse_i64_or_null(&values[8])?
            } else {
                None
            };
            Ok(Command::SubmitRequest {
                id: parse_ulid(&values[0])?,
                requester: parse_string(&values[1])?,
                agency: parse_string(&values[2])?,
                purpose: parse_string(&values[3])?,
                companion,
                window: DayRange {
                    check_in: parse_day(&values[4])?,
                    check_out: parse_day(&values[5])?,
                },
                expires_at,
            })
        }
        // (id, request_id, name, identifier, kind, gender,
        //  check_in, check_out [, bed_id]) — multi-row allowed
        "occupants" => {
            let all_rows = extract_all_insert_rows(insert)?;
            let mut rows = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                if row.len() < 8 {
                    return Err(SqlError::WrongArity("occupants row", 8, row.len()));
                }
                let parsed = (|| -> Result<OccupantRow, SqlError> {
                    Ok(OccupantRow {
                        id: parse_ulid(&row[0])?,
                        request_id: parse_ulid(&row[1])?,
                        name: parse_string(&row[2])?,
                        identifier: parse_string(&row[3])?,
                        kind: parse_occupant_kind(&row[4])?,
                        gender: parse_gender(&row[5])?,
                        dates: DayRange {
                            check_in: parse_day(&row[6])?,
                            check_out: parse_day(&row[7])?,
                        },
                        requested_bed: if row.len() >= 9 {
                            parse_ulid_or_null(&row[8])?
                        } else {
                            None
                        },
                    })
                })()
                .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                rows.push(parsed);
            }
            Ok(Command::AddOccupants { rows })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let assigned = |col: &str| -> Option<&Expr> {
        assignments.iter().find_map(|a| {
            (assignment_column(a).as_deref() == Some(col)).then_some(&a.value)
        })
    };

    match table.as_str() {
        "beds" => {
            let on = assigned("maintenance").ok_or(SqlError::MissingFilter("maintenance"))?;
            Ok(Command::SetBedMaintenance { id, on: parse_bool(on)? })
        }
        "requests" => {
            let status = assigned("status").ok_or(SqlError::MissingFilter("status"))?;
            let note = assigned("note").map(parse_string).transpose()?;
            match parse_string(status)?.as_str() {
                "approved" => Ok(Command::ApproveRequest { id, note }),
                "rejected" => {
                    let reason = assigned("reason")
                        .ok_or(SqlError::MissingFilter("reason"))
                        .and_then(parse_string)?;
                    Ok(Command::RejectRequest { id, reason, note })
                }
                "cancelled" => {
                    let by = assigned("cancelled_by")
                        .ok_or(SqlError::MissingFilter("cancelled_by"))
                        .and_then(parse_string)?;
                    let reason = assigned("reason")
                        .ok_or(SqlError::MissingFilter("reason"))
                        .and_then(parse_string)?;
                    Ok(Command::CancelRequest { id, by, reason })
                }
                other => Err(SqlError::Parse(format!("bad request status: {other}"))),
            }
        }
        "occupants" => {
            if let Some(status) = assigned("status") {
                return match parse_string(status)?.as_str() {
                    "checked_in" => Ok(Command::CheckIn { occupant_id: id }),
                    "checked_out" => Ok(Command::CheckOut { occupant_id: id }),
                    "cancelled" => {
                        let reason = assigned("reason")
                            .ok_or(SqlError::MissingFilter("reason"))
                            .and_then(parse_string)?;
                        Ok(Command::CancelOccupant { occupant_id: id, reason })
                    }
                    other => Err(SqlError::Parse(format!("bad occupant status: {other}"))),
                };
            }
            // No status assignment: this is placement staging.
            let building_id = assigned("building_id")
                .ok_or(SqlError::MissingFilter("building_id"))
                .and_then(parse_ulid)?;
            let room_id = assigned("room_id")
                .ok_or(SqlError::MissingFilter("room_id"))
                .and_then(parse_ulid)?;
            let bed_id = assigned("bed_id")
                .ok_or(SqlError::MissingFilter("bed_id"))
                .and_then(parse_ulid)?;
            Ok(Command::StagePlacement {
                occupant_id: id,
                placement: Placement { building_id, room_id, bed_id },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" | "timeline" | "free_counts" => {
            let room_id = filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?;
            let window = DayRange {
                check_in: filters.check_in.ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: filters.check_out.ok_or(SqlError::MissingFilter("check_out"))?,
            };
            Ok(match table.as_str() {
                "availability" => Command::SelectAvailability { room_id, window },
                "timeline" => Command::SelectTimeline { room_id, window },
                _ => Command::SelectFreeCounts { room_id, window },
            })
        }
        "buildings" => Ok(Command::SelectBuildings),
        "rooms" => Ok(Command::SelectRooms { building_id: filters.building_id }),
        "beds" => Ok(Command::SelectBeds {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
        }),
        "requests" => {
            let status = filters.status.as_deref().map(parse_request_status).transpose()?;
            Ok(Command::SelectRequests { status })
        }
        "occupants" => Ok(Command::SelectOccupants {
            request_id: filters.request_id.ok_or(SqlError::MissingFilter("request_id"))?,
        }),
        "scan" => Ok(Command::ScanTag {
            raw: filters.tag.ok_or(SqlError::MissingFilter("tag"))?,
        }),
        "manifest" => Ok(Command::SelectManifest),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    room_id: Option<Ulid>,
    building_id: Option<Ulid>,
    request_id: Option<Ulid>,
    check_in: Option<Day>,
    check_out: Option<Day>,
    status: Option<String>,
    tag: Option<String>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("room_id") => filters.room_id = Some(parse_ulid(right)?),
                Some("building_id") => filters.building_id = Some(parse_ulid(right)?),
                Some("request_id") => filters.request_id = Some(parse_ulid(right)?),
                Some("status") => filters.status = Some(parse_string(right)?),
                Some("tag") => filters.tag = Some(parse_string(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("check_in") {
                    filters.check_in = Some(parse_day(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("check_out") {
                    filters.check_out = Some(parse_day(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_i64_expr(expr).map(Some)
}

/// A calendar day: either a bare epoch-day number or a `'YYYY-MM-DD'`
/// string literal.
fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    const EPOCH_JULIAN_DAY: i32 = 2_440_588;
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.contains('-')
    {
        let format = format_description!("[year]-[month]-[day]");
        let date = Date::parse(s, &format)
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))?;
        return Ok((date.to_julian_day() - EPOCH_JULIAN_DAY) as Day);
    }
    parse_i64_expr(expr)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_gender(expr: &Expr) -> Result<Gender, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "male" | "m" => Ok(Gender::Male),
        "female" | "f" => Ok(Gender::Female),
        other => Err(SqlError::Parse(format!("bad gender: {other}"))),
    }
}

fn parse_gender_policy(expr: &Expr) -> Result<GenderPolicy, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "male" | "male_only" => Ok(GenderPolicy::MaleOnly),
        "female" | "female_only" => Ok(GenderPolicy::FemaleOnly),
        "mixed" => Ok(GenderPolicy::Mixed),
        "flexible" => Ok(GenderPolicy::Flexible),
        other => Err(SqlError::Parse(format!("bad gender policy: {other}"))),
    }
}

fn parse_allocation(expr: &Expr) -> Result<AllocationPolicy, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "employee_only" => Ok(AllocationPolicy::EmployeeOnly),
        "guest_allowed" => Ok(AllocationPolicy::GuestAllowed),
        other => Err(SqlError::Parse(format!("bad allocation policy: {other}"))),
    }
}

fn parse_occupant_kind(expr: &Expr) -> Result<OccupantKind, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "employee" => Ok(OccupantKind::Employee),
        "guest" => Ok(OccupantKind::Guest),
        other => Err(SqlError::Parse(format!("bad occupant kind: {other}"))),
    }
}

fn parse_request_status(s: &str) -> Result<RequestStatus, SqlError> {
    match s.to_lowercase().as_str() {
        "requested" => Ok(RequestStatus::Requested),
        "approved" => Ok(RequestStatus::Approved),
        "rejected" => Ok(RequestStatus::Rejected),
        "cancelled" => Ok(RequestStatus::Cancelled),
        "expired" => Ok(RequestStatus::Expired),
        other => Err(SqlError::Parse(format!("bad request status: {other}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
