use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{HearingChange, HearingRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCourt {
        court: Court,
    },
    SelectCourts {
        id: Option<Ulid>,
    },
    InsertCase {
        id: Ulid,
    },
    UpdateCase {
        id: Ulid,
        change: CaseChange,
    },
    SelectCase {
        id: Ulid,
    },
    InsertHearing {
        request: HearingRequest,
        returning: bool,
    },
    UpdateHearing {
        id: Ulid,
        change: HearingChange,
        returning: bool,
    },
    DeleteHearing {
        id: Ulid,
    },
    SelectHearings {
        filter: HearingFilter,
    },
    SelectAvailableSlots {
        court_id: Ulid,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseChange {
    Status(CaseStatus),
    AssignJudge(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HearingFilter {
    Id(Ulid),
    Case(Ulid),
    Day { court_id: Ulid, date: NaiveDate },
}

const COURT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "location",
    "capacity",
    "opens",
    "closes",
    "slot_minutes",
    "overlap",
];
const CASE_COLUMNS: &[&str] = &["id"];
const HEARING_COLUMNS: &[&str] = &["case_id", "court_id", "hearing_date", "start_time", "notes"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let statement = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [statement] => statement,
        _ => return Err(SqlError::Unsupported("multiple statements in one query".into())),
    };

    match statement {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection, returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "courts" => {
            let row = Row::from_insert(insert, "courts", COURT_COLUMNS)?;
            let court = Court {
                id: parse_ulid_expr(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                location: row.get("location").map(parse_string_or_null).transpose()?.flatten(),
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(0),
                opens: parse_time(row.required("opens")?)?,
                closes: parse_time(row.required("closes")?)?,
                slot_minutes: parse_minutes(row.required("slot_minutes")?)?,
                overlap: match row.get("overlap").map(parse_string_or_null).transpose()?.flatten() {
                    Some(s) => OverlapPolicy::parse(&s)
                        .ok_or_else(|| SqlError::InvalidValue(format!("bad overlap policy: {s}")))?,
                    None => OverlapPolicy::default(),
                },
            };
            Ok(Command::InsertCourt { court })
        }
        "cases" => {
            let row = Row::from_insert(insert, "cases", CASE_COLUMNS)?;
            Ok(Command::InsertCase {
                id: parse_ulid_expr(row.required("id")?)?,
            })
        }
        "hearings" => {
            let row = Row::from_insert(insert, "hearings", HEARING_COLUMNS)?;
            let request = HearingRequest {
                case_id: parse_ulid_expr(row.required("case_id")?)?,
                court_id: parse_ulid_expr(row.required("court_id")?)?,
                date: parse_date_expr(row.required("hearing_date")?)?,
                time: parse_time(row.required("start_time")?)?,
                notes: row.get("notes").map(parse_string_or_null).transpose()?.flatten(),
            };
            Ok(Command::InsertHearing { request, returning })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name. Without a column list the table's
/// declared column order applies.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn from_insert(
        insert: &ast::Insert,
        table: &'static str,
        default_columns: &[&str],
    ) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        if values.len() > default_columns.len() {
            return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
        }
        let columns: Vec<String> = if insert.columns.is_empty() {
            default_columns[..values.len()]
                .iter()
                .map(|c| c.to_string())
                .collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        for (i, col) in columns.iter().enumerate() {
            if !default_columns.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(col.clone()));
            }
            if columns[..i].contains(col) {
                return Err(SqlError::DuplicateColumn(col.clone()));
            }
        }
        Ok(Self {
            cells: columns.into_iter().zip(values).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| expr)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        if sets.iter().any(|(seen, _)| *seen == column) {
            return Err(SqlError::DuplicateColumn(column));
        }
        sets.push((column, &a.value));
    }

    match table.as_str() {
        "cases" => {
            let [(column, value)] = sets.as_slice() else {
                return Err(SqlError::Unsupported(
                    "cases: set exactly one of status, judge".into(),
                ));
            };
            let change = match column.as_str() {
                "status" => {
                    let s = parse_string(value)?;
                    CaseChange::Status(
                        CaseStatus::parse(&s)
                            .ok_or_else(|| SqlError::InvalidValue(format!("bad case status: {s}")))?,
                    )
                }
                "judge" => CaseChange::AssignJudge(parse_string(value)?),
                other => return Err(SqlError::UnknownColumn(other.to_string())),
            };
            Ok(Command::UpdateCase { id, change })
        }
        "hearings" => {
            let mut change = HearingChange::default();
            for (column, value) in sets {
                match column.as_str() {
                    "court_id" => change.court_id = Some(parse_ulid_expr(value)?),
                    "hearing_date" => change.date = Some(parse_date_expr(value)?),
                    "start_time" => change.time = Some(parse_time(value)?),
                    "notes" => change.notes = Some(parse_string_or_null(value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateHearing {
                id,
                change,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "hearings" => Ok(Command::DeleteHearing { id }),
        "courts" | "cases" => Err(SqlError::Unsupported(format!("DELETE FROM {table}"))),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |name: &str| {
        filters
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, expr)| *expr)
    };

    match table.as_str() {
        "courts" => Ok(Command::SelectCourts {
            id: filter("id").map(parse_ulid_expr).transpose()?,
        }),
        "cases" => Ok(Command::SelectCase {
            id: parse_ulid_expr(filter("id").ok_or(SqlError::MissingFilter("id"))?)?,
        }),
        "hearings" => {
            let filter = if let Some(id) = filter("id") {
                HearingFilter::Id(parse_ulid_expr(id)?)
            } else if let Some(case_id) = filter("case_id") {
                HearingFilter::Case(parse_ulid_expr(case_id)?)
            } else {
                HearingFilter::Day {
                    court_id: parse_ulid_expr(
                        filter("court_id").ok_or(SqlError::MissingFilter("court_id"))?,
                    )?,
                    date: parse_date_expr(
                        filter("hearing_date").ok_or(SqlError::MissingFilter("hearing_date"))?,
                    )?,
                }
            };
            Ok(Command::SelectHearings { filter })
        }
        "available_slots" => Ok(Command::SelectAvailableSlots {
            court_id: parse_ulid_expr(
                filter("court_id").ok_or(SqlError::MissingFilter("court_id"))?,
            )?,
            date: parse_date_expr(
                filter("hearing_date").ok_or(SqlError::MissingFilter("hearing_date"))?,
            )?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y ...` into (column, value) pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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
                parse_ulid_expr(right)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(format!("bad ULID: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::InvalidValue(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// Integers arrive as numbers from simple queries and as quoted text once
/// extended-protocol parameters are substituted.
fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::InvalidValue(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::InvalidValue(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of u32 range")))
}

fn parse_minutes(expr: &Expr) -> Result<Minute, SqlError> {
    let v = parse_i64_expr(expr)?;
    Minute::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of range")))
}

fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string(expr)?;
    parse_time_of_day(&s).ok_or_else(|| SqlError::InvalidValue(format!("bad time of day: {s}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::InvalidValue(format!("bad date: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    /// A well-formed statement carrying a value the field cannot hold.
    InvalidValue(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    DuplicateColumn(String),
}

impl SqlError {
    /// Bad or missing field data is an invalid parameter; everything else is
    /// a statement the surface cannot run.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::InvalidValue(_) | SqlError::MissingColumn(_) => "22023",
            _ => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::DuplicateColumn(col) => write!(f, "column specified more than once: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
