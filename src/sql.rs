use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        room_type: String,
        capacity: u32,
        status: RoomStatus,
        floor: i32,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    InsertStudent {
        id: Ulid,
        room_id: Ulid,
        fields: StudentFields,
    },
    UpdateStudent {
        id: Ulid,
        /// `None`: room not mentioned. `Some(None)`: `room = NULL`.
        room: Option<Option<Ulid>>,
        patch: StudentPatch,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    SelectStudents {
        filter: StudentFilter,
    },
    SelectOccupancy,
    SelectDrift,
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentFilter {
    All,
    Id(Ulid),
    Room(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentColumn {
    Name,
    Course,
    Year,
    Contact,
    Status,
    Email,
}

impl StudentColumn {
    fn from_name(col: &str) -> Option<Self> {
        match col {
            "name" => Some(Self::Name),
            "course" => Some(Self::Course),
            "year" => Some(Self::Year),
            "contact" => Some(Self::Contact),
            "status" => Some(Self::Status),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    fn patch(self, patch: &mut StudentPatch, value: Option<String>) -> Result<(), SqlError> {
        match self {
            Self::Name => patch.name = Some(value.ok_or(SqlError::NotNull("name"))?),
            Self::Course => patch.course = Some(value),
            Self::Year => patch.year = Some(value),
            Self::Contact => patch.contact = Some(value),
            Self::Status => patch.status = Some(value),
            Self::Email => patch.email = Some(value),
        }
        Ok(())
    }

    fn set(self, fields: &mut StudentFields, value: Option<String>) -> Result<(), SqlError> {
        match self {
            Self::Name => fields.name = value.ok_or(SqlError::NotNull("name"))?,
            Self::Course => fields.course = value,
            Self::Year => fields.year = value,
            Self::Contact => fields.contact = value,
            Self::Status => fields.status = value,
            Self::Email => fields.email = value,
        }
        Ok(())
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.eq_ignore_ascii_case("RECONCILE") {
        return Ok(Command::Reconcile);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("columns", columns.len(), values.len()));
    }
    let row: Vec<(&str, &Expr)> = columns.iter().map(String::as_str).zip(values.iter()).collect();
    let find = |name: &'static str| row.iter().find(|(c, _)| *c == name).map(|(_, e)| *e);

    match table.as_str() {
        "rooms" => {
            for (col, _) in &row {
                if !matches!(*col, "id" | "type" | "room_type" | "capacity" | "status" | "floor") {
                    return Err(SqlError::UnknownColumn(col.to_string()));
                }
            }
            let room_type = find("type")
                .or_else(|| find("room_type"))
                .ok_or(SqlError::MissingColumn("type"))?;
            Ok(Command::InsertRoom {
                id: parse_ulid(find("id").ok_or(SqlError::MissingColumn("id"))?)?,
                room_type: parse_string(room_type)?,
                capacity: parse_u32(find("capacity").ok_or(SqlError::MissingColumn("capacity"))?)?,
                status: match find("status") {
                    Some(e) => parse_status(e)?,
                    None => RoomStatus::Available,
                },
                floor: match find("floor") {
                    Some(e) => parse_i32(e)?,
                    None => 0,
                },
            })
        }
        "students" => {
            let mut id = None;
            let mut room_id = None;
            let mut fields = StudentFields::default();
            let mut named = false;
            for (col, expr) in &row {
                match *col {
                    "id" => id = Some(parse_ulid(expr)?),
                    "room" | "room_id" => room_id = Some(parse_ulid(expr)?),
                    other => {
                        let column = StudentColumn::from_name(other)
                            .ok_or_else(|| SqlError::UnknownColumn(other.to_string()))?;
                        named |= column == StudentColumn::Name;
                        column.set(&mut fields, parse_string_or_null(expr)?)?;
                    }
                }
            }
            if !named {
                return Err(SqlError::MissingColumn("name"));
            }
            Ok(Command::InsertStudent {
                id: id.ok_or(SqlError::MissingColumn("id"))?,
                room_id: room_id.ok_or(SqlError::MissingColumn("room"))?,
                fields,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    if assignments.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((col, &assignment.value));
    }

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (col, expr) in set {
                match col.as_str() {
                    "type" | "room_type" => patch.room_type = Some(parse_string(expr)?),
                    "capacity" => patch.capacity = Some(parse_u32(expr)?),
                    "occupied" => patch.occupied = Some(parse_u32(expr)?),
                    "status" => patch.status = Some(parse_status(expr)?),
                    "floor" => patch.floor = Some(parse_i32(expr)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "students" => {
            let mut room = None;
            let mut patch = StudentPatch::default();
            for (col, expr) in set {
                match col.as_str() {
                    "room" | "room_id" => room = Some(parse_ulid_or_null(expr)?),
                    "id" => return Err(SqlError::Unsupported("changing a student id".into())),
                    other => {
                        let column = StudentColumn::from_name(other)
                            .ok_or_else(|| SqlError::UnknownColumn(col.clone()))?;
                        column.patch(&mut patch, parse_string_or_null(expr)?)?;
                    }
                }
            }
            Ok(Command::UpdateStudent { id, room, patch })
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
    let filter = match &select.selection {
        Some(expr) => Some(extract_eq(expr)?),
        None => None,
    };

    match (table.as_str(), filter) {
        ("rooms", None) => Ok(Command::SelectRooms { id: None }),
        ("rooms", Some((col, expr))) if col == "id" => Ok(Command::SelectRooms {
            id: Some(parse_ulid(expr)?),
        }),
        ("students", None) => Ok(Command::SelectStudents {
            filter: StudentFilter::All,
        }),
        ("students", Some((col, expr))) => match col.as_str() {
            "id" => Ok(Command::SelectStudents {
                filter: StudentFilter::Id(parse_ulid(expr)?),
            }),
            "room" | "room_id" => Ok(Command::SelectStudents {
                filter: StudentFilter::Room(parse_ulid(expr)?),
            }),
            _ => Err(SqlError::UnknownColumn(col)),
        },
        ("occupancy", None) => Ok(Command::SelectOccupancy),
        ("drift", None) => Ok(Command::SelectDrift),
        ("rooms" | "occupancy" | "drift", Some((col, _))) => Err(SqlError::UnknownColumn(col)),
        _ => Err(SqlError::UnknownTable(table)),
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

/// `column = value`, the only filter shape accepted.
fn extract_eq(expr: &Expr) -> Result<(String, &Expr), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => expr_column_name(left)
            .map(|col| (col, right.as_ref()))
            .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}"))),
        Expr::Nested(inner) => extract_eq(inner),
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match extract_eq(sel) {
        Ok((col, value)) if col == "id" => parse_ulid(value),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n, _)) => Ok(Some(n.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or(SqlError::Parse("unexpected NULL".into()))
}

fn parse_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    NotNull(&'static str),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::NotNull(c) => write!(f, "{c} cannot be NULL"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
