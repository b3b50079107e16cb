use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::model::UserId;

/// Parsed command from SQL input. Two tables: `rooms` and `bookings`.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        name: String,
        capacity: u32,
    },
    UpdateRoom {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms,
    InsertBooking {
        room_id: Ulid,
        day: CalendarDay,
        user: UserId,
    },
    DeleteBooking {
        room_id: Ulid,
        day: CalendarDay,
        user: UserId,
    },
    SelectBookings {
        room_id: Ulid,
        day: Option<CalendarDay>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "rooms" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rooms", 2, values.len()));
            }
            Ok(Command::InsertRoom {
                name: parse_string(&values[0])?,
                capacity: parse_capacity(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("bookings", 3, values.len()));
            }
            Ok(Command::InsertBooking {
                room_id: parse_ulid(&values[0])?,
                day: parse_day(&values[1])?,
                user: UserId::new(parse_string(&values[2])?),
            })
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
    if table != "rooms" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut name: Option<String> = None;
    let mut capacity: Option<u32> = None;
    for assignment in assignments {
        let col = assignment_column_name(&assignment.target);
        match col.as_deref() {
            Some("name") => name = Some(parse_string(&assignment.value)?),
            Some("capacity") => capacity = Some(parse_capacity(&assignment.value)?),
            _ => {
                return Err(SqlError::Parse(format!(
                    "unknown column in UPDATE rooms: {:?}",
                    assignment.target
                )));
            }
        }
    }

    Ok(Command::UpdateRoom {
        id: extract_where_id(selection)?,
        name: name.ok_or(SqlError::MissingFilter("name"))?,
        capacity: capacity.ok_or(SqlError::MissingFilter("capacity"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: extract_where_id(&delete.selection)?,
        }),
        "bookings" => {
            let filters = extract_booking_filters(&delete.selection)?;
            Ok(Command::DeleteBooking {
                room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
                user: filters.user.ok_or(SqlError::MissingFilter("user_id"))?,
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

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "bookings" => {
            let filters = extract_booking_filters(&select.selection)?;
            Ok(Command::SelectBookings {
                room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                day: filters.day,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct BookingFilters {
    room_id: Option<Ulid>,
    day: Option<CalendarDay>,
    user: Option<UserId>,
}

fn extract_booking_filters(selection: &Option<Expr>) -> Result<BookingFilters, SqlError> {
    let mut filters = BookingFilters::default();
    if let Some(expr) = selection {
        walk_booking_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn walk_booking_filters(expr: &Expr, filters: &mut BookingFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_booking_filters(left, filters)?;
                walk_booking_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("room_id") => filters.room_id = Some(parse_ulid(right)?),
                Some("day") => filters.day = Some(parse_day(right)?),
                Some("user_id") => filters.user = Some(UserId::new(parse_string(right)?)),
                _ => {}
            },
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

fn assignment_column_name(target: &ast::AssignmentTarget) -> Option<String> {
    match target {
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

fn parse_day(expr: &Expr) -> Result<CalendarDay, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("{e}")))
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

/// Capacity is a non-negative integer; a negative literal is an invalid
/// argument, reported at this boundary.
fn parse_capacity(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("capacity must be non-negative: {v}")))
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

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_room() {
        let sql = "INSERT INTO rooms (name, capacity) VALUES ('Konferenzraum Alpha', 3)";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertRoom { name, capacity } => {
                assert_eq!(name, "Konferenzraum Alpha");
                assert_eq!(capacity, 3);
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_negative_capacity_rejected() {
        let sql = "INSERT INTO rooms (name, capacity) VALUES ('Alpha', -1)";
        let err = parse_sql(sql).unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn parse_insert_room_zero_capacity_ok() {
        let sql = "INSERT INTO rooms (name, capacity) VALUES ('Gesperrt', 0)";
        let cmd = parse_sql(sql).unwrap();
        assert!(matches!(cmd, Command::InsertRoom { capacity: 0, .. }));
    }

    #[test]
    fn parse_update_room() {
        let sql = format!("UPDATE rooms SET name = 'Beta', capacity = 4 WHERE id = '{RID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateRoom { id, name, capacity } => {
                assert_eq!(id.to_string(), RID);
                assert_eq!(name, "Beta");
                assert_eq!(capacity, 4);
            }
            _ => panic!("expected UpdateRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_room_requires_both_columns() {
        let sql = format!("UPDATE rooms SET name = 'Beta' WHERE id = '{RID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("capacity"))
        ));
    }

    #[test]
    fn parse_update_room_requires_id() {
        let sql = "UPDATE rooms SET name = 'Beta', capacity = 4";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_room() {
        let sql = format!("DELETE FROM rooms WHERE id = '{RID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::DeleteRoom { id } => assert_eq!(id.to_string(), RID),
            _ => panic!("expected DeleteRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_rooms() {
        let cmd = parse_sql("SELECT * FROM rooms").unwrap();
        assert_eq!(cmd, Command::SelectRooms);
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (room_id, day, user_id) VALUES ('{RID}', '2025-06-02', 'anna')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { room_id, day, user } => {
                assert_eq!(room_id.to_string(), RID);
                assert_eq!(day, CalendarDay::new(2025, 6, 2).unwrap());
                assert_eq!(user, UserId::from("anna"));
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_bad_date_rejected() {
        let sql = format!(
            "INSERT INTO bookings (room_id, day, user_id) VALUES ('{RID}', '2025-02-30', 'anna')"
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("bad day"));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!(
            "DELETE FROM bookings WHERE room_id = '{RID}' AND day = '2025-06-02' AND user_id = 'anna'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::DeleteBooking { room_id, day, user } => {
                assert_eq!(room_id.to_string(), RID);
                assert_eq!(day, CalendarDay::new(2025, 6, 2).unwrap());
                assert_eq!(user, UserId::from("anna"));
            }
            _ => panic!("expected DeleteBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_booking_missing_user_rejected() {
        let sql = format!("DELETE FROM bookings WHERE room_id = '{RID}' AND day = '2025-06-02'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("user_id"))
        ));
    }

    #[test]
    fn parse_select_bookings_with_day() {
        let sql = format!("SELECT * FROM bookings WHERE room_id = '{RID}' AND day = '2025-06-02'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings { room_id, day } => {
                assert_eq!(room_id.to_string(), RID);
                assert_eq!(day, Some(CalendarDay::new(2025, 6, 2).unwrap()));
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_all_days() {
        let sql = format!("SELECT * FROM bookings WHERE room_id = '{RID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectBookings { day: None, .. }));
    }

    #[test]
    fn parse_select_bookings_requires_room_id() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::MissingFilter("room_id"))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES ('x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
