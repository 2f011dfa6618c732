use std::str::FromStr;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCar(NewCar),
    UpdateCar { id: Ulid, changes: CarChanges },
    DeleteCar { id: Ulid },
    InsertBooking(NewBooking),
    InsertBookingRequest(NewBooking),
    UpdateBooking { id: Ulid, changes: BookingChanges },
    DeleteBooking { id: Ulid },
    InsertExpense(NewExpense),
    InsertUser { username: String, password: String },
    SelectCars,
    SelectBookings { car_id: Option<Ulid> },
    SelectExpenses,
    SelectMaintenance,
    SelectSummary,
    SelectConflicts { car_id: Ulid, start: Day, end: Day },
    SelectAvailableCars { start: Day, end: Day },
}

impl Command {
    /// Commands a public (booking link) session may run.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Command::InsertBookingRequest(_)
                | Command::SelectAvailableCars { .. }
                | Command::InsertUser { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
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

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let mut fields = Fields::from_insert(table_static(&table)?, insert)?;

    let cmd = match fields.table {
        "cars" => Command::InsertCar(NewCar {
            id: fields.optional("id", ulid)?.unwrap_or_else(Ulid::new),
            name: fields.required("name", text)?,
            plate_number: fields.required("plate_number", text)?,
            model: fields.required("model", text)?,
            status: fields.optional("status", closed)?,
        }),
        "bookings" => Command::InsertBooking(NewBooking {
            id: fields.optional("id", ulid)?.unwrap_or_else(Ulid::new),
            car_id: fields.required("car_id", ulid)?,
            customer_name: fields.required("customer_name", text)?,
            contact: fields.required("contact", text)?,
            start_date: fields.required("start_date", day)?,
            end_date: fields.required("end_date", day)?,
            purpose: fields.optional("purpose", text)?,
            amount_paid: fields.optional("amount_paid", int)?.unwrap_or(0),
            rebooking: fields.optional("rebooking", boolean)?.unwrap_or(false),
        }),
        "booking_requests" => Command::InsertBookingRequest(NewBooking {
            id: fields.optional("id", ulid)?.unwrap_or_else(Ulid::new),
            car_id: fields.required("car_id", ulid)?,
            customer_name: fields.required("customer_name", text)?,
            contact: fields.required("contact", text)?,
            start_date: fields.required("start_date", day)?,
            end_date: fields.required("end_date", day)?,
            purpose: fields.optional("purpose", text)?,
            amount_paid: 0,
            rebooking: false,
        }),
        "expenses" => Command::InsertExpense(NewExpense {
            id: fields.optional("id", ulid)?.unwrap_or_else(Ulid::new),
            car_id: fields.required("car_id", ulid)?,
            date: fields.optional("date", day)?,
            description: fields.required("description", text)?,
            amount: fields.required("amount", int)?,
            kind: fields.optional("kind", closed)?.unwrap_or_default(),
        }),
        "users" => Command::InsertUser {
            username: fields.required("username", text)?,
            password: fields.required("password", text)?,
        },
        other => return Err(SqlError::ReadOnlyTable(other)),
    };
    fields.finish()?;
    Ok(cmd)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_static(&table_factor_name(&table.relation)?)?;
    let id = where_id(selection)?;
    let mut fields = Fields::from_assignments(table, assignments)?;

    let cmd = match table {
        "cars" => Command::UpdateCar {
            id,
            changes: CarChanges {
                name: fields.optional("name", text)?,
                plate_number: fields.optional("plate_number", text)?,
                model: fields.optional("model", text)?,
                status: fields.optional("status", closed)?,
                last_service_date: fields.optional("last_service_date", day)?,
                next_service_date: fields.optional("next_service_date", day)?,
            },
        },
        "bookings" => Command::UpdateBooking {
            id,
            changes: BookingChanges {
                status: fields.optional("status", closed)?,
                start_date: fields.optional("start_date", day)?,
                end_date: fields.optional("end_date", day)?,
                amount_paid: fields.optional("amount_paid", int)?,
                rebooking: fields.optional("rebooking", boolean)?,
            },
        },
        other => return Err(SqlError::ReadOnlyTable(other)),
    };
    fields.finish()?;
    Ok(cmd)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = table_static(&delete_table_name(delete)?)?;
    let id = where_id(&delete.selection)?;

    match table {
        "cars" => Ok(Command::DeleteCar { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        other => Err(SqlError::ReadOnlyTable(other)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_static(&table_factor_name(&from.relation)?)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    use ast::BinaryOperator as Op;
    let filter = |column, ops: &[Op]| find_filter(&filters, column, ops);

    match table {
        "cars" => Ok(Command::SelectCars),
        "bookings" => Ok(Command::SelectBookings {
            car_id: filter("car_id", &[Op::Eq]).map(|v| ulid(v, "car_id")).transpose()?,
        }),
        "expenses" => Ok(Command::SelectExpenses),
        "maintenance" => Ok(Command::SelectMaintenance),
        "summary" => Ok(Command::SelectSummary),
        "conflicts" => Ok(Command::SelectConflicts {
            car_id: ulid(
                filter("car_id", &[Op::Eq]).ok_or(SqlError::MissingFilter("car_id"))?,
                "car_id",
            )?,
            start: day(
                filter("start_date", &[Op::GtEq, Op::Eq]).ok_or(SqlError::MissingFilter("start_date"))?,
                "start_date",
            )?,
            end: day(
                filter("end_date", &[Op::LtEq, Op::Eq]).ok_or(SqlError::MissingFilter("end_date"))?,
                "end_date",
            )?,
        }),
        "available_cars" => Ok(Command::SelectAvailableCars {
            start: day(
                filter("start_date", &[Op::GtEq, Op::Eq]).ok_or(SqlError::MissingFilter("start_date"))?,
                "start_date",
            )?,
            end: day(
                filter("end_date", &[Op::LtEq, Op::Eq]).ok_or(SqlError::MissingFilter("end_date"))?,
                "end_date",
            )?,
        }),
        other => Err(SqlError::UnknownTable(other.to_string())),
    }
}

struct Filter {
    column: String,
    op: ast::BinaryOperator,
    value: Expr,
}

fn find_filter<'a>(filters: &'a [Filter], column: &str, ops: &[ast::BinaryOperator]) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && ops.contains(&f.op))
        .map(|f| &f.value)
}

/// Flatten an AND-chain of `column <op> value` comparisons.
fn collect_filters(expr: &Expr, out: &mut Vec<Filter>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right.as_ref().clone(),
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Column/value plumbing ─────────────────────────────────────

const TABLES: &[&str] = &[
    "cars",
    "bookings",
    "booking_requests",
    "expenses",
    "users",
    "maintenance",
    "summary",
    "conflicts",
    "available_cars",
];

fn table_static(name: &str) -> Result<&'static str, SqlError> {
    TABLES
        .iter()
        .find(|t| **t == name)
        .copied()
        .ok_or_else(|| SqlError::UnknownTable(name.to_string()))
}

/// Column/value pairs of one INSERT row or UPDATE SET list. Every column
/// must be consumed, so typos are reported instead of ignored.
struct Fields {
    table: &'static str,
    values: Vec<(String, Expr)>,
}

impl Fields {
    fn from_insert(table: &'static str, insert: &ast::Insert) -> Result<Self, SqlError> {
        let rows = insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported("multi-row INSERT".into()));
        }
        let row = &rows[0];
        if insert.columns.is_empty() {
            return Err(SqlError::Parse(format!("{table}: column list required")));
        }
        if insert.columns.len() != row.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), row.len()));
        }
        let values = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(row.iter().cloned())
            .collect();
        Ok(Self { table, values })
    }

    fn from_assignments(
        table: &'static str,
        assignments: &[ast::Assignment],
    ) -> Result<Self, SqlError> {
        let mut values = Vec::with_capacity(assignments.len());
        for a in assignments {
            let column = match &a.target {
                AssignmentTarget::ColumnName(name) => object_name_last(name),
                _ => None,
            }
            .ok_or_else(|| SqlError::Unsupported(format!("assignment to {:?}", a.target)))?;
            values.push((column, a.value.clone()));
        }
        if values.is_empty() {
            return Err(SqlError::Parse(format!("{table}: nothing to update")));
        }
        Ok(Self { table, values })
    }

    fn take(&mut self, column: &str) -> Option<Expr> {
        let pos = self.values.iter().position(|(c, _)| c == column)?;
        Some(self.values.remove(pos).1)
    }

    fn optional<T>(
        &mut self,
        column: &'static str,
        parse: fn(&Expr, &'static str) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.take(column) {
            Some(expr) if !is_null(&expr) => parse(&expr, column).map(Some),
            _ => Ok(None),
        }
    }

    fn required<T>(
        &mut self,
        column: &'static str,
        parse: fn(&Expr, &'static str) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.optional(column, parse)?
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_iter().next() {
            Some((column, _)) => Err(SqlError::UnknownColumn(self.table, column)),
            None => Ok(()),
        }
    }
}

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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_filters(sel, &mut filters)?;
    match filters.as_slice() {
        [f] if f.column == "id" && f.op == ast::BinaryOperator::Eq => ulid(&f.value, "id"),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn bad(column: &'static str, msg: impl std::fmt::Display) -> SqlError {
    SqlError::BadValue(column, msg.to_string())
}

fn text(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(n, _)) => Ok(n.clone()),
        _ => Err(bad(column, format!("expected string, got {expr}"))),
    }
}

fn ulid(expr: &Expr, column: &'static str) -> Result<Ulid, SqlError> {
    let s = text(expr, column)?;
    Ulid::from_string(s.trim()).map_err(|e| bad(column, format!("bad ULID: {e}")))
}

fn day(expr: &Expr, column: &'static str) -> Result<Day, SqlError> {
    let s = text(expr, column)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::BadDate(column, format!("{s:?}: {e}")))
}

fn int(expr: &Expr, column: &'static str) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-int(expr, column)?);
    }
    let s = text(expr, column)?;
    s.trim()
        .parse()
        .map_err(|e| bad(column, format!("bad integer {s:?}: {e}")))
}

fn boolean(expr: &Expr, column: &'static str) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(bad(column, format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(bad(column, format!("expected bool, got {expr}"))),
    }
}

fn closed<T>(expr: &Expr, column: &'static str) -> Result<T, SqlError>
where
    T: FromStr<Err = UnknownVariant>,
{
    text(expr, column)?.parse().map_err(|e| bad(column, e))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    ReadOnlyTable(&'static str),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    BadValue(&'static str, String),
    BadDate(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::ReadOnlyTable(t) => write!(f, "{t} cannot be modified this way"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadValue(col, msg) => write!(f, "invalid value for {col}: {msg}"),
            SqlError::BadDate(col, msg) => {
                write!(f, "invalid date for {col} (expected YYYY-MM-DD): {msg}")
            }
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const CAR: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_car() {
        let sql = format!(
            "INSERT INTO cars (id, name, plate_number, model) VALUES ('{ID}', 'Premio', 'UBA 123X', 'Toyota')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertCar(car) => {
                assert_eq!(car.id.to_string(), ID);
                assert_eq!(car.name, "Premio");
                assert_eq!(car.plate_number, "UBA 123X");
                assert_eq!(car.status, None);
            }
            other => panic!("expected InsertCar, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_car_generates_id_and_reads_status() {
        let sql = "INSERT INTO cars (name, plate_number, model, status) VALUES ('Noah', 'UBB 1', 'Toyota', 'maintenance')";
        match parse_sql(sql).unwrap() {
            Command::InsertCar(car) => assert_eq!(car.status, Some(CarStatus::Maintenance)),
            other => panic!("expected InsertCar, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_optionals() {
        let sql = format!(
            "INSERT INTO bookings (id, car_id, customer_name, contact, start_date, end_date, purpose, amount_paid, rebooking) \
             VALUES ('{ID}', '{CAR}', 'Jane', '0700000000', '2024-06-01', '2024-06-05', 'Wedding', 450000, true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(b) => {
                assert_eq!(b.car_id.to_string(), CAR);
                assert_eq!(b.start_date, d("2024-06-01"));
                assert_eq!(b.end_date, d("2024-06-05"));
                assert_eq!(b.purpose.as_deref(), Some("Wedding"));
                assert_eq!(b.amount_paid, 450_000);
                assert!(b.rebooking);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_defaults() {
        let sql = format!(
            "INSERT INTO bookings (car_id, customer_name, contact, start_date, end_date, purpose) \
             VALUES ('{CAR}', 'Jane', 'j@example.com', '2024-06-01', '2024-06-05', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(b) => {
                assert_eq!(b.purpose, None);
                assert_eq!(b.amount_paid, 0);
                assert!(!b.rebooking);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn booking_request_rejects_owner_columns() {
        let sql = format!(
            "INSERT INTO booking_requests (car_id, customer_name, contact, start_date, end_date, amount_paid) \
             VALUES ('{CAR}', 'Jane', 'j@example.com', '2024-06-01', '2024-06-05', 10)"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::UnknownColumn("booking_requests", c)) if c == "amount_paid"
        ));
    }

    #[test]
    fn parse_booking_request() {
        let sql = format!(
            "INSERT INTO booking_requests (car_id, customer_name, contact, start_date, end_date) \
             VALUES ('{CAR}', 'Jane', 'j@example.com', '2024-06-01', '2024-06-05')"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(cmd.is_public());
        assert!(matches!(cmd, Command::InsertBookingRequest(_)));
    }

    #[test]
    fn parse_missing_column() {
        let sql = format!(
            "INSERT INTO bookings (car_id, customer_name, start_date, end_date) VALUES ('{CAR}', 'Jane', '2024-06-01', '2024-06-05')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("bookings", "contact"))
        ));
    }

    #[test]
    fn parse_bad_date() {
        let sql = format!(
            "INSERT INTO bookings (car_id, customer_name, contact, start_date, end_date) VALUES ('{CAR}', 'Jane', 'x', '06/01/2024', '2024-06-05')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::BadDate("start_date", _))
        ));
    }

    #[test]
    fn parse_insert_expense() {
        let sql = format!(
            "INSERT INTO expenses (car_id, description, amount, kind, date) VALUES ('{CAR}', 'Oil change', 120000, 'Maintenance', '2024-05-02')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertExpense(e) => {
                assert_eq!(e.amount, 120_000);
                assert_eq!(e.kind, ExpenseKind::Maintenance);
                assert_eq!(e.date, Some(d("2024-05-02")));
            }
            other => panic!("expected InsertExpense, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_user() {
        let sql = "INSERT INTO users (username, password) VALUES ('alice', 's3cret')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertUser {
                username: "alice".into(),
                password: "s3cret".into()
            }
        );
    }

    #[test]
    fn parse_update_car_service() {
        let sql = format!(
            "UPDATE cars SET status = 'Maintenance', next_service_date = '2024-09-01' WHERE id = '{CAR}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateCar { id, changes } => {
                assert_eq!(id.to_string(), CAR);
                assert_eq!(changes.status, Some(CarStatus::Maintenance));
                assert_eq!(changes.next_service_date, Some(d("2024-09-01")));
                assert_eq!(changes.name, None);
            }
            other => panic!("expected UpdateCar, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'approved' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { changes, .. } => {
                assert_eq!(changes.status, Some(BookingStatus::Approved));
                assert!(!changes.touches_dates());
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_rejects_unknown_status() {
        let sql = format!("UPDATE bookings SET status = 'Cancelled' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::BadValue("status", _))
        ));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'Approved'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM cars WHERE id = '{CAR}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteCar { .. }));
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBooking { .. }));
        let sql = "DELETE FROM expenses WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        assert!(matches!(parse_sql(sql), Err(SqlError::ReadOnlyTable("expenses"))));
    }

    #[test]
    fn parse_simple_selects() {
        assert_eq!(parse_sql("SELECT * FROM cars").unwrap(), Command::SelectCars);
        assert_eq!(parse_sql("select * from Expenses").unwrap(), Command::SelectExpenses);
        assert_eq!(parse_sql("SELECT * FROM maintenance").unwrap(), Command::SelectMaintenance);
        assert_eq!(parse_sql("SELECT * FROM summary").unwrap(), Command::SelectSummary);
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { car_id: None }
        );
    }

    #[test]
    fn parse_select_bookings_by_car() {
        let sql = format!("SELECT * FROM bookings WHERE car_id = '{CAR}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings { car_id } => assert_eq!(car_id.unwrap().to_string(), CAR),
            other => panic!("expected SelectBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE car_id = '{CAR}' AND start_date >= '2024-06-04' AND end_date <= '2024-06-06'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { start, end, .. } => {
                assert_eq!(start, d("2024-06-04"));
                assert_eq!(end, d("2024-06-06"));
            }
            other => panic!("expected SelectConflicts, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_available_cars() {
        let sql = "SELECT * FROM available_cars WHERE (start_date = '2024-06-01') AND end_date <= '2024-06-03'";
        let cmd = parse_sql(sql).unwrap();
        assert!(cmd.is_public());
        assert_eq!(
            cmd,
            Command::SelectAvailableCars {
                start: d("2024-06-01"),
                end: d("2024-06-03")
            }
        );
    }

    #[test]
    fn parse_select_available_cars_needs_dates() {
        let sql = "SELECT * FROM available_cars WHERE start_date >= '2024-06-01'";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingFilter("end_date"))
        ));
    }

    #[test]
    fn owner_commands_are_not_public() {
        assert!(!parse_sql("SELECT * FROM cars").unwrap().is_public());
        assert!(!parse_sql("SELECT * FROM summary").unwrap().is_public());
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
