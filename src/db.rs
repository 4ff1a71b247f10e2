use std::path::Path;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::models::{
    AuditEvent, CachedReport, Category, CategoryBucket, CostRecord, LogEntry, NewCost, Report,
    ReportPeriod, User,
};
use crate::store::{CostLedger, LogStore, ReportCache, UserDirectory};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> std::result::Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::new(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

/// Single-connection pool over a private in-memory database.
#[cfg(test)]
pub fn init_memory_db() -> std::result::Result<DbPool, StoreError> {
    let pool = Pool::builder()
        .max_size(1)
        .build(
            SqliteConnectionManager::memory()
                .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;")),
        )?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            birthday TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS costs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            category TEXT NOT NULL
                CHECK(category IN ('food', 'health', 'housing', 'sports', 'education')),
            user_id INTEGER NOT NULL,
            amount TEXT NOT NULL,
            day INTEGER NOT NULL CHECK(day BETWEEN 1 AND 31),
            month INTEGER NOT NULL CHECK(month BETWEEN 1 AND 12),
            year INTEGER NOT NULL CHECK(year >= 1900),
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS costs_period
            ON costs (user_id, year, month);

        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL CHECK(month BETWEEN 1 AND 12),
            categories TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            UNIQUE(user_id, year, month)
        );

        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            service TEXT NOT NULL,
            method TEXT,
            url TEXT,
            status_code INTEGER,
            response_time_ms INTEGER,
            data TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        ",
    )
}

impl ToSql for Category {
    fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|_| FromSqlError::Other(format!("unknown category '{text}'").into()))
    }
}

fn decimal_column(row: &Row<'_>, idx: usize) -> Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column(row: &Row<'_>, idx: usize) -> Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn user_exists(conn: &Connection, id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![id],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        birthday: row.get(3)?,
    })
}

pub fn find_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, first_name, last_name, birthday FROM users WHERE id = ?1",
        params![id],
        user_from_row,
    )
    .optional()
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, first_name, last_name, birthday
        FROM users
        ORDER BY id
        ",
    )?;
    let rows = stmt.query_map([], user_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn insert_user(conn: &Connection, user: &User, created_at: &str) -> Result<()> {
    conn.execute(
        "
        INSERT INTO users (id, first_name, last_name, birthday, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            user.id,
            user.first_name,
            user.last_name,
            user.birthday,
            created_at
        ],
    )?;
    Ok(())
}

pub const INITIAL_USER_ID: i64 = 123123;

/// Inserts the initial demo user unless it is already there.
pub fn seed_initial_user(conn: &Connection) -> Result<bool> {
    let birthday = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default();
    let inserted = conn.execute(
        "
        INSERT OR IGNORE INTO users (id, first_name, last_name, birthday, created_at)
        VALUES (?1, 'mosh', 'israeli', ?2, ?3)
        ",
        params![INITIAL_USER_ID, birthday, Local::now().to_rfc3339()],
    )?;
    Ok(inserted == 1)
}

pub fn insert_cost(conn: &Connection, cost: &NewCost, created_at: &str) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO costs (description, category, user_id, amount, day, month, year, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            cost.description,
            cost.category,
            cost.user_id,
            cost.amount.to_string(),
            cost.day,
            cost.month,
            cost.year,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn costs_for_period(conn: &Connection, period: ReportPeriod) -> Result<Vec<CostRecord>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, description, category, user_id, amount, day, month, year
        FROM costs
        WHERE user_id = ?1 AND year = ?2 AND month = ?3
        ORDER BY id
        ",
    )?;
    let rows = stmt.query_map(params![period.user_id, period.year, period.month], |row| {
        Ok(CostRecord {
            id: row.get(0)?,
            description: row.get(1)?,
            category: row.get(2)?,
            user_id: row.get(3)?,
            amount: decimal_column(row, 4)?,
            day: row.get(5)?,
            month: row.get(6)?,
            year: row.get(7)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Sum of every cost of a user. Amounts are text, so they are added here
/// rather than with SQL `SUM`, which would go through floating point.
pub fn user_cost_total(conn: &Connection, user_id: i64) -> Result<Decimal> {
    let mut stmt = conn.prepare("SELECT amount FROM costs WHERE user_id = ?1")?;
    let rows = stmt.query_map(params![user_id], |row| decimal_column(row, 0))?;

    let mut total = Decimal::ZERO;
    for row in rows {
        total += row?;
    }
    Ok(total)
}

pub fn find_report(
    conn: &Connection,
    period: ReportPeriod,
) -> std::result::Result<Option<CachedReport>, StoreError> {
    let row = conn
        .query_row(
            "
            SELECT categories, computed_at
            FROM reports
            WHERE user_id = ?1 AND year = ?2 AND month = ?3
            ",
            params![period.user_id, period.year, period.month],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    let Some((categories, computed_at)) = row else {
        return Ok(None);
    };
    let categories: Vec<CategoryBucket> = serde_json::from_str(&categories)
        .map_err(|e| StoreError::Corrupt(format!("cached report for {period}: {e}")))?;
    Ok(Some(CachedReport {
        report: Report {
            user_id: period.user_id,
            year: period.year,
            month: period.month,
            categories,
        },
        computed_at,
    }))
}

pub fn insert_report(
    conn: &Connection,
    report: &Report,
    computed_at: &str,
) -> std::result::Result<(), StoreError> {
    let categories = serde_json::to_string(&report.categories)?;
    conn.execute(
        "
        INSERT INTO reports (user_id, year, month, categories, computed_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            report.user_id,
            report.year,
            report.month,
            categories,
            computed_at
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub fn report_count(conn: &Connection, period: ReportPeriod) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE user_id = ?1 AND year = ?2 AND month = ?3",
        params![period.user_id, period.year, period.month],
        |row| row.get(0),
    )
}

pub fn insert_log(
    conn: &Connection,
    service: &str,
    event: &AuditEvent,
    timestamp: &str,
) -> std::result::Result<(), StoreError> {
    let request = event.request.as_ref();
    conn.execute(
        "
        INSERT INTO logs (level, message, service, method, url, status_code, response_time_ms, data, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            event.level.as_str(),
            event.message,
            service,
            request.map(|r| r.method.as_str()),
            request.map(|r| r.url.as_str()),
            request.map(|r| r.status_code),
            request.map(|r| r.response_time_ms),
            serde_json::to_string(&event.data)?,
            timestamp
        ],
    )?;
    Ok(())
}

pub fn list_logs(conn: &Connection) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, level, message, service, method, url, status_code, response_time_ms, data, timestamp
        FROM logs
        ORDER BY timestamp DESC, id DESC
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(LogEntry {
            id: row.get(0)?,
            level: row.get(1)?,
            message: row.get(2)?,
            service: row.get(3)?,
            method: row.get(4)?,
            url: row.get(5)?,
            status_code: row.get(6)?,
            response_time_ms: row.get(7)?,
            data: json_column(row, 8)?,
            timestamp: row.get(9)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Pool-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl UserDirectory for SqliteStore {
    fn exists(&self, id: i64) -> std::result::Result<bool, StoreError> {
        let conn = self.pool.get()?;
        Ok(user_exists(&conn, id)?)
    }

    fn find(&self, id: i64) -> std::result::Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;
        Ok(find_user(&conn, id)?)
    }

    fn insert(&self, user: &User) -> std::result::Result<(), StoreError> {
        let created_at = Local::now().to_rfc3339();
        let conn = self.pool.get()?;
        Ok(insert_user(&conn, user, &created_at)?)
    }

    fn list(&self) -> std::result::Result<Vec<User>, StoreError> {
        let conn = self.pool.get()?;
        Ok(list_users(&conn)?)
    }
}

impl CostLedger for SqliteStore {
    fn insert(&self, cost: NewCost) -> std::result::Result<CostRecord, StoreError> {
        let created_at = Local::now().to_rfc3339();
        let conn = self.pool.get()?;
        let id = insert_cost(&conn, &cost, &created_at)?;
        Ok(CostRecord::from_new(id, cost))
    }

    fn query(&self, period: ReportPeriod) -> std::result::Result<Vec<CostRecord>, StoreError> {
        let conn = self.pool.get()?;
        Ok(costs_for_period(&conn, period)?)
    }

    fn total_for_user(&self, user_id: i64) -> std::result::Result<Decimal, StoreError> {
        let conn = self.pool.get()?;
        Ok(user_cost_total(&conn, user_id)?)
    }
}

impl ReportCache for SqliteStore {
    fn find(&self, period: ReportPeriod) -> std::result::Result<Option<CachedReport>, StoreError> {
        let conn = self.pool.get()?;
        find_report(&conn, period)
    }

    fn insert(&self, report: &Report) -> std::result::Result<(), StoreError> {
        let computed_at = Local::now().to_rfc3339();
        let conn = self.pool.get()?;
        insert_report(&conn, report, &computed_at)
    }
}

impl LogStore for SqliteStore {
    fn list(&self) -> std::result::Result<Vec<LogEntry>, StoreError> {
        let conn = self.pool.get()?;
        Ok(list_logs(&conn)?)
    }
}
