#[macro_use]
extern crate rocket;

mod audit;
mod clock;
mod config;
mod costs;
mod db;
mod errors;
mod models;
mod report;
mod store;
mod users;

use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::time::Instant;

use audit::DbAudit;
use clock::{Clock, SystemClock};
use config::AppConfig;
use costs::{CostService, CostSubmission};
use db::{DbPool, SqliteStore};
use errors::{ServiceError, StoreError};
use models::{AuditEvent, CostRecord, Developer, LogEntry, Report, RequestInfo, User};
use report::ReportResolver;
use rocket::data::Data;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::serde::Serialize;
use rocket::{Build, Request, Response, Rocket, State};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use store::{AuditSink, CostLedger, LogStore, UserDirectory};
use users::UserSubmission;

struct AppState {
    users: Arc<dyn UserDirectory>,
    ledger: Arc<dyn CostLedger>,
    logs: Arc<dyn LogStore>,
    audit: Arc<dyn AuditSink>,
    costs: CostService,
    reports: ReportResolver,
    developers: Vec<Developer>,
    service_name: String,
}

impl AppState {
    fn new(pool: DbPool, config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(DbAudit::new(pool, config.service_name.clone()));
        Self {
            users: store.clone(),
            ledger: store.clone(),
            logs: store.clone(),
            audit: audit.clone(),
            costs: CostService::new(store.clone(), store.clone(), audit.clone(), clock.clone()),
            reports: ReportResolver::new(store.clone(), store.clone(), store, audit, clock),
            developers: config.developers.clone(),
            service_name: config.service_name.clone(),
        }
    }

    /// Logs a storage failure and turns it into a 500.
    fn storage_failure(&self, message: &str, err: StoreError) -> ServiceError {
        self.audit
            .record(AuditEvent::error(message, json!({ "error": err.to_string() })));
        ServiceError::Storage(err)
    }

    fn endpoint(&self, message: &str, data: Value) {
        self.audit.record(AuditEvent::info(message, data));
    }
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct CostView {
    id: i64,
    description: String,
    category: String,
    #[serde(rename = "userId")]
    user_id: i64,
    amount: f64,
    day: u32,
    month: u32,
    year: i32,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct ReportEntryView {
    amount: f64,
    description: String,
    day: u32,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct ReportView {
    #[serde(rename = "userId")]
    user_id: i64,
    year: i32,
    month: u32,
    categories: Vec<BTreeMap<&'static str, Vec<ReportEntryView>>>,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct UserView {
    id: i64,
    first_name: String,
    last_name: String,
    birthday: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct UserTotalView {
    id: i64,
    first_name: String,
    last_name: String,
    total: f64,
}

/// Decimal amounts become JSON numbers only here, at the response boundary.
fn display_amount(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or_default()
}

fn cost_view(record: CostRecord) -> CostView {
    CostView {
        id: record.id,
        description: record.description,
        category: record.category.to_string(),
        user_id: record.user_id,
        amount: display_amount(record.amount),
        day: record.day,
        month: record.month,
        year: record.year,
    }
}

fn report_view(report: Report) -> ReportView {
    let categories = report
        .categories
        .into_iter()
        .map(|bucket| {
            let entries = bucket
                .entries
                .into_iter()
                .map(|entry| ReportEntryView {
                    amount: display_amount(entry.amount),
                    description: entry.description,
                    day: entry.day,
                })
                .collect();
            BTreeMap::from([(bucket.category.as_str(), entries)])
        })
        .collect();
    ReportView {
        user_id: report.user_id,
        year: report.year,
        month: report.month,
        categories,
    }
}

fn user_view(user: User) -> UserView {
    UserView {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        birthday: user.birthday.format("%Y-%m-%d").to_string(),
    }
}

#[post("/api/add", data = "<body>")]
fn add_cost(
    state: &State<AppState>,
    body: Json<CostSubmission>,
) -> Result<(Status, Json<CostView>), ServiceError> {
    state.endpoint("Endpoint accessed: POST /api/add (cost)", json!({}));
    let record = state.costs.submit(body.into_inner()).map_err(|err| match err {
        ServiceError::Storage(err) => state.storage_failure("Error adding cost", err),
        other => other,
    })?;
    Ok((Status::Created, Json(cost_view(record))))
}

#[get("/api/report?<id>&<year>&<month>")]
fn get_report(
    state: &State<AppState>,
    id: Option<&str>,
    year: Option<&str>,
    month: Option<&str>,
) -> Result<Json<ReportView>, ServiceError> {
    state.endpoint(
        "Endpoint accessed: GET /api/report",
        json!({ "id": id, "year": year, "month": month }),
    );
    let raw_id = id.ok_or_else(|| ServiceError::validation(None, "User ID (id) is required"))?;
    let raw_subject = Some(json!(raw_id));
    let raw_year = year
        .ok_or_else(|| ServiceError::validation(raw_subject.clone(), "Year is required"))?;
    let raw_month = month
        .ok_or_else(|| ServiceError::validation(raw_subject.clone(), "Month is required"))?;

    let id: i64 = raw_id
        .trim()
        .parse()
        .map_err(|_| ServiceError::validation(raw_subject, "User ID must be a number"))?;
    let subject = Some(json!(id));
    let year: i32 = raw_year
        .trim()
        .parse()
        .map_err(|_| ServiceError::validation(subject.clone(), "Year must be a valid year"))?;
    let month: u32 = raw_month.trim().parse().map_err(|_| {
        ServiceError::validation(subject, "Month must be between 1 and 12")
    })?;

    let report = state
        .reports
        .resolve(id, year, month)
        .map_err(|err| match err {
            ServiceError::Storage(err) => state.storage_failure("Error generating report", err),
            other => other,
        })?;
    Ok(Json(report_view(report)))
}

#[get("/api/users")]
fn list_users(state: &State<AppState>) -> Result<Json<Vec<UserView>>, ServiceError> {
    state.endpoint("Endpoint accessed: GET /api/users", json!({}));
    let users = state
        .users
        .list()
        .map_err(|err| state.storage_failure("Error retrieving users", err))?;
    state.endpoint("Users retrieved successfully", json!({ "count": users.len() }));
    Ok(Json(users.into_iter().map(user_view).collect()))
}

#[get("/api/users/<id>")]
fn get_user(state: &State<AppState>, id: &str) -> Result<Json<UserTotalView>, ServiceError> {
    state.endpoint("Endpoint accessed: GET /api/users/:id", json!({ "id": id }));
    let user_id: i64 = id.trim().parse().map_err(|_| {
        state.audit.record(AuditEvent::warn(
            "Invalid user ID provided",
            json!({ "id": id }),
        ));
        ServiceError::validation(Some(json!(id)), "Invalid user ID. Must be a number.")
    })?;

    let user = state
        .users
        .find(user_id)
        .map_err(|err| state.storage_failure("Error retrieving user details", err))?
        .ok_or_else(|| {
            state.audit.record(AuditEvent::warn(
                "User not found",
                json!({ "userId": user_id }),
            ));
            ServiceError::not_found(user_id, "User not found")
        })?;
    let total = state
        .ledger
        .total_for_user(user_id)
        .map_err(|err| state.storage_failure("Error retrieving user details", err))?;

    state.endpoint(
        "User details retrieved successfully",
        json!({ "userId": user_id, "total": total.to_string() }),
    );
    Ok(Json(UserTotalView {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        total: display_amount(total),
    }))
}

#[post("/api/users", data = "<body>")]
fn add_user(
    state: &State<AppState>,
    body: Json<UserSubmission>,
) -> Result<(Status, Json<UserView>), ServiceError> {
    state.endpoint("Endpoint accessed: POST /api/users", json!({}));
    let user = users::add_user(state.users.as_ref(), state.audit.as_ref(), &body)
        .map_err(|err| match err {
            ServiceError::Storage(err) => state.storage_failure("Error adding user", err),
            other => other,
        })?;
    Ok((Status::Created, Json(user_view(user))))
}

#[get("/api/logs")]
fn list_logs(state: &State<AppState>) -> Result<Json<Vec<LogEntry>>, ServiceError> {
    state.endpoint("Endpoint accessed: GET /api/logs", json!({}));
    let logs = state
        .logs
        .list()
        .map_err(|err| state.storage_failure("Error retrieving logs", err))?;
    state.endpoint("Logs retrieved successfully", json!({ "count": logs.len() }));
    Ok(Json(logs))
}

#[get("/api/about")]
fn about(state: &State<AppState>) -> Json<Vec<Developer>> {
    state.endpoint(
        "Developers info retrieved successfully",
        json!({ "count": state.developers.len() }),
    );
    Json(state.developers.clone())
}

#[get("/health")]
fn health(state: &State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "service": state.service_name }))
}

#[catch(default)]
fn default_catcher(status: Status, _request: &Request<'_>) -> Json<Value> {
    Json(json!({
        "id": Value::Null,
        "message": status.reason().unwrap_or("Unexpected error"),
    }))
}

struct RequestStart(Option<Instant>);

/// Writes one log entry per finished request with its status and timing.
struct RequestLogger {
    audit: Arc<dyn AuditSink>,
}

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| RequestStart(Some(Instant::now())));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let started = request.local_cache(|| RequestStart(None));
        let elapsed = started
            .0
            .map(|start| i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let info = RequestInfo {
            method: request.method().as_str().to_string(),
            url: request.uri().to_string(),
            status_code: response.status().code,
            response_time_ms: elapsed,
        };
        let mut event = AuditEvent::info(
            format!(
                "{} {} {} {}ms",
                info.method, info.url, info.status_code, info.response_time_ms
            ),
            serde_json::to_value(&info).unwrap_or_default(),
        );
        event.request = Some(info);
        self.audit.record(event);
    }
}

fn build_rocket(pool: DbPool, config: &AppConfig, clock: Arc<dyn Clock>) -> Rocket<Build> {
    let state = AppState::new(pool, config, clock);
    let logger = RequestLogger {
        audit: state.audit.clone(),
    };

    rocket::build()
        .manage(state)
        .mount(
            "/",
            routes![
                add_cost,
                get_report,
                list_users,
                get_user,
                add_user,
                list_logs,
                about,
                health
            ],
        )
        .register("/", catchers![default_catcher])
        .attach(logger)
}

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cost_reports=info"));
        let _ = fmt().with_env_filter(filter).try_init();
    });
}

#[launch]
fn rocket() -> _ {
    init_tracing();
    let config = AppConfig::from_env();
    if let Some(dir) = config
        .database_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).expect("create data directory");
    }
    let pool = db::init_db(&config.database_path).expect("db pool");
    if config.seed_initial_user {
        let conn = pool.get().expect("db connection");
        if db::seed_initial_user(&conn).expect("seed initial user") {
            tracing::info!(user_id = db::INITIAL_USER_ID, "seeded initial user");
        }
    }
    tracing::info!(
        service = %config.service_name,
        database = %config.database_path.display(),
        "starting"
    );

    build_rocket(pool, &config, Arc::new(SystemClock))
}
