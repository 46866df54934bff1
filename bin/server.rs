// Bankzaken - Web Server
// Read-only JSON API over the categorized_transactions table

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use bankzaken::{
    find_unusual_transactions, get_all_transactions, get_category_summary, get_review_queue,
    get_source_file_stats, get_transactions_by_source, monthly_summary, movements_from_output,
    spending_trends, summary_stats, verify_count, CategorySummary, MonthlySummary, OutputRecord,
    SourceFileStat, SummaryStats, UnusualReport, WeeklySpending, DEFAULT_UNUSUAL_MULTIPLIER,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn failed(data: T, error: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(error),
        }
    }
}

/// Stats response
#[derive(Serialize, Default)]
struct StatsResponse {
    total_transactions: i64,
    needs_review: usize,
    by_category: Vec<CategorySummary>,
    summary: Option<SummaryStats>,
    monthly: Vec<MonthlySummary>,
    unusual: UnusualReport,
}

/// Render a query result, logging failures and answering with an empty payload
fn respond<T: Serialize>(what: &str, result: anyhow::Result<T>, empty: T) -> axum::response::Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => {
            log::error!("Error getting {}: {:#}", what, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(empty, e.to_string())),
            )
                .into_response()
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/transactions - Get all categorized transactions
async fn get_transactions(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.conn();
    respond("transactions", get_all_transactions(&conn), Vec::<OutputRecord>::new())
}

/// GET /api/review - Transactions below the confidence threshold
async fn get_review(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.conn();
    respond("review queue", get_review_queue(&conn), Vec::<OutputRecord>::new())
}

/// GET /api/stats - Totals per category, per month and overall, plus unusual amounts
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.conn();
    let result = (|| -> anyhow::Result<StatsResponse> {
        let movements = movements_from_output(&get_all_transactions(&conn)?)?;
        Ok(StatsResponse {
            total_transactions: verify_count(&conn)?,
            needs_review: get_review_queue(&conn)?.len(),
            by_category: get_category_summary(&conn)?,
            summary: summary_stats(&movements),
            monthly: monthly_summary(&movements),
            unusual: find_unusual_transactions(&movements, DEFAULT_UNUSUAL_MULTIPLIER),
        })
    })();

    respond("stats", result, StatsResponse::default())
}

/// GET /api/trends - Weekly spending with rolling averages
async fn get_trends(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.conn();
    let result = get_all_transactions(&conn)
        .and_then(|rows| movements_from_output(&rows))
        .map(|movements| spending_trends(&movements));

    respond("trends", result, Vec::<WeeklySpending>::new())
}

/// GET /api/sources - Get all source files with statistics
async fn get_sources(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.conn();
    respond("source files", get_source_file_stats(&conn), Vec::<SourceFileStat>::new())
}

/// GET /api/sources/:filename - Get transactions from a specific source file
async fn get_source_transactions(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> impl IntoResponse {
    let conn = state.conn();

    // Decode URL-encoded filename
    let decoded_filename = urlencoding::decode(&filename)
        .unwrap_or_else(|_| filename.clone().into())
        .into_owned();

    respond(
        &format!("transactions for source {}", decoded_filename),
        get_transactions_by_source(&conn, &decoded_filename),
        Vec::<OutputRecord>::new(),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🌐 Bankzaken - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "transactions.db".to_string());
    let db_path = std::path::Path::new(&db_path);

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: bankzaken import <files>");
        eprintln!("   to import transactions first.");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path)?;
    println!("✓ Database opened: {:?}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(get_transactions))
        .route("/review", get(get_review))
        .route("/stats", get(get_stats))
        .route("/trends", get(get_trends))
        .route("/sources", get(get_sources))
        .route("/sources/:filename", get(get_source_transactions))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/transactions");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
