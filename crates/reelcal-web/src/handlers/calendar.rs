use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use reelcal_core::month::{MAX_YEAR, MIN_YEAR};
use reelcal_core::{FetchError, YearMonth, group_by_date};

use crate::models::{CalendarQuery, CalendarResponse, ErrorResponse, MISSING_KEY_ERROR, views};
use crate::state::AppState;

pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Response {
    let current = YearMonth::of(chrono::Local::now().date_naive());
    let year = query.year.unwrap_or(current.year());
    let month = query.month.unwrap_or(current.month());

    let Some(month) = YearMonth::new(year, month) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid month {year}-{month}: month must be 1-12 and year {MIN_YEAR}-{MAX_YEAR}"),
        );
    };

    let releases = match state.fetcher.fetch_month(month).await {
        Ok(releases) => releases,
        Err(e) => {
            tracing::error!(%month, error = %e, "calendar fetch failed");
            return error_response(status_for(&e), e.to_string());
        }
    };

    // Warm neighbouring months so paging is a cache hit.
    let _ = state.fetcher.prefetch_adjacent(month);

    let grouped = group_by_date(&releases);
    Json(CalendarResponse {
        title: month.title(),
        year: month.year(),
        month: month.month(),
        movies: views(&releases),
        by_date: grouped
            .iter()
            .map(|(date, day)| (date.as_str(), views(day)))
            .collect(),
        error: if state.api_key_configured {
            ""
        } else {
            MISSING_KEY_ERROR
        },
    })
    .into_response()
}

/// Storage failures are a (possibly transient) unavailable backend; anything
/// else is a server fault.
pub fn status_for(e: &FetchError) -> StatusCode {
    if e.is_storage() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
