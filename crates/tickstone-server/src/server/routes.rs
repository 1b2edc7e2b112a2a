//! HTTP surface of the oracle.
//!
//! Client routes hand out timestamps; admin routes expose the migration
//! primitives so another instance can take over from this one.

use crate::server::error::ApiError;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tickstone::{
    BoundStore, TimeSource, Timestamp, TimestampDestination, TimestampRange, TimestampService,
    TimestampSource,
};
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    #[serde(default = "one")]
    pub count: u64,
}

const fn one() -> u64 {
    1
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimestampBody {
    pub timestamp: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundsBody {
    pub upper_limit: Timestamp,
    pub last_returned: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainsBody {
    pub contains: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupBody {
    pub backup: Timestamp,
}

pub fn router<S, T>(service: TimestampService<S, T>) -> Router
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    Router::new()
        .route("/timestamps", post(fresh_timestamps::<S, T>))
        .route("/timestamp", post(fresh_timestamp::<S, T>))
        .route("/bounds", get(bounds::<S, T>))
        .route("/contains/{ts}", get(contains::<S, T>))
        .route("/ping", get(ping::<S, T>))
        .route("/fast-forward/{ts}", post(fast_forward::<S, T>))
        .route("/backup-and-invalidate", post(backup_and_invalidate::<S, T>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn fresh_timestamps<S, T>(
    State(service): State<TimestampService<S, T>>,
    Query(query): Query<CountQuery>,
) -> Result<Json<TimestampRange>, ApiError>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    Ok(Json(service.fresh_timestamps(query.count).await?))
}

async fn fresh_timestamp<S, T>(
    State(service): State<TimestampService<S, T>>,
) -> Result<Json<TimestampBody>, ApiError>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    let timestamp = service.fresh_timestamp().await?;
    Ok(Json(TimestampBody { timestamp }))
}

async fn bounds<S, T>(State(service): State<TimestampService<S, T>>) -> Json<BoundsBody>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    Json(BoundsBody {
        upper_limit: service.upper_limit(),
        last_returned: service.last_returned(),
    })
}

async fn contains<S, T>(
    State(service): State<TimestampService<S, T>>,
    Path(ts): Path<Timestamp>,
) -> Json<ContainsBody>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    Json(ContainsBody {
        contains: service.contains(ts),
    })
}

async fn ping<S, T>(State(service): State<TimestampService<S, T>>) -> Result<&'static str, ApiError>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    service.ping().await?;
    Ok("pong")
}

async fn fast_forward<S, T>(
    State(service): State<TimestampService<S, T>>,
    Path(ts): Path<Timestamp>,
) -> Result<StatusCode, ApiError>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    tracing::info!(ts, "fast-forward requested");
    service.fast_forward_timestamp(ts).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn backup_and_invalidate<S, T>(
    State(service): State<TimestampService<S, T>>,
) -> Result<Json<BackupBody>, ApiError>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    tracing::warn!("backup and invalidate requested");
    let backup = service.backup_and_invalidate().await?;
    Ok(Json(BackupBody { backup }))
}
