//! Aggregate headroom checks
//!
//! Enforces `limitAggregateUsage` before a volume is created on, or grown
//! within, an aggregate.

use crate::controller::api::extract;
use crate::domain::ports::ControllerApi;
use crate::error::{Error, Result};
use tracing::debug;

/// Fail when placing `requested_bytes` on `aggregate` would breach the
/// configured usage limit (percent). A `None` limit skips the check.
///
/// Thick (`volume` space reserve) volumes count their full size against
/// the aggregate; thin volumes only require current usage to be under
/// the limit.
pub async fn check_aggregate_limits(
    api: &dyn ControllerApi,
    aggregate: &str,
    space_reserve: &str,
    requested_bytes: u64,
    limit_percent: Option<f64>,
) -> Result<()> {
    let limit = match limit_percent {
        Some(limit) => limit,
        None => return Ok(()),
    };

    let space = extract(api.aggr_space_get(aggregate).await)
        .map_err(|e| Error::remote("aggr-space-get", aggregate, e))?
        .ok_or_else(|| Error::AggregateLimit {
            aggregate: aggregate.to_string(),
            reason: "could not find aggregate".to_string(),
        })?;

    let size = match space.size_bytes {
        Some(size) if size > 0 => size as f64,
        _ => {
            return Err(Error::AggregateLimit {
                aggregate: aggregate.to_string(),
                reason: "aggregate size not available".to_string(),
            })
        }
    };
    let used = space.used_including_snapshot_reserve_bytes as f64;

    let (usage, reason) = if space_reserve == "volume" {
        let usage = (used + requested_bytes as f64) / size * 100.0;
        (usage, "aggregate usage would exceed the limit")
    } else {
        let usage = used / size * 100.0;
        (usage, "aggregate usage exceeds the limit")
    };

    debug!(
        aggregate = %aggregate,
        usage = usage,
        limit = limit,
        space_reserve = %space_reserve,
        "Checked aggregate usage"
    );

    if usage >= limit {
        return Err(Error::AggregateLimit {
            aggregate: aggregate.to_string(),
            reason: format!("{} ({:.2}% >= {:.2}%)", reason, usage, limit),
        });
    }
    Ok(())
}

/// Aggregate check for growing an existing volume by `requested_bytes`
pub async fn check_aggregate_limits_for_flexvol(
    api: &dyn ControllerApi,
    flexvol: &str,
    requested_bytes: u64,
    limit_percent: Option<f64>,
) -> Result<()> {
    if limit_percent.is_none() {
        return Ok(());
    }
    let volume = extract(api.volume_get(flexvol).await)
        .map_err(|e| Error::remote("volume-get", flexvol, e))?
        .ok_or_else(|| Error::VolumeNotFound(flexvol.to_string()))?;

    check_aggregate_limits(
        api,
        &volume.aggregate,
        &volume.space_reserve,
        requested_bytes,
        limit_percent,
    )
    .await
}
