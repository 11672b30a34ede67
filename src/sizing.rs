//! Size Model
//!
//! Pure functions for turning size strings into byte counts, resolving
//! snapshot-reserve semantics and enforcing volume size policy. None of
//! these touch the controller, so they run before any remote mutation.

use crate::error::{Error, Result};

/// Smallest volume the driver will create (20 MiB)
pub const MINIMUM_VOLUME_SIZE_BYTES: u64 = 20 * 1024 * 1024;

/// Requested and current sizes closer than this are treated as equal on resize
pub const SAN_RESIZE_DELTA_BYTES: u64 = 50_000_000;

/// Parse a size string ("1Gi", "500M", "1073741824") into bytes.
///
/// Binary suffixes (`Ki`..`Ei`) use powers of 1024, plain suffixes
/// (`K`..`E`) powers of 1000. A trailing `B` is accepted on either.
pub fn parse_size(text: &str) -> Result<u64> {
    let s = text.trim();
    if s.is_empty() {
        return Err(Error::InvalidSize("empty size string".into()));
    }
    if s.starts_with('-') {
        return Err(Error::InvalidSize(format!("negative size: {}", s)));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num_str, unit_str) = s.split_at(num_end);
    if num_str.is_empty() {
        return Err(Error::InvalidSize(format!("invalid number: {}", s)));
    }

    let multiplier = unit_multiplier(unit_str.trim())
        .ok_or_else(|| Error::InvalidSize(format!("unknown unit: {}", unit_str)))?;

    if num_str.contains('.') {
        let num: f64 = num_str
            .parse()
            .map_err(|_| Error::InvalidSize(format!("invalid number: {}", num_str)))?;
        let bytes = num * multiplier as f64;
        if !bytes.is_finite() || bytes > u64::MAX as f64 {
            return Err(Error::InvalidSize(format!("size out of range: {}", s)));
        }
        return Ok(bytes as u64);
    }

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidSize(format!("invalid number: {}", num_str)))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidSize(format!("size out of range: {}", s)))
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let unit = unit
        .strip_suffix('B')
        .or_else(|| unit.strip_suffix('b'))
        .unwrap_or(unit);
    if unit.is_empty() {
        return Some(1);
    }

    let (prefix, binary) = match unit.strip_suffix('i') {
        Some(prefix) => (prefix, true),
        None => (unit, false),
    };
    let exponent = match prefix.to_ascii_uppercase().as_str() {
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        "E" => 6,
        _ => return None,
    };
    let base: u64 = if binary { 1024 } else { 1000 };
    Some(base.pow(exponent))
}

/// Resolve the snapshot reserve percentage for a new volume.
///
/// An explicit value must be an integer percentage. Without one, a `none`
/// (or empty) snapshot policy implies 0%; any other policy leaves the
/// choice to the controller (`None`).
pub fn resolve_snapshot_reserve(policy: &str, explicit: &str) -> Result<Option<u8>> {
    let explicit = explicit.trim();
    if !explicit.is_empty() {
        let value: i64 = explicit
            .parse()
            .map_err(|_| Error::InvalidReserve(format!("{} is not a number", explicit)))?;
        if !(0..=100).contains(&value) {
            return Err(Error::InvalidReserve(format!(
                "{} is outside the range 0-100",
                value
            )));
        }
        return Ok(Some(value as u8));
    }

    match policy.trim() {
        "" | "none" => Ok(Some(0)),
        _ => Ok(None),
    }
}

/// Configured volume size policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub min_bytes: u64,
    pub max_bytes: Option<u64>,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            min_bytes: MINIMUM_VOLUME_SIZE_BYTES,
            max_bytes: None,
        }
    }
}

impl SizeLimits {
    /// Build limits from a `limitVolumeSize` setting
    pub fn from_limit(limit_volume_size: Option<&str>) -> Result<Self> {
        let max_bytes = match limit_volume_size.map(str::trim) {
            None | Some("") => None,
            Some(limit) => Some(parse_size(limit).map_err(|e| {
                Error::Configuration(format!("invalid limitVolumeSize {}: {}", limit, e))
            })?),
        };
        Ok(Self {
            max_bytes,
            ..Default::default()
        })
    }
}

/// Check a size against min/max policy
pub fn check_size_limits(size_bytes: u64, limits: &SizeLimits) -> Result<()> {
    if size_bytes < limits.min_bytes {
        return Err(Error::VolumeTooSmall {
            requested: size_bytes,
            minimum: limits.min_bytes,
        });
    }
    if let Some(limit) = limits.max_bytes {
        if size_bytes > limit {
            return Err(Error::LimitExceeded {
                requested: size_bytes,
                limit,
            });
        }
    }
    Ok(())
}

/// Apply the pool default to an unset (zero) size, then the minimum
pub fn volume_size_or_default(size_bytes: u64, pool_default: &str) -> Result<u64> {
    let size_bytes = if size_bytes == 0 {
        parse_size(pool_default).unwrap_or(0)
    } else {
        size_bytes
    };
    if size_bytes < MINIMUM_VOLUME_SIZE_BYTES {
        return Err(Error::VolumeTooSmall {
            requested: size_bytes,
            minimum: MINIMUM_VOLUME_SIZE_BYTES,
        });
    }
    Ok(size_bytes)
}

/// Whether two sizes are equal within `delta` bytes
pub fn within_tolerance(requested: u64, current: u64, delta: u64) -> bool {
    requested.abs_diff(current) <= delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GI: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size("1K").unwrap(), 1000);
        assert_eq!(parse_size("1Ki").unwrap(), 1024);
        assert_eq!(parse_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_size("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_size("1Gi").unwrap(), GI);
        assert_eq!(parse_size("100Gi").unwrap(), 100 * GI);
        assert_eq!(parse_size("1.5Gi").unwrap(), GI + GI / 2);
        assert_eq!(parse_size(" 2Ti ").unwrap(), 2 * 1024 * GI);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert_matches!(parse_size(""), Err(Error::InvalidSize(_)));
        assert_matches!(parse_size("abc"), Err(Error::InvalidSize(_)));
        assert_matches!(parse_size("100X"), Err(Error::InvalidSize(_)));
        assert_matches!(parse_size("-1Gi"), Err(Error::InvalidSize(_)));
        assert_matches!(parse_size("99999999999Ei"), Err(Error::InvalidSize(_)));
    }

    #[test]
    fn test_snapshot_reserve() {
        assert_eq!(resolve_snapshot_reserve("none", "").unwrap(), Some(0));
        assert_eq!(resolve_snapshot_reserve("", "").unwrap(), Some(0));
        assert_eq!(resolve_snapshot_reserve("default", "").unwrap(), None);
        assert_eq!(resolve_snapshot_reserve("default", "10").unwrap(), Some(10));
        assert_eq!(resolve_snapshot_reserve("none", "0").unwrap(), Some(0));

        assert_matches!(
            resolve_snapshot_reserve("none", "ten"),
            Err(Error::InvalidReserve(_))
        );
        assert_matches!(
            resolve_snapshot_reserve("none", "101"),
            Err(Error::InvalidReserve(_))
        );
        assert_matches!(
            resolve_snapshot_reserve("none", "-5"),
            Err(Error::InvalidReserve(_))
        );
    }

    #[test]
    fn test_size_limits() {
        let limits = SizeLimits::from_limit(Some("10Gi")).unwrap();
        assert!(check_size_limits(GI, &limits).is_ok());
        assert!(check_size_limits(10 * GI, &limits).is_ok());
        assert_matches!(
            check_size_limits(10 * GI + 1, &limits),
            Err(Error::LimitExceeded { limit, .. }) if limit == 10 * GI
        );
        assert_matches!(
            check_size_limits(1024, &limits),
            Err(Error::VolumeTooSmall { .. })
        );

        let unlimited = SizeLimits::from_limit(None).unwrap();
        assert!(check_size_limits(1024 * 1024 * GI, &unlimited).is_ok());

        assert_matches!(
            SizeLimits::from_limit(Some("lots")),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_volume_size_or_default() {
        assert_eq!(volume_size_or_default(0, "1G").unwrap(), 1_000_000_000);
        assert_eq!(volume_size_or_default(2 * GI, "1G").unwrap(), 2 * GI);
        assert_matches!(
            volume_size_or_default(1024, "1G"),
            Err(Error::VolumeTooSmall { .. })
        );
        assert_matches!(
            volume_size_or_default(0, ""),
            Err(Error::VolumeTooSmall { requested: 0, .. })
        );
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(GI, GI, SAN_RESIZE_DELTA_BYTES));
        assert!(within_tolerance(GI + 1000, GI, SAN_RESIZE_DELTA_BYTES));
        assert!(within_tolerance(GI, GI + SAN_RESIZE_DELTA_BYTES, SAN_RESIZE_DELTA_BYTES));
        assert!(!within_tolerance(2 * GI, GI, SAN_RESIZE_DELTA_BYTES));
    }
}
