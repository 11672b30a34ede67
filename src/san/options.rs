//! Volume option resolution
//!
//! Per-request options override the pool's attribute defaults. Keys may be
//! given as alternatives (`"fstype|fileSystemType"`); the first one present
//! in the request wins.

use crate::domain::types::{attributes, StoragePool, VolumeOptions};
use crate::error::{Error, Result};
use crate::sizing::resolve_snapshot_reserve;
use std::collections::BTreeMap;
use tracing::warn;

/// Filesystems a LUN may be tagged with
pub const SUPPORTED_FILESYSTEMS: &[&str] = &["ext3", "ext4", "xfs", "raw"];

/// Look up the first of `|`-separated keys present in `options`
pub fn get_v<'a>(options: &'a BTreeMap<String, String>, keys: &str, default: &'a str) -> &'a str {
    keys.split('|')
        .find_map(|key| options.get(key))
        .map(String::as_str)
        .unwrap_or(default)
}

/// Parse a boolean the way operators write them in configuration
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Parse a boolean option, naming the option on failure
pub fn require_bool(name: &str, value: &str) -> Result<bool> {
    parse_bool(value).ok_or_else(|| Error::InvalidOption {
        name: name.to_string(),
        reason: format!("invalid boolean value {:?}", value),
    })
}

/// Validate a filesystem type, normalizing it to lower case
pub fn check_supported_filesystem(fstype: &str, volume: &str) -> Result<String> {
    let fstype = fstype.trim().to_lowercase();
    if SUPPORTED_FILESYSTEMS.contains(&fstype.as_str()) {
        Ok(fstype)
    } else {
        Err(Error::UnsupportedFilesystem {
            volume: volume.to_string(),
            fstype,
        })
    }
}

/// Storage-side name for a logical volume name
pub fn internal_volume_name(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name).replace(['-', '.'], "_")
}

/// Resolve every creation option of a volume against its pool.
///
/// Runs before any remote call; an invalid value fails the whole create.
pub fn resolve_volume_options(
    volume: &str,
    options: &BTreeMap<String, String>,
    pool: &StoragePool,
    default_tiering_policy: &str,
) -> Result<VolumeOptions> {
    let space_allocation_raw = get_v(
        options,
        attributes::SPACE_ALLOCATION,
        pool.attribute(attributes::SPACE_ALLOCATION),
    );
    let space_allocation = parse_bool(space_allocation_raw).unwrap_or_else(|| {
        warn!(
            volume = %volume,
            value = %space_allocation_raw,
            "Invalid spaceAllocation value, disabling space allocation"
        );
        false
    });

    let snapshot_policy = get_v(
        options,
        attributes::SNAPSHOT_POLICY,
        pool.attribute(attributes::SNAPSHOT_POLICY),
    );
    let snapshot_reserve = resolve_snapshot_reserve(
        snapshot_policy,
        get_v(
            options,
            attributes::SNAPSHOT_RESERVE,
            pool.attribute(attributes::SNAPSHOT_RESERVE),
        ),
    )?;

    let encryption = require_bool(
        attributes::ENCRYPTION,
        get_v(options, attributes::ENCRYPTION, pool.attribute(attributes::ENCRYPTION)),
    )?;

    let fstype = check_supported_filesystem(
        get_v(
            options,
            "fstype|fileSystemType",
            pool.attribute(attributes::FILE_SYSTEM_TYPE),
        ),
        volume,
    )?;

    let mut tiering_policy = get_v(
        options,
        attributes::TIERING_POLICY,
        pool.attribute(attributes::TIERING_POLICY),
    )
    .to_string();
    if tiering_policy.is_empty() {
        tiering_policy = default_tiering_policy.to_string();
    }

    Ok(VolumeOptions {
        space_allocation,
        space_reserve: get_v(
            options,
            attributes::SPACE_RESERVE,
            pool.attribute(attributes::SPACE_RESERVE),
        )
        .to_string(),
        snapshot_policy: snapshot_policy.to_string(),
        snapshot_reserve,
        unix_permissions: get_v(
            options,
            attributes::UNIX_PERMISSIONS,
            pool.attribute(attributes::UNIX_PERMISSIONS),
        )
        .to_string(),
        export_policy: get_v(
            options,
            attributes::EXPORT_POLICY,
            pool.attribute(attributes::EXPORT_POLICY),
        )
        .to_string(),
        security_style: get_v(
            options,
            attributes::SECURITY_STYLE,
            pool.attribute(attributes::SECURITY_STYLE),
        )
        .to_string(),
        encryption,
        tiering_policy,
        fstype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolDefaults;
    use assert_matches::assert_matches;

    fn pool() -> StoragePool {
        StoragePool {
            name: "aggr1".into(),
            attributes: PoolDefaults::default().to_attributes(),
            aggregate: Some("aggr1".into()),
        }
    }

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_v_alternatives() {
        let opts = options(&[("fileSystemType", "xfs")]);
        assert_eq!(get_v(&opts, "fstype|fileSystemType", "ext4"), "xfs");
        assert_eq!(get_v(&opts, "fstype", "ext4"), "ext4");

        let opts = options(&[("fstype", "ext3"), ("fileSystemType", "xfs")]);
        assert_eq!(get_v(&opts, "fstype|fileSystemType", "ext4"), "ext3");
    }

    #[test]
    fn test_pool_defaults_apply() {
        let resolved = resolve_volume_options("vol", &BTreeMap::new(), &pool(), "none").unwrap();
        assert!(resolved.space_allocation);
        assert_eq!(resolved.space_reserve, "none");
        assert_eq!(resolved.snapshot_reserve, Some(0));
        assert_eq!(resolved.fstype, "ext4");
        assert_eq!(resolved.tiering_policy, "none");
        assert!(!resolved.encryption);
    }

    #[test]
    fn test_request_overrides_pool() {
        let opts = options(&[
            ("snapshotPolicy", "default"),
            ("fstype", "XFS"),
            ("encryption", "true"),
            ("tieringPolicy", "auto"),
        ]);
        let resolved = resolve_volume_options("vol", &opts, &pool(), "none").unwrap();
        assert_eq!(resolved.snapshot_reserve, None);
        assert_eq!(resolved.fstype, "xfs");
        assert!(resolved.encryption);
        assert_eq!(resolved.tiering_policy, "auto");
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = options(&[("fstype", "ntfs")]);
        assert_matches!(
            resolve_volume_options("vol", &opts, &pool(), "none"),
            Err(Error::UnsupportedFilesystem { .. })
        );

        let opts = options(&[("encryption", "maybe")]);
        assert_matches!(
            resolve_volume_options("vol", &opts, &pool(), "none"),
            Err(Error::InvalidOption { ref name, .. }) if name == "encryption"
        );

        let opts = options(&[("snapshotReserve", "150")]);
        assert_matches!(
            resolve_volume_options("vol", &opts, &pool(), "none"),
            Err(Error::InvalidReserve(_))
        );
    }

    #[test]
    fn test_invalid_space_allocation_disables() {
        let opts = options(&[("spaceAllocation", "sometimes")]);
        let resolved = resolve_volume_options("vol", &opts, &pool(), "none").unwrap();
        assert!(!resolved.space_allocation);
    }

    #[test]
    fn test_internal_volume_name() {
        assert_eq!(internal_volume_name("trident_", "pvc-1.a"), "trident_pvc_1_a");
    }
}
