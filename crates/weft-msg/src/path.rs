//! Dot-separated property paths.
//!
//! A path like `"a.b.c"` addresses nested [`PropertyMap`] entries.
//! Setting a path creates intermediate objects as needed; an
//! intermediate that exists with a non-object value is replaced.

use crate::{MsgError, PropertyMap, PropertyValue};

/// Splits and validates a property path.
///
/// Empty paths and empty segments (leading, trailing, or doubled dots)
/// are invalid.
fn split(path: &str) -> Result<Vec<&str>, MsgError> {
    if path.is_empty() {
        return Err(MsgError::InvalidArgument("empty property path".into()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MsgError::InvalidArgument(format!(
            "malformed property path: '{path}'"
        )));
    }
    Ok(segments)
}

/// Reads the value at `path`, if present.
///
/// # Errors
///
/// `MSG_INVALID_ARGUMENT` for a malformed path.
pub fn get<'a>(
    map: &'a PropertyMap,
    path: &str,
) -> Result<Option<&'a PropertyValue>, MsgError> {
    let segments = split(path)?;
    let (last, parents) = segments.split_last().expect("split guarantees non-empty");

    let mut current = map;
    for segment in parents {
        match current.get(*segment) {
            Some(PropertyValue::Object(inner)) => current = inner,
            _ => return Ok(None),
        }
    }
    Ok(current.get(*last))
}

/// Writes `value` at `path`, creating intermediate objects.
///
/// # Errors
///
/// `MSG_INVALID_ARGUMENT` for a malformed path.
pub fn set(map: &mut PropertyMap, path: &str, value: PropertyValue) -> Result<(), MsgError> {
    let segments = split(path)?;
    let (last, parents) = segments.split_last().expect("split guarantees non-empty");

    let mut current = map;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| PropertyValue::Object(PropertyMap::new()));
        if !matches!(entry, PropertyValue::Object(_)) {
            *entry = PropertyValue::Object(PropertyMap::new());
        }
        let PropertyValue::Object(inner) = entry else {
            unreachable!("entry was just made an object");
        };
        current = inner;
    }
    current.insert((*last).to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_creates_intermediates() {
        let mut map = PropertyMap::new();
        set(&mut map, "a.b.c", PropertyValue::I32(1)).expect("set");

        assert_eq!(
            get(&map, "a.b.c").expect("get"),
            Some(&PropertyValue::I32(1))
        );
        assert!(matches!(map.get("a"), Some(PropertyValue::Object(_))));
    }

    #[test]
    fn set_replaces_non_object_intermediate() {
        let mut map = PropertyMap::new();
        set(&mut map, "a", PropertyValue::I32(1)).expect("set");
        set(&mut map, "a.b", PropertyValue::I32(2)).expect("set");

        assert_eq!(get(&map, "a.b").expect("get"), Some(&PropertyValue::I32(2)));
    }

    #[test]
    fn get_missing_is_none() {
        let map = PropertyMap::new();
        assert_eq!(get(&map, "nope").expect("get"), None);
        assert_eq!(get(&map, "a.b").expect("get"), None);
    }

    #[test]
    fn malformed_paths_rejected() {
        let mut map = PropertyMap::new();
        for bad in ["", ".", "a.", ".a", "a..b"] {
            assert!(set(&mut map, bad, PropertyValue::Null).is_err(), "{bad:?}");
            assert!(get(&map, bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn get_through_scalar_is_none() {
        let mut map = PropertyMap::new();
        set(&mut map, "a", PropertyValue::I32(1)).expect("set");
        assert_eq!(get(&map, "a.b").expect("get"), None);
    }
}
