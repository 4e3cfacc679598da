//! Path syntax.

use crate::error::StoreError;

/// Longest accepted path segment in bytes.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Split an absolute path into its segments.
///
/// `"/"` yields no segments (the root). A path must start with `/` and may
/// not contain empty segments, so `"//a"`, `"/a/"` and `"/a//b"` are all
/// malformed.
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(StoreError::MalformedPath);
    };
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    rest.split('/')
        .map(|segment| {
            if segment.is_empty() || segment.len() > MAX_SEGMENT_LEN {
                Err(StoreError::MalformedPath)
            } else {
                Ok(segment)
            }
        })
        .collect()
}
