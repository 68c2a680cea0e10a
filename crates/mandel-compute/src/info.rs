//! Variable-length string queries against opaque device handles.
//!
//! Device-layer info calls follow a two-phase protocol: a call with no
//! destination reports the required size, a second call fills a buffer of
//! that size. [`read_info_string`] hides the sequence behind one call.

use crate::status::ClResult;

/// Run the size query, allocate `len + 1` bytes and fetch into them.
///
/// The returned buffer is always NUL-terminated at index `len`, whatever the
/// backend wrote.
pub fn fetch_info_bytes<F>(mut query: F) -> ClResult<Vec<u8>>
where
    F: FnMut(Option<&mut [u8]>) -> ClResult<usize>,
{
    let len = query(None)?;
    let mut buf = vec![0u8; len + 1];
    query(Some(&mut buf[..len]))?;
    buf[len] = 0;
    Ok(buf)
}

/// Fetch an info string and return it up to its first NUL.
pub fn read_info_string<F>(query: F) -> ClResult<String>
where
    F: FnMut(Option<&mut [u8]>) -> ClResult<usize>,
{
    let buf = fetch_info_bytes(query)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).trim_end().to_string())
}

/// Answer one phase of an info query from an in-memory string.
///
/// The reported size counts a trailing NUL, matching the device layer's
/// convention for `char[]` parameters.
pub fn answer_info_query(value: &str, dest: Option<&mut [u8]>) -> ClResult<usize> {
    let size = value.len() + 1;
    if let Some(dest) = dest {
        let n = dest.len().min(value.len());
        dest[..n].copy_from_slice(&value.as_bytes()[..n]);
        if dest.len() > n {
            dest[n] = 0;
        }
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ClStatus;

    #[test]
    fn buffer_is_terminated_at_reported_length() {
        let value = "Intel(R) Corporation";
        let reported = answer_info_query(value, None).unwrap();
        let bytes = fetch_info_bytes(|dest| answer_info_query(value, dest)).unwrap();
        assert_eq!(bytes.len(), reported + 1);
        assert_eq!(bytes[reported], 0);
        assert_eq!(&bytes[..value.len()], value.as_bytes());
    }

    #[test]
    fn string_stops_at_first_nul() {
        let s = read_info_string(|dest| answer_info_query("gfx1030", dest)).unwrap();
        assert_eq!(s, "gfx1030");
    }

    #[test]
    fn empty_value_yields_empty_string() {
        let s = read_info_string(|dest| answer_info_query("", dest)).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn size_query_failure_propagates() {
        let mut calls = 0;
        let err = read_info_string(|_| {
            calls += 1;
            Err(ClStatus::INVALID_DEVICE)
        })
        .unwrap_err();
        assert_eq!(err, ClStatus::INVALID_DEVICE);
        assert_eq!(calls, 1);
    }
}
