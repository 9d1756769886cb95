//! Conversion between kernel path bytes and `Path`.
//!
//! Kernel paths are NUL-terminated byte strings with no guaranteed
//! encoding. [`PathEncoding::Raw`] maps them to `OsStr` byte-for-byte on
//! Unix, so every path round-trips. [`PathEncoding::Utf8`] refuses bytes
//! that are not valid UTF-8; the refusal reaches the kernel as `EINVAL`.

use std::borrow::Cow;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::path::Path;

use crate::error::{FuseError, FuseResult};

/// How path and name bytes are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathEncoding {
    /// Pass bytes through unchanged. Lossless on Unix; behaves as `Utf8`
    /// elsewhere.
    #[default]
    Raw,
    /// Require valid UTF-8.
    Utf8,
}

/// Decodes kernel bytes (without the trailing NUL) as an `OsStr`.
pub fn decode_os(bytes: &[u8], encoding: PathEncoding) -> FuseResult<&OsStr> {
    #[cfg(unix)]
    if encoding == PathEncoding::Raw {
        use std::os::unix::ffi::OsStrExt;
        return Ok(OsStr::from_bytes(bytes));
    }

    let _ = encoding;
    std::str::from_utf8(bytes)
        .map(OsStr::new)
        .map_err(|e| FuseError::InvalidPath(format!("{}: {e}", String::from_utf8_lossy(bytes))))
}

/// Decodes kernel bytes (without the trailing NUL) as a `Path`.
pub fn decode(bytes: &[u8], encoding: PathEncoding) -> FuseResult<&Path> {
    decode_os(bytes, encoding).map(Path::new)
}

/// Decodes a NUL-terminated C string.
pub fn decode_cstr(path: &CStr, encoding: PathEncoding) -> FuseResult<&Path> {
    decode(path.to_bytes(), encoding)
}

/// Returns the kernel bytes for `value`.
pub fn encode_bytes(value: &OsStr, encoding: PathEncoding) -> FuseResult<Cow<'_, [u8]>> {
    #[cfg(unix)]
    if encoding == PathEncoding::Raw {
        use std::os::unix::ffi::OsStrExt;
        return Ok(Cow::Borrowed(value.as_bytes()));
    }

    let _ = encoding;
    value
        .to_str()
        .map(|s| Cow::Borrowed(s.as_bytes()))
        .ok_or_else(|| FuseError::InvalidPath(value.to_string_lossy().into_owned()))
}

/// Encodes `value` as a NUL-terminated string for the native library.
///
/// Interior NUL bytes cannot be represented and are rejected.
pub fn encode(value: &OsStr, encoding: PathEncoding) -> FuseResult<CString> {
    let bytes = encode_bytes(value, encoding)?;
    CString::new(bytes.into_owned())
        .map_err(|_| FuseError::InvalidPath(format!("{} contains NUL", value.to_string_lossy())))
}

/// Lossy display form for logs and failure reports.
pub(crate) fn lossy(bytes: &[u8]) -> OsString {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        OsString::from_vec(bytes.to_vec())
    }
    #[cfg(not(unix))]
    {
        OsString::from(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_utf8_round_trip() {
        let path = Path::new("/dir/файл.txt");
        let encoded = encode(path.as_os_str(), PathEncoding::Utf8).unwrap();
        let decoded = decode_cstr(&encoded, PathEncoding::Utf8).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_utf8_rejects_invalid_bytes() {
        let err = decode(b"/bad\xff", PathEncoding::Utf8).unwrap_err();
        assert!(matches!(err, FuseError::InvalidPath(_)));
    }

    #[test]
    fn test_encode_rejects_interior_nul() {
        let err = encode(OsStr::new("a\0b"), PathEncoding::Raw).unwrap_err();
        assert!(matches!(err, FuseError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_accepts_invalid_utf8() {
        use std::os::unix::ffi::OsStrExt;

        let decoded = decode(b"/bad\xff\xfe", PathEncoding::Raw).unwrap();
        assert_eq!(decoded.as_os_str().as_bytes(), b"/bad\xff\xfe");
    }

    #[cfg(unix)]
    proptest! {
        #[test]
        fn prop_raw_round_trip(bytes in proptest::collection::vec(1u8..=255, 0..256)) {
            use std::os::unix::ffi::OsStrExt;

            let path = decode(&bytes, PathEncoding::Raw).unwrap();
            let encoded = encode(path.as_os_str(), PathEncoding::Raw).unwrap();
            prop_assert_eq!(encoded.as_bytes(), &bytes[..]);

            let again = decode_cstr(&encoded, PathEncoding::Raw).unwrap();
            prop_assert_eq!(again.as_os_str().as_bytes(), &bytes[..]);
        }

        #[test]
        fn prop_utf8_round_trip(s in "[^\u{0}]{0,64}") {
            let encoded = encode(OsStr::new(&s), PathEncoding::Utf8).unwrap();
            let decoded = decode_cstr(&encoded, PathEncoding::Utf8).unwrap();
            prop_assert_eq!(decoded.as_os_str(), OsStr::new(&s));
        }
    }
}
