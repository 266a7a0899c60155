//! Binary serializer for the three persisted cache entry kinds.
//!
//! The format is a fixed version prefix followed by a one-byte kind tag and a
//! kind-specific payload. All multi-byte integers are big-endian. Strings are
//! length-prefixed UTF-8 (`int32` byte length followed by the bytes).

use {
    bytes::{Buf, BufMut, Bytes, BytesMut},
    std::{
        fmt,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// 100-nanosecond ticks per second, the unit `CreatedUtcTicks` is expressed in.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a [`SystemTime`] to the `CreatedUtcTicks` representation (100-ns
/// ticks since the Unix epoch, UTC).
pub fn ticks_from_system_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => {
            since_epoch.as_secs() as i64 * TICKS_PER_SECOND
                + since_epoch.subsec_nanos() as i64 / 100
        }
        Err(_) => 0,
    }
}

/// The inverse of [`ticks_from_system_time`].
pub fn system_time_from_ticks(ticks: i64) -> SystemTime {
    let ticks = ticks.max(0);
    UNIX_EPOCH + Duration::from_nanos((ticks as u64) * 100)
}

/// On-disk format version. Bumped only if the payload shapes below change.
pub const FORMAT_VERSION: i32 = 1;

const KIND_BODY: u8 = b'B';
const KIND_RESPONSE: u8 = b'R';
const KIND_VARY_RULES: u8 = b'V';

/// Failure serializing an entry.
///
/// Both variants are programmer errors: they cannot be reached from the live
/// middleware paths, which only ever serialize well-formed [`Entry`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// `serialize(None)` was called.
    InvalidArgument,
    /// The value being serialized did not match one of the three known kinds.
    ///
    /// Unreachable while [`Entry`] is the only type passed to [`serialize`],
    /// kept so the error taxonomy mirrors the one in the specification.
    UnsupportedKind,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::UnsupportedKind => write!(f, "unsupported kind"),
        }
    }
}

impl std::error::Error for CodecError {}

/// The body of a response that was split out from its [`CachedResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponseBody {
    /// The stored bytes.
    pub body: Bytes,
}

/// A persisted response, without its body when the body was split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Opaque id under which a split-out body is stored, mixed into its store key.
    pub body_key_prefix: String,
    /// 100-nanosecond ticks since the Unix epoch, UTC. Mirrors the response `Date`.
    pub created_utc_ticks: i64,
    pub status_code: u16,
    /// Header name/value pairs, in the order they appeared on the response.
    /// Never contains an `Age` entry.
    pub headers: Vec<(String, String)>,
    /// The body, present iff it was colocated rather than split out.
    pub body: Option<Bytes>,
}

/// The vary-rules indirection entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVaryRules {
    /// Opaque id mixed into the derived vary key.
    pub vary_key_prefix: String,
    /// Normalized (upper-cased) vary-by header names.
    pub headers: Vec<String>,
    /// Normalized (upper-cased) vary-by query parameter names.
    pub params: Vec<String>,
}

/// One of the three persisted entry kinds, tagged the same way the codec tags
/// it on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Body(CachedResponseBody),
    Response(CachedResponse),
    VaryRules(CachedVaryRules),
}

fn put_string(buffer: &mut BytesMut, value: &str) {
    buffer.put_i32(value.len() as i32);
    buffer.put_slice(value.as_bytes());
}

fn get_string(buffer: &mut Bytes) -> Option<String> {
    if buffer.remaining() < 4 {
        return None;
    }
    let len = buffer.get_i32();
    if len < 0 || buffer.remaining() < len as usize {
        return None;
    }
    let bytes = buffer.split_to(len as usize);
    String::from_utf8(bytes.to_vec()).ok()
}

fn put_bytes(buffer: &mut BytesMut, value: &[u8]) {
    buffer.put_i32(value.len() as i32);
    buffer.put_slice(value);
}

fn get_bytes(buffer: &mut Bytes) -> Option<Bytes> {
    if buffer.remaining() < 4 {
        return None;
    }
    let len = buffer.get_i32();
    if len < 0 || buffer.remaining() < len as usize {
        return None;
    }
    Some(buffer.split_to(len as usize))
}

/// Serializes an entry. `None` fails with [`CodecError::InvalidArgument`],
/// matching the "`Serialize(nil)` fails" contract: there is no way to
/// serialize "nothing".
pub fn serialize(entry: Option<&Entry>) -> Result<Bytes, CodecError> {
    let entry = entry.ok_or(CodecError::InvalidArgument)?;

    let mut buffer = BytesMut::new();
    buffer.put_i32(FORMAT_VERSION);

    match entry {
        Entry::Body(body) => {
            buffer.put_u8(KIND_BODY);
            put_bytes(&mut buffer, &body.body);
        }

        Entry::Response(response) => {
            buffer.put_u8(KIND_RESPONSE);
            put_string(&mut buffer, &response.body_key_prefix);
            buffer.put_i64(response.created_utc_ticks);
            buffer.put_i32(response.status_code as i32);
            buffer.put_i32(response.headers.len() as i32);
            for (key, value) in &response.headers {
                put_string(&mut buffer, key);
                put_string(&mut buffer, value);
            }
            buffer.put_u8(response.body.is_some() as u8);
            if let Some(body) = &response.body {
                put_bytes(&mut buffer, body);
            }
        }

        Entry::VaryRules(rules) => {
            buffer.put_u8(KIND_VARY_RULES);
            put_string(&mut buffer, &rules.vary_key_prefix);
            buffer.put_i32(rules.headers.len() as i32);
            for header in &rules.headers {
                put_string(&mut buffer, header);
            }
            buffer.put_i32(rules.params.len() as i32);
            for param in &rules.params {
                put_string(&mut buffer, param);
            }
        }
    }

    Ok(buffer.freeze())
}

/// Deserializes an entry. `None` input yields `None`. Malformed input
/// (version mismatch, unknown kind, or a read short of the declared length)
/// also yields `None`, never an error: a poisoned or foreign-format entry is
/// simply treated as absent by callers.
pub fn deserialize(bytes: Option<&[u8]>) -> Option<Entry> {
    let mut buffer = Bytes::copy_from_slice(bytes?);

    if buffer.remaining() < 4 {
        return None;
    }
    if buffer.get_i32() != FORMAT_VERSION {
        return None;
    }
    if buffer.remaining() < 1 {
        return None;
    }
    let kind = buffer.get_u8();

    match kind {
        KIND_BODY => {
            let body = get_bytes(&mut buffer)?;
            Some(Entry::Body(CachedResponseBody { body }))
        }

        KIND_RESPONSE => {
            let body_key_prefix = get_string(&mut buffer)?;
            if buffer.remaining() < 8 {
                return None;
            }
            let created_utc_ticks = buffer.get_i64();
            if buffer.remaining() < 4 {
                return None;
            }
            let status_code = buffer.get_i32();
            if !(0..=u16::MAX as i32).contains(&status_code) {
                return None;
            }
            if buffer.remaining() < 4 {
                return None;
            }
            let header_count = buffer.get_i32();
            if header_count < 0 {
                return None;
            }
            let mut headers = Vec::with_capacity(header_count as usize);
            for _ in 0..header_count {
                let key = get_string(&mut buffer)?;
                let value = get_string(&mut buffer)?;
                headers.push((key, value));
            }
            if buffer.remaining() < 1 {
                return None;
            }
            let contains_body = buffer.get_u8() != 0;
            let body = if contains_body {
                Some(get_bytes(&mut buffer)?)
            } else {
                None
            };

            Some(Entry::Response(CachedResponse {
                body_key_prefix,
                created_utc_ticks,
                status_code: status_code as u16,
                headers,
                body,
            }))
        }

        KIND_VARY_RULES => {
            let vary_key_prefix = get_string(&mut buffer)?;
            if buffer.remaining() < 4 {
                return None;
            }
            let header_count = buffer.get_i32();
            if header_count < 0 {
                return None;
            }
            let mut headers = Vec::with_capacity(header_count as usize);
            for _ in 0..header_count {
                headers.push(get_string(&mut buffer)?);
            }
            if buffer.remaining() < 4 {
                return None;
            }
            let param_count = buffer.get_i32();
            if param_count < 0 {
                return None;
            }
            let mut params = Vec::with_capacity(param_count as usize);
            for _ in 0..param_count {
                params.push(get_string(&mut buffer)?);
            }

            Some(Entry::VaryRules(CachedVaryRules { vary_key_prefix, headers, params }))
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_body() {
        let entry = Entry::Body(CachedResponseBody { body: Bytes::from_static(b"hello") });
        let bytes = serialize(Some(&entry)).unwrap();
        assert_eq!(deserialize(Some(&bytes)), Some(entry));
    }

    #[test]
    fn round_trips_response_with_colocated_body() {
        let entry = Entry::Response(CachedResponse {
            body_key_prefix: "abc123".into(),
            created_utc_ticks: 638_000_000_000_000_000,
            status_code: 200,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: Some(Bytes::from_static(b"hi")),
        });
        let bytes = serialize(Some(&entry)).unwrap();
        assert_eq!(deserialize(Some(&bytes)), Some(entry));
    }

    #[test]
    fn round_trips_response_with_split_body() {
        let entry = Entry::Response(CachedResponse {
            body_key_prefix: "abc123".into(),
            created_utc_ticks: 0,
            status_code: 404,
            headers: vec![],
            body: None,
        });
        let bytes = serialize(Some(&entry)).unwrap();
        assert_eq!(deserialize(Some(&bytes)), Some(entry));
    }

    #[test]
    fn round_trips_vary_rules() {
        let entry = Entry::VaryRules(CachedVaryRules {
            vary_key_prefix: "v1".into(),
            headers: vec!["ACCEPT".into(), "ACCEPT-LANGUAGE".into()],
            params: vec!["PAGE".into()],
        });
        let bytes = serialize(Some(&entry)).unwrap();
        assert_eq!(deserialize(Some(&bytes)), Some(entry));
    }

    #[test]
    fn deserialize_none_is_none() {
        assert_eq!(deserialize(None), None);
    }

    #[test]
    fn serialize_none_is_invalid_argument() {
        assert_eq!(serialize(None), Err(CodecError::InvalidArgument));
    }

    #[test]
    fn version_mismatch_is_none() {
        let mut buffer = BytesMut::new();
        buffer.put_i32(2);
        buffer.put_u8(KIND_BODY);
        buffer.put_i32(0);
        assert_eq!(deserialize(Some(&buffer)), None);
    }

    #[test]
    fn unknown_kind_is_none() {
        let mut buffer = BytesMut::new();
        buffer.put_i32(FORMAT_VERSION);
        buffer.put_u8(b'Z');
        assert_eq!(deserialize(Some(&buffer)), None);
    }

    #[test]
    fn short_read_is_none() {
        let mut buffer = BytesMut::new();
        buffer.put_i32(FORMAT_VERSION);
        buffer.put_u8(KIND_BODY);
        buffer.put_i32(10);
        buffer.put_slice(b"short");
        assert_eq!(deserialize(Some(&buffer)), None);
    }
}
