use crate::error::DecodeError;
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::io::Read;

const GZIP_SUFFIX: &str = ".gz";

pub fn is_compressed(topic: &str) -> bool {
    let n = GZIP_SUFFIX.len();
    topic.len() >= n
        && topic.is_char_boundary(topic.len() - n)
        && topic[topic.len() - n..].eq_ignore_ascii_case(GZIP_SUFFIX)
}

/// Returns the logical payload of a message, inflating it first when the
/// topic name ends in `.gz` (any case). Other payloads are returned as is.
pub fn decode<'a>(topic: &str, raw: &'a [u8]) -> Result<Cow<'a, [u8]>, DecodeError> {
    if !is_compressed(topic) {
        return Ok(Cow::Borrowed(raw));
    }

    let mut inflated = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut inflated)
        .map_err(|source| DecodeError {
            topic: topic.to_owned(),
            source,
        })?;
    Ok(Cow::Owned(inflated))
}

#[cfg(test)]
pub(crate) fn gzip(payload: &[u8]) -> Vec<u8> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(payload).unwrap();
    enc.finish().unwrap()
}
