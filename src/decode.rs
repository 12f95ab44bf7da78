use crate::{Headers, Payload};

/// Decodes a response body into the `finished` result.
///
/// Parse failures are not errors: the raw text is delivered instead.
pub(crate) fn decode_body(body: String, raw: bool) -> Payload {
    if raw {
        return Payload::Text(body);
    }
    match serde_json::from_str(&body) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Text(body),
    }
}

/// Parses a raw CRLF-separated response header block into a map.
///
/// Lines without a `": "` separator after a non-empty name are skipped. A
/// stray leading LF on a line is ignored.
pub fn parse_header_block(block: &str) -> Headers {
    let mut headers = Headers::new();
    for line in block.split("\r\n") {
        let line = line.strip_prefix('\n').unwrap_or(line);
        if let Some(index) = line.find(": ") {
            if index > 0 {
                headers.insert(line[..index].to_owned(), line[index + 2..].to_owned());
            }
        }
    }
    headers
}
