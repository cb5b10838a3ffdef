//! yEnc decoding of article bodies
//!
//! Input is the ordered, dot-unstuffed line sequence of one article body as
//! produced by the NNTP reader (lines joined with `\n`). Output is the decoded
//! payload plus whatever the `=ybegin`/`=ypart` headers declared.

use crate::error::YencError;

type Result<T> = std::result::Result<T, YencError>;

/// Declared 1-based inclusive byte range from an `=ypart` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub begin: u64,
    pub end: u64,
}

/// One decoded article payload
#[derive(Debug, Clone)]
pub struct DecodedSegment {
    pub data: Vec<u8>,
    /// `name=` from the `=ybegin` line, if declared
    pub name: Option<String>,
    /// Byte range from the `=ypart` line, if this article is a multipart piece
    pub part: Option<PartRange>,
}

/// Decode one yEnc-encoded article body.
///
/// Lines before `=ybegin` are skipped (article headers, uuencode noise).
/// The decode fails if the body ends without reaching `=yend`.
pub fn decode(body: &[u8]) -> Result<DecodedSegment> {
    let mut data = Vec::with_capacity(body.len());
    let mut name = None;
    let mut part = None;

    let mut in_payload = false;
    let mut terminated = false;
    // An '=' at the very end of a line escapes the first byte of the next one
    let mut pending_escape = false;

    for line in body.split(|&b| b == b'\n') {
        if !in_payload {
            if line.starts_with(b"=ybegin") {
                name = header_param(line, "name").map(|v| v.trim_end().to_string());
                in_payload = true;
            }
            continue;
        }

        if line.starts_with(b"=ypart") && !pending_escape {
            part = Some(parse_part(line)?);
            continue;
        }

        if line.starts_with(b"=yend") && !pending_escape {
            terminated = true;
            break;
        }

        pending_escape = decode_line(line, pending_escape, &mut data);
    }

    if !in_payload {
        return Err(YencError::MissingBegin);
    }
    if !terminated {
        return Err(YencError::MissingEnd);
    }

    data.shrink_to_fit();
    Ok(DecodedSegment { data, name, part })
}

/// Decode a single payload line into `output`.
///
/// Returns true if the line ended mid-escape, in which case the first byte of
/// the following line completes the sequence.
fn decode_line(line: &[u8], pending_escape: bool, output: &mut Vec<u8>) -> bool {
    let mut iter = line.iter().copied();

    if pending_escape {
        match iter.next() {
            Some(b) => output.push(b.wrapping_sub(64).wrapping_sub(42)),
            None => return true,
        }
    }

    // Fast path: no escapes or carriage returns on this line
    if !line.contains(&b'=') && !line.contains(&b'\r') {
        output.extend(iter.map(|b| b.wrapping_sub(42)));
        return false;
    }

    while let Some(byte) = iter.next() {
        if byte == b'=' {
            match iter.next() {
                Some(next) => output.push(next.wrapping_sub(64).wrapping_sub(42)),
                None => return true,
            }
        } else if byte != b'\r' {
            output.push(byte.wrapping_sub(42));
        }
    }
    false
}

fn parse_part(line: &[u8]) -> Result<PartRange> {
    let begin = numeric_param(line, "=ypart", "begin")?;
    let end = numeric_param(line, "=ypart", "end")?;
    if begin == 0 || end < begin {
        return Err(YencError::MalformedHeader {
            keyword: "=ypart",
            reason: format!("bad range {}-{}", begin, end),
        });
    }
    Ok(PartRange { begin, end })
}

fn numeric_param(line: &[u8], keyword: &'static str, key: &str) -> Result<u64> {
    let value = header_param(line, key).ok_or_else(|| YencError::MalformedHeader {
        keyword,
        reason: format!("missing {}=", key),
    })?;
    let digits = value.split_whitespace().next().unwrap_or("");
    digits.parse().map_err(|_| YencError::MalformedHeader {
        keyword,
        reason: format!("{}={:?} is not a number", key, digits),
    })
}

/// Extract `key=value` from a yEnc header line.
///
/// `name=` is conventionally the last parameter and its value runs to the end
/// of the line (it may contain spaces); numeric callers split it themselves.
fn header_param<'a>(line: &'a [u8], key: &str) -> Option<&'a str> {
    let line = std::str::from_utf8(line).ok()?;
    let needle = format!(" {}=", key);
    let at = line.find(&needle)?;
    Some(&line[at + needle.len()..])
}

#[cfg(test)]
pub(crate) mod testing {
    //! Reference encoder so decoder tests are true round-trips and the mock
    //! NNTP server can serve realistic articles.

    /// Bytes that must be escaped wherever they appear in encoded output
    fn must_escape(encoded: u8) -> bool {
        matches!(encoded, 0x00 | 0x0a | 0x0d | b'=')
    }

    /// yEnc-encode a payload into full article-body lines, headers included.
    pub(crate) fn encode(data: &[u8], name: &str, part: Option<(u64, u64)>) -> Vec<u8> {
        const LINE_LEN: usize = 128;

        let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 256);
        match part {
            Some((begin, end)) => {
                out.extend_from_slice(
                    format!(
                        "=ybegin part=1 line={} size={} name={}\n",
                        LINE_LEN,
                        data.len(),
                        name
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(format!("=ypart begin={} end={}\n", begin, end).as_bytes());
            }
            None => {
                out.extend_from_slice(
                    format!("=ybegin line={} size={} name={}\n", LINE_LEN, data.len(), name)
                        .as_bytes(),
                );
            }
        }

        let mut col = 0;
        for &b in data {
            let enc = b.wrapping_add(42);
            if must_escape(enc) {
                out.push(b'=');
                out.push(enc.wrapping_add(64));
                col += 2;
            } else {
                out.push(enc);
                col += 1;
            }
            if col >= LINE_LEN {
                out.push(b'\n');
                col = 0;
            }
        }
        if col > 0 {
            out.push(b'\n');
        }

        out.extend_from_slice(format!("=yend size={}\n", data.len()).as_bytes());
        out
    }

    /// Deterministic payload covering every byte value, sized arbitrarily
    pub(crate) fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u64).wrapping_mul(31).wrapping_add(seed as u64) as u8)
            .collect()
    }
}
