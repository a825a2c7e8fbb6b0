//! The line protocol: one frame per line, marked so ordinary output can
//! share the stream.
//!
//! A frame line is exactly `" -- " + JSON + "\n"`. Anything else on the
//! stream is incidental diagnostics - a print statement in a tenant, a
//! runtime warning - and is passed along, never treated as a protocol
//! violation.

use pathlink_api::{Error, WireFrame};

const PREFIX: &str = " -- ";

/// Serialize a frame as one protocol line, newline included.
pub fn encode_line(frame: &WireFrame) -> Result<String, Error> {
    Ok(format!("{}{}\n", PREFIX, serde_json::to_string(frame)?))
}

/// Classify one inbound line.
///
/// `None` means the line isn't a frame at all (diagnostics). `Some(Err)`
/// means it claimed to be a frame but its JSON didn't parse - that one is
/// a real failure.
pub fn decode_line(line: &str) -> Option<Result<WireFrame, Error>> {
    if !line.starts_with(PREFIX) || !line[PREFIX.len()..].starts_with('{') {
        return None;
    }
    Some(serde_json::from_str(&line[PREFIX.len()..]).map_err(Error::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathlink_api::WireRequest;

    #[test]
    fn frames_round_trip() {
        let frame: WireFrame = WireRequest {
            op: "get".to_string(),
            path: Some("/x".to_string()),
            ..Default::default()
        }
        .into();

        let line = encode_line(&frame).unwrap();
        assert!(line.starts_with(" -- {"));
        assert!(line.ends_with('\n'));

        let back = decode_line(line.trim_end()).unwrap().unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn diagnostics_are_not_frames() {
        assert!(decode_line("starting up...").is_none());
        assert!(decode_line("").is_none());
        assert!(decode_line(" -- not json").is_none());
        assert!(decode_line("-- {\"Ok\":true}").is_none());
    }

    #[test]
    fn marked_garbage_is_a_real_failure() {
        let result = decode_line(" -- {\"Op\": }").unwrap();
        assert!(result.is_err());
    }
}
