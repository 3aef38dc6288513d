//! Line-oriented data-stream format spoken between the relay and the client.
//!
//! Every line is `<code>:<json>` terminated by `\n`:
//!
//! * `0:"fragment"` text fragment
//! * `3:"message"` in-band error
//! * `d:{"finishReason":"stop"}` end of stream
//!
//! Unknown codes are skipped so newer relays stay readable by older clients.

use serde::{ Deserialize, Serialize };
use serde_json::Value;

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamPart {
    Text(String),
    Error(String),
    Finish(FinishInfo),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishInfo {
    pub finish_reason: String,
}

pub fn encode_fragment(fragment: &str) -> String {
    format!("0:{}\n", Value::String(fragment.to_string()))
}

pub fn encode_finish(reason: &str) -> String {
    let mut body = serde_json::Map::new();
    body.insert("finishReason".to_string(), Value::String(reason.to_string()));
    format!("d:{}\n", Value::Object(body))
}

pub fn decode_line(line: &str) -> Option<StreamPart> {
    let (code, payload) = line.trim_end_matches('\r').split_once(':')?;
    match code {
        "0" => serde_json::from_str::<String>(payload).ok().map(StreamPart::Text),
        "3" => serde_json::from_str::<String>(payload).ok().map(StreamPart::Error),
        "d" => serde_json::from_str::<FinishInfo>(payload).ok().map(StreamPart::Finish),
        _ => None,
    }
}

/// Splits a byte stream into complete lines. Bytes are held until a newline
/// arrives, so multi-byte characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left after the final chunk, if it is not blank.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim_end_matches('\r').to_string();
        self.pending.clear();
        if rest.trim().is_empty() { None } else { Some(rest) }
    }
}

#[derive(Debug, Default)]
pub struct DataStreamDecoder {
    lines: LineBuffer,
}

impl DataStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamPart> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| decode_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<StreamPart> {
        self.lines.finish().and_then(|line| decode_line(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fragments_as_json_strings() {
        assert_eq!(encode_fragment("say \"hi\"\n"), "0:\"say \\\"hi\\\"\\n\"\n");
        assert_eq!(encode_finish("stop"), "d:{\"finishReason\":\"stop\"}\n");
    }

    #[test]
    fn decodes_known_codes_and_skips_unknown() {
        assert_eq!(decode_line("0:\"Hel\""), Some(StreamPart::Text("Hel".into())));
        assert_eq!(decode_line("3:\"bad\""), Some(StreamPart::Error("bad".into())));
        assert_eq!(
            decode_line("d:{\"finishReason\":\"stop\"}"),
            Some(StreamPart::Finish(FinishInfo { finish_reason: "stop".into() }))
        );
        assert_eq!(decode_line("8:[{}]"), None);
        assert_eq!(decode_line("garbage"), None);
    }

    #[test]
    fn decoder_handles_lines_split_across_chunks() {
        let encoded = format!("{}{}{}", encode_fragment("héllo "), encode_fragment("wörld"), encode_finish("stop"));
        let bytes = encoded.as_bytes();
        let mut decoder = DataStreamDecoder::new();
        let mut parts = Vec::new();
        for chunk in bytes.chunks(3) {
            parts.extend(decoder.push(chunk));
        }
        assert!(decoder.finish().is_none());
        assert_eq!(
            parts,
            vec![
                StreamPart::Text("héllo ".into()),
                StreamPart::Text("wörld".into()),
                StreamPart::Finish(FinishInfo { finish_reason: "stop".into() })
            ]
        );
    }

    #[test]
    fn line_buffer_returns_unterminated_tail_on_finish() {
        let mut lines = LineBuffer::new();
        assert_eq!(lines.push(b"a\r\nb"), vec!["a".to_string()]);
        assert_eq!(lines.finish(), Some("b".to_string()));
        assert_eq!(lines.finish(), None);
    }
}
