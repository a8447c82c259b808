use std::io::{self, BufRead, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct DapMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub content: DapMessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DapMessageContent {
    // Responses carry a `command` too, so they must be tried first.
    Response {
        request_seq: u64,
        success: bool,
        command: String,
        message: Option<String>,
        body: Option<Value>,
    },
    Event {
        event: String,
        body: Option<Value>,
    },
    Request {
        command: String,
        arguments: Option<Value>,
    },
}

/// Read one `Content-Length` framed message. `Ok(None)` means the stream
/// ended cleanly between messages.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<DapMessage>> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(value) = header.strip_prefix("Content-Length:") {
            let length = value.trim().parse::<usize>().map_err(|err| {
                io::Error::new(io::ErrorKind::InvalidData, format!("bad Content-Length: {}", err))
            })?;
            content_length = Some(length);
        }
    }

    let mut buffer = vec![0u8; content_length.unwrap_or(0)];
    reader.read_exact(&mut buffer)?;
    let msg = serde_json::from_slice(&buffer)?;
    Ok(Some(msg))
}

/// Frame and write one message, flushing immediately.
pub fn write_message<W: Write>(writer: &mut W, msg: &DapMessage) -> io::Result<()> {
    let json = serde_json::to_string(msg)?;
    write!(writer, "Content-Length: {}\r\n\r\n{}", json.len(), json)?;
    writer.flush()
}
