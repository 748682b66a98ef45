//! Wire protocol spoken between the compiler cache and worker subprocesses.
//!
//! Messages travel as newline-delimited JSON envelopes
//! `{"type": <tag>, "data": {...}}` over the worker's stdio. Framing is
//! explicit: one message per line, UTF-8 throughout. A fresh worker must
//! answer `VersionQuery` with `VersionData` before any build request is
//! dispatched to it.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const VERSION_QUERY: u8 = 0;
pub const VERSION_DATA: u8 = 1;
pub const BUILD_REQUEST: u8 = 2;
pub const BUILD_RESULT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionData {
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub source_path: String,
    /// Extension-less; the worker appends the resource type to each output.
    pub target_path: String,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub source_path: String,
    pub target_path: String,
    pub platform: String,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    VersionQuery,
    VersionData(VersionData),
    BuildRequest(BuildRequest),
    BuildResult(BuildResult),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: u8,
    #[serde(default)]
    data: Value,
}

fn protocol(err: serde_json::Error) -> PipelineError {
    PipelineError::Protocol(err.to_string())
}

impl Message {
    /// Serialize to a single newline-terminated JSON envelope.
    pub fn encode(&self) -> Result<String> {
        let envelope = match self {
            Message::VersionQuery => Envelope {
                tag: VERSION_QUERY,
                data: Value::Object(Default::default()),
            },
            Message::VersionData(data) => Envelope {
                tag: VERSION_DATA,
                data: serde_json::to_value(data).map_err(protocol)?,
            },
            Message::BuildRequest(data) => Envelope {
                tag: BUILD_REQUEST,
                data: serde_json::to_value(data).map_err(protocol)?,
            },
            Message::BuildResult(data) => Envelope {
                tag: BUILD_RESULT,
                data: serde_json::to_value(data).map_err(protocol)?,
            },
        };
        let mut line = serde_json::to_string(&envelope).map_err(protocol)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one envelope line.
    pub fn decode(line: &str) -> Result<Message> {
        let envelope: Envelope = serde_json::from_str(line.trim()).map_err(protocol)?;
        match envelope.tag {
            VERSION_QUERY => Ok(Message::VersionQuery),
            VERSION_DATA => Ok(Message::VersionData(
                serde_json::from_value(envelope.data).map_err(protocol)?,
            )),
            BUILD_REQUEST => Ok(Message::BuildRequest(
                serde_json::from_value(envelope.data).map_err(protocol)?,
            )),
            BUILD_RESULT => Ok(Message::BuildResult(
                serde_json::from_value(envelope.data).map_err(protocol)?,
            )),
            other => Err(PipelineError::Protocol(format!(
                "unknown message tag {}",
                other
            ))),
        }
    }
}

/// Write one message to the channel and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.encode()?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| PipelineError::Protocol(format!("write failed: {}", err)))?;
    writer
        .flush()
        .await
        .map_err(|err| PipelineError::Protocol(format!("flush failed: {}", err)))?;
    Ok(())
}

/// Read the next message; `None` on a cleanly closed channel.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|err| PipelineError::Protocol(format!("read failed: {}", err)))?;
    if read == 0 {
        return Ok(None);
    }
    Message::decode(&line).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_tag() {
        let messages = vec![
            Message::VersionQuery,
            Message::VersionData(VersionData { version: 7 }),
            Message::BuildRequest(BuildRequest {
                source_path: "/src/bar.txt".to_string(),
                target_path: "/out/18b0f2".to_string(),
                platform: "generic".to_string(),
            }),
            Message::BuildResult(BuildResult {
                source_path: "/src/bar.txt".to_string(),
                target_path: "/out/18b0f2".to_string(),
                platform: "generic".to_string(),
                success: true,
                errors: vec![],
                outputs: vec!["/out/18b0f2.txt".to_string()],
                references: vec!["/src/baz.dep".to_string()],
            }),
        ];
        for message in messages {
            let line = message.encode().unwrap();
            assert!(line.ends_with('\n'));
            assert_eq!(Message::decode(&line).unwrap(), message);
        }
    }

    #[test]
    fn envelope_carries_numeric_tag() {
        let line = Message::VersionData(VersionData { version: 1 })
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["data"]["version"], 1);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Message::decode(r#"{"type": 9, "data": {}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Protocol(_)));
    }

    #[test]
    fn result_lists_default_to_empty() {
        let line = r#"{"type":3,"data":{"sourcePath":"a","targetPath":"b","platform":"generic","success":false}}"#;
        match Message::decode(line).unwrap() {
            Message::BuildResult(result) => {
                assert!(!result.success);
                assert!(result.errors.is_empty());
                assert!(result.outputs.is_empty());
                assert!(result.references.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn framed_transport_round_trips() {
        let (mut near, far) = tokio::io::duplex(1024);
        let request = Message::BuildRequest(BuildRequest {
            source_path: "/src/bar.txt".to_string(),
            target_path: "/out/18b0f2".to_string(),
            platform: "generic".to_string(),
        });
        write_message(&mut near, &request).await.unwrap();
        drop(near);

        let mut reader = tokio::io::BufReader::new(far);
        let read = read_message(&mut reader).await.unwrap();
        assert_eq!(read, Some(request));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }
}
