//! Wire messages on both sides of the relay.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

/// Request framed to the browser extension: `{"action": "<name>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtensionRequest<'a> {
    pub action: &'a str,
}

/// Request read from the local pipe.
///
/// Only `action` matters to the relay. A missing action decodes as an empty
/// string; any other fields are kept in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeRequest {
    #[serde(default)]
    pub action: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipeRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extra: Map::new(),
        }
    }
}

/// Response written back to the local pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeResponse {
    pub action: String,
    /// Raw extension message, or empty when the extension did not answer in time.
    pub data: String,
}

impl PipeResponse {
    pub fn new(action: impl Into<String>, data: Option<String>) -> Self {
        Self {
            action: action.into(),
            data: data.unwrap_or_default(),
        }
    }
}

/// Turns a stream of pipe reads into [`PipeRequest`]s.
///
/// The pipe carries bare JSON documents with no length prefix, so one read
/// may hold several documents or only part of one. Incomplete trailing
/// bytes stay buffered until the next chunk.
#[derive(Debug)]
pub struct RequestDecoder {
    pending: BytesMut,
    max_pending: usize,
}

impl RequestDecoder {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_pending,
        }
    }

    /// Append a chunk read from the transport.
    ///
    /// Fails with [`BridgeError::RequestTooLarge`] and drops the buffer when
    /// the unfinished document outgrows `max_pending`.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let size = self.pending.len() + chunk.len();
        if size > self.max_pending {
            self.pending.clear();
            return Err(BridgeError::RequestTooLarge {
                size,
                max: self.max_pending,
            });
        }
        self.pending.extend_from_slice(chunk);
        Ok(())
    }

    /// Decode the next complete request, if the buffer holds one.
    ///
    /// A malformed document discards everything buffered and returns the
    /// parse error; decoding resumes with the next chunk.
    pub fn next_request(&mut self) -> Result<Option<PipeRequest>> {
        let (next, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.pending).into_iter::<PipeRequest>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(request)) => {
                self.pending.advance(consumed);
                Ok(Some(request))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => {
                self.pending.clear();
                Err(err.into())
            }
            None => {
                // Only whitespace left.
                self.pending.clear();
                Ok(None)
            }
        }
    }

    /// Forget any partial document, e.g. after the client disconnected.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Bytes waiting for the rest of a document.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut RequestDecoder) -> Vec<String> {
        let mut actions = Vec::new();
        while let Some(request) = decoder.next_request().unwrap() {
            actions.push(request.action);
        }
        actions
    }

    #[test]
    fn extension_request_shape() {
        let json = serde_json::to_string(&ExtensionRequest { action: "urlInfo" }).unwrap();
        assert_eq!(json, r#"{"action":"urlInfo"}"#);
    }

    #[test]
    fn pipe_response_shape() {
        let answered = PipeResponse::new("tabInfo", Some("ok".to_string()));
        assert_eq!(
            serde_json::to_string(&answered).unwrap(),
            r#"{"action":"tabInfo","data":"ok"}"#
        );

        let silent = PipeResponse::new("tabInfo", None);
        assert_eq!(
            serde_json::to_string(&silent).unwrap(),
            r#"{"action":"tabInfo","data":""}"#
        );
    }

    #[test]
    fn pipe_request_keeps_extra_fields() {
        let request: PipeRequest =
            serde_json::from_str(r#"{"action":"tabInfo","tab":3,"verbose":true}"#).unwrap();
        assert_eq!(request.action, "tabInfo");
        assert_eq!(request.extra.get("tab"), Some(&Value::from(3)));
        assert_eq!(request.extra.len(), 2);
    }

    #[test]
    fn pipe_request_without_action_is_empty() {
        let request: PipeRequest = serde_json::from_str(r#"{"tab":3}"#).unwrap();
        assert!(request.action.is_empty());
    }

    #[test]
    fn decodes_coalesced_documents() {
        let mut decoder = RequestDecoder::new(1024);
        decoder
            .push_chunk(br#"{"action":"a"}{"action":"b"} {"action":"c"}"#)
            .unwrap();
        assert_eq!(drain(&mut decoder), ["a", "b", "c"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn completes_document_split_across_chunks() {
        let mut decoder = RequestDecoder::new(1024);
        decoder.push_chunk(br#"{"action":"url"#).unwrap();
        assert!(decoder.next_request().unwrap().is_none());
        assert!(decoder.pending() > 0);

        decoder.push_chunk(br#"Info"}"#).unwrap();
        assert_eq!(drain(&mut decoder), ["urlInfo"]);
    }

    #[test]
    fn malformed_document_is_dropped() {
        let mut decoder = RequestDecoder::new(1024);
        decoder.push_chunk(b"not json").unwrap();
        assert!(matches!(decoder.next_request(), Err(BridgeError::Json(_))));
        assert_eq!(decoder.pending(), 0);

        decoder.push_chunk(br#"{"action":"next"}"#).unwrap();
        assert_eq!(drain(&mut decoder), ["next"]);
    }

    #[test]
    fn non_string_action_is_rejected() {
        let mut decoder = RequestDecoder::new(1024);
        decoder.push_chunk(br#"{"action":5}"#).unwrap();
        assert!(decoder.next_request().is_err());
    }

    #[test]
    fn oversized_pending_document_is_discarded() {
        let mut decoder = RequestDecoder::new(16);
        decoder.push_chunk(br#"{"action":"#).unwrap();
        let err = decoder.push_chunk(br#""far too long for the limit"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::RequestTooLarge { max: 16, .. }));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn reset_forgets_partial_document() {
        let mut decoder = RequestDecoder::new(1024);
        decoder.push_chunk(br#"{"action":"half"#).unwrap();
        decoder.reset();
        decoder.push_chunk(br#"{"action":"whole"}"#).unwrap();
        assert_eq!(drain(&mut decoder), ["whole"]);
    }
}
