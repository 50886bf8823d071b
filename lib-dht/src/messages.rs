//! Wire message schema, encoded as CBOR maps with short keys: `y` (kind),
//! `t` (transaction id), `v` (version), `m` (method), `a`/`r`/`e` (method
//! arguments, reply fields, error fields).

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::node_info::{NodeInfo, Version};
use crate::peer_info::PeerInfo;
use crate::token::Token;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Ping,
    FindNode,
    FindValue,
    StoreValue,
    FindPeer,
    AnnouncePeer,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "y", rename_all = "snake_case")]
pub enum Message {
    #[serde(rename = "q")]
    Request {
        t: u32,
        v: Version,
        m: Method,
        a: RequestBody,
    },
    #[serde(rename = "r")]
    Response {
        t: u32,
        v: Version,
        r: ResponseBody,
    },
    #[serde(rename = "e")]
    Error { t: u32, v: Version, e: ErrorBody },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RequestBody {
    pub target: Option<Id>,
    pub value_id: Option<Id>,
    pub want_peers: bool,
    /// `find_value`'s compare-and-swap read guard: only sequences strictly
    /// greater are worth returning. `None` means "any sequence".
    pub expected_sequence: Option<i64>,
    /// Cap on how many peer records a `find_peer` responder should return.
    pub max_peers: Option<usize>,
    pub want_token: bool,
    pub value: Option<Value>,
    pub token: Option<Token>,
    pub peer: Option<PeerInfo>,
    /// `store_value`'s compare-and-swap write guard.
    pub cas: Option<i64>,
    pub sender_id: Id,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    pub responder_id: Id,
    pub nodes4: Vec<NodeInfo>,
    pub nodes6: Vec<NodeInfo>,
    pub value: Option<Value>,
    pub peers: Vec<PeerInfo>,
    pub token: Option<Token>,
}

impl Message {
    pub fn transaction_id(&self) -> u32 {
        match self {
            Message::Request { t, .. } => *t,
            Message::Response { t, .. } => *t,
            Message::Error { t, .. } => *t,
        }
    }

    pub fn ping(t: u32, sender_id: Id) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::Ping,
            a: RequestBody { sender_id, ..Default::default() },
        }
    }

    pub fn find_node(t: u32, sender_id: Id, target: Id, want_token: bool) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::FindNode,
            a: RequestBody { sender_id, target: Some(target), want_token, ..Default::default() },
        }
    }

    pub fn find_value(t: u32, sender_id: Id, value_id: Id, expected_sequence: Option<i64>) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::FindValue,
            a: RequestBody { sender_id, value_id: Some(value_id), expected_sequence, ..Default::default() },
        }
    }

    pub fn store_value(t: u32, sender_id: Id, value: Value, token: Token, cas: Option<i64>) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::StoreValue,
            a: RequestBody { sender_id, value: Some(value), token: Some(token), cas, ..Default::default() },
        }
    }

    pub fn find_peer(t: u32, sender_id: Id, target: Id, max_peers: usize, want_token: bool) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::FindPeer,
            a: RequestBody {
                sender_id,
                target: Some(target),
                want_peers: true,
                max_peers: Some(max_peers),
                want_token,
                ..Default::default()
            },
        }
    }

    pub fn announce_peer(t: u32, sender_id: Id, peer: PeerInfo, token: Token) -> Message {
        Message::Request {
            t,
            v: Version::CURRENT,
            m: Method::AnnouncePeer,
            a: RequestBody { sender_id, peer: Some(peer), token: Some(token), ..Default::default() },
        }
    }

    pub fn response(t: u32, body: ResponseBody) -> Message {
        Message::Response { t, v: Version::CURRENT, r: body }
    }

    pub fn error(t: u32, code: i32, message: impl Into<String>) -> Message {
        Message::Error { t, v: Version::CURRENT, e: ErrorBody { code, message: message.into() } }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Message> {
        Ok(ciborium::de::from_reader(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips_through_cbor() {
        let id = Id::random();
        let msg = Message::ping(42, id);
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.transaction_id(), 42);
        match decoded {
            Message::Request { m, a, .. } => {
                assert_eq!(m, Method::Ping);
                assert_eq!(a.sender_id, id);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn find_node_carries_target() {
        let target = Id::random();
        let msg = Message::find_node(1, Id::random(), target, true);
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        match decoded {
            Message::Request { a, .. } => assert_eq!(a.target, Some(target)),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn error_round_trips() {
        let msg = Message::error(7, 203, "protocol error");
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        match decoded {
            Message::Error { t, e, .. } => {
                assert_eq!(t, 7);
                assert_eq!(e.code, 203);
            }
            _ => panic!("expected error"),
        }
    }
}
