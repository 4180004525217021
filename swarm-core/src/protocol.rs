//! Swarm wire protocol: tracker and peer request/response types.
//!
//! Requests are tagged by `command`, responses by `status`. Encoding is JSON text (see the
//! wire module); piece bytes travel as lowercase hex.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::identity::{FileHash, NodeId, PieceIndex};
use crate::metadata::{ActiveNodes, FilePlacement, PieceDistribution};

/// A request type with a closed set of `command` names.
pub trait Command: serde::de::DeserializeOwned {
    const COMMANDS: &'static [&'static str];
}

/// Node -> tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TrackerRequest {
    Register {
        ip_address: String,
        port: u16,
    },
    Upload {
        node_id: NodeId,
        file_name: String,
        file_hash: FileHash,
        total_pieces: u32,
        #[serde(with = "keyed")]
        piece_distribution: PieceDistribution,
    },
    Download {
        file_name: String,
        requester_id: NodeId,
    },
    GetNodes,
    Disconnect {
        node_id: NodeId,
    },
}

impl Command for TrackerRequest {
    const COMMANDS: &'static [&'static str] =
        &["register", "upload", "download", "get_nodes", "disconnect"];
}

/// Tracker -> node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackerResponse {
    Registered { node_id: NodeId },
    Uploaded,
    Success(TrackerPayload),
    Disconnected,
    Error { message: String },
}

/// Body of a tracker `success` reply: either a file's placement or the node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackerPayload {
    File(FilePlacement),
    Nodes {
        #[serde(with = "keyed")]
        nodes: ActiveNodes,
    },
}

/// Node -> node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PeerRequest {
    UploadPiece {
        node_id: NodeId,
        file_hash: FileHash,
        piece_index: PieceIndex,
        piece_data: PieceData,
    },
    DownloadPiece {
        file_hash: FileHash,
        piece_index: PieceIndex,
    },
}

impl Command for PeerRequest {
    const COMMANDS: &'static [&'static str] = &["upload_piece", "download_piece"];
}

/// Node -> node reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerResponse {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        piece_data: Option<PieceData>,
    },
    Error {
        message: String,
    },
}

impl PeerResponse {
    pub fn ok() -> Self {
        PeerResponse::Success { piece_data: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PeerResponse::Error {
            message: message.into(),
        }
    }
}

impl TrackerResponse {
    pub fn error(message: impl Into<String>) -> Self {
        TrackerResponse::Error {
            message: message.into(),
        }
    }
}

/// Raw piece bytes, hex encoded on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct PieceData(pub Vec<u8>);

impl PieceData {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for PieceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceData({} bytes)", self.0.len())
    }
}

impl Serialize for PieceData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PieceData {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s)
            .map(PieceData)
            .map_err(|e| serde::de::Error::custom(format!("piece_data is not hex: {e}")))
    }
}

/// Integer-keyed maps as JSON objects with decimal string keys. Parsing the keys ourselves
/// keeps them working inside tagged and flattened types, where serde buffers content.
pub mod keyed {
    use std::collections::BTreeMap;
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Display,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v)))
    }

    pub fn deserialize<'de, K, V, D>(d: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: FromStr + Ord,
        K::Err: Display,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, V> = BTreeMap::deserialize(d)?;
        let mut out = BTreeMap::new();
        for (key, value) in raw {
            let parsed = key
                .parse::<K>()
                .map_err(|e| D::Error::custom(format!("invalid map key '{key}': {e}")))?;
            out.insert(parsed, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identity::NodeAddress;

    fn hash() -> FileHash {
        FileHash::of_bytes(b"f.bin contents")
    }

    #[test]
    fn register_request_shape() {
        let req = TrackerRequest::Register {
            ip_address: "127.0.0.1".into(),
            port: 4000,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"command": "register", "ip_address": "127.0.0.1", "port": 4000})
        );
    }

    #[test]
    fn get_nodes_request_shape() {
        assert_eq!(
            serde_json::to_value(TrackerRequest::GetNodes).unwrap(),
            json!({"command": "get_nodes"})
        );
    }

    #[test]
    fn upload_request_parses_string_piece_keys() {
        let value = json!({
            "command": "upload",
            "node_id": 1,
            "file_name": "f.bin",
            "file_hash": hash().as_str(),
            "total_pieces": 3,
            "piece_distribution": {"0": [1, 2], "1": [2, 1], "2": [1, 2]},
        });
        let req: TrackerRequest = serde_json::from_value(value).unwrap();
        match req {
            TrackerRequest::Upload {
                piece_distribution,
                total_pieces,
                ..
            } => {
                assert_eq!(total_pieces, 3);
                assert_eq!(piece_distribution[&1], vec![2, 1]);
            }
            other => panic!("expected Upload, got {other:?}"),
        }
    }

    #[test]
    fn download_reply_shape() {
        let reply = TrackerResponse::Success(TrackerPayload::File(FilePlacement {
            file_hash: hash(),
            total_pieces: 1,
            piece_distribution: [(0, vec![1, 1])].into_iter().collect(),
        }));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["piece_distribution"]["0"], json!([1, 1]));
        let text = serde_json::to_string(&reply).unwrap();
        assert_eq!(serde_json::from_str::<TrackerResponse>(&text).unwrap(), reply);
    }

    #[test]
    fn nodes_reply_is_distinguished_from_file_reply() {
        let text = r#"{"status":"success","nodes":{"1":{"ip_address":"10.0.0.1","port":9000}}}"#;
        let reply: TrackerResponse = serde_json::from_str(text).unwrap();
        match reply {
            TrackerResponse::Success(TrackerPayload::Nodes { nodes }) => {
                assert_eq!(nodes[&1], NodeAddress::new("10.0.0.1", 9000));
            }
            other => panic!("expected node list, got {other:?}"),
        }
    }

    #[test]
    fn unit_replies() {
        let reply: TrackerResponse = serde_json::from_str(r#"{"status":"uploaded"}"#).unwrap();
        assert_eq!(reply, TrackerResponse::Uploaded);
        let reply: TrackerResponse =
            serde_json::from_str(r#"{"status":"error","message":"File not found"}"#).unwrap();
        assert_eq!(reply, TrackerResponse::error("File not found"));
    }

    #[test]
    fn piece_data_is_hex_on_the_wire() {
        let req = PeerRequest::UploadPiece {
            node_id: 2,
            file_hash: hash(),
            piece_index: 0,
            piece_data: PieceData(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["command"], "upload_piece");
        assert_eq!(value["piece_data"], "deadbeef");
    }

    #[test]
    fn piece_data_rejects_non_hex() {
        let text = r#"{"status":"success","piece_data":"zz"}"#;
        assert!(serde_json::from_str::<PeerResponse>(text).is_err());
    }

    #[test]
    fn success_without_piece_data() {
        let reply: PeerResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(reply, PeerResponse::ok());
        assert_eq!(
            serde_json::to_value(PeerResponse::ok()).unwrap(),
            json!({"status": "success"})
        );
    }

    #[test]
    fn bad_file_hash_is_a_parse_error() {
        let text = r#"{"command":"download_piece","file_hash":"../x","piece_index":0}"#;
        assert!(serde_json::from_str::<PeerRequest>(text).is_err());
    }
}
