//! Batch decomposition and result aggregation.
//!
//! A batch is split into one group per resolved destination (first-seen order). Each group is
//! sent upstream as its own JSON array, all groups concurrently, and the returned result
//! arrays are concatenated. A group whose forward fails, or whose reply is not a JSON array,
//! contributes nothing (or placeholder error records under
//! [`BatchFailurePolicy::ErrorRecords`]); it never fails the batch as a whole.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::value::RawValue;

use crate::{
    config::BatchFailurePolicy,
    forward::Forwarder,
    routes::{Endpoint, RouteTable},
    rpc::{error_record, Call, RpcId, INTERNAL_ERROR_CODE},
};

const UPSTREAM_UNAVAILABLE: &str = "upstream unavailable";

#[derive(Debug)]
/// Calls of one batch that share a destination.
pub struct DestinationGroup {
    pub destination: Endpoint,
    /// Re-serialized call records, in inbound order.
    pub payloads: Vec<Vec<u8>>,
    /// Ids of the calls that expect a reply (notifications excluded).
    pub ids: Vec<RpcId>,
}

/// Partition `calls` by destination, preserving first-seen destination order.
pub fn group_by_destination(table: &RouteTable, calls: &[Call]) -> Vec<DestinationGroup> {
    let mut groups: Vec<DestinationGroup> = Vec::new();
    let mut index: HashMap<&Endpoint, usize> = HashMap::new();

    for call in calls {
        let destination = table.resolve(call.method());
        let encoded = match call.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    event = "batch_encode_failed",
                    method = %call.method(),
                    error = %err,
                    "skipping call"
                );
                continue;
            }
        };

        tracing::debug!(
            event = "batch_route",
            method = %call.method(),
            id = ?call.id(),
            destination = %destination,
            "routing batch call"
        );

        let slot = *index.entry(destination).or_insert_with(|| {
            groups.push(DestinationGroup {
                destination: destination.clone(),
                payloads: Vec::new(),
                ids: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.payloads.push(encoded);
        if let Some(id) = call.id() {
            group.ids.push(id.clone());
        }
    }

    groups
}

/// `[` + payloads joined by `,` + `]`.
pub fn build_batch_payload(payloads: &[Vec<u8>]) -> Bytes {
    let len = payloads.iter().map(Vec::len).sum::<usize>() + payloads.len() + 1;
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8(b'[');
    for (i, payload) in payloads.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b',');
        }
        buf.put_slice(payload);
    }
    buf.put_u8(b']');
    buf.freeze()
}

async fn dispatch_group(
    forwarder: &dyn Forwarder,
    group: &DestinationGroup,
) -> anyhow::Result<Vec<Box<RawValue>>> {
    let payload = build_batch_payload(&group.payloads);
    tracing::info!(
        event = "proxy_batch_group",
        destination = %group.destination,
        batch_size = group.payloads.len(),
        payload_bytes = payload.len(),
        "forwarding batch group"
    );

    let upstream = forwarder.forward(&group.destination, payload).await?;
    let records: Vec<Box<RawValue>> = serde_json::from_slice(&upstream.body).map_err(|err| {
        anyhow::anyhow!(
            "decode batch response (status {}): {err}",
            upstream.status
        )
    })?;
    Ok(records)
}

/// Dispatch a batch and return the merged result records.
///
/// Records are emitted per group in first-seen destination order; callers must still
/// correlate by `id`, since the order within a group is whatever the upstream returned.
pub async fn dispatch_batch(
    table: &RouteTable,
    forwarder: &dyn Forwarder,
    calls: &[Call],
    policy: BatchFailurePolicy,
) -> Vec<Box<RawValue>> {
    let groups = group_by_destination(table, calls);
    let results =
        futures::future::join_all(groups.iter().map(|g| dispatch_group(forwarder, g))).await;

    let mut merged = Vec::with_capacity(calls.len());
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(records) => merged.extend(records),
            Err(err) => {
                tracing::warn!(
                    event = "batch_group_dropped",
                    destination = %group.destination,
                    batch_size = group.payloads.len(),
                    error = %err,
                    "dropping batch group results"
                );
                if policy == BatchFailurePolicy::ErrorRecords {
                    merged.extend(placeholder_records(&group.ids));
                }
            }
        }
    }
    merged
}

fn placeholder_records(ids: &[RpcId]) -> Vec<Box<RawValue>> {
    ids.iter()
        .filter_map(|id| error_record(id, INTERNAL_ERROR_CODE, UPSTREAM_UNAVAILABLE).ok())
        .collect()
}

/// Serialize merged records as one JSON array. Each record's text is emitted verbatim.
pub fn encode_merged(records: &[Box<RawValue>]) -> serde_json::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(records)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{forward::UpstreamResponse, routes::Route};
    use async_trait::async_trait;
    use http::{HeaderMap, StatusCode};
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Echoes one result per call with `id`, tagging each with the destination. Destinations in
    /// `down` fail to connect; destinations in `garbage` answer with a non-array body.
    struct RecordingForwarder {
        calls: Mutex<Vec<(String, Bytes)>>,
        down: HashSet<&'static str>,
        garbage: HashSet<&'static str>,
    }

    impl RecordingForwarder {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                down: HashSet::new(),
                garbage: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(
            &self,
            destination: &Endpoint,
            payload: Bytes,
        ) -> anyhow::Result<UpstreamResponse> {
            self.calls
                .lock()
                .await
                .push((destination.to_string(), payload.clone()));

            if self.down.contains(destination.as_str()) {
                anyhow::bail!("connection refused");
            }

            let body = if self.garbage.contains(destination.as_str()) {
                Bytes::from_static(br#"{"jsonrpc":"2.0","error":{"code":-32600}}"#)
            } else {
                let input: Vec<serde_json::Value> = serde_json::from_slice(&payload)?;
                let out: Vec<serde_json::Value> = input
                    .iter()
                    .filter(|call| call.get("id").is_some())
                    .map(|call| {
                        serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": call["id"],
                            "result": destination.as_str(),
                        })
                    })
                    .collect();
                Bytes::from(serde_json::to_vec(&out)?)
            };

            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body,
            })
        }
    }

    fn table() -> RouteTable {
        RouteTable::build(
            vec![
                Route {
                    method: "eth_chainId".to_string(),
                    destination: Endpoint::new("http://a"),
                },
                Route {
                    method: "eth_blockNumber".to_string(),
                    destination: Endpoint::new("http://b"),
                },
            ],
            Endpoint::new("http://default"),
        )
        .unwrap()
    }

    fn calls(json: &str) -> Vec<Call> {
        let elements: Vec<&RawValue> = serde_json::from_str(json).unwrap();
        elements
            .into_iter()
            .map(|raw| Call::parse(Bytes::copy_from_slice(raw.get().as_bytes())).unwrap())
            .collect()
    }

    fn merged_values(records: &[Box<RawValue>]) -> Vec<serde_json::Value> {
        records
            .iter()
            .map(|r| serde_json::from_str(r.get()).unwrap())
            .collect()
    }

    fn result_for(values: &[serde_json::Value], id: serde_json::Value) -> Option<String> {
        values
            .iter()
            .find(|v| v["id"] == id)
            .map(|v| v["result"].as_str().unwrap().to_string())
    }

    #[test]
    fn groups_follow_first_seen_destination_order() {
        let batch = calls(
            r#"[
              {"method":"eth_blockNumber","id":1},
              {"method":"eth_chainId","id":2},
              {"method":"eth_blockNumber","id":3},
              {"method":"eth_notify"}
            ]"#,
        );
        let groups = group_by_destination(&table(), &batch);

        let dests: Vec<&str> = groups.iter().map(|g| g.destination.as_str()).collect();
        assert_eq!(dests, vec!["http://b", "http://a", "http://default"]);
        assert_eq!(groups[0].payloads.len(), 2);
        assert_eq!(
            groups[0].ids,
            vec![RpcId::Number(1u64.into()), RpcId::Number(3u64.into())]
        );
        assert!(groups[2].ids.is_empty());
    }

    #[test]
    fn batch_payload_is_comma_joined_array() {
        let payload = build_batch_payload(&[b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
        assert_eq!(&payload[..], b"[{\"a\":1},{\"b\":2}]");
        assert_eq!(&build_batch_payload(&[])[..], b"[]");
    }

    #[tokio::test]
    async fn one_forward_per_distinct_destination() {
        let fwd = RecordingForwarder::new();
        let batch = calls(
            r#"[
              {"jsonrpc":"2.0","method":"eth_chainId","id":1},
              {"jsonrpc":"2.0","method":"eth_getBalance","params":["0x0","latest"],"id":2},
              {"jsonrpc":"2.0","method":"eth_chainId","id":3}
            ]"#,
        );

        let merged = dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::Omit).await;

        let seen = fwd.calls.lock().await;
        assert_eq!(seen.len(), 2);
        let to_a = seen.iter().find(|(d, _)| d == "http://a").unwrap();
        assert_eq!(
            &to_a.1[..],
            br#"[{"jsonrpc":"2.0","method":"eth_chainId","id":1},{"jsonrpc":"2.0","method":"eth_chainId","id":3}]"#
        );

        let values = merged_values(&merged);
        assert_eq!(values.len(), 3);
        assert_eq!(result_for(&values, 1.into()).as_deref(), Some("http://a"));
        assert_eq!(result_for(&values, 2.into()).as_deref(), Some("http://default"));
        assert_eq!(result_for(&values, 3.into()).as_deref(), Some("http://a"));
    }

    #[tokio::test]
    async fn unreachable_destination_is_omitted() {
        let mut fwd = RecordingForwarder::new();
        fwd.down.insert("http://b");
        let batch = calls(
            r#"[
              {"method":"eth_chainId","id":1},
              {"method":"eth_blockNumber","id":2},
              {"method":"eth_chainId","id":3}
            ]"#,
        );

        let merged = dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::Omit).await;
        let values = merged_values(&merged);

        assert_eq!(fwd.calls.lock().await.len(), 2);
        assert_eq!(values.len(), 2);
        assert!(result_for(&values, 2.into()).is_none());
        assert!(result_for(&values, 1.into()).is_some());
        assert!(result_for(&values, 3.into()).is_some());
    }

    #[tokio::test]
    async fn non_array_reply_contributes_nothing() {
        let mut fwd = RecordingForwarder::new();
        fwd.garbage.insert("http://a");
        let batch = calls(
            r#"[
              {"method":"eth_chainId","id":1},
              {"method":"eth_blockNumber","id":2}
            ]"#,
        );

        let merged = dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::Omit).await;
        let values = merged_values(&merged);
        assert_eq!(values.len(), 1);
        assert_eq!(result_for(&values, 2.into()).as_deref(), Some("http://b"));
    }

    #[tokio::test]
    async fn all_groups_failing_yields_empty_result() {
        let mut fwd = RecordingForwarder::new();
        fwd.down.extend(["http://a", "http://b", "http://default"]);
        let batch = calls(
            r#"[
              {"method":"eth_chainId","id":1},
              {"method":"eth_blockNumber","id":2},
              {"method":"other","id":3}
            ]"#,
        );

        let merged = dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::Omit).await;
        assert!(merged.is_empty());
        assert_eq!(&encode_merged(&merged).unwrap()[..], b"[]");
    }

    #[tokio::test]
    async fn id_types_survive_the_round_trip() {
        let fwd = RecordingForwarder::new();
        let batch = calls(
            r#"[
              {"method":"eth_chainId","id":1},
              {"method":"eth_blockNumber","id":"1"}
            ]"#,
        );

        let merged = dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::Omit).await;
        let values = merged_values(&merged);

        assert_eq!(result_for(&values, serde_json::json!(1)).as_deref(), Some("http://a"));
        assert_eq!(result_for(&values, serde_json::json!("1")).as_deref(), Some("http://b"));
    }

    #[tokio::test]
    async fn error_records_policy_fills_in_failed_ids() {
        let mut fwd = RecordingForwarder::new();
        fwd.down.insert("http://b");
        let batch = calls(
            r#"[
              {"method":"eth_chainId","id":1},
              {"method":"eth_blockNumber","id":"x"},
              {"method":"eth_blockNumber"}
            ]"#,
        );

        let merged =
            dispatch_batch(&table(), &fwd, &batch, BatchFailurePolicy::ErrorRecords).await;
        let values = merged_values(&merged);

        assert_eq!(values.len(), 2);
        let placeholder = values.iter().find(|v| v["id"] == "x").unwrap();
        assert_eq!(placeholder["error"]["code"], INTERNAL_ERROR_CODE);
        assert_eq!(placeholder["error"]["message"], UPSTREAM_UNAVAILABLE);
    }

    #[test]
    fn merged_records_are_emitted_verbatim() {
        let records: Vec<Box<RawValue>> = vec![
            RawValue::from_string(r#"{"id":1, "result":"0x1"}"#.to_string()).unwrap(),
            RawValue::from_string(r#"{"id":"b","result":null}"#.to_string()).unwrap(),
        ];
        assert_eq!(
            &encode_merged(&records).unwrap()[..],
            br#"[{"id":1, "result":"0x1"},{"id":"b","result":null}]"#
        );
    }
}
