//! `CheckResources` over a tonic channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::metadata::{AsciiMetadataValue, MetadataKey};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::Channel;

use crate::error::Error;
use crate::proto;
use crate::types::{CheckResult, CorrelationToken};

use super::{Batch, BatchItem, Reply, ReplyStream, Transport};

/// Adds fixed metadata (such as the playground instance) to every call.
#[derive(Clone, Default)]
pub(crate) struct MetadataInterceptor {
    headers: Vec<(MetadataKey<tonic::metadata::Ascii>, AsciiMetadataValue)>,
}

impl MetadataInterceptor {
    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        let key = MetadataKey::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidArgument(format!("invalid metadata key '{name}'")))?;
        let value: AsciiMetadataValue = value
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid value for metadata '{name}'")))?;
        self.headers.push((key, value));
        Ok(self)
    }
}

impl Interceptor for MetadataInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> Result<tonic::Request<()>, tonic::Status> {
        for (key, value) in &self.headers {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

type MetadataChannel = InterceptedService<Channel, MetadataInterceptor>;

/// A [`Transport`] speaking the Cerbos gRPC API.
///
/// Requests of a batch that share a principal and auxiliary data are sent as
/// one `CheckResources` call; calls for different groups are issued
/// concurrently. Every call carries a request id derived from the batch id,
/// which the PDP must echo back, and each result's resource kind and id are
/// checked against the request it answers.
#[derive(Clone)]
pub struct GrpcTransport {
    grpc: Grpc<MetadataChannel>,
    healthy: Arc<AtomicBool>,
}

impl std::fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("healthy", &self.healthy.load(Ordering::Relaxed))
            .finish()
    }
}

impl GrpcTransport {
    /// Wraps an established channel.
    pub fn new(channel: Channel) -> Self {
        Self::with_interceptor(channel, MetadataInterceptor::default())
    }

    pub(crate) fn with_interceptor(channel: Channel, interceptor: MetadataInterceptor) -> Self {
        Self {
            grpc: Grpc::new(InterceptedService::new(channel, interceptor)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    fn call(&self, batch: Batch, deadline: Duration) -> ReplyStream {
        let grpc = self.grpc.clone();
        let healthy = Arc::clone(&self.healthy);
        let batch_id = batch.id();
        let groups = group_by_principal(batch.into_items());
        Box::pin(async_stream::stream! {
            let mut calls = tokio::task::JoinSet::new();
            for (index, items) in groups.into_iter().enumerate() {
                let request_id = format!("{batch_id}-{index}");
                calls.spawn(check_resources(grpc.clone(), request_id, items, deadline));
            }
            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok(replies) => {
                        for reply in replies {
                            if let Reply::Failed { error, .. } = &reply {
                                if connection_lost(error) {
                                    healthy.store(false, Ordering::Relaxed);
                                }
                            }
                            yield reply;
                        }
                    }
                    // Unanswered tokens are reported when the stream ends.
                    Err(err) => tracing::error!(%batch_id, error = %err, "CheckResources task failed"),
                }
            }
        })
    }

    async fn connect(&self) -> Result<(), Error> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Error::Transport(format!("service was not ready: {e}")))?;
        self.healthy.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

fn connection_lost(error: &Error) -> bool {
    matches!(error, Error::Transport(_)) || error.code() == Some(tonic::Code::Unavailable)
}

/// Splits a batch into groups that can share one `CheckResources` call,
/// keeping first-seen order.
fn group_by_principal(items: Vec<BatchItem>) -> Vec<Vec<BatchItem>> {
    let mut index: HashMap<[u8; 32], usize> = HashMap::new();
    let mut groups: Vec<Vec<BatchItem>> = Vec::new();
    for item in items {
        let key = item.request().group_key();
        match index.get(&key) {
            Some(&i) => groups[i].push(item),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![item]);
            }
        }
    }
    groups
}

async fn check_resources(
    mut grpc: Grpc<MetadataChannel>,
    request_id: String,
    items: Vec<BatchItem>,
    deadline: Duration,
) -> Vec<Reply> {
    let tokens: Vec<CorrelationToken> = items.iter().map(BatchItem::token).collect();
    let Some(first) = items.first() else {
        return Vec::new();
    };
    let message = proto::CheckResourcesRequest {
        request_id: request_id.clone(),
        principal: Some(first.request().principal().into()),
        resources: items.iter().map(|i| i.request().to_resource_entry()).collect(),
        aux_data: first.request().aux_data().map(Into::into),
        include_meta: false,
    };

    if let Err(e) = grpc.ready().await {
        return vec![Reply::Failed {
            tokens,
            error: Error::Transport(format!("service was not ready: {e}")),
        }];
    }

    let mut request = tonic::Request::new(message);
    request.set_timeout(deadline);
    let path = http::uri::PathAndQuery::from_static(proto::CHECK_RESOURCES_PATH);
    let codec: ProstCodec<proto::CheckResourcesRequest, proto::CheckResourcesResponse> =
        ProstCodec::default();

    match grpc.unary(request, path, codec).await {
        Ok(response) => match_results(&request_id, items, response.into_inner()),
        Err(status) => vec![Reply::Failed {
            tokens,
            error: call_error(status),
        }],
    }
}

/// A PDP without the `CheckResources` method cannot serve this client at all.
fn call_error(status: tonic::Status) -> Error {
    if status.code() == tonic::Code::Unimplemented {
        return Error::Fatal(format!(
            "PDP does not serve {}: {}",
            proto::CHECK_RESOURCES_PATH,
            status.message()
        ));
    }
    Error::from_status(status)
}

/// Pairs result entries with the requests of one call, by position.
fn match_results(
    request_id: &str,
    items: Vec<BatchItem>,
    response: proto::CheckResourcesResponse,
) -> Vec<Reply> {
    if response.request_id != request_id {
        return vec![Reply::Failed {
            tokens: items.iter().map(BatchItem::token).collect(),
            error: Error::ProtocolViolation(format!(
                "response echoed request id '{}', expected '{request_id}'",
                response.request_id
            )),
        }];
    }

    let mut replies = Vec::with_capacity(items.len());
    let mut results = response.results.into_iter();
    for item in &items {
        let Some(entry) = results.next() else {
            // Left unanswered; the session reports it when the stream ends.
            break;
        };
        let resource = item.request().resource();
        let echoed = entry
            .resource
            .as_ref()
            .map(|r| (r.kind.as_str(), r.id.as_str()));
        match echoed {
            Some((kind, id)) if kind != resource.kind() || id != resource.id() => {
                replies.push(Reply::Failed {
                    tokens: vec![item.token()],
                    error: Error::ProtocolViolation(format!(
                        "result for {kind}:{id} in the slot of {}:{}",
                        resource.kind(),
                        resource.id()
                    )),
                });
            }
            _ => replies.push(Reply::Result {
                token: item.token(),
                result: CheckResult::from_proto(entry),
            }),
        }
    }
    for extra in results {
        let (kind, id) = extra
            .resource
            .map(|r| (r.kind, r.id))
            .unwrap_or_default();
        replies.push(Reply::Unmatched {
            detail: format!("{request_id}: surplus result for {kind}:{id}"),
        });
    }
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuxData, CheckRequest, IdGenerator, Principal, Resource};

    fn item(ids: &IdGenerator, principal: &str, resource_id: &str) -> BatchItem {
        let request = CheckRequest::new(
            Principal::new(principal, ["employee"]).unwrap(),
            Resource::new("document", resource_id).unwrap(),
            ["read"],
        )
        .unwrap();
        BatchItem::new(ids.next_token(), Arc::new(request))
    }

    fn entry(kind: &str, id: &str, effect: proto::Effect) -> proto::ResultEntry {
        proto::ResultEntry {
            resource: Some(proto::ResultResource {
                id: id.into(),
                kind: kind.into(),
                ..Default::default()
            }),
            actions: [("read".to_string(), effect as i32)].into_iter().collect(),
            validation_errors: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn groups_by_principal_and_aux_data() {
        let ids = IdGenerator::default();
        let with_jwt = {
            let base = item(&ids, "alice", "doc:3");
            let request = base.request().clone().with_aux_data(AuxData::jwt("t").unwrap());
            BatchItem::new(base.token(), Arc::new(request))
        };
        let groups = group_by_principal(vec![
            item(&ids, "alice", "doc:1"),
            item(&ids, "bob", "doc:1"),
            item(&ids, "alice", "doc:2"),
            with_jwt,
        ]);
        let sizes: Vec<_> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 1, 1]);
        assert_eq!(groups[0][1].request().resource().id(), "doc:2");
    }

    #[test]
    fn matches_results_by_position() {
        let ids = IdGenerator::default();
        let items = vec![item(&ids, "alice", "doc:1"), item(&ids, "alice", "doc:2")];
        let tokens: Vec<_> = items.iter().map(BatchItem::token).collect();
        let response = proto::CheckResourcesResponse {
            request_id: "batch-1-0".into(),
            results: vec![
                entry("document", "doc:1", proto::Effect::Allow),
                entry("document", "doc:2", proto::Effect::Deny),
            ],
            cerbos_call_id: "call".into(),
        };
        let replies = match_results("batch-1-0", items, response);
        match (&replies[0], &replies[1]) {
            (
                Reply::Result { token: a, result: ra },
                Reply::Result { token: b, result: rb },
            ) => {
                assert_eq!(*a, tokens[0]);
                assert!(ra.is_allowed("read"));
                assert_eq!(*b, tokens[1]);
                assert!(!rb.is_allowed("read"));
            }
            other => panic!("unexpected replies {other:?}"),
        }
    }

    #[test]
    fn wrong_request_id_fails_the_call() {
        let ids = IdGenerator::default();
        let items = vec![item(&ids, "alice", "doc:1")];
        let response = proto::CheckResourcesResponse {
            request_id: "batch-9-0".into(),
            results: vec![entry("document", "doc:1", proto::Effect::Allow)],
            cerbos_call_id: String::new(),
        };
        let replies = match_results("batch-1-0", items, response);
        assert!(matches!(
            &replies[..],
            [Reply::Failed { error: Error::ProtocolViolation(_), .. }]
        ));
    }

    #[test]
    fn mismatched_resource_and_surplus_results_are_reported() {
        let ids = IdGenerator::default();
        let items = vec![item(&ids, "alice", "doc:1")];
        let response = proto::CheckResourcesResponse {
            request_id: "batch-1-0".into(),
            results: vec![
                entry("document", "doc:7", proto::Effect::Allow),
                entry("document", "doc:8", proto::Effect::Allow),
            ],
            cerbos_call_id: String::new(),
        };
        let replies = match_results("batch-1-0", items, response);
        assert!(matches!(&replies[0], Reply::Failed { error: Error::ProtocolViolation(_), .. }));
        assert!(matches!(&replies[1], Reply::Unmatched { detail } if detail.contains("doc:8")));
    }

    #[test]
    fn short_response_leaves_requests_unanswered() {
        let ids = IdGenerator::default();
        let items = vec![item(&ids, "alice", "doc:1"), item(&ids, "alice", "doc:2")];
        let response = proto::CheckResourcesResponse {
            request_id: "batch-1-0".into(),
            results: vec![entry("document", "doc:1", proto::Effect::Allow)],
            cerbos_call_id: String::new(),
        };
        assert_eq!(match_results("batch-1-0", items, response).len(), 1);
    }

    #[test]
    fn missing_method_is_fatal_and_other_statuses_pass_through() {
        let err = call_error(tonic::Status::unimplemented("unknown service"));
        assert!(matches!(&err, Error::Fatal(msg) if msg.contains(proto::CHECK_RESOURCES_PATH)));
        assert!(err.is_fatal());

        let err = call_error(tonic::Status::unavailable("connection refused"));
        assert_eq!(err.code(), Some(tonic::Code::Unavailable));
        assert!(!err.is_fatal());
    }

    #[test]
    fn playground_header_is_validated() {
        assert!(MetadataInterceptor::default()
            .with_header("playground-instance", "abc123")
            .is_ok());
        assert!(MetadataInterceptor::default()
            .with_header("bad key", "x")
            .is_err());
    }
}
