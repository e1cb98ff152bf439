// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gRPC transport implementing the `im.v1.IMService` defined in
//! `proto/im/v1/im.proto` (spec §6 inter-service RPCs).

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::warn;

use durablelog::Publisher;
use sequencer::BlockBackend;
use store::{DeliveryStatus, MessageStore};

use crate::core::{DeliveryPath, Router};

/// Generated protobuf types for the `im.v1` package.
pub mod proto {
    tonic::include_proto!("im.v1");
}

/// gRPC implementation of `im.v1.IMService`, backed by the core `Router`.
/// Holds the Message Store directly since status tracking beyond
/// routed-vs-delivered lives there, not in the Router.
pub struct RouterGrpc<B: BlockBackend, L: Publisher> {
    router: Arc<Router<B, L>>,
    store: MessageStore,
}

impl<B: BlockBackend, L: Publisher> RouterGrpc<B, L> {
    pub fn new(router: Arc<Router<B, L>>, store: MessageStore) -> Self {
        Self { router, store }
    }
}

#[tonic::async_trait]
impl<B, L> proto::im_service_server::ImService for RouterGrpc<B, L>
where
    B: BlockBackend + Send + Sync + 'static,
    L: Publisher + Send + Sync + 'static,
{
    async fn route_private_message(
        &self,
        request: Request<proto::RoutePrivateMessageRequest>,
    ) -> Result<Response<proto::RoutePrivateMessageResponse>, Status> {
        let req = request.into_inner();
        let conversation_id = imcore::ConversationId::private(&req.sender, &req.recipient).0;
        let content = imcore::Content { content_type: req.content_type, bytes: req.content_bytes };

        let outcome = self
            .router
            .route_private(
                &req.sender,
                &req.recipient,
                &conversation_id,
                &content,
                &req.msg_id,
                req.client_ts,
            )
            .await
            .map_err(router_error_to_status)?;

        Ok(Response::new(proto::RoutePrivateMessageResponse {
            sequence: outcome.sequence,
            path: match outcome.path {
                DeliveryPath::Fast => proto::DeliveryPath::Fast as i32,
                DeliveryPath::Slow => proto::DeliveryPath::Slow as i32,
            },
            was_duplicate: outcome.was_duplicate,
        }))
    }

    async fn route_group_message(
        &self,
        request: Request<proto::RouteGroupMessageRequest>,
    ) -> Result<Response<proto::RouteGroupMessageResponse>, Status> {
        let req = request.into_inner();
        let content = imcore::Content { content_type: req.content_type, bytes: req.content_bytes };

        let outcome = self
            .router
            .route_group(&req.sender, &req.group_id, &content, &req.msg_id, req.client_ts)
            .await
            .map_err(router_error_to_status)?;

        Ok(Response::new(proto::RouteGroupMessageResponse {
            sequence: outcome.sequence,
            was_duplicate: outcome.was_duplicate,
        }))
    }

    async fn get_message_status(
        &self,
        request: Request<proto::GetMessageStatusRequest>,
    ) -> Result<Response<proto::GetMessageStatusResponse>, Status> {
        let req = request.into_inner();
        let status = match self.store.message_status(&req.msg_id).await {
            Ok(Some(DeliveryStatus::Routed)) => proto::MessageStatus::Routed,
            Ok(Some(DeliveryStatus::Delivered)) => proto::MessageStatus::Delivered,
            Ok(None) => proto::MessageStatus::Unknown,
            Err(err) => {
                warn!(%err, msg_id = %req.msg_id, "message status lookup failed");
                return Err(Status::unavailable(err.to_string()));
            }
        };
        Ok(Response::new(proto::GetMessageStatusResponse { status: status as i32 }))
    }

    async fn check(
        &self,
        _request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        Ok(Response::new(proto::HealthCheckResponse { serving: true }))
    }
}

fn router_error_to_status(err: crate::error::RouterError) -> Status {
    let api_error: imcore::ApiError = (&err).into();
    Status::new(grpc_code(api_error), err.to_string())
}

fn grpc_code(err: imcore::ApiError) -> tonic::Code {
    match err {
        imcore::ApiError::InvalidArgument => tonic::Code::InvalidArgument,
        imcore::ApiError::NotFound => tonic::Code::NotFound,
        imcore::ApiError::ResourceExhausted => tonic::Code::ResourceExhausted,
        imcore::ApiError::Unavailable => tonic::Code::Unavailable,
        imcore::ApiError::Internal => tonic::Code::Internal,
    }
}
