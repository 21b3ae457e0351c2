//! Request router for dispatching file operation messages.
//!
//! This module provides the `RequestRouter` struct that receives protocol
//! messages, builds a [`DirectoryManager`] scoped to the caller's mapping set
//! and runs the requested operation on the blocking thread pool.
//!
//! A request without an `Authorization` header sees the configured mappings
//! (unless tokens are required). A request with one sees only what its token
//! grants, or gets an error. No path leads from a failed token back to the
//! configured mappings.

use std::sync::Arc;

use protocol::messages::{ExportChunk, ListResponse, OperationComplete, Pong, ReadResponse};
use protocol::{Envelope, ErrorCode, ErrorMessage, Message, ProtocolError};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, TokenValidator};
use crate::config::{Config, ConfigError};
use crate::files::{
    DirectoryManager, ExportPart, ExportStore, FileError, MappingSet, QuotaTracker,
};

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// File operation error.
    #[error(transparent)]
    File(#[from] FileError),

    /// Token validation error.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Envelope from another protocol version.
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Error code clients branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::File(e) => e.code(),
            RouterError::Auth(e) => e.code(),
            RouterError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            RouterError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            RouterError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let code = self.code();
        ErrorMessage {
            code,
            message: self.to_string(),
            context,
            recoverable: code == ErrorCode::InternalError,
        }
    }
}

impl From<ProtocolError> for RouterError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::VersionMismatch { expected, got } => {
                RouterError::VersionMismatch { expected, got }
            }
            other => RouterError::InvalidRequest(other.to_string()),
        }
    }
}

/// Dispatches request messages to a per-request [`DirectoryManager`].
#[derive(Debug, Clone)]
pub struct RequestRouter {
    /// Mappings for requests without a token.
    mappings: MappingSet,
    /// Quota for requests without a token.
    quota: QuotaTracker,
    /// Validator for bearer tokens. `None` means tokens are not accepted.
    validator: Option<Arc<TokenValidator>>,
    /// Reject requests that carry no token.
    require_token: bool,
    /// List dot files even when the request does not ask for them.
    include_hidden: bool,
    /// Spooled archives, shared by clones of this router.
    exports: Arc<ExportStore>,
}

impl RequestRouter {
    /// Create a router serving `mappings` with the given quota.
    pub fn new(mappings: MappingSet, quota: QuotaTracker) -> Self {
        Self {
            mappings,
            quota,
            validator: None,
            require_token: false,
            include_hidden: false,
            exports: Arc::new(ExportStore::new()),
        }
    }

    /// Accept bearer tokens checked by `validator`.
    pub fn with_token_validator(mut self, validator: TokenValidator, require_token: bool) -> Self {
        self.validator = Some(Arc::new(validator));
        self.require_token = require_token;
        self
    }

    /// Always include dot files in listings.
    pub fn with_include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    /// Build a router from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut router = Self::new(config.mapping_set(), config.quota_tracker()?)
            .with_include_hidden(config.storage.include_hidden);
        if let Some(validator) = config.token_validator() {
            router = router.with_token_validator(validator, config.auth.require_token);
        }
        Ok(router)
    }

    /// Build the manager for one request.
    ///
    /// A present header, even an empty one, always goes through the token
    /// validator; if no validator is configured the request is rejected.
    pub fn manager_for(&self, authorization: Option<&str>) -> Result<DirectoryManager, RouterError> {
        match authorization {
            Some(header) => {
                let Some(validator) = &self.validator else {
                    warn!("token presented but token validation is not configured");
                    return Err(AuthError::InvalidToken(
                        "token authentication is not configured".to_string(),
                    )
                    .into());
                };
                let grant = validator.validate(Some(header))?;
                Ok(DirectoryManager::new(
                    grant.mappings,
                    QuotaTracker::new(grant.quota_limit),
                ))
            }
            None if self.require_token => {
                warn!("request without token rejected");
                Err(AuthError::MissingAuth.into())
            }
            None => Ok(DirectoryManager::new(self.mappings.clone(), self.quota)),
        }
    }

    /// Route a message and return the response, if any.
    pub async fn route(&self, message: Message, authorization: Option<&str>) -> RouterResult {
        debug!(kind = message_kind(&message), "Routing message");

        match message {
            Message::ListRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let include_hidden = req.include_hidden || self.include_hidden;
                let path = req.path.clone();
                let entries = run(manager, move |m| m.list(&path, include_hidden)).await?;
                Ok(Some(Message::ListResponse(ListResponse {
                    path: req.path,
                    entries,
                })))
            }
            Message::StatRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let stat = run(manager, move |m| m.stat(&req.path)).await?;
                Ok(Some(Message::StatResponse(stat)))
            }
            Message::ReadRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = req.path.clone();
                let (offset, length) = (req.offset, req.length);
                let chunk = run(manager, move |m| m.read(&path, offset, length)).await?;
                Ok(Some(Message::ReadResponse(ReadResponse {
                    path: req.path,
                    offset: req.offset,
                    total_size: chunk.total_size,
                    data: chunk.data,
                    is_last: chunk.is_last,
                })))
            }
            Message::UploadRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = run(manager, move |m| {
                    let size = req.data.len() as u64;
                    m.upload(&req.directory, &req.filename, req.data.as_slice(), size)
                })
                .await?;
                Ok(Some(complete(path)))
            }
            Message::WriteRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = run(manager, move |m| m.write(&req.path, &req.data)).await?;
                Ok(Some(complete(path)))
            }
            Message::DeleteRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = req.path.clone();
                run(manager, move |m| m.delete(&path)).await?;
                Ok(Some(complete(req.path)))
            }
            Message::MoveRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = run(manager, move |m| m.move_path(&req.source, &req.destination)).await?;
                Ok(Some(complete(path)))
            }
            Message::CopyRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = run(manager, move |m| m.copy(&req.source, &req.destination)).await?;
                Ok(Some(complete(path)))
            }
            Message::MkdirRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let path = run(manager, move |m| m.mkdir(&req.path)).await?;
                Ok(Some(complete(path)))
            }
            Message::ExportRequest(req) => {
                let manager = self.manager_for(authorization)?;
                let exports = Arc::clone(&self.exports);
                let owner = authorization.map(str::to_string);
                let part = run(manager, move |m| {
                    exports.start(m, &req.paths, owner.as_deref(), req.chunk_size)
                })
                .await?;
                Ok(Some(export_chunk(part)))
            }
            Message::ExportChunkRequest(req) => {
                // Re-validates the token; the spool itself is keyed to the header.
                let manager = self.manager_for(authorization)?;
                let exports = Arc::clone(&self.exports);
                let owner = authorization.map(str::to_string);
                let part = run(manager, move |_| {
                    exports.chunk(req.export_id, owner.as_deref(), req.offset, req.chunk_size)
                })
                .await?;
                Ok(Some(export_chunk(part)))
            }
            Message::QuotaRequest(_) => {
                let manager = self.manager_for(authorization)?;
                let info = run(manager, |m| Ok(m.quota_info())).await?;
                Ok(Some(Message::QuotaResponse(info)))
            }

            Message::ListResponse(_)
            | Message::StatResponse(_)
            | Message::ReadResponse(_)
            | Message::OperationComplete(_)
            | Message::ExportChunk(_)
            | Message::QuotaResponse(_) => {
                // These are response messages, not requests - ignore them
                debug!("Ignoring response message received as request");
                Ok(None)
            }

            // Control messages
            Message::Ping(ping) => Ok(Some(Message::Pong(Pong {
                timestamp: ping.timestamp,
            }))),
            Message::Pong(_) => {
                debug!("Received pong");
                Ok(None)
            }
            Message::Error(err) => {
                warn!(?err, "Received error from peer");
                Ok(None)
            }
        }
    }

    /// Handle one envelope, answering with the same sequence number.
    ///
    /// Failures become an `Error` message rather than an `Err`.
    pub async fn handle(&self, envelope: Envelope) -> Option<Envelope> {
        let Envelope {
            sequence,
            authorization,
            payload,
            ..
        } = envelope;
        let context = request_context(&payload);

        match self.route(payload, authorization.as_deref()).await {
            Ok(Some(reply)) => Some(Envelope::new(sequence, reply)),
            Ok(None) => None,
            Err(e) => {
                info!(sequence, error = %e, "request failed");
                Some(Envelope::new(
                    sequence,
                    Message::Error(e.to_error_message(context)),
                ))
            }
        }
    }

    /// Decode a MessagePack envelope, handle it and encode the reply.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>, RouterError> {
        let reply = match Envelope::decode(bytes) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                let err = RouterError::from(e);
                warn!(error = %err, "undecodable envelope");
                Some(Envelope::new(0, Message::Error(err.to_error_message(None))))
            }
        };

        reply
            .map(|envelope| envelope.to_msgpack())
            .transpose()
            .map_err(|e| RouterError::Internal(format!("failed to encode reply: {e}")))
    }
}

/// Run a file operation on the blocking pool.
async fn run<T, F>(manager: DirectoryManager, op: F) -> Result<T, RouterError>
where
    T: Send + 'static,
    F: FnOnce(&DirectoryManager) -> Result<T, FileError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&manager))
        .await
        .map_err(|e| RouterError::Internal(format!("blocking task failed: {e}")))?
        .map_err(RouterError::from)
}

fn export_chunk(part: ExportPart) -> Message {
    Message::ExportChunk(ExportChunk {
        export_id: part.export_id,
        offset: part.offset,
        total_size: part.total_size,
        data: part.data,
        is_last: part.is_last,
        files: part.summary.files,
        skipped: part.summary.skipped,
    })
}

fn complete(path: String) -> Message {
    Message::OperationComplete(OperationComplete { path })
}

/// The path a request is about, for error context.
fn request_context(message: &Message) -> Option<String> {
    match message {
        Message::ListRequest(r) => Some(r.path.clone()),
        Message::StatRequest(r) => Some(r.path.clone()),
        Message::ReadRequest(r) => Some(r.path.clone()),
        Message::UploadRequest(r) => Some(r.directory.clone()),
        Message::WriteRequest(r) => Some(r.path.clone()),
        Message::DeleteRequest(r) => Some(r.path.clone()),
        Message::MoveRequest(r) => Some(r.source.clone()),
        Message::CopyRequest(r) => Some(r.source.clone()),
        Message::MkdirRequest(r) => Some(r.path.clone()),
        _ => None,
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::ListRequest(_) => "list",
        Message::StatRequest(_) => "stat",
        Message::ReadRequest(_) => "read",
        Message::UploadRequest(_) => "upload",
        Message::WriteRequest(_) => "write",
        Message::DeleteRequest(_) => "delete",
        Message::MoveRequest(_) => "move",
        Message::CopyRequest(_) => "copy",
        Message::MkdirRequest(_) => "mkdir",
        Message::ExportRequest(_) => "export",
        Message::ExportChunkRequest(_) => "export_chunk",
        Message::QuotaRequest(_) => "quota",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Error(_) => "error",
        _ => "response",
    }
}
