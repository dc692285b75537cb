//! Interprets inbound Jupyter messages for one kernel connection and drives
//! execute requests to completion.

use std::sync::Arc;

use gateway_core::content::{
    CompleteReply, Content, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest, ExecuteResult,
    InterruptReply, KernelInfoReply, LanguageInfo, ReplyStatus, ShutdownReply, Status,
};
use gateway_core::ids::{ConnectionId, KernelId};
use gateway_core::kernel::{ExecutionState, KernelFlavor};
use gateway_core::message::{GATEWAY_USERNAME, PROTOCOL_VERSION};
use gateway_core::{Channel, Envelope, GatewayError, NamespaceKey};
use serde_json::Map;
use tracing::{debug, instrument, warn};

use crate::directory::NamespaceDirectory;
use crate::magic::select_language;
use crate::output::result_data;
use crate::process::Process;
use crate::registry::NamespaceRegistry;

/// Receives the messages a dispatch produces for the requesting connection.
pub trait Outbox: Send + Sync {
    fn deliver(&self, envelope: Envelope);
}

/// Which kernel a connection talks to, and who the connection is.
#[derive(Clone, Debug)]
pub struct ChannelContext {
    pub key: NamespaceKey,
    pub kernel_id: KernelId,
    pub connection: ConnectionId,
}

pub struct MessageRouter {
    directory: Arc<NamespaceDirectory>,
}

/// Builds replies to one request and routes them: everything goes to the
/// requester, iopub traffic is also published to other viewers.
struct Replies<'a> {
    ctx: &'a ChannelContext,
    request: &'a Envelope,
    out: &'a dyn Outbox,
    process: Option<Arc<Process>>,
}

impl Replies<'_> {
    fn send(&self, channel: Channel, content: Content) {
        let envelope = self.request.reply(channel, self.ctx.kernel_id.as_str(), content);
        if channel == Channel::Iopub {
            if let Some(process) = &self.process {
                process.publish(&self.ctx.connection, &envelope);
            }
        }
        self.out.deliver(envelope);
    }

    fn status(&self, state: ExecutionState) {
        self.send(Channel::Iopub, Content::Status(Status { execution_state: state }));
    }

    fn error(&self, text: &str) {
        self.send(Channel::Iopub, Content::Error(error_content(text)));
    }

    fn execute_reply(&self, status: ReplyStatus, execution_count: u64) {
        self.send(Channel::Shell, Content::ExecuteReply(ExecuteReply::new(status, execution_count)));
    }
}

/// `error` content for a failure; the traceback line is rendered bold red.
pub fn error_content(text: &str) -> ErrorContent {
    ErrorContent {
        ename: "Error".to_string(),
        evalue: text.to_string(),
        traceback: vec![format!("\u{1b}[1;31m{text}\u{1b}[1;39m")],
    }
}

fn language_info(flavor: KernelFlavor) -> LanguageInfo {
    let (mimetype, file_extension) = match flavor {
        KernelFlavor::Polyglot | KernelFlavor::ObjectScript => ("text/x-objectscript", ".int"),
        KernelFlavor::Python => ("text/x-python", ".py"),
        KernelFlavor::Sql => ("text/x-sql", ".sql"),
    };
    LanguageInfo {
        name: flavor.spec_language().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mimetype: mimetype.to_string(),
        file_extension: file_extension.to_string(),
    }
}

pub fn kernel_info(flavor: KernelFlavor) -> KernelInfoReply {
    KernelInfoReply {
        status: ReplyStatus::Ok,
        protocol_version: PROTOCOL_VERSION.to_string(),
        implementation: GATEWAY_USERNAME.to_string(),
        implementation_version: env!("CARGO_PKG_VERSION").to_string(),
        language_info: language_info(flavor),
        banner: format!("{} via iris-jupyter-server", flavor.display_name()),
        help_links: Vec::new(),
    }
}

impl MessageRouter {
    pub fn new(directory: Arc<NamespaceDirectory>) -> Self {
        Self { directory }
    }

    fn registry(&self, key: &NamespaceKey) -> Option<Arc<NamespaceRegistry>> {
        self.directory.get(key)
    }

    /// Handle one inbound message. Replies reach `out` in protocol order
    /// before this returns.
    #[instrument(skip_all, fields(kernel_id = %ctx.kernel_id, channel = %request.channel, msg_type = %request.msg_type()))]
    pub async fn dispatch(&self, ctx: &ChannelContext, request: Envelope, out: &dyn Outbox) {
        let registry = self.registry(&ctx.key);
        let process = registry.as_ref().and_then(|r| r.process(&ctx.kernel_id));
        let replies = Replies {
            ctx,
            request: &request,
            out,
            process: process.clone(),
        };

        match (request.channel, &request.content) {
            (Channel::Shell, Content::KernelInfoRequest) => {
                let flavor = process.as_ref().map_or(KernelFlavor::Polyglot, |p| p.flavor());
                replies.send(Channel::Shell, Content::KernelInfoReply(kernel_info(flavor)));
            }
            (Channel::Shell, Content::ExecuteRequest(execute)) => {
                self.execute(&replies, process, execute).await;
            }
            (Channel::Shell, Content::CompleteRequest(complete)) => {
                replies.send(
                    Channel::Shell,
                    Content::CompleteReply(CompleteReply {
                        status: ReplyStatus::Ok,
                        matches: Vec::new(),
                        cursor_start: complete.cursor_pos,
                        cursor_end: complete.cursor_pos,
                        metadata: Map::new(),
                    }),
                );
            }
            (Channel::Control, Content::InterruptRequest) => {
                let result = match &registry {
                    Some(registry) => registry.interrupt(&ctx.kernel_id).await,
                    None => Err(GatewayError::KernelNotFound(ctx.kernel_id.to_string())),
                };
                replies.send(
                    Channel::Control,
                    Content::InterruptReply(InterruptReply {
                        status: reply_status(&result, "interrupt"),
                    }),
                );
            }
            (Channel::Control, Content::ShutdownRequest(shutdown)) => {
                let result = match &registry {
                    Some(registry) if shutdown.restart => {
                        registry.restart_kernel(&ctx.kernel_id).await.map(|_| ())
                    }
                    Some(registry) => registry.delete_kernel(&ctx.kernel_id).await,
                    None => Err(GatewayError::KernelNotFound(ctx.kernel_id.to_string())),
                };
                replies.send(
                    Channel::Control,
                    Content::ShutdownReply(ShutdownReply {
                        status: reply_status(&result, "shutdown"),
                        restart: shutdown.restart,
                    }),
                );
            }
            (channel, content) => {
                debug!(%channel, msg_type = content.msg_type(), "message ignored");
            }
        }
    }

    async fn execute(&self, replies: &Replies<'_>, process: Option<Arc<Process>>, request: &ExecuteRequest) {
        let Some(process) = process else {
            replies.error(&format!("No connection to kernel {}", replies.ctx.kernel_id));
            replies.execute_reply(ReplyStatus::Error, 0);
            return;
        };

        replies.status(ExecutionState::Busy);
        let (language, code) = select_language(process.flavor(), &request.code);
        debug!(language = language.token(), "executing");
        let announce = |execution_count: u64| {
            if !request.silent {
                replies.send(
                    Channel::Iopub,
                    Content::ExecuteInput(ExecuteInput {
                        code: request.code.clone(),
                        execution_count,
                    }),
                );
            }
        };
        match process.execute_with(code, language, announce).await {
            Ok(execution) => match execution.output {
                Ok(output) => {
                    if !request.silent && !output.is_empty() {
                        replies.send(
                            Channel::Iopub,
                            Content::ExecuteResult(ExecuteResult {
                                execution_count: execution.execution_count,
                                data: result_data(&output),
                                metadata: Map::new(),
                            }),
                        );
                    }
                    replies.execute_reply(ReplyStatus::Ok, execution.execution_count);
                }
                Err(failure) => {
                    replies.error(&failure_text(&failure));
                    replies.execute_reply(ReplyStatus::Error, execution.execution_count);
                }
            },
            Err(e) => {
                warn!(error = %e, "execute request could not run");
                replies.error(&failure_text(&e));
                replies.execute_reply(ReplyStatus::Error, 0);
            }
        }
        replies.status(ExecutionState::Idle);
    }
}

fn failure_text(error: &GatewayError) -> String {
    match error {
        GatewayError::ExecutionFailure(text) => text.clone(),
        other => other.to_string(),
    }
}

fn reply_status(result: &Result<(), GatewayError>, what: &str) -> ReplyStatus {
    match result {
        Ok(()) => ReplyStatus::Ok,
        Err(e) => {
            warn!(error = %e, "{what} request failed");
            ReplyStatus::Error
        }
    }
}
