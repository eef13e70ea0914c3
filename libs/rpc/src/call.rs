use tether_core::{PeerId, ServiceId};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::RpcError;

/// One RPC invocation: request, reply slot and completion signal
///
/// A call is created by the [`Client`](crate::Client), driven by exactly one
/// task and handed back through its `done` channel when it completes. The
/// completing methods consume the call, so it can only be delivered once.
pub struct Call<A, R> {
    pub ctx: Context,
    pub dest: PeerId,
    pub service: ServiceId,
    pub args: A,
    pub reply: R,
    pub error: Option<RpcError>,
    replied: bool,
    done: mpsc::Sender<Call<A, R>>,
}

impl<A, R> Call<A, R> {
    pub(crate) fn new(
        ctx: Context,
        dest: PeerId,
        service: ServiceId,
        args: A,
        reply: R,
        done: mpsc::Sender<Call<A, R>>,
    ) -> Self {
        Self {
            ctx,
            dest,
            service,
            args,
            reply,
            error: None,
            replied: false,
            done,
        }
    }

    /// Store a decoded reply
    pub(crate) fn set_reply(&mut self, reply: R) {
        self.reply = reply;
        self.replied = true;
    }

    /// Whether a reply arrived, as opposed to `reply` holding its initial value
    pub fn replied(&self) -> bool {
        self.replied
    }

    /// Record an error without completing; the last recorded error wins
    pub(crate) fn set_error(&mut self, err: RpcError) {
        self.error = Some(err);
    }

    /// Record `err` if there is one, then complete
    pub(crate) async fn done_with_error(mut self, err: impl Into<Option<RpcError>>) {
        if let Some(err) = err.into() {
            self.set_error(err);
        }
        self.done().await;
    }

    /// Deliver the call to its observer, keeping any recorded error
    pub(crate) async fn done(self) {
        let done = self.done.clone();
        if done.send(self).await.is_err() {
            tracing::debug!("call completed without an observer");
        }
    }

    /// Split a completed call into its reply or error
    pub fn into_result(self) -> Result<R, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply),
        }
    }
}
