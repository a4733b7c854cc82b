//! Channel-backed update listener.
//!
//! Pushed events are injected into the dispatcher through the same
//! [`UpdateListener`] seam the native poller uses, so both delivery modes
//! share one handler tree.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::convert::Infallible;
use teloxide::stop::{mk_stop_token, StopFlag, StopToken};
use teloxide::types::Update;
use teloxide::update_listeners::{AsUpdateStream, UpdateListener};
use tokio::sync::mpsc;

/// [`UpdateListener`] fed by the push endpoint's dispatch channel.
pub struct BridgeListener {
    rx: mpsc::UnboundedReceiver<Update>,
    token: StopToken,
    flag: StopFlag,
}

impl BridgeListener {
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<Update>) -> Self {
        let (token, flag) = mk_stop_token();
        Self { rx, token, flag }
    }
}

impl<'a> AsUpdateStream<'a> for BridgeListener {
    type StreamErr = Infallible;
    type Stream = BoxStream<'a, Result<Update, Infallible>>;

    fn as_stream(&'a mut self) -> Self::Stream {
        let flag = self.flag.clone();
        futures_util::stream::unfold(&mut self.rx, |rx| async move {
            rx.recv().await.map(|update| (Ok(update), rx))
        })
        .take_until(flag)
        .boxed()
    }
}

impl UpdateListener for BridgeListener {
    type Err = Infallible;

    fn stop_token(&mut self) -> StopToken {
        self.token.clone()
    }
}
