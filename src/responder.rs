//! The write-once response capability.
//!
//! Every operation completes its HTTP request by handing a JSON body to a
//! [`Responder`] exactly once. The production implementation wraps the
//! oneshot sender a suspended axum handler is awaiting; tests implement the
//! same trait with a recording double. A client that closed its connection
//! is only discovered here, at completion time, and is logged and
//! swallowed.

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// A suspended HTTP response. `finish` delivers the body and terminates
/// the request; the capability is consumed, so a handle can never be
/// written twice.
pub trait Responder: Send + Sync + 'static {
    fn finish(self: Box<Self>, body: Value);
}

/// Responder backed by the oneshot channel an axum handler awaits.
pub struct HttpResponder {
    tx: oneshot::Sender<Value>,
}

impl HttpResponder {
    pub fn new(tx: oneshot::Sender<Value>) -> Self {
        Self { tx }
    }
}

impl Responder for HttpResponder {
    fn finish(self: Box<Self>, body: Value) {
        if self.tx.send(body).is_err() {
            // The client hung up before we had anything to say.
            debug!("response dropped, client connection already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_body_to_waiting_receiver() {
        let (tx, rx) = oneshot::channel();
        let responder: Box<dyn Responder> = Box::new(HttpResponder::new(tx));
        responder.finish(Value::Bool(true));
        assert_eq!(rx.await.unwrap(), Value::Bool(true));
    }

    #[test]
    fn tolerates_dropped_receiver() {
        let (tx, rx) = oneshot::channel::<Value>();
        drop(rx);
        let responder: Box<dyn Responder> = Box::new(HttpResponder::new(tx));
        responder.finish(Value::Null);
    }
}
