use serde_json::Value;
use tokio::sync::oneshot;

/// A message sent to the rendering worker.
#[derive(Debug)]
pub enum RenderRequest {
    /// Render one request and answer on `response`.
    Render {
        message: Value,
        response: oneshot::Sender<Value>,
    },

    /// Stop the worker. `response` is acknowledged once it has stopped taking
    /// requests.
    Shutdown { response: oneshot::Sender<()> },
}
