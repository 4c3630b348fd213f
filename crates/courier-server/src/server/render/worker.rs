use super::{markup, request::RenderRequest};
use core::time::Duration;
use courier::HostEvent;
use tokio::sync::mpsc;

/// The rendering resource: a task that answers [`RenderRequest`]s until it is
/// shut down, idles out, or every sender is dropped.
///
/// On exit it announces [`HostEvent::ResourceDisconnected`] on `events` so
/// the lifecycle controller's belief is reset.
///
/// # Arguments
///
/// - `_instance`: Sequence number of this instance, for logs.
/// - `rx`: Receiver through which [`RenderRequest`]s arrive.
/// - `idle`: Tear down after this long without a request. `None` never idles
///   out.
/// - `events`: Where the disconnect is announced.
pub async fn worker_loop(
    _instance: u64,
    mut rx: mpsc::Receiver<RenderRequest>,
    idle: Option<Duration>,
    events: mpsc::Sender<HostEvent>,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!("Rendering resource {_instance} started");

    loop {
        let next = match idle {
            Some(idle) => match tokio::time::timeout(idle, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Rendering resource {_instance} idle for {idle:?}, tearing down");
                    break;
                }
            },
            None => rx.recv().await,
        };

        match next {
            Some(RenderRequest::Render { message, response }) => {
                if response.send(markup::render(&message)).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Rendering resource {_instance}: requester went away");
                }
            }
            Some(RenderRequest::Shutdown { response }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Rendering resource {_instance} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Rendering resource {_instance} failed to acknowledge shutdown");
                }
                break;
            }
            None => break,
        }
    }

    // Close before announcing so the host already sees the old instance as
    // gone when the disconnect is processed.
    rx.close();
    if events.send(HostEvent::ResourceDisconnected).await.is_err() {
        #[cfg(feature = "tracing")]
        tracing::debug!("Rendering resource {_instance}: no one listening for disconnects");
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Rendering resource {_instance} stopped");
}
