//! Seams to the external collaborators: the render sink and the frame producer.

use async_trait::async_trait;

use crate::credit::ProducerHandle;
use crate::error::ProducerFailure;
use crate::frame::Frame;
use crate::types::DecodeSource;

/// Consumer of displayed frames (pixel conversion, GPU upload, presentation).
///
/// Calls are synchronous from the scheduler's point of view: `display` returns once
/// the sink no longer needs the frame.
pub trait RenderSink: Send {
    fn display(&mut self, frame: &Frame);

    /// Remove whatever is on screen.
    fn clear(&mut self);
}

/// A decoder running as an independent task.
///
/// Contract:
/// - call [`ProducerHandle::emit_started`] once decoding begins,
/// - emit at most one frame per [`ProducerHandle::acquire_credit`] that returned
///   `Granted`,
/// - return promptly once `acquire_credit` yields `Stopped` or
///   [`ProducerHandle::is_stop_requested`] is true.
///
/// Returning an error reports it as [`crate::ProducerEvent::Failed`]. End of stream is
/// signalled automatically when the handle is dropped.
#[async_trait]
pub trait FrameProducer: Send + Sync {
    async fn run(
        &self,
        source: DecodeSource,
        handle: &mut ProducerHandle,
    ) -> Result<(), ProducerFailure>;
}
