use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Toast { level: ToastLevel, message: String },
    SubscriptionFailed { source: String, error: String },
    UploadFailed { file_name: String, error: String },
}

pub type EventSink = mpsc::UnboundedSender<UiEvent>;

pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<UiEvent>) {
    mpsc::unbounded_channel()
}

pub fn emit_event(sink: &EventSink, event: UiEvent) {
    if let Err(e) = sink.send(event) {
        tracing::debug!(event = ?e.0, "No UI listening, event dropped");
    }
}
