use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iris_contracts::chat::FollowUpAction;

use crate::service::ServiceError;

/// Where the user sees the answer. Calls arrive in the order the user should
/// see them.
pub trait ChatSink {
    fn emit_text(&mut self, text: &str);
    fn emit_inline_image(&mut self, path: &Path);
    fn offer_action(&mut self, action: &FollowUpAction);
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedResponse {
    pub text: String,
    pub fragments: usize,
    pub cancelled: bool,
}

/// Forwards every fragment to the sink as it arrives and keeps the
/// concatenation. `cancel` is checked before each fragment is requested;
/// once set, no further fragment is read and the partial text is returned.
pub fn aggregate_stream<I>(
    fragments: I,
    sink: &mut dyn ChatSink,
    cancel: &CancellationToken,
) -> Result<AggregatedResponse, ServiceError>
where
    I: IntoIterator<Item = Result<String, ServiceError>>,
{
    let mut response = AggregatedResponse::default();
    let mut fragments = fragments.into_iter();
    loop {
        if cancel.is_cancelled() {
            response.cancelled = true;
            break;
        }
        let Some(fragment) = fragments.next() else {
            break;
        };
        let fragment = fragment?;
        response.fragments += 1;
        sink.emit_text(&fragment);
        response.text.push_str(&fragment);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::{RecordingSink, SinkEvent};

    fn ok(items: &[&str]) -> Vec<Result<String, ServiceError>> {
        items.iter().map(|item| Ok(item.to_string())).collect()
    }

    #[test]
    fn forwards_fragments_and_concatenates() -> anyhow::Result<()> {
        let mut sink = RecordingSink::default();
        let response = aggregate_stream(
            ok(&["Hel", "lo ", "world"]),
            &mut sink,
            &CancellationToken::new(),
        )?;

        assert_eq!(response.text, "Hello world");
        assert_eq!(response.fragments, 3);
        assert!(!response.cancelled);
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Text("Hel".to_string()),
                SinkEvent::Text("lo ".to_string()),
                SinkEvent::Text("world".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_fragments_are_forwarded_verbatim() -> anyhow::Result<()> {
        let mut sink = RecordingSink::default();
        let response =
            aggregate_stream(ok(&["", "a", ""]), &mut sink, &CancellationToken::new())?;

        assert_eq!(response.text, "a");
        assert_eq!(response.fragments, 3);
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Text(String::new()),
                SinkEvent::Text("a".to_string()),
                SinkEvent::Text(String::new()),
            ]
        );
        Ok(())
    }

    #[test]
    fn stream_error_propagates_after_earlier_text() {
        let mut sink = RecordingSink::default();
        let fragments = vec![
            Ok("partial".to_string()),
            Err(ServiceError::Stream("boom".to_string())),
            Ok("never".to_string()),
        ];

        let result = aggregate_stream(fragments, &mut sink, &CancellationToken::new());

        assert!(matches!(result, Err(ServiceError::Stream(message)) if message == "boom"));
        assert_eq!(sink.events, vec![SinkEvent::Text("partial".to_string())]);
    }

    struct CancellingSink {
        inner: RecordingSink,
        cancel: CancellationToken,
    }

    impl ChatSink for CancellingSink {
        fn emit_text(&mut self, text: &str) {
            self.inner.emit_text(text);
            self.cancel.cancel();
        }

        fn emit_inline_image(&mut self, path: &Path) {
            self.inner.emit_inline_image(path);
        }

        fn offer_action(&mut self, action: &FollowUpAction) {
            self.inner.offer_action(action);
        }
    }

    #[test]
    fn cancellation_stops_before_the_next_read() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let pulls = Cell::new(0);
        let fragments = ok(&["one", "two", "three"]).into_iter().inspect(|_| {
            pulls.set(pulls.get() + 1);
        });
        let mut sink = CancellingSink {
            inner: RecordingSink::default(),
            cancel: cancel.clone(),
        };

        let response = aggregate_stream(fragments, &mut sink, &cancel)?;

        assert!(response.cancelled);
        assert_eq!(response.text, "one");
        assert_eq!(pulls.get(), 1);
        assert_eq!(sink.inner.events, vec![SinkEvent::Text("one".to_string())]);
        Ok(())
    }

    #[test]
    fn cancelled_token_reads_nothing() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pulls = Cell::new(0);
        let fragments = ok(&["one", "two"]).into_iter().inspect(|_| {
            pulls.set(pulls.get() + 1);
        });
        let mut sink = RecordingSink::default();

        let response = aggregate_stream(fragments, &mut sink, &cancel)?;

        assert_eq!(pulls.get(), 0);
        assert!(response.cancelled);
        assert_eq!(response.text, "");
        assert!(sink.events.is_empty());
        Ok(())
    }
}
