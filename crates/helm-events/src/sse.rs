//! Server-sent-events framing of a subscription

use crate::bus::Subscription;
use crate::event::{BusEvent, EventEnvelope};
use futures::Stream;

/// Turn a subscription into SSE frames
///
/// When `task_filter` is set, events for other orchestrations are skipped;
/// useful on the wildcard topic.
pub fn sse_frames(
    subscription: Subscription,
    source: impl Into<String>,
    task_filter: Option<String>,
) -> impl Stream<Item = String> {
    let source = source.into();
    futures::stream::unfold(subscription, move |mut sub| {
        let source = source.clone();
        let task_filter = task_filter.clone();
        async move {
            loop {
                let event = sub.recv().await?;
                if !matches_task(&event, task_filter.as_deref()) {
                    continue;
                }
                match EventEnvelope::from_bus(source.clone(), event).to_sse_frame() {
                    Ok(frame) => return Some((frame, sub)),
                    Err(e) => tracing::warn!(error = %e, "dropping unserializable event"),
                }
            }
        }
    })
}

fn matches_task(event: &BusEvent, filter: Option<&str>) -> bool {
    filter.map_or(true, |id| event.task_id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BroadcastEventBus, EventBus, Topic};
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn filters_by_task_on_wildcard() {
        let bus = BroadcastEventBus::new(16);
        let sub = bus.subscribe(Topic::All).await.unwrap();
        let mut frames = Box::pin(sse_frames(sub, "orchestrator", Some("o2".into())));

        bus.publish(BusEvent::new("log", "o1", json!("skip"))).await.unwrap();
        bus.publish(BusEvent::new("log", "o2", json!("keep"))).await.unwrap();

        let frame = frames.next().await.unwrap();
        assert!(frame.contains("\"taskId\":\"o2\""));
        assert!(frame.contains("\"keep\""));
    }
}
