// ── Event dispatch ──
//
// Fans one normalized event out to a copied list of handlers. No lock is
// held while handlers run, and every handler is isolated: a returned error
// or a panic is logged with channel and component context and never stops
// delivery to the rest.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::model::{ActiveSubscription, EventHandler, RealtimeEvent, SubscriptionId};

/// A handler captured for delivery, with the context used in logs.
#[derive(Debug, Clone)]
pub struct HandlerTarget {
    pub subscription_id: SubscriptionId,
    pub handler: EventHandler,
    pub component_tag: Arc<str>,
}

impl From<&ActiveSubscription> for HandlerTarget {
    fn from(sub: &ActiveSubscription) -> Self {
        Self {
            subscription_id: sub.id,
            handler: sub.handler.clone(),
            component_tag: Arc::clone(&sub.component_tag),
        }
    }
}

/// Delivery counters for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Targets skipped because the same handler already received the event.
    pub duplicates: usize,
}

/// Deliver `event` to each distinct handler in `targets`, in order.
pub fn deliver(event: &RealtimeEvent, targets: &[HandlerTarget]) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut seen = HashSet::with_capacity(targets.len());

    for target in targets {
        if !seen.insert(target.handler.id()) {
            report.duplicates += 1;
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| target.handler.call(event)));
        match outcome {
            Ok(Ok(())) => {
                report.delivered += 1;
                trace!(
                    channel = %event.channel(),
                    subscription = %target.subscription_id,
                    "event delivered"
                );
            }
            Ok(Err(e)) => {
                report.failed += 1;
                warn!(
                    channel = %event.channel(),
                    event = %event.event_name(),
                    component = %target.component_tag,
                    subscription = %target.subscription_id,
                    error = %e,
                    "event handler failed"
                );
            }
            Err(payload) => {
                report.failed += 1;
                warn!(
                    channel = %event.channel(),
                    event = %event.event_name(),
                    component = %target.component_tag,
                    subscription = %target.subscription_id,
                    panic = %panic_message(payload.as_ref()),
                    "event handler panicked"
                );
            }
        }
    }
    report
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::{DomainEvent, EVENT_CREATED};

    fn event() -> RealtimeEvent {
        RealtimeEvent::Domain(DomainEvent {
            channel: "events.global".into(),
            event_name: EVENT_CREATED.into(),
            event_id: Some("e1".into()),
            event_type: "recipe.updated".into(),
            entity_id: None,
            server_ts: Some(1),
            data: serde_json::Map::new(),
        })
    }

    fn target(id: u64, handler: &EventHandler) -> HandlerTarget {
        HandlerTarget {
            subscription_id: SubscriptionId(id),
            handler: handler.clone(),
            component_tag: Arc::from("Feed"),
        }
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let good = EventHandler::infallible(move |e| log.lock().unwrap().push(e.channel().to_owned()));
        let failing = EventHandler::new(|_| Err("nope".into()));
        let panicking = EventHandler::infallible(|_| panic!("handler blew up"));

        let report = deliver(
            &event(),
            &[target(1, &failing), target(2, &panicking), target(3, &good)],
        );

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(seen.lock().unwrap().as_slice(), ["events.global"]);
    }

    #[test]
    fn duplicate_handler_is_called_once() {
        let count = Arc::new(Mutex::new(0));
        let inner = Arc::clone(&count);
        let handler = EventHandler::infallible(move |_| *inner.lock().unwrap() += 1);

        let report = deliver(&event(), &[target(1, &handler), target(2, &handler)]);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn panic_message_reads_both_payload_types() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
