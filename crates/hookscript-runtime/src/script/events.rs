//! Event counting, wait-for-event and teardown flush

use super::scope::Scope;
use super::Core;
use crate::eventlog::BridgeEvent;
use crate::value::{ByteBuffer, ScriptError, Value};

/// Called once the last pin is released after an incomplete flush
pub type FlushNotify = Box<dyn FnOnce() + Send>;

pub(crate) struct EventState {
    count: u64,
    source_available: bool,
}

impl EventState {
    pub(crate) fn new() -> Self {
        EventState {
            count: 0,
            source_available: true,
        }
    }
}

impl Core {
    /// Number of events delivered so far
    pub fn event_count(&self) -> u64 {
        self.events.lock().count
    }

    fn bump_event_count(&self) {
        self.events.lock().count += 1;
        self.event_cond.notify_all();
    }

    /// Deliver a host message to the inbound sink
    ///
    /// Waiters are woken only when a sink actually received the message.
    pub fn post(&self, message: &str, data: Option<Vec<u8>>) {
        let delivered = {
            let scope = self.enter();
            let sink = self.message_sink.lock().clone();
            match sink {
                Some(sink) => {
                    let data = data.map_or(Value::Null, |bytes| Value::Bytes(ByteBuffer::from_vec(bytes)));
                    let _ = scope.call(&sink, &Value::Undefined, &[Value::string(message), data]);
                    true
                }
                None => false,
            }
        };

        self.logger.log(BridgeEvent::MessagePosted {
            length: message.len(),
            delivered,
        });
        if delivered {
            self.bump_event_count();
        }
    }

    /// Block until the next event is delivered
    ///
    /// Pending work in the caller's scope is drained first, then the scope is
    /// suspended for the wait so deliveries from other threads can enter.
    /// On a scheduler thread the loop keeps running while this one waits.
    pub fn wait_for_event(&self, scope: &Scope<'_>) -> Result<(), ScriptError> {
        scope.perform_current_pending_io();

        let start_count = self.events.lock().count;
        let suspended = scope.suspend();
        let source_available = if self.scheduler.is_loop_thread() {
            tokio::task::block_in_place(|| self.await_event(start_count))
        } else {
            self.await_event(start_count)
        };
        suspended.resume();

        if source_available {
            Ok(())
        } else {
            Err(ScriptError::Unloading)
        }
    }

    /// Returns whether events can still arrive
    fn await_event(&self, start_count: u64) -> bool {
        let mut events = self.events.lock();
        while events.count == start_count && events.source_available {
            self.event_cond.wait(&mut events);
        }
        events.source_available
    }

    /// Tear down scheduled work ahead of unload
    ///
    /// Returns true when nothing else holds the instance. Otherwise `notify`
    /// runs on the scheduler once the last outstanding pin is released.
    pub fn flush(&self, scope: &Scope<'_>, notify: Option<FlushNotify>) -> bool {
        self.state.lock().flush_notify = notify;

        self.events.lock().source_available = false;
        self.event_cond.notify_all();

        self.logger.log(BridgeEvent::FlushRequested {
            pins: self.usage_count(),
        });

        if self.usage_count() > 1 {
            return false;
        }

        let sources: Vec<_> = self.scheduled.lock().drain().map(|(_, source)| source).collect();
        for source in sources {
            self.pin();
            source.destroy();
        }

        if self.usage_count() > 1 {
            return false;
        }

        self.clear_all_weak_refs(scope);

        let done = self.usage_count() == 1;
        if done {
            self.state.lock().flush_notify = None;
            self.module_data.lock().clear();
            self.logger.log(BridgeEvent::FlushCompleted);
        }
        done
    }
}
