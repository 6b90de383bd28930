//! Unhandled-exception and inbound-message sinks

use super::Core;
use crate::eventlog::BridgeEvent;
use crate::value::{Function, ScriptError, Value};

impl Core {
    /// Replace the unhandled-exception sink; `None` removes it
    pub fn set_unhandled_exception_callback(&self, callback: Option<Function>) {
        let previous = std::mem::replace(&mut *self.exception_sink.lock(), callback);
        drop(previous);
    }

    /// Replace the inbound-message sink; `None` removes it
    pub fn set_incoming_message_callback(&self, callback: Option<Function>) {
        let previous = std::mem::replace(&mut *self.message_sink.lock(), callback);
        drop(previous);
    }

    /// Route an error nothing in script caught to the unhandled sink
    ///
    /// Without a sink the error is dropped. A sink that itself throws leaves
    /// the instance in an unrecoverable state and panics.
    pub fn report_unhandled(&self, error: &ScriptError) {
        let sink = self.exception_sink.lock().clone();

        self.logger.log(BridgeEvent::UnhandledException {
            message: error.to_string(),
            delivered: sink.is_some(),
        });

        if let Some(sink) = sink {
            if sink.call(&Value::Undefined, &[error.to_value()]).is_err() {
                panic!("Error handler crashed");
            }
        }
    }
}
