//! Weak reference bookkeeping
//!
//! Binding attaches a token to the target heap value. When the target is
//! collected the token drops and removes its entry, running the callback
//! exactly once; flush does the same for every entry left. An explicit unbind
//! removes the entry silently.

use super::scope::Scope;
use super::Core;
use crate::eventlog::BridgeEvent;
use crate::value::{Function, ScriptError, Value};
use std::sync::atomic::Ordering;
use std::sync::Weak;

pub(crate) struct WeakRefEntry {
    callback: Function,
}

/// Lives in the target's attachments; its drop marks the target collected
struct WeakRefToken {
    id: u32,
    core: Weak<Core>,
}

impl Drop for WeakRefToken {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            if core.remove_weak_ref(self.id) {
                core.logger.log(BridgeEvent::WeakRefCleared { id: self.id });
            }
        }
    }
}

impl Core {
    /// Watch `target` and call `callback` once it is gone
    pub fn weak_ref_bind(&self, target: &Value, callback: Function) -> Result<u32, ScriptError> {
        if !target.is_heap_value() {
            return Err(ScriptError::ExpectedHeapValue);
        }

        let id = self.next_weak_ref_id.fetch_add(1, Ordering::SeqCst);
        self.weak_refs.lock().insert(id, WeakRefEntry { callback });

        let token = Box::new(WeakRefToken {
            id,
            core: self.downgrade(),
        });
        if let Value::Object(object) = target {
            object.attach(token);
        } else if let Value::Function(func) = target {
            func.attach(token);
        }

        self.logger.log(BridgeEvent::WeakRefBound { id });
        Ok(id)
    }

    /// Drop a binding ahead of collection; its callback never runs
    ///
    /// Returns whether a binding with that id existed.
    pub fn weak_ref_unbind(&self, id: u32) -> bool {
        let removed = self.weak_refs.lock().remove(&id).is_some();
        if removed {
            self.logger.log(BridgeEvent::WeakRefUnbound { id });
        }
        removed
    }

    /// Live weak reference bindings
    pub fn weak_ref_count(&self) -> usize {
        self.weak_refs.lock().len()
    }

    fn remove_weak_ref(&self, id: u32) -> bool {
        let entry = self.weak_refs.lock().remove(&id);
        match entry {
            Some(entry) => {
                let scope = self.enter();
                let _ = scope.call(&entry.callback, &Value::Undefined, &[]);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_all_weak_refs(&self, scope: &Scope<'_>) {
        let entries: Vec<(u32, WeakRefEntry)> = self.weak_refs.lock().drain().collect();
        for (id, entry) in entries {
            let _ = scope.call(&entry.callback, &Value::Undefined, &[]);
            self.logger.log(BridgeEvent::WeakRefCleared { id });
        }
    }
}
