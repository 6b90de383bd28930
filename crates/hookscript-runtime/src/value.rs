//! Script value representation
//!
//! The values that cross the native bridge.
//! - Undefined, Null, Bool, Number: immediates
//! - Int64 / UInt64 / Pointer: `Copy` wrappers for native-width integers
//! - String: `Arc<str>`, immutable
//! - Array: copy-on-write (`ValueArray`), value semantics
//! - Object / Function: shared, compared by identity, able to carry hidden
//!   attachments whose lifetime follows the value's
//! - Bytes: owned copy or borrowed view of native memory
//! - NativeFunction / NativeCallback: bridge objects that are also pointer-like

use crate::exceptor::NativeException;
use crate::ffi::callbacks::NativeCallback;
use crate::ffi::caller::NativeFunction;
use crate::ffi::int64::{Int64, UInt64};
use crate::ffi::pointer::NativePointer;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque data whose drop is tied to a heap value's lifetime
pub type Attachment = Box<dyn Any + Send + Sync>;

/// Copy-on-write array. Cheap to clone (refcount bump).
#[derive(Clone, Default)]
pub struct ValueArray(Arc<Vec<Value>>);

impl ValueArray {
    pub fn new() -> Self {
        ValueArray(Arc::new(Vec::new()))
    }

    pub fn from_vec(v: Vec<Value>) -> Self {
        ValueArray(Arc::new(v))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Mutating access; clones the backing Vec if shared.
    pub fn push(&mut self, value: Value) {
        Arc::make_mut(&mut self.0).push(value);
    }
}

impl PartialEq for ValueArray {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice() == other.0.as_slice()
    }
}

impl From<Vec<Value>> for ValueArray {
    fn from(v: Vec<Value>) -> Self {
        ValueArray::from_vec(v)
    }
}

impl FromIterator<Value> for ValueArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueArray(Arc::new(iter.into_iter().collect()))
    }
}

#[derive(Default)]
struct ObjectInner {
    properties: RwLock<BTreeMap<String, Value>>,
    attachments: Mutex<Vec<Attachment>>,
}

/// Shared property bag with identity
#[derive(Clone, Default)]
pub struct ObjectRef(Arc<ObjectInner>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let properties = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        ObjectRef(Arc::new(ObjectInner {
            properties: RwLock::new(properties),
            attachments: Mutex::new(Vec::new()),
        }))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.properties.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.properties.write().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.properties.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.properties.read().keys().cloned().collect()
    }

    /// Tie `attachment` to this object; it is dropped with the last reference.
    pub fn attach(&self, attachment: Attachment) {
        self.0.attachments.lock().push(attachment);
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .properties
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Body of a script function: `(this, args) -> result`
pub type ScriptFn = dyn Fn(&Value, &[Value]) -> Result<Value, ScriptError> + Send + Sync;

struct FunctionInner {
    name: String,
    body: Box<ScriptFn>,
    attachments: Mutex<Vec<Attachment>>,
}

/// Shared callable with identity
///
/// Calling a `Function` directly does not enter the engine; use
/// [`Scope::call`](crate::script::Scope::call) from native-triggered entry points.
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

impl Function {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Function(Arc::new(FunctionInner {
            name: name.into(),
            body: Box::new(body),
            attachments: Mutex::new(Vec::new()),
        }))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        (self.0.body)(this, args)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn attach(&self, attachment: Attachment) {
        self.0.attachments.lock().push(attachment);
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

enum BufferStorage {
    Owned(Box<[u8]>),
    Foreign { base: NativePointer, len: usize },
}

/// Byte buffer handed to or received from scripts
#[derive(Clone)]
pub struct ByteBuffer(Arc<BufferStorage>);

impl ByteBuffer {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        ByteBuffer(Arc::new(BufferStorage::Owned(bytes.into_boxed_slice())))
    }

    /// Wrap native memory without copying
    ///
    /// # Safety
    ///
    /// `base..base + len` must stay readable and unmodified by others for as
    /// long as any clone of the returned buffer is alive.
    pub unsafe fn from_raw(base: NativePointer, len: usize) -> Self {
        ByteBuffer(Arc::new(BufferStorage::Foreign { base, len }))
    }

    /// Base address of the bytes
    pub fn as_ptr(&self) -> NativePointer {
        match &*self.0 {
            BufferStorage::Owned(bytes) => NativePointer::from_ptr(bytes.as_ptr()),
            BufferStorage::Foreign { base, .. } => *base,
        }
    }

    pub fn len(&self) -> usize {
        match &*self.0 {
            BufferStorage::Owned(bytes) => bytes.len(),
            BufferStorage::Foreign { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &*self.0 {
            BufferStorage::Owned(bytes) => bytes,
            BufferStorage::Foreign { len: 0, .. } => &[],
            // SAFETY: upheld by the contract of `from_raw`.
            BufferStorage::Foreign { base, len } => unsafe {
                std::slice::from_raw_parts(base.as_ptr::<u8>(), *len)
            },
        }
    }

    pub fn ptr_eq(&self, other: &ByteBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Script value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Int64(Int64),
    UInt64(UInt64),
    Pointer(NativePointer),
    Array(ValueArray),
    Object(ObjectRef),
    Function(Function),
    Bytes(ByteBuffer),
    NativeFunction(Arc<NativeFunction>),
    NativeCallback(Arc<NativeCallback>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(ValueArray::from_vec(items))
    }

    pub fn object<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(ObjectRef::from_pairs(pairs))
    }

    pub fn pointer(address: usize) -> Value {
        Value::Pointer(NativePointer::new(address))
    }

    pub fn function<F>(name: impl Into<String>, body: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, body))
    }

    /// An error object carrying `message`
    pub fn error(message: impl AsRef<str>) -> Value {
        Value::object([("message", Value::string(message))])
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Pointer(_) => "NativePointer",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Bytes(_) => "ArrayBuffer",
            Value::NativeFunction(_) => "NativeFunction",
            Value::NativeCallback(_) => "NativeCallback",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Heap values have identity and can carry attachments
    pub fn is_heap_value(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Function(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Pointer-like coercion
    ///
    /// `null`, pointers, native functions (their target), native callbacks
    /// (their trampoline) and objects with a pointer-like `handle` property.
    pub fn as_native_pointer(&self) -> Option<NativePointer> {
        match self {
            Value::Null => Some(NativePointer::NULL),
            Value::Pointer(p) => Some(*p),
            Value::NativeFunction(f) => Some(f.address()),
            Value::NativeCallback(c) => Some(c.address()),
            Value::Object(o) => match o.get("handle")? {
                Value::Object(_) => None,
                handle => handle.as_native_pointer(),
            },
            _ => None,
        }
    }

    /// Lossy JSON view used for outbound message payloads
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::Int64(v) => Json::String(v.to_json()),
            Value::UInt64(v) => Json::String(v.to_json()),
            Value::Pointer(p) => Json::String(p.to_json()),
            Value::NativeFunction(_) | Value::NativeCallback(_) => self
                .as_native_pointer()
                .map(|p| Json::String(p.to_json()))
                .unwrap_or(Json::Null),
            Value::Array(items) => Json::Array(items.as_slice().iter().map(Value::to_json).collect()),
            Value::Object(o) => Json::Object(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
            Value::Function(_) | Value::Bytes(_) => Json::Null,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Pointer(p) => write!(f, "{}", p),
            Value::Array(items) => {
                let parts: Vec<String> = items.as_slice().iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(o) => match o.get("message") {
                Some(Value::String(message)) => write!(f, "Error: {}", message),
                _ => write!(f, "[object Object]"),
            },
            Value::Function(func) => write!(f, "function {}()", func.name()),
            Value::Bytes(_) => write!(f, "[object ArrayBuffer]"),
            Value::NativeFunction(func) => write!(f, "{}", func.address()),
            Value::NativeCallback(cb) => write!(f, "{}", cb.address()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Int64(v) => write!(f, "Int64({})", v.0),
            Value::UInt64(v) => write!(f, "UInt64({})", v.0),
            Value::Pointer(p) => write!(f, "{:?}", p),
            Value::Array(items) => f.debug_list().entries(items.as_slice()).finish(),
            Value::Object(o) => {
                let mut map = f.debug_map();
                for (k, v) in o.entries() {
                    map.entry(&k, &v);
                }
                map.finish()
            }
            Value::Function(func) => write!(f, "Function({})", func.name()),
            Value::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Value::NativeFunction(func) => write!(f, "NativeFunction({})", func.address()),
            Value::NativeCallback(cb) => write!(f, "NativeCallback({})", cb.address()),
        }
    }
}

/// Equality contract
///
/// Immediates, strings, wrappers and arrays compare by value. Objects,
/// functions, buffers and bridge objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.ptr_eq(b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Arc::ptr_eq(a, b),
            (Value::NativeCallback(a), Value::NativeCallback(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<NativePointer> for Value {
    fn from(p: NativePointer) -> Self {
        Value::Pointer(p)
    }
}

/// Errors surfaced to scripts as thrown exceptions
#[derive(Debug, Error, Clone)]
pub enum ScriptError {
    #[error("bad argument count")]
    BadArgumentCount,

    #[error("invalid type specified")]
    InvalidType,

    #[error("only one variadic marker may be specified, and can not be the first argument")]
    UnexpectedMarker,

    #[error("invalid abi specified")]
    InvalidAbi,

    #[error("failed to compile function call interface")]
    CompileFailed,

    #[error("failed to allocate closure")]
    ClosureAllocFailed,

    #[error("failed to prepare closure")]
    ClosurePrepareFailed,

    /// Value of the wrong shape, e.g. "expected a pointer"
    #[error("expected {0}")]
    Expected(&'static str),

    #[error("expected an array with {0} elements")]
    ExpectedFields(usize),

    #[error("expected string or object containing options")]
    ExpectedOptions,

    /// Unrecognized behavior option, e.g. "invalid scheduling behavior value"
    #[error("{0}")]
    InvalidOption(&'static str),

    #[error("invalid receiver")]
    InvalidReceiver,

    #[error("unsupported radix")]
    UnsupportedRadix,

    #[error("expected a heap value")]
    ExpectedHeapValue,

    #[error("invalid key")]
    InvalidKey,

    #[error("script is unloading")]
    Unloading,

    #[error("not inside a script scope")]
    NoActiveScope,

    /// A hardware fault converted by the exception-steal policy
    #[error("{0}")]
    NativeException(NativeException),

    /// A value thrown by script code
    #[error("{0}")]
    Thrown(Value),
}

impl ScriptError {
    /// The value a script `catch` clause (or sink) sees for this error
    pub fn to_value(&self) -> Value {
        match self {
            ScriptError::Thrown(value) => value.clone(),
            ScriptError::NativeException(exception) => {
                let mut fields = vec![
                    ("message", Value::string(exception.to_string())),
                    ("type", Value::string(exception.kind.type_name())),
                    ("address", Value::Pointer(exception.address)),
                ];
                if let Some(operation) = exception.memory_operation {
                    fields.push(("memory", Value::object([(
                        "operation",
                        Value::string(operation.as_str()),
                    )])));
                }
                Value::object(fields)
            }
            other => Value::error(other.to_string()),
        }
    }
}

impl From<NativeException> for ScriptError {
    fn from(exception: NativeException) -> Self {
        ScriptError::NativeException(exception)
    }
}
