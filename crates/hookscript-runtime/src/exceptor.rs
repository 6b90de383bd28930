//! Native fault capture for exception-stealing calls
//!
//! An [`Exceptor`] runs a body and reports a hardware fault raised inside it
//! as a [`NativeException`] instead of letting the process die.
//!
//! On Linux (glibc, x86-64) [`SignalExceptor`] runs the body on a dedicated
//! stack with a guard page. Fault signals raised while a guarded body is
//! active jump straight back to the caller's saved context; faults anywhere
//! else are forwarded to whatever handler was installed before ours.
//! Elsewhere [`UnguardedExceptor`] runs the body directly.

use crate::ffi::pointer::NativePointer;
use std::fmt;
use std::sync::Arc;

/// Category of a captured fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    AccessViolation,
    IllegalInstruction,
    Arithmetic,
    Breakpoint,
}

impl ExceptionKind {
    /// Value of the `type` field on the script-side error object
    pub fn type_name(self) -> &'static str {
        match self {
            ExceptionKind::AccessViolation => "access-violation",
            ExceptionKind::IllegalInstruction => "illegal-instruction",
            ExceptionKind::Arithmetic => "arithmetic",
            ExceptionKind::Breakpoint => "breakpoint",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ExceptionKind::AccessViolation => "access violation",
            ExceptionKind::IllegalInstruction => "illegal instruction",
            ExceptionKind::Arithmetic => "arithmetic error",
            ExceptionKind::Breakpoint => "breakpoint triggered",
        }
    }
}

/// Memory access that caused an access violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOperation {
    Read,
    Write,
    Execute,
}

impl MemoryOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryOperation::Read => "read",
            MemoryOperation::Write => "write",
            MemoryOperation::Execute => "execute",
        }
    }
}

/// A hardware fault captured during a native call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeException {
    pub kind: ExceptionKind,
    /// Faulting data address for access violations, program counter otherwise
    pub address: NativePointer,
    pub memory_operation: Option<MemoryOperation>,
}

impl fmt::Display for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExceptionKind::AccessViolation => {
                write!(f, "{} accessing {}", self.kind.description(), self.address)
            }
            kind => write!(f, "{} at {}", kind.description(), self.address),
        }
    }
}

/// Runs a body with hardware faults converted to errors
pub trait Exceptor: Send + Sync {
    fn try_call(&self, body: &mut dyn FnMut()) -> Result<(), NativeException>;
}

/// Runs the body with no protection; any fault is fatal
#[derive(Debug, Default, Clone, Copy)]
pub struct UnguardedExceptor;

impl Exceptor for UnguardedExceptor {
    fn try_call(&self, body: &mut dyn FnMut()) -> Result<(), NativeException> {
        body();
        Ok(())
    }
}

/// The best exceptor available on this platform
pub fn platform_exceptor(stack_size: usize) -> Arc<dyn Exceptor> {
    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    {
        Arc::new(SignalExceptor::new(stack_size))
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64")))]
    {
        let _ = stack_size;
        Arc::new(UnguardedExceptor)
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
pub use signal::SignalExceptor;

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
mod signal {
    use super::{ExceptionKind, Exceptor, MemoryOperation, NativeException, UnguardedExceptor};
    use crate::ffi::pointer::NativePointer;
    use libc::{c_int, c_void, siginfo_t, ucontext_t};
    use std::cell::{Cell, RefCell};
    use std::mem::MaybeUninit;
    use std::ptr;
    use std::sync::OnceLock;

    const FAULT_SIGNALS: [c_int; 5] = [
        libc::SIGSEGV,
        libc::SIGBUS,
        libc::SIGILL,
        libc::SIGFPE,
        libc::SIGTRAP,
    ];

    /// Handlers that were installed before ours, in `FAULT_SIGNALS` order
    static PREVIOUS: OnceLock<Vec<(c_int, libc::sigaction)>> = OnceLock::new();

    thread_local! {
        static CURRENT: Cell<*mut c_void> = const { Cell::new(ptr::null_mut()) };
        static STACKS: RefCell<Vec<GuardStack>> = const { RefCell::new(Vec::new()) };
    }

    struct GuardFrame<'a> {
        caller: ucontext_t,
        callee: ucontext_t,
        body: &'a mut dyn FnMut(),
        fault: Option<NativeException>,
    }

    /// mmap'd stack whose lowest page is inaccessible
    struct GuardStack {
        base: *mut c_void,
        mapped: usize,
        page: usize,
    }

    impl GuardStack {
        fn map(size: usize) -> Option<GuardStack> {
            // SAFETY: plain anonymous mapping, checked before use.
            unsafe {
                let page = libc::sysconf(libc::_SC_PAGESIZE).max(4096) as usize;
                let usable = size.div_ceil(page) * page;
                let mapped = usable + page;
                let base = libc::mmap(
                    ptr::null_mut(),
                    mapped,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                    -1,
                    0,
                );
                if base == libc::MAP_FAILED {
                    return None;
                }
                if libc::mprotect(base, page, libc::PROT_NONE) != 0 {
                    libc::munmap(base, mapped);
                    return None;
                }
                Some(GuardStack { base, mapped, page })
            }
        }

        fn usable(&self) -> usize {
            self.mapped - self.page
        }
    }

    impl Drop for GuardStack {
        fn drop(&mut self) {
            // SAFETY: mapping owned exclusively by this value.
            unsafe {
                libc::munmap(self.base, self.mapped);
            }
        }
    }

    /// Signal-based exceptor running guarded bodies on a private stack
    #[derive(Debug)]
    pub struct SignalExceptor {
        stack_size: usize,
    }

    impl SignalExceptor {
        pub fn new(stack_size: usize) -> Self {
            SignalExceptor { stack_size }
        }

        fn acquire_stack(&self) -> Option<GuardStack> {
            let pooled = STACKS.with(|stacks| {
                let mut stacks = stacks.borrow_mut();
                let index = stacks.iter().position(|s| s.usable() >= self.stack_size)?;
                Some(stacks.swap_remove(index))
            });
            pooled.or_else(|| GuardStack::map(self.stack_size))
        }

        fn release_stack(stack: GuardStack) {
            STACKS.with(|stacks| stacks.borrow_mut().push(stack));
        }
    }

    impl Exceptor for SignalExceptor {
        fn try_call(&self, body: &mut dyn FnMut()) -> Result<(), NativeException> {
            install_handlers();

            let Some(stack) = self.acquire_stack() else {
                return UnguardedExceptor.try_call(body);
            };

            // SAFETY: both contexts are fully initialized by getcontext before
            // use; the frame stays on this stack frame until swapcontext returns.
            let fault = unsafe {
                let mut frame = GuardFrame {
                    caller: MaybeUninit::zeroed().assume_init(),
                    callee: MaybeUninit::zeroed().assume_init(),
                    body,
                    fault: None,
                };

                if libc::getcontext(&mut frame.callee) != 0 {
                    Self::release_stack(stack);
                    return UnguardedExceptor.try_call(frame.body);
                }
                frame.callee.uc_stack.ss_sp = (stack.base as *mut u8).add(stack.page) as *mut c_void;
                frame.callee.uc_stack.ss_size = stack.usable();
                frame.callee.uc_stack.ss_flags = 0;
                frame.callee.uc_link = &mut frame.caller;
                libc::makecontext(&mut frame.callee, guarded_entry, 0);

                let previous = CURRENT.with(|c| c.replace(&mut frame as *mut GuardFrame<'_> as *mut c_void));
                libc::swapcontext(&mut frame.caller, &frame.callee);
                CURRENT.with(|c| c.set(previous));

                // Written by the fault handler behind the compiler's back.
                ptr::read_volatile(ptr::addr_of!(frame.fault))
            };

            Self::release_stack(stack);
            match fault {
                Some(exception) => Err(exception),
                None => Ok(()),
            }
        }
    }

    extern "C" fn guarded_entry() {
        let frame = CURRENT.with(|c| c.get()) as *mut GuardFrame<'static>;
        // SAFETY: set by try_call immediately before switching here.
        unsafe {
            ((*frame).body)();
        }
    }

    fn install_handlers() {
        PREVIOUS.get_or_init(|| {
            let mut previous = Vec::with_capacity(FAULT_SIGNALS.len());
            for signal in FAULT_SIGNALS {
                // SAFETY: installing a SA_SIGINFO handler with a valid function.
                unsafe {
                    let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
                    action.sa_sigaction = handle_fault as usize;
                    action.sa_flags = libc::SA_SIGINFO;
                    libc::sigemptyset(&mut action.sa_mask);
                    let mut old: libc::sigaction = MaybeUninit::zeroed().assume_init();
                    if libc::sigaction(signal, &action, &mut old) == 0 {
                        previous.push((signal, old));
                    }
                }
            }
            previous
        });
    }

    extern "C" fn handle_fault(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
        let frame = CURRENT.with(|c| c.get()) as *mut GuardFrame<'static>;
        if frame.is_null() {
            forward(signal, info, context);
            return;
        }

        // SAFETY: kernel-provided siginfo and ucontext; frame is live while
        // CURRENT points at it.
        unsafe {
            (*frame).fault = Some(describe(signal, &*info, &*(context as *const ucontext_t)));
            libc::setcontext(&(*frame).caller);
        }
        // setcontext only returns on failure; the fault would recur.
        reset_to_default(signal);
    }

    unsafe fn describe(signal: c_int, info: &siginfo_t, context: &ucontext_t) -> NativeException {
        let gregs = &context.uc_mcontext.gregs;
        let pc = gregs[libc::REG_RIP as usize] as usize;
        match signal {
            libc::SIGSEGV | libc::SIGBUS => {
                let address = info.si_addr() as usize;
                let operation = if address == pc {
                    MemoryOperation::Execute
                } else if gregs[libc::REG_ERR as usize] & 2 != 0 {
                    MemoryOperation::Write
                } else {
                    MemoryOperation::Read
                };
                NativeException {
                    kind: ExceptionKind::AccessViolation,
                    address: NativePointer::new(address),
                    memory_operation: Some(operation),
                }
            }
            libc::SIGILL => fault_at(ExceptionKind::IllegalInstruction, pc),
            libc::SIGFPE => fault_at(ExceptionKind::Arithmetic, pc),
            _ => fault_at(ExceptionKind::Breakpoint, pc),
        }
    }

    fn fault_at(kind: ExceptionKind, pc: usize) -> NativeException {
        NativeException {
            kind,
            address: NativePointer::new(pc),
            memory_operation: None,
        }
    }

    fn forward(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
        let previous = PREVIOUS
            .get()
            .and_then(|handlers| handlers.iter().find(|(s, _)| *s == signal))
            .map(|(_, action)| *action);

        let Some(action) = previous else {
            reset_to_default(signal);
            return;
        };

        match action.sa_sigaction {
            libc::SIG_DFL | libc::SIG_IGN => {
                reset_to_default(signal);
                if signal == libc::SIGTRAP {
                    // The trap instruction has already retired; re-raise.
                    // SAFETY: raising a signal on the current thread.
                    unsafe {
                        libc::raise(signal);
                    }
                }
            }
            handler if action.sa_flags & libc::SA_SIGINFO != 0 => {
                // SAFETY: the previous owner registered this as a SA_SIGINFO handler.
                let handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void) =
                    unsafe { std::mem::transmute(handler) };
                handler(signal, info, context);
            }
            handler => {
                // SAFETY: the previous owner registered this as a plain handler.
                let handler: extern "C" fn(c_int) = unsafe { std::mem::transmute(handler) };
                handler(signal);
            }
        }
    }

    fn reset_to_default(signal: c_int) {
        // SAFETY: restoring the default disposition.
        unsafe {
            let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, ptr::null_mut());
        }
    }
}
