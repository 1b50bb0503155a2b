//! Execution-scoped context propagation.
//!
//! The host runtime schedules work as chains of asynchronous continuations.
//! This module maintains the synthetic notion of "the context of the logical
//! operation currently in progress" across those chains: a [`Context`] is
//! created when a logical task begins (an inbound request, a timer firing, a
//! scheduled continuation), made current for well-defined scopes, captured by
//! continuations registered inside those scopes, and restored whenever such a
//! continuation later runs.
//!
//! The correctness contract is: **the context visible inside a continuation
//! equals the context that was active when that continuation was
//! registered** — never the context of whichever unrelated task happens to be
//! running when the scheduler eventually invokes it. The pieces that uphold
//! it:
//!
//! - [`Context::attach`] makes a context current for a scope and restores the
//!   previous one when the returned [`ContextGuard`] drops, on every exit
//!   path including unwinding.
//! - [`Context::run_in_new_context`] runs a closure under a fresh, empty
//!   context, the entry point for work that starts a new logical task.
//! - [`Context::bind`] wraps a callback so the bind-time context is
//!   re-attached around every later invocation.
//! - [`FutureContextExt::with_context`] attaches a captured context around
//!   every poll of a future, covering each suspension point the task passes
//!   through.
//! - [`Context::restore`] is the explicit escape hatch for code paths where
//!   automatic capture is impossible (hand-rolled queues, custom schedulers):
//!   a manually captured context can be forced current again.
//!
//! When nothing was attached, operations observe an empty root context rather
//! than failing, so a trace can always be started from nothing.

use crate::fil_warn;
use crate::trace::scoped::ScopedSpan;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;


#[cfg(feature = "futures")]
mod future_ext;

#[cfg(feature = "futures")]
pub use future_ext::{FutureContextExt, StreamContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// The propagation-relevant state of one logical task.
///
/// A context carries at most one span scope: either a live span started by
/// the registry, or a remote trace identity decoded from the wire that no
/// local span has been created for yet. Contexts are immutable; the
/// `with_*` operations return extended copies.
///
/// A context is exclusively owned by the continuation chain that created it.
/// It may be captured (`Context` is `Clone + Send`) and later restored by
/// another task, but it is never implicitly shared: making it current is
/// always an explicit, scoped operation.
///
/// # Examples
///
/// ```
/// use filament::Context;
///
/// // Nothing attached yet: the empty root context is observed.
/// assert!(!Context::current().is_suppressed());
///
/// let result = Context::run_in_new_context(|| {
///     // Work in here runs under a fresh context.
///     "done"
/// });
/// assert_eq!(result, "done");
/// ```
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) span: Option<Arc<ScopedSpan>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the context current on this thread.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies `f` to the current context without cloning it.
    ///
    /// Attempting to attach another context from inside `f` will panic, as
    /// the current context is still borrowed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| cx.borrow().map_current_cx(f))
    }

    /// Makes this context the current one for the calling thread.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previously
    /// current context. Guards may be dropped out of order; the stack
    /// tolerates that and restores the correct context once the enclosing
    /// guard goes away.
    ///
    /// ```
    /// use filament::Context;
    ///
    /// let cx = Context::new();
    /// {
    ///     let _guard = cx.attach();
    ///     // `cx` is current here.
    /// }
    /// // ...and no longer current here.
    /// ```
    pub fn attach(self) -> ContextGuard {
        let pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));
        ContextGuard {
            pos,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` under a freshly created, empty context.
    ///
    /// This is the entry point for a new logical task: everything `f` does
    /// synchronously, and every continuation registered inside `f` (via
    /// [`Context::bind`] or [`FutureContextExt::with_current_context`]),
    /// observes the new context instead of whatever was current before.
    ///
    /// [`FutureContextExt::with_current_context`]:
    /// crate::context::FutureContextExt::with_current_context
    pub fn run_in_new_context<T>(f: impl FnOnce() -> T) -> T {
        let _guard = Context::new().attach();
        f()
    }

    /// Forces a manually captured context current for a scope.
    ///
    /// Automatic propagation covers continuations registered through the
    /// supported primitives. Code paths that bypass them — hand-rolled work
    /// queues, custom schedulers, libraries that move callbacks between
    /// tasks — lose the chain, and the only recovery is for the caller to
    /// capture the context up front and restore it here when the
    /// continuation runs.
    ///
    /// This is [`attach`](Context::attach) under the name the operation is
    /// known by at instrumentation call sites.
    pub fn restore(cx: Context) -> ContextGuard {
        cx.attach()
    }

    /// Wraps a callback so that this context is current whenever it runs.
    ///
    /// The context is attached immediately before the callback executes and
    /// released when it returns, also on unwind.
    ///
    /// ```
    /// use filament::Context;
    ///
    /// let captured = Context::current();
    /// let callback = captured.bind(|input: u32| input + 1);
    /// // ... later, possibly from an unrelated task:
    /// assert_eq!(callback(41), 42);
    /// ```
    pub fn bind<A, T, F>(self, f: F) -> impl FnOnce(A) -> T
    where
        F: FnOnce(A) -> T,
    {
        move |arg| {
            let _guard = self.attach();
            f(arg)
        }
    }

    /// Like [`bind`](Context::bind), for callbacks that run more than once.
    pub fn bind_mut<A, T, F>(self, mut f: F) -> impl FnMut(A) -> T
    where
        F: FnMut(A) -> T,
    {
        move |arg| {
            let _guard = self.clone().attach();
            f(arg)
        }
    }

    /// Returns whether tracing is suppressed for the trace this context
    /// belongs to.
    ///
    /// Suppression arrives over the wire (trace level `"0"`) and is sticky
    /// for the whole logical task: spans started under a suppressed context
    /// are inert and nothing is transmitted.
    pub fn is_suppressed(&self) -> bool {
        self.span
            .as_ref()
            .is_some_and(|scope| scope.trace_context().is_suppressed())
    }

    pub(crate) fn with_scoped_span(&self, scope: ScopedSpan) -> Self {
        Context {
            span: Some(Arc::new(scope)),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Context");
        match &self.span {
            Some(scope) => dbg.field("span", &scope.trace_context()),
            None => dbg.field("span", &"None"),
        };
        dbg.finish()
    }
}

/// A guard that restores the previously current context when dropped.
///
/// Guards are `!Send`: a scope entered on one thread cannot be exited from
/// another. To carry a context across tasks, clone the [`Context`] itself
/// and use [`Context::restore`].
#[derive(Debug)]
pub struct ContextGuard {
    pos: u16,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.pos;
        if pos > ContextStack::ROOT_POS && pos < ContextStack::OVERFLOW_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_pos(pos));
        }
    }
}

/// Tracks the contexts attached to the current thread.
///
/// The currently active context is kept out of the stack for cheap access;
/// displaced contexts are pushed behind it. Guards identify their context by
/// position, which makes out-of-order drops safe: dropping a non-top guard
/// merely vacates its slot, and the vacated tail is cleaned up when the top
/// is eventually popped.
struct ContextStack {
    current: Context,
    stack: Vec<Option<Context>>,
    _not_send: PhantomData<*const ()>,
}

impl ContextStack {
    const ROOT_POS: u16 = 0;
    const OVERFLOW_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: Context) -> u16 {
        // Position 0 is the always-present empty root, so the first attached
        // context lands at position 1.
        let next_pos = self.stack.len() + 1;
        if next_pos < ContextStack::OVERFLOW_POS.into() {
            let displaced = std::mem::replace(&mut self.current, cx);
            self.stack.push(Some(displaced));
            next_pos as u16
        } else {
            fil_warn!(
                name: "Context.AttachFailed",
                message = format!(
                    "context stack depth limit of {} reached; the context was \
                     not attached and dropping the returned guard has no effect",
                    ContextStack::OVERFLOW_POS
                )
            );
            ContextStack::OVERFLOW_POS
        }
    }

    #[inline(always)]
    fn pop_pos(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Top of the stack: restore the most recent displaced context,
            // skipping slots vacated by out-of-order drops.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            if let Some(Some(next)) = self.stack.pop() {
                self.current = next;
            }
        } else if pos < len {
            // Out-of-order drop: vacate the slot, restore nothing yet.
            _ = self.stack[pos as usize].take();
        } else {
            fil_warn!(
                name: "Context.PopOutOfBounds",
                position = pos,
                stack_length = len
            );
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        f(&self.current)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _not_send: PhantomData,
        }
    }
}
