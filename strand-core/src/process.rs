//! The thread-local process stack.
//!
//! Every hash and compute invocation runs inside a [`Process`]: a record of
//! what is being resolved and on whose behalf. Records live on a per-thread
//! stack — no locking — and registered monitors observe every push and pop.
//!
//! The push/notify/pop sequence is a scope guard, never a manually paired
//! call: [`ProcessScope`] pushes and notifies on construction, and its
//! `Drop` notifies and pops even when an error or panic unwinds through the
//! invocation. Notification order is start-before-children-start,
//! finish-after-children-finish.
//!
//! The stack doubles as cycle detection: starting a process whose
//! (kind, plug, context) is already in flight on this thread means the
//! graph evaluation is recursing into itself, and fails rather than
//! overflowing the stack.

use std::cell::RefCell;
use std::fmt;

use crate::error::ComputeError;
use crate::graph::PlugId;
use crate::hash::ContentHash;
use crate::monitor;

thread_local! {
    static STACK: RefCell<Vec<Process>> = const { RefCell::new(Vec::new()) };
}

/// What kind of work a process performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Building the content hash of an output plug.
    Hash,
    /// Computing an output plug's value.
    Compute,
}

/// One in-flight hash or compute invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Process {
    kind: ProcessKind,
    plug: PlugId,
    downstream: PlugId,
    context: ContentHash,
    depth: usize,
}

impl Process {
    /// The kind of work being performed.
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// The plug being hashed or computed.
    pub fn plug(&self) -> PlugId {
        self.plug
    }

    /// The plug of the parent process — the one whose resolution required
    /// this one. Equals [`plug`](Self::plug) for a root process.
    pub fn downstream(&self) -> PlugId {
        self.downstream
    }

    /// Hash of the context this process runs under.
    pub fn context(&self) -> ContentHash {
        self.context
    }

    /// Nesting depth; 0 for a root process.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The calling thread's innermost in-flight process, if any.
    pub fn current() -> Option<Process> {
        STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.plug)
    }
}

/// Guard for one process: pushes on construction, pops on drop.
#[derive(Debug)]
pub(crate) struct ProcessScope {
    _private: (),
}

impl ProcessScope {
    /// Starts a process, notifying monitors.
    ///
    /// Fails if an identical process is already in flight on this thread,
    /// which means evaluation has recursed into itself.
    pub(crate) fn push(
        kind: ProcessKind,
        plug: PlugId,
        context: ContentHash,
    ) -> Result<Self, ComputeError> {
        let process = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let cycle = stack
                .iter()
                .any(|p| p.kind == kind && p.plug == plug && p.context == context);
            if cycle {
                return Err(ComputeError::new(plug, "cycle detected during evaluation"));
            }
            let process = Process {
                kind,
                plug,
                downstream: stack.last().map(|p| p.plug).unwrap_or(plug),
                context,
                depth: stack.len(),
            };
            stack.push(process);
            Ok(process)
        })?;
        monitor::notify_started(&process);
        Ok(Self { _private: () })
    }
}

impl Drop for ProcessScope {
    fn drop(&mut self) {
        let process = STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(process) = process {
            monitor::notify_finished(&process);
        } else {
            debug_assert!(false, "process stack underflow");
        }
    }
}
