//! Top-level glue.
//!
//! Builds a session for a user module, installs it as the thread's active
//! session so the resolver can reach it from inside JIT code, looks up
//! `main`, and calls it the way a host loader would (`argc = 1`,
//! `argv = ["<main>"]`).

use std::cell::RefCell;
use std::ffi::{c_char, CString};

use crate::flags::add_debug_flag;
use crate::ir;
use crate::specializer::Session;
use crate::SmeltError;

thread_local! {
    static ACTIVE: RefCell<Option<Session>> = const { RefCell::new(None) };
}

/// Run `f` against the thread's active session, if one is installed.
pub(crate) fn with_active<R>(f: impl FnOnce(&mut Session) -> R) -> Option<R> {
    ACTIVE.with(|slot| slot.borrow_mut().as_mut().map(f))
}

/// Install `session` as the thread's active session for the duration of `f`,
/// then hand it back. JIT code must only run inside `f`: instrumented call
/// sites resolve through the active session.
///
/// Panics if a session is already active on this thread.
pub fn with_session<R>(session: Session, f: impl FnOnce() -> R) -> (Session, R) {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        assert!(
            slot.is_none(),
            "a session is already active on this thread"
        );
        *slot = Some(session);
    });
    let result = f();
    let session = ACTIVE
        .with(|slot| slot.borrow_mut().take())
        .expect("active session was removed during execution");
    (session, result)
}

/// Compile and run a user module's `main`, returning its exit code.
///
/// `flags` are debug flags added to the process-wide registry before setup
/// (e.g. `-log-inst`, `-no-spec`).
pub fn run_module(user: ir::Module, flags: &[&str]) -> Result<i32, SmeltError> {
    for &flag in flags {
        add_debug_flag(flag);
    }
    let mut session = Session::new(user)?;
    match session.user_signature("main") {
        Some(sig) if sig.ret == Some(ir::Type::I32) => {}
        Some(_) => {
            return Err(SmeltError::Runtime(
                "main must return i32".to_string(),
            ))
        }
        None => {
            return Err(SmeltError::Runtime(
                "user module does not define main".to_string(),
            ))
        }
    }
    let addr = session.lookup("main")?;
    let main_fn: extern "C" fn(i32, *const *const c_char) -> i32 =
        unsafe { std::mem::transmute(addr as usize) };
    let progname = CString::new("<main>")
        .map_err(|e| SmeltError::Runtime(format!("argv setup failed: {e}")))?;
    let argv = [progname.as_ptr()];
    let (_session, code) = with_session(session, || main_fn(1, argv.as_ptr()));
    Ok(code)
}
