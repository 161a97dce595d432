//! Resolver state-machine properties, driven against the real engine.


use fixtures::{factorial_fn, gcd_fn, run_jit};
use smelt::ir::Module;
use smelt::{ArgState, Session, SPECIALIZATION_THRESHOLD};

fn factorial_session() -> (Session, u64) {
    let mut module = Module::new("user");
    module.push_function(factorial_fn());
    let mut session = Session::new(module).expect("session");
    let generic = session.lookup("factorial").expect("generic address");
    (session, generic)
}

#[test]
fn resolver_monotonicity_and_single_trigger() {
    run_jit(|| {
        let (mut session, generic) = factorial_session();

        // The first THRESHOLD - 1 calls dispatch generic.
        for call in 1..SPECIALIZATION_THRESHOLD {
            let addr = session.resolve_call(generic, 10, "factorial");
            assert_eq!(addr, generic, "call {call} must stay generic");
        }
        assert_eq!(session.specialization_attempts(), 0);

        // The call whose post-increment reaches the threshold triggers one
        // compilation and returns the specialized address.
        let specialized = session.resolve_call(generic, 10, "factorial");
        assert_ne!(specialized, generic);
        assert!(specialized > SPECIALIZATION_THRESHOLD);
        assert_eq!(session.specialization_attempts(), 1);
        assert_eq!(session.specializations_compiled(), 1);

        // Every later call short-circuits to the stored address and never
        // re-enters the pipeline.
        for _ in 0..50 {
            assert_eq!(session.resolve_call(generic, 10, "factorial"), specialized);
        }
        assert_eq!(session.specialization_attempts(), 1);

        // The specialized code computes factorial(10) no matter what the
        // (now unread) parameter is.
        let spec_fn: extern "C" fn(i32) -> i32 =
            unsafe { std::mem::transmute(specialized as usize) };
        assert_eq!(spec_fn(10), 3628800);
        assert_eq!(spec_fn(3), 3628800);
    });
}

#[test]
fn missing_ir_keeps_counting() {
    run_jit(|| {
        let (mut session, generic) = factorial_session();
        for _ in 0..(SPECIALIZATION_THRESHOLD + 50) {
            assert_eq!(session.resolve_call(generic, 4, "not_a_function"), generic);
        }
        assert_eq!(session.specialization_attempts(), 0);
        // The count saturates at the threshold instead of bleeding into the
        // address range.
        assert_eq!(
            session.profile().arg_state(generic, 4),
            Some(ArgState::Count(SPECIALIZATION_THRESHOLD))
        );
    });
}

#[test]
fn distinct_arguments_produce_distinct_specializations() {
    run_jit(|| {
        let mut module = Module::new("user");
        module.push_function(gcd_fn());
        let mut session = Session::new(module).expect("session");
        let generic = session.lookup("gcd").expect("generic address");

        for _ in 0..SPECIALIZATION_THRESHOLD {
            session.resolve_call(generic, 7, "gcd");
        }
        for _ in 0..SPECIALIZATION_THRESHOLD {
            session.resolve_call(generic, 8, "gcd");
        }
        let addr7 = session.resolve_call(generic, 7, "gcd");
        let addr8 = session.resolve_call(generic, 8, "gcd");
        assert!(addr7 > SPECIALIZATION_THRESHOLD);
        assert!(addr8 > SPECIALIZATION_THRESHOLD);
        assert_ne!(addr7, addr8, "keying is per argument value");
        assert_eq!(session.specializations_compiled(), 2);

        // Both live under their own mangled symbol.
        assert_eq!(session.lookup("gcd_7").ok(), Some(addr7));
        assert_eq!(session.lookup("gcd_8").ok(), Some(addr8));
    });
}

#[test]
fn transient_compile_failure_retries_and_stabilizes() {
    run_jit(|| {
        let (mut session, generic) = factorial_session();
        session.inject_compile_faults(1);

        for _ in 1..SPECIALIZATION_THRESHOLD {
            assert_eq!(session.resolve_call(generic, 6, "factorial"), generic);
        }
        // Trigger call hits the injected fault: generic address, count kept.
        assert_eq!(session.resolve_call(generic, 6, "factorial"), generic);
        assert_eq!(session.specialization_attempts(), 1);
        assert_eq!(session.specializations_compiled(), 0);

        // Next call re-attempts and succeeds; the address then stabilizes.
        let specialized = session.resolve_call(generic, 6, "factorial");
        assert_ne!(specialized, generic);
        assert_eq!(session.specialization_attempts(), 2);
        assert_eq!(session.specializations_compiled(), 1);
        assert_eq!(session.resolve_call(generic, 6, "factorial"), specialized);

        let spec_fn: extern "C" fn(i32) -> i32 =
            unsafe { std::mem::transmute(specialized as usize) };
        assert_eq!(spec_fn(0), 720);
    });
}

#[test]
fn unseen_pair_returns_generic_and_counts_one() {
    run_jit(|| {
        let (mut session, generic) = factorial_session();
        assert_eq!(session.resolve_call(generic, 42, "factorial"), generic);
        assert_eq!(
            session.profile().arg_state(generic, 42),
            Some(ArgState::Count(1))
        );
    });
}
