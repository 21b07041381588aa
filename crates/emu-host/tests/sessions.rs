use emu_host::{
    CodePosition, Executor, GetMethodSession, SbsSession, SessionError, SessionState,
    StepOutcome, TransactionOutcome, TransactionSession, Verbosity,
};


use fake_emulator::{
    get_method_args, transaction_args, FakeEmulator, CONFIG_NULL, MESSAGE_REJECT, STACK_TRAP,
};

#[test]
fn get_method_session_steps_to_done() {
    let mut exec = Executor::new(FakeEmulator::new());
    let created = exec.sbs_get_method_setup(&get_method_args("cfg", 1)).unwrap();

    let mut positions = Vec::new();
    let mut outcome = created.step(&mut exec).unwrap();
    let done = loop {
        match outcome {
            StepOutcome::Continue(stepping) => {
                positions.push(stepping.code_position(&mut exec).unwrap());
                outcome = stepping.step(&mut exec).unwrap();
            }
            StepOutcome::Done(done) => break done,
        }
    };
    assert_eq!(
        positions,
        [
            CodePosition {
                hash: "abcd1234".to_string(),
                offset: 1
            },
            CodePosition {
                hash: "abcd1234".to_string(),
                offset: 2
            },
        ]
    );

    let stack = done.stack(&mut exec).unwrap();
    assert_eq!(stack.to_bytes().unwrap(), b"te6ccgEBAQEABQAABgAAAA==#3");

    let result = done.result(&mut exec).unwrap();
    assert!(result.output.is_success());
    assert_eq!(result.logs, "sbs log");
    assert_eq!(result.debug_logs, "");

    done.destroy(&mut exec).unwrap();
    let fake = exec.module();
    assert!(fake.sessions.is_empty());
    assert_eq!(fake.session_destroys, 1);
    assert!(fake.results_live.is_empty());
}

#[test]
fn step_debug_lines_are_per_call() {
    let mut exec = Executor::new(FakeEmulator::new());
    let created = exec.sbs_get_method_setup(&get_method_args("cfg", 1)).unwrap();
    let StepOutcome::Continue(stepping) = created.step(&mut exec).unwrap() else {
        panic!("expected more steps");
    };
    assert_eq!(exec.last_debug_logs(), ["step 1".to_string()]);
    let StepOutcome::Continue(stepping) = stepping.step(&mut exec).unwrap() else {
        panic!("expected more steps");
    };
    assert_eq!(exec.last_debug_logs(), ["step 2".to_string()]);
    stepping.destroy(&mut exec).unwrap();
}

#[test]
fn rejected_setup_is_an_error() {
    let mut exec = Executor::new(FakeEmulator::new());
    let err = exec
        .sbs_get_method_setup(&get_method_args(CONFIG_NULL, 1))
        .err()
        .expect("setup rejected");
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::SetupRejected { kind: "get-method" })
    );
}

#[test]
fn failed_step_tears_the_session_down() {
    let mut exec = Executor::new(FakeEmulator::new());
    let mut args = get_method_args("cfg", 1);
    args.stack = STACK_TRAP.to_string();
    let created = exec.sbs_get_method_setup(&args).unwrap();

    let StepOutcome::Continue(stepping) = created.step(&mut exec).unwrap() else {
        panic!("expected more steps");
    };
    let err = stepping.step(&mut exec).err().expect("step traps");
    assert!(format!("{err:#}").contains("unreachable executed"), "{err:#}");

    let fake = exec.module();
    assert!(fake.sessions.is_empty());
    assert_eq!(fake.session_destroys, 1);
}

#[test]
fn runtime_checked_session_rejects_out_of_order_calls() {
    let mut exec = Executor::new(FakeEmulator::new());
    let created = exec.sbs_get_method_setup(&get_method_args("cfg", 1)).unwrap();
    let mut session: SbsSession<GetMethodSession> = created.into();
    assert_eq!(session.state(), SessionState::Created);

    let err = session.stack(&mut exec).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::InvalidState {
            op: "stack",
            state: SessionState::Created,
        })
    );

    assert!(session.step(&mut exec).unwrap());
    assert_eq!(session.state(), SessionState::Stepping);
    let err = session.result(&mut exec).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::InvalidState { op: "result", .. })
    ));

    let calls_before = exec.module().calls.len();
    assert!(session.step(&mut exec).unwrap());
    assert!(!session.step(&mut exec).unwrap());
    assert_eq!(session.state(), SessionState::Done);
    assert_eq!(exec.module().calls.len(), calls_before + 2);

    let err = session.step(&mut exec).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::InvalidState { op: "step", state: SessionState::Done })
    ));

    let pos = session.code_position(&mut exec).unwrap();
    assert_eq!(pos.to_string(), "abcd1234:3");
    assert!(session.result(&mut exec).unwrap().output.is_success());

    session.destroy(&mut exec).unwrap();
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(session.destroy(&mut exec).is_err());
    assert_eq!(exec.module().session_destroys, 1);
}

#[test]
fn transaction_session_uses_a_private_emulator() {
    let mut exec = Executor::new(FakeEmulator::new());
    exec.run_transaction(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();
    let cached = exec.cached_emulator().unwrap();

    let created = exec
        .sbs_transaction_setup(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();
    assert_ne!(created.handle().ptr(), cached.ptr());
    assert_eq!(exec.module().creates, 2);

    let mut session = SbsSession::from(created);
    while session.step(&mut exec).unwrap() {}
    let result = session.result(&mut exec).unwrap();
    let TransactionOutcome::Success(ok) = result.output else {
        panic!("expected success");
    };
    assert_eq!(ok.transaction, "tx:sbs");
    assert_eq!(ok.shard_account, "acc+");

    session.destroy(&mut exec).unwrap();
    assert_eq!(exec.cached_emulator(), Some(cached));
    let fake = exec.module();
    assert_eq!(fake.destroys, 1);
    assert_eq!(fake.emulators.len(), 1);
}

#[test]
fn transaction_session_reports_stack_and_position_while_stepping() {
    let mut exec = Executor::new(FakeEmulator::new());
    let created = exec
        .sbs_transaction_setup(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();

    let StepOutcome::Continue(stepping) = created.step(&mut exec).unwrap() else {
        panic!("expected more steps");
    };
    assert_eq!(
        stepping.code_position(&mut exec).unwrap(),
        CodePosition {
            hash: "abcd1234".to_string(),
            offset: 1
        }
    );
    assert_eq!(stepping.stack(&mut exec).unwrap().to_bytes().unwrap(), b"acc#1");

    let StepOutcome::Done(done) = stepping.step(&mut exec).unwrap() else {
        panic!("expected the session to finish");
    };
    assert_eq!(done.code_position(&mut exec).unwrap().to_string(), "abcd1234:2");
    assert_eq!(done.stack(&mut exec).unwrap().to_bytes().unwrap(), b"acc#2");
    let result = done.result(&mut exec).unwrap();
    assert_eq!(result.logs, "sbs tx log");
    assert_eq!(result.output.success().unwrap().transaction, "tx:sbs");

    done.destroy(&mut exec).unwrap();
    let fake = exec.module();
    assert_eq!(fake.calls_to("em_sbs_stack"), 2);
    assert_eq!(fake.calls_to("em_sbs_code_pos"), 2);
    assert_eq!(fake.calls_to("sbs_get_stack"), 0);
    assert_eq!(fake.destroys, 1);
    assert!(fake.emulators.is_empty());
    assert!(fake.results_live.is_empty());
}

#[test]
fn runtime_checked_transaction_session_guards_accessors() {
    let mut exec = Executor::new(FakeEmulator::new());
    let created = exec
        .sbs_transaction_setup(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();
    let mut session: SbsSession<TransactionSession> = created.into();

    let err = session.code_position(&mut exec).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::InvalidState {
            op: "code_position",
            state: SessionState::Created,
        })
    );

    assert!(session.step(&mut exec).unwrap());
    assert_eq!(session.stack(&mut exec).unwrap().to_bytes().unwrap(), b"acc#1");
    assert!(!session.step(&mut exec).unwrap());
    assert_eq!(session.code_position(&mut exec).unwrap().offset, 2);

    session.destroy(&mut exec).unwrap();
    assert_eq!(exec.module().destroys, 1);
}

#[test]
fn rejected_transaction_setup_destroys_its_emulator() {
    let mut exec = Executor::new(FakeEmulator::new());
    let err = exec
        .sbs_transaction_setup(&transaction_args("cfg", Verbosity::Short, MESSAGE_REJECT))
        .err()
        .expect("setup rejected");
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::SetupRejected { kind: "transaction" })
    );
    let fake = exec.module();
    assert_eq!(fake.creates, 1);
    assert_eq!(fake.destroys, 1);
    assert!(fake.emulators.is_empty());
    assert_eq!(exec.cached_emulator(), None);
}
