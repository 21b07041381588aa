use emu_host::{Executor, TickTock, TickTockArgs, TransactionOutcome, Verbosity};


use fake_emulator::{emulation_args, transaction_args, FakeEmulator, CONFIG_FAIL, CONFIG_NULL};

#[test]
fn same_config_and_verbosity_reuse_one_emulator() {
    let mut exec = Executor::new(FakeEmulator::new());
    let args = transaction_args("cfg-a", Verbosity::Short, "msg");

    let first = exec.run_transaction(&args).unwrap();
    let handle = exec.cached_emulator().expect("emulator cached");
    let second = exec.run_transaction(&args).unwrap();

    assert_eq!(exec.cached_emulator(), Some(handle));
    assert_eq!(exec.module().creates, 1);
    assert_eq!(exec.module().destroys, 0);
    assert_eq!(first.output, second.output);
    let TransactionOutcome::Success(ok) = first.output else {
        panic!("expected success");
    };
    assert_eq!(ok.transaction, "tx:msg");
    assert_eq!(ok.shard_account, "acc+");
    assert_eq!(first.logs, "tx log");
}

#[test]
fn changed_key_destroys_before_creating() {
    let mut exec = Executor::new(FakeEmulator::new());

    exec.run_transaction(&transaction_args("cfg-a", Verbosity::Short, "m"))
        .unwrap();
    let a = exec.cached_emulator().unwrap();

    exec.run_transaction(&transaction_args("cfg-a", Verbosity::FullLocation, "m"))
        .unwrap();
    let b = exec.cached_emulator().unwrap();
    assert_ne!(a, b);
    assert_eq!(exec.module().emulators[&b.ptr().addr()].verbosity, 2);

    exec.run_transaction(&transaction_args("cfg-b", Verbosity::FullLocation, "m"))
        .unwrap();

    let fake = exec.module();
    assert_eq!(fake.creates, 3);
    assert_eq!(fake.destroys, 2);
    assert_eq!(fake.emulators.len(), 1);
    let calls: Vec<&str> = fake
        .calls
        .iter()
        .map(String::as_str)
        .filter(|c| *c == "create_emulator" || *c == "destroy_emulator")
        .collect();
    assert_eq!(
        calls,
        [
            "create_emulator",
            "destroy_emulator",
            "create_emulator",
            "destroy_emulator",
            "create_emulator",
        ]
    );
}

#[test]
fn null_emulator_is_cached_and_never_destroyed() {
    let mut exec = Executor::new(FakeEmulator::new());
    let err = exec
        .run_transaction(&transaction_args(CONFIG_NULL, Verbosity::Short, "m"))
        .unwrap_err();
    assert!(format!("{err:#}").contains("emulator not found"), "{err:#}");
    let null = exec.cached_emulator().expect("null handle cached");
    assert!(null.is_null());

    let again = exec.emulator(CONFIG_NULL, Verbosity::Short).unwrap();
    assert_eq!(again, null);
    assert_eq!(exec.module().calls_to("create_emulator"), 1);

    exec.run_transaction(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();
    assert_eq!(exec.module().calls_to("create_emulator"), 2);
    assert_eq!(exec.module().calls_to("destroy_emulator"), 0);

    let fake = exec.shutdown().unwrap();
    assert_eq!(fake.calls_to("destroy_emulator"), 1);
}

#[test]
fn shutdown_skips_teardown_of_a_null_emulator() {
    let mut exec = Executor::new(FakeEmulator::new());
    exec.emulator(CONFIG_NULL, Verbosity::Short).unwrap();
    let fake = exec.shutdown().unwrap();
    assert_eq!(fake.calls_to("create_emulator"), 1);
    assert_eq!(fake.calls_to("destroy_emulator"), 0);
}

#[test]
fn fail_envelope_keeps_the_cached_emulator() {
    let mut exec = Executor::new(FakeEmulator::new());
    let err = exec
        .run_transaction(&transaction_args(CONFIG_FAIL, Verbosity::Short, "m"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<emu_host::EmulationError>(),
        Some(emu_host::EmulationError::ForeignFailure { .. })
    ));
    assert!(exec.cached_emulator().is_some());
    assert_eq!(exec.module().results_live.len(), 0);
}

#[test]
fn tick_tock_shares_the_cache_and_sets_flags() {
    let mut exec = Executor::new(FakeEmulator::new());
    exec.run_transaction(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();

    let out = exec
        .run_tick_tock(&TickTockArgs {
            emulation: emulation_args("cfg", Verbosity::Short),
            which: TickTock::Tock,
        })
        .unwrap();
    assert_eq!(out.output.success().unwrap().transaction, "tock");
    assert_eq!(exec.module().creates, 1);

    let params = exec.module().last_params.clone().unwrap();
    assert_eq!(params["is_tick_tock"], true);
    assert_eq!(params["is_tock"], true);
    assert_eq!(params["lt"], "1000000");
    assert_eq!(exec.module().last_libs, Some(None));
}

#[test]
fn libs_are_passed_as_a_string_when_present() {
    let mut exec = Executor::new(FakeEmulator::new());
    let mut args = transaction_args("cfg", Verbosity::Short, "m");
    args.emulation.libs = Some("libs-boc".to_string());
    exec.run_transaction(&args).unwrap();
    assert_eq!(
        exec.module().last_libs,
        Some(Some("libs-boc".to_string()))
    );
}

#[test]
fn shutdown_destroys_emulator_and_frees_arena() {
    let mut exec = Executor::new(FakeEmulator::new());
    exec.run_transaction(&transaction_args("cfg", Verbosity::Short, "m"))
        .unwrap();
    assert!(exec.context().arena().live_buffers() > 0);

    let fake = exec.shutdown().unwrap();
    assert_eq!(fake.destroys, 1);
    assert!(fake.emulators.is_empty());
    assert!(fake.host_live.is_empty());
    assert!(fake.results_live.is_empty());
    assert_eq!(fake.host_mallocs, fake.host_frees);
}

#[test]
fn arena_reuses_buffers_across_calls() {
    let mut exec = Executor::new(FakeEmulator::new());
    let args = transaction_args("cfg", Verbosity::Short, "m");
    exec.run_transaction(&args).unwrap();
    let after_first = exec.module().host_mallocs;
    exec.run_transaction(&args).unwrap();
    exec.run_transaction(&args).unwrap();
    assert_eq!(exec.module().host_mallocs, after_first);
    assert_eq!(exec.context().arena().buffers_in_use(), 0);
}
