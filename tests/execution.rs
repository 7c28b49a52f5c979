//! End-to-end interpreter runs against the public API.

use migol::{
    load_state, parse, save_state, CaptureConsole, ExecErrorKind, ParseErrorKind, Session,
};

fn run(source: &str, memory: usize) -> Session {
    let program = parse(source).expect("program parses");
    let mut session = Session::new(memory);
    session.run(&program).expect("program runs");
    session
}

#[test]
fn compound_assignment_chain_yields_twelve() {
    let session = run("0<3, 0<[0]<$*2<[0]<$*2", 64);
    assert_eq!(
        session.memory()[0],
        12,
        "each operator re-reads the just-written value"
    );
}

#[test]
fn false_guard_leaves_target_untouched() {
    let session = run("5<10?<>0", 64);
    assert_eq!(session.memory()[5], 0);
    assert_eq!(session.pc(), 2);
}

#[test]
fn countdown_loop_reaches_zero() {
    let session = run("0<1000000, 0<$-1, -1<2?<>[0]", 64);
    assert_eq!(session.memory()[0], 0);
}

#[test]
#[ignore = "hundred-million-step countdown; takes a while"]
fn full_hundred_million_countdown() {
    let session = run("0<100000000, 0<$-1, -1<2?<>[0]", 64);
    assert_eq!(session.memory()[0], 0);
}

#[test]
fn identical_runs_produce_identical_state_and_output() {
    let source = "0<3, 1<[0]<$*7, 1>-, 2<[1]<$%5, [2]>-";
    let mut states = Vec::new();
    for _ in 0..2 {
        let console = CaptureConsole::new();
        let program = parse(source).unwrap();
        let mut session = Session::with_console(64, Box::new(console.clone()));
        session.run(&program).unwrap();
        states.push((session.memory().to_vec(), session.pc(), console.output()));
    }
    assert_eq!(states[0], states[1]);
}

#[test]
fn unmapped_register_read_is_an_execution_error() {
    let program = parse("_, _, 0<[-999]").unwrap();
    let mut session = Session::new(64);
    let err = session.run(&program).unwrap_err();
    assert_eq!(err.kind, ExecErrorKind::UnmappedRegister(-999));
    assert_eq!(err.pc, 3, "error names the faulting statement");
    let message = err.to_string();
    assert!(message.contains("-999"), "{message}");
    assert!(message.contains("statement 3"), "{message}");
}

#[test]
fn pc_write_skips_auto_increment_exactly_once() {
    // Statement 1 branches to 3; statement 2 must never run.
    let session = run("#<3, 0<1, 1<1", 64);
    assert_eq!(session.memory()[0], 0);
    assert_eq!(session.memory()[1], 1);
}

#[test]
fn snapshot_round_trip_reproduces_memory_and_pc() {
    let mut session = run("0<123, 1<[0]<$*2, 2<-9", 64);
    let mut blob = Vec::new();
    save_state(&session, &mut blob).unwrap();

    session.reset();
    assert!(session.memory().iter().all(|&v| v == 0));

    load_state(&mut session, blob.as_slice()).unwrap();
    assert_eq!(session.memory()[0], 123);
    assert_eq!(session.memory()[1], 246);
    assert_eq!(session.memory()[2], -9);
    assert_eq!(session.pc(), 4);
}

#[test]
fn parse_errors_surface_with_position_instead_of_running() {
    let err = parse("0<1\n0<1, 0<$?2").unwrap_err();
    assert_eq!(err.line_number, 2);
    assert_eq!(err.kind, ParseErrorKind::UnknownOperator);

    let err = parse("#<missing").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UndefinedLabel("missing".into()));
}

#[test]
fn labelled_loop_prints_characters() {
    // Print "AAA" by looping on a counter with a labelled branch target.
    let source = "0<3, 65>:loop, 0<[0]<$-1, #<loop?>[0]";
    let console = CaptureConsole::new();
    let program = parse(source).unwrap();
    let mut session = Session::with_console(64, Box::new(console.clone()));
    session.run(&program).unwrap();
    assert_eq!(console.output(), "AAA");
}

#[test]
fn console_input_feeds_programs() {
    // Echo two input bytes, then print their sum as a number.
    let source = "0<[@], 1<[@], [0]>, [1]>, 2<[0]<$+[1], [2]>-";
    let console = CaptureConsole::with_input("01");
    let program = parse(source).unwrap();
    let mut session = Session::with_console(64, Box::new(console.clone()));
    session.run(&program).unwrap();
    assert_eq!(console.output(), format!("01{}", 48 + 49));
}

#[test]
fn empty_program_halts_immediately() {
    let program = parse("").unwrap();
    let mut session = Session::new(16);
    session.run(&program).unwrap();
    assert_eq!(session.pc(), 1);
}
