//! End-to-end asynchronous I/O: Migol programs driving the file registers,
//! with completions observed through the interrupt handler.

use migol::{parse, CaptureConsole, Session};

/// Statements that store `bytes` into memory one cell each, starting at
/// `addr`.
fn store_bytes(addr: i32, bytes: &[u8]) -> String {
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}<{}", addr + i as i32, b))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The shared completion handler: records the current interrupt's fields
/// at 10..14, raises the step flag at 9 and returns. Completion delivery
/// can beat the wait statement, so every wait below is guarded on the flag.
const HANDLER: &str = "10<[-24]:handler, 11<[-27], 12<[-26], 13<[-28], 9<1, #!<[*#]";

fn run(source: &str) -> Session {
    let program = parse(source).expect("program parses");
    let console = CaptureConsole::new();
    let mut session = Session::with_console(1024, Box::new(console));
    session.run(&program).expect("program runs");
    session
}

#[test]
fn failed_file_open_delivers_error_code_not_a_crash() {
    let name = b"definitely/not/a/real/file.mig";
    let source = format!(
        "-16<handler, {store}, -32<100, -33<{len}, -34<0, \
         9<0, 0<[-35], \\<1?=[9], \
         20<[10], 21<[11], 22<[13], #<999\n\
         {HANDLER}",
        store = store_bytes(100, name),
        len = name.len(),
    );
    let session = run(&source);
    assert_eq!(session.memory()[20], -1, "failed open reports handle -1");
    assert_ne!(session.memory()[21], 0, "failed open reports an error code");
    assert_eq!(session.memory()[22], 4, "completion is an open interrupt");
}

#[test]
fn file_write_seek_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scratch.bin");
    let name = path.to_string_lossy().into_owned().into_bytes();

    let source = format!(
        "-16<handler, {store_name}, \
         // open read/write\n\
         -32<100, -33<{name_len}, -34<1, 9<0, 0<[-35], \\<1?=[9], \
         30<[10], 31<[11], \
         // write two bytes from 200\n\
         -17<[30], 200<65, 201<66, -18<200, -19<2, 9<0, 0<[-21], \\<1?=[9], \
         32<[12], \
         // rewind and read them back into 300\n\
         -36<0, -18<300, -19<2, 9<0, 0<[-20], \\<1?=[9], \
         33<[12], 34<[-37], \
         // close\n\
         9<0, 0<[-22], \\<1?=[9], 35<[11], #<999\n\
         {HANDLER}",
        store_name = store_bytes(100, &name),
        name_len = name.len(),
    );
    let session = run(&source);
    let memory = session.memory();
    assert_eq!(memory[31], 0, "open succeeded");
    assert!(memory[30] >= 20, "dynamic handles start above the consoles");
    assert_eq!(memory[32], 2, "write reported two bytes");
    assert_eq!(memory[33], 2, "read reported two bytes");
    assert_eq!(memory[34], 2, "size register sees the written file");
    assert_eq!(memory[300], 65);
    assert_eq!(memory[301], 66);
    assert_eq!(memory[35], 0, "close succeeded");

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk, b"AB");
}

#[test]
fn read_from_unknown_handle_reports_bad_handle() {
    let source = format!(
        "-16<handler, -17<777, -18<50, -19<4, \
         9<0, 0<[-20], \\<1?=[9], 20<[11], #<999\n\
         {HANDLER}"
    );
    let session = run(&source);
    assert_eq!(session.memory()[20], 2, "unknown handle error code");
}
