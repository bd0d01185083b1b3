use std::{cell::RefCell, rc::Rc, thread, time::Duration};

use procqueue::{
    worker::{BytesInput, CappedOutput},
    Error, Process, Redirect,
};

fn capture() -> (Rc<RefCell<Vec<u8>>>, CappedOutput) {
    let buffer = Rc::new(RefCell::new(Vec::new()));
    let sink = CappedOutput::new(buffer.clone(), usize::MAX);
    (buffer, sink)
}

fn sh(script: &str) -> [&str; 3] {
    ["sh", "-c", script]
}

#[test]
fn test_exit_code() -> anyhow::Result<()> {
    let mut process = Process::spawn(&sh("exit 3"), Redirect::new())?;
    process.wait_until_finished()?;
    assert!(process.known_to_be_finished());
    assert_eq!(process.exit_code()?, 3);
    // further queries are no-ops
    assert!(process.check_if_finished()?);
    process.kill(true);
    assert_eq!(process.exit_code()?, 3);
    Ok(())
}

#[test]
fn test_echo_input_to_output() -> anyhow::Result<()> {
    let (buffer, sink) = capture();
    let redirect = Redirect::new()
        .with_input(BytesInput::new("hello"))
        .with_output(sink);
    let mut process = Process::spawn(&["cat"], redirect)?;
    process.wait_until_finished()?;
    assert_eq!(process.exit_code()?, 0);
    assert_eq!(buffer.borrow().as_slice(), b"hello");
    Ok(())
}

#[test]
fn test_stderr_merged_into_output() -> anyhow::Result<()> {
    let (buffer, sink) = capture();
    let mut process = Process::spawn(
        &sh("echo out; echo err 1>&2"),
        Redirect::new().with_output(sink),
    )?;
    process.wait_until_finished()?;
    assert_eq!(buffer.borrow().as_slice(), b"out\nerr\n");
    Ok(())
}

#[test]
fn test_input_larger_than_pipe_buffer() -> anyhow::Result<()> {
    // several times the usual pipe capacity, so writes have to back off
    let input: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let (buffer, sink) = capture();
    let redirect = Redirect::new()
        .with_input(BytesInput::new(input.clone()))
        .with_output(sink);
    let mut process = Process::spawn(&["cat"], redirect)?;
    process.wait_until_finished()?;
    assert_eq!(process.exit_code()?, 0);
    assert_eq!(buffer.borrow().len(), input.len());
    assert!(*buffer.borrow() == input);
    Ok(())
}

#[test]
fn test_polling_until_finished() -> anyhow::Result<()> {
    let (buffer, sink) = capture();
    let mut process = Process::spawn(
        &sh("sleep 0.1; echo done"),
        Redirect::new().with_output(sink),
    )?;
    let mut polls = 0;
    while !process.check_if_finished()? {
        polls += 1;
        thread::sleep(Duration::from_millis(5));
    }
    assert!(polls > 0);
    assert_eq!(process.exit_code()?, 0);
    assert_eq!(buffer.borrow().as_slice(), b"done\n");
    Ok(())
}

#[test]
fn test_output_closed_early() -> anyhow::Result<()> {
    // the child closes its output long before it exits
    let (buffer, sink) = capture();
    let mut process = Process::spawn(
        &sh("echo before; exec >&- 2>&-; sleep 0.2; exit 5"),
        Redirect::new().with_output(sink),
    )?;
    while !process.check_if_finished()? {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(process.exit_code()?, 5);
    assert_eq!(buffer.borrow().as_slice(), b"before\n");
    Ok(())
}

#[test]
fn test_exit_code_before_finish() -> anyhow::Result<()> {
    let mut process = Process::spawn(&["sleep", "5"], Redirect::new())?;
    assert!(!process.check_if_finished()?);
    assert!(matches!(process.exit_code(), Err(Error::NotFinished)));

    process.kill(true);
    process.wait_until_finished()?;
    assert_eq!(process.exit_code()?, -libc::SIGKILL);
    Ok(())
}

#[test]
fn test_graceful_kill() -> anyhow::Result<()> {
    let mut process = Process::spawn(&["sleep", "5"], Redirect::new())?;
    process.kill(false);
    process.wait_until_finished()?;
    assert_eq!(process.exit_code()?, -libc::SIGTERM);
    Ok(())
}

#[test]
fn test_detach_leaves_empty() -> anyhow::Result<()> {
    let mut process = Process::spawn(&["sleep", "5"], Redirect::new())?;
    assert!(process.id().is_some());
    assert_eq!(process.debug_cmdline(), r#"["sleep", "5"]"#);
    process.kill(true);
    process.detach();
    assert!(process.is_empty());
    assert_eq!(process.debug_cmdline(), "");
    assert!(matches!(process.check_if_finished(), Err(Error::NullProcess)));
    Ok(())
}

#[test]
fn test_spawn_failure() {
    let result = Process::spawn(&["/nonexistent/procqueue-test-binary"], Redirect::new());
    match result {
        Err(Error::Spawn { cmdline, .. }) => {
            assert_eq!(cmdline, r#"["/nonexistent/procqueue-test-binary"]"#)
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("spawn should have failed"),
    }
}

#[test]
fn test_input_ignored_by_process() -> anyhow::Result<()> {
    // the child exits without reading, so the input side fails quietly
    let input = vec![b'x'; 1_000_000];
    let mut process = Process::spawn(
        &sh("exit 0"),
        Redirect::new().with_input(BytesInput::new(input)),
    )?;
    process.wait_until_finished()?;
    assert_eq!(process.exit_code()?, 0);
    Ok(())
}
