use std::sync::{Arc, Mutex};

use cantrip::{value::Value, value::OutputPort, Interpreter};
use datatest_stable::Utf8Path;

#[derive(thiserror::Error, Debug)]
#[error("program datatest failed at {0}")]
pub struct DatatestError(Box<Utf8Path>);

// A test file is the expected transcript, a `---` line, then the program.
// Lines starting with `;` above the separator are notes and never compared.
//
// from https://matklad.github.io/2021/05/31/how-to-test.html
// set DATATEST_EXPECT to rewrite the transcript from what the program did.
fn read_datatest(contents: &str) -> (Vec<&str>, Vec<&str>, String) {
    let mut notes = vec![];
    let mut expected = vec![];
    let mut lines = contents.lines();
    for line in lines.by_ref() {
        if line.trim_end() == "---" {
            break;
        } else if line.trim_start().starts_with(';') {
            notes.push(line);
        } else {
            expected.push(line);
        }
    }
    let source = lines.collect::<Vec<_>>().join("\n");
    (notes, expected, source)
}

// Port output is collected across data and split into complete lines.
fn drain(buffer: &Arc<Mutex<Vec<u8>>>, pending: &mut String, transcript: &mut Vec<String>) {
    if let Ok(mut bytes) = buffer.lock() {
        pending.push_str(&String::from_utf8_lossy(&bytes));
        bytes.clear();
    }
    while let Some(end) = pending.find('\n') {
        transcript.push(format!("| {}", &pending[..end]));
        pending.drain(..=end);
    }
}

/// Runs `source` datum by datum. Port output shows up as `| ` lines, every value
/// that is not unspecified as `=> ` lines, and every error as an `error: ` line.
fn transcript(source: &str) -> Vec<String> {
    let (port, buffer) = OutputPort::buffer();
    let mut interpreter = match Interpreter::with_output(port) {
        Ok(interpreter) => interpreter,
        Err(error) => return vec![format!("error: {error}")],
    };
    let program = match interpreter.parse(source) {
        Ok(program) => program,
        Err(error) => return vec![format!("syntax error: {error}")],
    };

    let mut transcript = vec![];
    let mut pending = String::new();
    for datum in program {
        let result = match interpreter.compile_datum(&datum) {
            Ok(blocks) => interpreter.execute(blocks),
            Err(error) => Err(error),
        };
        drain(&buffer, &mut pending, &mut transcript);
        match result {
            Ok(stack) => transcript.extend(
                stack
                    .iter()
                    .filter(|value| !matches!(value, Value::Unspecified))
                    .map(|value| format!("=> {}", value.write())),
            ),
            Err(error) => transcript.push(format!("error: {error}")),
        }
    }
    if !pending.is_empty() {
        transcript.push(format!("| {pending}"));
    }
    transcript
}

fn program_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let (notes, expected, source) = read_datatest(&contents);
    let got = transcript(&source);

    if std::env::var("DATATEST_EXPECT").is_ok() {
        let mut lines: Vec<&str> = notes;
        lines.extend(got.iter().map(String::as_str));
        lines.push("---");
        lines.push(&source);
        std::fs::write(path, lines.join("\n") + "\n")?;
        return Ok(());
    }

    let expected: Vec<&str> = expected.iter().map(|line| line.trim_end()).collect();
    let got: Vec<&str> = got.iter().map(|line| line.trim_end()).collect();
    if expected != got {
        println!(
            "error in {path}: transcript mismatch\n\nGot:\n{}\n\nExpected:\n{}",
            got.join("\n"),
            expected.join("\n")
        );
        Err(DatatestError(Box::from(path)))?
    }
    Ok(())
}

datatest_stable::harness! {
    program_test, "test_data", r"^.*\.scm",
}
