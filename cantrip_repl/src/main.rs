use std::{ops::Range, path::PathBuf};

use cantrip::{
    lexer::{LexerError, Token},
    value::Value,
    Block as Bytecode, Error, Interpreter, SyntaxError,
};
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use rustyline::error::ReadlineError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use yansi::Paint;

#[derive(Parser, Debug)]
#[command(version, about = "Run Scheme programs, or talk to one")]
struct Args {
    /// Source files to run, in order, before the prompt opens
    files: Vec<PathBuf>,
    /// Exit after running the files instead of opening a prompt
    #[arg(long)]
    batch: bool,
    /// Print the bytecode of every form before running it
    #[arg(long)]
    dump: bool,
    /// Label the tokens of each input instead of running it
    #[arg(long)]
    tokens: bool,
    /// Read everything as if it started with #!fold-case
    #[arg(long)]
    fold_case: bool,
    /// Abandon any top-level form that runs longer than this many instructions
    #[arg(long)]
    fuel: Option<i64>,
}

fn print_block(name: &str, block: Option<Block<&str, String>>) {
    if let Some(block) = block {
        let block = block.map_code(|c| CodeWidth::new(c, c.len()));
        println!("{}[{name}]", block.prologue());
        print!("{block}");
        println!("{}", block.epilogue());
    }
}

fn token_block<'a>(
    idx: &'a LineIndex,
    labels: impl IntoIterator<Item = (Range<usize>, Result<Token, LexerError>)>,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        labels.into_iter().map(|(range, tok)| {
            let text = format!("{tok:?}");
            Label::new(range)
                .with_text(if tok.is_ok() {
                    text.green().to_string()
                } else {
                    text.red().to_string()
                })
                .with_style(move |s| match tok {
                    Ok(Token::Atom(_) | Token::PipedIdentifier(_)) => s.blue().to_string(),
                    Ok(Token::Character(_)) => s.yellow().to_string(),
                    Ok(Token::String(_)) => s.cyan().to_string(),
                    Ok(Token::Number(_)) => s.magenta().to_string(),
                    Ok(_) => s,
                    Err(_) => s.red().to_string(),
                })
        }),
    )
}

fn show_tokens(name: &str, src: &str) {
    let idx = LineIndex::new(src);
    let mut line_labels = vec![];
    for (token, span) in Token::lexer(src).spanned() {
        match token {
            Ok(Token::LineEnding) => print_block(name, token_block(&idx, line_labels.drain(..))),
            Ok(Token::IntralineWhitespace) => {}
            tok => line_labels.push((span, tok)),
        }
    }
    if !line_labels.is_empty() {
        print_block(name, token_block(&idx, line_labels.drain(..)));
    }
}

fn report_syntax_error(name: &str, src: &str, error: &SyntaxError) {
    let span = error.span();
    if span.end > src.len() || !src.is_char_boundary(span.end) {
        println!("{}", format!("{name}:{}:{}: {error}", error.line, error.column).red());
        return;
    }
    let idx = LineIndex::new(src);
    let label = Label::new(span)
        .with_text(error.to_string().red().to_string())
        .with_style(|s| s.red().to_string());
    print_block(name, Block::new(&idx, [label]));
}

fn report(error: &Error) {
    let stage = match error {
        Error::Syntax(_) => "syntax error",
        Error::Expand(_) => "expansion error",
        Error::Compile(_) => "compile error",
        Error::Runtime(_) => "error",
    };
    println!("{}: {error}", stage.red().bold());
}

struct Session {
    interpreter: Interpreter,
    dump: bool,
    fuel: Option<i64>,
}

impl Session {
    fn execute(&mut self, block: Bytecode) -> Result<Option<Vec<Value>>, Error> {
        match self.fuel {
            Some(fuel) => self.interpreter.execute_sliced(block, fuel, || false),
            None => self.interpreter.execute([block]).map(Some),
        }
    }

    /// Runs every datum in `src`, reporting errors as it goes. Returns false if
    /// anything failed.
    fn run(&mut self, name: &str, src: &str, echo: bool) -> bool {
        let program = match self.interpreter.parse(src) {
            Ok(program) => program,
            Err(error) => {
                report_syntax_error(name, src, &error);
                return false;
            }
        };

        let mut ok = true;
        'data: for datum in program {
            let blocks = match self.interpreter.compile_datum(&datum) {
                Ok(blocks) => blocks,
                Err(error) => {
                    report(&error);
                    ok = false;
                    continue;
                }
            };
            for block in blocks {
                if self.dump {
                    println!("{}", block.to_string().dim());
                }
                match self.execute(block) {
                    Ok(Some(stack)) if echo => {
                        for value in stack.iter().filter(|v| !matches!(v, Value::Unspecified)) {
                            println!("{}", value.write());
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        println!("{}", "out of fuel, form abandoned".yellow());
                        ok = false;
                        continue 'data;
                    }
                    Err(error) => {
                        report(&error);
                        ok = false;
                        continue 'data;
                    }
                }
            }
        }
        ok
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("CANTRIP_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut interpreter = Interpreter::new()?;
    interpreter.set_fold_case(args.fold_case);
    let mut session = Session {
        interpreter,
        dump: args.dump,
        fuel: args.fuel,
    };

    let mut failed = false;
    for path in &args.files {
        let src = std::fs::read_to_string(path)?;
        let name = path.display().to_string();
        tracing::info!(file = %name, "running");
        if args.tokens {
            show_tokens(&name, &src);
        } else {
            failed |= !session.run(&name, &src, false);
        }
    }
    if args.batch {
        if failed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { ">> " } else { ".. " };
        let input = match readline.readline(prompt) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error.into()),
        };
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&input);

        if args.tokens {
            show_tokens("repl", &buffer);
        } else {
            // keep reading while a datum is still open
            if let Err(error) = session.interpreter.parse(&buffer) {
                if error.is_incomplete() {
                    continue;
                }
            }
            session.run("repl", &buffer, true);
        }
        readline.add_history_entry(buffer.as_str())?;
        buffer.clear();
    }

    Ok(())
}
