//! The host-facing driver: source text in, values out.
//!
//! Every top-level datum is expanded and compiled into its own block, and each
//! block runs with a fresh continuation. Blocks share nothing but the global
//! environment, so a host can recover from an error in one block and go on
//! with the next (see [`Interpreter::run_each`]).
use std::rc::Rc;

use crate::{
    compiler::{self, bytecode::Block, environment::Environment},
    expander,
    reader::{self, SyntaxError},
    world::{
        self,
        fuel::Fuel,
        value::{OutputPort, Value},
    },
    Error,
};

use super::machine::Machine;

pub struct Interpreter {
    machine: Machine,
    fold_case: bool,
}

impl Interpreter {
    /// An interpreter writing to standard output
    pub fn new() -> Result<Self, Error> {
        Self::with_output(OutputPort::stdout())
    }

    pub fn with_output(output: OutputPort) -> Result<Self, Error> {
        world::initialize()?;
        Ok(Self {
            machine: Machine::new(Environment::new(), output),
            fold_case: false,
        })
    }

    /// Reads all following source as if it started with `#!fold-case`.
    pub fn set_fold_case(&mut self, fold_case: bool) {
        self.fold_case = fold_case;
    }

    pub fn global(&self) -> &Environment {
        self.machine.global()
    }

    pub fn machine(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn parse(&self, source: &str) -> Result<reader::Program, SyntaxError> {
        reader::parse_with(source, self.fold_case)
    }

    /// Expands and compiles one datum. Syntax definitions take effect right away.
    pub fn compile_datum(&self, datum: &Value) -> Result<Vec<Block>, Error> {
        let exprs = expander::expand_toplevel(datum, self.global())?;
        let blocks: Vec<Block> = exprs.iter().map(compiler::compile).collect();
        tracing::debug!(
            forms = blocks.len(),
            instructions = blocks.iter().map(Block::len).sum::<usize>(),
            "compiled datum"
        );
        Ok(blocks)
    }

    /// Compiles every datum of `source` without running any of them.
    pub fn compile(&self, source: &str) -> Result<Vec<Block>, Error> {
        let mut blocks = vec![];
        for datum in self.parse(source)? {
            blocks.extend(self.compile_datum(&datum)?);
        }
        Ok(blocks)
    }

    /// Runs blocks in order, returning the final value stack of the last one.
    pub fn execute(&mut self, blocks: impl IntoIterator<Item = Block>) -> Result<Vec<Value>, Error> {
        let mut stack = vec![];
        for block in blocks {
            stack = self.execute_block(block)?;
        }
        Ok(stack)
    }

    fn execute_block(&mut self, block: Block) -> Result<Vec<Value>, Error> {
        tracing::trace!(instructions = block.len(), "executing block");
        Ok(self.machine.execute(Rc::new(block))?)
    }

    /// Runs `block` in slices of `slice` instructions, calling `between` after every
    /// slice that did not finish the block. `between` returning false abandons it.
    pub fn execute_sliced(
        &mut self,
        block: Block,
        slice: i64,
        mut between: impl FnMut() -> bool,
    ) -> Result<Option<Vec<Value>>, Error> {
        self.machine.load(Rc::new(block));
        let mut fuel = Fuel::empty();
        loop {
            fuel.refill(slice, slice);
            if let Some(stack) = self.machine.run(&mut fuel)? {
                return Ok(Some(stack));
            }
            if !between() {
                return Ok(None);
            }
        }
    }

    /// Reads, compiles and runs `source` one datum at a time, stopping at the
    /// first error. Returns the final value stack of the last block.
    pub fn run(&mut self, source: &str) -> Result<Vec<Value>, Error> {
        let mut stack = vec![];
        for datum in self.parse(source)? {
            for block in self.compile_datum(&datum)? {
                stack = self.execute_block(block)?;
            }
        }
        Ok(stack)
    }

    /// Like [`Self::run`], but an error only abandons the datum it came from.
    ///
    /// Only a syntax error, which leaves nothing to run, fails as a whole.
    pub fn run_each(&mut self, source: &str) -> Result<Vec<Result<Vec<Value>, Error>>, SyntaxError> {
        let program = self.parse(source)?;
        Ok(program
            .iter()
            .map(|datum| {
                let blocks = self.compile_datum(datum)?;
                self.execute(blocks)
            })
            .collect())
    }

    /// The value of the last form in `source`
    pub fn eval_str(&mut self, source: &str) -> Result<Value, Error> {
        let mut stack = self.run(source)?;
        Ok(stack.pop().unwrap_or(Value::Unspecified))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        rc::Rc,
        sync::{Arc, Mutex},
    };

    use assert2::{check, let_assert};

    use super::Interpreter;
    use crate::{
        runtime::RuntimeError,
        world::{fuel::Fuel, value::OutputPort},
        Error,
    };

    fn interpreter() -> (Interpreter, Arc<Mutex<Vec<u8>>>) {
        let (port, buffer) = OutputPort::buffer();
        let_assert!(Ok(interpreter) = Interpreter::with_output(port));
        (interpreter, buffer)
    }

    fn eval(source: &str) -> String {
        let (mut interpreter, _) = interpreter();
        match interpreter.eval_str(source) {
            Ok(value) => value.write().to_string(),
            Err(error) => format!("error: {error}"),
        }
    }

    fn output(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
        let_assert!(Ok(bytes) = buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn literals_print_as_read() {
        check!(eval("'#(a b c)") == "#(a b c)");
        check!(eval("\"text\"") == "\"text\"");
        check!(eval("#\\a") == "#\\a");
        check!(eval("'(1 . 2)") == "(1 . 2)");
    }

    #[test]
    fn let_is_lambda() {
        check!(eval("(let ((x 2) (y 3)) (* x y))") == "6");
        check!(eval("((lambda (x y) (* x y)) 2 3)") == "6");
    }

    #[test]
    fn exactness() {
        check!(eval("(+ 1/2 1/3)") == "5/6");
        check!(eval("(+ 1/2 .5)") == "1.0");
        check!(eval("(< 1+2i 3+4i)").starts_with("error: <: expected a real number"));
    }

    #[test]
    fn identity() {
        check!(eval("(eq? 'a 'a)") == "#t");
        check!(eval("(eq? (list 'a) (list 'a))") == "#f");
        check!(eval("(equal? (list 'a) (list 'a))") == "#t");
    }

    #[test]
    fn tail_calls_run_in_constant_space() {
        let source = "(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1)))) (loop 100000 0)";
        check!(eval(source) == "100000");
    }

    // Runs the last form of `source` one instruction at a time, tracking how
    // deep the continuation chain gets.
    fn deepest_continuation(source: &str) -> (usize, String) {
        let (mut interpreter, _) = interpreter();
        let_assert!(Ok(mut blocks) = interpreter.compile(source));
        let_assert!(Some(last) = blocks.pop());
        let_assert!(Ok(_) = interpreter.execute(blocks));
        let machine = interpreter.machine();
        machine.load(Rc::new(last));
        let mut fuel = Fuel::empty();
        let mut deepest = 0;
        loop {
            fuel.refill(1, 1);
            let_assert!(Ok(finished) = machine.run(&mut fuel));
            if let Some(mut stack) = finished {
                let value = stack.pop().map(|value| value.to_string()).unwrap_or_default();
                return (deepest, value);
            }
            deepest = deepest.max(machine.depth().unwrap_or(0));
        }
    }

    #[test]
    fn tail_calls_discard_their_frames() {
        let looping = "(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1)))) (loop 10000 0)";
        let (deepest, value) = deepest_continuation(looping);
        check!(value == "10000");
        check!(deepest < 10);

        let counting = "(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1))))) (count 10000)";
        let (deepest, value) = deepest_continuation(counting);
        check!(value == "10000");
        check!(deepest > 1000);
    }

    #[test]
    fn deep_recursion_lives_on_the_heap() {
        let source = "(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1))))) (count 100000)";
        check!(eval(source) == "100000");
    }

    #[test]
    fn continuations_reenter() {
        let source = "
            (let ((k #f) (n 0))
              (let ((result (+ 100 (call/cc (lambda (c) (set! k c) 1)))))
                (set! n (+ n 1))
                (if (< n 3) (k n) (list n result))))";
        check!(eval(source) == "(3 102)");
    }

    #[test]
    fn dynamic_wind_runs_guards_on_every_transition() {
        let source = "
            (define trail '())
            (define (note x) (set! trail (cons x trail)))
            (define k #f)
            (dynamic-wind
              (lambda () (note 'connect))
              (lambda () (call/cc (lambda (c) (set! k c))) (note 'talk))
              (lambda () (note 'disconnect)))
            (if (< (length trail) 6) (k 'again))
            (reverse trail)";
        check!(eval(source) == "(connect talk disconnect connect talk disconnect)");
    }

    #[test]
    fn escaping_runs_after_thunks() {
        let source = "
            (define trail '())
            (call/cc (lambda (escape)
              (dynamic-wind
                (lambda () (set! trail (cons 'in trail)))
                (lambda () (escape 'out))
                (lambda () (set! trail (cons 'after trail))))))
            trail";
        check!(eval(source) == "(after in)");
    }

    #[test]
    fn macros_reach_the_bindings_they_were_written_against() {
        let inc = "((lambda (x) (let-syntax ((inc! (syntax-rules () ((_) (set! x (+ x 1)))))) (inc!) x)) 10)";
        check!(eval(inc) == "11");
        let get = "((lambda (x) (let-syntax ((get (syntax-rules () ((_) x)))) (set! x 99) (get))) 10)";
        check!(eval(get) == "99");
        let shadowed = "((lambda (x) (let-syntax ((get (syntax-rules () ((_) x)))) (let ((x 2)) (get)))) 1)";
        check!(eval(shadowed) == "1");
        let recursive = "
            (letrec-syntax ((my-and (syntax-rules ()
                                      ((_) #t)
                                      ((_ e) e)
                                      ((_ e r ...) (if e (my-and r ...) #f)))))
              (let ((if list)) (my-and 1 2 3)))";
        check!(eval(recursive) == "3");
    }

    #[test]
    fn macro_binders_do_not_capture_user_code() {
        let my_or = "
            (define-syntax my-or
              (syntax-rules ()
                ((_) #f)
                ((_ e) e)
                ((_ e r ...) (let ((t e)) (if t t (my-or r ...))))))
            (let ((t 5)) (my-or #f t))";
        check!(eval(my_or) == "5");
        let swap = "
            (define-syntax swap!
              (syntax-rules () ((_ a b) (let ((tmp a)) (set! a b) (set! b tmp)))))
            (define x 1)
            (define tmp 3)
            (swap! x tmp)
            (list x tmp)";
        check!(eval(swap) == "(3 1)");
        check!(eval("(let loop ((i 0) (loop-count 3)) (if (= i loop-count) 'done (loop (+ i 1) loop-count)))") == "done");
    }

    #[test]
    fn body_definitions_see_each_other() {
        let source = "
            (define (parity n)
              (define (even? n) (if (= n 0) #t (odd? (- n 1))))
              (define (odd? n) (if (= n 0) #f (even? (- n 1))))
              (even? n))
            (list (parity 10) (parity 7) (even? 4))";
        check!(eval(source) == "(#t #f #t)");
    }

    #[test]
    fn macros_define_globals_by_name() {
        let source = "
            (define-syntax define-constant
              (syntax-rules () ((_ name value) (define name value))))
            (define-constant answer 42)
            answer";
        check!(eval(source) == "42");
        check!(eval("(define-syntax tag (syntax-rules () ((_ v) `(label ,v)))) (eq? (car (tag 1)) 'label)") == "#t");
    }

    #[test]
    fn multiple_values() {
        check!(eval("(call-with-values (lambda () (values 1 2)) +)") == "3");
        check!(eval("(call-with-values (lambda () 5) list)") == "(5)");
        check!(eval("(let-values (((a b) (values 1 2)) ((c) (values 3))) (list a b c))") == "(1 2 3)");
    }

    #[test]
    fn eval_uses_the_given_environment() {
        check!(eval("(eval '(* 6 7))") == "42");
        check!(eval("(define x 5) (eval 'x (interaction-environment))") == "5");
    }

    #[test]
    fn output_goes_to_the_port() {
        let (mut interpreter, buffer) = interpreter();
        let_assert!(Ok(_) = interpreter.run("(display \"hi\") (write \"hi\") (newline) (write-char #\\x)"));
        check!(output(&buffer) == "hi\"hi\"\nx");
    }

    #[test]
    fn errors_are_fatal_to_one_datum() {
        let (mut interpreter, _) = interpreter();
        let_assert!(Ok(results) = interpreter.run_each("(define a 1) (car '()) (+ a 1)"));
        check!(results.len() == 3);
        let_assert!(Err(Error::Runtime(RuntimeError::Type { operation: "car", .. })) = &results[1]);
        let_assert!(Ok(stack) = &results[2]);
        check!(stack[0].to_string() == "2");
    }

    #[test]
    fn error_messages_carry_values() {
        check!(eval("(undefined-thing)") == "error: unbound variable: undefined-thing");
        check!(eval("((lambda (x) x))") == "error: #<procedure>: expected 1 arguments, got 0");
        check!(eval("(5 1)") == "error: not applicable: 5");
        check!(eval("(error \"bad thing:\" 'x 42)") == "error: bad thing: x 42");
    }

    #[test]
    fn sliced_execution_finishes() {
        let (mut interpreter, _) = interpreter();
        let_assert!(Ok(blocks) = interpreter.compile("(define (f n) (if (= n 0) 'done (f (- n 1)))) (f 1000)"));
        let mut slices = 0;
        let mut last = None;
        for block in blocks {
            let_assert!(Ok(Some(stack)) = interpreter.execute_sliced(block, 50, || {
                slices += 1;
                true
            }));
            last = stack.last().cloned();
        }
        check!(slices > 10);
        let_assert!(Some(value) = last);
        check!(value.to_string() == "done");
    }
}
