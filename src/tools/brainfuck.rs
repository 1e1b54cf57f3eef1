//! Brainfuck toolchain
//!
//! Four embedded programs share one front end:
//!
//! - `bf-lex <file>`: command tokens with positions
//! - `bf-parse <file>`: syntax tree with loop nesting
//! - `bf-opt --level N <file>`: optimized instruction listing
//! - `bf-run --level N --tape T --max-steps S --trace K <file>`: traced run
//!
//! Level 0 keeps one instruction per command, level 1 folds runs of `+-`
//! and `<>`, level 2 and above also turn `[-]`/`[+]` into a single clear.

use crate::core::types::{
    CodeEdgeKind, CodeListing, CodeUnitKind, Diagnostic, ExecutionTrace, StageOutput,
    SyntaxTree, Token, TokenKind, TraceStep,
};
use crate::sandbox::{Abort, EmbeddedContext, EmbeddedProgram};
use crate::tools::{read_source, EmbeddedReport};

const COMMANDS: &[char] = &['+', '-', '<', '>', '.', ',', '[', ']'];
const TAPE_WINDOW: usize = 16;

/// One source command with its position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Command {
    symbol: char,
    line: u32,
    column: u32,
}

fn commands(source: &str) -> Vec<Command> {
    let mut out = Vec::new();
    for (index, text) in source.lines().enumerate() {
        for (col, symbol) in text.chars().enumerate() {
            if COMMANDS.contains(&symbol) {
                out.push(Command {
                    symbol,
                    line: index as u32 + 1,
                    column: col as u32 + 1,
                });
            }
        }
    }
    out
}

/// Pair brackets; unmatched ones become error diagnostics
fn bracket_errors(cmds: &[Command]) -> Vec<Diagnostic> {
    let mut open = Vec::new();
    let mut errors = Vec::new();
    for (i, cmd) in cmds.iter().enumerate() {
        match cmd.symbol {
            '[' => open.push(i),
            ']' => {
                if open.pop().is_none() {
                    errors.push(
                        Diagnostic::error("unmatched ']'").at(Some(cmd.line), Some(cmd.column)),
                    );
                }
            }
            _ => {}
        }
    }
    for start in open {
        let cmd = cmds[start];
        errors.push(Diagnostic::error("unmatched '['").at(Some(cmd.line), Some(cmd.column)));
    }
    errors.sort_by_key(|d| (d.line, d.column));
    errors
}

fn node_kind(symbol: char) -> &'static str {
    match symbol {
        '+' => "increment",
        '-' => "decrement",
        '>' => "move_right",
        '<' => "move_left",
        '.' => "output",
        ',' => "input",
        _ => "loop",
    }
}

/// Syntax tree: `program` root, one node per command, loops own their body
pub fn parse_tree(source: &str, file: &str) -> (SyntaxTree, Vec<Diagnostic>) {
    let cmds = commands(source);
    let errors = bracket_errors(&cmds);
    let mut tree = SyntaxTree::default();
    let root = tree.push("program", file, None);
    let mut parents = vec![root];
    for cmd in &cmds {
        let parent = parents.last().copied().unwrap_or(root);
        match cmd.symbol {
            '[' => {
                let node = tree.push_at("loop", "[ ]", Some(parent), Some(cmd.line), Some(cmd.column));
                parents.push(node);
            }
            ']' => {
                if parents.len() > 1 {
                    parents.pop();
                }
            }
            symbol => {
                tree.push_at(
                    node_kind(symbol),
                    symbol.to_string(),
                    Some(parent),
                    Some(cmd.line),
                    Some(cmd.column),
                );
            }
        }
    }
    (tree, errors)
}

/// Instruction after optimization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add(i32),
    Move(isize),
    Output,
    Input,
    /// Jump past the matching `LoopEnd` when the cell is zero
    LoopStart(usize),
    /// Jump back after the matching `LoopStart` when the cell is non-zero
    LoopEnd(usize),
    Clear,
}

impl Op {
    fn describe(self) -> String {
        match self {
            Op::Add(n) if n >= 0 => format!("add +{}", n),
            Op::Add(n) => format!("add {}", n),
            Op::Move(n) if n >= 0 => format!("move +{}", n),
            Op::Move(n) => format!("move {}", n),
            Op::Output => "output".to_string(),
            Op::Input => "input".to_string(),
            Op::LoopStart(_) => "loop_start".to_string(),
            Op::LoopEnd(_) => "loop_end".to_string(),
            Op::Clear => "clear".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub ops: Vec<Op>,
    /// Source line of each op
    pub lines: Vec<u32>,
}

/// Compile commands to ops. Fails with diagnostics on unmatched brackets.
pub fn compile(source: &str, level: u8) -> Result<Program, Vec<Diagnostic>> {
    let cmds = commands(source);
    let errors = bracket_errors(&cmds);
    if !errors.is_empty() {
        return Err(errors);
    }

    let mut ops: Vec<Op> = Vec::new();
    let mut lines: Vec<u32> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < cmds.len() {
        let cmd = cmds[i];
        if level >= 2
            && cmd.symbol == '['
            && i + 2 < cmds.len()
            && matches!(cmds[i + 1].symbol, '-' | '+')
            && cmds[i + 2].symbol == ']'
        {
            ops.push(Op::Clear);
            lines.push(cmd.line);
            i += 3;
            continue;
        }
        match cmd.symbol {
            '+' | '-' | '<' | '>' => {
                let mut j = i;
                let mut delta: i64 = 0;
                let moves = matches!(cmd.symbol, '<' | '>');
                loop {
                    let Some(next) = cmds.get(j) else { break };
                    let step = match (moves, next.symbol) {
                        (false, '+') | (true, '>') => 1,
                        (false, '-') | (true, '<') => -1,
                        _ => break,
                    };
                    delta += step;
                    j += 1;
                    if level == 0 {
                        break;
                    }
                }
                i = j;
                if delta == 0 {
                    continue;
                }
                ops.push(if moves {
                    Op::Move(delta as isize)
                } else {
                    Op::Add(delta as i32)
                });
                lines.push(cmd.line);
                continue;
            }
            '.' => ops.push(Op::Output),
            ',' => ops.push(Op::Input),
            '[' => {
                open.push(ops.len());
                ops.push(Op::LoopStart(0));
            }
            _ => {
                let Some(start) = open.pop() else {
                    // brackets were checked above
                    i += 1;
                    continue;
                };
                let end = ops.len();
                ops[start] = Op::LoopStart(end);
                ops.push(Op::LoopEnd(start));
            }
        }
        lines.push(cmd.line);
        i += 1;
    }
    Ok(Program { ops, lines })
}

impl Program {
    pub fn listing(&self) -> CodeListing {
        let mut listing = CodeListing::default();
        let module = listing.push(CodeUnitKind::Module, "program", None);
        let main = listing.push(CodeUnitKind::Function, "main", Some(module));
        let units: Vec<usize> = self
            .ops
            .iter()
            .enumerate()
            .map(|(pc, op)| {
                let unit = listing.push(
                    CodeUnitKind::Instruction,
                    format!("{}: {}", pc, op.describe()),
                    Some(main),
                );
                listing.units[unit].line = self.lines.get(pc).copied();
                unit
            })
            .collect();

        for (pc, op) in self.ops.iter().enumerate() {
            if let Some(next) = units.get(pc + 1) {
                listing.connect(units[pc], *next, CodeEdgeKind::Flow);
            }
            match *op {
                Op::LoopStart(end) => {
                    if let Some(target) = units.get(end + 1) {
                        listing.connect(units[pc], *target, CodeEdgeKind::Branch);
                    }
                }
                Op::LoopEnd(start) => {
                    if let Some(target) = units.get(start + 1) {
                        listing.connect(units[pc], *target, CodeEdgeKind::Branch);
                    }
                }
                _ => {}
            }
        }
        listing
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RunConfig {
    pub tape_cells: usize,
    pub max_steps: u64,
    pub trace_steps: usize,
}

/// How an interpreted run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEnd {
    Finished,
    StepLimit,
    /// A sandbox budget stopped the run
    Aborted(Abort),
}

/// Interpret `program`; `tick` is called once per executed op. The trace
/// covers whatever ran, however the run ended.
pub fn execute<F>(
    program: &Program,
    input: &[u8],
    config: RunConfig,
    mut tick: F,
) -> (ExecutionTrace, RunEnd)
where
    F: FnMut() -> Result<(), Abort>,
{
    let mut tape = vec![0u8; config.tape_cells.max(1)];
    let mut pointer: usize = 0;
    let mut pc: usize = 0;
    let mut input_pos = 0;
    let mut output: Vec<u8> = Vec::new();
    let mut trace = ExecutionTrace::default();
    let mut end = RunEnd::Finished;

    while let Some(op) = program.ops.get(pc).copied() {
        if trace.executed_steps >= config.max_steps {
            end = RunEnd::StepLimit;
            break;
        }
        if let Err(abort) = tick() {
            end = RunEnd::Aborted(abort);
            break;
        }
        let mut next = pc + 1;
        match op {
            Op::Add(n) => tape[pointer] = (tape[pointer] as i32 + n).rem_euclid(256) as u8,
            // the tape is circular, like the cells
            Op::Move(n) => {
                pointer = (pointer as isize + n).rem_euclid(tape.len() as isize) as usize;
            }
            Op::Output => output.push(tape[pointer]),
            Op::Input => {
                tape[pointer] = input.get(input_pos).copied().unwrap_or(0);
                input_pos += 1;
            }
            Op::LoopStart(end_pc) => {
                if tape[pointer] == 0 {
                    next = end_pc + 1;
                }
            }
            Op::LoopEnd(start_pc) => {
                if tape[pointer] != 0 {
                    next = start_pc + 1;
                }
            }
            Op::Clear => tape[pointer] = 0,
        }
        trace.executed_steps += 1;
        if trace.steps.len() < config.trace_steps {
            trace.steps.push(TraceStep {
                step: trace.executed_steps,
                pc,
                instruction: op.describe(),
                pointer,
                cell: tape[pointer],
            });
        }
        pc = next;
    }

    trace.truncated = trace.executed_steps as usize > trace.steps.len();
    trace.output = String::from_utf8_lossy(&output).into_owned();
    trace.final_pointer = pointer;
    let used = tape
        .iter()
        .rposition(|cell| *cell != 0)
        .map(|i| i + 1)
        .unwrap_or(0)
        .max(pointer + 1)
        .min(TAPE_WINDOW)
        .min(tape.len());
    trace.tape_window = tape[..used].to_vec();
    (trace, end)
}

fn level(ctx: &EmbeddedContext<'_>) -> u8 {
    ctx.flag_value("--level")
        .and_then(|v| v.trim_start_matches('O').parse().ok())
        .unwrap_or(0)
}

fn numeric<T: std::str::FromStr>(ctx: &EmbeddedContext<'_>, flag: &str, default: T) -> T {
    ctx.flag_value(flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn file_label(ctx: &EmbeddedContext<'_>) -> String {
    ctx.positional()
        .first()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "program.bf".to_string())
}

pub struct BfLexer;

impl EmbeddedProgram for BfLexer {
    fn name(&self) -> &str {
        "bf-lex"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        let mut tokens = Vec::new();
        for cmd in commands(&source) {
            ctx.tick()?;
            tokens.push(Token::new(TokenKind::Instruction, cmd.symbol.to_string()).at(cmd.line, cmd.column));
        }
        EmbeddedReport::new(StageOutput::Tokens(tokens), Vec::new()).emit(ctx);
        Ok(0)
    }
}

pub struct BfParser;

impl EmbeddedProgram for BfParser {
    fn name(&self) -> &str {
        "bf-parse"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let label = file_label(ctx);
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        let (tree, errors) = parse_tree(&source, &label);
        ctx.charge_memory(tree.len() as u64 * 64)?;
        let code = if errors.is_empty() { 0 } else { 1 };
        EmbeddedReport::new(StageOutput::Tree(tree), errors).emit(ctx);
        Ok(code)
    }
}

pub struct BfOptimizer;

impl EmbeddedProgram for BfOptimizer {
    fn name(&self) -> &str {
        "bf-opt"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let level = level(ctx);
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        match compile(&source, level) {
            Ok(program) => {
                ctx.charge_memory(program.ops.len() as u64 * 64)?;
                let notes = vec![Diagnostic::info(format!(
                    "{} commands reduced to {} instructions at level {}",
                    commands(&source).len(),
                    program.ops.len(),
                    level
                ))];
                EmbeddedReport::new(StageOutput::Code(program.listing()), notes).emit(ctx);
                Ok(0)
            }
            Err(errors) => {
                EmbeddedReport::new(StageOutput::None, errors).emit(ctx);
                Ok(1)
            }
        }
    }
}

pub struct BfInterpreter;

impl EmbeddedProgram for BfInterpreter {
    fn name(&self) -> &str {
        "bf-run"
    }

    fn run(&self, ctx: &mut EmbeddedContext<'_>) -> Result<i32, Abort> {
        let level = level(ctx);
        let config = RunConfig {
            tape_cells: numeric(ctx, "--tape", 30_000),
            max_steps: numeric(ctx, "--max-steps", 5_000_000),
            trace_steps: numeric(ctx, "--trace", 256),
        };
        let Some(source) = read_source(ctx) else {
            return Ok(2);
        };
        let program = match compile(&source, level) {
            Ok(program) => program,
            Err(errors) => {
                EmbeddedReport::new(StageOutput::None, errors).emit(ctx);
                return Ok(1);
            }
        };
        ctx.charge_memory(config.tape_cells as u64)?;

        let input = ctx.stdin().to_vec();
        let (trace, end) = execute(&program, &input, config, || ctx.tick());

        let mut diagnostics = Vec::new();
        if end == RunEnd::StepLimit {
            diagnostics.push(Diagnostic::error(format!(
                "step limit of {} reached",
                config.max_steps
            )));
        }
        EmbeddedReport::new(StageOutput::Trace(trace), diagnostics).emit(ctx);
        match end {
            RunEnd::Aborted(abort) => Err(abort),
            RunEnd::StepLimit => Err(Abort::Cpu),
            RunEnd::Finished => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";

    fn config() -> RunConfig {
        RunConfig {
            tape_cells: 64,
            max_steps: 100_000,
            trace_steps: 8,
        }
    }

    #[test]
    fn test_hello_world_runs_at_every_level() {
        for level in 0..=3 {
            let program = compile(HELLO, level).unwrap();
            let (trace, end) = execute(&program, &[], config(), || Ok(()));
            assert_eq!(end, RunEnd::Finished);
            assert_eq!(trace.output, "Hello World!\n", "level {}", level);
            assert_eq!(trace.steps.len(), 8);
            assert!(trace.truncated);
        }
    }

    #[test]
    fn test_levels_shrink_the_program() {
        let source = "+++[-]>>><";
        assert_eq!(compile(source, 0).unwrap().ops.len(), 10);
        let folded = compile(source, 1).unwrap();
        assert_eq!(folded.ops[0], Op::Add(3));
        assert_eq!(folded.ops.len(), 5);
        let cleared = compile(source, 2).unwrap();
        assert_eq!(cleared.ops, vec![Op::Add(3), Op::Clear, Op::Move(2)]);
    }

    #[test]
    fn test_unmatched_brackets_are_positioned() {
        let errors = compile("+\n]+[", 1).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "unmatched ']'");
        assert_eq!((errors[0].line, errors[0].column), (Some(2), Some(1)));
        assert_eq!(errors[1].message, "unmatched '['");
        assert_eq!((errors[1].line, errors[1].column), (Some(2), Some(3)));
    }

    #[test]
    fn test_parse_tree_nests_loops() {
        let (tree, errors) = parse_tree("+[->+<]", "program.bf");
        assert!(errors.is_empty());
        assert_eq!(tree.nodes[0].kind, "program");
        let lp = tree.nodes.iter().position(|n| n.kind == "loop").unwrap();
        assert_eq!(tree.children(lp).count(), 4);
        assert_eq!(tree.children(0).count(), 2);
    }

    #[test]
    fn test_listing_has_loop_branches() {
        let program = compile("+[-].", 1).unwrap();
        let listing = program.listing();
        assert_eq!(listing.count(CodeUnitKind::Instruction), 5);
        let branches = listing
            .edges
            .iter()
            .filter(|e| e.kind == CodeEdgeKind::Branch)
            .count();
        // loop_start skips past the end; loop_end returns to the body
        assert_eq!(branches, 2);
    }

    #[test]
    fn test_step_limit() {
        let spin = compile("+[]", 1).unwrap();
        let (trace, end) = execute(&spin, &[], config(), || Ok(()));
        assert_eq!(end, RunEnd::StepLimit);
        assert_eq!(trace.executed_steps, 100_000);
    }

    #[test]
    fn test_pointer_wraps_around_the_tape() {
        // 'A' is 65; one step left of cell 0 is the last cell
        let source = format!("<{}.>.", "+".repeat(65));
        for level in 0..=2 {
            let program = compile(&source, level).unwrap();
            let (trace, end) = execute(&program, &[], config(), || Ok(()));
            assert_eq!(end, RunEnd::Finished);
            assert_eq!(trace.output, "A\0", "level {}", level);
            assert_eq!(trace.final_pointer, 0);
        }

        let program = compile(&">".repeat(65), 1).unwrap();
        let (trace, _) = execute(&program, &[], config(), || Ok(()));
        assert_eq!(trace.final_pointer, 1);
    }

    #[test]
    fn test_input_is_echoed() {
        let program = compile(",.,.", 0).unwrap();
        let (trace, _) = execute(&program, b"hi", config(), || Ok(()));
        assert_eq!(trace.output, "hi");
    }

    #[test]
    fn test_tick_abort_propagates() {
        let program = compile("+[]", 1).unwrap();
        let (trace, end) = execute(&program, &[], config(), || Err(Abort::WallTime));
        assert_eq!(end, RunEnd::Aborted(Abort::WallTime));
        assert_eq!(trace.executed_steps, 0);
    }
}
