/// LLVM IR and Swift SIL listings as function/block/instruction graphs
use crate::core::types::{CodeEdgeKind, CodeListing, CodeUnitKind};
use crate::frontend::{clip_label, compiled};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

const INSTRUCTION_WIDTH: usize = 72;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrFlavor {
    Llvm,
    Sil,
}

static LLVM_DEFINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"^define\b.*?@"?([^"(\s]+)"?\("#).ok());
static LLVM_DECLARE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"^declare\b.*?@"?([^"(\s]+)"?\("#).ok());
static LLVM_BLOCK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^([\w.$-]+):").ok());
static LLVM_TARGET: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"label %([\w.$-]+)").ok());
static LLVM_CALL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"\b(?:call|invoke)\b[^@]*@"?([\w.$-]+)"?\("#).ok());
static LLVM_SOURCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"^source_filename\s*=\s*"([^"]*)""#).ok());

static SIL_DEFINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^sil\b.*?@(\S+?)\s*:.*\{\s*$").ok());
static SIL_DECLARE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^sil\b.*?@(\S+?)\s*:").ok());
static SIL_BLOCK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(bb\d+)\b.*:").ok());
static SIL_TARGET: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(bb\d+)\b").ok());
static SIL_CALL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"function_ref @(\S+?)\s*:").ok());

const LLVM_TERMINATORS: &[&str] = &[
    "ret", "br", "switch", "indirectbr", "unreachable", "resume", "invoke", "callbr",
];

const SIL_TERMINATORS: &[&str] = &[
    "return", "br", "cond_br", "unreachable", "throw", "switch_enum", "switch_enum_addr",
    "switch_value", "checked_cast_br", "checked_cast_addr_br", "try_apply", "yield", "unwind",
    "dynamic_method_br",
];

struct Patterns {
    define: &'static Regex,
    declare: &'static Regex,
    block: &'static Regex,
    target: &'static Regex,
    call: &'static Regex,
    terminators: &'static [&'static str],
    comment: &'static str,
}

impl IrFlavor {
    fn patterns(self) -> Result<Patterns, String> {
        Ok(match self {
            IrFlavor::Llvm => Patterns {
                define: compiled(&LLVM_DEFINE, "llvm define")?,
                declare: compiled(&LLVM_DECLARE, "llvm declare")?,
                block: compiled(&LLVM_BLOCK, "llvm block")?,
                target: compiled(&LLVM_TARGET, "llvm target")?,
                call: compiled(&LLVM_CALL, "llvm call")?,
                terminators: LLVM_TERMINATORS,
                comment: ";",
            },
            IrFlavor::Sil => Patterns {
                define: compiled(&SIL_DEFINE, "sil define")?,
                declare: compiled(&SIL_DECLARE, "sil declare")?,
                block: compiled(&SIL_BLOCK, "sil block")?,
                target: compiled(&SIL_TARGET, "sil target")?,
                call: compiled(&SIL_CALL, "sil call")?,
                terminators: SIL_TERMINATORS,
                comment: "//",
            },
        })
    }

    fn is_module_marker(self, line: &str) -> bool {
        match self {
            IrFlavor::Llvm => {
                line.starts_with("; ModuleID")
                    || line.starts_with("source_filename")
                    || line.starts_with("target ")
            }
            IrFlavor::Sil => line.starts_with("sil_stage"),
        }
    }
}

struct FunctionState {
    unit: usize,
    blocks: Vec<(String, usize)>,
    block: Option<usize>,
    last_instruction: Option<usize>,
    terminated: bool,
    branches: Vec<(usize, String)>,
}

impl FunctionState {
    fn new(unit: usize) -> Self {
        Self {
            unit,
            blocks: Vec::new(),
            block: None,
            last_instruction: None,
            terminated: false,
            branches: Vec::new(),
        }
    }

    fn open_block(&mut self, listing: &mut CodeListing, name: &str) -> usize {
        let block = listing.push(CodeUnitKind::Block, name, Some(self.unit));
        if let (Some(previous), false) = (self.block, self.terminated) {
            listing.connect(previous, block, CodeEdgeKind::Flow);
        }
        self.blocks.push((name.to_string(), block));
        self.block = Some(block);
        self.last_instruction = None;
        self.terminated = false;
        block
    }

    fn close(self, listing: &mut CodeListing) {
        for (from, target) in self.branches {
            if let Some((_, to)) = self.blocks.iter().find(|(name, _)| *name == target) {
                listing.connect(from, *to, CodeEdgeKind::Branch);
            }
        }
    }
}

pub fn parse_listing(text: &str, flavor: IrFlavor) -> Result<CodeListing, String> {
    let p = flavor.patterns()?;
    let mut listing = CodeListing::default();
    let module_label = match flavor {
        IrFlavor::Llvm => compiled(&LLVM_SOURCE, "source filename")?
            .captures(text.lines().find(|l| l.starts_with("source_filename")).unwrap_or(""))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "module".to_string()),
        IrFlavor::Sil => "sil_module".to_string(),
    };
    let module = listing.push(CodeUnitKind::Module, module_label, None);

    let mut recognised = false;
    let mut function: Option<FunctionState> = None;
    let mut defined: HashMap<String, usize> = HashMap::new();
    let mut calls: Vec<(usize, String)> = Vec::new();

    for line in text.lines() {
        if flavor.is_module_marker(line) {
            recognised = true;
            continue;
        }

        if function.is_none() {
            if let Some(caps) = p.define.captures(line) {
                recognised = true;
                let name = caps[1].to_string();
                let unit = listing.push(CodeUnitKind::Function, name.as_str(), Some(module));
                defined.insert(name, unit);
                function = Some(FunctionState::new(unit));
            } else if let Some(caps) = p.declare.captures(line) {
                recognised = true;
                listing.external(&caps[1]);
            }
            continue;
        }

        let Some(state) = function.as_mut() else {
            continue;
        };

        if line.starts_with('}') {
            if let Some(done) = function.take() {
                done.close(&mut listing);
            }
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            if let Some(caps) = p.block.captures(line) {
                state.open_block(&mut listing, &caps[1]);
            }
            continue;
        }

        let body = strip_comment(line, p.comment).trim();
        if body.is_empty() {
            continue;
        }
        let block = match state.block {
            Some(block) => block,
            None => state.open_block(&mut listing, "entry"),
        };

        let instruction = listing.push(
            CodeUnitKind::Instruction,
            clip_label(body, INSTRUCTION_WIDTH),
            Some(block),
        );
        if let Some(previous) = state.last_instruction {
            listing.connect(previous, instruction, CodeEdgeKind::Flow);
        }
        state.last_instruction = Some(instruction);

        let opcode = opcode(body);
        state.terminated = p.terminators.contains(&opcode);
        if state.terminated {
            for caps in p.target.captures_iter(body) {
                state.branches.push((block, caps[1].to_string()));
            }
        }
        for caps in p.call.captures_iter(body) {
            let callee = &caps[1];
            if !callee.starts_with("llvm.dbg") {
                calls.push((state.unit, callee.to_string()));
            }
        }
    }

    if let Some(unfinished) = function.take() {
        unfinished.close(&mut listing);
    }

    for (caller, callee) in calls {
        let target = match defined.get(&callee) {
            Some(unit) => *unit,
            None => listing.external(&callee),
        };
        listing.connect(caller, target, CodeEdgeKind::Call);
    }

    if !recognised {
        return Err(match flavor {
            IrFlavor::Llvm => "no LLVM IR module in output".to_string(),
            IrFlavor::Sil => "no SIL module in output".to_string(),
        });
    }
    Ok(listing)
}

/// Instruction mnemonic, skipping a `%x = ` result binding
fn opcode(body: &str) -> &str {
    let mut words = body.split_whitespace();
    let first = words.next().unwrap_or("");
    if first.starts_with('%') && body.contains(" = ") {
        body.split_once(" = ")
            .and_then(|(_, rhs)| rhs.split_whitespace().next())
            .unwrap_or("")
    } else {
        first.trim_end_matches(',')
    }
}

fn strip_comment<'a>(line: &'a str, marker: &str) -> &'a str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        if c == '"' {
            in_string = !in_string;
        } else if !in_string && line[i..].starts_with(marker) {
            return &line[..i];
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLVM: &str = r#"; ModuleID = 'source.c'
source_filename = "source.c"
target triple = "x86_64-pc-linux-gnu"

@.str = private unnamed_addr constant [4 x i8] c"%d\0A\00", align 1

define dso_local i32 @square(i32 noundef %0) #0 {
  %2 = mul nsw i32 %0, %0
  ret i32 %2
}

define dso_local i32 @main() #0 {
entry:
  %i = alloca i32, align 4
  br label %for.cond

for.cond:                                         ; preds = %for.body, %entry
  %0 = load i32, ptr %i, align 4
  %cmp = icmp slt i32 %0, 10
  br i1 %cmp, label %for.body, label %for.end

for.body:                                         ; preds = %for.cond
  %call = call i32 @square(i32 noundef %0)
  %call1 = call i32 (ptr, ...) @printf(ptr noundef @.str, i32 noundef %call)
  br label %for.cond

for.end:                                          ; preds = %for.cond
  ret i32 0
}

declare i32 @printf(ptr noundef, ...) #1
"#;

    #[test]
    fn test_llvm_listing() {
        let listing = parse_listing(LLVM, IrFlavor::Llvm).unwrap();
        assert_eq!(listing.units[0].label, "source.c");
        assert_eq!(listing.count(CodeUnitKind::Function), 2);
        assert_eq!(listing.count(CodeUnitKind::Block), 5);
        assert_eq!(listing.count(CodeUnitKind::External), 1);

        let index = |label: &str| listing.units.iter().position(|u| u.label == label).unwrap();
        let cond = index("for.cond");
        let body = index("for.body");
        let end = index("for.end");
        let has = |from: usize, to: usize, kind: CodeEdgeKind| {
            listing.edges.iter().any(|e| e.from == from && e.to == to && e.kind == kind)
        };
        assert!(has(cond, body, CodeEdgeKind::Branch));
        assert!(has(cond, end, CodeEdgeKind::Branch));
        assert!(has(body, cond, CodeEdgeKind::Branch));
        // for.body ends in br, so no fall-through into for.end
        assert!(!has(body, end, CodeEdgeKind::Flow));

        let main = index("main");
        assert!(has(main, index("square"), CodeEdgeKind::Call));
        assert!(has(main, index("printf"), CodeEdgeKind::Call));

        let block_comment = listing.units.iter().any(|u| u.label.contains("preds"));
        assert!(!block_comment);
    }

    const SIL: &str = r#"sil_stage canonical

import Builtin
import Swift

// main
sil @main : $@convention(c) (Int32, UnsafeMutablePointer<Optional<UnsafeMutablePointer<Int8>>>) -> Int32 {
bb0(%0 : $Int32, %1 : $UnsafeMutablePointer<Optional<UnsafeMutablePointer<Int8>>>):
  %2 = integer_literal $Builtin.Int1, -1          // user: %3
  cond_br %2, bb1, bb2                            // id: %3

bb1:                                              // Preds: bb0
  %4 = function_ref @$s6source5helloyyF : $@convention(thin) () -> () // user: %5
  %5 = apply %4() : $@convention(thin) () -> ()
  br bb2                                          // id: %6

bb2:                                              // Preds: bb0 bb1
  %7 = integer_literal $Builtin.Int32, 0
  %8 = struct $Int32 (%7 : $Builtin.Int32)
  return %8 : $Int32                              // id: %9
} // end sil function 'main'

sil hidden @$s6source5helloyyF : $@convention(thin) () -> () {
bb0:
  %0 = tuple ()
  return %0 : $()
} // end sil function '$s6source5helloyyF'

sil @swift_retain : $@convention(c) (Builtin.NativeObject) -> ()
"#;

    #[test]
    fn test_sil_listing() {
        let listing = parse_listing(SIL, IrFlavor::Sil).unwrap();
        assert_eq!(listing.count(CodeUnitKind::Function), 2);
        assert_eq!(listing.count(CodeUnitKind::Block), 4);
        assert_eq!(listing.count(CodeUnitKind::External), 1);

        let branches = listing
            .edges
            .iter()
            .filter(|e| e.kind == CodeEdgeKind::Branch)
            .count();
        assert_eq!(branches, 3);

        let main = listing.units.iter().position(|u| u.label == "main").unwrap();
        let hello = listing
            .units
            .iter()
            .position(|u| u.label == "$s6source5helloyyF")
            .unwrap();
        assert!(listing
            .edges
            .iter()
            .any(|e| e.from == main && e.to == hello && e.kind == CodeEdgeKind::Call));
        assert!(!listing.units.iter().any(|u| u.label.contains("// id")));
    }

    #[test]
    fn test_unrecognised_listing() {
        assert!(parse_listing("error: unable to open output file", IrFlavor::Llvm).is_err());
        assert!(parse_listing("", IrFlavor::Sil).is_err());
    }
}
