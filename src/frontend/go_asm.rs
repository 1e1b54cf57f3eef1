/// Go compiler `-S` assembly listings
use crate::core::types::{CodeEdgeKind, CodeListing, CodeUnitKind};
use crate::frontend::{clip_label, compiled};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

static SYMBOL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(\S+) STEXT\b").ok());
static INSTRUCTION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^\s+0x[0-9a-f]+ (\d{5}) \(([^)]*)\)\s+([A-Z][A-Z0-9.]*)\s*(.*)$").ok()
});
static CALL_TARGET: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^([^\s(]+)\(SB\)").ok());

const PSEUDO_OPS: &[&str] = &["TEXT", "FUNCDATA", "PCDATA", "NOP", "PCALIGN"];
const UNCONDITIONAL: &[&str] = &["JMP", "B", "RET", "UNDEF"];

struct SymbolState {
    unit: usize,
    by_offset: HashMap<u32, usize>,
    jumps: Vec<(usize, u32)>,
    last: Option<usize>,
    falls_through: bool,
}

impl SymbolState {
    fn new(unit: usize) -> Self {
        Self {
            unit,
            by_offset: HashMap::new(),
            jumps: Vec::new(),
            last: None,
            falls_through: true,
        }
    }

    fn close(self, listing: &mut CodeListing) {
        for (from, offset) in self.jumps {
            if let Some(to) = self.by_offset.get(&offset) {
                listing.connect(from, *to, CodeEdgeKind::Branch);
            }
        }
    }
}

fn is_jump(mnemonic: &str) -> bool {
    (mnemonic.starts_with('J') || mnemonic.starts_with('B') || mnemonic.starts_with("CB") || mnemonic.starts_with("TB"))
        && mnemonic != "BL"
        && !mnemonic.starts_with("BIC")
        && !mnemonic.starts_with("BSWAP")
        && !mnemonic.starts_with("BT")
}

/// Parse `go build -gcflags=-S` output. `source_file` selects which
/// `(file:line)` annotations become unit line numbers.
pub fn parse_go_asm(text: &str, source_file: &str) -> Result<CodeListing, String> {
    let symbol_re = compiled(&SYMBOL, "symbol")?;
    let insn_re = compiled(&INSTRUCTION, "instruction")?;
    let call_re = compiled(&CALL_TARGET, "call target")?;

    let mut listing = CodeListing::default();
    let mut packages: HashMap<String, usize> = HashMap::new();
    let mut defined: HashMap<String, usize> = HashMap::new();
    let mut calls: Vec<(usize, String)> = Vec::new();
    let mut symbol: Option<SymbolState> = None;

    for line in text.lines() {
        if let Some(caps) = symbol_re.captures(line) {
            if let Some(done) = symbol.take() {
                done.close(&mut listing);
            }
            let name = caps[1].to_string();
            let package = name
                .rsplit_once('.')
                .map(|(pkg, _)| pkg.to_string())
                .unwrap_or_else(|| "main".to_string());
            let module = match packages.get(&package) {
                Some(unit) => *unit,
                None => {
                    let unit = listing.push(CodeUnitKind::Module, package.as_str(), None);
                    packages.insert(package, unit);
                    unit
                }
            };
            let unit = listing.push(CodeUnitKind::Function, name.as_str(), Some(module));
            defined.insert(name, unit);
            symbol = Some(SymbolState::new(unit));
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            // data symbols, `# package` headers and relocation lines end a function body
            if let Some(done) = symbol.take() {
                done.close(&mut listing);
            }
            continue;
        }

        let Some(state) = symbol.as_mut() else {
            continue;
        };
        let Some(caps) = insn_re.captures(line) else {
            continue;
        };
        let mnemonic = &caps[3];
        if PSEUDO_OPS.contains(&mnemonic) {
            continue;
        }
        let Ok(offset) = caps[1].parse::<u32>() else {
            continue;
        };
        let operands = caps[4].trim();

        let label = clip_label(&format!("{}: {} {}", offset, mnemonic, operands), 72);
        let unit = listing.push(CodeUnitKind::Instruction, label, Some(state.unit));
        if let Some((file, line_no)) = caps[2].rsplit_once(':') {
            if Path::new(file).file_name() == Some(std::ffi::OsStr::new(source_file)) {
                listing.units[unit].line = line_no.parse().ok();
            }
        }
        if let (Some(previous), true) = (state.last, state.falls_through) {
            listing.connect(previous, unit, CodeEdgeKind::Flow);
        }
        state.by_offset.insert(offset, unit);
        state.last = Some(unit);
        state.falls_through = !UNCONDITIONAL.contains(&mnemonic);

        if mnemonic == "CALL" || mnemonic == "BL" {
            if let Some(target) = call_re.captures(operands) {
                calls.push((state.unit, target[1].to_string()));
            }
        } else if is_jump(mnemonic) {
            if let Some(Ok(target)) = operands
                .split(',')
                .last()
                .map(|t| t.trim().parse::<u32>())
            {
                state.jumps.push((unit, target));
            }
        }
    }

    if let Some(done) = symbol.take() {
        done.close(&mut listing);
    }

    for (caller, callee) in calls {
        let target = match defined.get(&callee) {
            Some(unit) => *unit,
            None => listing.external(&callee),
        };
        listing.connect(caller, target, CodeEdgeKind::Call);
    }

    if defined.is_empty() && text.lines().any(|l| l.contains("0x0000 00000")) {
        return Err("assembly without STEXT symbol headers".to_string());
    }
    if defined.is_empty() && !text.trim().is_empty() && !text.contains('#') {
        return Err("no Go assembly in compiler output".to_string());
    }
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASM: &str = "\
# command-line-arguments
main.add STEXT nosplit size=4 args=0x10 locals=0x0 funcid=0x0 align=0x0
\t0x0000 00000 (/tmp/x/main.go:3)\tTEXT\tmain.add(SB), NOSPLIT|NOFRAME|ABIInternal, $0-16
\t0x0000 00000 (/tmp/x/main.go:4)\tADDQ\tBX, AX
\t0x0003 00003 (/tmp/x/main.go:4)\tRET
\t0x0000 48 01 d8 c3                                      H...
main.main STEXT size=66 args=0x0 locals=0x18 funcid=0x0 align=0x0
\t0x0000 00000 (/tmp/x/main.go:7)\tTEXT\tmain.main(SB), ABIInternal, $24-0
\t0x0000 00000 (/tmp/x/main.go:7)\tCMPQ\tSP, 16(R14)
\t0x0004 00004 (/tmp/x/main.go:7)\tPCDATA\t$0, $-2
\t0x0004 00004 (/tmp/x/main.go:7)\tJLS\t57
\t0x0014 00020 (/tmp/x/main.go:8)\tCALL\tmain.add(SB)
\t0x0019 00025 (/tmp/x/main.go:9)\tCALL\tfmt.Println(SB)
\t0x0038 00056 (/tmp/x/main.go:10)\tRET
\t0x0039 00057 (/tmp/x/main.go:7)\tCALL\truntime.morestack_noctxt(SB)
\t0x003e 00062 (/tmp/x/main.go:7)\tJMP\t0
\trel 21+4 t=R_CALL main.add+0
go:cuinfo.producer.main SDWARFCUINFO dupok size=0
";

    #[test]
    fn test_go_asm_listing() {
        let listing = parse_go_asm(ASM, "main.go").unwrap();
        assert_eq!(listing.count(CodeUnitKind::Module), 1);
        assert_eq!(listing.count(CodeUnitKind::Function), 2);
        assert_eq!(listing.count(CodeUnitKind::External), 2);
        assert!(!listing.units.iter().any(|u| u.label.contains("PCDATA")));

        let position = |prefix: &str| {
            listing
                .units
                .iter()
                .position(|u| u.label.starts_with(prefix))
                .unwrap()
        };
        let has = |from: usize, to: usize, kind: CodeEdgeKind| {
            listing.edges.iter().any(|e| e.from == from && e.to == to && e.kind == kind)
        };

        let jls = position("4: JLS");
        assert!(has(jls, position("57: CALL"), CodeEdgeKind::Branch));
        assert!(has(position("62: JMP"), position("0: CMPQ"), CodeEdgeKind::Branch));
        assert!(!has(position("56: RET"), position("57: CALL"), CodeEdgeKind::Flow));

        let main = position("main.main");
        assert!(has(main, position("main.add"), CodeEdgeKind::Call));
        assert!(has(main, position("fmt.Println"), CodeEdgeKind::Call));
        assert_eq!(listing.units[position("20: CALL")].line, Some(8));
    }

    #[test]
    fn test_empty_output_is_an_empty_listing() {
        let listing = parse_go_asm("", "main.go").unwrap();
        assert!(listing.units.is_empty());
    }

    #[test]
    fn test_unrelated_output_is_rejected() {
        assert!(parse_go_asm("go: cannot find main module", "main.go").is_err());
    }
}
