/// `javap -c -p` disassembly as class/method/instruction graphs
use crate::core::types::{CodeEdgeKind, CodeListing, CodeUnitKind};
use crate::frontend::{clip_label, compiled};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static CLASS_HEADER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(?:[\w\s]*?)\b(?:class|interface|enum|record)\s+([\w.$]+)[^{]*\{\s*$").ok()
});
static METHOD_HEADER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s{2}\S.*?([\w$<>]+)\(([^)]*)\)[^;]*;\s*$").ok());
static INSTRUCTION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s+(\d+): ([a-z][\w]*)\s*(.*)$").ok());
static SWITCH_ARM: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s+(?:-?\d+|default): (\d+)\s*$").ok());
static METHOD_REF: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"// (?:Method|InterfaceMethod) ([^:]+):").ok());

const UNCONDITIONAL: &[&str] = &[
    "goto", "goto_w", "return", "ireturn", "lreturn", "freturn", "dreturn", "areturn",
    "athrow", "tableswitch", "lookupswitch",
];

struct MethodState {
    unit: usize,
    by_offset: HashMap<u32, usize>,
    jumps: Vec<(usize, u32)>,
    last: Option<usize>,
    falls_through: bool,
}

impl MethodState {
    fn close(self, listing: &mut CodeListing) {
        for (from, offset) in self.jumps {
            if let Some(to) = self.by_offset.get(&offset) {
                listing.connect(from, *to, CodeEdgeKind::Branch);
            }
        }
    }
}

pub fn parse_javap(text: &str) -> Result<CodeListing, String> {
    let class_re = compiled(&CLASS_HEADER, "class header")?;
    let method_re = compiled(&METHOD_HEADER, "method header")?;
    let insn_re = compiled(&INSTRUCTION, "instruction")?;
    let arm_re = compiled(&SWITCH_ARM, "switch arm")?;
    let ref_re = compiled(&METHOD_REF, "method ref")?;

    let mut listing = CodeListing::default();
    let mut class: Option<(usize, String)> = None;
    let mut method: Option<MethodState> = None;
    let mut in_switch: Option<usize> = None;
    // (class name, method name) -> unit
    let mut methods: HashMap<(String, String), usize> = HashMap::new();
    let mut calls: Vec<(usize, String, String)> = Vec::new();

    for line in text.lines() {
        if let Some(switch) = in_switch {
            if line.trim() == "}" {
                in_switch = None;
            } else if let Some(caps) = arm_re.captures(line) {
                if let (Some(m), Ok(target)) = (method.as_mut(), caps[1].parse::<u32>()) {
                    m.jumps.push((switch, target));
                }
            }
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            if let Some(caps) = class_re.captures(line) {
                if let Some(done) = method.take() {
                    done.close(&mut listing);
                }
                let name = caps[1].to_string();
                let simple = name.rsplit('.').next().unwrap_or(&name).to_string();
                let unit = listing.push(CodeUnitKind::Module, name.as_str(), None);
                class = Some((unit, simple));
            } else if line.starts_with('}') {
                if let Some(done) = method.take() {
                    done.close(&mut listing);
                }
                class = None;
            }
            continue;
        }

        let Some((class_unit, class_name)) = class.as_ref() else {
            continue;
        };

        if line.trim() == "static {};" {
            if let Some(done) = method.take() {
                done.close(&mut listing);
            }
            let unit = listing.push(CodeUnitKind::Function, "static {}", Some(*class_unit));
            methods.insert((class_name.clone(), "<clinit>".to_string()), unit);
            method = Some(MethodState::new(unit));
            continue;
        }

        if let Some(caps) = method_re.captures(line) {
            if let Some(done) = method.take() {
                done.close(&mut listing);
            }
            let raw_name = caps[1].rsplit('.').next().unwrap_or(&caps[1]).to_string();
            let name = if raw_name == *class_name {
                "<init>".to_string()
            } else {
                raw_name.clone()
            };
            let label = format!("{}({})", raw_name, simplify_params(&caps[2]));
            let unit = listing.push(CodeUnitKind::Function, label, Some(*class_unit));
            methods.insert((class_name.clone(), name.clone()), unit);
            method = Some(MethodState::new(unit));
            continue;
        }

        let Some(state) = method.as_mut() else {
            continue;
        };
        let Some(caps) = insn_re.captures(line) else {
            continue;
        };
        let Ok(offset) = caps[1].parse::<u32>() else {
            continue;
        };
        let mnemonic = &caps[2];
        let operands = caps[3].trim();

        let shown = match operands.find("// ") {
            Some(pos) => operands[pos + 3..].trim(),
            None => operands,
        };
        let label = clip_label(&format!("{}: {} {}", offset, mnemonic, shown), 72);
        let unit = listing.push(CodeUnitKind::Instruction, label, Some(state.unit));
        if let (Some(previous), true) = (state.last, state.falls_through) {
            listing.connect(previous, unit, CodeEdgeKind::Flow);
        }
        state.by_offset.insert(offset, unit);
        state.last = Some(unit);
        state.falls_through = !UNCONDITIONAL.contains(&mnemonic);

        if mnemonic.starts_with("if") || mnemonic.starts_with("goto") || mnemonic == "jsr" {
            if let Some(Ok(target)) = operands.split_whitespace().next().map(str::parse::<u32>) {
                state.jumps.push((unit, target));
            }
        }
        if mnemonic == "tableswitch" || mnemonic == "lookupswitch" {
            in_switch = Some(unit);
        }
        if mnemonic.starts_with("invoke") {
            if let Some(r) = ref_re.captures(operands) {
                let target = &r[1];
                let (owner, callee) = match target.rsplit_once('.') {
                    Some((owner, callee)) => (
                        owner.rsplit('/').next().unwrap_or(owner).to_string(),
                        callee.trim_matches('"').to_string(),
                    ),
                    None => (class_name.clone(), target.trim_matches('"').to_string()),
                };
                calls.push((state.unit, owner, callee));
            }
        }
    }

    if let Some(done) = method.take() {
        done.close(&mut listing);
    }

    for (caller, owner, callee) in calls {
        let target = match methods.get(&(owner.clone(), callee.clone())) {
            Some(unit) => *unit,
            None => listing.external(&format!("{}.{}", owner, callee)),
        };
        listing.connect(caller, target, CodeEdgeKind::Call);
    }

    if listing.count(CodeUnitKind::Module) == 0 {
        return Err("no class found in javap output".to_string());
    }
    Ok(listing)
}

impl MethodState {
    fn new(unit: usize) -> Self {
        Self {
            unit,
            by_offset: HashMap::new(),
            jumps: Vec::new(),
            last: None,
            falls_through: true,
        }
    }
}

/// `java.lang.String[]` -> `String[]`
fn simplify_params(params: &str) -> String {
    params
        .split(',')
        .map(|p| {
            let p = p.trim();
            p.rsplit('.').next().unwrap_or(p).to_string()
        })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAVAP: &str = r#"Compiled from "Main.java"
public class Main {
  private static int counter;

  public Main();
    Code:
       0: aload_0
       1: invokespecial #1                  // Method java/lang/Object."<init>":()V
       4: return

  static int fib(int);
    Code:
       0: iload_0
       1: iconst_2
       2: if_icmpge     7
       5: iload_0
       6: ireturn
       7: iload_0
       8: iconst_1
       9: isub
      10: invokestatic  #7                  // Method fib:(I)I
      13: iload_0
      14: iconst_2
      15: isub
      16: invokestatic  #7                  // Method fib:(I)I
      19: iadd
      20: ireturn

  public static void main(java.lang.String[]);
    Code:
       0: iload_0
       1: lookupswitch  { // 2
                     1: 28
                     2: 30
               default: 32
          }
      28: iconst_1
      29: ireturn
      30: iconst_2
      31: ireturn
      32: getstatic     #13                 // Field java/lang/System.out:Ljava/io/PrintStream;
      35: bipush        10
      37: invokestatic  #7                  // Method fib:(I)I
      40: invokevirtual #19                 // Method java/io/PrintStream.println:(I)V
      43: return
}
"#;

    #[test]
    fn test_javap_listing() {
        let listing = parse_javap(JAVAP).unwrap();
        assert_eq!(listing.count(CodeUnitKind::Module), 1);
        assert_eq!(listing.units[0].label, "Main");
        assert_eq!(listing.count(CodeUnitKind::Function), 3);

        let position = |prefix: &str| {
            listing
                .units
                .iter()
                .position(|u| u.label.starts_with(prefix))
                .unwrap()
        };
        let fib = position("fib(");
        assert_eq!(listing.units[fib].label, "fib(int)");
        assert_eq!(listing.units[position("main(")].label, "main(String[])");

        let has = |from: usize, to: usize, kind: CodeEdgeKind| {
            listing.edges.iter().any(|e| e.from == from && e.to == to && e.kind == kind)
        };
        let branch = position("2: if_icmpge");
        assert!(has(branch, position("7: iload_0"), CodeEdgeKind::Branch));
        assert!(has(branch, position("5: iload_0"), CodeEdgeKind::Flow));
        // ireturn does not fall through
        assert!(!has(position("6: ireturn"), position("7: iload_0"), CodeEdgeKind::Flow));

        // recursive call resolves to the method itself
        assert!(has(fib, fib, CodeEdgeKind::Call));
        let main = position("main(");
        assert!(has(main, fib, CodeEdgeKind::Call));
        let println = position("PrintStream.println");
        assert_eq!(listing.units[println].kind, CodeUnitKind::External);
        assert!(has(main, println, CodeEdgeKind::Call));
        assert!(has(position("Main()"), position("Object.<init>"), CodeEdgeKind::Call));

        let switch = position("1: lookupswitch");
        for target in ["28: iconst_1", "30: iconst_2", "32: getstatic"] {
            assert!(has(switch, position(target), CodeEdgeKind::Branch), "{}", target);
        }
    }

    #[test]
    fn test_javap_rejects_errors() {
        assert!(parse_javap("Error: class not found: Main").is_err());
    }
}
