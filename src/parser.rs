use crate::engine::instruction::{Instruction, Mnemonic, Operand};
use crate::engine::system::{RegisterHalf, RegisterPair};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;

//
// Public Interface
//

pub fn load_program(path: &Path) -> Result<Vec<Instruction>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read program file {}", path.display()))?;
    parse_program(&text).with_context(|| format!("failed to parse program file {}", path.display()))
}

/// Parses a whole assembly text: blank lines and `;` comments are
/// skipped, everything else must be `mnemonic [op1 [, op2]]`.
pub fn parse_program(text: &str) -> Result<Vec<Instruction>> {
    let grammar = line_grammar();
    let mut program = Vec::new();

    for (number, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        let instruction =
            parse_line(&grammar, line).with_context(|| format!("at line {}", number + 1))?;
        program.push(instruction);
    }

    Ok(program)
}

pub fn parse_line(grammar: &Regex, line: &str) -> Result<Instruction> {
    let captures = grammar
        .captures(line)
        .ok_or_else(|| anyhow!("cannot parse '{}'", line))?;

    let mut name = captures["name"].to_lowercase();
    let mut take_operand = |group: &str| -> Option<Operand> {
        let token = captures.name(group)?.as_str();
        let (operand, post_increment) = parse_operand(token);
        // A post-increment suffix folds into the mnemonic, which lands it
        // in the unknown-instruction class: auto-increment addressing has
        // no modeled semantics.
        if post_increment {
            name.push('+');
        }
        Some(operand)
    };

    let op1 = take_operand("op1");
    let op2 = take_operand("op2");

    let mnemonic = Mnemonic::from_str(&name).unwrap_or_else(|_| Mnemonic::Unknown(name.clone()));

    Ok(Instruction {
        mnemonic,
        op1,
        op2,
        source: line.to_string(),
    })
}

pub fn line_grammar() -> Regex {
    Regex::new(r"^(?P<name>[a-zA-Z]+)(?:\s+(?P<op1>[^,\s]+)(?:\s*,\s*(?P<op2>\S+))?)?$")
        .expect("the line grammar is a valid regular expression")
}

//
// Private Implementation
//

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(position) => &line[..position],
        None => line,
    }
}

fn parse_operand(token: &str) -> (Operand, bool) {
    let (token, post_increment) = match token.strip_suffix('+') {
        Some(stripped) => (stripped, true),
        None => (token, false),
    };

    let operand = classify_operand(token);
    (operand, post_increment)
}

fn classify_operand(token: &str) -> Operand {
    if let Some(index) = token
        .strip_prefix('r')
        .or_else(|| token.strip_prefix('R'))
        .and_then(|rest| rest.parse::<usize>().ok())
    {
        return Operand::Register(index);
    }

    if let Ok(pair) = RegisterPair::from_str(token) {
        return Operand::Pair(pair);
    }

    if let Some(operand) = classify_pair_half(token) {
        return operand;
    }

    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        if let Ok(number) = u64::from_str_radix(hex, 16) {
            return Operand::Number(number);
        }
    }

    if let Ok(number) = token.parse::<u64>() {
        return Operand::Number(number);
    }

    Operand::Label(token.to_string())
}

fn classify_pair_half(token: &str) -> Option<Operand> {
    let mut chars = token.chars();
    let pair = chars.next()?;
    let half = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    let pair = RegisterPair::from_str(&pair.to_string()).ok()?;
    let half = match half {
        'h' | 'H' => RegisterHalf::High,
        'l' | 'L' => RegisterHalf::Low,
        _ => return None,
    };

    Some(Operand::Half(pair, half))
}
