use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

// Parser diagnostics. Message texts keep the `at row <N>` prefix so the
// plain-text rendering stays greppable; spans drive the fancy output.

pub fn parse_unexpected_token(src: &'static str, span: Span, row: u32, lexeme: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_token",
        help = "lines hold at most one statement, optionally preceded by `name:` labels",
        labels = vec![LabeledSpan::at(span, "unexpected token")],
        "at row {row} unexpected token '{lexeme}'",
    )
    .with_source_code(src)
}

pub fn parse_expected(src: &'static str, span: Span, row: u32, what: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::expected",
        help = "check the operands allowed for this statement",
        labels = vec![LabeledSpan::at(span, "here")],
        "at row {row} {what}",
    )
    .with_source_code(src)
}

/// Variant of [`parse_expected`] for errors discovered at end of input,
/// where no token span is available.
pub fn parse_expected_eof(src: &'static str, row: u32, what: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_eof",
        help = "you may be missing operands in your last statement",
        labels = vec![LabeledSpan::at_offset(src.len().saturating_sub(1), "input ends here")],
        "at row {row} {what}",
    )
    .with_source_code(src)
}

pub fn parse_label_redefined(src: &'static str, span: Span, row: u32, label: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::label_redefined",
        help = "a label may be defined once per file; the first definition wins",
        labels = vec![LabeledSpan::at(span, "redefined here")],
        "at row {row} label '{label}' was redefined",
    )
    .with_source_code(src)
}

pub fn parse_unresolved_label(src: &'static str, span: Span, row: u32, label: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unresolved_label",
        help = "every referenced label needs a `name:` definition somewhere in the file",
        labels = vec![LabeledSpan::at(span, "referenced here")],
        "at row {row} label '{label}' is never defined",
    )
    .with_source_code(src)
}

// Runtime faults. No source to attach; the message cites the instruction
// pointer at the time of the fault.

pub fn exec_program_too_large(program: usize, memory: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::program_too_large",
        help = "raise the memory size with --memory",
        "program of {program} bytes does not fit in {memory} bytes of memory",
    )
}

pub fn exec_invalid_register(ip: u64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::invalid_register",
        "invalid register at {ip}",
    )
}

pub fn exec_invalid_interrupt(ip: u64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::invalid_interrupt",
        "invalid interrupt id at {ip}",
    )
}

pub fn exec_unknown_opcode(ip: u64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::unknown_opcode",
        "invalid opcode at {ip}",
    )
}

pub fn exec_out_of_bounds(ip: u64, addr: u64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::out_of_bounds",
        "memory access to {addr} out of bounds at {ip}",
    )
}

pub fn exec_host_io(ip: u64, source: std::io::Error) -> Report {
    miette!(
        severity = Severity::Error,
        code = "exec::host_io",
        "host i/o failed ({source}) at {ip}",
    )
}
