//! Output side of the assembler: the flat byte buffer, the label table,
//! and the fixup list that lets a single pass patch forward references
//! in place.

use fxhash::FxHashMap;
use miette::Report;

use crate::error;
use crate::span::Span;

/// A deferred write into the output buffer, pending label definition.
#[derive(Clone, PartialEq, Eq, Debug)]
struct Fixup {
    label: String,
    /// Buffer offset of the 8-byte slot to patch.
    offset: usize,
    /// Reference site, for the unresolved-label diagnostic.
    span: Span,
    row: u32,
}

/// The bytecode image under construction. The buffer only ever grows, so
/// its length doubles as the offset at which the next instruction begins.
#[derive(Default)]
pub struct ObjImage {
    bytes: Vec<u8>,
    labels: FxHashMap<String, u64>,
    fixups: Vec<Fixup>,
}

impl ObjImage {
    pub fn new() -> Self {
        ObjImage::default()
    }

    /// Offset at which the next emitted instruction will begin.
    pub fn curr_ip(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn emit_u64(&mut self, num: u64) {
        self.bytes.extend_from_slice(&num.to_be_bytes());
    }

    /// Bind `label` to the current offset and patch every pending
    /// reference to it. Errors if the label already exists; the first
    /// binding is kept.
    pub fn define_label(&mut self, label: &str) -> Result<(), ()> {
        if self.labels.contains_key(label) {
            return Err(());
        }
        let ip = self.curr_ip();
        self.labels.insert(label.to_string(), ip);
        let target = ip.to_be_bytes();
        for fixup in self.fixups.iter().filter(|f| f.label == label) {
            self.bytes[fixup.offset..fixup.offset + 8].copy_from_slice(&target);
        }
        self.fixups.retain(|f| f.label != label);
        Ok(())
    }

    /// Emit the 8-byte big-endian address of `label`. An undefined label
    /// emits zeroes and records a fixup to patch once it is defined.
    pub fn reference_label(&mut self, label: &str, span: Span, row: u32) {
        match self.labels.get(label) {
            Some(&target) => self.emit_u64(target),
            None => {
                self.fixups.push(Fixup {
                    label: label.to_string(),
                    offset: self.bytes.len(),
                    span,
                    row,
                });
                self.emit_u64(0);
            }
        }
    }

    /// One diagnostic per label still unresolved, citing its first
    /// reference site.
    pub fn unresolved_errors(&self, src: &'static str) -> Vec<Report> {
        let mut reported: Vec<&str> = Vec::new();
        let mut errors = Vec::new();
        for fixup in &self.fixups {
            if reported.contains(&fixup.label.as_str()) {
                continue;
            }
            reported.push(&fixup.label);
            errors.push(error::parse_unresolved_label(
                src,
                fixup.span,
                fixup.row,
                &fixup.label,
            ));
        }
        errors
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
