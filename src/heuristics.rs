//! Heuristics for finding structure in an unindexed PAC buffer.
//!
//! None of these predicates is exact. They encode what real PAC files tend
//! to look like and are kept small and separately testable so they can be
//! swapped or tuned against real corpora.

use crate::reader;
use crate::templates::Templates;

/// First byte of every instruction signature.
pub const MARKER: u8 = 0x25;

/// Highest opcode class seen in shipped scripts.
pub const MAX_KNOWN_CLASS: u8 = 0x23;

/// Largest tag word accepted when recognizing left-out arguments.
pub const MAX_ARGUMENT_TAG: u32 = 0x40;

/// Policy deciding whether a marker-aligned word may start an instruction.
///
/// The template lookup in the scanner is the real test; the policy only
/// decides which marker bytes are worth dispatching on.
#[derive(Debug, Clone, Copy, Default)]
pub enum CandidatePolicy {
    /// Every marker with four bytes behind it is a candidate.
    #[default]
    Permissive,
    /// Only markers followed by a class byte up to `max_class`.
    Conservative {
        /// Largest accepted class byte
        max_class: u8,
    },
    /// Only signatures present in the template registry.
    KnownOnly,
    /// Caller-supplied predicate over the big-endian signature word.
    Custom(fn(u32) -> bool),
}

impl CandidatePolicy {
    /// Conservative policy bounded by the highest known class.
    pub fn conservative() -> Self {
        CandidatePolicy::Conservative {
            max_class: MAX_KNOWN_CLASS,
        }
    }

    /// Decide whether `signature` (read big-endian at a marker) is a
    /// candidate instruction start.
    pub fn accepts(&self, signature: u32, templates: &Templates) -> bool {
        match self {
            CandidatePolicy::Permissive => true,
            CandidatePolicy::Conservative { max_class } => signature_class(signature) <= *max_class,
            CandidatePolicy::KnownOnly => templates.contains(signature),
            CandidatePolicy::Custom(predicate) => predicate(signature),
        }
    }
}

/// Class byte of a big-endian signature.
pub fn signature_class(signature: u32) -> u8 {
    ((signature >> 16) & 0xFF) as u8
}

/// True if `bytes` begins like a new instruction: the marker followed by a
/// class byte no higher than [`MAX_KNOWN_CLASS`].
///
/// Used to decide that an instruction was cut short when an argument tag is
/// not recognized.
pub fn looks_like_instruction_start(bytes: &[u8]) -> bool {
    matches!(bytes, [MARKER, class, ..] if *class <= MAX_KNOWN_CLASS)
}

/// True if `bytes` is a `0, 1, ..., n-1` word table.
pub fn is_message_table(bytes: &[u8]) -> bool {
    reader::is_sequential_table(bytes)
}

/// True if `bytes` looks like tag/value argument pairs: a multiple of eight
/// bytes where every tag word is a power of two no greater than
/// [`MAX_ARGUMENT_TAG`].
pub fn is_left_out_arguments(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes.len() % 8 != 0 {
        return false;
    }
    reader::le_words(bytes)
        .step_by(2)
        .all(|tag| reader::is_power_of_two(tag) && tag <= MAX_ARGUMENT_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::InstructionTemplate;

    #[test]
    fn test_policies() {
        let templates = Templates::from_templates([InstructionTemplate::new(0x2501_0000, "end")]);

        assert!(CandidatePolicy::Permissive.accepts(0x25FF_0000, &templates));

        let conservative = CandidatePolicy::conservative();
        assert!(conservative.accepts(0x2523_0001, &templates));
        assert!(!conservative.accepts(0x2524_0001, &templates));

        assert!(CandidatePolicy::KnownOnly.accepts(0x2501_0000, &templates));
        assert!(!CandidatePolicy::KnownOnly.accepts(0x2501_0001, &templates));

        fn even_index(sig: u32) -> bool {
            sig & 1 == 0
        }
        let custom = CandidatePolicy::Custom(even_index);
        assert!(custom.accepts(0x2501_0002, &templates));
        assert!(!custom.accepts(0x2501_0003, &templates));
    }

    #[test]
    fn test_instruction_start() {
        assert!(looks_like_instruction_start(&[0x25, 0x01, 0x00, 0x00]));
        assert!(looks_like_instruction_start(&[0x25, 0x23]));
        assert!(!looks_like_instruction_start(&[0x25, 0x24, 0x00, 0x00]));
        assert!(!looks_like_instruction_start(&[0x26, 0x01, 0x00, 0x00]));
        assert!(!looks_like_instruction_start(&[0x25]));
    }

    #[test]
    fn test_left_out_arguments() {
        let args = [0x20, 0, 0, 0, 5, 0, 0, 0, 0x01, 0, 0, 0, 0xFF, 0xFF, 0, 0];
        assert!(is_left_out_arguments(&args));
        // 0x80 is a power of two but above the accepted range
        let big = [0x80, 0, 0, 0, 5, 0, 0, 0];
        assert!(!is_left_out_arguments(&big));
        // 3 is not a power of two
        let odd = [0x03, 0, 0, 0, 5, 0, 0, 0];
        assert!(!is_left_out_arguments(&odd));
        assert!(!is_left_out_arguments(&args[..12]));
        assert!(!is_left_out_arguments(&[]));
    }

    #[test]
    fn test_message_table() {
        assert!(is_message_table(&[0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]));
        assert!(!is_message_table(&[0, 0, 0, 0, 2, 0, 0, 0]));
    }
}
