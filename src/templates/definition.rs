//! Definition source loader.
//!
//! The source is line oriented and semicolon delimited:
//!
//! ```text
//! A;B;C;D;raw_size;name;extended_name;description;param_count;kind;name;...;address
//! ```
//!
//! `A`..`D` are hex bytes forming the signature `A<<24 | B<<16 | C<<8 | D`.
//! `raw_size` and `address` are hex. Blank lines and lines starting with `#`
//! are ignored.

use tracing::warn;

use super::{InstructionTemplate, ParameterDeclaration, ParameterKind};
use crate::error::{PacError, Result};

/// Fields that every row carries besides its parameter pairs.
pub const MIN_FIELDS: usize = 10;

const SIGNATURE_FIELDS: usize = 4;
const RAW_SIZE_FIELD: usize = 4;
const NAME_FIELD: usize = 5;
const EXTENDED_NAME_FIELD: usize = 6;
const DESCRIPTION_FIELD: usize = 7;
const PARAM_COUNT_FIELD: usize = 8;
const FIRST_PARAM_FIELD: usize = 9;

/// Parse every row of `source`.
pub fn parse_rows(source: &str) -> Result<Vec<InstructionTemplate>> {
    let mut templates = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        templates.push(parse_row(trimmed, line_no)?);
    }
    Ok(templates)
}

/// Parse a single row; `line` is only used for error reporting.
pub fn parse_row(row: &str, line: usize) -> Result<InstructionTemplate> {
    let mut fields: Vec<&str> = row.split(';').map(str::trim).collect();
    if fields.len() > MIN_FIELDS && fields.last() == Some(&"") {
        fields.pop();
    }

    if fields.len() < MIN_FIELDS {
        return Err(PacError::malformed(
            line,
            format!(
                "expected at least {} fields, found {}",
                MIN_FIELDS,
                fields.len()
            ),
        ));
    }

    let mut signature = 0u32;
    for (i, field) in fields[..SIGNATURE_FIELDS].iter().enumerate() {
        let byte = u8::from_str_radix(strip_hex_prefix(field), 16).map_err(|_| {
            PacError::malformed(line, format!("signature byte {} `{}` is not hex", i, field))
        })?;
        signature = (signature << 8) | u32::from(byte);
    }

    let address_field = fields[fields.len() - 1];
    let function_address = parse_hex_u32(address_field).ok_or_else(|| {
        PacError::malformed(line, format!("address `{}` is not hex", address_field))
    })?;

    let raw_size = parse_hex_u32(fields[RAW_SIZE_FIELD]);
    if raw_size.is_none() {
        warn!(
            line,
            raw_size = fields[RAW_SIZE_FIELD],
            "ignoring unparseable raw size"
        );
    }

    let pair_fields = &fields[FIRST_PARAM_FIELD..fields.len() - 1];
    if pair_fields.len() % 2 != 0 {
        return Err(PacError::malformed(
            line,
            "parameter fields must come in kind;name pairs",
        ));
    }

    let mut parameters = Vec::with_capacity(pair_fields.len() / 2);
    for pair in pair_fields.chunks_exact(2) {
        let kind: ParameterKind = pair[0]
            .parse()
            .map_err(|reason: String| PacError::malformed(line, reason))?;
        parameters.push(ParameterDeclaration::new(kind, pair[1]));
    }

    match fields[PARAM_COUNT_FIELD].parse::<usize>() {
        Ok(declared) if declared == parameters.len() => {}
        Ok(declared) => warn!(
            line,
            declared,
            found = parameters.len(),
            "parameter count mismatch, using the pairs present"
        ),
        Err(_) => warn!(
            line,
            count = fields[PARAM_COUNT_FIELD],
            "ignoring unparseable parameter count"
        ),
    }

    Ok(InstructionTemplate {
        signature,
        name: fields[NAME_FIELD].to_string(),
        extended_name: fields[EXTENDED_NAME_FIELD].to_string(),
        description: fields[DESCRIPTION_FIELD].to_string(),
        raw_size,
        function_address,
        parameters,
    })
}

fn strip_hex_prefix(field: &str) -> &str {
    field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field)
}

fn parse_hex_u32(field: &str) -> Option<u32> {
    u32::from_str_radix(strip_hex_prefix(field), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{Templates, VariableWidth, WordKind};

    const SOURCE: &str = "\
# signature;raw size;name;ext;desc;count;params;address
25;01;00;00;8;cmd_end;CommandEnd;Ends the script;0;088A0000
25;01;00;01;10;cmd_jmp;CommandJump;Unconditional jump;1;jump;target;088A0100

25;07;00;12;0;cmd_msg;Message;Shows a message;2;variable;speaker;string;text;0x088A0200;
";

    #[test]
    fn test_load_rows() {
        let templates = Templates::load(SOURCE).unwrap();
        assert_eq!(templates.len(), 3);

        let jmp = templates.get(0x2501_0001).unwrap();
        assert_eq!(jmp.name, "cmd_jmp");
        assert_eq!(jmp.extended_name, "CommandJump");
        assert_eq!(jmp.raw_size, Some(0x10));
        assert_eq!(jmp.function_address, 0x088A_0100);
        assert_eq!(
            jmp.parameters[0].kind,
            ParameterKind::FixedWord(WordKind::JumpTarget)
        );

        let msg = templates.by_name("cmd_msg").unwrap();
        assert_eq!(msg.signature, 0x2507_0012);
        assert_eq!(
            msg.parameters[0].kind,
            ParameterKind::TaggedVariable(VariableWidth::Word)
        );
        assert!(msg.ends_with_string());
        assert_eq!(msg.function_address, 0x088A_0200);
    }

    #[test]
    fn test_too_few_fields() {
        let err = Templates::load("25;01;00;00;8;cmd_end;x;y;0").unwrap_err();
        match err {
            PacError::MalformedDefinitionRow { line: 1, .. } => {}
            other => panic!("Expected malformed row, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_signature_hex() {
        let source = "25;01;00;00;8;ok;x;y;0;0\n25;0G;00;00;8;bad;x;y;0;0";
        match Templates::load(source) {
            Err(PacError::MalformedDefinitionRow { line: 2, reason }) => {
                assert!(reason.contains("0G"));
            }
            other => panic!("Expected malformed row, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_address_hex() {
        assert!(Templates::load("25;01;00;00;8;cmd;x;y;0;nothex").is_err());
    }

    #[test]
    fn test_odd_parameter_fields() {
        assert!(Templates::load("25;01;00;00;8;cmd;x;y;1;uint32;0").is_err());
    }

    #[test]
    fn test_unknown_kind() {
        assert!(Templates::load("25;01;00;00;8;cmd;x;y;1;pointer;p;0").is_err());
    }

    #[test]
    fn test_lenient_fields() {
        // Unparseable raw size and mismatched count are tolerated.
        let templates = Templates::load("25;01;00;00;??;cmd;x;y;5;uint32;a;0").unwrap();
        let cmd = templates.get(0x2501_0000).unwrap();
        assert_eq!(cmd.raw_size, None);
        assert_eq!(cmd.parameters.len(), 1);
    }

    #[test]
    fn test_reload_replaces() {
        let mut templates = Templates::load(SOURCE).unwrap();
        templates
            .reload("25;02;00;00;0;only;x;y;0;0")
            .unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates.get(0x2501_0000).is_none());
        assert!(templates.by_name("cmd_end").is_none());

        // A failed reload leaves the registry untouched.
        assert!(templates.reload("garbage").is_err());
        assert_eq!(templates.len(), 1);
        assert!(templates.contains(0x2502_0000));
    }

    #[test]
    fn test_from_path() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SOURCE.as_bytes()).unwrap();
        let templates = Templates::from_path(file.path()).unwrap();
        assert_eq!(templates.len(), 3);

        assert!(matches!(
            Templates::from_path(file.path().with_extension("missing")),
            Err(PacError::Io(_))
        ));
    }
}
