//! Input Validator.
//!
//! Pure and deterministic: never touches the network, filesystem, or
//! subprocess. Given `(CommandSpec, raw_args)` produces either a validated
//! argument vector or a [`hub_protocol::error::FieldError`] per failing
//! field, all reported in one pass rather than failing fast on the first
//! bad field.

use std::collections::HashMap;

use hub_protocol::command::ArgType;
use hub_protocol::error::FieldError;
use hub_protocol::CommandSpec;
use hub_protocol::HubError;
use regex_lite::Regex;
use uuid::Uuid;

use crate::config::CoreConfig;

/// Characters whose presence fails validation outright, independent of
/// type checking, so argument injection into the external tool is
/// impossible even under an implementation error elsewhere.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\0',
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedArg {
    String(String),
    Uuid(Uuid),
    Enum(&'static str),
    Integer(i64),
    Path(String),
}

impl ValidatedArg {
    /// The positional string to hand to the Subprocess Runner. Never built
    /// by concatenation with anything the caller supplied beyond what was
    /// already type- and character-checked here.
    pub fn as_arg_string(&self) -> String {
        match self {
            ValidatedArg::String(s) => s.clone(),
            ValidatedArg::Uuid(u) => u.to_string(),
            ValidatedArg::Enum(e) => (*e).to_string(),
            ValidatedArg::Integer(i) => i.to_string(),
            ValidatedArg::Path(p) => p.clone(),
        }
    }
}

pub struct Validator<'a> {
    config: &'a CoreConfig,
}

impl<'a> Validator<'a> {
    pub fn new(config: &'a CoreConfig) -> Self {
        Self { config }
    }

    /// Validate `raw_args` against `spec`'s argument schema, collecting
    /// every failing field rather than stopping at the first one.
    pub fn validate(
        &self,
        spec: &CommandSpec,
        raw_args: &HashMap<String, String>,
    ) -> Result<Vec<(String, ValidatedArg)>, HubError> {
        let mut errors = Vec::new();
        let mut validated = Vec::new();

        let known_names: std::collections::HashSet<&str> =
            spec.args.iter().map(|a| a.name).collect();
        for unknown in raw_args.keys().filter(|k| !known_names.contains(k.as_str())) {
            errors.push(FieldError::new(unknown.clone(), "unknown argument"));
        }

        let aggregate_len: usize = raw_args.values().map(|v| v.len()).sum();
        if aggregate_len > self.config.max_aggregate_arg_len_bytes {
            errors.push(FieldError::new(
                "*",
                format!(
                    "aggregate argument length {aggregate_len} exceeds cap of {}",
                    self.config.max_aggregate_arg_len_bytes
                ),
            ));
        }

        for arg_spec in &spec.args {
            let raw = raw_args.get(arg_spec.name);
            let raw = match raw {
                Some(v) => v,
                None => {
                    if arg_spec.required {
                        errors.push(FieldError::new(arg_spec.name, "required"));
                    }
                    continue;
                }
            };

            if raw.len() > self.config.max_arg_len_bytes {
                errors.push(FieldError::new(
                    arg_spec.name,
                    format!("exceeds {}-byte length cap", self.config.max_arg_len_bytes),
                ));
                continue;
            }

            if let Some(bad) = raw.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
                errors.push(FieldError::new(
                    arg_spec.name,
                    format!("contains forbidden character '{bad}'"),
                ));
                continue;
            }

            match &arg_spec.arg_type {
                ArgType::String => {
                    if let Some(pattern) = arg_spec.pattern {
                        match Regex::new(pattern) {
                            Ok(re) if re.is_match(raw) => {}
                            Ok(_) => {
                                errors.push(FieldError::new(
                                    arg_spec.name,
                                    format!("does not match required pattern {pattern}"),
                                ));
                                continue;
                            }
                            Err(_) => {
                                errors.push(FieldError::new(
                                    arg_spec.name,
                                    "invalid pattern configured for this argument",
                                ));
                                continue;
                            }
                        }
                    }
                    validated.push((arg_spec.name.to_string(), ValidatedArg::String(raw.clone())));
                }
                ArgType::Uuid => match Uuid::parse_str(raw) {
                    Ok(u) => validated.push((arg_spec.name.to_string(), ValidatedArg::Uuid(u))),
                    Err(_) => errors.push(FieldError::new(arg_spec.name, "not a valid UUID")),
                },
                ArgType::Enum(allowed) => {
                    match allowed.iter().find(|candidate| **candidate == raw.as_str()) {
                        Some(matched) => {
                            validated.push((arg_spec.name.to_string(), ValidatedArg::Enum(matched)))
                        }
                        None => errors.push(FieldError::new(
                            arg_spec.name,
                            format!("must be one of {allowed:?}"),
                        )),
                    }
                }
                ArgType::Integer { min, max } => match raw.parse::<i64>() {
                    Ok(n) if n >= *min && n <= *max => {
                        validated.push((arg_spec.name.to_string(), ValidatedArg::Integer(n)))
                    }
                    Ok(n) => errors.push(FieldError::new(
                        arg_spec.name,
                        format!("{n} is outside the allowed range [{min}, {max}]"),
                    )),
                    Err(_) => errors.push(FieldError::new(arg_spec.name, "not a valid integer")),
                },
                ArgType::Path => {
                    if !is_safe_relative_path(raw) {
                        errors.push(FieldError::new(
                            arg_spec.name,
                            "must be a relative path with no '..' segments",
                        ));
                    } else {
                        validated.push((arg_spec.name.to_string(), ValidatedArg::Path(raw.clone())));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(HubError::InvalidArguments(errors))
        }
    }
}

fn is_safe_relative_path(raw: &str) -> bool {
    use std::path::Component;
    use std::path::Path;

    let path = Path::new(raw);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path
            .components()
            .all(|c| c != Component::ParentDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::ArgSpec;
    use hub_protocol::CommandId;
    use hub_protocol::Scope;

    fn spec() -> CommandSpec {
        CommandSpec {
            command_id: CommandId::new("t"),
            args: vec![
                ArgSpec::required("server", ArgType::String).with_pattern(r"^[a-z0-9_-]+$"),
                ArgSpec::required("catalog_id", ArgType::Uuid),
                ArgSpec::optional("count", ArgType::Integer { min: 0, max: 10 }),
                ArgSpec::optional("mode", ArgType::Enum(vec!["fast", "slow"])),
                ArgSpec::optional("rel", ArgType::Path),
            ],
            max_runtime: std::time::Duration::from_secs(1),
            streaming_capable: false,
            required_scopes: vec![Scope::new("x")],
        }
    }

    fn config() -> CoreConfig {
        CoreConfig::default()
    }

    #[test]
    fn accepts_well_formed_args() {
        let args = HashMap::from([
            ("server".to_string(), "foo".to_string()),
            ("catalog_id".to_string(), Uuid::nil().to_string()),
        ]);
        let validator = Validator::new(&config());
        assert!(validator.validate(&spec(), &args).is_ok());
    }

    #[test]
    fn rejects_unknown_argument() {
        let mut args = HashMap::new();
        args.insert("server".to_string(), "foo".to_string());
        args.insert("catalog_id".to_string(), Uuid::nil().to_string());
        args.insert("bogus".to_string(), "x".to_string());
        let validator = Validator::new(&config());
        let err = validator.validate(&spec(), &args).unwrap_err();
        assert!(matches!(err, HubError::InvalidArguments(_)));
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let mut args = HashMap::new();
        args.insert("server".to_string(), "foo; rm -rf /".to_string());
        args.insert("catalog_id".to_string(), Uuid::nil().to_string());
        let validator = Validator::new(&config());
        let err = validator.validate(&spec(), &args).unwrap_err();
        match err {
            HubError::InvalidArguments(fields) => {
                assert!(fields.iter().any(|f| f.field == "server"));
            }
            _ => panic!("expected InvalidArguments"),
        }
    }

    #[test]
    fn rejects_path_traversal() {
        let mut args = HashMap::new();
        args.insert("server".to_string(), "foo".to_string());
        args.insert("catalog_id".to_string(), Uuid::nil().to_string());
        args.insert("rel".to_string(), "../../etc/passwd".to_string());
        let validator = Validator::new(&config());
        assert!(validator.validate(&spec(), &args).is_err());
    }

    #[test]
    fn reports_every_failing_field_in_one_pass() {
        let mut args = HashMap::new();
        args.insert("server".to_string(), "BAD FORMAT!".to_string());
        args.insert("catalog_id".to_string(), "not-a-uuid".to_string());
        let validator = Validator::new(&config());
        match validator.validate(&spec(), &args).unwrap_err() {
            HubError::InvalidArguments(fields) => assert_eq!(fields.len(), 2),
            _ => panic!("expected InvalidArguments"),
        }
    }

    #[test]
    fn max_length_boundary() {
        let validator = Validator::new(&config());
        let cap = config().max_arg_len_bytes;
        let at_cap = "a".repeat(cap);
        let over_cap = "a".repeat(cap + 1);

        let mut ok_args = HashMap::new();
        ok_args.insert("server".to_string(), "foo".to_string());
        ok_args.insert("catalog_id".to_string(), Uuid::nil().to_string());
        ok_args.insert("mode".to_string(), "fast".to_string());
        // Reuse the `rel` field (Path type, no extra pattern) to exercise
        // the raw length cap directly.
        let spec_with_long_path = {
            let mut s = spec();
            s.args.push(ArgSpec::optional("longstring", ArgType::String));
            s
        };
        ok_args.insert("longstring".to_string(), at_cap);
        assert!(validator.validate(&spec_with_long_path, &ok_args).is_ok());

        ok_args.insert("longstring".to_string(), over_cap);
        assert!(validator.validate(&spec_with_long_path, &ok_args).is_err());
    }
}
