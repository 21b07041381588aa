use std::fmt;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Failures of the foreign call itself, as opposed to an execution that ran
/// and reported `success: false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulationError {
    /// The module answered with its generic `fail` envelope. Its state after
    /// this is unspecified, so nothing is retried.
    ForeignFailure { export: String, message: String },
    MalformedResponse { export: String, why: String },
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::ForeignFailure { export, message } => {
                write!(f, "emulator call `{export}` failed: {message}")
            }
            EmulationError::MalformedResponse { export, why } => {
                write!(f, "malformed response from `{export}`: {why}")
            }
        }
    }
}

impl std::error::Error for EmulationError {}

/// Result of a top-level call together with the logs it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput<T> {
    pub output: T,
    /// Log text returned inside the response envelope.
    pub logs: String,
    /// Lines printed through the debug sink during the call, joined by `\n`.
    pub debug_logs: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    fail: bool,
    message: Option<String>,
    output: Option<T>,
    #[serde(default)]
    logs: String,
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(
    export: &str,
    raw: &str,
    debug_logs: String,
) -> Result<CallOutput<T>> {
    let envelope: Envelope<T> =
        serde_json::from_str(raw).with_context(|| format!("decode `{export}` response"))?;
    if envelope.fail {
        return Err(EmulationError::ForeignFailure {
            export: export.to_string(),
            message: envelope.message.unwrap_or_default(),
        }
        .into());
    }
    let Some(output) = envelope.output else {
        return Err(EmulationError::MalformedResponse {
            export: export.to_string(),
            why: "neither `fail` nor `output` present".to_string(),
        }
        .into());
    };
    Ok(CallOutput {
        output,
        logs: envelope.logs,
        debug_logs,
    })
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(<D::Error as serde::de::Error>::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodSuccess {
    /// Base64 BOC of the resulting stack.
    pub stack: String,
    pub gas_used: String,
    pub vm_exit_code: i32,
    pub vm_log: String,
    pub missing_library: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodFailure {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawGetMethodOutput")]
pub enum GetMethodOutcome {
    Success(GetMethodSuccess),
    Failure(GetMethodFailure),
}

impl GetMethodOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GetMethodOutcome::Success(_))
    }

    pub fn success(&self) -> Option<&GetMethodSuccess> {
        match self {
            GetMethodOutcome::Success(s) => Some(s),
            GetMethodOutcome::Failure(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGetMethodOutput {
    success: bool,
    error: Option<String>,
    stack: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    gas_used: Option<String>,
    vm_exit_code: Option<i32>,
    vm_log: Option<String>,
    missing_library: Option<String>,
}

impl TryFrom<RawGetMethodOutput> for GetMethodOutcome {
    type Error = String;

    fn try_from(raw: RawGetMethodOutput) -> Result<Self, Self::Error> {
        if !raw.success {
            return Ok(GetMethodOutcome::Failure(GetMethodFailure {
                error: raw.error.unwrap_or_default(),
            }));
        }
        Ok(GetMethodOutcome::Success(GetMethodSuccess {
            stack: raw.stack.ok_or("get-method output is missing `stack`")?,
            gas_used: raw.gas_used.unwrap_or_default(),
            vm_exit_code: raw
                .vm_exit_code
                .ok_or("get-method output is missing `vm_exit_code`")?,
            vm_log: raw.vm_log.unwrap_or_default(),
            missing_library: raw.missing_library,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSuccess {
    /// Base64 BOC of the produced transaction.
    pub transaction: String,
    /// Base64 BOC of the shard account after the transaction.
    pub shard_account: String,
    pub vm_log: String,
    pub actions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFailure {
    pub error: String,
    pub vm_log: Option<String>,
    pub vm_exit_code: Option<i32>,
    /// The external message was rejected before a transaction was created.
    pub external_not_accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTransactionOutput")]
pub enum TransactionOutcome {
    Success(TransactionSuccess),
    Failure(TransactionFailure),
}

impl TransactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Success(_))
    }

    pub fn success(&self) -> Option<&TransactionSuccess> {
        match self {
            TransactionOutcome::Success(s) => Some(s),
            TransactionOutcome::Failure(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTransactionOutput {
    success: bool,
    error: Option<String>,
    transaction: Option<String>,
    shard_account: Option<String>,
    vm_log: Option<String>,
    actions: Option<String>,
    vm_exit_code: Option<i32>,
    external_not_accepted: Option<bool>,
}

impl TryFrom<RawTransactionOutput> for TransactionOutcome {
    type Error = String;

    fn try_from(raw: RawTransactionOutput) -> Result<Self, Self::Error> {
        if !raw.success {
            return Ok(TransactionOutcome::Failure(TransactionFailure {
                error: raw.error.unwrap_or_default(),
                vm_log: raw.vm_log,
                vm_exit_code: raw.vm_exit_code,
                external_not_accepted: raw.external_not_accepted.unwrap_or(false),
            }));
        }
        Ok(TransactionOutcome::Success(TransactionSuccess {
            transaction: raw
                .transaction
                .ok_or("transaction output is missing `transaction`")?,
            shard_account: raw
                .shard_account
                .ok_or("transaction output is missing `shard_account`")?,
            vm_log: raw.vm_log.unwrap_or_default(),
            actions: raw.actions,
        }))
    }
}

/// Build identity reported by the emulator module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmulatorVersion {
    #[serde(rename = "emulatorLibCommitHash")]
    pub commit_hash: String,
    #[serde(rename = "emulatorLibCommitDate")]
    pub commit_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_envelope_is_a_foreign_failure() {
        let err = decode_envelope::<GetMethodOutcome>(
            "run_get_method",
            r#"{"fail":true,"message":"bad config"}"#,
            String::new(),
        )
        .unwrap_err();
        let err = err.downcast::<EmulationError>().unwrap();
        assert_eq!(
            err,
            EmulationError::ForeignFailure {
                export: "run_get_method".to_string(),
                message: "bad config".to_string(),
            }
        );
    }

    #[test]
    fn unsuccessful_output_is_data() {
        let out = decode_envelope::<GetMethodOutcome>(
            "run_get_method",
            r#"{"output":{"success":false,"error":"no such method"},"logs":"L"}"#,
            "dbg".to_string(),
        )
        .unwrap();
        assert_eq!(
            out.output,
            GetMethodOutcome::Failure(GetMethodFailure {
                error: "no such method".to_string()
            })
        );
        assert_eq!(out.logs, "L");
        assert_eq!(out.debug_logs, "dbg");
    }

    #[test]
    fn gas_used_accepts_string_or_number() {
        for gas in [r#""561""#, "561"] {
            let raw = format!(
                r#"{{"output":{{"success":true,"stack":"te6","gas_used":{gas},"vm_exit_code":0,"vm_log":""}}}}"#
            );
            let out = decode_envelope::<GetMethodOutcome>("f", &raw, String::new()).unwrap();
            let ok = out.output.success().unwrap();
            assert_eq!(ok.gas_used, "561");
            assert_eq!(ok.missing_library, None);
        }
    }

    #[test]
    fn successful_output_requires_stack() {
        let err = decode_envelope::<GetMethodOutcome>(
            "f",
            r#"{"output":{"success":true,"vm_exit_code":0}}"#,
            String::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("missing `stack`"));
    }

    #[test]
    fn envelope_without_output_is_malformed() {
        let err = decode_envelope::<TransactionOutcome>("f", r#"{"logs":""}"#, String::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EmulationError>(),
            Some(EmulationError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn transaction_failure_keeps_vm_detail() {
        let out = decode_envelope::<TransactionOutcome>(
            "f",
            r#"{"output":{"success":false,"error":"External message not accepted","external_not_accepted":true,"vm_exit_code":33,"vm_log":"log"}}"#,
            String::new(),
        )
        .unwrap();
        let TransactionOutcome::Failure(fail) = out.output else {
            panic!("expected failure");
        };
        assert!(fail.external_not_accepted);
        assert_eq!(fail.vm_exit_code, Some(33));
        assert_eq!(fail.vm_log.as_deref(), Some("log"));
    }

    #[test]
    fn version_uses_wire_names() {
        let v: EmulatorVersion = serde_json::from_str(
            r#"{"emulatorLibCommitHash":"abc","emulatorLibCommitDate":"2024-01-01"}"#,
        )
        .unwrap();
        assert_eq!(v.commit_hash, "abc");
        assert_eq!(v.commit_date, "2024-01-01");
    }
}
