//! EnvelopeValidator - handler のレスポンスを検証
//!
//! # 検証順序（最初の失敗で打ち切り）
//! 1. Parse: 構造化された map で、必須のトップレベルキーがある
//! 2. Identity: handler_name が期待する handler と一致
//! 3. Status: 4 値のいずれか。completed 以外はここで HandlerReportedFailure
//! 4. Schema lookup
//! 5. Completeness: 欠けている required field を全て列挙
//! 6. Constraints: 最初の違反を報告
//!
//! retry はしません。それは dispatcher の責務です。

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::Value;

use crate::domain::envelope::{
    ENVELOPE_KEYS, Envelope, ExecutionStatus, KEY_EXECUTION_STATUS, KEY_HANDLER_NAME, KEY_OUTPUT,
    KEY_TIMESTAMP,
};
use crate::domain::errors::ValidationError;
use crate::domain::outcome::TaskResult;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    registry: Arc<SchemaRegistry>,
}

impl EnvelopeValidator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate a raw handler response against the envelope shape and the
    /// schema of `handler_name`.
    ///
    /// Pure: the same input always yields the same outcome.
    pub fn validate(&self, raw: &Value, handler_name: &str) -> Result<Envelope, ValidationError> {
        // 1. parse
        let obj = raw.as_object().ok_or_else(|| {
            ValidationError::MalformedEnvelope(format!(
                "expected a JSON object, got {}",
                json_type(raw)
            ))
        })?;

        let missing_keys: Vec<&str> = ENVELOPE_KEYS
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing_keys.is_empty() {
            return Err(ValidationError::MalformedEnvelope(format!(
                "missing top-level keys: {}",
                missing_keys.join(", ")
            )));
        }

        let actual_name = obj[KEY_HANDLER_NAME].as_str().ok_or_else(|| {
            ValidationError::MalformedEnvelope(format!("{KEY_HANDLER_NAME} must be a string"))
        })?;
        let timestamp = parse_timestamp(&obj[KEY_TIMESTAMP])?;
        let output = obj[KEY_OUTPUT].as_object().ok_or_else(|| {
            ValidationError::MalformedEnvelope(format!(
                "{KEY_OUTPUT} must be an object, got {}",
                json_type(&obj[KEY_OUTPUT])
            ))
        })?;

        // 2. identity
        if actual_name != handler_name {
            return Err(ValidationError::HandlerMismatch {
                expected: handler_name.to_string(),
                actual: actual_name.to_string(),
            });
        }

        // 3. status
        let raw_status = &obj[KEY_EXECUTION_STATUS];
        let status: ExecutionStatus = raw_status
            .as_str()
            .ok_or_else(|| ValidationError::InvalidStatus(raw_status.to_string()))?
            .parse()
            .map_err(ValidationError::InvalidStatus)?;
        if status != ExecutionStatus::Completed {
            return Err(ValidationError::HandlerReportedFailure {
                status: status.to_string(),
            });
        }

        // 4. schema
        let schema = self
            .registry
            .lookup(handler_name)
            .map_err(|_| ValidationError::UnknownHandler(handler_name.to_string()))?;

        // 5. completeness: report every missing field, not only the first
        let missing: Vec<String> = schema
            .required_fields
            .iter()
            .filter(|f| !output.contains_key(f.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingField(missing));
        }

        // 6. constraints (absent optional fields are not checked)
        for (field, constraint) in &schema.field_constraints {
            if let Some(value) = output.get(field)
                && !constraint.check(value)
            {
                return Err(ValidationError::ConstraintViolation {
                    field: field.clone(),
                    constraint: constraint.to_string(),
                    value: value.clone(),
                });
            }
        }

        Ok(Envelope {
            handler_name: actual_name.to_string(),
            timestamp,
            execution_status: status,
            output: output.clone(),
        })
    }

    /// Re-run validation on an accepted result.
    pub fn revalidate(&self, result: &TaskResult) -> Result<Envelope, ValidationError> {
        self.validate(&result.envelope.to_value(), result.handler_name())
    }
}

fn parse_timestamp(raw: &Value) -> Result<DateTime<FixedOffset>, ValidationError> {
    let s = raw.as_str().ok_or_else(|| {
        ValidationError::MalformedEnvelope(format!("{KEY_TIMESTAMP} must be an ISO-8601 string"))
    })?;
    parse_iso8601(s).ok_or_else(|| {
        ValidationError::MalformedEnvelope(format!("{KEY_TIMESTAMP} '{s}' is not ISO-8601"))
    })
}

/// Extended or basic ISO-8601 date-time. Without an offset the time is
/// taken as UTC.
fn parse_iso8601(s: &str) -> Option<DateTime<FixedOffset>> {
    const WITH_OFFSET: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y%m%dT%H%M%S%.f%z"];
    const LOCAL: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y%m%dT%H%M%S%.f"];

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Some(dt) = WITH_OFFSET
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt);
    }
    let local = s.strip_suffix('Z').unwrap_or(s);
    LOCAL
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(local, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::domain::ids::TaskId;
    use crate::schema::{Constraint, HandlerSchema};
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn validator() -> EnvelopeValidator {
        let mut registry = SchemaRegistry::new();
        registry
            .register_schema(
                HandlerSchema::new("code-analyzer")
                    .require("complexity_metrics")
                    .require("recommendations")
                    .constrain("recommendations", Constraint::MinItems { min: 1 })
                    .constrain("severity", Constraint::OneOf {
                        values: vec![json!("low"), json!("high")],
                    }),
            )
            .unwrap();
        EnvelopeValidator::new(Arc::new(registry))
    }

    fn envelope(status: &str, output: Value) -> Value {
        json!({
            "handler_name": "code-analyzer",
            "timestamp": "2024-01-01T00:00:00Z",
            "execution_status": status,
            "output": output,
        })
    }

    fn good_output() -> Value {
        json!({
            "complexity_metrics": {"cyclomatic": 4},
            "recommendations": ["extract method"],
        })
    }

    #[test]
    fn complete_envelope_is_accepted() {
        let v = validator();
        let env = v
            .validate(&envelope("completed", good_output()), "code-analyzer")
            .unwrap();

        assert_eq!(env.handler_name, "code-analyzer");
        assert_eq!(env.execution_status, ExecutionStatus::Completed);
        assert_eq!(env.output["complexity_metrics"]["cyclomatic"], 4);
    }

    #[test]
    fn validation_is_idempotent() {
        let v = validator();
        let raw = envelope("completed", good_output());
        assert_eq!(
            v.validate(&raw, "code-analyzer"),
            v.validate(&raw, "code-analyzer")
        );

        let bad = envelope("completed", json!({}));
        assert_eq!(
            v.validate(&bad, "code-analyzer"),
            v.validate(&bad, "code-analyzer")
        );
    }

    #[test]
    fn every_missing_field_is_listed() {
        let v = validator();
        let err = v
            .validate(&envelope("completed", json!({"other": 1})), "code-analyzer")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField(vec![
                "complexity_metrics".into(),
                "recommendations".into()
            ])
        );

        let err = v
            .validate(
                &envelope("completed", json!({"complexity_metrics": {}})),
                "code-analyzer",
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField(vec!["recommendations".into()])
        );
    }

    #[rstest]
    #[case::blocked("blocked")]
    #[case::error("error")]
    #[case::in_progress("in_progress")]
    fn non_completed_status_short_circuits_field_checks(#[case] status: &str) {
        let v = validator();
        // output is missing every required field, but the status wins
        let err = v
            .validate(&envelope(status, json!({})), "code-analyzer")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::HandlerReportedFailure {
                status: status.to_string()
            }
        );
    }

    #[rstest]
    #[case::unknown_word(json!("done"), "done")]
    #[case::not_a_string(json!(1), "1")]
    fn out_of_enum_status_is_invalid(#[case] status: Value, #[case] reported: &str) {
        let v = validator();
        let mut raw = envelope("completed", good_output());
        raw["execution_status"] = status;
        assert_eq!(
            v.validate(&raw, "code-analyzer").unwrap_err(),
            ValidationError::InvalidStatus(reported.to_string())
        );
    }

    #[rstest]
    #[case::raw_text(json!("here is my analysis"))]
    #[case::array(json!([1, 2]))]
    #[case::missing_output(json!({"handler_name": "code-analyzer", "timestamp": "2024-01-01T00:00:00Z", "execution_status": "completed"}))]
    #[case::bad_timestamp(json!({"handler_name": "code-analyzer", "timestamp": "yesterday", "execution_status": "completed", "output": {}}))]
    #[case::month_out_of_range(json!({"handler_name": "code-analyzer", "timestamp": "2024-13-01T00:00:00", "execution_status": "completed", "output": {}}))]
    #[case::output_not_object(json!({"handler_name": "code-analyzer", "timestamp": "2024-01-01T00:00:00Z", "execution_status": "completed", "output": []}))]
    #[case::name_not_string(json!({"handler_name": 7, "timestamp": "2024-01-01T00:00:00Z", "execution_status": "completed", "output": {}}))]
    fn malformed_envelopes(#[case] raw: Value) {
        let err = validator().validate(&raw, "code-analyzer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope, "{err}");
    }

    #[test]
    fn answer_from_other_handler_is_a_mismatch() {
        let mut raw = envelope("completed", good_output());
        raw["handler_name"] = json!("performance-auditor");
        let err = validator().validate(&raw, "code-analyzer").unwrap_err();
        assert_eq!(
            err,
            ValidationError::HandlerMismatch {
                expected: "code-analyzer".into(),
                actual: "performance-auditor".into(),
            }
        );
    }

    #[test]
    fn handler_without_schema_is_unknown() {
        let mut raw = envelope("completed", good_output());
        raw["handler_name"] = json!("ghost");
        let err = validator().validate(&raw, "ghost").unwrap_err();
        assert_eq!(err, ValidationError::UnknownHandler("ghost".into()));
    }

    #[test]
    fn constraint_violation_reports_field_and_value() {
        let raw = envelope(
            "completed",
            json!({"complexity_metrics": {}, "recommendations": []}),
        );
        let err = validator().validate(&raw, "code-analyzer").unwrap_err();
        match err {
            ValidationError::ConstraintViolation { field, value, .. } => {
                assert_eq!(field, "recommendations");
                assert_eq!(value, json!([]));
            }
            other => panic!("expected ConstraintViolation, got {other:?}"),
        }
    }

    #[test]
    fn optional_constrained_field_is_checked_only_when_present() {
        let v = validator();
        let mut output = good_output();
        assert!(v.validate(&envelope("completed", output.clone()), "code-analyzer").is_ok());

        output["severity"] = json!("medium");
        let err = v
            .validate(&envelope("completed", output), "code-analyzer")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn accepted_result_revalidates() {
        let v = validator();
        let env = v
            .validate(&envelope("completed", good_output()), "code-analyzer")
            .unwrap();
        let result = TaskResult {
            task_id: TaskId::from_ulid(Ulid::new()),
            envelope: env.clone(),
            history: vec![],
        };
        assert_eq!(v.revalidate(&result), Ok(env));
    }

    #[rstest]
    #[case::rfc3339_utc("2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z")]
    #[case::no_offset("2024-01-01T00:00:00", "2024-01-01T00:00:00Z")]
    #[case::no_offset_micros("2024-01-01T00:00:00.123456", "2024-01-01T00:00:00.123456Z")]
    #[case::basic_utc("20240101T000000Z", "2024-01-01T00:00:00Z")]
    #[case::basic_offset("20240101T090000+0900", "2024-01-01T09:00:00+09:00")]
    #[case::extended_offset("2024-01-01T09:00:00+09:00", "2024-01-01T09:00:00+09:00")]
    fn iso8601_timestamps_are_accepted(#[case] stamp: &str, #[case] wire: &str) {
        let v = validator();
        let mut raw = envelope("completed", good_output());
        raw["timestamp"] = json!(stamp);

        let env = v.validate(&raw, "code-analyzer").unwrap();
        assert_eq!(env.to_value()["timestamp"], wire);
    }

    #[test]
    fn offset_survives_revalidation() {
        let v = validator();
        let mut raw = envelope("completed", good_output());
        raw["timestamp"] = json!("2024-01-01T09:00:00+09:00");
        let env = v.validate(&raw, "code-analyzer").unwrap();
        let result = TaskResult {
            task_id: TaskId::from_ulid(Ulid::new()),
            envelope: env.clone(),
            history: vec![],
        };

        let again = v.revalidate(&result).unwrap();
        assert_eq!(again.timestamp.offset().local_minus_utc(), 9 * 3600);
        assert_eq!(again.to_value(), raw);
    }
}
