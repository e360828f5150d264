//! Argument validation and error-message sanitization.

use serde_json::Value;

use crate::errors::CallError;
use crate::metadata::HandlerMetadata;

/// Check a call's arguments against the handler's declared shapes.
///
/// Runs only for handlers flagged `requires_validation`; the handler body
/// is never invoked when this fails.
pub fn validate_args(meta: &HandlerMetadata, args: &[Value]) -> Result<(), CallError> {
    if !meta.flags.requires_validation {
        return Ok(());
    }
    if args.len() != meta.params.len() {
        return Err(CallError::InvalidArgs {
            message: format!(
                "'{}' expects {} argument(s), got {}",
                meta.exposed_name,
                meta.params.len(),
                args.len()
            ),
        });
    }
    for (index, (shape, arg)) in meta.params.iter().zip(args).enumerate() {
        if !shape.matches(arg) {
            return Err(CallError::InvalidArgs {
                message: format!(
                    "argument {index} of '{}' must be {}",
                    meta.exposed_name,
                    shape.token()
                ),
            });
        }
    }
    Ok(())
}

/// Client-facing message for an error.
///
/// Resolution, validation, access and capacity messages are user-facing
/// and preserved; execution failures are stripped of internal details.
pub fn sanitize_message(err: &CallError) -> String {
    match err {
        CallError::Execution { .. } => "Internal handler error".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{HandlerFlags, ParamShape, PathScope, derive_id};
    use serde_json::json;

    fn meta(params: Vec<ParamShape>, requires_validation: bool) -> HandlerMetadata {
        HandlerMetadata {
            id: derive_id("chat", "send", &params),
            exposed_name: "send".into(),
            group: "chat".into(),
            path_scope: PathScope::any(),
            params,
            flags: HandlerFlags {
                requires_validation,
                ..HandlerFlags::default()
            },
        }
    }

    #[test]
    fn matching_args_pass() {
        let m = meta(vec![ParamShape::String, ParamShape::Number], true);
        assert!(validate_args(&m, &[json!("hi"), json!(2)]).is_ok());
    }

    #[test]
    fn arity_mismatch_rejected() {
        let m = meta(vec![ParamShape::String], true);
        let err = validate_args(&m, &[]).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_ARGS);
        assert!(err.to_string().contains("expects 1"));
    }

    #[test]
    fn shape_mismatch_rejected_with_index() {
        let m = meta(vec![ParamShape::String, ParamShape::Bool], true);
        let err = validate_args(&m, &[json!("ok"), json!(5)]).unwrap_err();
        assert!(err.to_string().contains("argument 1"));
        assert!(err.to_string().contains("bool"));
    }

    #[test]
    fn any_shape_accepts_null() {
        let m = meta(vec![ParamShape::Any], true);
        assert!(validate_args(&m, &[Value::Null]).is_ok());
    }

    #[test]
    fn unvalidated_handler_skips_checks() {
        let m = meta(vec![ParamShape::String], false);
        // Wrong arity and shape, but validation is not requested.
        assert!(validate_args(&m, &[json!(1), json!(2), json!(3)]).is_ok());
    }

    #[test]
    fn sanitize_strips_execution_details() {
        let err = CallError::Execution {
            message: "panic at src/thing.rs:42".into(),
        };
        assert_eq!(sanitize_message(&err), "Internal handler error");
    }

    #[test]
    fn sanitize_preserves_user_facing_messages() {
        let err = CallError::InvalidArgs {
            message: "argument 0 of 'send' must be str".into(),
        };
        assert!(sanitize_message(&err).contains("send"));
    }
}
