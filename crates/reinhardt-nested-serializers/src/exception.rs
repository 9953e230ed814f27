//! Translation of save errors into HTTP error responses

use crate::error::SerializerError;
use crate::settings::NestedSettings;
use http::StatusCode;
use reinhardt_nested_orm::Transaction;
use serde_json::{Map, Value, json};

/// Status code and JSON body for a failed save
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
	pub status: StatusCode,
	pub body: Value,
}

/// Build the response for `error`
///
/// When a transaction is still open it is marked rollback-only before the
/// response is built, so nothing written so far can be committed.
///
/// - validation errors: 400 with the field error map
/// - deletes refused by a remaining reference: 400 with
///   [`NestedSettings::protected_error_message`]
/// - anything else: 500
///
/// With [`NestedSettings::include_status_code`] the numeric status is merged
/// into the body as `status_code`.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use reinhardt_nested_serializers::{NestedSettings, SerializerError, ValidationErrors, handle_exception};
/// use serde_json::json;
///
/// let mut errors = ValidationErrors::new();
/// errors.add("name", "This field is required.");
/// let response = handle_exception(
/// 	&SerializerError::Validation(errors),
/// 	None,
/// 	&NestedSettings::default(),
/// );
/// assert_eq!(response.status, StatusCode::BAD_REQUEST);
/// assert_eq!(
/// 	response.body,
/// 	json!({"name": ["This field is required."], "status_code": 400})
/// );
/// ```
pub fn handle_exception(
	error: &SerializerError,
	tx: Option<&mut Transaction<'_>>,
	settings: &NestedSettings,
) -> ErrorResponse {
	if let Some(tx) = tx
		&& tx.is_active()
	{
		tx.abort();
	}

	let (status, body) = match error {
		SerializerError::Validation(errors) => (StatusCode::BAD_REQUEST, errors.as_map().clone()),
		SerializerError::ProtectedReference { .. } => (
			StatusCode::BAD_REQUEST,
			detail(settings.protected_error_message.clone()),
		),
		other => {
			tracing::error!(error = %other, "nested save failed");
			(StatusCode::INTERNAL_SERVER_ERROR, detail(other.to_string()))
		}
	};

	let mut body = body;
	if settings.include_status_code {
		body.insert("status_code".to_string(), json!(status.as_u16()));
	}
	ErrorResponse {
		status,
		body: Value::Object(body),
	}
}

fn detail(message: String) -> Map<String, Value> {
	let mut body = Map::new();
	body.insert("detail".to_string(), Value::String(message));
	body
}

#[cfg(test)]
mod tests {
	use super::*;
	use reinhardt_nested_orm::{MemoryStorage, ModelSchema, OrmError, Schema};
	use rstest::*;

	#[fixture]
	fn storage() -> MemoryStorage {
		MemoryStorage::new(Schema::builder().model(ModelSchema::new("person")).build().unwrap())
	}

	#[rstest]
	fn test_protected_reference_is_bad_request_and_aborts(storage: MemoryStorage) {
		let mut tx = Transaction::begin(&storage).unwrap();
		let error = SerializerError::ProtectedReference {
			model: "child".to_string(),
			referenced_by: "pet".to_string(),
			attname: "owner_id".to_string(),
		};

		let response = handle_exception(&error, Some(&mut tx), &NestedSettings::default());

		assert!(tx.is_aborted());
		assert_eq!(response.status, StatusCode::BAD_REQUEST);
		assert_eq!(
			response.body,
			json!({
				"detail": crate::settings::DEFAULT_PROTECTED_ERROR_MESSAGE,
				"status_code": 400
			})
		);
	}

	#[test]
	fn test_other_errors_are_server_errors() {
		let settings = NestedSettings::default().with_status_code(false);
		let response = handle_exception(
			&SerializerError::Database(OrmError::Integrity("boom".to_string())),
			None,
			&settings,
		);
		assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(response.body, json!({"detail": "Integrity error: boom"}));
	}
}
