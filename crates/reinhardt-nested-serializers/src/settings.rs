//! Settings for nested writes
//!
//! Settings can be built in code or read from TOML. Every key is optional.

use serde::{Deserialize, Serialize};

/// Message returned to clients when a stale related entity cannot be deleted
pub const DEFAULT_PROTECTED_ERROR_MESSAGE: &str =
	"Cannot delete this object because other objects still refer to it.";

/// Nested write settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NestedSettings {
	/// Deepest level of nesting accepted in a payload (the root is level 0)
	pub max_depth: usize,

	/// Message used when a delete is refused by a remaining reference
	pub protected_error_message: String,

	/// Merge the numeric status code into error response bodies
	pub include_status_code: bool,
}

impl Default for NestedSettings {
	fn default() -> Self {
		Self {
			max_depth: 10,
			protected_error_message: DEFAULT_PROTECTED_ERROR_MESSAGE.to_string(),
			include_status_code: true,
		}
	}
}

impl NestedSettings {
	/// Parse settings from TOML
	///
	/// # Examples
	///
	/// ```
	/// use reinhardt_nested_serializers::NestedSettings;
	///
	/// let settings = NestedSettings::from_toml_str("max_depth = 3").unwrap();
	/// assert_eq!(settings.max_depth, 3);
	/// assert!(settings.include_status_code);
	/// ```
	pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(source)
	}

	pub fn with_max_depth(mut self, max_depth: usize) -> Self {
		self.max_depth = max_depth;
		self
	}

	pub fn with_protected_error_message(mut self, message: impl Into<String>) -> Self {
		self.protected_error_message = message.into();
		self
	}

	pub fn with_status_code(mut self, include: bool) -> Self {
		self.include_status_code = include;
		self
	}
}
