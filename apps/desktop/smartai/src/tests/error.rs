// Unit tests for error module
// Errors are rendered as JSON for the UI collaborator

use crate::error::SmartaiError;

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Tests that errors can be serialized for the UI.
///
/// **WHY THIS MATTERS**: Command failures are pushed to the UI as JSON. If
/// serialization breaks, the UI receives opaque errors.
///
/// **BUG THIS CATCHES**: Would catch if someone removes the `#[derive(Serialize)]`
/// or changes the `type`/`data` tagging the UI switches on.
#[test]
fn given_smartai_error_when_serialized_then_contains_variant_and_message() {
    // GIVEN: A SmartaiError
    let err = SmartaiError::Export {
        message: String::from("disk full"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Serializing to JSON
    let json = serde_json::to_value(&err).unwrap();

    // THEN: The variant name and message are present
    assert_eq!(json["type"], "Export");
    assert_eq!(json["data"]["message"], "disk full");
}

/// **VALUE**: Verifies the display form carries the caller location.
///
/// **WHY THIS MATTERS**: Logged errors are only useful when they point at the
/// line that raised them.
///
/// **BUG THIS CATCHES**: Would catch a format string that drops `{location}`.
#[test]
fn given_smartai_error_when_displayed_then_includes_location() {
    // GIVEN: An input error raised here
    let err = SmartaiError::Input {
        message: String::from("bad"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Formatting it
    let text = err.to_string();

    // THEN: The message and this file are both mentioned
    assert!(text.starts_with("Input Error: bad"));
    assert!(text.contains("error.rs"), "got: {text}");
}
